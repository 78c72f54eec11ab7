use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::domain::{DocumentKind, DocumentSet, ProposalId};

/// File received from the documents step, held in the wizard session until upload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Whose document a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "owner", rename_all = "snake_case")]
pub enum DocumentOwner {
    Holder,
    /// Zero-based position in the dependents list.
    Dependent { index: usize },
}

impl DocumentOwner {
    pub fn path_segment(&self) -> String {
        match self {
            Self::Holder => "titular".to_string(),
            Self::Dependent { index } => format!("dependente_{}", index + 1),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for StoredDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredDocument")
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Object storage for proposal documents.
pub trait DocumentStore: Send + Sync {
    /// Stores the file and returns the URL the back office reads it from.
    fn put(
        &self,
        proposal_id: &ProposalId,
        owner: DocumentOwner,
        kind: DocumentKind,
        file: &UploadedFile,
    ) -> Result<String, StorageError>;

    fn get(&self, url: &str) -> Result<StoredDocument, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("document {0} not found")]
    NotFound(String),
    #[error("storage rejected {kind}: {reason}")]
    Rejected { kind: &'static str, reason: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadFailure {
    pub kind: DocumentKind,
    pub error: String,
}

/// Outcome of uploading a batch; failures are reported per kind and never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub uploaded: DocumentSet,
    pub failures: Vec<UploadFailure>,
}

pub fn upload_documents<D>(
    store: &D,
    proposal_id: &ProposalId,
    owner: DocumentOwner,
    files: &BTreeMap<DocumentKind, UploadedFile>,
) -> UploadReport
where
    D: DocumentStore + ?Sized,
{
    let mut report = UploadReport::default();
    for (kind, file) in files {
        match store.put(proposal_id, owner, *kind, file) {
            Ok(url) => report.uploaded.insert(*kind, url),
            Err(err) => {
                tracing::warn!(
                    proposal_id = %proposal_id,
                    document = kind.label(),
                    owner = %owner.path_segment(),
                    error = %err,
                    "document upload failed"
                );
                report.failures.push(UploadFailure {
                    kind: *kind,
                    error: err.to_string(),
                });
            }
        }
    }
    report
}

/// File extension used in export bundles.
pub fn extension_for(content_type: &str, url: &str) -> String {
    let from_url = url
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(char::is_alphanumeric));
    if let Some(ext) = from_url {
        return ext;
    }

    let Ok(mime) = content_type.parse::<mime::Mime>() else {
        return "bin".to_string();
    };
    let Some(extensions) = mime_guess::get_mime_extensions_str(mime.essence_str()) else {
        return "bin".to_string();
    };
    // Subtype first (image/jpeg -> jpeg), then whatever the registry lists.
    extensions
        .iter()
        .find(|ext| **ext == mime.subtype().as_str())
        .or_else(|| extensions.first())
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| "bin".to_string())
}
