use metrics_exporter_prometheus::PrometheusHandle;
use proposta_digital::workflows::proposals::validation::cpf;
use proposta_digital::workflows::proposals::{
    DependentRecord, DocumentKind, DocumentOwner, DocumentStore, ProposalId, ProposalRecord,
    ProposalRepository, QuestionnaireResponse, RepositoryError, StorageError, StoredDocument,
    Template, TemplateId, UploadedFile, CPF_CONSTRAINT,
};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Templates offered when no database is attached.
pub(crate) fn default_templates() -> Vec<Template> {
    vec![
        Template {
            id: TemplateId("amil-facil".to_string()),
            title: "Amil Fácil".to_string(),
            active: true,
            description: Some("Coparticipação, abrangência estadual".to_string()),
        },
        Template {
            id: TemplateId("bradesco-top".to_string()),
            title: "Bradesco Top Nacional".to_string(),
            active: true,
            description: Some("Rede nacional com reembolso".to_string()),
        },
        Template {
            id: TemplateId("sulamerica-classico".to_string()),
            title: "SulAmérica Clássico".to_string(),
            active: false,
            description: None,
        },
    ]
}

/// Process-local store that mirrors the hosted tables, including the CPF check constraint.
#[derive(Clone)]
pub(crate) struct InMemoryProposalRepository {
    proposals: Arc<Mutex<HashMap<ProposalId, ProposalRecord>>>,
    dependents: Arc<Mutex<Vec<DependentRecord>>>,
    questionnaires: Arc<Mutex<Vec<QuestionnaireResponse>>>,
    templates: Arc<Vec<Template>>,
}

impl Default for InMemoryProposalRepository {
    fn default() -> Self {
        Self::with_templates(default_templates())
    }
}

impl InMemoryProposalRepository {
    pub(crate) fn with_templates(templates: Vec<Template>) -> Self {
        Self {
            proposals: Arc::default(),
            dependents: Arc::default(),
            questionnaires: Arc::default(),
            templates: Arc::new(templates),
        }
    }

    fn check_cpf(raw: &str) -> Result<(), RepositoryError> {
        if cpf::is_valid(raw) {
            Ok(())
        } else {
            Err(RepositoryError::Constraint {
                name: CPF_CONSTRAINT.to_string(),
            })
        }
    }
}

impl ProposalRepository for InMemoryProposalRepository {
    fn insert(&self, record: ProposalRecord) -> Result<ProposalRecord, RepositoryError> {
        Self::check_cpf(&record.holder.cpf)?;
        let mut guard = self.proposals.lock().expect("repository mutex poisoned");
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update(&self, record: ProposalRecord) -> Result<(), RepositoryError> {
        let mut guard = self.proposals.lock().expect("repository mutex poisoned");
        if guard.contains_key(&record.id) {
            guard.insert(record.id.clone(), record);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch(&self, id: &ProposalId) -> Result<Option<ProposalRecord>, RepositoryError> {
        let guard = self.proposals.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<ProposalRecord>, RepositoryError> {
        let guard = self.proposals.lock().expect("repository mutex poisoned");
        let mut records: Vec<ProposalRecord> = guard.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    fn insert_dependents(&self, dependents: Vec<DependentRecord>) -> Result<(), RepositoryError> {
        for dependent in &dependents {
            Self::check_cpf(&dependent.cpf)?;
        }
        self.dependents
            .lock()
            .expect("repository mutex poisoned")
            .extend(dependents);
        Ok(())
    }

    fn dependents(&self, proposal_id: &ProposalId) -> Result<Vec<DependentRecord>, RepositoryError> {
        let guard = self.dependents.lock().expect("repository mutex poisoned");
        Ok(guard
            .iter()
            .filter(|dependent| &dependent.proposal_id == proposal_id)
            .cloned()
            .collect())
    }

    fn save_questionnaire(&self, response: QuestionnaireResponse) -> Result<(), RepositoryError> {
        self.questionnaires
            .lock()
            .expect("repository mutex poisoned")
            .push(response);
        Ok(())
    }

    fn questionnaires(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Vec<QuestionnaireResponse>, RepositoryError> {
        let guard = self.questionnaires.lock().expect("repository mutex poisoned");
        Ok(guard
            .iter()
            .filter(|response| &response.proposal_id == proposal_id)
            .cloned()
            .collect())
    }

    fn active_templates(&self) -> Result<Vec<Template>, RepositoryError> {
        Ok(self
            .templates
            .iter()
            .filter(|template| template.active)
            .cloned()
            .collect())
    }
}

/// Keeps uploaded files in memory under `memory://{proposal}/{owner}/{kind}` keys.
#[derive(Default, Clone)]
pub(crate) struct InMemoryDocumentStore {
    objects: Arc<Mutex<HashMap<String, StoredDocument>>>,
}

impl InMemoryDocumentStore {
    pub(crate) fn len(&self) -> usize {
        self.objects.lock().expect("document mutex poisoned").len()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn put(
        &self,
        proposal_id: &ProposalId,
        owner: DocumentOwner,
        kind: DocumentKind,
        file: &UploadedFile,
    ) -> Result<String, StorageError> {
        if file.bytes.is_empty() {
            return Err(StorageError::Rejected {
                kind: kind.label(),
                reason: "empty file".to_string(),
            });
        }
        let url = format!(
            "memory://{proposal_id}/{}/{}",
            owner.path_segment(),
            kind.label()
        );
        self.objects
            .lock()
            .expect("document mutex poisoned")
            .insert(
                url.clone(),
                StoredDocument {
                    content_type: file.content_type.clone(),
                    bytes: file.bytes.clone(),
                },
            );
        Ok(url)
    }

    fn get(&self, url: &str) -> Result<StoredDocument, StorageError> {
        self.objects
            .lock()
            .expect("document mutex poisoned")
            .get(url)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(url.to_string()))
    }
}
