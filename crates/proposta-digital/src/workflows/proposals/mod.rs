//! Proposal intake: the eight-step wizard, the client completion page and the
//! back-office review, export and notification flows.

pub mod admin;
pub mod documents;
pub mod domain;
pub mod draft;
pub mod export;
pub mod notifications;
pub mod questionnaire;
pub mod repository;
pub mod router;
pub mod service;
pub mod validation;
pub mod wizard;

#[cfg(test)]
mod tests;

pub use admin::{
    AdminListState, AdminListing, ListQuery, ProposalDetail, ProposalFilter, ProposalPage,
    ProposalStats, ProposalSummary, RejectionReason,
};
pub use documents::{DocumentOwner, DocumentStore, StorageError, StoredDocument, UploadedFile};
pub use domain::{
    BrokerContact, DependentRecord, DocumentKind, OriginTag, ProposalId, ProposalOrigin,
    ProposalRecord, ProposalStatus, Template, TemplateId,
};
pub use draft::{AddressDraft, DependentDraft, HolderDraft, ProposalDraft};
pub use export::{ExportArtifact, ExportError};
pub use notifications::{
    Delivery, EmailError, EmailFunctionClient, EmailPayload, EmailServiceStatus, Mailer,
};
pub use questionnaire::{Answer, QuestionAnswer, QuestionnaireFlow, QuestionnaireResponse};
pub use repository::{ProposalRepository, RepositoryError, CPF_CONSTRAINT};
pub use router::proposal_router;
pub use service::{
    CompletionReceipt, CompletionRequest, ProposalService, ProposalServiceError, SessionId,
    SessionView, SubmissionContext, SubmissionReceipt,
};
pub use validation::{FieldError, ValidationError};
pub use wizard::{Wizard, WizardStep};
