use super::domain::{DependentRecord, ProposalId, ProposalRecord, Template};
use super::questionnaire::QuestionnaireResponse;

/// Storage abstraction over proposals, dependents, questionnaires and templates so the
/// service can be exercised in isolation.
pub trait ProposalRepository: Send + Sync {
    fn insert(&self, record: ProposalRecord) -> Result<ProposalRecord, RepositoryError>;
    fn update(&self, record: ProposalRecord) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &ProposalId) -> Result<Option<ProposalRecord>, RepositoryError>;
    /// All proposals, newest first.
    fn list(&self) -> Result<Vec<ProposalRecord>, RepositoryError>;

    fn insert_dependents(&self, dependents: Vec<DependentRecord>) -> Result<(), RepositoryError>;
    fn dependents(&self, proposal_id: &ProposalId) -> Result<Vec<DependentRecord>, RepositoryError>;

    fn save_questionnaire(&self, response: QuestionnaireResponse) -> Result<(), RepositoryError>;
    fn questionnaires(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Vec<QuestionnaireResponse>, RepositoryError>;

    fn active_templates(&self) -> Result<Vec<Template>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    /// A named check constraint rejected the row.
    #[error("constraint {name} violated")]
    Constraint { name: String },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Check constraint the proposal store applies to CPF columns.
pub const CPF_CONSTRAINT: &str = "cpf_valido";

impl RepositoryError {
    pub fn is_constraint(&self, constraint: &str) -> bool {
        matches!(self, Self::Constraint { name } if name == constraint)
    }
}
