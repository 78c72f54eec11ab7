use serde::{Deserialize, Serialize};

use super::domain::{Accommodation, Coverage};

/// Raw wizard form values. Every field is kept as typed by the client until validation
/// converts the draft into persisted records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalDraft {
    pub broker_name: String,
    pub broker_id: Option<String>,
    pub template_id: String,
    pub template_title: Option<String>,
    pub coverage: Coverage,
    pub accommodation: Accommodation,
    pub plan_code: String,
    pub value: String,
    pub holder: HolderDraft,
    pub address: AddressDraft,
    pub has_dependents: bool,
    pub dependents: Vec<DependentDraft>,
    pub weight: String,
    pub height: String,
    /// Encoded signature image captured in the signature step.
    pub signature: String,
}

impl ProposalDraft {
    /// Dependents that count toward the proposal, honoring the has-dependents flag.
    pub fn active_dependents(&self) -> &[DependentDraft] {
        if self.has_dependents {
            &self.dependents
        } else {
            &[]
        }
    }

    /// Holder plus active dependents.
    pub fn respondent_count(&self) -> usize {
        1 + self.active_dependents().len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HolderDraft {
    pub name: String,
    pub cpf: String,
    pub rg: String,
    pub birth_date: String,
    pub cns: Option<String>,
    pub email: String,
    pub phone: String,
    pub mother_name: Option<String>,
    pub sex: Option<String>,
    pub marital_status: Option<String>,
    pub birthplace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressDraft {
    pub cep: String,
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependentDraft {
    pub name: String,
    pub cpf: String,
    pub rg: String,
    pub birth_date: String,
    pub cns: Option<String>,
    pub relationship: String,
    pub mother_name: Option<String>,
    pub weight: Option<String>,
    pub height: Option<String>,
    pub individual_value: Option<String>,
}
