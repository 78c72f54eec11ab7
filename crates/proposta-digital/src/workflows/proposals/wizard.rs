//! Eight-step intake wizard state machine.
//!
//! The wizard only validates and moves the cursor. Persistence is requested through
//! [`StepAction`] and carried out by the service, which then calls back with
//! [`Wizard::confirm_draft`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::documents::{DocumentOwner, UploadedFile};
use super::domain::{format_brl, BrokerContact, DocumentKind, ProposalId, ProposalOrigin, Template};
use super::draft::{DependentDraft, ProposalDraft};
use super::questionnaire::{
    FlowPosition, HealthQuestion, QuestionAnswer, QuestionnaireFlow, Tally,
};
use super::validation::{self, cpf, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Template,
    PlanAndHolder,
    Dependents,
    Documents,
    HealthQuestionnaire,
    Preview,
    Signature,
    Confirmation,
}

impl WizardStep {
    pub const TOTAL: u8 = 8;

    pub const fn number(self) -> u8 {
        match self {
            Self::Template => 1,
            Self::PlanAndHolder => 2,
            Self::Dependents => 3,
            Self::Documents => 4,
            Self::HealthQuestionnaire => 5,
            Self::Preview => 6,
            Self::Signature => 7,
            Self::Confirmation => 8,
        }
    }

    pub const fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::Template),
            2 => Some(Self::PlanAndHolder),
            3 => Some(Self::Dependents),
            4 => Some(Self::Documents),
            5 => Some(Self::HealthQuestionnaire),
            6 => Some(Self::Preview),
            7 => Some(Self::Signature),
            8 => Some(Self::Confirmation),
            _ => None,
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            Self::Template => "Modelo de Proposta",
            Self::PlanAndHolder => "Informações do Plano e Titular",
            Self::Dependents => "Dependentes",
            Self::Documents => "Documentos",
            Self::HealthQuestionnaire => "Questionário de Saúde",
            Self::Preview => "Visualizar Proposta",
            Self::Signature => "Assinatura Digital",
            Self::Confirmation => "Confirmação",
        }
    }

    pub fn next(self) -> Self {
        Self::from_number(self.number() + 1).unwrap_or(self)
    }

    pub fn previous(self) -> Self {
        Self::from_number(self.number().saturating_sub(1)).unwrap_or(self)
    }

    pub fn progress_percent(self) -> u8 {
        let percent = u16::from(self.number()) * 100 / u16::from(Self::TOTAL);
        u8::try_from(percent).unwrap_or(100)
    }
}

/// Side effect the caller must perform before the wizard can move on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Persist a draft proposal so the preview step has a record to render.
    PersistDraft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved(WizardStep),
    Pending(StepAction),
}

/// Files attached in the documents step, keyed by owner and kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WizardDocuments {
    pub holder: BTreeMap<DocumentKind, UploadedFile>,
    pub dependents: BTreeMap<usize, BTreeMap<DocumentKind, UploadedFile>>,
}

impl WizardDocuments {
    pub fn holder_kinds(&self) -> Vec<DocumentKind> {
        self.holder.keys().copied().collect()
    }
}

#[derive(Debug, Clone)]
pub struct Wizard {
    step: WizardStep,
    draft: ProposalDraft,
    documents: WizardDocuments,
    questionnaire: QuestionnaireFlow,
    proposal_id: Option<ProposalId>,
    broker: Option<BrokerContact>,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Wizard {
    /// A wizard opened from a broker link carries that broker for the whole flow.
    pub fn new(broker: Option<BrokerContact>) -> Self {
        let mut draft = ProposalDraft::default();
        if let Some(contact) = &broker {
            draft.broker_name = contact.name.clone();
            draft.broker_id = contact.id.clone();
        }
        Self {
            step: WizardStep::Template,
            draft,
            documents: WizardDocuments::default(),
            questionnaire: QuestionnaireFlow::new(1),
            proposal_id: None,
            broker,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn draft(&self) -> &ProposalDraft {
        &self.draft
    }

    pub fn documents(&self) -> &WizardDocuments {
        &self.documents
    }

    pub fn questionnaire(&self) -> &QuestionnaireFlow {
        &self.questionnaire
    }

    pub fn questionnaire_mut(&mut self) -> &mut QuestionnaireFlow {
        &mut self.questionnaire
    }

    pub fn proposal_id(&self) -> Option<&ProposalId> {
        self.proposal_id.as_ref()
    }

    pub fn broker(&self) -> Option<&BrokerContact> {
        self.broker.as_ref()
    }

    /// Replaces the form values. A preset broker always wins over typed broker fields.
    ///
    /// Documents and answers are held by dependent position. When a dependent is replaced
    /// or removed, everything from that position on is dropped so nobody inherits another
    /// person's files or health answers.
    pub fn update_draft(&mut self, mut draft: ProposalDraft) {
        if let Some(contact) = &self.broker {
            draft.broker_name = contact.name.clone();
            draft.broker_id = contact.id.clone();
        }
        let previous = std::mem::replace(&mut self.draft, draft);

        let changed = previous
            .active_dependents()
            .iter()
            .zip(self.draft.active_dependents())
            .position(|(before, after)| !same_dependent(before, after));
        if let Some(index) = changed {
            self.documents.dependents.retain(|position, _| *position < index);
            self.questionnaire.clear_from(index + 1);
        }

        let dependents = self.draft.active_dependents().len();
        self.documents.dependents.retain(|index, _| *index < dependents);
        self.questionnaire.resize(self.draft.respondent_count());
    }

    pub fn attach_document(&mut self, owner: DocumentOwner, kind: DocumentKind, file: UploadedFile) {
        match owner {
            DocumentOwner::Holder => {
                self.documents.holder.insert(kind, file);
            }
            DocumentOwner::Dependent { index } => {
                self.documents
                    .dependents
                    .entry(index)
                    .or_default()
                    .insert(kind, file);
            }
        }
    }

    /// Validates the current step and moves forward.
    ///
    /// Leaving the questionnaire without a persisted record yields
    /// `Advance::Pending(StepAction::PersistDraft)` and leaves the step unchanged.
    pub fn advance(&mut self, templates: &[Template]) -> Result<Advance, ValidationError> {
        match self.step {
            WizardStep::Template => {
                validation::validate_template_step(&self.draft, self.broker.is_some(), templates)?;
                let selected = self.draft.template_id.trim();
                if let Some(template) = templates.iter().find(|t| t.id.0 == selected) {
                    self.draft.template_title = Some(template.title.clone());
                }
            }
            WizardStep::PlanAndHolder => validation::validate_plan_step(&self.draft)?,
            WizardStep::Dependents => {
                validation::validate_dependents_step(&self.draft)?;
                self.questionnaire.resize(self.draft.respondent_count());
            }
            WizardStep::Documents => {
                validation::validate_documents_step(&self.documents.holder_kinds())?
            }
            WizardStep::HealthQuestionnaire => {
                validation::validate_health_step(&self.draft, self.questionnaire.is_complete())?;
                if self.proposal_id.is_none() {
                    return Ok(Advance::Pending(StepAction::PersistDraft));
                }
            }
            WizardStep::Preview | WizardStep::Confirmation => {}
            WizardStep::Signature => validation::validate_signature_step(&self.draft)?,
        }

        self.step = self.step.next();
        Ok(Advance::Moved(self.step))
    }

    /// Records the persisted draft and, when waiting on it, moves to the preview step.
    pub fn confirm_draft(&mut self, proposal_id: ProposalId) -> WizardStep {
        self.proposal_id = Some(proposal_id);
        if self.step == WizardStep::HealthQuestionnaire {
            self.step = WizardStep::Preview;
        }
        self.step
    }

    /// Remembers a record that was created even though the rest of the draft failed to
    /// save, so a retry updates it instead of creating a duplicate.
    pub fn remember_proposal(&mut self, proposal_id: ProposalId) {
        self.proposal_id = Some(proposal_id);
    }

    #[cfg(test)]
    pub(crate) fn jump_to(&mut self, step: WizardStep) {
        self.step = step;
    }

    /// Goes back one step without validation. Step 1 is the floor.
    pub fn retreat(&mut self) -> WizardStep {
        self.step = self.step.previous();
        self.step
    }

    pub fn ready_to_submit(&self) -> bool {
        self.step == WizardStep::Confirmation
    }

    pub fn origin(&self) -> ProposalOrigin {
        match &self.broker {
            Some(contact) => ProposalOrigin::Broker(contact.clone()),
            None => ProposalOrigin::Direct {
                broker_name: Some(self.draft.broker_name.trim().to_string())
                    .filter(|name| !name.is_empty()),
            },
        }
    }

    pub fn total_value_cents(&self) -> u64 {
        validation::draft_total_cents(&self.draft)
    }

    fn respondent_label(&self, person: usize) -> String {
        if person == 0 {
            return format!("Titular: {}", self.draft.holder.name.trim());
        }
        let name = self
            .draft
            .active_dependents()
            .get(person - 1)
            .map(|dependent| dependent.name.trim())
            .unwrap_or_default();
        format!("Dependente {person}: {name}")
    }

    pub fn snapshot(&self) -> WizardSnapshot {
        let position = self.questionnaire.position();
        let respondent = match position {
            FlowPosition::Question { person, .. } => Some(self.respondent_label(person)),
            FlowPosition::Tally => None,
        };

        WizardSnapshot {
            step: self.step,
            step_number: self.step.number(),
            step_title: self.step.title(),
            total_steps: WizardStep::TOTAL,
            progress_percent: self.step.progress_percent(),
            proposal_id: self.proposal_id.clone(),
            broker_preset: self.broker.is_some(),
            draft: self.draft.clone(),
            documents: DocumentsView {
                holder: self.documents.holder_kinds(),
                dependents: self
                    .documents
                    .dependents
                    .iter()
                    .map(|(index, files)| (*index, files.keys().copied().collect()))
                    .collect(),
            },
            questionnaire: QuestionnaireView {
                position,
                respondent,
                question: self.questionnaire.current_question(),
                current_answer: self.questionnaire.current_answer().cloned(),
                complete: self.questionnaire.is_complete(),
                tally: self.questionnaire.tally(),
            },
            total_value: format_brl(self.total_value_cents()),
        }
    }
}

fn same_dependent(before: &DependentDraft, after: &DependentDraft) -> bool {
    let (cpf_before, cpf_after) = (cpf::digits(&before.cpf), cpf::digits(&after.cpf));
    if !cpf_before.is_empty() && !cpf_after.is_empty() {
        return cpf_before == cpf_after;
    }
    before.name.trim() == after.name.trim()
}

/// Serializable view of a wizard session.
#[derive(Debug, Clone, Serialize)]
pub struct WizardSnapshot {
    pub step: WizardStep,
    pub step_number: u8,
    pub step_title: &'static str,
    pub total_steps: u8,
    pub progress_percent: u8,
    pub proposal_id: Option<ProposalId>,
    pub broker_preset: bool,
    pub draft: ProposalDraft,
    pub documents: DocumentsView,
    pub questionnaire: QuestionnaireView,
    pub total_value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentsView {
    pub holder: Vec<DocumentKind>,
    pub dependents: BTreeMap<usize, Vec<DocumentKind>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionnaireView {
    pub position: FlowPosition,
    pub respondent: Option<String>,
    pub question: Option<&'static HealthQuestion>,
    pub current_answer: Option<QuestionAnswer>,
    pub complete: bool,
    pub tally: Tally,
}
