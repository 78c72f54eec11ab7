use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::admin::{
    AdminListState, AdminListing, ListQuery, ProposalDetail, ProposalFilter, ProposalStats,
    ProposalSummary, RejectionReason,
};
use super::documents::{
    upload_documents, DocumentOwner, DocumentStore, StorageError, UploadedFile,
};
use super::domain::{
    BrokerContact, DependentId, DependentRecord, DocumentKind, ProposalId, ProposalOrigin,
    ProposalRecord, ProposalStatus, SignatureArtifact, Template,
};
use super::export::{self, ExportArtifact, ExportError};
use super::notifications::{
    self, validation_link, Delivery, EmailError, EmailPayload, EmailServiceStatus, Mailer,
};
use super::questionnaire::{
    Answer, FlowError, HealthQuestion, QuestionAnswer, QuestionnaireFlow, QuestionnaireResponse,
    Respondent, HEALTH_QUESTIONS,
};
use super::repository::{ProposalRepository, RepositoryError, CPF_CONSTRAINT};
use super::validation::{self, RecordSeed, ValidationError};
use super::wizard::{Advance, StepAction, Wizard, WizardSnapshot};
use super::draft::ProposalDraft;
use crate::config::IntakeConfig;

/// Handle for an in-progress wizard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub wizard: WizardSnapshot,
}

/// Request metadata captured alongside a signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Result of a best-effort broker notification. Never fails the surrounding operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationOutcome {
    NotRequired,
    Sent,
    Simulated,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub proposal_id: ProposalId,
    pub status: ProposalStatus,
    pub total_value: String,
    pub redirect_to: String,
    /// Partial failures that did not abort the submission.
    pub warnings: Vec<String>,
    pub broker_notification: NotificationOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionDependent {
    pub name: String,
    pub relationship: &'static str,
}

/// What the completion page shows before the client answers and signs.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionView {
    pub proposal_id: ProposalId,
    pub client_name: String,
    pub status: ProposalStatus,
    pub status_label: &'static str,
    pub plan_code: String,
    pub template_title: Option<String>,
    pub total_value: String,
    pub dependents: Vec<CompletionDependent>,
    pub questions: &'static [HealthQuestion],
    pub already_completed: bool,
}

/// Answers (one list per person, holder first) plus an optional signature image.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    pub answers: Vec<Vec<QuestionAnswer>>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionReceipt {
    pub proposal_id: ProposalId,
    pub status: ProposalStatus,
    pub broker_notification: NotificationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOutcome {
    pub proposal_id: ProposalId,
    pub status: ProposalStatus,
    pub broker_notification: NotificationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationEmailOutcome {
    pub proposal_id: ProposalId,
    pub link: String,
    pub delivery: Delivery,
    /// False when the email went out but the sent flag could not be stored.
    pub flag_updated: bool,
}

/// Service owning wizard sessions and every proposal operation.
pub struct ProposalService<R, D, M> {
    repository: Arc<R>,
    documents: Arc<D>,
    mailer: Arc<M>,
    sessions: Mutex<HashMap<SessionId, Wizard>>,
    config: IntakeConfig,
    environment: &'static str,
}

impl<R, D, M> ProposalService<R, D, M>
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    pub fn new(repository: Arc<R>, documents: Arc<D>, mailer: Arc<M>, config: IntakeConfig) -> Self {
        Self {
            repository,
            documents,
            mailer,
            sessions: Mutex::new(HashMap::new()),
            config,
            environment: "development",
        }
    }

    /// Label reported by the email status probe.
    pub fn with_environment(mut self, environment: &'static str) -> Self {
        self.environment = environment;
        self
    }

    pub fn templates(&self) -> Result<Vec<Template>, ProposalServiceError> {
        Ok(self.repository.active_templates()?)
    }

    fn with_wizard<T>(
        &self,
        session_id: &SessionId,
        action: impl FnOnce(&mut Wizard) -> Result<T, ProposalServiceError>,
    ) -> Result<T, ProposalServiceError> {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        let wizard = sessions
            .get_mut(session_id)
            .ok_or_else(|| ProposalServiceError::SessionNotFound(session_id.0.clone()))?;
        action(wizard)
    }

    fn view(session_id: &SessionId, wizard: &Wizard) -> SessionView {
        SessionView {
            session_id: session_id.clone(),
            wizard: wizard.snapshot(),
        }
    }

    /// Starts a wizard. A broker contact presets the broker for the whole flow.
    pub fn open_session(&self, broker: Option<BrokerContact>) -> SessionView {
        let session_id = SessionId::generate();
        let wizard = Wizard::new(broker);
        let view = Self::view(&session_id, &wizard);
        self.sessions
            .lock()
            .expect("session mutex poisoned")
            .insert(session_id.clone(), wizard);
        tracing::debug!(session_id = %session_id.0, "wizard session opened");
        view
    }

    #[cfg(test)]
    pub(crate) fn adopt_session(&self, wizard: Wizard) -> SessionId {
        let session_id = SessionId::generate();
        self.sessions
            .lock()
            .expect("session mutex poisoned")
            .insert(session_id.clone(), wizard);
        session_id
    }

    pub fn session(&self, session_id: &SessionId) -> Result<SessionView, ProposalServiceError> {
        self.with_wizard(session_id, |wizard| Ok(Self::view(session_id, wizard)))
    }

    pub fn update_draft(
        &self,
        session_id: &SessionId,
        draft: ProposalDraft,
    ) -> Result<SessionView, ProposalServiceError> {
        self.with_wizard(session_id, |wizard| {
            wizard.update_draft(draft);
            Ok(Self::view(session_id, wizard))
        })
    }

    pub fn attach_document(
        &self,
        session_id: &SessionId,
        owner: DocumentOwner,
        kind: DocumentKind,
        file: UploadedFile,
    ) -> Result<SessionView, ProposalServiceError> {
        if file.bytes.is_empty() {
            return Err(ValidationError::single(
                format!("documents.{}", kind.label()),
                "Arquivo vazio",
            )
            .into());
        }

        self.with_wizard(session_id, |wizard| {
            if let DocumentOwner::Dependent { index } = owner {
                if index >= wizard.draft().active_dependents().len() {
                    return Err(ValidationError::single(
                        "dependent",
                        format!("Dependente {} não encontrado", index + 1),
                    )
                    .into());
                }
            }
            wizard.attach_document(owner, kind, file);
            Ok(Self::view(session_id, wizard))
        })
    }

    pub fn answer_question(
        &self,
        session_id: &SessionId,
        answer: Answer,
        details: Option<String>,
    ) -> Result<SessionView, ProposalServiceError> {
        self.with_wizard(session_id, |wizard| {
            wizard.questionnaire_mut().answer(answer, details)?;
            Ok(Self::view(session_id, wizard))
        })
    }

    pub fn next_question(&self, session_id: &SessionId) -> Result<SessionView, ProposalServiceError> {
        self.with_wizard(session_id, |wizard| {
            wizard.questionnaire_mut().next()?;
            Ok(Self::view(session_id, wizard))
        })
    }

    pub fn previous_question(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionView, ProposalServiceError> {
        self.with_wizard(session_id, |wizard| {
            wizard.questionnaire_mut().previous();
            Ok(Self::view(session_id, wizard))
        })
    }

    pub fn review_questionnaire(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionView, ProposalServiceError> {
        self.with_wizard(session_id, |wizard| {
            wizard.questionnaire_mut().review();
            Ok(Self::view(session_id, wizard))
        })
    }

    /// Validates the current step and moves on, persisting a draft proposal when the
    /// wizard asks for it.
    pub fn advance(&self, session_id: &SessionId) -> Result<SessionView, ProposalServiceError> {
        let templates = self.repository.active_templates()?;
        self.with_wizard(session_id, |wizard| {
            match wizard.advance(&templates)? {
                Advance::Moved(step) => {
                    tracing::debug!(session_id = %session_id.0, step = step.number(), "wizard advanced");
                }
                Advance::Pending(StepAction::PersistDraft) => {
                    let proposal_id = self.persist_draft(wizard)?;
                    wizard.confirm_draft(proposal_id);
                }
            }
            Ok(Self::view(session_id, wizard))
        })
    }

    pub fn retreat(&self, session_id: &SessionId) -> Result<SessionView, ProposalServiceError> {
        self.with_wizard(session_id, |wizard| {
            wizard.retreat();
            Ok(Self::view(session_id, wizard))
        })
    }

    fn insert_proposal(&self, record: ProposalRecord) -> Result<ProposalRecord, ProposalServiceError> {
        self.repository.insert(record).map_err(|err| {
            if err.is_constraint(CPF_CONSTRAINT) {
                ValidationError::invalid_cpf("holder.cpf").into()
            } else {
                err.into()
            }
        })
    }

    /// Builds dependent rows with their documents uploaded.
    fn build_dependents(
        &self,
        proposal_id: &ProposalId,
        wizard: &Wizard,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<DependentRecord>, ProposalServiceError> {
        let empty = BTreeMap::new();
        let mut records = Vec::new();
        for (index, draft) in wizard.draft().active_dependents().iter().enumerate() {
            let mut record = validation::dependent_from_draft(proposal_id, index, draft)?;
            let files = wizard.documents().dependents.get(&index).unwrap_or(&empty);
            let report = upload_documents(
                self.documents.as_ref(),
                proposal_id,
                DocumentOwner::Dependent { index },
                files,
            );
            for failure in &report.failures {
                warnings.push(format!(
                    "Documento {} do dependente {} não foi salvo: {}",
                    failure.kind.display_label(),
                    index + 1,
                    failure.error
                ));
            }
            record.documents = report.uploaded;
            records.push(record);
        }
        Ok(records)
    }

    fn insert_dependents(&self, dependents: Vec<DependentRecord>) -> Result<(), ProposalServiceError> {
        if dependents.is_empty() {
            return Ok(());
        }
        self.repository.insert_dependents(dependents).map_err(|err| {
            if err.is_constraint(CPF_CONSTRAINT) {
                ValidationError::invalid_cpf("dependents").into()
            } else {
                err.into()
            }
        })
    }

    /// Stores one response per answered person. People without a stored dependent row
    /// and respondents listed in `already_saved` are skipped.
    fn save_questionnaires(
        &self,
        proposal_id: &ProposalId,
        dependent_ids: &[DependentId],
        flow: &QuestionnaireFlow,
        now: DateTime<Utc>,
        already_saved: &[Respondent],
    ) -> Result<(), ProposalServiceError> {
        for person in 0..flow.respondents() {
            let Some(answers) = flow.recorded_answers(person) else {
                continue;
            };
            let respondent = if person == 0 {
                Respondent::Holder
            } else {
                match dependent_ids.get(person - 1) {
                    Some(id) => Respondent::Dependent {
                        dependent_id: id.clone(),
                    },
                    None => continue,
                }
            };
            if already_saved.contains(&respondent) {
                continue;
            }
            self.repository.save_questionnaire(QuestionnaireResponse {
                proposal_id: proposal_id.clone(),
                respondent,
                answers,
                created_at: now,
            })?;
        }
        Ok(())
    }

    fn upload_holder_documents(
        &self,
        record: &mut ProposalRecord,
        wizard: &Wizard,
        warnings: &mut Vec<String>,
    ) {
        let report = upload_documents(
            self.documents.as_ref(),
            &record.id,
            DocumentOwner::Holder,
            &wizard.documents().holder,
        );
        for failure in &report.failures {
            warnings.push(format!(
                "Documento {} não foi salvo: {}",
                failure.kind.display_label(),
                failure.error
            ));
        }
        record.documents.merge(report.uploaded);
    }

    /// Persists a draft proposal (status `rascunho`) with its dependents, questionnaire
    /// and documents so the preview step can render it.
    ///
    /// Dependent and document failures are logged and skipped; submission stores whatever
    /// is still missing. A questionnaire failure blocks advancement, but the created record
    /// is remembered on the wizard.
    pub fn persist_draft(&self, wizard: &mut Wizard) -> Result<ProposalId, ProposalServiceError> {
        let now = Utc::now();
        let proposal_id = ProposalId::generate();
        let mut record = validation::proposal_from_draft(
            wizard.draft(),
            RecordSeed {
                id: proposal_id.clone(),
                origin: wizard.origin(),
                status: ProposalStatus::Rascunho,
                signature: None,
                now,
            },
        )?;
        record = self.insert_proposal(record)?;
        wizard.remember_proposal(proposal_id.clone());
        tracing::info!(proposal_id = %proposal_id, "draft proposal created");

        let mut warnings = Vec::new();
        let dependents = self.build_dependents(&proposal_id, wizard, &mut warnings)?;
        let mut dependent_ids: Vec<DependentId> = dependents.iter().map(|d| d.id.clone()).collect();
        if let Err(err) = self.insert_dependents(dependents) {
            tracing::warn!(proposal_id = %proposal_id, error = %err, "saving dependents failed, continuing");
            dependent_ids.clear();
        }

        self.save_questionnaires(&proposal_id, &dependent_ids, wizard.questionnaire(), now, &[])?;

        self.upload_holder_documents(&mut record, wizard, &mut warnings);
        if !record.documents.is_empty() {
            if let Err(err) = self.repository.update(record) {
                tracing::warn!(proposal_id = %proposal_id, error = %err, "storing document urls failed");
            }
        }
        for warning in warnings {
            tracing::warn!(proposal_id = %proposal_id, "{warning}");
        }

        Ok(proposal_id)
    }

    /// Final submission from the confirmation step.
    ///
    /// Updates the draft when one exists, otherwise creates the proposal. Either way the
    /// result is a `pendente` proposal with the signature attached.
    pub async fn submit(
        &self,
        session_id: &SessionId,
        context: SubmissionContext,
    ) -> Result<SubmissionReceipt, ProposalServiceError> {
        let templates = self.repository.active_templates()?;
        let (record, warnings) = {
            let mut sessions = self.sessions.lock().expect("session mutex poisoned");
            let wizard = sessions
                .get_mut(session_id)
                .ok_or_else(|| ProposalServiceError::SessionNotFound(session_id.0.clone()))?;
            if !wizard.ready_to_submit() {
                return Err(ProposalServiceError::NotReadyToSubmit {
                    step: wizard.step().number(),
                });
            }
            validation::validate_for_submission(
                wizard.draft(),
                wizard.broker().is_some(),
                &templates,
                &wizard.documents().holder_kinds(),
                wizard.questionnaire().is_complete(),
            )?;

            let now = Utc::now();
            let signature = SignatureArtifact {
                image: wizard.draft().signature.clone(),
                signed_at: now,
                ip: context.ip.clone(),
                user_agent: context.user_agent.clone(),
            };
            let outcome = match wizard.proposal_id().cloned() {
                Some(proposal_id) => self.finalize_draft(wizard, &proposal_id, signature, now)?,
                None => self.create_submitted(wizard, signature, now)?,
            };
            sessions.remove(session_id);
            outcome
        };

        tracing::info!(
            proposal_id = %record.id,
            warnings = warnings.len(),
            "proposal submitted"
        );

        let broker_notification = self
            .notify_broker(&record.origin, |to, broker_name| {
                EmailPayload::proposal_signed(
                    to,
                    broker_name,
                    record.display_name(),
                    &record.id,
                    record.total_value_cents,
                    Utc::now(),
                )
            })
            .await;

        Ok(SubmissionReceipt {
            redirect_to: format!("/proposta-digital/sucesso?id={}", record.id),
            total_value: record.total_value_label(),
            proposal_id: record.id,
            status: record.status,
            warnings,
            broker_notification,
        })
    }

    fn finalize_draft(
        &self,
        wizard: &Wizard,
        proposal_id: &ProposalId,
        signature: SignatureArtifact,
        now: DateTime<Utc>,
    ) -> Result<(ProposalRecord, Vec<String>), ProposalServiceError> {
        let mut record = self
            .repository
            .fetch(proposal_id)?
            .ok_or_else(|| ProposalServiceError::ProposalNotFound(proposal_id.clone()))?;
        let mut warnings = Vec::new();

        record.status = ProposalStatus::Pendente;
        record.signature = Some(signature);
        record.total_value_cents = wizard.total_value_cents();
        record.touch(now);

        let mut dependents = self.repository.dependents(proposal_id)?;
        if dependents.is_empty() && !wizard.draft().active_dependents().is_empty() {
            let missing = self.build_dependents(proposal_id, wizard, &mut warnings)?;
            self.insert_dependents(missing.clone())?;
            tracing::info!(proposal_id = %proposal_id, count = missing.len(), "dependents stored at submission");
            dependents = missing;
        }
        let dependent_ids: Vec<DependentId> =
            dependents.into_iter().map(|dependent| dependent.id).collect();

        let already_saved: Vec<Respondent> = match self.repository.questionnaires(proposal_id) {
            Ok(responses) => responses.into_iter().map(|response| response.respondent).collect(),
            Err(err) => {
                tracing::warn!(proposal_id = %proposal_id, error = %err, "reading saved questionnaires failed");
                Vec::new()
            }
        };
        if let Err(err) = self.save_questionnaires(
            proposal_id,
            &dependent_ids,
            wizard.questionnaire(),
            now,
            &already_saved,
        ) {
            warnings.push(format!("Questionário de saúde não foi salvo: {err}"));
        }

        if record.documents.is_empty() {
            self.upload_holder_documents(&mut record, wizard, &mut warnings);
        }

        self.repository.update(record.clone())?;
        Ok((record, warnings))
    }

    fn create_submitted(
        &self,
        wizard: &mut Wizard,
        signature: SignatureArtifact,
        now: DateTime<Utc>,
    ) -> Result<(ProposalRecord, Vec<String>), ProposalServiceError> {
        let proposal_id = ProposalId::generate();
        let record = validation::proposal_from_draft(
            wizard.draft(),
            RecordSeed {
                id: proposal_id.clone(),
                origin: wizard.origin(),
                status: ProposalStatus::Pendente,
                signature: Some(signature),
                now,
            },
        )?;
        let mut record = self.insert_proposal(record)?;
        wizard.remember_proposal(proposal_id.clone());
        let mut warnings = Vec::new();

        let dependents = self.build_dependents(&proposal_id, wizard, &mut warnings)?;
        let dependent_ids: Vec<DependentId> = dependents.iter().map(|d| d.id.clone()).collect();
        self.insert_dependents(dependents)?;

        if let Err(err) =
            self.save_questionnaires(&proposal_id, &dependent_ids, wizard.questionnaire(), now, &[])
        {
            warnings.push(format!("Questionário de saúde não foi salvo: {err}"));
        }

        self.upload_holder_documents(&mut record, wizard, &mut warnings);
        if !record.documents.is_empty() {
            if let Err(err) = self.repository.update(record.clone()) {
                warnings.push(format!("Documentos não foram vinculados à proposta: {err}"));
            }
        }

        Ok((record, warnings))
    }

    async fn notify_broker<F>(&self, origin: &ProposalOrigin, build: F) -> NotificationOutcome
    where
        F: FnOnce(&str, &str) -> EmailPayload + Send,
    {
        let Some(contact) = origin.broker() else {
            return NotificationOutcome::NotRequired;
        };
        let Some(email) = contact.email.as_deref().filter(|email| !email.trim().is_empty())
        else {
            return NotificationOutcome::NotRequired;
        };
        let broker_name = Some(contact.name.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or("Corretor");

        let payload = build(email, broker_name);
        match self.mailer.deliver(&payload).await {
            Ok(Delivery::Sent { .. }) => NotificationOutcome::Sent,
            Ok(Delivery::Simulated) => NotificationOutcome::Simulated,
            Err(err) => {
                tracing::warn!(tipo = ?payload.tipo, error = %err, "broker notification failed");
                NotificationOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn load(&self, proposal_id: &ProposalId) -> Result<ProposalRecord, ProposalServiceError> {
        self.repository
            .fetch(proposal_id)?
            .ok_or_else(|| ProposalServiceError::ProposalNotFound(proposal_id.clone()))
    }

    pub fn completion_view(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<CompletionView, ProposalServiceError> {
        let record = self.load(proposal_id)?;
        let dependents = self.repository.dependents(proposal_id)?;

        Ok(CompletionView {
            proposal_id: record.id.clone(),
            client_name: record.display_name().to_string(),
            status: record.status,
            status_label: record.status.display_label(),
            plan_code: record.plan.plan_code.clone(),
            template_title: record.plan.template_title.clone(),
            total_value: record.total_value_label(),
            dependents: dependents
                .iter()
                .map(|dependent| CompletionDependent {
                    name: dependent.name.clone(),
                    relationship: dependent.relationship.display_label(),
                })
                .collect(),
            questions: &HEALTH_QUESTIONS,
            already_completed: record.status == ProposalStatus::Finalizada,
        })
    }

    /// Client-side completion: saves every person's answers, marks the questionnaire
    /// complete and finalizes the proposal with a signature.
    ///
    /// Only proposals still waiting on the client (`parcial`, `aguardando_cliente`) accept it.
    pub async fn complete(
        &self,
        proposal_id: &ProposalId,
        request: CompletionRequest,
        context: SubmissionContext,
    ) -> Result<CompletionReceipt, ProposalServiceError> {
        let mut record = self.load(proposal_id)?;
        if !record.status.awaits_client() {
            return Err(ProposalServiceError::InvalidTransition {
                from: record.status,
                to: ProposalStatus::Finalizada,
            });
        }

        let dependents = self.repository.dependents(proposal_id)?;
        let flow = QuestionnaireFlow::from_answers(1 + dependents.len(), request.answers)?;
        let now = Utc::now();
        let dependent_ids: Vec<DependentId> = dependents.into_iter().map(|d| d.id).collect();
        self.save_questionnaires(proposal_id, &dependent_ids, &flow, now, &[])?;

        let image = request
            .signature
            .filter(|image| !image.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "Assinatura digital realizada em {}",
                    now.format("%d/%m/%Y %H:%M")
                )
            });
        record.status = ProposalStatus::Finalizada;
        record.questionnaire_complete = true;
        record.signature = Some(SignatureArtifact {
            image,
            signed_at: now,
            ip: context.ip,
            user_agent: context.user_agent,
        });
        record.touch(now);
        self.repository.update(record.clone())?;
        tracing::info!(proposal_id = %proposal_id, "proposal completed by client");

        let broker_notification = self
            .notify_broker(&record.origin, |to, broker_name| {
                EmailPayload::proposal_completed(
                    to,
                    broker_name,
                    record.display_name(),
                    &record.id,
                    now,
                )
            })
            .await;

        Ok(CompletionReceipt {
            proposal_id: record.id,
            status: record.status,
            broker_notification,
        })
    }

    fn filtered(&self, query: &ListQuery) -> Result<(AdminListState, Vec<ProposalRecord>), ProposalServiceError> {
        let filter = ProposalFilter::from_query(query)?;
        let records = self.repository.list()?;

        let mut state = AdminListState::new(self.config.admin_page_size);
        state.set_text(filter.text);
        state.set_status(filter.status);
        state.set_origin(filter.origin);
        state.set_page(query.page.unwrap_or(1));
        Ok((state, records))
    }

    pub fn list(&self, query: &ListQuery) -> Result<AdminListing, ProposalServiceError> {
        let (state, records) = self.filtered(query)?;
        Ok(AdminListing {
            page: state.apply(&records),
            stats: ProposalStats::compute(&records),
        })
    }

    pub fn detail(&self, proposal_id: &ProposalId) -> Result<ProposalDetail, ProposalServiceError> {
        let record = self.load(proposal_id)?;
        let dependents = self.repository.dependents(proposal_id)?;
        let questionnaires = self.repository.questionnaires(proposal_id)?;
        Ok(ProposalDetail::assemble(record, dependents, questionnaires))
    }

    /// Only signed proposals awaiting review can be approved or rejected.
    fn ensure_decidable(record: &ProposalRecord, to: ProposalStatus) -> Result<(), ProposalServiceError> {
        if record.status != ProposalStatus::Pendente {
            return Err(ProposalServiceError::InvalidTransition {
                from: record.status,
                to,
            });
        }
        Ok(())
    }

    pub async fn approve(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<DecisionOutcome, ProposalServiceError> {
        let mut record = self.load(proposal_id)?;
        Self::ensure_decidable(&record, ProposalStatus::Aprovada)?;

        let now = Utc::now();
        record.status = ProposalStatus::Aprovada;
        record.rejection_reason = None;
        record.touch(now);
        self.repository.update(record.clone())?;
        tracing::info!(proposal_id = %proposal_id, "proposal approved");

        let broker_notification = self
            .notify_broker(&record.origin, |to, broker_name| {
                EmailPayload::proposal_approved(
                    to,
                    broker_name,
                    record.display_name(),
                    &record.id,
                    record.total_value_cents,
                    record.commission_cents,
                    now,
                )
            })
            .await;

        Ok(DecisionOutcome {
            proposal_id: record.id,
            status: record.status,
            broker_notification,
        })
    }

    pub async fn reject(
        &self,
        proposal_id: &ProposalId,
        reason: &str,
    ) -> Result<DecisionOutcome, ProposalServiceError> {
        let reason = RejectionReason::parse(reason)?;
        let mut record = self.load(proposal_id)?;
        Self::ensure_decidable(&record, ProposalStatus::Rejeitada)?;

        let now = Utc::now();
        record.status = ProposalStatus::Rejeitada;
        record.rejection_reason = Some(reason.as_str().to_string());
        record.touch(now);
        self.repository.update(record.clone())?;
        tracing::info!(proposal_id = %proposal_id, "proposal rejected");

        let broker_notification = self
            .notify_broker(&record.origin, |to, broker_name| {
                EmailPayload::proposal_rejected(
                    to,
                    broker_name,
                    record.display_name(),
                    &record.id,
                    reason.as_str(),
                    now,
                )
            })
            .await;

        Ok(DecisionOutcome {
            proposal_id: record.id,
            status: record.status,
            broker_notification,
        })
    }

    /// Emails the client a link to the completion page and, on success, records that
    /// the email was sent. Only `parcial` proposals are offered the link.
    pub async fn send_validation_email(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<ValidationEmailOutcome, ProposalServiceError> {
        let record = self.load(proposal_id)?;
        if record.status != ProposalStatus::Parcial {
            return Err(ProposalServiceError::InvalidTransition {
                from: record.status,
                to: ProposalStatus::AguardandoCliente,
            });
        }
        let email = record
            .client_email()
            .filter(|email| validation::is_valid_email(email))
            .ok_or_else(|| ValidationError::single("email", "Proposta sem email válido"))?
            .to_string();

        let link = validation_link(&self.config.public_base_url, proposal_id);
        let payload = EmailPayload::client_invitation(
            &email,
            record.display_name(),
            link.clone(),
            None,
            Utc::now(),
        );
        let delivery = self.mailer.deliver(&payload).await?;

        let flag_updated = match self.load(proposal_id) {
            Ok(mut current) => {
                let now = Utc::now();
                current.email_validation_sent = true;
                current.email_sent_at = Some(now);
                current.touch(now);
                match self.repository.update(current) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(proposal_id = %proposal_id, error = %err, "email sent but flag not stored");
                        false
                    }
                }
            }
            Err(err) => {
                tracing::warn!(proposal_id = %proposal_id, error = %err, "email sent but flag not stored");
                false
            }
        };

        Ok(ValidationEmailOutcome {
            proposal_id: proposal_id.clone(),
            link,
            delivery,
            flag_updated,
        })
    }

    pub fn export_pdf(&self, proposal_id: &ProposalId) -> Result<ExportArtifact, ProposalServiceError> {
        let detail = self.detail(proposal_id)?;
        Ok(export::render_pdf(&detail, self.documents.as_ref(), Utc::now())?)
    }

    /// ZIP of every stored document plus the proposal PDF once it has been signed.
    pub fn export_zip(&self, proposal_id: &ProposalId) -> Result<ExportArtifact, ProposalServiceError> {
        let detail = self.detail(proposal_id)?;
        let pdf = if detail.proposal.signature.is_some() {
            match export::render_pdf(&detail, self.documents.as_ref(), Utc::now()) {
                Ok(pdf) => Some(pdf),
                Err(err) => {
                    tracing::warn!(proposal_id = %proposal_id, error = %err, "pdf left out of zip");
                    None
                }
            }
        } else {
            None
        };
        Ok(export::render_zip(&detail, self.documents.as_ref(), pdf.as_ref())?)
    }

    /// CSV of every proposal matching the filters, ignoring pagination.
    pub fn export_csv(&self, query: &ListQuery) -> Result<ExportArtifact, ProposalServiceError> {
        let (state, records) = self.filtered(query)?;
        let rows: Vec<ProposalSummary> = records
            .iter()
            .filter(|record| state.filter().matches(record))
            .map(ProposalSummary::from_record)
            .collect();
        Ok(export::render_csv(&rows, Utc::now())?)
    }

    pub async fn email_status(&self) -> EmailServiceStatus {
        notifications::probe(self.mailer.as_ref(), self.environment, Utc::now()).await
    }
}

/// Error raised by the proposal service.
#[derive(Debug, thiserror::Error)]
pub enum ProposalServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Email(#[from] EmailError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Questionnaire(#[from] FlowError),
    #[error("wizard session {0} not found")]
    SessionNotFound(String),
    #[error("proposal {0} not found")]
    ProposalNotFound(ProposalId),
    #[error("cannot move proposal from {} to {}", .from.label(), .to.label())]
    InvalidTransition {
        from: ProposalStatus,
        to: ProposalStatus,
    },
    #[error("submission is only allowed from the confirmation step (current step {step})")]
    NotReadyToSubmit { step: u8 },
}
