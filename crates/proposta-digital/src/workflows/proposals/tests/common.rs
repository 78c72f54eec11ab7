use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::IntakeConfig;
use crate::workflows::proposals::documents::{
    DocumentOwner, DocumentStore, StorageError, StoredDocument, UploadedFile,
};
use crate::workflows::proposals::domain::{
    BrokerContact, DependentRecord, DocumentKind, ProposalId, ProposalOrigin, ProposalRecord,
    ProposalStatus, Template, TemplateId,
};
use crate::workflows::proposals::draft::{
    AddressDraft, DependentDraft, HolderDraft, ProposalDraft,
};
use crate::workflows::proposals::notifications::{Delivery, EmailError, EmailPayload, Mailer};
use crate::workflows::proposals::questionnaire::{Answer, QuestionnaireResponse, HEALTH_QUESTIONS};
use crate::workflows::proposals::repository::{
    ProposalRepository, RepositoryError, CPF_CONSTRAINT,
};
use crate::workflows::proposals::service::{ProposalService, SessionId};
use crate::workflows::proposals::validation::{self, cpf, RecordSeed};
use crate::workflows::proposals::proposal_router;

pub(super) const HOLDER_CPF: &str = "111.444.777-35";
pub(super) const DEPENDENT_CPF: &str = "529.982.247-25";

pub(super) fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn templates() -> Vec<Template> {
    vec![
        Template {
            id: TemplateId("tpl-amil".to_string()),
            title: "Amil Fácil".to_string(),
            active: true,
            description: Some("Coparticipação".to_string()),
        },
        Template {
            id: TemplateId("tpl-antigo".to_string()),
            title: "Tabela 2023".to_string(),
            active: false,
            description: None,
        },
    ]
}

pub(super) fn broker() -> BrokerContact {
    BrokerContact {
        id: Some("cor-1".to_string()),
        name: "Ana Corretora".to_string(),
        email: Some("ana@corretora.com.br".to_string()),
    }
}

pub(super) fn holder_draft() -> HolderDraft {
    HolderDraft {
        name: "Maria Souza".to_string(),
        cpf: HOLDER_CPF.to_string(),
        rg: "12.345.678-9".to_string(),
        birth_date: "1990-06-15".to_string(),
        email: "maria@example.com".to_string(),
        phone: "(11) 98765-4321".to_string(),
        ..HolderDraft::default()
    }
}

pub(super) fn dependent_draft() -> DependentDraft {
    DependentDraft {
        name: "João Souza".to_string(),
        cpf: DEPENDENT_CPF.to_string(),
        rg: "98.765.432-1".to_string(),
        birth_date: "15/03/2015".to_string(),
        relationship: "filho".to_string(),
        individual_value: Some("150,00".to_string()),
        ..DependentDraft::default()
    }
}

pub(super) fn valid_draft() -> ProposalDraft {
    ProposalDraft {
        broker_name: "Carlos Corretor".to_string(),
        template_id: "tpl-amil".to_string(),
        plan_code: "AMIL-400".to_string(),
        value: "459,90".to_string(),
        holder: holder_draft(),
        address: AddressDraft {
            cep: "01310-100".to_string(),
            street: "Avenida Paulista".to_string(),
            number: "1000".to_string(),
            complement: Some("Apto 12".to_string()),
            neighborhood: "Bela Vista".to_string(),
            city: "São Paulo".to_string(),
            state: "SP".to_string(),
        },
        weight: "68".to_string(),
        height: "1,65".to_string(),
        signature: "data:image/png;base64,iVBORw0KGgo=".to_string(),
        ..ProposalDraft::default()
    }
}

pub(super) fn draft_with_dependent() -> ProposalDraft {
    let mut draft = valid_draft();
    draft.has_dependents = true;
    draft.dependents = vec![dependent_draft()];
    draft
}

pub(super) fn file(name: &str) -> UploadedFile {
    UploadedFile {
        file_name: name.to_string(),
        content_type: "application/pdf".to_string(),
        bytes: format!("%PDF-1.4 {name}").into_bytes(),
    }
}

pub(super) fn mandatory_files() -> BTreeMap<DocumentKind, UploadedFile> {
    DocumentKind::MANDATORY
        .into_iter()
        .map(|kind| (kind, file(&format!("{}.pdf", kind.label()))))
        .collect()
}

pub(super) fn intake_config() -> IntakeConfig {
    IntakeConfig {
        public_base_url: "https://contratandoplanos.com.br/".to_string(),
        admin_page_size: 2,
    }
}

pub(super) type TestService = ProposalService<MemoryRepository, MemoryDocumentStore, RecordingMailer>;

pub(super) fn build_service() -> (
    TestService,
    Arc<MemoryRepository>,
    Arc<MemoryDocumentStore>,
    Arc<RecordingMailer>,
) {
    let repository = Arc::new(MemoryRepository::with_templates(templates()));
    let documents = Arc::new(MemoryDocumentStore::default());
    let mailer = Arc::new(RecordingMailer::default());
    let service = ProposalService::new(
        repository.clone(),
        documents.clone(),
        mailer.clone(),
        intake_config(),
    );
    (service, repository, documents, mailer)
}

/// Builds a persisted record directly, bypassing the wizard.
pub(super) fn stored_record(
    id: &str,
    name: &str,
    status: ProposalStatus,
    origin: ProposalOrigin,
    created_at: DateTime<Utc>,
) -> ProposalRecord {
    let mut draft = valid_draft();
    draft.holder.name = name.to_string();
    draft.holder.email = format!(
        "{}@example.com",
        name.split_whitespace().next().unwrap_or("cliente").to_lowercase()
    );
    validation::proposal_from_draft(
        &draft,
        RecordSeed {
            id: ProposalId(id.to_string()),
            origin,
            status,
            signature: None,
            now: created_at,
        },
    )
    .expect("fixture draft is valid")
}

pub(super) fn direct() -> ProposalOrigin {
    ProposalOrigin::Direct { broker_name: None }
}

pub(super) fn via_broker() -> ProposalOrigin {
    ProposalOrigin::Broker(broker())
}

/// Answers every remaining question with "Não" and moves to the summary.
pub(super) fn answer_all_no(service: &TestService, session: &SessionId, respondents: usize) {
    for _ in 0..respondents * HEALTH_QUESTIONS.len() {
        service
            .answer_question(session, Answer::Nao, None)
            .expect("answer accepted");
        service.next_question(session).expect("cursor moves");
    }
}

/// Drives a fresh session through every step up to the confirmation screen.
pub(super) fn walk_to_confirmation(
    service: &TestService,
    session: &SessionId,
    draft: ProposalDraft,
) {
    let respondents = draft.respondent_count();
    let dependents = draft.active_dependents().len();
    service.update_draft(session, draft).expect("draft stored");
    for _ in 0..3 {
        service.advance(session).expect("early steps pass");
    }
    for (kind, file) in mandatory_files() {
        service
            .attach_document(session, DocumentOwner::Holder, kind, file)
            .expect("holder document attached");
    }
    for index in 0..dependents {
        service
            .attach_document(
                session,
                DocumentOwner::Dependent { index },
                DocumentKind::RgFrente,
                file("dependente_rg.pdf"),
            )
            .expect("dependent document attached");
    }
    service.advance(session).expect("documents step passes");
    answer_all_no(service, session, respondents);
    for _ in 0..3 {
        service.advance(session).expect("late steps pass");
    }
}

#[derive(Default)]
pub(super) struct MemoryRepository {
    proposals: Mutex<HashMap<ProposalId, ProposalRecord>>,
    dependents: Mutex<Vec<DependentRecord>>,
    questionnaires: Mutex<Vec<QuestionnaireResponse>>,
    templates: Vec<Template>,
    pub(super) fail_questionnaires: AtomicBool,
    pub(super) fail_dependents_once: AtomicBool,
}

impl MemoryRepository {
    pub(super) fn with_templates(templates: Vec<Template>) -> Self {
        Self {
            templates,
            ..Self::default()
        }
    }

    pub(super) fn seed(&self, record: ProposalRecord) {
        self.proposals
            .lock()
            .expect("repository mutex poisoned")
            .insert(record.id.clone(), record);
    }

    pub(super) fn seed_dependent(&self, dependent: DependentRecord) {
        self.dependents
            .lock()
            .expect("repository mutex poisoned")
            .push(dependent);
    }

    pub(super) fn proposal_count(&self) -> usize {
        self.proposals.lock().expect("repository mutex poisoned").len()
    }

    pub(super) fn stored(&self, id: &ProposalId) -> ProposalRecord {
        self.proposals
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned()
            .expect("proposal stored")
    }

    pub(super) fn only_proposal(&self) -> ProposalRecord {
        let guard = self.proposals.lock().expect("repository mutex poisoned");
        assert_eq!(guard.len(), 1, "expected exactly one proposal");
        guard.values().next().cloned().expect("one proposal")
    }
}

impl ProposalRepository for MemoryRepository {
    fn insert(&self, record: ProposalRecord) -> Result<ProposalRecord, RepositoryError> {
        if !cpf::is_valid(&record.holder.cpf) {
            return Err(RepositoryError::Constraint {
                name: CPF_CONSTRAINT.to_string(),
            });
        }
        let mut guard = self.proposals.lock().expect("repository mutex poisoned");
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update(&self, record: ProposalRecord) -> Result<(), RepositoryError> {
        let mut guard = self.proposals.lock().expect("repository mutex poisoned");
        if !guard.contains_key(&record.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(record.id.clone(), record);
        Ok(())
    }

    fn fetch(&self, id: &ProposalId) -> Result<Option<ProposalRecord>, RepositoryError> {
        let guard = self.proposals.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<ProposalRecord>, RepositoryError> {
        let guard = self.proposals.lock().expect("repository mutex poisoned");
        let mut records: Vec<ProposalRecord> = guard.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(records)
    }

    fn insert_dependents(&self, dependents: Vec<DependentRecord>) -> Result<(), RepositoryError> {
        if self.fail_dependents_once.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("dependentes table offline".to_string()));
        }
        if dependents.iter().any(|dependent| !cpf::is_valid(&dependent.cpf)) {
            return Err(RepositoryError::Constraint {
                name: CPF_CONSTRAINT.to_string(),
            });
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
        if self.fail_questionnaires.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("questionnaire table offline".to_string()));
        }
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

#[derive(Default)]
pub(super) struct MemoryDocumentStore {
    objects: Mutex<HashMap<String, StoredDocument>>,
    rejected: Mutex<Option<DocumentKind>>,
}

impl MemoryDocumentStore {
    pub(super) fn reject(&self, kind: DocumentKind) {
        *self.rejected.lock().expect("store mutex poisoned") = Some(kind);
    }

    pub(super) fn object_count(&self) -> usize {
        self.objects.lock().expect("store mutex poisoned").len()
    }

    pub(super) fn forget(&self, url: &str) {
        self.objects.lock().expect("store mutex poisoned").remove(url);
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn put(
        &self,
        proposal_id: &ProposalId,
        owner: DocumentOwner,
        kind: DocumentKind,
        file: &UploadedFile,
    ) -> Result<String, StorageError> {
        if *self.rejected.lock().expect("store mutex poisoned") == Some(kind) {
            return Err(StorageError::Rejected {
                kind: kind.label(),
                reason: "bucket quota exceeded".to_string(),
            });
        }
        let url = format!(
            "memory://{}/{}/{}",
            proposal_id,
            owner.path_segment(),
            kind.label()
        );
        self.objects.lock().expect("store mutex poisoned").insert(
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
            .expect("store mutex poisoned")
            .get(url)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(url.to_string()))
    }
}

#[derive(Default)]
pub(super) struct RecordingMailer {
    sent: Mutex<Vec<EmailPayload>>,
}

impl RecordingMailer {
    pub(super) fn sent(&self) -> Vec<EmailPayload> {
        self.sent.lock().expect("mailer mutex poisoned").clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, payload: &EmailPayload) -> Result<Delivery, EmailError> {
        payload.validate()?;
        self.sent
            .lock()
            .expect("mailer mutex poisoned")
            .push(payload.clone());
        Ok(Delivery::Sent { status: 200 })
    }

    fn is_simulated(&self) -> bool {
        false
    }
}

pub(super) struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn deliver(&self, _payload: &EmailPayload) -> Result<Delivery, EmailError> {
        Err(EmailError::Rejected {
            status: 500,
            body: "function crashed".to_string(),
        })
    }

    fn is_simulated(&self) -> bool {
        false
    }
}

pub(super) fn failing_mail_service(
) -> (ProposalService<MemoryRepository, MemoryDocumentStore, FailingMailer>, Arc<MemoryRepository>) {
    let repository = Arc::new(MemoryRepository::with_templates(templates()));
    let service = ProposalService::new(
        repository.clone(),
        Arc::new(MemoryDocumentStore::default()),
        Arc::new(FailingMailer),
        intake_config(),
    );
    (service, repository)
}

pub(super) fn router_with_service(service: TestService) -> axum::Router {
    proposal_router(Arc::new(service))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
