use std::sync::atomic::Ordering;

use super::common::*;

use crate::workflows::proposals::documents::DocumentOwner;
use crate::workflows::proposals::domain::{DocumentKind, ProposalId, ProposalStatus};
use crate::workflows::proposals::notifications::{Delivery, EmailKind};
use crate::workflows::proposals::questionnaire::{
    Answer, FlowError, QuestionAnswer, Respondent, HEALTH_QUESTIONS,
};
use crate::workflows::proposals::repository::ProposalRepository;
use crate::workflows::proposals::service::{
    CompletionRequest, NotificationOutcome, ProposalServiceError, SessionId, SubmissionContext,
};
use crate::workflows::proposals::draft::ProposalDraft;
use crate::workflows::proposals::wizard::{Wizard, WizardStep};

fn context() -> SubmissionContext {
    SubmissionContext {
        ip: Some("200.150.10.1".to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
    }
}

fn all_no() -> Vec<QuestionAnswer> {
    vec![
        QuestionAnswer {
            answer: Answer::Nao,
            details: String::new(),
        };
        HEALTH_QUESTIONS.len()
    ]
}

fn all_yes() -> Vec<QuestionAnswer> {
    vec![
        QuestionAnswer {
            answer: Answer::Sim,
            details: "Hipertensão controlada".to_string(),
        };
        HEALTH_QUESTIONS.len()
    ]
}

/// A signable wizard that never went through the draft step.
fn wizard_at_confirmation(draft: ProposalDraft) -> Wizard {
    let respondents = draft.respondent_count();
    let dependents = draft.active_dependents().len();
    let mut wizard = Wizard::new(None);
    wizard.update_draft(draft);
    for (kind, file) in mandatory_files() {
        wizard.attach_document(DocumentOwner::Holder, kind, file);
    }
    for index in 0..dependents {
        wizard.attach_document(
            DocumentOwner::Dependent { index },
            DocumentKind::RgFrente,
            file("dependente_rg.pdf"),
        );
    }
    for _ in 0..respondents * HEALTH_QUESTIONS.len() {
        wizard
            .questionnaire_mut()
            .answer(Answer::Nao, None)
            .expect("answer");
        wizard.questionnaire_mut().next().expect("next");
    }
    wizard.jump_to(WizardStep::Confirmation);
    wizard
}

#[test]
fn unknown_sessions_are_reported() {
    let (service, _, _, _) = build_service();
    match service.session(&SessionId("missing".to_string())) {
        Err(ProposalServiceError::SessionNotFound(id)) => assert_eq!(id, "missing"),
        other => panic!("expected missing session, got {other:?}"),
    }
}

#[test]
fn templates_lists_only_active_entries() {
    let (service, _, _, _) = build_service();
    let templates = service.templates().expect("templates");
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].title, "Amil Fácil");
}

#[test]
fn attach_document_checks_dependent_index_and_content() {
    let (service, _, _, _) = build_service();
    let session = service.open_session(None).session_id;
    service
        .update_draft(&session, draft_with_dependent())
        .expect("draft");

    match service.attach_document(
        &session,
        DocumentOwner::Dependent { index: 3 },
        DocumentKind::RgFrente,
        file("x.pdf"),
    ) {
        Err(ProposalServiceError::Validation(err)) => assert!(err.has_field("dependent")),
        other => panic!("expected validation error, got {other:?}"),
    }

    let mut empty = file("vazio.pdf");
    empty.bytes.clear();
    assert!(matches!(
        service.attach_document(&session, DocumentOwner::Holder, DocumentKind::Cpf, empty),
        Err(ProposalServiceError::Validation(_))
    ));

    let view = service
        .attach_document(
            &session,
            DocumentOwner::Dependent { index: 0 },
            DocumentKind::RgFrente,
            file("dep.pdf"),
        )
        .expect("attached");
    assert_eq!(
        view.wizard.documents.dependents.get(&0),
        Some(&vec![DocumentKind::RgFrente])
    );
}

#[test]
fn questionnaire_navigation_surfaces_flow_errors() {
    let (service, _, _, _) = build_service();
    let session = service.open_session(None).session_id;

    match service.next_question(&session) {
        Err(ProposalServiceError::Questionnaire(FlowError::Unanswered { .. })) => {}
        other => panic!("expected unanswered question, got {other:?}"),
    }

    service
        .answer_question(&session, Answer::Sim, Some("Asma".to_string()))
        .expect("answer");
    service.next_question(&session).expect("next");
    let view = service.previous_question(&session).expect("previous");
    assert_eq!(
        view.wizard
            .questionnaire
            .current_answer
            .map(|answer| answer.details),
        Some("Asma".to_string())
    );
}

#[test]
fn leaving_the_questionnaire_persists_a_draft_proposal() {
    let (service, repository, documents, _) = build_service();
    let session = service.open_session(None).session_id;
    service
        .update_draft(&session, draft_with_dependent())
        .expect("draft");
    for _ in 0..3 {
        service.advance(&session).expect("early steps");
    }
    for (kind, file) in mandatory_files() {
        service
            .attach_document(&session, DocumentOwner::Holder, kind, file)
            .expect("attached");
    }
    service.advance(&session).expect("documents");
    answer_all_no(&service, &session, 2);

    let view = service.advance(&session).expect("draft persisted");
    assert_eq!(view.wizard.step, WizardStep::Preview);
    let proposal_id = view.wizard.proposal_id.expect("draft id");

    let stored = repository.stored(&proposal_id);
    assert_eq!(stored.status, ProposalStatus::Rascunho);
    assert_eq!(stored.documents.len(), 4);
    assert_eq!(stored.total_value_cents, 60_990);
    assert_eq!(repository.dependents(&proposal_id).expect("dependents").len(), 1);
    assert_eq!(
        repository
            .questionnaires(&proposal_id)
            .expect("questionnaires")
            .len(),
        2
    );
    assert_eq!(documents.object_count(), 4);
}

#[test]
fn invalid_holder_cpf_blocks_the_draft_record() {
    let (service, repository, _, _) = build_service();
    let mut wizard = crate::workflows::proposals::wizard::Wizard::new(None);
    let mut draft = valid_draft();
    draft.holder.cpf = "111.444.777-36".to_string();
    wizard.update_draft(draft);

    match service.persist_draft(&mut wizard) {
        Err(ProposalServiceError::Validation(err)) => {
            assert!(err.has_field("holder.cpf"));
        }
        other => panic!("expected cpf validation error, got {other:?}"),
    }
    assert_eq!(repository.proposal_count(), 0);
    assert!(wizard.proposal_id().is_none());
}

#[test]
fn questionnaire_failure_keeps_the_created_record_on_the_wizard() {
    let (service, repository, _, _) = build_service();
    repository.fail_questionnaires.store(true, Ordering::SeqCst);
    let session = service.open_session(None).session_id;
    service.update_draft(&session, valid_draft()).expect("draft");
    for _ in 0..3 {
        service.advance(&session).expect("early steps");
    }
    for (kind, file) in mandatory_files() {
        service
            .attach_document(&session, DocumentOwner::Holder, kind, file)
            .expect("attached");
    }
    service.advance(&session).expect("documents");
    answer_all_no(&service, &session, 1);

    match service.advance(&session) {
        Err(ProposalServiceError::Repository(_)) => {}
        other => panic!("expected repository error, got {other:?}"),
    }
    let view = service.session(&session).expect("session");
    assert_eq!(view.wizard.step, WizardStep::HealthQuestionnaire);
    assert!(view.wizard.proposal_id.is_some());
    assert_eq!(repository.proposal_count(), 1);

    repository.fail_questionnaires.store(false, Ordering::SeqCst);
    let view = service.advance(&session).expect("retry moves on");
    assert_eq!(view.wizard.step, WizardStep::Preview);
    assert_eq!(repository.proposal_count(), 1);
}

#[tokio::test]
async fn submit_is_refused_before_the_confirmation_step() {
    let (service, _, _, _) = build_service();
    let session = service.open_session(None).session_id;

    match service.submit(&session, context()).await {
        Err(ProposalServiceError::NotReadyToSubmit { step: 1 }) => {}
        other => panic!("expected not ready, got {other:?}"),
    }
}

#[tokio::test]
async fn submit_finalizes_the_draft_and_closes_the_session() {
    let (service, repository, _, mailer) = build_service();
    let session = service.open_session(Some(broker())).session_id;
    walk_to_confirmation(&service, &session, valid_draft());

    let receipt = service.submit(&session, context()).await.expect("submitted");

    assert_eq!(receipt.status, ProposalStatus::Pendente);
    assert_eq!(receipt.total_value, "459,90");
    assert!(receipt.warnings.is_empty());
    assert_eq!(
        receipt.redirect_to,
        format!("/proposta-digital/sucesso?id={}", receipt.proposal_id)
    );
    assert_eq!(receipt.broker_notification, NotificationOutcome::Sent);

    let stored = repository.only_proposal();
    assert_eq!(stored.id, receipt.proposal_id);
    assert_eq!(stored.status, ProposalStatus::Pendente);
    let signature = stored.signature.expect("signature stored");
    assert_eq!(signature.ip.as_deref(), Some("200.150.10.1"));
    assert_eq!(signature.user_agent.as_deref(), Some("Mozilla/5.0"));

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].tipo, EmailKind::PropostaAssinada);
    assert_eq!(sent[0].to, "ana@corretora.com.br");
    assert_eq!(sent[0].valor, Some(459.9));

    assert!(matches!(
        service.session(&session),
        Err(ProposalServiceError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn direct_submission_sends_no_broker_email() {
    let (service, _, _, mailer) = build_service();
    let session = service.open_session(None).session_id;
    walk_to_confirmation(&service, &session, draft_with_dependent());

    let receipt = service.submit(&session, context()).await.expect("submitted");
    assert_eq!(receipt.broker_notification, NotificationOutcome::NotRequired);
    assert_eq!(receipt.total_value, "609,90");
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn broker_email_failure_does_not_fail_submission() {
    let (service, repository) = failing_mail_service();
    let session = service.open_session(Some(broker())).session_id;
    service.update_draft(&session, valid_draft()).expect("draft");
    for _ in 0..3 {
        service.advance(&session).expect("early steps");
    }
    for (kind, file) in mandatory_files() {
        service
            .attach_document(&session, DocumentOwner::Holder, kind, file)
            .expect("attached");
    }
    service.advance(&session).expect("documents");
    for _ in 0..HEALTH_QUESTIONS.len() {
        service
            .answer_question(&session, Answer::Nao, None)
            .expect("answer");
        service.next_question(&session).expect("next");
    }
    for _ in 0..3 {
        service.advance(&session).expect("late steps");
    }

    let receipt = service.submit(&session, context()).await.expect("submitted");
    assert!(matches!(
        receipt.broker_notification,
        NotificationOutcome::Failed { .. }
    ));
    assert_eq!(repository.only_proposal().status, ProposalStatus::Pendente);
}

#[test]
fn rejected_documents_are_skipped_on_the_draft() {
    let (service, repository, documents, _) = build_service();
    documents.reject(DocumentKind::ComprovanteResidencia);
    let mut wizard = crate::workflows::proposals::wizard::Wizard::new(None);
    wizard.update_draft(valid_draft());
    for (kind, file) in mandatory_files() {
        wizard.attach_document(DocumentOwner::Holder, kind, file);
    }

    let id = service.persist_draft(&mut wizard).expect("draft persisted");
    let stored = repository.stored(&id);
    assert_eq!(stored.documents.len(), 3);
    assert!(stored
        .documents
        .get(DocumentKind::ComprovanteResidencia)
        .is_none());
}

#[tokio::test]
async fn completion_finalizes_with_signature_metadata() {
    let (service, repository, _, mailer) = build_service();
    repository.seed(stored_record(
        "p-complete",
        "Maria Souza",
        ProposalStatus::Parcial,
        via_broker(),
        at(3, 10),
    ));
    let id = ProposalId("p-complete".to_string());

    let view = service.completion_view(&id).expect("view");
    assert_eq!(view.client_name, "Maria Souza");
    assert_eq!(view.questions.len(), HEALTH_QUESTIONS.len());
    assert!(!view.already_completed);

    let receipt = service
        .complete(
            &id,
            CompletionRequest {
                answers: vec![all_no()],
                signature: None,
            },
            context(),
        )
        .await
        .expect("completed");
    assert_eq!(receipt.status, ProposalStatus::Finalizada);
    assert_eq!(receipt.broker_notification, NotificationOutcome::Sent);

    let stored = repository.stored(&id);
    assert!(stored.questionnaire_complete);
    let signature = stored.signature.expect("signature");
    assert!(signature.image.starts_with("Assinatura digital realizada em "));
    assert_eq!(signature.ip.as_deref(), Some("200.150.10.1"));

    let responses = repository.questionnaires(&id).expect("questionnaires");
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].respondent, Respondent::Holder);
    assert_eq!(mailer.sent()[0].tipo, EmailKind::PropostaCompletada);

    assert!(service.completion_view(&id).expect("view").already_completed);
    match service
        .complete(
            &id,
            CompletionRequest {
                answers: vec![all_no()],
                signature: None,
            },
            context(),
        )
        .await
    {
        Err(ProposalServiceError::InvalidTransition { from, .. }) => {
            assert_eq!(from, ProposalStatus::Finalizada)
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[tokio::test]
async fn completion_requires_answers_for_every_person() {
    let (service, repository, _, _) = build_service();
    repository.seed(stored_record(
        "p-deps",
        "Maria Souza",
        ProposalStatus::Parcial,
        direct(),
        at(3, 10),
    ));
    let id = ProposalId("p-deps".to_string());
    let dependent = crate::workflows::proposals::validation::dependent_from_draft(
        &id,
        0,
        &dependent_draft(),
    )
    .expect("dependent");
    repository.seed_dependent(dependent);

    match service
        .complete(
            &id,
            CompletionRequest {
                answers: vec![all_no()],
                signature: Some("data:image/png;base64,AAAA".to_string()),
            },
            context(),
        )
        .await
    {
        Err(ProposalServiceError::Questionnaire(FlowError::RespondentMismatch {
            expected: 2,
            received: 1,
        })) => {}
        other => panic!("expected respondent mismatch, got {other:?}"),
    }
    assert_eq!(repository.stored(&id).status, ProposalStatus::Parcial);
}

#[tokio::test]
async fn approve_and_reject_guard_status_transitions() {
    let (service, repository, _, mailer) = build_service();
    repository.seed(stored_record(
        "p-ok",
        "Maria Souza",
        ProposalStatus::Pendente,
        via_broker(),
        at(1, 9),
    ));
    repository.seed(stored_record(
        "p-draft",
        "Rafael Lima",
        ProposalStatus::Rascunho,
        direct(),
        at(1, 10),
    ));
    let ok = ProposalId("p-ok".to_string());

    let outcome = service.approve(&ok).await.expect("approved");
    assert_eq!(outcome.status, ProposalStatus::Aprovada);
    assert_eq!(outcome.broker_notification, NotificationOutcome::Sent);
    assert_eq!(mailer.sent()[0].comissao, Some(0.0));

    match service.reject(&ok, "Documentação ilegível").await {
        Err(ProposalServiceError::InvalidTransition { from, to }) => {
            assert_eq!(from, ProposalStatus::Aprovada);
            assert_eq!(to, ProposalStatus::Rejeitada);
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }

    assert!(matches!(
        service.approve(&ProposalId("p-draft".to_string())).await,
        Err(ProposalServiceError::InvalidTransition { .. })
    ));
    assert!(matches!(
        service.approve(&ProposalId("p-none".to_string())).await,
        Err(ProposalServiceError::ProposalNotFound(_))
    ));
}

#[tokio::test]
async fn rejection_requires_a_reason_and_notifies_the_broker() {
    let (service, repository, _, mailer) = build_service();
    repository.seed(stored_record(
        "p-rej",
        "Maria Souza",
        ProposalStatus::Pendente,
        via_broker(),
        at(1, 9),
    ));
    let id = ProposalId("p-rej".to_string());

    match service.reject(&id, "   ").await {
        Err(ProposalServiceError::Validation(err)) => assert!(err.has_field("reason")),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(repository.stored(&id).status, ProposalStatus::Pendente);

    service
        .reject(&id, "  Carência não cumprida ")
        .await
        .expect("rejected");
    let stored = repository.stored(&id);
    assert_eq!(stored.status, ProposalStatus::Rejeitada);
    assert_eq!(stored.rejection_reason.as_deref(), Some("Carência não cumprida"));
    assert_eq!(mailer.sent()[0].motivo.as_deref(), Some("Carência não cumprida"));
}

#[tokio::test]
async fn validation_email_sets_the_sent_flag() {
    let (service, repository, _, mailer) = build_service();
    repository.seed(stored_record(
        "p-mail",
        "Maria Souza",
        ProposalStatus::Parcial,
        direct(),
        at(1, 9),
    ));
    let id = ProposalId("p-mail".to_string());

    let outcome = service.send_validation_email(&id).await.expect("sent");
    assert_eq!(
        outcome.link,
        "https://contratandoplanos.com.br/proposta-digital/completar/p-mail"
    );
    assert_eq!(outcome.delivery, Delivery::Sent { status: 200 });
    assert!(outcome.flag_updated);

    let stored = repository.stored(&id);
    assert!(stored.email_validation_sent);
    assert!(stored.email_sent_at.is_some());
    assert_eq!(stored.status, ProposalStatus::Parcial);

    let sent = mailer.sent();
    assert_eq!(sent[0].tipo, EmailKind::PropostaCliente);
    assert_eq!(sent[0].corretor.as_deref(), Some("Sistema ContratandoPlanos"));
}

#[tokio::test]
async fn validation_email_needs_a_valid_client_address() {
    let (service, repository, _, mailer) = build_service();
    let mut record = stored_record(
        "p-nomail",
        "Maria Souza",
        ProposalStatus::Parcial,
        direct(),
        at(1, 9),
    );
    record.holder.email = "maria-sem-dominio".to_string();
    repository.seed(record);

    match service
        .send_validation_email(&ProposalId("p-nomail".to_string()))
        .await
    {
        Err(ProposalServiceError::Validation(err)) => assert!(err.has_field("email")),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn validation_email_delivery_failure_leaves_the_flag_unset() {
    let (service, repository) = failing_mail_service();
    repository.seed(stored_record(
        "p-fail",
        "Maria Souza",
        ProposalStatus::Parcial,
        direct(),
        at(1, 9),
    ));
    let id = ProposalId("p-fail".to_string());

    match service.send_validation_email(&id).await {
        Err(ProposalServiceError::Email(_)) => {}
        other => panic!("expected email error, got {other:?}"),
    }
    assert!(!repository.stored(&id).email_validation_sent);
}

#[tokio::test]
async fn email_status_reports_live_function() {
    let (service, _, _, mailer) = build_service();
    let status = service.email_status().await;
    assert!(status.available);
    assert_eq!(status.environment, "development");
    assert_eq!(mailer.sent()[0].tipo, EmailKind::Teste);

    let (failing, _) = failing_mail_service();
    let status = failing.with_environment("production").email_status().await;
    assert!(!status.available);
    assert_eq!(status.environment, "production");
}

#[tokio::test]
async fn dependents_lost_on_the_draft_are_stored_at_submission() {
    let (service, repository, _, _) = build_service();
    repository.fail_dependents_once.store(true, Ordering::SeqCst);
    let session = service.open_session(None).session_id;
    walk_to_confirmation(&service, &session, draft_with_dependent());

    let draft_id = service
        .session(&session)
        .expect("session")
        .wizard
        .proposal_id
        .expect("draft id");
    assert!(repository.dependents(&draft_id).expect("dependents").is_empty());
    let responses = repository.questionnaires(&draft_id).expect("questionnaires");
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].respondent, Respondent::Holder);

    let receipt = service.submit(&session, context()).await.expect("submitted");
    assert_eq!(receipt.proposal_id, draft_id);
    assert!(receipt.warnings.is_empty());

    let stored = repository.stored(&draft_id);
    assert_eq!(stored.status, ProposalStatus::Pendente);
    assert!(stored.has_dependents);
    let dependents = repository.dependents(&draft_id).expect("dependents");
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0].documents.len(), 1);

    let responses = repository.questionnaires(&draft_id).expect("questionnaires");
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().any(|response| response.respondent
        == Respondent::Dependent {
            dependent_id: dependents[0].id.clone(),
        }));
}

#[tokio::test]
async fn submission_without_a_draft_creates_the_proposal() {
    let (service, repository, _, _) = build_service();
    let session = service.adopt_session(wizard_at_confirmation(draft_with_dependent()));

    let receipt = service.submit(&session, context()).await.expect("submitted");
    assert_eq!(receipt.status, ProposalStatus::Pendente);
    assert_eq!(receipt.total_value, "609,90");
    assert!(receipt.warnings.is_empty());

    let stored = repository.only_proposal();
    assert_eq!(stored.id, receipt.proposal_id);
    assert!(stored.signature.is_some());
    assert_eq!(stored.documents.len(), 4);
    assert_eq!(repository.dependents(&stored.id).expect("dependents").len(), 1);
    assert_eq!(
        repository.questionnaires(&stored.id).expect("questionnaires").len(),
        2
    );
}

#[tokio::test]
async fn failed_fresh_submission_is_retried_on_the_same_record() {
    let (service, repository, _, _) = build_service();
    repository.fail_dependents_once.store(true, Ordering::SeqCst);
    let session = service.adopt_session(wizard_at_confirmation(draft_with_dependent()));

    match service.submit(&session, context()).await {
        Err(ProposalServiceError::Repository(_)) => {}
        other => panic!("expected repository error, got {other:?}"),
    }
    let created = service
        .session(&session)
        .expect("session kept")
        .wizard
        .proposal_id
        .expect("record remembered");
    assert_eq!(repository.proposal_count(), 1);

    let receipt = service.submit(&session, context()).await.expect("retry submitted");
    assert_eq!(receipt.proposal_id, created);
    assert_eq!(repository.proposal_count(), 1);
    let stored = repository.stored(&created);
    assert_eq!(stored.status, ProposalStatus::Pendente);
    assert_eq!(stored.documents.len(), 4);
    assert_eq!(repository.dependents(&created).expect("dependents").len(), 1);
    assert_eq!(
        repository.questionnaires(&created).expect("questionnaires").len(),
        2
    );
}

#[tokio::test]
async fn completion_is_refused_once_the_wizard_was_signed() {
    let (service, repository, _, _) = build_service();
    let session = service.open_session(None).session_id;
    walk_to_confirmation(&service, &session, valid_draft());
    let receipt = service.submit(&session, context()).await.expect("submitted");
    let id = receipt.proposal_id;

    match service
        .complete(
            &id,
            CompletionRequest {
                answers: vec![all_yes()],
                signature: None,
            },
            context(),
        )
        .await
    {
        Err(ProposalServiceError::InvalidTransition { from, to }) => {
            assert_eq!(from, ProposalStatus::Pendente);
            assert_eq!(to, ProposalStatus::Finalizada);
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }

    assert_eq!(repository.questionnaires(&id).expect("questionnaires").len(), 1);
    let detail = service.detail(&id).expect("detail");
    let holder = detail.holder_questionnaire.expect("holder answers");
    assert_eq!(holder.positive_answers().count(), 0);
}

#[tokio::test]
async fn completion_accepts_proposals_waiting_on_the_client() {
    let (service, repository, _, _) = build_service();
    repository.seed(stored_record(
        "p-wait",
        "Maria Souza",
        ProposalStatus::AguardandoCliente,
        direct(),
        at(2, 9),
    ));
    let id = ProposalId("p-wait".to_string());

    let receipt = service
        .complete(
            &id,
            CompletionRequest {
                answers: vec![all_yes()],
                signature: None,
            },
            context(),
        )
        .await
        .expect("completed");
    assert_eq!(receipt.status, ProposalStatus::Finalizada);
    let detail = service.detail(&id).expect("detail");
    assert_eq!(
        detail
            .holder_questionnaire
            .expect("holder answers")
            .positive_answers()
            .count(),
        HEALTH_QUESTIONS.len()
    );
}

#[tokio::test]
async fn decisions_need_a_signed_pending_proposal() {
    let (service, repository, _, mailer) = build_service();
    for (id, status) in [
        ("p-parcial", ProposalStatus::Parcial),
        ("p-aguardando", ProposalStatus::AguardandoCliente),
        ("p-final", ProposalStatus::Finalizada),
    ] {
        repository.seed(stored_record(id, "Maria Souza", status, via_broker(), at(1, 9)));
        let id = ProposalId(id.to_string());

        match service.approve(&id).await {
            Err(ProposalServiceError::InvalidTransition { from, to }) => {
                assert_eq!(from, status);
                assert_eq!(to, ProposalStatus::Aprovada);
            }
            other => panic!("expected invalid transition, got {other:?}"),
        }
        assert!(matches!(
            service.reject(&id, "Proposta sem assinatura").await,
            Err(ProposalServiceError::InvalidTransition { .. })
        ));
        assert_eq!(repository.stored(&id).status, status);
    }
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn validation_email_is_only_offered_for_partial_proposals() {
    let (service, repository, _, mailer) = build_service();
    for (id, status) in [
        ("p-pendente", ProposalStatus::Pendente),
        ("p-aguardando", ProposalStatus::AguardandoCliente),
        ("p-aprovada", ProposalStatus::Aprovada),
        ("p-rejeitada", ProposalStatus::Rejeitada),
        ("p-finalizada", ProposalStatus::Finalizada),
    ] {
        repository.seed(stored_record(id, "Maria Souza", status, direct(), at(1, 9)));
        let id = ProposalId(id.to_string());

        match service.send_validation_email(&id).await {
            Err(ProposalServiceError::InvalidTransition { from, .. }) => assert_eq!(from, status),
            other => panic!("expected invalid transition, got {other:?}"),
        }
        assert!(!repository.stored(&id).email_validation_sent);
    }
    assert!(mailer.sent().is_empty());
}
