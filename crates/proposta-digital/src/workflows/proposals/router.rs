use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::admin::ListQuery;
use super::documents::{DocumentOwner, DocumentStore, UploadedFile};
use super::domain::{BrokerContact, DocumentKind, ProposalId};
use super::draft::ProposalDraft;
use super::export::{ExportArtifact, ExportError};
use super::notifications::Mailer;
use super::questionnaire::Answer;
use super::repository::{ProposalRepository, RepositoryError};
use super::service::{
    CompletionRequest, ProposalService, ProposalServiceError, SessionId, SubmissionContext,
};

type SharedService<R, D, M> = Arc<ProposalService<R, D, M>>;

/// Upload ceiling for a single document body.
pub const MAX_DOCUMENT_BYTES: usize = 20 * 1024 * 1024;

/// Router builder exposing the intake wizard, the completion page and the back office.
pub fn proposal_router<R, D, M>(service: SharedService<R, D, M>) -> Router
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    Router::new()
        .route("/api/v1/templates", get(templates_handler::<R, D, M>))
        .route("/api/v1/wizard/sessions", post(open_session_handler::<R, D, M>))
        .route(
            "/api/v1/wizard/sessions/:session_id",
            get(session_handler::<R, D, M>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/draft",
            put(draft_handler::<R, D, M>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/documents/:kind",
            put(document_handler::<R, D, M>).layer(DefaultBodyLimit::max(MAX_DOCUMENT_BYTES)),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/questionnaire/answer",
            post(answer_handler::<R, D, M>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/questionnaire/next",
            post(next_question_handler::<R, D, M>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/questionnaire/previous",
            post(previous_question_handler::<R, D, M>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/questionnaire/review",
            post(review_handler::<R, D, M>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/advance",
            post(advance_handler::<R, D, M>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/retreat",
            post(retreat_handler::<R, D, M>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/submit",
            post(submit_handler::<R, D, M>),
        )
        .route(
            "/api/v1/proposals/:proposal_id",
            get(completion_view_handler::<R, D, M>),
        )
        .route(
            "/api/v1/proposals/:proposal_id/complete",
            post(complete_handler::<R, D, M>),
        )
        .route("/api/v1/admin/proposals", get(list_handler::<R, D, M>))
        .route(
            "/api/v1/admin/proposals/export.csv",
            get(csv_handler::<R, D, M>),
        )
        .route(
            "/api/v1/admin/proposals/:proposal_id",
            get(detail_handler::<R, D, M>),
        )
        .route(
            "/api/v1/admin/proposals/:proposal_id/approve",
            post(approve_handler::<R, D, M>),
        )
        .route(
            "/api/v1/admin/proposals/:proposal_id/reject",
            post(reject_handler::<R, D, M>),
        )
        .route(
            "/api/v1/admin/proposals/:proposal_id/validation-email",
            post(validation_email_handler::<R, D, M>),
        )
        .route(
            "/api/v1/admin/proposals/:proposal_id/pdf",
            get(pdf_handler::<R, D, M>),
        )
        .route(
            "/api/v1/admin/proposals/:proposal_id/zip",
            get(zip_handler::<R, D, M>),
        )
        .route(
            "/api/v1/admin/email/status",
            get(email_status_handler::<R, D, M>),
        )
        .with_state(service)
}

/// Maps service failures onto HTTP statuses with a JSON error body.
pub(crate) fn error_response(error: ProposalServiceError) -> Response {
    let status = match &error {
        ProposalServiceError::Validation(validation) => {
            let payload = json!({
                "error": validation.to_string(),
                "fields": validation.fields,
            });
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response();
        }
        ProposalServiceError::Questionnaire(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ProposalServiceError::SessionNotFound(_)
        | ProposalServiceError::ProposalNotFound(_)
        | ProposalServiceError::Repository(RepositoryError::NotFound)
        | ProposalServiceError::Export(ExportError::EmptyBundle) => StatusCode::NOT_FOUND,
        ProposalServiceError::InvalidTransition { .. }
        | ProposalServiceError::NotReadyToSubmit { .. }
        | ProposalServiceError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        ProposalServiceError::Email(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %error, "proposal request failed");
    }
    let payload = json!({
        "error": error.to_string(),
    });
    (status, Json(payload)).into_response()
}

fn json_result<T: serde::Serialize>(
    status: StatusCode,
    result: Result<T, ProposalServiceError>,
) -> Response {
    match result {
        Ok(view) => (status, Json(view)).into_response(),
        Err(error) => error_response(error),
    }
}

fn download(result: Result<ExportArtifact, ProposalServiceError>) -> Response {
    match result {
        Ok(artifact) => {
            let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, artifact.content_type.to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                artifact.bytes,
            )
                .into_response()
        }
        Err(error) => error_response(error),
    }
}

fn submission_context(headers: &HeaderMap) -> SubmissionContext {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    SubmissionContext {
        ip: text("x-forwarded-for")
            .and_then(|forwarded| forwarded.split(',').next().map(|ip| ip.trim().to_string())),
        user_agent: text(header::USER_AGENT.as_str()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OpenSessionRequest {
    #[serde(default)]
    broker: Option<BrokerContact>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DocumentQuery {
    dependent: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnswerRequest {
    answer: Answer,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RejectRequest {
    #[serde(default)]
    reason: String,
}

pub(crate) async fn templates_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(StatusCode::OK, service.templates())
}

pub(crate) async fn open_session_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    request: Option<Json<OpenSessionRequest>>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    let broker = request.and_then(|Json(request)| request.broker);
    let view = service.open_session(broker);
    (StatusCode::CREATED, Json(view)).into_response()
}

pub(crate) async fn session_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(session_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(StatusCode::OK, service.session(&SessionId(session_id)))
}

pub(crate) async fn draft_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(session_id): Path<String>,
    Json(draft): Json<ProposalDraft>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(
        StatusCode::OK,
        service.update_draft(&SessionId(session_id), draft),
    )
}

pub(crate) async fn document_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path((session_id, kind)): Path<(String, String)>,
    Query(query): Query<DocumentQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    let Some(kind) = DocumentKind::from_label(&kind) else {
        let payload = json!({
            "error": format!("unknown document kind {kind}"),
        });
        return (StatusCode::NOT_FOUND, Json(payload)).into_response();
    };

    let header_text = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let file = UploadedFile {
        file_name: header_text("x-file-name").unwrap_or_else(|| kind.label().to_string()),
        content_type: header_text(header::CONTENT_TYPE.as_str())
            .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string()),
        bytes: body.to_vec(),
    };
    let owner = match query.dependent {
        Some(index) => DocumentOwner::Dependent { index },
        None => DocumentOwner::Holder,
    };

    json_result(
        StatusCode::OK,
        service.attach_document(&SessionId(session_id), owner, kind, file),
    )
}

pub(crate) async fn answer_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(session_id): Path<String>,
    Json(request): Json<AnswerRequest>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(
        StatusCode::OK,
        service.answer_question(&SessionId(session_id), request.answer, request.details),
    )
}

pub(crate) async fn next_question_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(session_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(StatusCode::OK, service.next_question(&SessionId(session_id)))
}

pub(crate) async fn previous_question_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(session_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(
        StatusCode::OK,
        service.previous_question(&SessionId(session_id)),
    )
}

pub(crate) async fn review_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(session_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(
        StatusCode::OK,
        service.review_questionnaire(&SessionId(session_id)),
    )
}

pub(crate) async fn advance_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(session_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(StatusCode::OK, service.advance(&SessionId(session_id)))
}

pub(crate) async fn retreat_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(session_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(StatusCode::OK, service.retreat(&SessionId(session_id)))
}

pub(crate) async fn submit_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    let context = submission_context(&headers);
    json_result(
        StatusCode::CREATED,
        service.submit(&SessionId(session_id), context).await,
    )
}

pub(crate) async fn completion_view_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(proposal_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(
        StatusCode::OK,
        service.completion_view(&ProposalId(proposal_id)),
    )
}

pub(crate) async fn complete_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(proposal_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CompletionRequest>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    let context = submission_context(&headers);
    json_result(
        StatusCode::OK,
        service
            .complete(&ProposalId(proposal_id), request, context)
            .await,
    )
}

pub(crate) async fn list_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Query(query): Query<ListQuery>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(StatusCode::OK, service.list(&query))
}

pub(crate) async fn csv_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Query(query): Query<ListQuery>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    download(service.export_csv(&query))
}

pub(crate) async fn detail_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(proposal_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(StatusCode::OK, service.detail(&ProposalId(proposal_id)))
}

pub(crate) async fn approve_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(proposal_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(
        StatusCode::OK,
        service.approve(&ProposalId(proposal_id)).await,
    )
}

pub(crate) async fn reject_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(proposal_id): Path<String>,
    Json(request): Json<RejectRequest>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(
        StatusCode::OK,
        service
            .reject(&ProposalId(proposal_id), &request.reason)
            .await,
    )
}

pub(crate) async fn validation_email_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(proposal_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    json_result(
        StatusCode::OK,
        service
            .send_validation_email(&ProposalId(proposal_id))
            .await,
    )
}

pub(crate) async fn pdf_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(proposal_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    download(service.export_pdf(&ProposalId(proposal_id)))
}

pub(crate) async fn zip_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
    Path(proposal_id): Path<String>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    download(service.export_zip(&ProposalId(proposal_id)))
}

pub(crate) async fn email_status_handler<R, D, M>(
    State(service): State<SharedService<R, D, M>>,
) -> Response
where
    R: ProposalRepository + 'static,
    D: DocumentStore + 'static,
    M: Mailer + 'static,
{
    (StatusCode::OK, Json(service.email_status().await)).into_response()
}
