use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryDocumentStore, InMemoryProposalRepository};
use crate::routes::with_proposal_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use proposta_digital::config::AppConfig;
use proposta_digital::error::AppError;
use proposta_digital::telemetry;
use proposta_digital::workflows::proposals::{EmailFunctionClient, ProposalService};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(InMemoryProposalRepository::default());
    let documents = Arc::new(InMemoryDocumentStore::default());
    let mailer = Arc::new(EmailFunctionClient::new(&config.email)?);
    let proposal_service = Arc::new(
        ProposalService::new(repository, documents, mailer, config.intake.clone())
            .with_environment(config.environment.label()),
    );

    let app = with_proposal_routes(proposal_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        environment = config.environment.label(),
        email_simulated = config.email.simulate,
        %addr,
        "proposal intake service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
