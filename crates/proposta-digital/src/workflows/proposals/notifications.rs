//! Transactional email through the hosted email function.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::domain::ProposalId;
use super::validation::is_valid_email;
use crate::config::EmailConfig;

const SYSTEM_SENDER_NAME: &str = "Sistema ContratandoPlanos";
const FUNCTION_NAME: &str = "resend-email";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    PropostaCliente,
    PropostaCompletada,
    PropostaAssinada,
    PropostaAprovada,
    PropostaRejeitada,
    Teste,
}

/// JSON body accepted by the email function. Optional fields are omitted when unset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailPayload {
    pub to: String,
    pub nome: String,
    pub subject: String,
    pub tipo: EmailKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corretor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cliente: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comissao: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivo: Option<String>,
    pub timestamp: String,
}

fn reais(cents: u64) -> f64 {
    cents as f64 / 100.0
}

/// Link the client follows to review, answer and sign a proposal.
pub fn validation_link(public_base_url: &str, proposal_id: &ProposalId) -> String {
    format!(
        "{}/proposta-digital/completar/{}",
        public_base_url.trim_end_matches('/'),
        proposal_id
    )
}

impl EmailPayload {
    fn base(to: &str, nome: &str, subject: String, tipo: EmailKind, now: DateTime<Utc>) -> Self {
        Self {
            to: to.trim().to_string(),
            nome: nome.trim().to_string(),
            subject,
            tipo,
            corretor: None,
            link: None,
            cliente: None,
            proposta: None,
            valor: None,
            comissao: None,
            motivo: None,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Invitation for the client to complete their proposal.
    pub fn client_invitation(
        to: &str,
        client_name: &str,
        link: String,
        broker_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut payload = Self::base(
            to,
            client_name,
            "Complete sua proposta de plano de saúde".to_string(),
            EmailKind::PropostaCliente,
            now,
        );
        payload.corretor = Some(
            broker_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(SYSTEM_SENDER_NAME)
                .to_string(),
        );
        payload.link = Some(link);
        payload
    }

    pub fn proposal_completed(
        broker_email: &str,
        broker_name: &str,
        client_name: &str,
        proposal_id: &ProposalId,
        now: DateTime<Utc>,
    ) -> Self {
        let mut payload = Self::base(
            broker_email,
            broker_name,
            "Proposta completada pelo cliente".to_string(),
            EmailKind::PropostaCompletada,
            now,
        );
        payload.cliente = Some(client_name.to_string());
        payload.proposta = Some(proposal_id.to_string());
        payload
    }

    pub fn proposal_signed(
        broker_email: &str,
        broker_name: &str,
        client_name: &str,
        proposal_id: &ProposalId,
        value_cents: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut payload = Self::base(
            broker_email,
            broker_name,
            format!("🎉 Cliente {client_name} assinou a proposta!"),
            EmailKind::PropostaAssinada,
            now,
        );
        payload.cliente = Some(client_name.to_string());
        payload.proposta = Some(proposal_id.to_string());
        payload.valor = Some(reais(value_cents));
        payload
    }

    pub fn proposal_approved(
        broker_email: &str,
        broker_name: &str,
        client_name: &str,
        proposal_id: &ProposalId,
        value_cents: u64,
        commission_cents: Option<u64>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut payload = Self::base(
            broker_email,
            broker_name,
            format!("✅ Proposta aprovada - {client_name}"),
            EmailKind::PropostaAprovada,
            now,
        );
        payload.cliente = Some(client_name.to_string());
        payload.proposta = Some(proposal_id.to_string());
        payload.valor = Some(reais(value_cents));
        payload.comissao = Some(reais(commission_cents.unwrap_or(0)));
        payload
    }

    pub fn proposal_rejected(
        broker_email: &str,
        broker_name: &str,
        client_name: &str,
        proposal_id: &ProposalId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let mut payload = Self::base(
            broker_email,
            broker_name,
            format!("❌ Proposta rejeitada - {client_name}"),
            EmailKind::PropostaRejeitada,
            now,
        );
        payload.cliente = Some(client_name.to_string());
        payload.proposta = Some(proposal_id.to_string());
        payload.motivo = Some(reason.to_string());
        payload
    }

    pub fn connectivity_test(now: DateTime<Utc>) -> Self {
        Self::base(
            "teste@exemplo.com",
            "Teste Sistema",
            "Teste de conectividade".to_string(),
            EmailKind::Teste,
            now,
        )
    }

    /// Checks recipient and name before anything leaves the process.
    pub fn validate(&self) -> Result<(), EmailError> {
        if self.to.trim().is_empty() {
            return Err(EmailError::Validation(
                "campo 'to' está vazio".to_string(),
            ));
        }
        if !is_valid_email(&self.to) {
            return Err(EmailError::Validation(format!(
                "campo 'to' não é um email válido: \"{}\"",
                self.to
            )));
        }
        if self.nome.trim().is_empty() {
            return Err(EmailError::Validation(
                "campo 'nome' está vazio".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmailError {
    #[error("invalid email payload: {0}")]
    Validation(String),
    #[error("email function unreachable: {0}")]
    Network(String),
    #[error("email function did not respond within {0:?}")]
    Timeout(Duration),
    #[error("email function returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("email client could not be built: {0}")]
    Client(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "delivery", rename_all = "snake_case")]
pub enum Delivery {
    Sent { status: u16 },
    Simulated,
}

/// Outbound email transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, payload: &EmailPayload) -> Result<Delivery, EmailError>;

    /// True when messages are only logged.
    fn is_simulated(&self) -> bool;
}

/// Availability report for the admin email status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailServiceStatus {
    pub available: bool,
    pub details: String,
    pub environment: String,
}

/// Sends a connectivity test unless the mailer is simulated.
pub async fn probe<M>(mailer: &M, environment: &str, now: DateTime<Utc>) -> EmailServiceStatus
where
    M: Mailer + ?Sized,
{
    if mailer.is_simulated() {
        return EmailServiceStatus {
            available: true,
            details: "Simulação ativa - emails são registrados no log".to_string(),
            environment: environment.to_string(),
        };
    }

    match mailer.deliver(&EmailPayload::connectivity_test(now)).await {
        Ok(_) => EmailServiceStatus {
            available: true,
            details: format!("Edge Function '{FUNCTION_NAME}' funcionando corretamente"),
            environment: environment.to_string(),
        },
        Err(err) => {
            tracing::warn!(error = %err, "email connectivity test failed");
            EmailServiceStatus {
                available: false,
                details: format!("Edge Function '{FUNCTION_NAME}' não acessível: {err}"),
                environment: environment.to_string(),
            }
        }
    }
}

/// HTTP client for the hosted email function.
#[derive(Debug, Clone)]
pub struct EmailFunctionClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
    simulate: bool,
}

impl EmailFunctionClient {
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| EmailError::Client(err.to_string()))?;

        Ok(Self {
            http,
            url: config.function_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            simulate: config.simulate,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> EmailError {
        if err.is_timeout() {
            EmailError::Timeout(self.timeout)
        } else {
            EmailError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Mailer for EmailFunctionClient {
    async fn deliver(&self, payload: &EmailPayload) -> Result<Delivery, EmailError> {
        payload.validate()?;

        if self.simulate {
            tracing::info!(
                to = %payload.to,
                tipo = ?payload.tipo,
                subject = %payload.subject,
                link = payload.link.as_deref().unwrap_or(""),
                "email simulated"
            );
            return Ok(Delivery::Simulated);
        }

        let mut request = self.http.post(&self.url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key).header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        let status = response.status();
        if status.is_success() {
            tracing::info!(to = %payload.to, tipo = ?payload.tipo, status = status.as_u16(), "email sent");
            return Ok(Delivery::Sent {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(EmailError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn is_simulated(&self) -> bool {
        self.simulate
    }
}
