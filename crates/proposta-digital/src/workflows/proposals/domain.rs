use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier wrapper for persisted proposals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(pub String);

impl ProposalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// First eight characters, used in download file names.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((index, _)) => &self.0[..index],
            None => &self.0,
        }
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependentId(pub String);

impl DependentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub String);

/// Lifecycle tags stored on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Persisted ahead of the preview step, before the holder signs.
    Rascunho,
    Parcial,
    AguardandoCliente,
    Pendente,
    Aprovada,
    Rejeitada,
    Finalizada,
}

impl ProposalStatus {
    pub const fn all() -> [Self; 7] {
        [
            Self::Rascunho,
            Self::Parcial,
            Self::AguardandoCliente,
            Self::Pendente,
            Self::Aprovada,
            Self::Rejeitada,
            Self::Finalizada,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Rascunho => "rascunho",
            Self::Parcial => "parcial",
            Self::AguardandoCliente => "aguardando_cliente",
            Self::Pendente => "pendente",
            Self::Aprovada => "aprovada",
            Self::Rejeitada => "rejeitada",
            Self::Finalizada => "finalizada",
        }
    }

    pub const fn display_label(self) -> &'static str {
        match self {
            Self::Rascunho => "Rascunho",
            Self::Parcial => "Aguardando Validação",
            Self::AguardandoCliente => "Aguardando Cliente",
            Self::Pendente => "Aguardando Análise",
            Self::Aprovada => "Aprovada",
            Self::Rejeitada => "Rejeitada",
            Self::Finalizada => "Finalizada",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::all()
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(value))
    }

    /// Sent to the client for completion and not yet signed by them.
    pub const fn awaits_client(self) -> bool {
        matches!(self, Self::Parcial | Self::AguardandoCliente)
    }
}

/// Broker that originated a proposal and receives status notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerContact {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Where a proposal came from. Serialized with the `origem` tag used by the back office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origem")]
pub enum ProposalOrigin {
    #[serde(rename = "propostas")]
    Direct {
        /// Broker name typed by the client, informational only.
        #[serde(default)]
        broker_name: Option<String>,
    },
    #[serde(rename = "propostas_corretores")]
    Broker(BrokerContact),
}

impl ProposalOrigin {
    pub fn tag(&self) -> OriginTag {
        match self {
            Self::Direct { .. } => OriginTag::Direct,
            Self::Broker(_) => OriginTag::Broker,
        }
    }

    pub fn broker(&self) -> Option<&BrokerContact> {
        match self {
            Self::Broker(contact) => Some(contact),
            Self::Direct { .. } => None,
        }
    }

    pub fn broker_name(&self) -> Option<&str> {
        match self {
            Self::Broker(contact) => Some(contact.name.as_str()),
            Self::Direct { broker_name } => broker_name.as_deref(),
        }
    }
}

/// Bare origin discriminant, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OriginTag {
    #[serde(rename = "propostas")]
    Direct,
    #[serde(rename = "propostas_corretores")]
    Broker,
}

impl OriginTag {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Direct => "propostas",
            Self::Broker => "propostas_corretores",
        }
    }

    pub const fn display_label(self) -> &'static str {
        match self {
            Self::Direct => "Cliente Direto",
            Self::Broker => "Via Corretor",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim() {
            "propostas" => Some(Self::Direct),
            "propostas_corretores" => Some(Self::Broker),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Coverage {
    #[default]
    Nacional,
    Estadual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Accommodation {
    #[default]
    Enfermaria,
    Apartamento,
}

/// Plan chosen in the second wizard step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSelection {
    pub template_id: TemplateId,
    pub template_title: Option<String>,
    pub coverage: Coverage,
    pub accommodation: Accommodation,
    pub plan_code: String,
    pub value_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub cep: String,
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
}

impl Address {
    pub fn one_line(&self) -> String {
        let mut line = format!("{}, {}", self.street, self.number);
        if let Some(complement) = self.complement.as_deref().filter(|c| !c.trim().is_empty()) {
            line.push_str(", ");
            line.push_str(complement);
        }
        format!(
            "{line} - {} - {}/{} - CEP {}",
            self.neighborhood, self.city, self.state, self.cep
        )
    }
}

/// Primary person named on a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub name: String,
    pub cpf: String,
    pub rg: String,
    pub birth_date: NaiveDate,
    pub cns: Option<String>,
    pub email: String,
    pub phone: String,
    pub mother_name: Option<String>,
    pub sex: Option<String>,
    pub marital_status: Option<String>,
    pub birthplace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Conjuge,
    Filho,
    Pai,
    Mae,
    Irmao,
    Sogro,
    Genro,
    Neto,
    Outro,
}

impl Relationship {
    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "conjuge" | "cônjuge" => Some(Self::Conjuge),
            "filho" | "filha" => Some(Self::Filho),
            "pai" => Some(Self::Pai),
            "mae" | "mãe" => Some(Self::Mae),
            "irmao" | "irmão" | "irma" | "irmã" => Some(Self::Irmao),
            "sogro" | "sogra" => Some(Self::Sogro),
            "genro" | "nora" => Some(Self::Genro),
            "neto" | "neta" => Some(Self::Neto),
            "outro" => Some(Self::Outro),
            _ => None,
        }
    }

    pub const fn display_label(self) -> &'static str {
        match self {
            Self::Conjuge => "Cônjuge",
            Self::Filho => "Filho(a)",
            Self::Pai => "Pai",
            Self::Mae => "Mãe",
            Self::Irmao => "Irmão(ã)",
            Self::Sogro => "Sogro(a)",
            Self::Genro => "Genro/Nora",
            Self::Neto => "Neto(a)",
            Self::Outro => "Outro",
        }
    }
}

/// Kinds of documents collected by the documents step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    RgFrente,
    RgVerso,
    Cpf,
    ComprovanteResidencia,
    Cns,
}

impl DocumentKind {
    pub const MANDATORY: [Self; 4] = [
        Self::RgFrente,
        Self::RgVerso,
        Self::Cpf,
        Self::ComprovanteResidencia,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::RgFrente => "rg_frente",
            Self::RgVerso => "rg_verso",
            Self::Cpf => "cpf",
            Self::ComprovanteResidencia => "comprovante_residencia",
            Self::Cns => "cns",
        }
    }

    pub const fn display_label(self) -> &'static str {
        match self {
            Self::RgFrente => "RG (Frente)",
            Self::RgVerso => "RG (Verso)",
            Self::Cpf => "CPF",
            Self::ComprovanteResidencia => "Comprovante de Residência",
            Self::Cns => "Cartão Nacional de Saúde",
        }
    }

    pub const fn is_mandatory(self) -> bool {
        !matches!(self, Self::Cns)
    }

    pub fn from_label(value: &str) -> Option<Self> {
        [
            Self::RgFrente,
            Self::RgVerso,
            Self::Cpf,
            Self::ComprovanteResidencia,
            Self::Cns,
        ]
        .into_iter()
        .find(|kind| kind.label() == value.trim())
    }
}

/// Document kind → retrievable URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentSet(pub BTreeMap<DocumentKind, String>);

impl DocumentSet {
    pub fn insert(&mut self, kind: DocumentKind, url: String) {
        self.0.insert(kind, url);
    }

    pub fn get(&self, kind: DocumentKind) -> Option<&str> {
        self.0.get(&kind).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DocumentKind, &str)> {
        self.0.iter().map(|(kind, url)| (*kind, url.as_str()))
    }

    pub fn merge(&mut self, other: DocumentSet) {
        self.0.extend(other.0);
    }
}

/// Admin-curated template selected in the first wizard step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub title: String,
    pub active: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Signature image plus the request metadata captured when it was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureArtifact {
    pub image: String,
    pub signed_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Persisted proposal row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: ProposalId,
    pub origin: ProposalOrigin,
    pub status: ProposalStatus,
    pub plan: PlanSelection,
    pub holder: Holder,
    pub address: Address,
    pub weight: String,
    pub height: String,
    pub has_dependents: bool,
    pub total_value_cents: u64,
    /// Broker commission, when the brokerage recorded one.
    #[serde(default)]
    pub commission_cents: Option<u64>,
    #[serde(default)]
    pub documents: DocumentSet,
    #[serde(default)]
    pub signature: Option<SignatureArtifact>,
    #[serde(default)]
    pub questionnaire_complete: bool,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub email_validation_sent: bool,
    #[serde(default)]
    pub email_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProposalRecord {
    pub fn display_name(&self) -> &str {
        non_blank(&self.holder.name).unwrap_or("Nome não informado")
    }

    pub fn display_email(&self) -> &str {
        non_blank(&self.holder.email).unwrap_or("Email não informado")
    }

    pub fn display_phone(&self) -> &str {
        non_blank(&self.holder.phone).unwrap_or("Telefone não informado")
    }

    /// Recipient for client-facing email, if the holder supplied one.
    pub fn client_email(&self) -> Option<&str> {
        non_blank(&self.holder.email)
    }

    pub fn total_value_label(&self) -> String {
        format_brl(self.total_value_cents)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Person covered under a proposal besides the holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentRecord {
    pub id: DependentId,
    pub proposal_id: ProposalId,
    pub name: String,
    pub cpf: String,
    pub rg: String,
    pub birth_date: NaiveDate,
    pub cns: Option<String>,
    pub relationship: Relationship,
    pub mother_name: Option<String>,
    pub weight: Option<String>,
    pub height: Option<String>,
    pub individual_value_cents: Option<u64>,
    #[serde(default)]
    pub documents: DocumentSet,
}

/// Parses a BRL amount such as `"1.234,56"` or `"R$ 99,9"` into cents.
///
/// Everything except digits and commas is discarded and the first comma is the decimal
/// separator, so `"1.234,56"` is 123456 cents and `"150"` is 15000 cents.
pub fn parse_brl_cents(raw: &str) -> Option<u64> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',')
        .collect();

    let (integer, fraction) = match kept.split_once(',') {
        Some((integer, rest)) => (integer, rest.split(',').next().unwrap_or_default()),
        None => (kept.as_str(), ""),
    };

    if integer.is_empty() && fraction.is_empty() {
        return None;
    }

    let whole: u64 = if integer.is_empty() {
        0
    } else {
        integer.parse().ok()?
    };

    let mut thousandths = 0u64;
    let mut digits = fraction.chars();
    for scale in [100u64, 10, 1] {
        let digit = digits
            .next()
            .and_then(|c| c.to_digit(10))
            .map(u64::from)
            .unwrap_or(0);
        thousandths += digit * scale;
    }
    let fractional_cents = (thousandths + 5) / 10;

    whole.checked_mul(100)?.checked_add(fractional_cents)
}

/// Formats cents as a pt-BR amount with two decimals, e.g. `1.234,56`.
pub fn format_brl(cents: u64) -> String {
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }
    format!("{grouped},{:02}", cents % 100)
}

/// Plan value plus each dependent's individual value, counted only when the proposal has
/// dependents.
pub fn total_value_cents<I>(plan_value_cents: u64, has_dependents: bool, dependents: I) -> u64
where
    I: IntoIterator<Item = Option<u64>>,
{
    if !has_dependents {
        return plan_value_cents;
    }

    dependents
        .into_iter()
        .flatten()
        .fold(plan_value_cents, u64::saturating_add)
}

/// Whole years between `birth` and `today`.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> u32 {
    if today < birth {
        return 0;
    }
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).unwrap_or(0)
}
