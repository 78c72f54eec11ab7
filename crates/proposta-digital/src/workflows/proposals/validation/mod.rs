//! Step-scoped field rules for the intake wizard and conversion of drafts into records.

pub mod cpf;
pub mod fields;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    parse_brl_cents, total_value_cents, Address, DependentId, DependentRecord, DocumentKind,
    DocumentSet, Holder, PlanSelection, ProposalId, ProposalOrigin, ProposalRecord,
    ProposalStatus, Relationship, SignatureArtifact, Template, TemplateId,
};
use super::draft::{DependentDraft, HolderDraft, ProposalDraft};
use fields::{parse_date, Findings};

pub use fields::is_valid_email;

/// One failing field and the message shown next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Field-level validation failure; blocks wizard navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fields: vec![FieldError::new(field, message)],
        }
    }

    /// Error raised when the store's CPF check constraint rejects a row.
    pub fn invalid_cpf(field: impl Into<String>) -> Self {
        Self::single(field, fields::CPF_INVALID)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|error| error.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fields.as_slice() {
            [] => write!(f, "validation failed"),
            [only] => write!(f, "{}: {}", only.field, only.message),
            [first, rest @ ..] => write!(
                f,
                "{}: {} (and {} more)",
                first.field,
                first.message,
                rest.len()
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Step 1: template choice, plus the broker name unless a broker is preset.
pub fn validate_template_step(
    draft: &ProposalDraft,
    broker_preset: bool,
    templates: &[Template],
) -> Result<(), ValidationError> {
    let mut findings = Findings::default();
    if !broker_preset {
        findings.min_chars(
            "broker_name",
            &draft.broker_name,
            3,
            "Nome do corretor é obrigatório",
        );
    }

    let template_id = draft.template_id.trim();
    if template_id.is_empty() {
        findings.push("template_id", "Selecione um modelo de proposta");
    } else if !templates
        .iter()
        .any(|template| template.active && template.id.0 == template_id)
    {
        findings.push("template_id", "Modelo de proposta indisponível");
    }

    findings.finish()
}

/// Step 2: plan, holder identity and address.
pub fn validate_plan_step(draft: &ProposalDraft) -> Result<(), ValidationError> {
    let mut findings = Findings::default();
    findings.min_chars(
        "plan_code",
        &draft.plan_code,
        1,
        "Código do plano é obrigatório",
    );
    if draft.value.trim().is_empty() {
        findings.push("value", "Valor é obrigatório");
    } else if parse_brl_cents(&draft.value).is_none() {
        findings.push("value", "Valor inválido");
    }

    holder_rules(&mut findings, &draft.holder);

    let address = &draft.address;
    findings.min_chars("address.cep", &address.cep, 8, "CEP inválido");
    findings.min_chars(
        "address.street",
        &address.street,
        5,
        "Endereço é obrigatório",
    );
    findings.min_chars("address.number", &address.number, 1, "Número é obrigatório");
    findings.min_chars(
        "address.neighborhood",
        &address.neighborhood,
        1,
        "Bairro é obrigatório",
    );
    findings.min_chars("address.city", &address.city, 1, "Cidade é obrigatória");
    findings.min_chars("address.state", &address.state, 2, "Estado é obrigatório");

    findings.finish()
}

fn holder_rules(findings: &mut Findings, holder: &HolderDraft) {
    findings.min_chars("holder.name", &holder.name, 3, "Nome completo é obrigatório");
    findings.cpf("holder.cpf", &holder.cpf);
    findings.min_chars("holder.rg", &holder.rg, 5, "RG é obrigatório");
    findings.date(
        "holder.birth_date",
        &holder.birth_date,
        "Data de nascimento é obrigatória",
    );
    findings.email("holder.email", &holder.email);
    findings.min_chars("holder.phone", &holder.phone, 10, "Telefone inválido");
}

/// Step 3: the dependents list must be non-empty when the flag is set, and each entry
/// must pass the person rules.
pub fn validate_dependents_step(draft: &ProposalDraft) -> Result<(), ValidationError> {
    let mut findings = Findings::default();
    if !draft.has_dependents {
        return findings.finish();
    }

    if draft.dependents.is_empty() {
        findings.push(
            "dependents",
            "Você marcou que tem dependentes, mas não adicionou nenhum. Adicione pelo menos um dependente ou desmarque a opção.",
        );
        return findings.finish();
    }

    for (index, dependent) in draft.dependents.iter().enumerate() {
        dependent_rules(&mut findings, index, dependent);
    }

    findings.finish()
}

fn dependent_rules(findings: &mut Findings, index: usize, dependent: &DependentDraft) {
    let field = |name: &str| format!("dependents[{index}].{name}");
    findings.min_chars(&field("name"), &dependent.name, 3, "Nome completo é obrigatório");
    findings.cpf(&field("cpf"), &dependent.cpf);
    findings.min_chars(&field("rg"), &dependent.rg, 5, "RG é obrigatório");
    findings.date(
        &field("birth_date"),
        &dependent.birth_date,
        "Data de nascimento é obrigatória",
    );
    if dependent.relationship.trim().is_empty() {
        findings.push(field("relationship"), "Parentesco é obrigatório");
    } else if Relationship::from_label(&dependent.relationship).is_none() {
        findings.push(field("relationship"), "Parentesco inválido");
    }
    if let Some(value) = dependent
        .individual_value
        .as_deref()
        .filter(|value| !value.trim().is_empty())
    {
        if parse_brl_cents(value).is_none() {
            findings.push(field("individual_value"), "Valor inválido");
        }
    }
}

/// Step 4: every mandatory document kind must be attached. CNS is optional.
pub fn validate_documents_step(attached: &[DocumentKind]) -> Result<(), ValidationError> {
    let mut findings = Findings::default();
    for kind in DocumentKind::MANDATORY {
        if !attached.contains(&kind) {
            findings.push(
                format!("documents.{}", kind.label()),
                format!("{} é obrigatório", kind.display_label()),
            );
        }
    }
    findings.finish()
}

/// Step 5: weight, height and a fully answered questionnaire.
pub fn validate_health_step(
    draft: &ProposalDraft,
    questionnaire_complete: bool,
) -> Result<(), ValidationError> {
    let mut findings = Findings::default();
    if draft.weight.trim().is_empty() {
        findings.push("weight", "Por favor, preencha o peso");
    }
    if draft.height.trim().is_empty() {
        findings.push("height", "Por favor, preencha a altura");
    }
    if !questionnaire_complete {
        findings.push(
            "questionnaire",
            "Por favor, responda todas as perguntas do questionário de saúde",
        );
    }
    findings.finish()
}

/// Step 7: a captured signature.
pub fn validate_signature_step(draft: &ProposalDraft) -> Result<(), ValidationError> {
    let mut findings = Findings::default();
    findings.min_chars("signature", &draft.signature, 1, "Assinatura é obrigatória");
    findings.finish()
}

/// Every step rule at once, run before the final submission persists anything.
pub fn validate_for_submission(
    draft: &ProposalDraft,
    broker_preset: bool,
    templates: &[Template],
    attached: &[DocumentKind],
    questionnaire_complete: bool,
) -> Result<(), ValidationError> {
    let mut findings = Findings::default();
    findings.absorb(validate_template_step(draft, broker_preset, templates));
    findings.absorb(validate_plan_step(draft));
    findings.absorb(validate_dependents_step(draft));
    findings.absorb(validate_documents_step(attached));
    findings.absorb(validate_health_step(draft, questionnaire_complete));
    findings.absorb(validate_signature_step(draft));
    findings.finish()
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn holder_from_draft(holder: &HolderDraft) -> Result<Holder, ValidationError> {
    let mut findings = Findings::default();
    holder_rules(&mut findings, holder);
    findings.finish()?;

    let birth_date = parse_date(&holder.birth_date)
        .ok_or_else(|| ValidationError::single("holder.birth_date", "Data inválida"))?;

    Ok(Holder {
        name: holder.name.trim().to_string(),
        cpf: cpf::digits(&holder.cpf),
        rg: holder.rg.trim().to_string(),
        birth_date,
        cns: optional(&holder.cns),
        email: holder.email.trim().to_string(),
        phone: holder.phone.trim().to_string(),
        mother_name: optional(&holder.mother_name),
        sex: optional(&holder.sex),
        marital_status: optional(&holder.marital_status),
        birthplace: optional(&holder.birthplace),
    })
}

pub fn dependent_from_draft(
    proposal_id: &ProposalId,
    index: usize,
    dependent: &DependentDraft,
) -> Result<DependentRecord, ValidationError> {
    let mut findings = Findings::default();
    dependent_rules(&mut findings, index, dependent);
    findings.finish()?;

    let birth_date = parse_date(&dependent.birth_date).ok_or_else(|| {
        ValidationError::single(format!("dependents[{index}].birth_date"), "Data inválida")
    })?;
    let relationship = Relationship::from_label(&dependent.relationship).ok_or_else(|| {
        ValidationError::single(
            format!("dependents[{index}].relationship"),
            "Parentesco inválido",
        )
    })?;

    Ok(DependentRecord {
        id: DependentId::generate(),
        proposal_id: proposal_id.clone(),
        name: dependent.name.trim().to_string(),
        cpf: cpf::digits(&dependent.cpf),
        rg: dependent.rg.trim().to_string(),
        birth_date,
        cns: optional(&dependent.cns),
        relationship,
        mother_name: optional(&dependent.mother_name),
        weight: optional(&dependent.weight),
        height: optional(&dependent.height),
        individual_value_cents: dependent
            .individual_value
            .as_deref()
            .and_then(parse_brl_cents),
        documents: DocumentSet::default(),
    })
}

/// Identity and lifecycle values for a record built from a draft.
#[derive(Debug, Clone)]
pub struct RecordSeed {
    pub id: ProposalId,
    pub origin: ProposalOrigin,
    pub status: ProposalStatus,
    pub signature: Option<SignatureArtifact>,
    pub now: DateTime<Utc>,
}

/// Sum of the plan value and each active dependent's individual value.
pub fn draft_total_cents(draft: &ProposalDraft) -> u64 {
    let plan = parse_brl_cents(&draft.value).unwrap_or(0);
    total_value_cents(
        plan,
        draft.has_dependents && !draft.dependents.is_empty(),
        draft
            .active_dependents()
            .iter()
            .map(|dependent| dependent.individual_value.as_deref().and_then(parse_brl_cents)),
    )
}

pub fn proposal_from_draft(
    draft: &ProposalDraft,
    seed: RecordSeed,
) -> Result<ProposalRecord, ValidationError> {
    let mut findings = Findings::default();
    findings.absorb(validate_plan_step(draft));
    findings.absorb(validate_dependents_step(draft));
    findings.finish()?;

    let holder = holder_from_draft(&draft.holder)?;
    let value_cents = parse_brl_cents(&draft.value)
        .ok_or_else(|| ValidationError::single("value", "Valor inválido"))?;
    let address = &draft.address;

    Ok(ProposalRecord {
        id: seed.id,
        origin: seed.origin,
        status: seed.status,
        plan: PlanSelection {
            template_id: TemplateId(draft.template_id.trim().to_string()),
            template_title: optional(&draft.template_title),
            coverage: draft.coverage,
            accommodation: draft.accommodation,
            plan_code: draft.plan_code.trim().to_string(),
            value_cents,
        },
        holder,
        address: Address {
            cep: address.cep.trim().to_string(),
            street: address.street.trim().to_string(),
            number: address.number.trim().to_string(),
            complement: optional(&address.complement),
            neighborhood: address.neighborhood.trim().to_string(),
            city: address.city.trim().to_string(),
            state: address.state.trim().to_string(),
        },
        weight: draft.weight.trim().to_string(),
        height: draft.height.trim().to_string(),
        has_dependents: draft.has_dependents && !draft.dependents.is_empty(),
        total_value_cents: draft_total_cents(draft),
        commission_cents: None,
        documents: DocumentSet::default(),
        signature: seed.signature,
        questionnaire_complete: false,
        rejection_reason: None,
        email_validation_sent: false,
        email_sent_at: None,
        created_at: seed.now,
        updated_at: seed.now,
    })
}
