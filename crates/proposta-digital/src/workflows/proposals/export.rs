//! PDF, ZIP and CSV exports for the back office.

use std::io::{Cursor, Write};

use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::admin::{ProposalDetail, ProposalSummary};
use super::documents::{extension_for, DocumentStore, StorageError};
use super::domain::{age_on, format_brl, DocumentSet, ProposalId};
use super::questionnaire::QuestionnaireResponse;
use super::validation::cpf;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const FONT_SIZE: i64 = 9;
const LEADING: i64 = 13;
const LINES_PER_PAGE: usize = 54;
const WRAP_COLUMNS: usize = 90;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("pdf rendering failed: {0}")]
    Pdf(String),
    #[error("archive failed: {0}")]
    Archive(String),
    #[error("csv export failed: {0}")]
    Csv(String),
    #[error("document {kind} unavailable: {source}")]
    Document {
        kind: String,
        #[source]
        source: StorageError,
    },
    #[error("no documents available for download")]
    EmptyBundle,
}

/// A generated file ready to be served as a download.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ExportArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportArtifact")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Replaces every character outside `[A-Za-z0-9]` with `_`.
pub fn sanitize_client_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn pdf_file_name(client_name: &str, id: &ProposalId) -> String {
    format!(
        "Proposta_Completa_{}_{}.pdf",
        sanitize_client_name(client_name),
        id.short()
    )
}

pub fn zip_file_name(client_name: &str, id: &ProposalId) -> String {
    format!(
        "Proposta_{}_{}.zip",
        sanitize_client_name(client_name),
        id.short()
    )
}

/// Full report first; on any failure falls back to the summary-only report.
pub fn render_pdf<D>(
    detail: &ProposalDetail,
    store: &D,
    generated_at: DateTime<Utc>,
) -> Result<ExportArtifact, ExportError>
where
    D: DocumentStore + ?Sized,
{
    let file_name = pdf_file_name(detail.proposal.display_name(), &detail.proposal.id);

    let bytes = match full_report_lines(detail, store, generated_at).and_then(|lines| write_pdf(&lines)) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(
                proposal_id = %detail.proposal.id,
                error = %err,
                "full pdf failed, rendering simple pdf"
            );
            write_pdf(&summary_lines(detail, generated_at))?
        }
    };

    Ok(ExportArtifact {
        file_name,
        content_type: "application/pdf",
        bytes,
    })
}

fn date_time(value: DateTime<Utc>) -> String {
    value.format("%d/%m/%Y %H:%M").to_string()
}

pub(crate) fn summary_lines(detail: &ProposalDetail, generated_at: DateTime<Utc>) -> Vec<String> {
    let proposal = &detail.proposal;
    let plan = &proposal.plan;
    let mut lines = vec![
        "PROPOSTA DE PLANO DE SAÚDE".to_string(),
        String::new(),
        format!("Proposta: {}", proposal.id),
        format!("Status: {}", proposal.status.display_label()),
        format!("Origem: {}", proposal.origin.tag().display_label()),
    ];
    if let Some(broker) = proposal.origin.broker_name() {
        lines.push(format!("Corretor: {broker}"));
    }
    lines.extend([
        format!("Cliente: {}", proposal.display_name()),
        format!("CPF: {}", cpf::format(&proposal.holder.cpf)),
        format!("Email: {}", proposal.display_email()),
        format!("Telefone: {}", proposal.display_phone()),
        format!(
            "Plano: {} - {:?} / {:?}",
            plan.plan_code, plan.coverage, plan.accommodation
        ),
    ]);
    if let Some(title) = &plan.template_title {
        lines.push(format!("Modelo: {title}"));
    }
    lines.extend([
        format!("Valor total: R$ {}", proposal.total_value_label()),
        format!("Criada em: {}", date_time(proposal.created_at)),
        format!("Gerado em: {}", date_time(generated_at)),
    ]);
    lines
}

fn questionnaire_lines(lines: &mut Vec<String>, response: Option<&QuestionnaireResponse>) {
    let Some(response) = response else {
        lines.push("  Questionário não preenchido".to_string());
        return;
    };
    let mut positives = response.positive_answers().peekable();
    if positives.peek().is_none() {
        lines.push("  Nenhuma resposta positiva".to_string());
    }
    for answer in positives {
        lines.push(format!("  [Sim] {}", answer.question));
        if let Some(details) = &answer.details {
            lines.push(format!("        {details}"));
        }
    }
}

fn inventory_lines<D>(
    lines: &mut Vec<String>,
    store: &D,
    prefix: &str,
    documents: &DocumentSet,
) -> Result<(), ExportError>
where
    D: DocumentStore + ?Sized,
{
    for (kind, url) in documents.iter() {
        let stored = store.get(url).map_err(|source| ExportError::Document {
            kind: kind.label().to_string(),
            source,
        })?;
        lines.push(format!(
            "  {prefix}{}: {} ({} bytes)",
            kind.display_label(),
            stored.content_type,
            stored.bytes.len()
        ));
    }
    Ok(())
}

pub(crate) fn full_report_lines<D>(
    detail: &ProposalDetail,
    store: &D,
    generated_at: DateTime<Utc>,
) -> Result<Vec<String>, ExportError>
where
    D: DocumentStore + ?Sized,
{
    let proposal = &detail.proposal;
    let holder = &proposal.holder;
    let today = generated_at.date_naive();
    let mut lines = summary_lines(detail, generated_at);

    lines.extend([
        String::new(),
        "TITULAR".to_string(),
        format!("RG: {}", holder.rg),
        format!(
            "Nascimento: {} ({} anos)",
            holder.birth_date.format("%d/%m/%Y"),
            age_on(holder.birth_date, today)
        ),
    ]);
    if let Some(mother) = &holder.mother_name {
        lines.push(format!("Nome da mãe: {mother}"));
    }
    if let Some(cns) = &holder.cns {
        lines.push(format!("CNS: {cns}"));
    }
    lines.push(format!("Peso: {} kg  Altura: {} cm", proposal.weight, proposal.height));
    lines.push(format!("Endereço: {}", proposal.address.one_line()));
    lines.push(format!(
        "Valor do plano: R$ {}",
        format_brl(proposal.plan.value_cents)
    ));

    lines.push(String::new());
    lines.push(format!("DEPENDENTES ({})", detail.dependents.len()));
    for (index, dependent_detail) in detail.dependents.iter().enumerate() {
        let dependent = &dependent_detail.dependent;
        lines.push(format!(
            "{}. {} - {} - CPF {} - {} anos",
            index + 1,
            dependent.name,
            dependent_detail.relationship_label,
            cpf::format(&dependent.cpf),
            age_on(dependent.birth_date, today)
        ));
        if let Some(value) = dependent.individual_value_cents {
            lines.push(format!("   Valor individual: R$ {}", format_brl(value)));
        }
    }

    lines.push(String::new());
    lines.push("QUESTIONÁRIO DE SAÚDE".to_string());
    lines.push(format!("Titular: {}", proposal.display_name()));
    questionnaire_lines(&mut lines, detail.holder_questionnaire.as_ref());
    for dependent_detail in &detail.dependents {
        lines.push(format!("Dependente: {}", dependent_detail.dependent.name));
        questionnaire_lines(&mut lines, dependent_detail.questionnaire.as_ref());
    }

    lines.push(String::new());
    lines.push("ASSINATURA".to_string());
    match &proposal.signature {
        Some(signature) => {
            lines.push(format!("Assinada em: {}", date_time(signature.signed_at)));
            if let Some(ip) = &signature.ip {
                lines.push(format!("IP: {ip}"));
            }
            if let Some(user_agent) = &signature.user_agent {
                lines.push(format!("Navegador: {user_agent}"));
            }
        }
        None => lines.push("Proposta ainda não assinada".to_string()),
    }

    lines.push(String::new());
    lines.push("DOCUMENTOS".to_string());
    inventory_lines(&mut lines, store, "", &proposal.documents)?;
    for (index, dependent_detail) in detail.dependents.iter().enumerate() {
        let prefix = format!("Dependente {} - ", index + 1);
        inventory_lines(&mut lines, store, &prefix, &dependent_detail.dependent.documents)?;
    }
    if proposal.documents.is_empty()
        && detail
            .dependents
            .iter()
            .all(|dependent| dependent.dependent.documents.is_empty())
    {
        lines.push("  Nenhum documento enviado".to_string());
    }

    Ok(lines)
}

/// Maps text onto the single-byte font encoding; characters outside Latin-1 become `?`.
fn latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

fn wrap(line: &str) -> Vec<String> {
    if line.chars().count() <= WRAP_COLUMNS {
        return vec![line.to_string()];
    }
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(WRAP_COLUMNS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub(crate) fn write_pdf(lines: &[String]) -> Result<Vec<u8>, ExportError> {
    let pdf_error = |err: lopdf::Error| ExportError::Pdf(err.to_string());

    let wrapped: Vec<String> = lines.iter().flat_map(|line| wrap(line)).collect();
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    let blank: &[String] = &[];
    let chunks: Vec<&[String]> = if wrapped.is_empty() {
        vec![blank]
    } else {
        wrapped.chunks(LINES_PER_PAGE).collect()
    };
    for chunk in chunks {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(FONT_SIZE)]),
            Operation::new("TL", vec![Object::Integer(LEADING)]),
            Operation::new(
                "Td",
                vec![Object::Integer(MARGIN), Object::Integer(PAGE_HEIGHT - MARGIN)],
            ),
        ];
        for line in chunk {
            operations.push(Operation::new("Tj", vec![Object::string_literal(latin1(line))]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations }.encode().map_err(pdf_error)?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PAGE_WIDTH),
                Object::Integer(PAGE_HEIGHT),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|err| ExportError::Pdf(err.to_string()))?;
    Ok(bytes)
}

/// Bundles the proposal PDF (when given) with every stored document.
///
/// Holder files are named `{kind}.{ext}` and dependent files `dependente_{n}_{kind}.{ext}`.
/// Files the store cannot return are skipped. An empty bundle is an error.
pub fn render_zip<D>(
    detail: &ProposalDetail,
    store: &D,
    pdf: Option<&ExportArtifact>,
) -> Result<ExportArtifact, ExportError>
where
    D: DocumentStore + ?Sized,
{
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    if let Some(pdf) = pdf {
        entries.push((pdf.file_name.clone(), pdf.bytes.clone()));
    }

    let mut collect = |prefix: String, documents: &DocumentSet| {
        for (kind, url) in documents.iter() {
            match store.get(url) {
                Ok(stored) => {
                    let ext = extension_for(&stored.content_type, url);
                    entries.push((format!("{prefix}{}.{ext}", kind.label()), stored.bytes));
                }
                Err(err) => tracing::warn!(
                    proposal_id = %detail.proposal.id,
                    document = kind.label(),
                    error = %err,
                    "skipping document missing from storage"
                ),
            }
        }
    };
    collect(String::new(), &detail.proposal.documents);
    for (index, dependent) in detail.dependents.iter().enumerate() {
        collect(
            format!("dependente_{}_", index + 1),
            &dependent.dependent.documents,
        );
    }

    if entries.is_empty() {
        return Err(ExportError::EmptyBundle);
    }

    let archive_error = |err: zip::result::ZipError| ExportError::Archive(err.to_string());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer.start_file(name, options).map_err(archive_error)?;
        writer
            .write_all(&bytes)
            .map_err(|err| ExportError::Archive(err.to_string()))?;
    }
    let cursor = writer.finish().map_err(archive_error)?;

    Ok(ExportArtifact {
        file_name: zip_file_name(detail.proposal.display_name(), &detail.proposal.id),
        content_type: "application/zip",
        bytes: cursor.into_inner(),
    })
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    cliente: &'a str,
    email: &'a str,
    telefone: &'a str,
    status: &'static str,
    origem: &'static str,
    corretor: &'a str,
    valor_total: &'a str,
    email_validacao_enviado: bool,
    criado_em: String,
}

/// CSV of the listing rows with a header line.
pub fn render_csv(
    rows: &[ProposalSummary],
    generated_at: DateTime<Utc>,
) -> Result<ExportArtifact, ExportError> {
    let csv_error = |err: csv::Error| ExportError::Csv(err.to_string());
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(CsvRow {
                id: &row.id.0,
                cliente: &row.client_name,
                email: &row.client_email,
                telefone: &row.client_phone,
                status: row.status.label(),
                origem: row.origin.label(),
                corretor: row.broker_name.as_deref().unwrap_or(""),
                valor_total: &row.total_value,
                email_validacao_enviado: row.email_validation_sent,
                criado_em: row.created_at.to_rfc3339(),
            })
            .map_err(csv_error)?;
    }
    if rows.is_empty() {
        writer
            .write_record([
                "id",
                "cliente",
                "email",
                "telefone",
                "status",
                "origem",
                "corretor",
                "valor_total",
                "email_validacao_enviado",
                "criado_em",
            ])
            .map_err(csv_error)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Csv(err.to_string()))?;

    Ok(ExportArtifact {
        file_name: format!("propostas_{}.csv", generated_at.format("%Y%m%d_%H%M")),
        content_type: "text/csv; charset=utf-8",
        bytes,
    })
}
