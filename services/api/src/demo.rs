use crate::infra::{InMemoryDocumentStore, InMemoryProposalRepository};
use clap::Args;
use proposta_digital::config::{EmailConfig, IntakeConfig};
use proposta_digital::error::AppError;
use proposta_digital::workflows::proposals::questionnaire::HEALTH_QUESTIONS;
use proposta_digital::workflows::proposals::service::NotificationOutcome;
use proposta_digital::workflows::proposals::{
    AddressDraft, Answer, BrokerContact, DependentDraft, DocumentKind, DocumentOwner,
    EmailFunctionClient, HolderDraft, ListQuery, ProposalDraft, ProposalService,
    SubmissionContext, UploadedFile,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Directory with files named after document kinds (rg_frente.pdf, cpf.jpg, ...).
    /// Missing kinds are replaced by placeholder PDFs.
    #[arg(long)]
    pub(crate) documents_dir: Option<PathBuf>,
    /// Holder CPF typed into the wizard
    #[arg(long, default_value = "111.444.777-35")]
    pub(crate) cpf: String,
    /// Add one dependent to the proposal
    #[arg(long)]
    pub(crate) with_dependent: bool,
    /// Reject the proposal with this reason instead of approving it
    #[arg(long)]
    pub(crate) reject: Option<String>,
    /// Write the exported PDF and ZIP into this directory
    #[arg(long)]
    pub(crate) output_dir: Option<PathBuf>,
}

type DemoService =
    ProposalService<InMemoryProposalRepository, InMemoryDocumentStore, EmailFunctionClient>;

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        documents_dir,
        cpf,
        with_dependent,
        reject,
        output_dir,
    } = args;

    let mailer = EmailFunctionClient::new(&EmailConfig {
        function_url: "http://localhost/functions/v1/resend-email".to_string(),
        api_key: None,
        timeout: Duration::from_secs(5),
        simulate: true,
    })?;
    let documents = Arc::new(InMemoryDocumentStore::default());
    let service = ProposalService::new(
        Arc::new(InMemoryProposalRepository::default()),
        documents.clone(),
        Arc::new(mailer),
        IntakeConfig::default(),
    );

    println!("Proposta digital demo");
    let draft = demo_draft(&service, &cpf, with_dependent)?;
    let respondents = draft.respondent_count();
    let dependents = draft.active_dependents().len();

    let session = service.open_session(Some(demo_broker())).session_id;
    service.update_draft(&session, draft)?;

    for _ in 0..3 {
        match service.advance(&session) {
            Ok(view) => println!(
                "- Step {}/{}: {}",
                view.wizard.step_number, view.wizard.total_steps, view.wizard.step_title
            ),
            Err(err) => {
                println!("  Wizard stopped: {err}");
                return Ok(());
            }
        }
    }

    for kind in DocumentKind::MANDATORY {
        let file = load_document(documents_dir.as_deref(), kind)?;
        println!(
            "  Attached {} ({}, {} bytes)",
            kind.display_label(),
            file.content_type,
            file.bytes.len()
        );
        service.attach_document(&session, DocumentOwner::Holder, kind, file)?;
    }
    for index in 0..dependents {
        let file = load_document(documents_dir.as_deref(), DocumentKind::RgFrente)?;
        service.attach_document(
            &session,
            DocumentOwner::Dependent { index },
            DocumentKind::RgFrente,
            file,
        )?;
    }
    let view = service.advance(&session)?;
    println!("- Step {}: {}", view.wizard.step_number, view.wizard.step_title);

    for _ in 0..respondents * HEALTH_QUESTIONS.len() {
        service.answer_question(&session, Answer::Nao, None)?;
        service.next_question(&session)?;
    }
    let view = service.advance(&session)?;
    if let Some(id) = &view.wizard.proposal_id {
        println!("  Draft record {id} stored before the preview");
    }
    for _ in 0..2 {
        let view = service.advance(&session)?;
        println!("- Step {}: {}", view.wizard.step_number, view.wizard.step_title);
    }

    let receipt = service
        .submit(
            &session,
            SubmissionContext {
                ip: Some("127.0.0.1".to_string()),
                user_agent: Some("proposta-digital-demo".to_string()),
            },
        )
        .await?;
    println!(
        "\nSubmitted proposal {} -> {} | total R$ {}",
        receipt.proposal_id,
        receipt.status.display_label(),
        receipt.total_value
    );
    for warning in &receipt.warnings {
        println!("  Warning: {warning}");
    }
    println!("  Broker notification: {}", describe(&receipt.broker_notification));

    let listing = service.list(&ListQuery::default())?;
    println!(
        "\nBack office: {} proposals | {} awaiting review | {} via broker",
        listing.stats.total, listing.stats.awaiting_review, listing.stats.via_broker
    );

    let decision = match reject {
        Some(reason) => service.reject(&receipt.proposal_id, &reason).await?,
        None => service.approve(&receipt.proposal_id).await?,
    };
    println!(
        "- Decision: {} | broker notification: {}",
        decision.status.display_label(),
        describe(&decision.broker_notification)
    );

    let pdf = service.export_pdf(&receipt.proposal_id)?;
    let bundle = service.export_zip(&receipt.proposal_id)?;
    println!(
        "- Exports: {} ({} bytes), {} ({} bytes)",
        pdf.file_name,
        pdf.bytes.len(),
        bundle.file_name,
        bundle.bytes.len()
    );
    println!("  {} documents held in memory", documents.len());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(&dir)?;
        for artifact in [&pdf, &bundle] {
            let path = dir.join(&artifact.file_name);
            std::fs::write(&path, &artifact.bytes)?;
            println!("  Wrote {}", path.display());
        }
    }

    Ok(())
}

fn demo_broker() -> BrokerContact {
    BrokerContact {
        id: Some("demo-corretor".to_string()),
        name: "Corretora Demonstração".to_string(),
        email: Some("corretor@example.com".to_string()),
    }
}

fn demo_draft(
    service: &DemoService,
    cpf: &str,
    with_dependent: bool,
) -> Result<ProposalDraft, AppError> {
    let template_id = service
        .templates()?
        .into_iter()
        .next()
        .map(|template| template.id.0)
        .unwrap_or_default();

    let mut draft = ProposalDraft {
        template_id,
        plan_code: "DEMO-200".to_string(),
        value: "389,90".to_string(),
        holder: HolderDraft {
            name: "Beatriz Ramos".to_string(),
            cpf: cpf.to_string(),
            rg: "45.678.912-3".to_string(),
            birth_date: "1988-04-21".to_string(),
            email: "beatriz@example.com".to_string(),
            phone: "(11) 91234-5678".to_string(),
            ..HolderDraft::default()
        },
        address: AddressDraft {
            cep: "04538-132".to_string(),
            street: "Avenida Brigadeiro Faria Lima".to_string(),
            number: "3477".to_string(),
            complement: None,
            neighborhood: "Itaim Bibi".to_string(),
            city: "São Paulo".to_string(),
            state: "SP".to_string(),
        },
        weight: "64".to_string(),
        height: "1,68".to_string(),
        signature: "data:image/png;base64,iVBORw0KGgo=".to_string(),
        ..ProposalDraft::default()
    };
    if with_dependent {
        draft.has_dependents = true;
        draft.dependents = vec![DependentDraft {
            name: "Lucas Ramos".to_string(),
            cpf: "529.982.247-25".to_string(),
            rg: "56.789.123-4".to_string(),
            birth_date: "2016-09-10".to_string(),
            relationship: "filho".to_string(),
            individual_value: Some("120,00".to_string()),
            ..DependentDraft::default()
        }];
    }
    Ok(draft)
}

/// Reads `<dir>/<kind>.*` when present, otherwise builds a placeholder PDF.
fn load_document(dir: Option<&Path>, kind: DocumentKind) -> Result<UploadedFile, AppError> {
    if let Some(dir) = dir {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let matches = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem == kind.label());
            if !matches || !path.is_file() {
                continue;
            }
            let content_type = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .essence_str()
                .to_string();
            let file_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(kind.label())
                .to_string();
            return Ok(UploadedFile {
                file_name,
                content_type,
                bytes: std::fs::read(&path)?,
            });
        }
    }

    Ok(UploadedFile {
        file_name: format!("{}.pdf", kind.label()),
        content_type: "application/pdf".to_string(),
        bytes: format!("%PDF-1.4\n% {} placeholder\n", kind.display_label()).into_bytes(),
    })
}

fn describe(outcome: &NotificationOutcome) -> String {
    match outcome {
        NotificationOutcome::NotRequired => "not required".to_string(),
        NotificationOutcome::Sent => "sent".to_string(),
        NotificationOutcome::Simulated => "simulated".to_string(),
        NotificationOutcome::Failed { reason } => format!("failed ({reason})"),
    }
}
