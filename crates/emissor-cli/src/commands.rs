use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, FixedOffset, Local, Utc};
use colored::Colorize;
use tracing::debug;

use emissor_crypto::{
    load_trust_store, CertificateAuthority, CredentialFile, FileCredentialProvider, Signer,
    SigningCredential, SigningKey, TrustStore,
};
use emissor_document::ValidatorChain;
use emissor_ledger::{EntryStatus, LedgerEntry};
use emissor_pipeline::{
    AuditReport, Orchestrator, PipelineComponents, PrepareError, PreparedSubmission,
    SubmissionOutcome,
};
use emissor_store::{write_atomic, DataLayout};
use emissor_transport::HttpSender;
use emissor_types::{ClientId, DocumentModel, Invoice, InvoiceLine};

use crate::cli::*;
use crate::config::Settings;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    if let Command::Keygen(args) = &cli.command {
        return cmd_keygen(args, Settings::load(&cli.config).ok().as_ref());
    }

    let mut settings = Settings::load(&cli.config)?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    if let Some(environment) = cli.environment {
        settings.environment = environment;
    }
    let orchestrator = open_orchestrator(&settings)?;

    match cli.command {
        Command::Emit(args) => cmd_emit(&settings, &orchestrator, args).await,
        Command::List(args) => cmd_list(&orchestrator, args, cli.format),
        Command::LastOverride(args) => cmd_last_override(&orchestrator, args, cli.format),
        Command::Sequence(args) => cmd_sequence(&orchestrator, args),
        Command::Audit => cmd_audit(&orchestrator, cli.format),
        Command::Keygen(_) => Ok(()),
    }
}

fn hinted(err: impl std::fmt::Display, hint: &str) -> anyhow::Error {
    anyhow!("{err}\n  {} {hint}", "hint:".yellow())
}

fn open_orchestrator(settings: &Settings) -> anyhow::Result<Orchestrator> {
    debug!(
        data_dir = %settings.data_dir.display(),
        identity = %settings.identity(),
        "opening ledger"
    );
    let trust = load_trust_store(&settings.trust_store).map_err(|e| hinted(&e, e.hint()))?;
    let sender = match &settings.client_identity {
        Some(path) => {
            let pem = std::fs::read(path)
                .with_context(|| format!("cannot read client identity {}", path.display()))?;
            let identity = HttpSender::identity_from_pem(&pem)
                .with_context(|| format!("invalid client identity {}", path.display()))?;
            HttpSender::with_identity(Duration::from_secs(10), identity)
        }
        None => HttpSender::new(Duration::from_secs(10)),
    }
    .context("cannot build the HTTP client")?;
    let components = PipelineComponents {
        validator: Arc::new(ValidatorChain::standard()),
        credentials: Arc::new(FileCredentialProvider::new(&settings.credential)),
        signer: Signer::new(trust),
        sender: Arc::new(sender),
    };
    let orchestrator = Orchestrator::open(
        DataLayout::new(&settings.data_dir),
        settings.orchestrator_config(),
        components,
    )
    .map_err(|e| hinted(&e, e.hint()))?;

    if let Some(notice) = orchestrator.corruption() {
        eprintln!(
            "{} ledger was unreadable ({}); moved to {}",
            "warning:".yellow().bold(),
            notice.reason,
            notice.backup_path.display()
        );
    }
    Ok(orchestrator)
}

// ---- emit ----

async fn cmd_emit(settings: &Settings, orchestrator: &Orchestrator, args: EmitArgs) -> anyhow::Result<()> {
    let client = settings
        .client(&args.client)
        .cloned()
        .ok_or_else(|| unknown_client(settings, &args.client))?;
    let intermediary = args
        .intermediary
        .as_deref()
        .map(|id| settings.intermediary(id).ok_or_else(|| unknown_client(settings, id)))
        .transpose()?;

    let mut lines = Vec::new();
    if let (Some(description), Some(amount), Some(foreign_amount)) =
        (args.description, args.amount, args.foreign_amount)
    {
        lines.push(InvoiceLine {
            description,
            amount,
            foreign_amount,
        });
    }
    lines.extend(args.lines.into_iter().map(|l| InvoiceLine {
        description: l.description,
        amount: l.amount,
        foreign_amount: l.foreign_amount,
    }));
    if lines.is_empty() {
        bail!("nothing to invoice; pass --description/--amount/--foreign-amount or --line");
    }

    let mut overrides = BTreeMap::new();
    if !args.fresh {
        if let Some(previous) = orchestrator.last_override(&client.id)? {
            overrides = previous.overrides;
        }
    }
    overrides.extend(args.overrides);

    let now = Local::now();
    let model = DocumentModel {
        issuer: settings.issuer.clone(),
        client,
        intermediary,
        invoice: Invoice {
            competence: args.competence.unwrap_or_else(|| now.date_naive()),
            issued_at: DateTime::<FixedOffset>::from(now),
            lines,
            overrides,
        },
    };

    let prepared = orchestrator.prepare(&model).map_err(prepare_failure)?;
    print_prepared(orchestrator, &prepared);
    if let Some(intermediary) = &model.intermediary {
        println!("  Intermediary: {} ({})", intermediary.name, intermediary.tax_id);
    }

    if args.dry_run {
        let dir = args.export_dir.as_deref().unwrap_or(&settings.export_dir);
        let path = orchestrator.export_signed(&prepared, dir)?;
        orchestrator.abandon(prepared)?;
        println!("{} Signed document written to {}", "✓".green().bold(), path.display());
        println!("  Number withdrawn; nothing was sent.");
        return Ok(());
    }

    if !args.yes && !confirm(&format!("Send to {}?", orchestrator.config().endpoint.submit_url))? {
        let entry = orchestrator.abandon(prepared)?;
        println!("Withdrawn. Number {} stays consumed.", entry.sequence.to_string().yellow());
        return Ok(());
    }

    println!("Submitting...");
    let outcome = orchestrator.submit(prepared).await.map_err(|e| hinted(&e, e.hint()))?;
    print_outcome(&outcome);
    if let Some(path) = orchestrator.issued_document(outcome.entry()) {
        println!("  NFS-e:      {}", path.display());
    }
    match outcome {
        SubmissionOutcome::Confirmed(_) => Ok(()),
        SubmissionOutcome::Failed(entry) => bail!("document {} was not accepted", entry.sequence),
    }
}

fn unknown_client(settings: &Settings, id: &str) -> anyhow::Error {
    let known: Vec<&str> = settings.clients.iter().map(|c| c.id.as_str()).collect();
    anyhow!("unknown client `{id}`; configured: {}", known.join(", "))
}

fn prepare_failure(err: PrepareError) -> anyhow::Error {
    if let PrepareError::Invalid(build) = &err {
        eprintln!("{} the document has invalid fields:", "✗".red().bold());
        for v in &build.violations {
            eprintln!("  {} {}", v.field.bold(), v.reason);
        }
    }
    if let Some(sequence) = err.consumed_sequence() {
        eprintln!(
            "{} number {sequence} was consumed without a draft",
            "warning:".yellow().bold()
        );
    }
    hinted(&err, err.hint())
}

fn print_prepared(orchestrator: &Orchestrator, prepared: &PreparedSubmission) {
    let entry = prepared.entry();
    println!("{} Draft {} prepared", "✓".green().bold(), entry.sequence.to_string().yellow().bold());
    println!("  Document:    {}", entry.document_id.as_str().cyan());
    println!("  Environment: {}", orchestrator.identity().environment);
    println!("  Client:      {} ({})", entry.client.name, entry.client.id);
    println!("  Total:       BRL {} / {}", entry.total, entry.foreign_total);
    println!("  Competence:  {}", entry.competence);
    for (key, value) in &entry.overrides {
        println!("  {key}: {value}");
    }
    println!("  Digest:      {}", entry.digest.dimmed());
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "sim" | "s"))
}

fn print_outcome(outcome: &SubmissionOutcome) {
    let entry = outcome.entry();
    match &entry.status {
        EntryStatus::Confirmed(c) => {
            println!("{} Document {} accepted", "✓".green().bold(), entry.sequence.to_string().yellow());
            println!("  Access key: {}", c.access_key.cyan());
            println!("  Number:     {}", c.document_number);
            if let Some(message) = &c.message {
                println!("  Message:    {message}");
            }
            println!("  Attempts:   {}", c.attempts);
        }
        EntryStatus::Failed(f) => {
            eprintln!("{} Document {} failed: {}", "✗".red().bold(), entry.sequence, f.message);
            if let Some(endpoint) = &f.endpoint {
                eprintln!("  Endpoint: {endpoint}");
            }
            eprintln!("  Attempts: {}", f.attempts);
            eprintln!("  {} {}", "hint:".yellow(), f.hint);
        }
        EntryStatus::Draft => {}
    }
}

// ---- queries ----

fn cmd_list(orchestrator: &Orchestrator, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut entries: Vec<LedgerEntry> = orchestrator
        .list_entries()?
        .into_iter()
        .filter(|e| args.client.as_deref().map_or(true, |c| e.client.id.as_str() == c))
        .filter(|e| args.status.as_deref().map_or(true, |s| e.status.label() == s))
        .collect();
    if let Some(limit) = args.limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No entries for {}.", orchestrator.identity());
        return Ok(());
    }
    for e in &entries {
        println!(
            "{:>6}  {:<9}  {}  {:<12}  {:>12}  {}",
            e.sequence.to_string().yellow(),
            status_label(&e.status),
            e.document_id.as_str().dimmed(),
            e.client.id.as_str(),
            e.total.to_string(),
            e.competence
        );
    }
    Ok(())
}

fn status_label(status: &EntryStatus) -> colored::ColoredString {
    match status {
        EntryStatus::Draft => "draft".yellow(),
        EntryStatus::Confirmed(_) => "confirmed".green(),
        EntryStatus::Failed(_) => "failed".red(),
    }
}

fn cmd_last_override(orchestrator: &Orchestrator, args: LastOverrideArgs, format: OutputFormat) -> anyhow::Result<()> {
    let client = ClientId::new(args.client.as_str()).map_err(|e| anyhow!("{e}"))?;
    let entry = orchestrator.last_override(&client)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }
    match entry {
        None => println!("No history for {}.", client.as_str().bold()),
        Some(e) => {
            println!(
                "Latest for {}: {} ({}, {})",
                client.as_str().bold(),
                e.sequence.to_string().yellow(),
                status_label(&e.status),
                e.competence
            );
            if e.overrides.is_empty() {
                println!("  no overrides");
            }
            for (key, value) in &e.overrides {
                println!("  {key} = {value}");
            }
        }
    }
    Ok(())
}

fn cmd_sequence(orchestrator: &Orchestrator, args: SequenceArgs) -> anyhow::Result<()> {
    match args.action {
        SequenceAction::Show => {
            println!("Identity: {}", orchestrator.identity());
            println!("Last:     {}", orchestrator.current_sequence()?.to_string().bold());
            println!("Next:     {}", orchestrator.peek_next_sequence()?.to_string().yellow());
        }
        SequenceAction::Set { value } => {
            orchestrator
                .advance_sequence_to(value)
                .map_err(|e| hinted(&e, e.hint()))?;
            println!("{} Counter set to {}; next is {}", "✓".green().bold(), value, value + 1);
        }
    }
    Ok(())
}

fn cmd_audit(orchestrator: &Orchestrator, format: OutputFormat) -> anyhow::Result<()> {
    let report = orchestrator.audit()?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&audit_json(&report))?);
        return Ok(());
    }
    print!("{report}");
    if report.is_clean() {
        println!("{} Counter and ledger agree", "✓".green().bold());
        Ok(())
    } else {
        bail!("audit found inconsistencies")
    }
}

fn audit_json(report: &AuditReport) -> serde_json::Value {
    serde_json::json!({
        "identity": report.identity,
        "counter": report.counter,
        "highest_ledger_sequence": report.highest_ledger_sequence,
        "undrafted": report.undrafted,
        "undrafted_total": report.undrafted_total,
        "open_drafts": report.open_drafts,
        "counter_behind": report.counter_behind,
        "corruption_backup": report.corruption.as_ref().map(|c| c.backup_path.display().to_string()),
        "clean": report.is_clean(),
    })
}

// ---- keygen ----

fn cmd_keygen(args: &KeygenArgs, settings: Option<&Settings>) -> anyhow::Result<()> {
    let credential_path = args.out_dir.join("credential.json");
    let trust_path = args.out_dir.join("trust.json");
    for path in [&credential_path, &trust_path] {
        if path.exists() && !args.force {
            bail!("{} already exists; pass --force to replace it", path.display());
        }
    }
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("cannot create {}", args.out_dir.display()))?;

    let subject = args
        .subject
        .clone()
        .or_else(|| settings.map(|s| s.issuer.legal_name.clone()))
        .unwrap_or_else(|| "EMISSOR DEVELOPMENT".to_string());
    let (credential, trust) = development_credential(&subject, args.days);

    write_json(&credential_path, &CredentialFile::from_credential(&credential))?;
    write_json(&trust_path, &trust)?;

    println!("{} Development credential for {}", "✓".green().bold(), subject.bold());
    println!("  Credential:  {}", credential_path.display());
    println!("  Trust store: {}", trust_path.display());
    println!("  Valid until: {}", credential.certificate.not_after);
    println!("  {}", "Not accepted by the production service.".dimmed());
    Ok(())
}

fn development_credential(subject: &str, days: i64) -> (SigningCredential, TrustStore) {
    let ca = CertificateAuthority::generate("EMISSOR DEVELOPMENT ROOT");
    let key = SigningKey::generate();
    let now = Utc::now();
    let serial = u64::try_from(now.timestamp()).unwrap_or(1);
    let certificate = ca.issue(
        serial,
        subject,
        key.verifying_key(),
        now - chrono::Duration::minutes(5),
        now + chrono::Duration::days(days),
    );
    (SigningCredential { key, certificate }, TrustStore::new(vec![ca.root()]))
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).map_err(|e| hinted(&e, e.hint()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_credential_is_trusted_by_its_store() {
        let (credential, trust) = development_credential("ACME LTDA", 30);
        let signer = Signer::new(trust);
        assert!(signer.check_credential(&credential, Utc::now()).is_ok());
        assert_eq!(credential.certificate.subject, "ACME LTDA");
    }

    #[test]
    fn keygen_writes_loadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let args = KeygenArgs {
            out_dir: dir.path().join("keys"),
            subject: None,
            days: 10,
            force: false,
        };
        cmd_keygen(&args, None).unwrap();

        let trust = load_trust_store(&args.out_dir.join("trust.json")).unwrap();
        let provider = FileCredentialProvider::new(args.out_dir.join("credential.json"));
        let credential = emissor_crypto::CredentialProvider::signing_credential(&provider).unwrap();
        assert!(Signer::new(trust).check_credential(&credential, Utc::now()).is_ok());

        assert!(cmd_keygen(&args, None).is_err());
    }
}
