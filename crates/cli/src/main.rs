use anyhow::Context;
use clap::{Parser, Subcommand};
use fhir::{Bundle, BundleBuilder};
use scribe_core::{
    ConfidenceScorer, ConfigLayer, CoreConfig, Normalizer, Redactor, ReplayProvider,
    ReviewAction, ReviewDecision, ScribePipeline,
};
use scribe_types::NonEmptyText;
use scribe_uuid::TransactionId;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scribe")]
#[command(about = "Clinical scribe pipeline CLI")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory for the primary audit log
    #[arg(long, global = true)]
    audit_dir: Option<PathBuf>,
    /// Directory mirroring the audit log
    #[arg(long, global = true)]
    audit_mirror_dir: Option<PathBuf>,
    /// Directory for persisted FHIR bundles
    #[arg(long, global = true)]
    bundle_dir: Option<PathBuf>,
    /// Field confidence below this score needs review (1-100)
    #[arg(long, global = true)]
    confidence_threshold: Option<u8>,
    /// Value written to bundle meta.source
    #[arg(long, global = true)]
    source_tag: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mask PHI in a conversation and report residual risks
    Redact {
        /// Conversation file, or '-' for stdin
        input: PathBuf,
        /// Print the redaction audit and risk report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse and normalize a completion into a canonical record
    Normalize {
        /// Completion file, or '-' for stdin
        input: PathBuf,
    },
    /// Build a FHIR bundle from a completion or canonical record
    Build {
        /// Completion or record file, or '-' for stdin
        input: PathBuf,
        /// Transaction id written to bundle meta (generated if omitted)
        #[arg(long)]
        transaction_id: Option<String>,
        /// Reuse an existing Patient id
        #[arg(long)]
        patient_id: Option<String>,
        /// Reuse an existing Encounter id
        #[arg(long)]
        encounter_id: Option<String>,
    },
    /// Check the structure of a stored FHIR bundle
    Validate {
        /// Bundle file, or '-' for stdin
        input: PathBuf,
    },
    /// Score field confidence for a completion or canonical record
    Score {
        /// Completion or record file, or '-' for stdin
        input: PathBuf,
    },
    /// Run the full pipeline with a prerecorded completion
    Process {
        /// Conversation file, or '-' for stdin
        input: PathBuf,
        /// File holding the completion text to replay
        #[arg(long)]
        completion: PathBuf,
        /// Transaction id (generated if omitted)
        #[arg(long)]
        transaction_id: Option<String>,
    },
    /// Record a clinician's decision on a completed transaction
    Review {
        /// Transaction id
        transaction_id: String,
        /// approve, reject or flag_for_escalation
        action: ReviewAction,
        /// Reviewing clinician id
        #[arg(long)]
        clinician: String,
        /// Free-text notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print the audit report, optionally for one transaction
    Report {
        /// Transaction id
        #[arg(long)]
        transaction_id: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scribe=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command.as_ref() else {
        println!("Use 'scribe --help' for commands");
        return Ok(());
    };

    match command {
        Commands::Redact { input, json } => {
            let text = read_input(input)?;
            let redactor = Redactor::new()?;
            let (masked, audit) = redactor.deidentify(&text);
            let report = redactor.validate(&masked);

            if *json {
                let out = serde_json::json!({
                    "masked_text": masked,
                    "audit": audit,
                    "validation": report,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{masked}");
                eprintln!(
                    "Redactions: {} ({} risk(s) remaining)",
                    audit.total_redactions,
                    report.remaining_phi_risks.len()
                );
            }
        }
        Commands::Normalize { input } => {
            let normalized = Normalizer::normalize(&read_input(input)?)?;
            for warning in &normalized.report.warnings {
                eprintln!("warning: {warning}");
            }
            eprintln!("Parsed with strategy: {}", normalized.strategy);
            println!("{}", serde_json::to_string_pretty(&normalized.record)?);
        }
        Commands::Build {
            input,
            transaction_id,
            patient_id,
            encounter_id,
        } => {
            let config = resolve_config(&cli)?;
            let record = Normalizer::normalize(&read_input(input)?)?.record;
            let txn = TransactionId::resolve(transaction_id.as_deref())?;

            let (bundle, counts) = BundleBuilder::new(config.source_tag()).build(
                &record,
                &txn,
                patient_id.as_deref(),
                encounter_id.as_deref(),
            );
            let validation = bundle.validate();
            for error in &validation.errors {
                eprintln!("validation: {error}");
            }
            for (resource_type, count) in counts.iter() {
                eprintln!("  - {resource_type}: {count}");
            }
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
        Commands::Validate { input } => {
            let text = read_input(input)?;
            let value: serde_json::Value =
                serde_json::from_str(&text).context("bundle file is not JSON")?;
            let validation = Bundle::validate_value(&value);

            if validation.is_valid {
                let bundle = Bundle::parse(&text)?;
                println!("Bundle {} is valid", bundle.id);
                for (resource_type, count) in bundle.resource_counts().iter() {
                    println!("  - {resource_type}: {count}");
                }
            } else {
                for error in &validation.errors {
                    eprintln!("{error}");
                }
                anyhow::bail!("bundle failed validation");
            }
        }
        Commands::Score { input } => {
            let config = resolve_config(&cli)?;
            let record = Normalizer::normalize(&read_input(input)?)?.record;
            let profile = ConfidenceScorer::new(config.confidence_threshold()).score(&record);
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Commands::Process {
            input,
            completion,
            transaction_id,
        } => {
            let config = resolve_config(&cli)?;
            let conversation = read_input(input)?;
            let completion = std::fs::read_to_string(completion)
                .with_context(|| format!("failed to read {}", completion.display()))?;

            let pipeline =
                ScribePipeline::from_config(&config, Arc::new(ReplayProvider::new(completion)))?;
            let outcome = pipeline.process(&conversation, transaction_id.as_deref())?;

            let summary = serde_json::json!({
                "transaction_id": outcome.transaction_id,
                "state": outcome.state,
                "total_redactions": outcome.redaction.total_redactions,
                "validation_safe": outcome.phi_validation.is_safe,
                "strategy": outcome.strategy,
                "warnings": outcome.schema.warnings,
                "bundle_id": outcome.bundle.id,
                "resource_counts": outcome.resource_counts,
                "bundle_valid": outcome.bundle_validation.is_valid,
                "persisted": outcome.persisted,
                "confidence": outcome.confidence,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Review {
            transaction_id,
            action,
            clinician,
            notes,
        } => {
            let config = resolve_config(&cli)?;
            let pipeline = ScribePipeline::from_config(&config, Arc::new(ReplayProvider::new("")))?;
            let txn = TransactionId::parse(transaction_id)?;
            let decision = ReviewDecision {
                action: *action,
                clinician_id: NonEmptyText::new(clinician).context("clinician id is required")?,
                notes: notes.clone().filter(|n| !n.trim().is_empty()),
            };

            let event = pipeline.record_review(&txn, &decision)?;
            println!("Recorded {} for transaction {txn} ({})", action, event.event_id);
        }
        Commands::Report { transaction_id } => {
            let config = resolve_config(&cli)?;
            let pipeline = ScribePipeline::from_config(&config, Arc::new(ReplayProvider::new("")))?;
            print!("{}", pipeline.audit().report(transaction_id.as_deref())?);
        }
    }

    Ok(())
}

/// Flags override environment, which overrides the config file.
fn resolve_config(cli: &Cli) -> anyhow::Result<CoreConfig> {
    let flags = ConfigLayer {
        audit_log_dir: cli.audit_dir.clone(),
        mirror_audit_dir: cli.audit_mirror_dir.clone(),
        bundle_dir: cli.bundle_dir.clone(),
        confidence_threshold: cli.confidence_threshold,
        source_tag: cli.source_tag.clone(),
    };
    let env = ConfigLayer::from_env(|key| std::env::var(key).ok())?;
    let file = match &cli.config {
        Some(path) => ConfigLayer::from_yaml_file(path)?,
        None => ConfigLayer::default(),
    };

    Ok(CoreConfig::from_layers([flags, env, file])?)
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
