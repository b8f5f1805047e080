// 🧾 EDI Orchestrator - Command Line
// Run documents through the pipeline and inspect the audit store without the HTTP server.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use edi_orchestrator::{
    db, init_logging, AppConfig, EdiStatus, IngestRequest, LogConfig, Orchestrator, PipelineOutcome,
};

#[derive(Debug, Parser)]
#[command(name = "edi-orchestrator", version, about = "Retail EDI ingestion and audit tooling")]
struct Cli {
    /// SQLite audit database
    #[arg(long, global = true, env = "EDI_DB_PATH")]
    db: Option<PathBuf>,

    /// Directory of mapping profiles
    #[arg(long, global = true, env = "EDI_MAPPINGS_DIR")]
    mappings: Option<PathBuf>,

    /// Root of the inbound file store
    #[arg(long, global = true, env = "EDI_STORAGE_DIR")]
    storage: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one EDI file through the full pipeline
    Ingest {
        /// Retailer that sent the file (e.g. TARGET)
        #[arg(long)]
        retailer: String,
        /// Raw X12 file
        file: PathBuf,
        /// Name recorded in the audit trail (defaults to the file's name)
        #[arg(long)]
        file_name: Option<String>,
    },
    /// Print the audit trail of one document
    Audit { correlation_id: String },
    /// Count documents by their latest status
    Summary,
    /// List loaded mapping profiles, or show one
    Profiles {
        retailer: Option<String>,
        transaction_set: Option<String>,
    },
    /// List quarantined documents
    DeadLetters,
    /// Write every audit record to a CSV file
    ExportAudit { csv_path: PathBuf },
    /// Delete all audit records (local and test environments only)
    Purge,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = AppConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(mappings) = cli.mappings {
        config.mappings_dir = mappings;
    }
    if let Some(storage) = cli.storage {
        config.storage_dir = storage;
    }
    config.log_json |= cli.json_logs;

    init_logging(&LogConfig::from_verbosity(cli.verbose, config.log_json))?;

    let orchestrator = Orchestrator::from_config(&config)?;

    match cli.command {
        Command::Ingest {
            retailer,
            file,
            file_name,
        } => run_ingest(&orchestrator, &retailer, &file, file_name),
        Command::Audit { correlation_id } => {
            run_audit(&orchestrator, &correlation_id)?;
            Ok(0)
        }
        Command::Summary => {
            run_summary(&orchestrator)?;
            Ok(0)
        }
        Command::Profiles {
            retailer,
            transaction_set,
        } => {
            run_profiles(&orchestrator, retailer.as_deref(), transaction_set.as_deref())?;
            Ok(0)
        }
        Command::DeadLetters => {
            run_dead_letters(&orchestrator)?;
            Ok(0)
        }
        Command::ExportAudit { csv_path } => {
            let count = orchestrator
                .tracker()
                .with_connection(|conn| db::export_audit_csv(conn, &csv_path))?;
            println!("✓ Exported {} audit records to {}", count, csv_path.display());
            Ok(0)
        }
        Command::Purge => {
            let deleted = orchestrator.tracker().purge(config.environment)?;
            println!("🗑️  Purged {} audit records ({})", deleted, config.environment.as_str());
            Ok(0)
        }
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run_ingest(
    orchestrator: &Orchestrator,
    retailer: &str,
    file: &Path,
    file_name: Option<String>,
) -> Result<i32> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read EDI file: {}", file.display()))?;
    let file_name = file_name.or_else(|| {
        file.file_name()
            .map(|name| name.to_string_lossy().into_owned())
    });

    println!("📥 Ingesting {} for {}", file.display(), retailer);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let outcome = orchestrator.ingest(IngestRequest {
        retailer_id: retailer.to_string(),
        edi_content: content,
        file_name,
    })?;

    match &outcome {
        PipelineOutcome::Acknowledged {
            correlation_id,
            po_number,
            line_count,
            external_id,
        } => {
            println!("✅ ACKNOWLEDGED");
            println!("   Correlation: {}", correlation_id);
            println!("   PO:          {} ({} lines)", po_number, line_count);
            println!("   Downstream:  {}", external_id);
        }
        PipelineOutcome::Failed {
            correlation_id,
            failed_from,
            message,
            error_detail,
        } => {
            println!("❌ FAILED from {}", failed_from);
            println!("   Correlation: {}", correlation_id);
            println!("   {}", message);
            println!("   {}", error_detail);
        }
    }

    Ok(if outcome.status() == EdiStatus::Acknowledged { 0 } else { 2 })
}

fn run_audit(orchestrator: &Orchestrator, correlation_id: &str) -> Result<()> {
    let history = orchestrator.tracker().history(correlation_id)?;
    if history.is_empty() {
        bail!("no audit records for correlation id {}", correlation_id);
    }

    println!("🔎 Audit trail for {}", correlation_id);
    for log in &history {
        let duration = log
            .duration_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {:<12} {:>7}  {}",
            db::format_timestamp(&log.created_at),
            log.status,
            duration,
            log.message
        );
        if let Some(detail) = &log.error_detail {
            println!("      ⚠️  {}", detail);
        }
    }
    Ok(())
}

fn run_summary(orchestrator: &Orchestrator) -> Result<()> {
    let summary = orchestrator.tracker().summary()?;

    println!("📊 Documents by latest status");
    for status in EdiStatus::ALL {
        println!("  {:<12} {:>6}", status, summary.count(status));
    }
    println!("  ─────────────────────");
    println!("  {:<12} {:>6}", "TOTAL", summary.total());
    println!("  {:<12} {:>6}", "IN FLIGHT", summary.in_flight());
    Ok(())
}

fn run_profiles(
    orchestrator: &Orchestrator,
    retailer: Option<&str>,
    transaction_set: Option<&str>,
) -> Result<()> {
    let registry = orchestrator.registry();

    if let Some(retailer) = retailer {
        let code = transaction_set.unwrap_or("850");
        let profile = registry.require(retailer, code)?;
        println!("{}", serde_json::to_string_pretty(profile)?);
        return Ok(());
    }

    println!("🗂️  {} mapping profiles", registry.len());
    for (key, profile) in registry.all() {
        println!(
            "  {:<16} v{:<6} {} header / {} line rules  {}",
            key,
            profile.version,
            profile.header_mappings.len(),
            profile.line_mappings.len(),
            profile.description
        );
    }
    Ok(())
}

fn run_dead_letters(orchestrator: &Orchestrator) -> Result<()> {
    let entries = orchestrator.tracker().dead_letters()?;
    println!("☠️  {} quarantined documents", entries.len());
    for entry in &entries {
        println!(
            "  {}  {}  {}  {}",
            db::format_timestamp(&entry.created_at),
            entry.correlation_id,
            entry.retailer_id,
            entry.file_name
        );
        println!("      {}", entry.error_report);
    }
    Ok(())
}
