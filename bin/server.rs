// 🌐 EDI Orchestrator - Web Server
// REST API over the pipeline, the audit store and the mapping registry

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use edi_orchestrator::api::{self, AppState};
use edi_orchestrator::{init_logging, AppConfig, LogConfig, Orchestrator, VERSION};

#[derive(Debug, Parser)]
#[command(name = "edi-server", version, about = "HTTP server for the EDI orchestrator")]
struct Args {
    /// Address to listen on (overrides EDI_BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    // The server logs at info unless asked for more
    init_logging(&LogConfig::from_verbosity(args.verbose.max(1), config.log_json))?;

    let orchestrator = Orchestrator::from_config(&config)?;
    info!(
        version = VERSION,
        environment = config.environment.as_str(),
        db = %config.db_path.display(),
        profiles = orchestrator.registry().len(),
        storage = %config.storage_dir.display(),
        "orchestrator ready"
    );

    let state = AppState {
        orchestrator,
        environment: config.environment,
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    println!("🚀 EDI orchestrator listening on http://{}", config.bind_addr);
    println!("   Ingest: POST /api/v1/edi/ingest");
    println!("   Health: GET  /api/health");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
