use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use prospector_common::Config;
use prospector_compactor::{CompactionReport, Compactor, IndexSpec};
use prospector_storage::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Target {
    /// Business listings from list scrapes.
    Prospects,
    /// This node's closed WAL days.
    FieldState,
    All,
}

/// Merge scattered index output into checkpoints.
#[derive(Debug, Parser)]
#[command(name = "compact", version)]
struct Cli {
    /// Which index to compact.
    #[arg(long, value_enum, default_value = "all")]
    index: Target,

    /// Campaign to compact. Defaults to PROSPECTOR_CAMPAIGN.
    #[arg(long)]
    campaign: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the JSON result.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("prospector=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = run(&cli).await;
    if let Err(e) = &outcome {
        error!(error = %e, "Compaction failed");
    }
    println!("{}", result_document(&outcome));
    if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// `{"status": "ok", "reports": [...]}` or `{"status": "error", "message": ...}`.
fn result_document(outcome: &Result<Vec<CompactionReport>>) -> serde_json::Value {
    match outcome {
        Ok(reports) => json!({ "status": "ok", "reports": reports }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn run(cli: &Cli) -> Result<Vec<CompactionReport>> {
    let config = Config::compactor_from_env(cli.campaign.as_deref())?;
    config.log_redacted();

    let mut reports = Vec::new();
    if matches!(cli.index, Target::Prospects | Target::All) {
        let shared = Compactor::new(prospector_storage::from_config(&config)?, &config.node_id);
        let report = shared.compact(&IndexSpec::prospects(&config.campaign)).await?;
        info!("{report}");
        reports.push(report);
    }
    if matches!(cli.index, Target::FieldState | Target::All) {
        let local = Compactor::new(Arc::new(LocalStore::new(&config.data_root)), &config.node_id);
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let report = local.compact_field_state(&today).await?;
        info!("{report}");
        reports.push(report);
    }
    Ok(reports)
}
