//! upmux - post-upload media normalization and archival
//!
//! Invoked by the upload host once per finished file. Metadata the host
//! knows about the upload may be piped in on stdin as a JSON object.

use anyhow::Result;
use clap::Parser;
use std::io::{IsTerminal, Read};
use std::path::Path;
use tracing::{error, info};

use upmux::cli::Args;
use upmux::config::Config;
use upmux::logging;
use upmux::workflow::{Pipeline, RunOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };
    if args.dry_run {
        config.remote.dry_run = true;
    }

    // Setup logging to both console and file; dropping the guard flushes the file
    let _log_guard = logging::init(&config, args.verbose)?;

    let host_metadata = read_host_metadata()?;

    let pipeline = Pipeline::new(config)?;
    let outcome = match pipeline.run(&args.media, host_metadata.as_deref()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Run failed: {}", e);
            return Err(e.into());
        }
    };
    match outcome {
        RunOutcome::Uploaded { id, shipped } => info!("{}: shipped {} files", id, shipped),
        RunOutcome::DryRun { id, command } => info!("{}: dry run, would run {}", id, command),
        RunOutcome::AlreadyProcessed => info!("Nothing to do"),
        RunOutcome::Unresolved => info!("Skipped: no identifier"),
        RunOutcome::Quarantined { verdict } => info!("Quarantined: {}", verdict),
    }

    Ok(())
}

/// Whatever the host piped in; nothing when stdin is a terminal
fn read_host_metadata() -> Result<Option<Vec<u8>>> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut bytes = Vec::new();
    stdin.read_to_end(&mut bytes)?;
    Ok((!bytes.is_empty()).then_some(bytes))
}
