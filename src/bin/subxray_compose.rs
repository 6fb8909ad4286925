//! `subxray-compose <source> <output>`: add inbounds and routing to an existing config.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

use subxray::{compose_from_source, logging, write_document, Settings};

/// Rebuild inbounds and routing around the outbounds of an Xray config.
#[derive(Debug, Parser)]
#[command(name = "subxray-compose", version)]
struct Cli {
    /// Existing config whose outbounds are kept.
    source: PathBuf,
    /// Where to write the generated config.
    output: PathBuf,
}

fn run(cli: &Cli) -> Result<()> {
    let settings = Settings::from_env()?;

    let raw = std::fs::read_to_string(&cli.source)
        .with_context(|| format!("failed to read {}", cli.source.display()))?;
    let source: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", cli.source.display()))?;

    let document = compose_from_source(source, &settings)?;
    write_document(&cli.output, &document)?;
    tracing::debug!("wrote {}", cli.output.display());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("subxray-compose error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
