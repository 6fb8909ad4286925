//! `subxray-links <input> <output>`: build an Xray config from a subscription dump.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use subxray::{compose_from_links, logging, write_document, Settings};

/// Build an Xray config from vless/vmess/trojan/ss/ssr links.
#[derive(Debug, Parser)]
#[command(name = "subxray-links", version)]
struct Cli {
    /// Subscription text: plain, markdown, HTML or base64.
    input: PathBuf,
    /// Where to write the generated config.
    output: PathBuf,
}

fn run(cli: &Cli) -> Result<()> {
    let settings = Settings::from_env()?;

    let raw = std::fs::read(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let text = subxray_links::unescape_html(&String::from_utf8_lossy(&raw));
    let links = subxray_links::find_links(&text)?;
    tracing::info!("found {} links in {}", links.len(), cli.input.display());

    let composed = compose_from_links(&links, &settings)?;
    write_document(&cli.output, &composed.document)?;

    println!(
        "{} links_found={} outbounds_ok={} wrote={}",
        console::style("[OK]").green().bold(),
        links.len(),
        composed.document.proxy_outbound_count(),
        cli.output.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("subxray-links error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
