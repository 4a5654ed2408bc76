//! Binary entrypoint for the slideshow server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing::info;

use slideshow_server::config::Config;
use slideshow_server::gallery::Gallery;
use slideshow_server::slideshow::Slideshow;
use slideshow_server::{logging, web};

#[derive(Debug, Parser)]
#[command(name = "slideshow-server", version, about = "Photo slideshow server for a TV display")]
struct Cli {
    /// Path to YAML config file; built-in defaults are used when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Print the composed slides as JSON and exit
    #[arg(long = "slides-dry-run")]
    slides_dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    }
    .validated()
    .context("invalid configuration values")?;
    info!(
        data_dir = %cfg.data_dir.display(),
        uploads_dir = %cfg.uploads_dir.display(),
        timezone = %cfg.timezone,
        token = cfg.control_token.is_some(),
        "configuration loaded"
    );

    let gallery = Gallery::open(&cfg.data_dir, &cfg.uploads_dir)
        .with_context(|| format!("failed to open gallery in {}", cfg.data_dir.display()))?;
    let report = gallery.rescan().context("failed to scan uploads")?;
    info!(
        added = report.added.len(),
        removed = report.removed.len(),
        "startup rescan finished"
    );
    let slideshow = Arc::new(Slideshow::new(Arc::new(gallery), cfg.shuffle_seed));

    if cli.slides_dry_run {
        let view = slideshow.slides();
        println!("{}", serde_json::to_string_pretty(&view.slides)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        web::shutdown_signal().await;
        info!("shutdown requested");
        shutdown.cancel();
    });

    let state = web::AppState::new(slideshow, cfg.control_token.clone(), cfg.timezone);
    web::serve(state, cfg.socket_addr(), cancel).await
}
