mod config;
mod error;
mod journal_reader;
mod patterns;
mod reporter;
mod state;
mod types;
mod watcher;

use anyhow::Result;
use clap::Parser;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let cli = config::Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    SimpleLogger::new().with_level(level).env().init()?;

    info!("Starting journalwatch");

    // Load configuration, patterns and first-run defaults
    let ctx = watcher::Context::load(&cli).await?;

    let mut stdout = tokio::io::stdout();
    let summary = watcher::run_once(&ctx, &mut stdout).await?;

    info!(
        "Done: {} read, {} ignored, {} reported ({:?}), cursor {:?}",
        summary.read, summary.ignored, summary.reported, summary.delivery, summary.cursor
    );

    Ok(())
}
