use crate::config::{self, Cli, Config};
use crate::journal_reader::{JournalQuery, JournalReader};
use crate::patterns::PatternSet;
use crate::reporter::{self, Delivery};
use crate::state::{self, Paths};
use crate::types::{Cursor, Report};
use anyhow::{Context as _, Result};
use log::{debug, info, warn};
use tokio::io::AsyncWrite;

/// Per-run switches that do not live in the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Ignore the saved cursor and read from `Config::since` (or the start)
    pub ignore_cursor: bool,
    pub dry_run: bool,
}

/// Everything a run needs, loaded once up front.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub patterns: PatternSet,
    pub paths: Paths,
    pub options: RunOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub read: usize,
    pub ignored: usize,
    pub reported: usize,
    pub delivery: Delivery,
    /// Cursor saved at the end of the run
    pub cursor: Option<Cursor>,
}

impl Context {
    /// Write first-run defaults, then load config and patterns.
    ///
    /// Fails before any state is touched when the config or a pattern is
    /// malformed.
    pub async fn load(cli: &Cli) -> Result<Self> {
        let paths = Paths::resolve(cli)?;

        state::ensure_defaults(&paths)
            .await
            .context("Failed to write default configuration")?;

        let config = config::load_config(&paths.config_file, cli)?;
        info!("Configuration loaded from {}", paths.config_file.display());

        let patterns = PatternSet::load(&paths.pattern_file)?;
        if patterns.is_empty() {
            warn!("No ignore patterns in {}, every entry will be reported", paths.pattern_file.display());
        } else {
            info!("Loaded {} pattern blocks", patterns.len());
        }

        // The saved cursor is only replaced once a run completes
        if cli.reset {
            info!("Ignoring saved cursor {}", paths.cursor_file.display());
        }

        Ok(Self {
            config,
            patterns,
            paths,
            options: RunOptions {
                ignore_cursor: cli.reset || cli.since.is_some(),
                dry_run: cli.dry_run,
            },
        })
    }
}

/// Read new entries, report the ones no pattern ignores, then save the
/// position of the last entry read.
///
/// The cursor is only saved once the report has been delivered; any error
/// before that leaves the saved cursor untouched so the next run reads the
/// same entries again.
pub async fn run_once<W>(ctx: &Context, out: &mut W) -> Result<RunSummary>
where
    W: AsyncWrite + Unpin,
{
    let after_cursor = if ctx.options.ignore_cursor {
        None
    } else {
        state::load_cursor(&ctx.paths.cursor_file).await?
    };

    match after_cursor {
        Some(ref cursor) => debug!("Resuming after cursor {}", cursor),
        None => info!("No saved cursor, reading from {}", ctx.config.since.as_deref().unwrap_or("the beginning")),
    }

    let query = JournalQuery {
        after_cursor,
        since: ctx.config.since.clone(),
        priority: ctx.config.priority,
    };

    let mut reader = JournalReader::spawn(&ctx.config.journal.command, &query)?;

    let mut report = Report::new();
    let mut last_cursor = None;
    let mut read = 0;
    let mut ignored = 0;

    while let Some(entry) = reader.next_entry().await? {
        read += 1;
        if let Some(cursor) = entry.cursor() {
            last_cursor = Some(cursor);
        }

        if ctx.patterns.is_ignored(&entry) {
            ignored += 1;
        } else {
            report.push(entry);
        }
    }

    reader.finish().await?;
    info!("Read {} entries, {} ignored, {} to report", read, ignored, report.len());

    let delivery = reporter::deliver(&ctx.config, &report, out)
        .await
        .context("Failed to deliver report")?;

    let cursor = match last_cursor {
        Some(cursor) if !ctx.options.dry_run => {
            state::save_cursor(&ctx.paths.cursor_file, &cursor).await?;
            Some(cursor)
        }
        Some(_) => {
            info!("Dry run, not saving cursor");
            None
        }
        None => None,
    };

    Ok(RunSummary {
        read,
        ignored,
        reported: report.len(),
        delivery,
        cursor,
    })
}
