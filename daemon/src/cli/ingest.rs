//! `minetail ingest`: replay a whole log file through the tracker.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::config::Config;
use crate::error::Error;
use crate::storage::SqliteStore;
use crate::watcher::{LogParser, ProcessingStats, SessionTracker};

/// Reads from the start of `path`, including a final unterminated line.
/// No login notifications are sent for replayed history.
pub fn run(config: &Config, path: &Path) -> Result<ProcessingStats, Error> {
    let file = File::open(path).map_err(|source| Error::LogUnavailable {
        path: path.to_path_buf(),
        source,
    })?;

    let store = Arc::new(SqliteStore::open(&config.database)?);
    let mut tracker = SessionTracker::new(store, LogParser::new(config.clock_correction()));
    tracker.seed()?;

    for line in BufReader::new(file).split(b'\n') {
        let bytes = line?;
        let text = String::from_utf8_lossy(&bytes);
        tracker.process_line(text.trim_end_matches('\r'), Utc::now());
    }

    let stats = tracker.stats();
    info!(
        path = %path.display(),
        lines = stats.lines,
        events = stats.events,
        failures = stats.failures,
        "Ingested log file"
    );
    println!(
        "Processed {} lines ({} events, {} failures) from {}",
        stats.lines,
        stats.events,
        stats.failures,
        path.display()
    );
    Ok(stats)
}
