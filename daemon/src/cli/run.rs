//! `minetail run`: tail the server log until SIGINT or SIGTERM.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::error::Error;
use crate::fanout::{spawn_fanout, LogSink, NotificationSink, OutboxSink};
use crate::storage::SqliteStore;
use crate::watcher::{FileWatcher, LogParser, SessionTracker};

pub async fn run(config: &Config) -> Result<(), Error> {
    let log_path = config.log_path.clone().ok_or(Error::MissingLogPath)?;
    let mut watcher = FileWatcher::open(&log_path, config.poll_interval()).map_err(|source| {
        Error::LogUnavailable {
            path: log_path.clone(),
            source,
        }
    })?;
    info!(log = %watcher.path().display(), offset = watcher.cursor(), "Opened log file");

    let store = Arc::new(SqliteStore::open(&config.database)?);
    info!(db = %config.database.display(), "Opened database");

    let sink: Arc<dyn NotificationSink> = match &config.fanout.outbox {
        Some(path) => {
            let sink = OutboxSink::open(path)?;
            info!(outbox = %sink.path().display(), "Writing login notifications to outbox");
            Arc::new(sink)
        }
        None => Arc::new(LogSink),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (notifier, worker) = spawn_fanout(
        config.fanout.capacity,
        store.clone(),
        sink,
        shutdown_rx.clone(),
    );

    let parser = LogParser::new(config.clock_correction());
    info!(
        correction_hours = parser.clock_correction().num_hours(),
        "Clock correction applied to log times"
    );
    let mut tracker = SessionTracker::new(store, parser).with_notifier(notifier);
    tracker.seed()?;

    tokio::spawn(wait_for_signal(shutdown_tx));

    watcher
        .run(shutdown_rx, |line| tracker.process_line(line, Utc::now()))
        .await;

    let stats = tracker.stats();
    info!(
        lines = stats.lines,
        events = stats.events,
        failures = stats.failures,
        known_names = tracker.identities().len(),
        "Ingestion stopped"
    );

    drop(tracker);
    let _ = worker.await;
    Ok(())
}

async fn wait_for_signal(shutdown: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            _ => {
                tracing::warn!("Cannot register signal handlers, falling back to Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }

    let _ = shutdown.send(true);
}
