//! Login notification fan-out.
//!
//! The ingestion loop hands notifications to a bounded queue and never waits:
//! when the queue is full the notification is dropped. A separate worker
//! drains the queue and delivers to every enabled subscriber that has not
//! muted the player. Delivery is at most once.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::storage::{Identity, StorageError, SubscriptionStore};

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("outbox lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginNotification {
    pub identity: Identity,
    pub name: String,
}

/// Where notifications end up. Implementations must not block for long;
/// the worker delivers to subscribers one after another.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, chat_id: i64, note: &LoginNotification) -> Result<(), FanoutError>;
}

/// Non-blocking producer side of the queue.
#[derive(Clone)]
pub struct LoginNotifier {
    tx: mpsc::Sender<LoginNotification>,
}

impl LoginNotifier {
    /// Enqueue without waiting. Returns false if the notification was dropped.
    pub fn notify(&self, note: LoginNotification) -> bool {
        match self.tx.try_send(note) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(note)) => {
                warn!(name = %note.name, "Notification queue full, dropping login notification");
                false
            }
            Err(mpsc::error::TrySendError::Closed(note)) => {
                debug!(name = %note.name, "Notification worker gone, dropping login notification");
                false
            }
        }
    }
}

/// Start the delivery worker. It stops on shutdown or once every
/// [`LoginNotifier`] has been dropped and the queue is drained.
pub fn spawn_fanout<St, K>(
    capacity: usize,
    store: Arc<St>,
    sink: Arc<K>,
    mut shutdown: watch::Receiver<bool>,
) -> (LoginNotifier, JoinHandle<()>)
where
    St: SubscriptionStore + Send + Sync + 'static,
    K: NotificationSink + ?Sized + 'static,
{
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(note) => deliver_to_subscribers(store.as_ref(), sink.as_ref(), &note),
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Notification worker stopped");
    });
    (LoginNotifier { tx }, handle)
}

fn deliver_to_subscribers<St, K>(store: &St, sink: &K, note: &LoginNotification)
where
    St: SubscriptionStore + ?Sized,
    K: NotificationSink + ?Sized,
{
    let subscribers = match store.list_subscribers() {
        Ok(subscribers) => subscribers,
        Err(e) => {
            warn!(error = %e, "Failed to list notification subscribers");
            return;
        }
    };

    for chat_id in subscribers {
        match store.is_suppressed(chat_id, &note.identity) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                warn!(chat_id, error = %e, "Failed to check suppression list");
                continue;
            }
        }
        if let Err(e) = sink.deliver(chat_id, note) {
            warn!(chat_id, error = %e, "Failed to deliver login notification");
        }
    }
}

/// Writes deliveries to the daemon log.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, chat_id: i64, note: &LoginNotification) -> Result<(), FanoutError> {
        info!(chat_id, name = %note.name, identity = %note.identity, "Player joined the server");
        Ok(())
    }
}

#[derive(Serialize)]
struct OutboxEntry<'a> {
    chat_id: i64,
    identity: &'a str,
    name: &'a str,
    text: String,
    sent_at: chrono::DateTime<chrono::Utc>,
}

/// Appends one JSON object per delivery to a file that an external bot
/// process reads.
pub struct OutboxSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl OutboxSink {
    pub fn open(path: &Path) -> Result<Self, FanoutError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NotificationSink for OutboxSink {
    fn deliver(&self, chat_id: i64, note: &LoginNotification) -> Result<(), FanoutError> {
        let entry = OutboxEntry {
            chat_id,
            identity: note.identity.as_str(),
            name: &note.name,
            text: format!("Player {} joined the server", note.name),
            sent_at: chrono::Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = self.file.lock().map_err(|_| FanoutError::Poisoned)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
