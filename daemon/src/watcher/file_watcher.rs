//! Polling tail of a single, occasionally rotated log file.

use std::fs::{self, File, Metadata};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// On-disk identity of a file. A change at the same path means rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &Metadata) -> Self {
        let created = meta
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self { dev: 0, ino: created }
    }
}

/// Delivers complete, newly appended lines in file order.
///
/// The cursor starts at end-of-file, so nothing written before [`FileWatcher::open`]
/// is ever replayed. Only lines terminated by `\n` are delivered; a trailing
/// fragment waits for a later poll.
pub struct FileWatcher {
    path: PathBuf,
    poll_interval: Duration,
    file: Option<File>,
    file_id: Option<FileId>,
    cursor: u64,
    /// Set while the path cannot be stat'ed; repeats log at debug.
    stat_failing: bool,
}

impl FileWatcher {
    pub fn open(path: &Path, poll_interval: Duration) -> io::Result<Self> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        Ok(Self {
            path: path.to_path_buf(),
            poll_interval,
            file: Some(file),
            file_id: Some(FileId::of(&meta)),
            cursor: meta.len(),
            stat_failing: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Poll until `shutdown` flips to true. A batch of lines is always
    /// finished before shutdown is looked at again.
    pub async fn run<F>(&mut self, mut shutdown: watch::Receiver<bool>, mut on_line: F)
    where
        F: FnMut(&str),
    {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(16);
        let _fs_watcher = self.watch_parent(wake_tx);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(path = %self.path.display(), cursor = self.cursor, "Tailing log file");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                Some(()) = wake_rx.recv() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.poll_once(&mut on_line);
        }

        self.file = None;
        info!(path = %self.path.display(), "Stopped tailing log file");
    }

    /// One poll tick. Returns how many lines were delivered.
    pub fn poll_once<F>(&mut self, on_line: &mut F) -> usize
    where
        F: FnMut(&str),
    {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) => {
                if self.stat_failing {
                    debug!(path = %self.path.display(), error = %e, "Log file still unavailable");
                } else {
                    warn!(path = %self.path.display(), error = %e, "Cannot stat log file");
                    self.stat_failing = true;
                }
                return 0;
            }
        };
        if self.stat_failing {
            info!(path = %self.path.display(), "Log file available again");
            self.stat_failing = false;
        }

        let mut delivered = 0;
        let current = FileId::of(&meta);

        if self.file.is_none() || self.file_id != Some(current) {
            if let Some(old) = self.file.as_mut() {
                // The rotated-away file may still hold lines we have not seen.
                delivered += read_lines(old, &mut self.cursor, on_line);
                info!(
                    path = %self.path.display(),
                    drained = delivered,
                    "Log file rotated, reopening"
                );
            }
            self.file = None;
            if !self.reopen() {
                return delivered;
            }
        } else if meta.len() < self.cursor {
            warn!(
                path = %self.path.display(),
                cursor = self.cursor,
                len = meta.len(),
                "Log file truncated, restarting from the beginning"
            );
            self.cursor = 0;
        }

        if let Some(file) = self.file.as_mut() {
            delivered += read_lines(file, &mut self.cursor, on_line);
        }
        delivered
    }

    fn reopen(&mut self) -> bool {
        let opened = File::open(&self.path).and_then(|file| {
            let meta = file.metadata()?;
            Ok((file, FileId::of(&meta)))
        });
        match opened {
            Ok((file, id)) => {
                self.file = Some(file);
                self.file_id = Some(id);
                self.cursor = 0;
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot reopen log file");
                false
            }
        }
    }

    /// Filesystem events only shorten the wait; the ticker alone is enough
    /// for correctness, so failing to watch is not fatal.
    fn watch_parent(&self, wake: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) {
                    let _ = wake.try_send(());
                }
            }
        });
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                debug!(error = %e, "Filesystem watcher unavailable, polling only");
                return None;
            }
        };
        if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
            debug!(dir = %dir.display(), error = %e, "Cannot watch log directory, polling only");
            return None;
        }
        Some(watcher)
    }
}

/// Read complete lines from `cursor` to EOF, advancing `cursor` past each one.
fn read_lines<F>(file: &mut File, cursor: &mut u64, on_line: &mut F) -> usize
where
    F: FnMut(&str),
{
    if let Err(e) = file.seek(SeekFrom::Start(*cursor)) {
        warn!(error = %e, "Cannot seek in log file");
        return 0;
    }

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut delivered = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if buf.last() != Some(&b'\n') {
                    break;
                }
                *cursor += n as u64;
                let text = String::from_utf8_lossy(&buf);
                on_line(text.trim_end_matches(['\n', '\r']));
                delivered += 1;
            }
            Err(e) => {
                warn!(error = %e, "Error reading log file");
                break;
            }
        }
    }
    delivered
}
