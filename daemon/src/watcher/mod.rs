//! Log tailing, classification and session reconciliation.

pub mod file_watcher;
pub mod identity;
pub mod log_parser;
pub mod session_tracker;

pub use file_watcher::FileWatcher;
pub use log_parser::LogParser;
pub use session_tracker::{ProcessingStats, SessionTracker};
