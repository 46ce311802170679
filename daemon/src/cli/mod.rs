//! Subcommand implementations.

pub mod ingest;
pub mod notify;
pub mod run;
pub mod stats;
pub mod status;

/// Short relative duration like "5 minutes" or "2 hours".
pub fn humanize(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    let (value, unit) = if secs < 60 {
        (secs, "second")
    } else if secs < 3600 {
        (secs / 60, "minute")
    } else if secs < 86400 {
        (secs / 3600, "hour")
    } else {
        (secs / 86400, "day")
    };
    format!("{} {}{}", value, unit, if value == 1 { "" } else { "s" })
}

/// Play time as hours and minutes.
pub fn format_play_time(duration: chrono::Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}
