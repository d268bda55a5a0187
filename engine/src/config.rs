use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Tunable behaviour of a [`Proxy`](crate::Proxy).
#[derive(Debug, Clone)]
pub struct Config {
    /// Shell command run for every spooled message, via `/bin/sh -c`.
    pub filter_command: String,

    /// How long the filter may run before it is killed and counted
    /// as failed.
    pub filter_timeout: Duration,

    /// Directory for spool files. Must be writable; spool files are
    /// removed when the message is done.
    pub spool_dir: PathBuf,

    /// Whether a failed filter (bad exit status, timeout, spawn error)
    /// rejects the message. When `false`, failure lets the message
    /// through unfiltered.
    pub reject_on_filter_failure: bool,

    /// Longest line buffered as one unit; longer input is handled in
    /// chunks of this size.
    pub max_line_length: usize,
}

impl Config {
    /// Configuration with defaults for everything but the filter command.
    #[must_use]
    pub fn new(filter_command: impl Into<String>) -> Self {
        Self {
            filter_command: filter_command.into(),
            filter_timeout: Duration::from_secs(30),
            spool_dir: env::temp_dir(),
            reject_on_filter_failure: false,
            max_line_length: 1024,
        }
    }
}
