//! Job logging and subscriber setup
//!
//! [`Logger`] is the logger handed to a transfer job. It keeps the familiar
//! `info`/`warning`/`error` surface but emits [`tracing`] events, tagging each
//! one with the job identifier so interleaved jobs stay distinguishable.
//! [`init`] installs the process-wide subscriber used by the binary.

use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Logger responsible for job-scoped output
#[derive(Debug, Clone)]
pub struct Logger {
    job: String,
    verbose: bool,
    quiet: bool,
    start_time: Instant,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            job: "-".to_string(),
            verbose,
            quiet: false,
            start_time: Instant::now(),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            quiet: true,
            ..Self::new(false)
        }
    }

    /// Tags every event with the given job identifier
    pub fn for_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(job = %self.job, "{}", message);
    }

    /// Detailed information, only surfaced in verbose mode
    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            tracing::info!(job = %self.job, "{}", message);
        } else {
            tracing::trace!(job = %self.job, "{}", message);
        }
    }

    /// Information message
    pub fn info(&self, message: &str) {
        if !self.quiet {
            tracing::info!(job = %self.job, "{}", message);
        }
    }

    /// Step information
    pub fn step(&self, message: &str) {
        if !self.quiet {
            tracing::info!(job = %self.job, step = true, "{}", message);
        }
    }

    /// Success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            tracing::info!(job = %self.job, outcome = "success", "{}", message);
        }
    }

    /// Warning message
    pub fn warning(&self, message: &str) {
        tracing::warn!(job = %self.job, "{}", message);
    }

    /// Error message, never suppressed
    pub fn error(&self, message: &str) {
        tracing::error!(job = %self.job, "{}", message);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Format byte counts in human-readable units
    pub fn format_size(&self, bytes: u64) -> String {
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KB", bytes as f64 / 1024.0)
        } else if bytes < 1024 * 1024 * 1024 {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m{}s", secs / 60, secs % 60)
        } else {
            format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}

/// Installs the global fmt subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        let logger = Logger::new(false);
        assert_eq!(logger.format_size(512), "512 B");
        assert_eq!(logger.format_size(2048), "2.0 KB");
        assert_eq!(logger.format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        let logger = Logger::new_quiet();
        assert_eq!(logger.format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(logger.format_duration(Duration::from_secs(125)), "2m5s");
        assert_eq!(logger.format_duration(Duration::from_secs(3725)), "1h2m5s");
    }

    #[test]
    fn test_job_tag() {
        let logger = Logger::new(true).for_job("job-42");
        assert_eq!(logger.job(), "job-42");
        assert!(logger.is_verbose());
    }
}
