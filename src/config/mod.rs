//! Configuration
//!
//! CLI parsing and the typed settings derived from it.

pub mod cli;

pub use cli::Cli;

use std::time::Duration;

/// Timing knobs for the distribution protocol
///
/// The grace period is a heuristic, not a synchronization guarantee: the
/// coordinator cannot know how many workers exist, so it gives in-flight
/// workers a window to observe the poison pill before tearing the queue
/// service down.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Bounded wait per dequeue attempt when a queue is empty
    pub poll_backoff: Duration,

    /// Wait between enqueueing the poison pill and shutting down
    pub grace_period: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_backoff: Duration::from_secs(1),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl Settings {
    /// Build settings from parsed CLI arguments
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            poll_backoff: Duration::from_millis(cli.poll_backoff_ms),
            grace_period: Duration::from_millis(cli.grace_period_ms),
        }
    }
}
