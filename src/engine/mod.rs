//! The feed-watching core: novelty decision, paced delivery and the run loop.

mod dedup;
mod delivery;
mod orchestrator;

use std::time::Duration;

use crate::config::Config;

pub use dedup::{select_new, DedupOutcome};
pub use delivery::{DeliveryPipeline, DeliveryReport};
pub use orchestrator::{
    FeedCheckError, FeedOutcome, Orchestrator, RunError, RunMode, RunReport, RunStatistics,
};

/// Pacing and alerting knobs for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Pause between two posts of the same feed
    pub entry_delay: Duration,
    /// Pause between two feeds
    pub feed_delay: Duration,
    /// Consecutive failed feeds that trigger the operator alert (0 disables it)
    pub failure_alert_threshold: usize,
    /// Write dedup state and check times back to the store
    pub commit_state: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            entry_delay: Duration::from_secs(1),
            feed_delay: Duration::from_secs(2),
            failure_alert_threshold: 3,
            commit_state: true,
        }
    }
}

impl EngineSettings {
    /// No pacing at all.
    pub fn unpaced() -> Self {
        Self {
            entry_delay: Duration::ZERO,
            feed_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Unpaced, and nothing is written back: a later real run still sees
    /// every entry the dry run logged as new.
    pub fn dry_run() -> Self {
        Self {
            commit_state: false,
            ..Self::unpaced()
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            entry_delay: Duration::from_millis(config.delivery_delay_ms),
            feed_delay: Duration::from_millis(config.feed_delay_ms),
            failure_alert_threshold: config.failure_alert_threshold as usize,
            commit_state: true,
        }
    }
}
