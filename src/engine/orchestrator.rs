use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};

use super::dedup::{select_new, DedupOutcome};
use super::delivery::DeliveryPipeline;
use super::EngineSettings;
use crate::feed::{FeedError, FeedSource};
use crate::notify::Notifier;
use crate::storage::{DedupState, StateError, Subscription, SubscriptionStore};

/// Which subscriptions a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Every active subscription, by id.
    Full,
    /// At most one subscription: the active one checked least recently.
    Lightweight,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatistics {
    /// Feeds whose check completed, successfully or not
    pub feeds_processed: usize,
    pub feeds_failed: usize,
    pub entries_delivered: usize,
    pub delivery_failures: usize,
}

impl RunStatistics {
    /// Feed-level failures plus individual delivery failures.
    pub fn errors(&self) -> usize {
        self.feeds_failed + self.delivery_failures
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub stats: RunStatistics,
    /// The deadline expired before every selected feed was checked
    pub timed_out: bool,
    /// An operator alert was raised during the run
    pub alerted: bool,
}

/// Result of checking one feed successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOutcome {
    pub fetched: usize,
    pub new_entries: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Why one feed's check failed. Never aborts the run.
#[derive(Debug, Error)]
pub enum FeedCheckError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    /// Posts already made stay made; only the state advance was lost.
    #[error("Failed to save feed state: {source}")]
    State {
        #[source]
        source: StateError,
        delivered: usize,
        failed: usize,
    },
}

/// A run could not start at all.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Could not load subscriptions: {0}")]
    Subscriptions(#[source] StateError),
}

#[derive(Default)]
struct RunProgress {
    stats: RunStatistics,
    /// (feed name, reason) of the current unbroken failure streak
    streak: Vec<(String, String)>,
    alerted: bool,
}

/// Drives runs over the subscription list, one feed at a time.
pub struct Orchestrator {
    store: Arc<dyn SubscriptionStore>,
    source: Arc<dyn FeedSource>,
    notifier: Arc<dyn Notifier>,
    pipeline: DeliveryPipeline,
    settings: EngineSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        source: Arc<dyn FeedSource>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        let pipeline = DeliveryPipeline::new(Arc::clone(&notifier), settings.entry_delay);
        Self {
            store,
            source,
            notifier,
            pipeline,
            settings,
        }
    }

    /// Run once over the subscriptions selected by `mode`.
    ///
    /// Each feed's state is committed as soon as that feed finishes, so when
    /// `deadline` cuts the run short everything already checked stays
    /// consistent and the partial statistics are returned.
    ///
    /// # Errors
    ///
    /// [`RunError`] only when the subscription list itself cannot be read;
    /// an alert is attempted first. Per-feed problems are counted, not raised.
    pub async fn run(&self, mode: RunMode, deadline: Option<Instant>) -> Result<RunReport, RunError> {
        let subscriptions = match self.store.list_all().await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!(error = %e, "Run aborted: could not load subscriptions");
                if !self
                    .notifier
                    .alert(&format!("Feed run aborted: could not load subscriptions ({e})"))
                    .await
                {
                    tracing::warn!("Failed to deliver run-abort alert");
                }
                return Err(RunError::Subscriptions(e));
            }
        };

        let targets = select_targets(subscriptions, mode);
        tracing::info!(mode = ?mode, feeds = targets.len(), "Starting feed run");

        let mut progress = RunProgress::default();
        let completed = match deadline {
            Some(deadline) => {
                tokio::time::timeout_at(deadline, self.check_all(&targets, &mut progress))
                    .await
                    .is_ok()
            }
            None => {
                self.check_all(&targets, &mut progress).await;
                true
            }
        };

        let report = RunReport {
            stats: progress.stats,
            timed_out: !completed,
            alerted: progress.alerted,
        };

        if report.timed_out {
            tracing::warn!(
                processed = report.stats.feeds_processed,
                selected = targets.len(),
                "Run deadline reached, remaining feeds skipped"
            );
        }
        tracing::info!(
            feeds = report.stats.feeds_processed,
            delivered = report.stats.entries_delivered,
            errors = report.stats.errors(),
            "Feed run finished"
        );

        Ok(report)
    }

    /// Full runs every `every` until `shutdown` resolves. The first run
    /// starts immediately; a run that overruns the interval delays the next
    /// tick rather than stacking runs. Shutdown also abandons a run in
    /// progress, which is safe because state is committed per feed.
    pub async fn watch<F>(&self, every: Duration, run_budget: Option<Duration>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let deadline = run_budget.map(|budget| Instant::now() + budget);
            tokio::select! {
                _ = &mut shutdown => break,
                result = self.run(RunMode::Full, deadline) => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Scheduled run failed");
                    }
                }
            }
        }

        tracing::info!("Shutdown requested, leaving watch loop");
    }

    async fn check_all(&self, targets: &[Subscription], progress: &mut RunProgress) {
        for sub in targets {
            // Deliveries are tallied as they happen so a deadline that cuts
            // this feed short still reports the posts already made
            let result = self.check_feed_counted(sub, &mut progress.stats).await;
            progress.stats.feeds_processed += 1;

            match result {
                Ok(outcome) => {
                    progress.streak.clear();
                    tracing::info!(
                        feed_id = sub.id,
                        feed = %sub.name(),
                        fetched = outcome.fetched,
                        new = outcome.new_entries,
                        delivered = outcome.delivered,
                        "Feed checked"
                    );
                }
                Err(e) => {
                    progress.stats.feeds_failed += 1;
                    tracing::warn!(feed_id = sub.id, feed = %sub.name(), error = %e, "Feed check failed");
                    progress.streak.push((sub.name().to_string(), e.to_string()));
                    self.maybe_alert(progress).await;
                }
            }

            if !self.settings.feed_delay.is_zero() {
                tokio::time::sleep(self.settings.feed_delay).await;
            }
        }
    }

    async fn maybe_alert(&self, progress: &mut RunProgress) {
        let threshold = self.settings.failure_alert_threshold;
        if threshold == 0 || progress.alerted || progress.streak.len() < threshold {
            return;
        }
        progress.alerted = true;

        let mut text = format!("{} consecutive feed checks failed:", progress.streak.len());
        for (feed, reason) in &progress.streak {
            text.push_str(&format!("\n- {feed}: {reason}"));
        }

        if !self.notifier.alert(&text).await {
            tracing::warn!("Failed to deliver failure alert, continuing run");
        }
    }

    /// Fetch, dedup, deliver and commit one feed.
    ///
    /// A fetch or parse failure returns before anything is written, so the
    /// feed's stored state is exactly what it was.
    pub async fn check_feed(&self, sub: &Subscription) -> Result<FeedOutcome, FeedCheckError> {
        self.check_feed_counted(sub, &mut RunStatistics::default())
            .await
    }

    async fn check_feed_counted(
        &self,
        sub: &Subscription,
        tally: &mut RunStatistics,
    ) -> Result<FeedOutcome, FeedCheckError> {
        let feed = self.source.fetch(&sub.source_url).await?;
        let checked_at = Utc::now();
        let fetched = feed.entries.len();

        if feed.entries.is_empty() {
            self.commit(sub, None, checked_at)
                .await
                .map_err(|source| FeedCheckError::State {
                    source,
                    delivered: 0,
                    failed: 0,
                })?;
            return Ok(FeedOutcome::default());
        }

        let state = self.load_state(sub).await;
        let DedupOutcome {
            new_entries,
            next_state,
        } = select_new(feed.entries, &state);

        let report = self
            .pipeline
            .deliver_tracked(sub, &new_entries, |delivered| {
                if delivered {
                    tally.entries_delivered += 1;
                } else {
                    tally.delivery_failures += 1;
                }
            })
            .await;

        let changed = (next_state != state).then_some(&next_state);
        self.commit(sub, changed, checked_at)
            .await
            .map_err(|source| FeedCheckError::State {
                source,
                delivered: report.delivered,
                failed: report.failed,
            })?;

        Ok(FeedOutcome {
            fetched,
            new_entries: new_entries.len(),
            delivered: report.delivered,
            failed: report.failed,
        })
    }

    /// Record the check, and the new state when it moved. Dry runs write
    /// nothing so the entries they logged are still delivered later.
    async fn commit(
        &self,
        sub: &Subscription,
        state: Option<&DedupState>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        if !self.settings.commit_state {
            tracing::debug!(feed_id = sub.id, "Dry run, leaving feed state untouched");
            return Ok(());
        }
        match state {
            Some(state) => self.store.save_state(sub.id, state, checked_at).await,
            None => self.store.touch_checked(sub.id, checked_at).await,
        }
    }

    /// Stored state, or first-check state when it is missing, unreadable or
    /// of the wrong shape for the feed.
    async fn load_state(&self, sub: &Subscription) -> DedupState {
        match self.store.load_state(sub.id).await {
            Ok(Some(state)) if state.strategy() == sub.dedup_strategy => state,
            Ok(Some(state)) => {
                tracing::warn!(
                    feed_id = sub.id,
                    stored = %state.strategy(),
                    expected = %sub.dedup_strategy,
                    "Stored dedup state has the wrong shape, treating feed as never checked"
                );
                DedupState::fresh(sub.dedup_strategy)
            }
            Ok(None) => DedupState::fresh(sub.dedup_strategy),
            Err(e) => {
                tracing::warn!(
                    feed_id = sub.id,
                    error = %e,
                    "Could not read dedup state, treating feed as never checked"
                );
                DedupState::fresh(sub.dedup_strategy)
            }
        }
    }
}

fn select_targets(subscriptions: Vec<Subscription>, mode: RunMode) -> Vec<Subscription> {
    let mut active: Vec<Subscription> = subscriptions
        .into_iter()
        .filter(Subscription::is_active)
        .collect();
    active.sort_by_key(|s| s.id);

    match mode {
        RunMode::Full => active,
        RunMode::Lightweight => active
            .into_iter()
            .min_by_key(|s| (s.last_checked_at, s.id))
            .into_iter()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DedupStrategy, SubscriptionStatus};
    use chrono::{DateTime, TimeZone};

    fn sub(id: i64, status: SubscriptionStatus, checked: Option<i64>) -> Subscription {
        Subscription {
            id,
            source_url: format!("https://feed{id}.example.com/rss"),
            display_title: format!("Feed {id}"),
            custom_name: None,
            status,
            dedup_strategy: DedupStrategy::Watermark,
            added_at: Utc.timestamp_opt(0, 0).unwrap(),
            last_checked_at: checked.map(|s| -> DateTime<Utc> { Utc.timestamp_opt(s, 0).unwrap() }),
        }
    }

    #[test]
    fn test_full_mode_selects_active_by_id() {
        let subs = vec![
            sub(3, SubscriptionStatus::Active, None),
            sub(1, SubscriptionStatus::Active, Some(5)),
            sub(2, SubscriptionStatus::Paused, None),
        ];
        let ids: Vec<i64> = select_targets(subs, RunMode::Full).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_lightweight_prefers_never_checked() {
        let subs = vec![
            sub(1, SubscriptionStatus::Active, Some(100)),
            sub(2, SubscriptionStatus::Active, None),
            sub(3, SubscriptionStatus::Paused, None),
        ];
        let picked = select_targets(subs, RunMode::Lightweight);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, 2);
    }

    #[test]
    fn test_lightweight_picks_least_recently_checked() {
        let subs = vec![
            sub(1, SubscriptionStatus::Active, Some(300)),
            sub(2, SubscriptionStatus::Active, Some(100)),
            sub(3, SubscriptionStatus::Active, Some(200)),
        ];
        assert_eq!(select_targets(subs, RunMode::Lightweight)[0].id, 2);
    }

    #[test]
    fn test_lightweight_with_nothing_active() {
        let subs = vec![sub(1, SubscriptionStatus::Paused, None)];
        assert!(select_targets(subs, RunMode::Lightweight).is_empty());
    }

    #[test]
    fn test_errors_sum() {
        let stats = RunStatistics {
            feeds_processed: 4,
            feeds_failed: 1,
            entries_delivered: 3,
            delivery_failures: 2,
        };
        assert_eq!(stats.errors(), 3);
    }
}
