use std::sync::Arc;
use std::time::Duration;

use crate::feed::Entry;
use crate::notify::{Card, Message, Notifier};
use crate::storage::{DedupStrategy, Subscription};

/// What happened to one feed's new entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    /// Identities of entries that reached the channel; only filled for
    /// identity-strategy feeds.
    pub delivered_identities: Vec<String>,
}

/// Posts a feed's new entries one at a time, oldest first.
///
/// Each entry gets exactly one attempt. A failed post is logged and skipped;
/// it is not queued for a later run. Consecutive posts are spaced by
/// `entry_delay` to stay under the channel's rate limit.
#[derive(Clone)]
pub struct DeliveryPipeline {
    notifier: Arc<dyn Notifier>,
    entry_delay: Duration,
}

impl DeliveryPipeline {
    pub fn new(notifier: Arc<dyn Notifier>, entry_delay: Duration) -> Self {
        Self {
            notifier,
            entry_delay,
        }
    }

    pub async fn deliver(&self, sub: &Subscription, entries: &[Entry]) -> DeliveryReport {
        self.deliver_tracked(sub, entries, |_| {}).await
    }

    /// Like [`deliver`](Self::deliver), calling `on_result` right after each
    /// attempt with whether the post landed.
    pub async fn deliver_tracked(
        &self,
        sub: &Subscription,
        entries: &[Entry],
        mut on_result: impl FnMut(bool),
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let record_identities = sub.dedup_strategy == DedupStrategy::Identity;

        for (index, entry) in entries.iter().enumerate() {
            if index > 0 && !self.entry_delay.is_zero() {
                tokio::time::sleep(self.entry_delay).await;
            }

            let message = Message::Card(Card::from_entry(sub.name(), entry));
            let delivered = self.notifier.send(&message).await;
            on_result(delivered);
            if delivered {
                report.delivered += 1;
                if record_identities {
                    report.delivered_identities.push(entry.identity.clone());
                }
                tracing::debug!(
                    feed_id = sub.id,
                    identity = %entry.identity,
                    "Delivered entry"
                );
            } else {
                report.failed += 1;
                tracing::warn!(
                    feed_id = sub.id,
                    feed = %sub.name(),
                    title = %entry.title,
                    "Delivery failed, entry will not be retried"
                );
            }
        }

        report
    }
}
