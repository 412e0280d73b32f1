//! Downstream chat channel.
//!
//! Implementations never raise: a failed post is logged and reported as
//! `false` so the delivery pipeline can move on to the next entry.

mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::feed::Entry;

pub use webhook::{DeliveryError, WebhookNotifier};

/// Something to post to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Card(Card),
}

/// Rich rendering of one feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    /// Name of the feed the entry came from
    pub feed: String,
    pub title: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Card {
    pub fn from_entry(feed: &str, entry: &Entry) -> Self {
        Self {
            feed: feed.to_string(),
            title: entry.title.clone(),
            link: entry.link.clone(),
            summary: entry.summary.clone(),
            published_at: entry.published_at,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a message to the main channel. `true` on success.
    async fn send(&self, message: &Message) -> bool;

    /// Post an operator alert to the error channel. `true` on success.
    async fn alert(&self, text: &str) -> bool;
}

/// Logs what would have been posted instead of posting it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunNotifier;

#[async_trait]
impl Notifier for DryRunNotifier {
    async fn send(&self, message: &Message) -> bool {
        match message {
            Message::Text(text) => tracing::info!(text = %text, "[dry run] would post text"),
            Message::Card(card) => tracing::info!(
                feed = %card.feed,
                title = %card.title,
                link = card.link.as_deref().unwrap_or("-"),
                "[dry run] would post entry"
            ),
        }
        true
    }

    async fn alert(&self, text: &str) -> bool {
        tracing::warn!(text = %text, "[dry run] would post alert");
        true
    }
}
