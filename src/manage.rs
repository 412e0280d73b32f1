//! Operator commands on the subscription list.
//!
//! These touch only the store and the feed source. Nothing here posts to the
//! channel, and `test` does not write anything either.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::feed::{FeedError, FeedSource, ParsedFeed};
use crate::storage::{
    DedupStrategy, StateError, Subscription, SubscriptionStatus, SubscriptionStore,
};
use crate::util::{truncate_chars, validate_feed_url, UrlValidationError};

const MAX_NAME_CHARS: usize = 100;
const PROBE_SAMPLE_SIZE: usize = 3;

/// Why an operator command was refused. Every variant reads as a complete
/// sentence for the terminal.
#[derive(Debug, Error)]
pub enum ManageError {
    #[error("{0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error("Already subscribed to {url} (id {id})")]
    AlreadySubscribed { url: String, id: i64 },

    #[error("Could not read the feed at {url}: {source}")]
    Unreadable {
        url: String,
        #[source]
        source: FeedError,
    },

    #[error("No subscription with id {0}")]
    NotFound(i64),

    #[error("Storage failure: {0}")]
    Storage(#[from] StateError),
}

/// Result of a pause/resume request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    Changed(Subscription),
    /// The subscription was already in the requested state
    Unchanged(Subscription),
}

impl StatusChange {
    pub fn subscription(&self) -> &Subscription {
        match self {
            StatusChange::Changed(sub) | StatusChange::Unchanged(sub) => sub,
        }
    }
}

/// What `test` learned about a feed without subscribing to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedProbe {
    pub url: String,
    pub title: Option<String>,
    pub entries: usize,
    /// Entries carrying a publication or update time
    pub dated: usize,
    pub newest: Option<DateTime<Utc>>,
    /// Titles of the first few entries, in document order
    pub sample: Vec<String>,
}

impl FeedProbe {
    fn from_feed(url: String, feed: &ParsedFeed) -> Self {
        Self {
            url,
            title: feed.title.clone(),
            entries: feed.entries.len(),
            dated: feed.entries.iter().filter(|e| e.published_at.is_some()).count(),
            newest: feed.entries.iter().filter_map(|e| e.published_at).max(),
            sample: feed
                .entries
                .iter()
                .take(PROBE_SAMPLE_SIZE)
                .map(|e| e.title.clone())
                .collect(),
        }
    }

    /// Shape problems worth telling the operator about.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.entries == 0 {
            warnings.push("Feed has no entries".to_string());
        } else if self.dated == 0 {
            warnings.push(
                "No entry has a date; watermark deduplication would never deliver, use --strategy identity"
                    .to_string(),
            );
        } else if self.dated < self.entries {
            warnings.push(format!(
                "{} of {} entries have no date and are skipped by watermark deduplication",
                self.entries - self.dated,
                self.entries
            ));
        }
        warnings
    }
}

/// Executes management commands against a store and a feed source.
pub struct Manager {
    store: Arc<dyn SubscriptionStore>,
    source: Arc<dyn FeedSource>,
    default_strategy: DedupStrategy,
    allow_private_hosts: bool,
}

impl Manager {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        source: Arc<dyn FeedSource>,
        default_strategy: DedupStrategy,
        allow_private_hosts: bool,
    ) -> Self {
        Self {
            store,
            source,
            default_strategy,
            allow_private_hosts,
        }
    }

    /// Subscribe to a feed.
    ///
    /// The feed is fetched once so that unreachable or unparsable URLs are
    /// refused up front and the feed's own title can be recorded. The new
    /// subscription starts active with no dedup state, so its first check
    /// treats every entry as new.
    pub async fn add(
        &self,
        raw_url: &str,
        custom_name: Option<&str>,
        strategy: Option<DedupStrategy>,
    ) -> Result<Subscription, ManageError> {
        let url = validate_feed_url(raw_url, self.allow_private_hosts)?.to_string();

        if let Some(existing) = self.find_by_url(&url).await? {
            return Err(ManageError::AlreadySubscribed {
                url,
                id: existing.id,
            });
        }

        let feed = self
            .source
            .fetch(&url)
            .await
            .map_err(|source| ManageError::Unreadable {
                url: url.clone(),
                source,
            })?;

        let display_title = feed
            .title
            .clone()
            .unwrap_or_else(|| fallback_title(&url));

        let sub = Subscription {
            id: self.store.next_id().await?,
            source_url: url,
            display_title: truncate_chars(&display_title, MAX_NAME_CHARS).into_owned(),
            custom_name: custom_name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|n| truncate_chars(n, MAX_NAME_CHARS).into_owned()),
            status: SubscriptionStatus::Active,
            dedup_strategy: strategy.unwrap_or(self.default_strategy),
            added_at: Utc::now(),
            last_checked_at: None,
        };

        match self.store.put(&sub).await {
            Ok(()) => {}
            // Lost a race with a concurrent add of the same URL
            Err(StateError::DuplicateUrl(url)) => {
                let id = self.find_by_url(&url).await?.map_or(0, |s| s.id);
                return Err(ManageError::AlreadySubscribed { url, id });
            }
            Err(e) => return Err(e.into()),
        }

        let probe = FeedProbe::from_feed(sub.source_url.clone(), &feed);
        if sub.dedup_strategy == DedupStrategy::Watermark {
            for warning in probe.warnings() {
                tracing::warn!(feed_id = sub.id, "{warning}");
            }
        }

        tracing::info!(
            feed_id = sub.id,
            url = %sub.source_url,
            strategy = %sub.dedup_strategy,
            "Subscription added"
        );
        Ok(sub)
    }

    /// Unsubscribe; the feed's dedup state goes with it.
    pub async fn remove(&self, id: i64) -> Result<Subscription, ManageError> {
        let sub = self.require(id).await?;
        if !self.store.delete(id).await? {
            return Err(ManageError::NotFound(id));
        }
        tracing::info!(feed_id = id, url = %sub.source_url, "Subscription removed");
        Ok(sub)
    }

    pub async fn pause(&self, id: i64) -> Result<StatusChange, ManageError> {
        self.set_status(id, SubscriptionStatus::Paused).await
    }

    pub async fn resume(&self, id: i64) -> Result<StatusChange, ManageError> {
        self.set_status(id, SubscriptionStatus::Active).await
    }

    /// All subscriptions, ordered by id.
    pub async fn list(&self) -> Result<Vec<Subscription>, ManageError> {
        Ok(self.store.list_all().await?)
    }

    /// Fetch a feed and describe its shape. Never stores or posts anything.
    pub async fn test(&self, raw_url: &str) -> Result<FeedProbe, ManageError> {
        let url = validate_feed_url(raw_url, self.allow_private_hosts)?.to_string();
        let feed = self
            .source
            .fetch(&url)
            .await
            .map_err(|source| ManageError::Unreadable {
                url: url.clone(),
                source,
            })?;
        Ok(FeedProbe::from_feed(url, &feed))
    }

    async fn set_status(
        &self,
        id: i64,
        status: SubscriptionStatus,
    ) -> Result<StatusChange, ManageError> {
        let mut sub = self.require(id).await?;
        if sub.status == status {
            return Ok(StatusChange::Unchanged(sub));
        }

        sub.status = status;
        self.store.put(&sub).await?;
        tracing::info!(feed_id = id, status = %status, "Subscription status changed");
        Ok(StatusChange::Changed(sub))
    }

    async fn require(&self, id: i64) -> Result<Subscription, ManageError> {
        self.store.get(id).await?.ok_or(ManageError::NotFound(id))
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<Subscription>, StateError> {
        Ok(self
            .store
            .list_all()
            .await?
            .into_iter()
            .find(|s| s.source_url == url))
    }
}

fn fallback_title(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}
