use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Persistence failures surfaced by the subscription store.
#[derive(Debug, Error)]
pub enum StateError {
    /// Another process holds the database lock
    #[error("Another feedrelay process appears to hold the database. Please stop it and try again.")]
    InstanceLocked,

    #[error("Database migration failed: {0}")]
    Migration(String),

    #[error("Subscription {0} does not exist")]
    NotFound(i64),

    #[error("A subscription for {0} already exists")]
    DuplicateUrl(String),

    /// A stored value could not be decoded back into its Rust type
    #[error("Stored state is corrupt: {0}")]
    Corrupt(String),

    /// The id counter kept changing between read and compare-and-swap
    #[error("Could not allocate a subscription id after {0} attempts")]
    IdContention(u32),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StateError {
    /// Maps lock-related SQLite failures to [`StateError::InstanceLocked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let message = err.to_string().to_lowercase();
        if message.contains("database is locked")
            || message.contains("database table is locked")
            || message.contains("sqlite_busy")
            || message.contains("sqlite_locked")
        {
            return StateError::InstanceLocked;
        }
        StateError::Database(err)
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Operator-controlled lifecycle of a subscription. Runs never change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "paused" => Ok(SubscriptionStatus::Paused),
            other => Err(StateError::Corrupt(format!("unknown status '{other}'"))),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a feed decides which entries are new. Fixed when the feed is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// Compare publication time against the latest one seen
    #[default]
    Watermark,
    /// Remember the identities of recently delivered entries
    Identity,
}

impl DedupStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            DedupStrategy::Watermark => "watermark",
            DedupStrategy::Identity => "identity",
        }
    }
}

impl FromStr for DedupStrategy {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watermark" => Ok(DedupStrategy::Watermark),
            "identity" => Ok(DedupStrategy::Identity),
            other => Err(StateError::Corrupt(format!("unknown dedup strategy '{other}'"))),
        }
    }
}

impl fmt::Display for DedupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A watched feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: i64,
    pub source_url: String,
    /// Title reported by the feed itself when it was added
    pub display_title: String,
    pub custom_name: Option<String>,
    pub status: SubscriptionStatus,
    pub dedup_strategy: DedupStrategy,
    pub added_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Name shown downstream: the custom name when set, else the feed title.
    pub fn name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.display_title)
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Row shape of `subscriptions`; enums are stored as text.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SubscriptionRow {
    pub id: i64,
    pub source_url: String,
    pub display_title: String,
    pub custom_name: Option<String>,
    pub status: String,
    pub dedup_strategy: String,
    pub added_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl SubscriptionRow {
    pub(crate) fn into_subscription(self) -> Result<Subscription, StateError> {
        Ok(Subscription {
            id: self.id,
            source_url: self.source_url,
            display_title: self.display_title,
            custom_name: self.custom_name,
            status: self.status.parse()?,
            dedup_strategy: self.dedup_strategy.parse()?,
            added_at: self.added_at,
            last_checked_at: self.last_checked_at,
        })
    }
}

// ============================================================================
// Dedup State
// ============================================================================

/// Maximum number of identities remembered per feed.
pub const IDENTITY_CAPACITY: usize = 1000;

/// Insertion-ordered set of entry identities, capped at
/// [`IDENTITY_CAPACITY`]; the oldest identity is evicted first.
#[derive(Debug, Clone, Default)]
pub struct IdentitySet {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl IdentitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a set from identities listed oldest first. Duplicates are
    /// dropped and only the newest [`IDENTITY_CAPACITY`] are kept.
    pub fn from_ordered<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = Self::new();
        for identity in identities {
            set.insert(identity);
        }
        set
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.members.contains(identity)
    }

    /// Adds `identity` as the newest member. Returns `false` if it was
    /// already present (its position is left unchanged).
    pub fn insert(&mut self, identity: String) -> bool {
        if self.members.contains(&identity) {
            return false;
        }
        self.members.insert(identity.clone());
        self.order.push_back(identity);

        while self.order.len() > IDENTITY_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Identities from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl PartialEq for IdentitySet {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for IdentitySet {}

/// Persisted novelty state of one feed. The variant always matches the
/// feed's [`DedupStrategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupState {
    /// Latest publication time accounted for; `None` before the first check.
    Watermark(Option<DateTime<Utc>>),
    Identities(IdentitySet),
}

impl DedupState {
    /// State of a feed that has never been checked.
    pub fn fresh(strategy: DedupStrategy) -> Self {
        match strategy {
            DedupStrategy::Watermark => DedupState::Watermark(None),
            DedupStrategy::Identity => DedupState::Identities(IdentitySet::new()),
        }
    }

    pub fn strategy(&self) -> DedupStrategy {
        match self {
            DedupState::Watermark(_) => DedupStrategy::Watermark,
            DedupState::Identities(_) => DedupStrategy::Identity,
        }
    }
}

/// Row shape of `dedup_state`.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DedupStateRow {
    pub strategy: String,
    pub watermark: Option<DateTime<Utc>>,
    pub identities: Option<String>,
}

impl DedupStateRow {
    pub(crate) fn into_state(self) -> Result<DedupState, StateError> {
        match self.strategy.parse::<DedupStrategy>()? {
            DedupStrategy::Watermark => Ok(DedupState::Watermark(self.watermark)),
            DedupStrategy::Identity => {
                let list: Vec<String> = match self.identities.as_deref() {
                    Some(json) => serde_json::from_str(json)
                        .map_err(|e| StateError::Corrupt(format!("identity list: {e}")))?,
                    None => Vec::new(),
                };
                Ok(DedupState::Identities(IdentitySet::from_ordered(list)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_set_evicts_oldest() {
        let mut set = IdentitySet::new();
        for i in 0..(IDENTITY_CAPACITY + 5) {
            set.insert(format!("id-{i}"));
        }
        assert_eq!(set.len(), IDENTITY_CAPACITY);
        assert!(!set.contains("id-0"));
        assert!(!set.contains("id-4"));
        assert!(set.contains("id-5"));
        assert_eq!(set.iter().next(), Some("id-5"));
        assert_eq!(set.iter().last(), Some(format!("id-{}", IDENTITY_CAPACITY + 4).as_str()));
    }

    #[test]
    fn test_identity_set_ignores_duplicates() {
        let mut set = IdentitySet::from_ordered(vec!["a".to_string(), "b".to_string()]);
        assert!(!set.insert("a".to_string()));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_subscription_name_prefers_custom() {
        let mut sub = Subscription {
            id: 1,
            source_url: "https://example.com/feed".into(),
            display_title: "Feed Title".into(),
            custom_name: None,
            status: SubscriptionStatus::Active,
            dedup_strategy: DedupStrategy::Watermark,
            added_at: Utc::now(),
            last_checked_at: None,
        };
        assert_eq!(sub.name(), "Feed Title");
        sub.custom_name = Some("Mine".into());
        assert_eq!(sub.name(), "Mine");
    }

    #[test]
    fn test_enum_round_trip_through_text() {
        for s in [SubscriptionStatus::Active, SubscriptionStatus::Paused] {
            assert_eq!(s.as_str().parse::<SubscriptionStatus>().unwrap(), s);
        }
        assert!("bogus".parse::<DedupStrategy>().is_err());
    }

    #[test]
    fn test_corrupt_identity_json_reported() {
        let row = DedupStateRow {
            strategy: "identity".into(),
            watermark: None,
            identities: Some("{not json".into()),
        };
        assert!(matches!(row.into_state(), Err(StateError::Corrupt(_))));
    }
}
