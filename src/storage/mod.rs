//! Persistence of subscriptions and their dedup state.
//!
//! The engine talks to [`SubscriptionStore`]; [`Database`] is the SQLite
//! implementation used by the binary and by most tests.

mod schema;
mod subscriptions;
mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use schema::Database;
pub use types::{
    DedupState, DedupStrategy, IdentitySet, StateError, Subscription, SubscriptionStatus,
    IDENTITY_CAPACITY,
};

/// Key-value style access to subscription records and per-feed dedup state.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Subscription>, StateError>;

    /// Insert or replace by `sub.id`.
    async fn put(&self, sub: &Subscription) -> Result<(), StateError>;

    /// Remove a subscription together with its dedup state. Returns whether
    /// anything was removed.
    async fn delete(&self, id: i64) -> Result<bool, StateError>;

    /// Every subscription, ordered by id.
    async fn list_all(&self) -> Result<Vec<Subscription>, StateError>;

    /// Allocate a fresh, never reused subscription id.
    async fn next_id(&self) -> Result<i64, StateError>;

    async fn load_state(&self, id: i64) -> Result<Option<DedupState>, StateError>;

    /// Persist `state` and set `last_checked_at` atomically.
    async fn save_state(
        &self,
        id: i64,
        state: &DedupState,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StateError>;

    /// Set `last_checked_at` only.
    async fn touch_checked(&self, id: i64, checked_at: DateTime<Utc>) -> Result<(), StateError>;
}

#[async_trait]
impl SubscriptionStore for Database {
    async fn get(&self, id: i64) -> Result<Option<Subscription>, StateError> {
        self.get_subscription(id).await
    }

    async fn put(&self, sub: &Subscription) -> Result<(), StateError> {
        self.put_subscription(sub).await
    }

    async fn delete(&self, id: i64) -> Result<bool, StateError> {
        self.delete_subscription(id).await
    }

    async fn list_all(&self) -> Result<Vec<Subscription>, StateError> {
        self.list_subscriptions().await
    }

    async fn next_id(&self) -> Result<i64, StateError> {
        self.next_subscription_id().await
    }

    async fn load_state(&self, id: i64) -> Result<Option<DedupState>, StateError> {
        self.load_dedup_state(id).await
    }

    async fn save_state(
        &self,
        id: i64,
        state: &DedupState,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        self.save_dedup_state(id, state, checked_at).await
    }

    async fn touch_checked(&self, id: i64, checked_at: DateTime<Utc>) -> Result<(), StateError> {
        Database::touch_checked(self, id, checked_at).await
    }
}
