use chrono::{DateTime, Utc};

use super::schema::{Database, SUBSCRIPTION_ID_COUNTER};
use super::types::{DedupState, DedupStateRow, StateError, Subscription, SubscriptionRow};

/// Attempts at the id compare-and-swap before giving up.
const ID_CAS_ATTEMPTS: u32 = 8;

const SUBSCRIPTION_COLUMNS: &str = "id, source_url, display_title, custom_name, status, \
     dedup_strategy, added_at, last_checked_at";

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Allocate the next subscription id.
    ///
    /// The counter lives in the database and is advanced with a
    /// read/compare-and-swap loop, so two processes adding feeds at the same
    /// time never receive the same id.
    pub async fn next_subscription_id(&self) -> Result<i64, StateError> {
        for attempt in 1..=ID_CAS_ATTEMPTS {
            let (current,): (i64,) = sqlx::query_as("SELECT value FROM counters WHERE name = ?")
                .bind(SUBSCRIPTION_ID_COUNTER)
                .fetch_one(&self.pool)
                .await
                .map_err(StateError::from_sqlx)?;

            let next = current + 1;
            let swapped = sqlx::query("UPDATE counters SET value = ? WHERE name = ? AND value = ?")
                .bind(next)
                .bind(SUBSCRIPTION_ID_COUNTER)
                .bind(current)
                .execute(&self.pool)
                .await
                .map_err(StateError::from_sqlx)?;

            if swapped.rows_affected() == 1 {
                return Ok(next);
            }
            tracing::debug!(attempt = attempt, seen = current, "Id counter moved, retrying");
        }

        Err(StateError::IdContention(ID_CAS_ATTEMPTS))
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>, StateError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StateError::from_sqlx)?;

        row.map(SubscriptionRow::into_subscription).transpose()
    }

    /// All subscriptions, ordered by id.
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>, StateError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StateError::from_sqlx)?;

        rows.into_iter()
            .map(SubscriptionRow::into_subscription)
            .collect()
    }

    /// Insert or replace the subscription with `sub.id`.
    ///
    /// # Errors
    ///
    /// `StateError::DuplicateUrl` if another subscription already watches
    /// `sub.source_url`.
    pub async fn put_subscription(&self, sub: &Subscription) -> Result<(), StateError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, source_url, display_title, custom_name, status, dedup_strategy,
                 added_at, last_checked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_url = excluded.source_url,
                display_title = excluded.display_title,
                custom_name = excluded.custom_name,
                status = excluded.status,
                last_checked_at = excluded.last_checked_at
        "#,
        )
        .bind(sub.id)
        .bind(&sub.source_url)
        .bind(&sub.display_title)
        .bind(&sub.custom_name)
        .bind(sub.status.as_str())
        .bind(sub.dedup_strategy.as_str())
        .bind(sub.added_at)
        .bind(sub.last_checked_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StateError::DuplicateUrl(sub.source_url.clone()))
            }
            Err(e) => Err(StateError::from_sqlx(e)),
        }
    }

    /// Remove a subscription; its dedup state goes with it (ON DELETE CASCADE).
    /// Returns `false` if there was nothing to remove.
    pub async fn delete_subscription(&self, id: i64) -> Result<bool, StateError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StateError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Dedup State Operations
    // ========================================================================

    /// Stored dedup state, or `None` for a feed that was never checked.
    pub async fn load_dedup_state(&self, id: i64) -> Result<Option<DedupState>, StateError> {
        let row: Option<DedupStateRow> = sqlx::query_as(
            "SELECT strategy, watermark, identities FROM dedup_state WHERE subscription_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StateError::from_sqlx)?;

        row.map(DedupStateRow::into_state).transpose()
    }

    /// Persist the dedup state and check time of one feed in a single
    /// transaction.
    pub async fn save_dedup_state(
        &self,
        id: i64,
        state: &DedupState,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let (watermark, identities) = match state {
            DedupState::Watermark(mark) => (*mark, None),
            DedupState::Identities(set) => {
                let list: Vec<&str> = set.iter().collect();
                let json = serde_json::to_string(&list)
                    .map_err(|e| StateError::Corrupt(format!("identity list: {e}")))?;
                (None, Some(json))
            }
        };

        let mut tx = self.pool.begin().await.map_err(StateError::from_sqlx)?;

        let touched = sqlx::query("UPDATE subscriptions SET last_checked_at = ? WHERE id = ?")
            .bind(checked_at)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StateError::from_sqlx)?;
        if touched.rows_affected() == 0 {
            return Err(StateError::NotFound(id));
        }

        sqlx::query(
            r#"
            INSERT INTO dedup_state (subscription_id, strategy, watermark, identities, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(subscription_id) DO UPDATE SET
                strategy = excluded.strategy,
                watermark = excluded.watermark,
                identities = excluded.identities,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(id)
        .bind(state.strategy().as_str())
        .bind(watermark)
        .bind(identities)
        .bind(checked_at)
        .execute(&mut *tx)
        .await
        .map_err(StateError::from_sqlx)?;

        tx.commit().await.map_err(StateError::from_sqlx)?;
        Ok(())
    }

    /// Record a check that left the dedup state as it was.
    pub async fn touch_checked(&self, id: i64, checked_at: DateTime<Utc>) -> Result<(), StateError> {
        let result = sqlx::query("UPDATE subscriptions SET last_checked_at = ? WHERE id = ?")
            .bind(checked_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StateError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StateError::NotFound(id));
        }
        Ok(())
    }
}
