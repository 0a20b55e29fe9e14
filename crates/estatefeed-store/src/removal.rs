//! Deferred removal schedule. Entries are appended, never deduplicated, and only consulted by
//! the sweep; removing a listing does not clear its entries.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use estatefeed_core::RemovalQueueEntry;
use sqlx::PgPool;

use crate::{settle, BestEffort, ListingLogger};

#[derive(Clone)]
pub struct RemovalQueue {
    pool: PgPool,
    logger: Arc<dyn ListingLogger>,
}

impl fmt::Debug for RemovalQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemovalQueue").finish_non_exhaustive()
    }
}

impl RemovalQueue {
    pub fn new(pool: PgPool, logger: Arc<dyn ListingLogger>) -> Self {
        Self { pool, logger }
    }

    pub async fn queue_removal(&self, system_id: &str, removal_date: NaiveDate) -> BestEffort<()> {
        let result = sqlx::query(
            r#"INSERT INTO remove_queue ("systemId", "removalDate") VALUES ($1, $2)"#,
        )
        .bind(system_id)
        .bind(removal_date)
        .execute(&self.pool)
        .await
        .map(|_| ());
        settle(
            self.logger.as_ref(),
            Some(system_id),
            || format!("Error queueing property {system_id} for removal"),
            result,
        )
    }

    /// True when at least one entry exists, whatever its date.
    pub async fn is_queued(&self, system_id: &str) -> BestEffort<bool> {
        let result = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM remove_queue WHERE "systemId" = $1)"#,
        )
        .bind(system_id)
        .fetch_one(&self.pool)
        .await;
        settle(
            self.logger.as_ref(),
            Some(system_id),
            || format!("Error retrieving removal queue status for property {system_id}"),
            result,
        )
    }

    pub async fn get_removal_queue(&self) -> BestEffort<Vec<RemovalQueueEntry>> {
        let result = sqlx::query_as::<_, (String, NaiveDate)>(
            r#"SELECT "systemId", "removalDate" FROM remove_queue ORDER BY "removalDate", id"#,
        )
        .fetch_all(&self.pool)
        .await
        .map(|rows| {
            rows.into_iter()
                .map(|(system_id, removal_date)| RemovalQueueEntry {
                    system_id,
                    removal_date,
                })
                .collect()
        });
        settle(
            self.logger.as_ref(),
            None,
            || "Error retrieving removal queue".to_string(),
            result,
        )
    }

    /// Ids whose removal date has arrived. An id queued twice is returned twice.
    pub async fn get_ready_for_removal(&self) -> BestEffort<Vec<String>> {
        let result = sqlx::query_scalar::<_, String>(
            r#"SELECT "systemId" FROM remove_queue WHERE "removalDate" <= NOW() ORDER BY "removalDate", id"#,
        )
        .fetch_all(&self.pool)
        .await;
        settle(
            self.logger.as_ref(),
            None,
            || "Error retrieving properties ready for removal".to_string(),
            result,
        )
    }

    /// Drop the entries of `system_id` that are already due; later dates stay queued.
    /// Only the removal sweep calls this, once it has acted on the id.
    pub async fn clear_due(&self, system_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"DELETE FROM remove_queue WHERE "systemId" = $1 AND "removalDate" <= NOW()"#,
        )
        .bind(system_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
