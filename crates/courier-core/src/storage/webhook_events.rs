//! Repository for webhook event database operations.
//!
//! Provides type-safe access to the `webhook_events` table: creation, the
//! atomic attempt-count increment the delivery ordering guarantee rests on,
//! outcome writes, retry scheduling, filtered queries, aggregates, and the
//! age-bounded maintenance deletes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::{
    error::Result,
    models::{EventCount, EventFilter, EventId, FailureReason, TenantId, WebhookEvent, WebhookStats},
};

const EVENT_COLUMNS: &str = "id, tenant_id, event_type, target_url, payload, max_attempts, \
                             attempt_count, delivered, response_code, response_body, \
                             failure_reason, next_retry_at, delivered_at, metadata, \
                             created_at, updated_at";

const DEFAULT_PAGE_SIZE: i64 = 100;

/// Repository for webhook event database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Persists a new webhook event.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or constraints are violated.
    pub async fn create(&self, event: &WebhookEvent) -> Result<EventId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_events (
                id, tenant_id, event_type, target_url, payload, max_attempts,
                attempt_count, delivered, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(event.id.0)
        .bind(event.tenant_id.0)
        .bind(&event.event_type)
        .bind(&event.target_url)
        .bind(&event.payload)
        .bind(event.max_attempts)
        .bind(event.attempt_count)
        .bind(event.delivered)
        .bind(&event.metadata)
        .bind(event.created_at)
        .bind(event.updated_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(EventId(id))
    }

    /// Finds an event by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, event_id: EventId) -> Result<Option<WebhookEvent>> {
        let event = sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = $1"
        ))
        .bind(event_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Atomically increments the attempt counter and returns the new value.
    ///
    /// Must be committed before the network call is issued: the count-first,
    /// outcome-second ordering is what bounds `attempt_count` even if the
    /// process crashes mid-delivery.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the event does not exist.
    pub async fn increment_attempt_count(&self, event_id: EventId) -> Result<i32> {
        let count: i32 = sqlx::query_scalar(
            r#"
            UPDATE webhook_events
            SET attempt_count = attempt_count + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING attempt_count
            "#,
        )
        .bind(event_id.0)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count)
    }

    /// Marks an event as successfully delivered.
    ///
    /// Terminal state: stores the 2xx response, stamps `delivered_at`, and
    /// clears any scheduled retry.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_delivered(
        &self,
        event_id: EventId,
        response_code: i32,
        response_body: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET delivered = TRUE,
                response_code = $2,
                response_body = $3,
                failure_reason = NULL,
                next_retry_at = NULL,
                delivered_at = COALESCE(delivered_at, NOW()),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event_id.0)
        .bind(response_code)
        .bind(response_body)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// Clears `next_retry_at`; if the event still has attempts remaining the
    /// caller follows up with [`Repository::set_next_retry`], otherwise the
    /// event is left exhausted.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        event_id: EventId,
        response_code: i32,
        failure_reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET response_code = $2,
                failure_reason = $3,
                next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event_id.0)
        .bind(response_code)
        .bind(failure_reason)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Schedules the next retry for an undelivered event.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn set_next_retry(&self, event_id: EventId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET next_retry_at = $2, updated_at = NOW()
            WHERE id = $1 AND NOT delivered
            "#,
        )
        .bind(event_id.0)
        .bind(at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Resets an event for a fresh retry cycle.
    ///
    /// Zeroes the attempt counter and clears the schedule and failure reason.
    /// Used by operator-forced retries.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn reset_for_retry(&self, event_id: EventId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET attempt_count = 0,
                next_retry_at = NULL,
                failure_reason = NULL,
                updated_at = NOW()
            WHERE id = $1 AND NOT delivered
            "#,
        )
        .bind(event_id.0)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Fetches events whose scheduled retry time has elapsed.
    ///
    /// Oldest schedule first, so starved events are picked up before fresh
    /// failures.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn pending_retries(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM webhook_events
            WHERE NOT delivered
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= $1
            ORDER BY next_retry_at ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(DEFAULT_PAGE_SIZE))
        .fetch_all(&*self.pool)
        .await?;

        Ok(events)
    }

    /// Fetches a tenant's retryable failed events, oldest first.
    ///
    /// Excludes exhausted events: retrying them would push `attempt_count`
    /// past `max_attempts`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn failed_by_tenant(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM webhook_events
            WHERE tenant_id = $1
              AND NOT delivered
              AND attempt_count > 0
              AND attempt_count < max_attempts
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(tenant_id.0)
        .bind(i64::try_from(limit).unwrap_or(DEFAULT_PAGE_SIZE))
        .fetch_all(&*self.pool)
        .await?;

        Ok(events)
    }

    /// Queries events by the conjunctive criteria in [`EventFilter`].
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_filters(&self, filter: &EventFilter) -> Result<Vec<WebhookEvent>> {
        let limit = if filter.limit > 0 { filter.limit } else { DEFAULT_PAGE_SIZE };

        let events = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM webhook_events
            WHERE ($1::uuid IS NULL OR tenant_id = $1)
              AND ($2::text[] IS NULL OR event_type = ANY($2))
              AND ($3::boolean IS NULL OR delivered = $3)
              AND ($4::text IS NULL OR target_url LIKE '%' || $4 || '%')
              AND ($5::integer IS NULL OR attempt_count >= $5)
              AND ($6::integer IS NULL OR attempt_count <= $6)
              AND ($7::timestamptz IS NULL OR created_at >= $7)
              AND ($8::timestamptz IS NULL OR created_at < $8)
              AND ($9::integer[] IS NULL OR response_code = ANY($9))
            ORDER BY created_at DESC
            LIMIT $10 OFFSET $11
            "#
        ))
        .bind(filter.tenant_id.map(|t| t.0))
        .bind(filter.event_types.clone())
        .bind(filter.delivered)
        .bind(filter.url_contains.as_deref())
        .bind(filter.min_attempts)
        .bind(filter.max_attempts)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .bind(filter.response_codes.clone())
        .bind(limit)
        .bind(filter.offset.max(0))
        .fetch_all(&*self.pool)
        .await?;

        Ok(events)
    }

    /// Computes headline delivery counters for a tenant.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn stats(
        &self,
        tenant_id: TenantId,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<WebhookStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE delivered) AS delivered,
                COUNT(*) FILTER (WHERE NOT delivered AND attempt_count > 0) AS failed,
                COUNT(*) FILTER (WHERE NOT delivered AND attempt_count = 0) AS pending,
                COALESCE(AVG(attempt_count), 0)::double precision AS average_attempts
            FROM webhook_events
            WHERE tenant_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            "#,
        )
        .bind(tenant_id.0)
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&*self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let delivered: i64 = row.try_get("delivered")?;
        let delivery_rate = if total > 0 { delivered as f64 / total as f64 } else { 0.0 };

        Ok(WebhookStats {
            total,
            delivered,
            failed: row.try_get("failed")?,
            pending: row.try_get("pending")?,
            delivery_rate,
            average_attempts: row.try_get("average_attempts")?,
        })
    }

    /// Counts a tenant's events grouped by event type, largest group first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_event_type(
        &self,
        tenant_id: TenantId,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<EventCount>> {
        let counts = sqlx::query_as::<_, EventCount>(
            r#"
            SELECT event_type AS key, COUNT(*) AS count
            FROM webhook_events
            WHERE tenant_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            GROUP BY event_type
            ORDER BY count DESC, key ASC
            "#,
        )
        .bind(tenant_id.0)
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&*self.pool)
        .await?;

        Ok(counts)
    }

    /// Counts a tenant's events grouped by derived lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(
        &self,
        tenant_id: TenantId,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<EventCount>> {
        let counts = sqlx::query_as::<_, EventCount>(
            r#"
            SELECT CASE
                     WHEN delivered THEN 'delivered'
                     WHEN attempt_count = 0 THEN 'pending'
                     WHEN attempt_count >= max_attempts AND next_retry_at IS NULL
                       THEN 'exhausted'
                     ELSE 'failed'
                   END AS key,
                   COUNT(*) AS count
            FROM webhook_events
            WHERE tenant_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            GROUP BY 1
            ORDER BY count DESC, key ASC
            "#,
        )
        .bind(tenant_id.0)
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&*self.pool)
        .await?;

        Ok(counts)
    }

    /// Returns the most frequent failure reasons for a tenant, descending.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn failure_reasons(
        &self,
        tenant_id: TenantId,
        limit: usize,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<FailureReason>> {
        let reasons = sqlx::query_as::<_, FailureReason>(
            r#"
            SELECT failure_reason AS reason, COUNT(*) AS count
            FROM webhook_events
            WHERE tenant_id = $1
              AND NOT delivered
              AND failure_reason IS NOT NULL
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
            GROUP BY failure_reason
            ORDER BY count DESC, reason ASC
            LIMIT $2
            "#,
        )
        .bind(tenant_id.0)
        .bind(i64::try_from(limit).unwrap_or(10))
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&*self.pool)
        .await?;

        Ok(reasons)
    }

    /// Mean seconds from creation to delivery for a tenant's delivered
    /// events, `None` when nothing delivered in the window.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn average_delivery_seconds(
        &self,
        tenant_id: TenantId,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<Option<f64>> {
        let average: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(EXTRACT(EPOCH FROM (delivered_at - created_at)))::double precision
            FROM webhook_events
            WHERE tenant_id = $1
              AND delivered
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            "#,
        )
        .bind(tenant_id.0)
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&*self.pool)
        .await?;

        Ok(average)
    }

    /// Deletes terminal events created before the cutoff.
    ///
    /// Only delivered or exhausted events qualify; anything still eligible
    /// for retry is left untouched regardless of age.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_events
            WHERE created_at < $1
              AND (delivered
                   OR (attempt_count >= max_attempts AND next_retry_at IS NULL))
            "#,
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes delivered events whose delivery happened before the cutoff.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete_delivered_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_events
            WHERE delivered AND delivered_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes exhausted events that reached the given attempt floor before
    /// the cutoff.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn purge_failed(&self, min_attempts: i32, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_events
            WHERE NOT delivered
              AND attempt_count >= $1
              AND next_retry_at IS NULL
              AND created_at < $2
            "#,
        )
        .bind(min_attempts)
        .bind(cutoff)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }

    #[test]
    fn event_columns_cover_the_model() {
        // Keep the shared column list in sync with WebhookEvent's fields.
        assert_eq!(EVENT_COLUMNS.split(',').count(), 16);
    }
}
