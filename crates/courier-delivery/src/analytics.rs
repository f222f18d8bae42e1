//! Delivery analytics and event table maintenance.
//!
//! Aggregates are computed by the store and exposed read-only here. The
//! cleanup operations are irreversible, age-bounded deletes. They are
//! maintenance, not part of the delivery guarantee, and must never remove
//! an event that is still eligible for retry (the store predicates enforce
//! this).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use courier_core::{
    models::{TenantId, WebhookAnalytics, WebhookStats},
    time::Clock,
};
use tracing::info;

use crate::{error::Result, store::EventStore};

/// Read-side statistics and maintenance operations.
pub struct AnalyticsService {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl AnalyticsService {
    /// Creates an analytics service over the given store.
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Headline delivery counters for a tenant over an optional window.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the aggregate query fails.
    pub async fn stats(
        &self,
        tenant_id: TenantId,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<WebhookStats> {
        Ok(self.store.stats(tenant_id, window_start, window_end).await?)
    }

    /// Full analytics breakdown for a tenant over an optional window.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when any aggregate query fails.
    pub async fn analytics(
        &self,
        tenant_id: TenantId,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<WebhookAnalytics> {
        Ok(self.store.analytics(tenant_id, window_start, window_end).await?)
    }

    /// Deletes terminal events older than the given number of days.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the delete fails.
    pub async fn cleanup_old(&self, older_than_days: i64) -> Result<u64> {
        let cutoff = self.cutoff(older_than_days);
        let deleted = self.store.delete_older_than(cutoff).await?;

        info!(deleted, older_than_days, "cleaned up old webhook events");
        Ok(deleted)
    }

    /// Deletes delivered events whose delivery is older than the given
    /// number of days.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the delete fails.
    pub async fn cleanup_delivered(&self, older_than_days: i64) -> Result<u64> {
        let cutoff = self.cutoff(older_than_days);
        let deleted = self.store.delete_delivered_older_than(cutoff).await?;

        info!(deleted, older_than_days, "cleaned up delivered webhook events");
        Ok(deleted)
    }

    /// Deletes exhausted events that burned at least `min_attempts` and are
    /// older than the given number of days.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the delete fails.
    pub async fn purge_failed(&self, min_attempts: i32, older_than_days: i64) -> Result<u64> {
        let cutoff = self.cutoff(older_than_days);
        let deleted = self.store.purge_failed(min_attempts, cutoff).await?;

        info!(deleted, min_attempts, older_than_days, "purged exhausted webhook events");
        Ok(deleted)
    }

    /// Liveness probe against the event store.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the store is unreachable.
    pub async fn health_check(&self) -> Result<()> {
        Ok(self.store.health_check().await?)
    }

    fn cutoff(&self, older_than_days: i64) -> DateTime<Utc> {
        self.clock.now_utc() - Duration::days(older_than_days.max(0))
    }
}
