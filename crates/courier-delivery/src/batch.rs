//! Batch retry processor driving bounded sets of events through delivery.
//!
//! Three entry points share one aggregation contract: events are processed
//! sequentially within a call, each outcome is independent, and store
//! errors are recorded per event rather than aborting the batch. Worst-case
//! batch latency is bounded by `batch_size × transport timeout`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_core::models::{EventFilter, RetryBatchResult, TenantId};
use tracing::{debug, info};

use crate::{error::Result, lifecycle::DeliveryService, store::EventStore};

/// Page size for bulk-filtered retries.
pub const BULK_RETRY_PAGE_SIZE: i64 = 100;

/// Drives eligible events through the lifecycle manager in bounded batches.
pub struct BatchProcessor {
    store: Arc<dyn EventStore>,
    service: Arc<DeliveryService>,
}

impl BatchProcessor {
    /// Creates a batch processor over the given lifecycle manager.
    pub fn new(service: Arc<DeliveryService>) -> Self {
        Self { store: service.store(), service }
    }

    /// Retries a tenant's failed events, oldest first, up to `limit`.
    ///
    /// The store hands back only retryable failures (exhausted events are
    /// excluded, since another attempt would overrun their budget). One
    /// event's failure never aborts the batch.
    ///
    /// # Errors
    ///
    /// Returns an error only when the initial store query fails; per-event
    /// failures land in the aggregate result.
    pub async fn retry_failed(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<RetryBatchResult> {
        let events = self.store.failed_by_tenant(tenant_id, limit).await?;
        debug!(tenant_id = %tenant_id, candidates = events.len(), "retrying failed webhooks");

        let mut result = RetryBatchResult::default();
        for event in events {
            self.attempt(event.id, &mut result).await;
        }

        info!(
            tenant_id = %tenant_id,
            retried = result.retried,
            succeeded = result.succeeded,
            failed = result.failed,
            "failed-webhook retry batch finished"
        );
        Ok(result)
    }

    /// Retries failed events matching an optional type and age filter.
    ///
    /// Fetches up to a fixed page of candidates, then re-checks retry
    /// eligibility per event: exhausted events and events still inside
    /// their cooldown are skipped without counting as retried.
    ///
    /// # Errors
    ///
    /// Returns an error only when the initial store query fails.
    pub async fn bulk_retry(
        &self,
        tenant_id: TenantId,
        event_type: Option<&str>,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<RetryBatchResult> {
        let filter = EventFilter {
            tenant_id: Some(tenant_id),
            event_types: event_type.map(|t| vec![t.to_string()]),
            delivered: Some(false),
            min_attempts: Some(1),
            created_before: older_than,
            limit: BULK_RETRY_PAGE_SIZE,
            ..EventFilter::default()
        };

        let events = self.store.find_by_filters(&filter).await?;
        debug!(tenant_id = %tenant_id, candidates = events.len(), "bulk retry candidates fetched");

        let mut result = RetryBatchResult::default();
        for event in events {
            if !self.service.can_retry_now(&event) {
                debug!(event_id = %event.id, "skipping ineligible event");
                continue;
            }
            self.attempt(event.id, &mut result).await;
        }

        info!(
            tenant_id = %tenant_id,
            retried = result.retried,
            succeeded = result.succeeded,
            failed = result.failed,
            "bulk retry batch finished"
        );
        Ok(result)
    }

    /// Background-scheduler entry point over elapsed retry schedules.
    ///
    /// Fetches up to `batch_size` events whose `next_retry_at` has passed
    /// and re-checks eligibility per event to guard against races with
    /// concurrently-scheduled retries.
    ///
    /// # Errors
    ///
    /// Returns an error only when the initial store query fails.
    pub async fn process_pending(&self, batch_size: usize) -> Result<RetryBatchResult> {
        let now = self.service.now();
        let events = self.store.pending_retries(batch_size, now).await?;
        debug!(due = events.len(), "processing pending webhook retries");

        let mut result = RetryBatchResult::default();
        for event in events {
            if !self.service.can_retry_now(&event) {
                continue;
            }
            self.attempt(event.id, &mut result).await;
        }

        if result.retried > 0 {
            info!(
                retried = result.retried,
                succeeded = result.succeeded,
                failed = result.failed,
                "pending retry batch finished"
            );
        }
        Ok(result)
    }

    /// Attempts one event and folds the outcome into the aggregate.
    async fn attempt(&self, event_id: courier_core::EventId, result: &mut RetryBatchResult) {
        match self.service.deliver(event_id).await {
            Ok(outcome) if outcome.success => result.record_success(),
            Ok(_) => result.record_failure(),
            Err(error) => result.record_error(event_id, error),
        }
    }
}
