//! Event lifecycle manager: creation, single-attempt delivery, and
//! operator-forced retries.
//!
//! The lifecycle manager is the only component that mutates webhook events.
//! Its central ordering guarantee: the attempt counter is incremented
//! durably *before* the network call, and the outcome is written after.
//! A crash mid-delivery therefore under-counts by at most one attempt and
//! never amplifies retries past `max_attempts`.

use std::sync::Arc;

use chrono::Utc;
use courier_core::{
    models::{DeliveryResult, EventId, NewWebhookEvent, WebhookEvent, DEFAULT_MAX_ATTEMPTS},
    time::Clock,
};
use sqlx::types::Json;
use tracing::{debug, info, warn};

use crate::{
    backoff::RetrySchedule,
    client::DeliveryClient,
    error::{DeliveryError, Result},
    store::EventStore,
};

/// Owns the per-event state machine.
///
/// Construction wires in the transport, backoff strategy, store, and clock
/// explicitly; there is no global state to configure.
pub struct DeliveryService {
    store: Arc<dyn EventStore>,
    client: DeliveryClient,
    schedule: RetrySchedule,
    clock: Arc<dyn Clock>,
}

impl DeliveryService {
    /// Creates a new lifecycle manager.
    pub fn new(
        store: Arc<dyn EventStore>,
        client: DeliveryClient,
        schedule: RetrySchedule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, client, schedule, clock }
    }

    /// Returns the store this service operates on.
    pub fn store(&self) -> Arc<dyn EventStore> {
        self.store.clone()
    }

    /// Records a new webhook event in pending state.
    ///
    /// Validates the ingestion contract and persists the event with
    /// `attempt_count = 0`. Delivery is always a separate, explicit step so
    /// callers keep control over batching and backpressure.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the tenant is nil, the target URL is empty,
    /// or the payload is null; `Storage` when persistence fails.
    pub async fn create_event(&self, new_event: NewWebhookEvent) -> Result<WebhookEvent> {
        if new_event.tenant_id.is_nil() {
            return Err(DeliveryError::validation("tenant_id is required"));
        }
        if new_event.target_url.trim().is_empty() {
            return Err(DeliveryError::validation("target_url is required"));
        }
        if new_event.payload.is_null() {
            return Err(DeliveryError::validation("payload is required"));
        }

        let max_attempts = match new_event.max_attempts {
            Some(n) if n > 0 => n,
            _ => DEFAULT_MAX_ATTEMPTS,
        };

        let now = self.clock.now_utc();
        let event = WebhookEvent {
            id: EventId::new(),
            tenant_id: new_event.tenant_id,
            event_type: new_event.event_type,
            target_url: new_event.target_url,
            payload: Json(new_event.payload),
            max_attempts,
            attempt_count: 0,
            delivered: false,
            response_code: None,
            response_body: None,
            failure_reason: None,
            next_retry_at: None,
            delivered_at: None,
            metadata: Json(new_event.metadata.unwrap_or(serde_json::Value::Null)),
            created_at: now,
            updated_at: now,
        };

        self.store.create(&event).await?;

        info!(
            event_id = %event.id,
            tenant_id = %event.tenant_id,
            event_type = %event.event_type,
            "webhook event recorded"
        );

        Ok(event)
    }

    /// Performs a single delivery attempt.
    ///
    /// Idempotent for already-delivered events: returns the stored result
    /// without touching the counter or the transport. Otherwise increments
    /// the attempt counter durably, posts the payload, and records the
    /// outcome. On failure the next retry is scheduled from the *new*
    /// count, or the event is left exhausted once attempts run out.
    ///
    /// The cooldown in `next_retry_at` is deliberately not checked here:
    /// this is the raw single-attempt operation that operator-forced retries
    /// delegate to. Schedule gating lives in the batch processor.
    ///
    /// # Errors
    ///
    /// Returns `EventNotFound` for unknown IDs and `Storage` for store
    /// failures. Transport failures are not errors at this level: they are
    /// recorded on the event and reported in the returned result.
    pub async fn deliver(&self, event_id: EventId) -> Result<DeliveryResult> {
        let event = self
            .store
            .find_by_id(event_id)
            .await?
            .ok_or(DeliveryError::EventNotFound { event_id })?;

        if event.delivered {
            debug!(event_id = %event.id, "event already delivered, skipping attempt");
            return Ok(DeliveryResult {
                event_id: event.id,
                success: true,
                attempt_count: event.attempt_count,
                response_code: event.response_code,
                failure_reason: None,
                next_retry_at: None,
                delivered_at: event.delivered_at,
            });
        }

        // Count first, outcome second: a crash between here and the outcome
        // write still consumes the attempt.
        let attempt_count = self.store.increment_attempt_count(event.id).await?;

        debug!(
            event_id = %event.id,
            attempt = attempt_count,
            max_attempts = event.max_attempts,
            target_url = %event.target_url,
            "attempting webhook delivery"
        );

        match self.client.send(&event.target_url, &event.payload.0).await {
            Ok(response) => {
                self.store
                    .mark_delivered(
                        event.id,
                        i32::from(response.status_code),
                        Some(response.body.as_str()),
                    )
                    .await?;

                info!(
                    event_id = %event.id,
                    status = response.status_code,
                    attempt = attempt_count,
                    duration_ms = response.duration.as_millis(),
                    "webhook delivered"
                );

                Ok(DeliveryResult {
                    event_id: event.id,
                    success: true,
                    attempt_count,
                    response_code: Some(i32::from(response.status_code)),
                    failure_reason: None,
                    next_retry_at: None,
                    delivered_at: Some(self.clock.now_utc()),
                })
            },
            Err(failure) if failure.is_retryable() => {
                self.record_failure(&event, attempt_count, &failure).await
            },
            Err(other) => Err(other),
        }
    }

    /// Records a failed attempt and schedules or exhausts the event.
    async fn record_failure(
        &self,
        event: &WebhookEvent,
        attempt_count: i32,
        failure: &DeliveryError,
    ) -> Result<DeliveryResult> {
        let response_code = failure.response_code();
        let reason = failure.to_string();

        self.store.mark_failed(event.id, response_code, &reason).await?;

        let next_retry_at = if attempt_count < event.max_attempts {
            let at = self.schedule.next_retry_at(attempt_count, self.clock.now_utc());
            self.store.set_next_retry(event.id, at).await?;

            warn!(
                event_id = %event.id,
                attempt = attempt_count,
                next_retry_at = %at,
                reason = %reason,
                "delivery failed, retry scheduled"
            );
            Some(at)
        } else {
            warn!(
                event_id = %event.id,
                attempt = attempt_count,
                reason = %reason,
                "delivery failed, attempts exhausted"
            );
            None
        };

        Ok(DeliveryResult {
            event_id: event.id,
            success: false,
            attempt_count,
            response_code: Some(response_code),
            failure_reason: Some(reason),
            next_retry_at,
            delivered_at: None,
        })
    }

    /// Operator-forced retry, bypassing the normal schedule.
    ///
    /// With `reset_attempts`, the attempt counter and failure state are
    /// cleared first, granting a fresh `max_attempts` cycle. Either way the
    /// call delegates to [`DeliveryService::deliver`], which ignores
    /// `next_retry_at`.
    ///
    /// # Errors
    ///
    /// Same as [`DeliveryService::deliver`].
    pub async fn retry(&self, event_id: EventId, reset_attempts: bool) -> Result<DeliveryResult> {
        if reset_attempts {
            self.store.reset_for_retry(event_id).await?;
            debug!(event_id = %event_id, "attempt counter reset for fresh retry cycle");
        }

        self.deliver(event_id).await
    }

    /// Whether the event may be attempted right now.
    ///
    /// Checks attempts remaining and that any scheduled cooldown has
    /// elapsed against the injected clock.
    pub fn can_retry_now(&self, event: &WebhookEvent) -> bool {
        event.can_retry_now(self.now())
    }

    /// Current time from the injected clock.
    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now_utc()
    }
}
