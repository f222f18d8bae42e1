//! Storage abstraction for the delivery engine.
//!
//! The engine never touches SQL directly: it speaks [`EventStore`], which
//! production code implements over the core repositories and tests implement
//! in memory. The separation lets lifecycle and batch logic be exercised
//! without a database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    error::Result,
    models::{EventFilter, EventId, TenantId, WebhookAnalytics, WebhookEvent, WebhookStats},
    storage::Storage,
};

/// Number of failure reasons surfaced in analytics.
const TOP_FAILURE_REASONS: usize = 10;

/// Store operations required by the delivery engine.
///
/// Mirrors the event store's contract: `increment_attempt_count` must be
/// atomic per event and durable before the caller issues the network call.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Persists a new event.
    async fn create(&self, event: &WebhookEvent) -> Result<EventId>;

    /// Loads an event by ID.
    async fn find_by_id(&self, event_id: EventId) -> Result<Option<WebhookEvent>>;

    /// Atomically increments the attempt counter, returning the new value.
    async fn increment_attempt_count(&self, event_id: EventId) -> Result<i32>;

    /// Marks an event delivered with the observed 2xx response.
    async fn mark_delivered(
        &self,
        event_id: EventId,
        response_code: i32,
        response_body: Option<&str>,
    ) -> Result<()>;

    /// Records a failed attempt and clears any scheduled retry.
    async fn mark_failed(
        &self,
        event_id: EventId,
        response_code: i32,
        failure_reason: &str,
    ) -> Result<()>;

    /// Schedules the next retry time.
    async fn set_next_retry(&self, event_id: EventId, at: DateTime<Utc>) -> Result<()>;

    /// Resets the attempt counter and schedule for a fresh cycle.
    async fn reset_for_retry(&self, event_id: EventId) -> Result<()>;

    /// Events whose scheduled retry time has elapsed, oldest schedule first.
    async fn pending_retries(&self, limit: usize, now: DateTime<Utc>)
        -> Result<Vec<WebhookEvent>>;

    /// A tenant's retryable failed events, oldest first.
    async fn failed_by_tenant(&self, tenant_id: TenantId, limit: usize)
        -> Result<Vec<WebhookEvent>>;

    /// Filtered event query.
    async fn find_by_filters(&self, filter: &EventFilter) -> Result<Vec<WebhookEvent>>;

    /// Headline delivery counters for a tenant.
    async fn stats(
        &self,
        tenant_id: TenantId,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<WebhookStats>;

    /// Full analytics for a tenant over an optional window.
    async fn analytics(
        &self,
        tenant_id: TenantId,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<WebhookAnalytics>;

    /// Deletes terminal events created before the cutoff.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Deletes delivered events delivered before the cutoff.
    async fn delete_delivered_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Deletes exhausted events past the attempt floor and age cutoff.
    async fn purge_failed(&self, min_attempts: i32, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Liveness probe against the underlying store.
    async fn health_check(&self) -> Result<()>;
}

/// Production store implementation over PostgreSQL.
///
/// Thin adapter around the core repositories; all SQL lives there.
pub struct PostgresEventStore {
    storage: Arc<Storage>,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn create(&self, event: &WebhookEvent) -> Result<EventId> {
        self.storage.webhook_events.create(event).await
    }

    async fn find_by_id(&self, event_id: EventId) -> Result<Option<WebhookEvent>> {
        self.storage.webhook_events.find_by_id(event_id).await
    }

    async fn increment_attempt_count(&self, event_id: EventId) -> Result<i32> {
        self.storage.webhook_events.increment_attempt_count(event_id).await
    }

    async fn mark_delivered(
        &self,
        event_id: EventId,
        response_code: i32,
        response_body: Option<&str>,
    ) -> Result<()> {
        self.storage.webhook_events.mark_delivered(event_id, response_code, response_body).await
    }

    async fn mark_failed(
        &self,
        event_id: EventId,
        response_code: i32,
        failure_reason: &str,
    ) -> Result<()> {
        self.storage.webhook_events.mark_failed(event_id, response_code, failure_reason).await
    }

    async fn set_next_retry(&self, event_id: EventId, at: DateTime<Utc>) -> Result<()> {
        self.storage.webhook_events.set_next_retry(event_id, at).await
    }

    async fn reset_for_retry(&self, event_id: EventId) -> Result<()> {
        self.storage.webhook_events.reset_for_retry(event_id).await
    }

    async fn pending_retries(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookEvent>> {
        self.storage.webhook_events.pending_retries(limit, now).await
    }

    async fn failed_by_tenant(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>> {
        self.storage.webhook_events.failed_by_tenant(tenant_id, limit).await
    }

    async fn find_by_filters(&self, filter: &EventFilter) -> Result<Vec<WebhookEvent>> {
        self.storage.webhook_events.find_by_filters(filter).await
    }

    async fn stats(
        &self,
        tenant_id: TenantId,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<WebhookStats> {
        self.storage.webhook_events.stats(tenant_id, window_start, window_end).await
    }

    async fn analytics(
        &self,
        tenant_id: TenantId,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<WebhookAnalytics> {
        let events = &self.storage.webhook_events;

        let stats = events.stats(tenant_id, window_start, window_end).await?;
        let by_event_type = events.count_by_event_type(tenant_id, window_start, window_end).await?;
        let by_status = events.count_by_status(tenant_id, window_start, window_end).await?;
        let top_failure_reasons = events
            .failure_reasons(tenant_id, TOP_FAILURE_REASONS, window_start, window_end)
            .await?;
        let average_delivery_seconds =
            events.average_delivery_seconds(tenant_id, window_start, window_end).await?;

        Ok(WebhookAnalytics {
            stats,
            by_event_type,
            by_status,
            top_failure_reasons,
            average_delivery_seconds,
            window_start,
            window_end,
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.storage.webhook_events.delete_older_than(cutoff).await
    }

    async fn delete_delivered_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.storage.webhook_events.delete_delivered_older_than(cutoff).await
    }

    async fn purge_failed(&self, min_attempts: i32, cutoff: DateTime<Utc>) -> Result<u64> {
        self.storage.webhook_events.purge_failed(min_attempts, cutoff).await
    }

    async fn health_check(&self) -> Result<()> {
        self.storage.health_check().await
    }
}

pub mod mock {
    //! In-memory store for testing delivery logic without a database.

    use std::collections::HashMap;

    use courier_core::error::CoreError;
    use courier_core::models::{EventCount, FailureReason};
    use tokio::sync::RwLock;

    use super::*;

    /// Mock store holding events in a map behind an async lock.
    ///
    /// Mirrors the production store's semantics closely enough for lifecycle
    /// and batch tests: increments are atomic under the lock, `mark_failed`
    /// clears the schedule, and the cleanup predicates match the SQL.
    #[derive(Default)]
    pub struct MockEventStore {
        events: RwLock<HashMap<EventId, WebhookEvent>>,
        increment_error: RwLock<Option<String>>,
    }

    impl MockEventStore {
        /// Creates an empty mock store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Inserts an event directly, bypassing validation.
        pub async fn insert(&self, event: WebhookEvent) {
            self.events.write().await.insert(event.id, event);
        }

        /// Returns a snapshot of an event.
        pub async fn get(&self, event_id: EventId) -> Option<WebhookEvent> {
            self.events.read().await.get(&event_id).cloned()
        }

        /// Number of events currently stored.
        pub async fn len(&self) -> usize {
            self.events.read().await.len()
        }

        /// True when the store holds no events.
        pub async fn is_empty(&self) -> bool {
            self.events.read().await.is_empty()
        }

        /// Injects an error for the next `increment_attempt_count` call.
        pub async fn fail_next_increment(&self, message: impl Into<String>) {
            *self.increment_error.write().await = Some(message.into());
        }

        fn matches(filter: &EventFilter, event: &WebhookEvent) -> bool {
            if let Some(tenant_id) = filter.tenant_id {
                if event.tenant_id != tenant_id {
                    return false;
                }
            }
            if let Some(types) = &filter.event_types {
                if !types.iter().any(|t| t == &event.event_type) {
                    return false;
                }
            }
            if let Some(delivered) = filter.delivered {
                if event.delivered != delivered {
                    return false;
                }
            }
            if let Some(fragment) = &filter.url_contains {
                if !event.target_url.contains(fragment.as_str()) {
                    return false;
                }
            }
            if let Some(min) = filter.min_attempts {
                if event.attempt_count < min {
                    return false;
                }
            }
            if let Some(max) = filter.max_attempts {
                if event.attempt_count > max {
                    return false;
                }
            }
            if let Some(after) = filter.created_after {
                if event.created_at < after {
                    return false;
                }
            }
            if let Some(before) = filter.created_before {
                if event.created_at >= before {
                    return false;
                }
            }
            if let Some(codes) = &filter.response_codes {
                match event.response_code {
                    Some(code) if codes.contains(&code) => {},
                    _ => return false,
                }
            }
            true
        }

        fn in_window(
            event: &WebhookEvent,
            window_start: Option<DateTime<Utc>>,
            window_end: Option<DateTime<Utc>>,
        ) -> bool {
            window_start.is_none_or(|start| event.created_at >= start)
                && window_end.is_none_or(|end| event.created_at < end)
        }
    }

    #[async_trait]
    impl EventStore for MockEventStore {
        async fn create(&self, event: &WebhookEvent) -> Result<EventId> {
            self.events.write().await.insert(event.id, event.clone());
            Ok(event.id)
        }

        async fn find_by_id(&self, event_id: EventId) -> Result<Option<WebhookEvent>> {
            Ok(self.events.read().await.get(&event_id).cloned())
        }

        async fn increment_attempt_count(&self, event_id: EventId) -> Result<i32> {
            if let Some(message) = self.increment_error.write().await.take() {
                return Err(CoreError::Database(message));
            }

            let mut events = self.events.write().await;
            let event = events
                .get_mut(&event_id)
                .ok_or_else(|| CoreError::NotFound(format!("event {event_id} not found")))?;
            event.attempt_count += 1;
            event.updated_at = Utc::now();
            Ok(event.attempt_count)
        }

        async fn mark_delivered(
            &self,
            event_id: EventId,
            response_code: i32,
            response_body: Option<&str>,
        ) -> Result<()> {
            if let Some(event) = self.events.write().await.get_mut(&event_id) {
                event.delivered = true;
                event.response_code = Some(response_code);
                event.response_body = response_body.map(str::to_owned);
                event.failure_reason = None;
                event.next_retry_at = None;
                if event.delivered_at.is_none() {
                    event.delivered_at = Some(Utc::now());
                }
                event.updated_at = Utc::now();
            }
            Ok(())
        }

        async fn mark_failed(
            &self,
            event_id: EventId,
            response_code: i32,
            failure_reason: &str,
        ) -> Result<()> {
            if let Some(event) = self.events.write().await.get_mut(&event_id) {
                event.response_code = Some(response_code);
                event.failure_reason = Some(failure_reason.to_string());
                event.next_retry_at = None;
                event.updated_at = Utc::now();
            }
            Ok(())
        }

        async fn set_next_retry(&self, event_id: EventId, at: DateTime<Utc>) -> Result<()> {
            if let Some(event) = self.events.write().await.get_mut(&event_id) {
                if !event.delivered {
                    event.next_retry_at = Some(at);
                    event.updated_at = Utc::now();
                }
            }
            Ok(())
        }

        async fn reset_for_retry(&self, event_id: EventId) -> Result<()> {
            if let Some(event) = self.events.write().await.get_mut(&event_id) {
                if !event.delivered {
                    event.attempt_count = 0;
                    event.next_retry_at = None;
                    event.failure_reason = None;
                    event.updated_at = Utc::now();
                }
            }
            Ok(())
        }

        async fn pending_retries(
            &self,
            limit: usize,
            now: DateTime<Utc>,
        ) -> Result<Vec<WebhookEvent>> {
            let events = self.events.read().await;
            let mut due: Vec<WebhookEvent> = events
                .values()
                .filter(|e| !e.delivered && e.next_retry_at.is_some_and(|at| at <= now))
                .cloned()
                .collect();
            due.sort_by_key(|e| e.next_retry_at);
            due.truncate(limit);
            Ok(due)
        }

        async fn failed_by_tenant(
            &self,
            tenant_id: TenantId,
            limit: usize,
        ) -> Result<Vec<WebhookEvent>> {
            let events = self.events.read().await;
            let mut failed: Vec<WebhookEvent> = events
                .values()
                .filter(|e| {
                    e.tenant_id == tenant_id
                        && !e.delivered
                        && e.attempt_count > 0
                        && e.attempt_count < e.max_attempts
                })
                .cloned()
                .collect();
            failed.sort_by_key(|e| e.created_at);
            failed.truncate(limit);
            Ok(failed)
        }

        async fn find_by_filters(&self, filter: &EventFilter) -> Result<Vec<WebhookEvent>> {
            let events = self.events.read().await;
            let mut matched: Vec<WebhookEvent> =
                events.values().filter(|e| Self::matches(filter, e)).cloned().collect();
            matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            let offset = usize::try_from(filter.offset.max(0)).unwrap_or(0);
            let limit = if filter.limit > 0 {
                usize::try_from(filter.limit).unwrap_or(usize::MAX)
            } else {
                100
            };
            Ok(matched.into_iter().skip(offset).take(limit).collect())
        }

        async fn stats(
            &self,
            tenant_id: TenantId,
            window_start: Option<DateTime<Utc>>,
            window_end: Option<DateTime<Utc>>,
        ) -> Result<WebhookStats> {
            let events = self.events.read().await;
            let scoped: Vec<&WebhookEvent> = events
                .values()
                .filter(|e| e.tenant_id == tenant_id && Self::in_window(e, window_start, window_end))
                .collect();

            let total = scoped.len() as i64;
            let delivered = scoped.iter().filter(|e| e.delivered).count() as i64;
            let failed = scoped.iter().filter(|e| e.has_failed()).count() as i64;
            let pending =
                scoped.iter().filter(|e| !e.delivered && e.attempt_count == 0).count() as i64;
            let attempts: i64 = scoped.iter().map(|e| i64::from(e.attempt_count)).sum();

            Ok(WebhookStats {
                total,
                delivered,
                failed,
                pending,
                delivery_rate: if total > 0 { delivered as f64 / total as f64 } else { 0.0 },
                average_attempts: if total > 0 { attempts as f64 / total as f64 } else { 0.0 },
            })
        }

        async fn analytics(
            &self,
            tenant_id: TenantId,
            window_start: Option<DateTime<Utc>>,
            window_end: Option<DateTime<Utc>>,
        ) -> Result<WebhookAnalytics> {
            let stats = self.stats(tenant_id, window_start, window_end).await?;

            let events = self.events.read().await;
            let scoped: Vec<&WebhookEvent> = events
                .values()
                .filter(|e| e.tenant_id == tenant_id && Self::in_window(e, window_start, window_end))
                .collect();

            let mut by_type: HashMap<String, i64> = HashMap::new();
            let mut by_status: HashMap<&'static str, i64> = HashMap::new();
            let mut reasons: HashMap<String, i64> = HashMap::new();
            let mut delivery_seconds = Vec::new();

            for event in &scoped {
                *by_type.entry(event.event_type.clone()).or_default() += 1;

                let status = if event.delivered {
                    "delivered"
                } else if event.attempt_count == 0 {
                    "pending"
                } else if event.is_exhausted() {
                    "exhausted"
                } else {
                    "failed"
                };
                *by_status.entry(status).or_default() += 1;

                if !event.delivered {
                    if let Some(reason) = &event.failure_reason {
                        *reasons.entry(reason.clone()).or_default() += 1;
                    }
                }
                if let Some(delivered_at) = event.delivered_at {
                    delivery_seconds
                        .push((delivered_at - event.created_at).num_milliseconds() as f64 / 1000.0);
                }
            }

            let mut by_event_type: Vec<EventCount> =
                by_type.into_iter().map(|(key, count)| EventCount { key, count }).collect();
            by_event_type.sort_by(|a, b| b.count.cmp(&a.count).then(a.key.cmp(&b.key)));

            let mut by_status: Vec<EventCount> = by_status
                .into_iter()
                .map(|(key, count)| EventCount { key: key.to_string(), count })
                .collect();
            by_status.sort_by(|a, b| b.count.cmp(&a.count).then(a.key.cmp(&b.key)));

            let mut top_failure_reasons: Vec<FailureReason> =
                reasons.into_iter().map(|(reason, count)| FailureReason { reason, count }).collect();
            top_failure_reasons
                .sort_by(|a, b| b.count.cmp(&a.count).then(a.reason.cmp(&b.reason)));
            top_failure_reasons.truncate(TOP_FAILURE_REASONS);

            let average_delivery_seconds = if delivery_seconds.is_empty() {
                None
            } else {
                Some(delivery_seconds.iter().sum::<f64>() / delivery_seconds.len() as f64)
            };

            Ok(WebhookAnalytics {
                stats,
                by_event_type,
                by_status,
                top_failure_reasons,
                average_delivery_seconds,
                window_start,
                window_end,
            })
        }

        async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
            let mut events = self.events.write().await;
            let before = events.len();
            events.retain(|_, e| {
                !(e.created_at < cutoff && (e.delivered || e.is_exhausted()))
            });
            Ok((before - events.len()) as u64)
        }

        async fn delete_delivered_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
            let mut events = self.events.write().await;
            let before = events.len();
            events.retain(|_, e| !(e.delivered && e.delivered_at.is_some_and(|at| at < cutoff)));
            Ok((before - events.len()) as u64)
        }

        async fn purge_failed(&self, min_attempts: i32, cutoff: DateTime<Utc>) -> Result<u64> {
            let mut events = self.events.write().await;
            let before = events.len();
            events.retain(|_, e| {
                !(!e.delivered
                    && e.attempt_count >= min_attempts
                    && e.next_retry_at.is_none()
                    && e.created_at < cutoff)
            });
            Ok((before - events.len()) as u64)
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }
}
