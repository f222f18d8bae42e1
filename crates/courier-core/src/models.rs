//! Core domain models and strongly-typed identifiers.
//!
//! Defines the webhook event entity, newtype ID wrappers for compile-time
//! type safety, delivery outcome types, and the aggregate/filter types used
//! by batch processing and analytics.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Default number of delivery attempts when the producer does not specify one.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Strongly-typed webhook event identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Assigned at creation
/// and follows the event through its entire delivery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed tenant identifier.
///
/// Scopes every query and batch operation. Events belonging to different
/// tenants are never mixed within one batch entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    /// Creates a new random tenant ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns true for the all-zero UUID, which is rejected at ingestion.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TenantId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for TenantId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for TenantId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for TenantId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Durable record of an outbound business event awaiting delivery.
///
/// The payload is immutable once set: every attempt posts the same document,
/// so receivers never observe re-marshalling drift between retries. All
/// mutation goes through the lifecycle manager; terminal states are
/// `delivered == true` or exhaustion (`attempt_count >= max_attempts` with
/// no retry scheduled).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEvent {
    /// Unique identifier, assigned at creation.
    pub id: EventId,

    /// Tenant that owns this event.
    pub tenant_id: TenantId,

    /// Business event category, e.g. `booking.confirmed`.
    pub event_type: String,

    /// Destination endpoint URL.
    pub target_url: String,

    /// JSON document posted to the endpoint. Never mutated after creation.
    pub payload: Json<serde_json::Value>,

    /// Maximum delivery attempts including the initial attempt.
    pub max_attempts: i32,

    /// Attempts made so far. Incremented durably before each network call.
    pub attempt_count: i32,

    /// Terminal success flag.
    pub delivered: bool,

    /// Last HTTP status observed; 0 when the transport produced no response.
    pub response_code: Option<i32>,

    /// Last response body snippet, truncated to the transport's cap.
    pub response_body: Option<String>,

    /// Description of the last failure.
    pub failure_reason: Option<String>,

    /// When the next retry becomes eligible. Set only while the event is
    /// undelivered with attempts remaining.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// When the first successful delivery happened. Immutable once set.
    pub delivered_at: Option<DateTime<Utc>>,

    /// Caller-supplied metadata, opaque to the engine.
    pub metadata: Json<serde_json::Value>,

    /// When this event was created.
    pub created_at: DateTime<Utc>,

    /// When this event was last modified.
    pub updated_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// True once the event has failed all of its allotted attempts.
    pub fn is_exhausted(&self) -> bool {
        !self.delivered && self.attempt_count >= self.max_attempts && self.next_retry_at.is_none()
    }

    /// True if at least one attempt failed and the event is not delivered.
    pub fn has_failed(&self) -> bool {
        !self.delivered && self.attempt_count > 0
    }

    /// Whether a delivery attempt is permitted at `now`.
    ///
    /// Requires attempts remaining and any scheduled cooldown to have
    /// elapsed. Used by batch processors to guard against races with
    /// concurrently-scheduled retries.
    pub fn can_retry_now(&self, now: DateTime<Utc>) -> bool {
        if self.delivered || self.attempt_count >= self.max_attempts {
            return false;
        }
        self.next_retry_at.is_none_or(|at| at <= now)
    }
}

/// Ingestion request for a new webhook event.
///
/// `max_attempts` of zero or `None` falls back to [`DEFAULT_MAX_ATTEMPTS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWebhookEvent {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Business event category.
    pub event_type: String,
    /// Destination endpoint URL.
    pub target_url: String,
    /// JSON payload to deliver.
    pub payload: serde_json::Value,
    /// Optional attempt budget override.
    pub max_attempts: Option<i32>,
    /// Optional caller metadata.
    pub metadata: Option<serde_json::Value>,
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Event the attempt was made for.
    pub event_id: EventId,
    /// Whether the endpoint acknowledged with a 2xx status.
    pub success: bool,
    /// Attempt count after this attempt (unchanged for short-circuits).
    pub attempt_count: i32,
    /// HTTP status observed, 0 for transport-level failures.
    pub response_code: Option<i32>,
    /// Failure description when `success` is false.
    pub failure_reason: Option<String>,
    /// Next eligible retry time, when attempts remain.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Delivery timestamp when `success` is true.
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Aggregate outcome of one batch retry invocation.
///
/// Partial failure is the expected steady state: individual event failures
/// are tallied and recorded, never raised to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBatchResult {
    /// Events for which a delivery attempt was made.
    pub retried: u32,
    /// Attempts that ended in a 2xx acknowledgment.
    pub succeeded: u32,
    /// Attempts that failed (retryable failures and store errors alike).
    pub failed: u32,
    /// Per-event error descriptions for store failures.
    pub errors: Vec<String>,
}

impl RetryBatchResult {
    /// Records a successful attempt.
    pub fn record_success(&mut self) {
        self.retried += 1;
        self.succeeded += 1;
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self) {
        self.retried += 1;
        self.failed += 1;
    }

    /// Records a store error for one event and counts it as failed.
    pub fn record_error(&mut self, event_id: EventId, message: impl fmt::Display) {
        self.retried += 1;
        self.failed += 1;
        self.errors.push(format!("{event_id}: {message}"));
    }
}

/// Filter criteria for event queries.
///
/// All fields are optional and combine conjunctively. Results are paged via
/// `limit`/`offset`, newest first unless the caller asks otherwise.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to a tenant.
    pub tenant_id: Option<TenantId>,
    /// Restrict to these event types.
    pub event_types: Option<Vec<String>>,
    /// Restrict by terminal-success flag.
    pub delivered: Option<bool>,
    /// Substring match on the target URL.
    pub url_contains: Option<String>,
    /// Minimum attempt count (inclusive).
    pub min_attempts: Option<i32>,
    /// Maximum attempt count (inclusive).
    pub max_attempts: Option<i32>,
    /// Created at or after this time.
    pub created_after: Option<DateTime<Utc>>,
    /// Created strictly before this time.
    pub created_before: Option<DateTime<Utc>>,
    /// Restrict to these last-observed response codes.
    pub response_codes: Option<Vec<i32>>,
    /// Maximum rows to return.
    pub limit: i64,
    /// Rows to skip.
    pub offset: i64,
}

impl EventFilter {
    /// Creates an empty filter with the given page size.
    pub fn with_limit(limit: i64) -> Self {
        Self { limit, ..Self::default() }
    }
}

/// Headline delivery counters for a tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookStats {
    /// All events in scope.
    pub total: i64,
    /// Events delivered successfully.
    pub delivered: i64,
    /// Undelivered events with at least one failed attempt.
    pub failed: i64,
    /// Events that have not been attempted yet.
    pub pending: i64,
    /// `delivered / total`, 0.0 when there are no events.
    pub delivery_rate: f64,
    /// Mean attempt count across all events.
    pub average_attempts: f64,
}

/// One failure reason with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FailureReason {
    /// Failure description as recorded on the events.
    pub reason: String,
    /// Number of events currently carrying this reason.
    pub count: i64,
}

/// Event count grouped by one dimension (event type or status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventCount {
    /// Group key.
    pub key: String,
    /// Events in the group.
    pub count: i64,
}

/// Full delivery analytics for a tenant over an optional time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookAnalytics {
    /// Headline counters.
    pub stats: WebhookStats,
    /// Breakdown by event type.
    pub by_event_type: Vec<EventCount>,
    /// Breakdown by lifecycle status (pending/delivered/failed/exhausted).
    pub by_status: Vec<EventCount>,
    /// Most frequent failure reasons, descending.
    pub top_failure_reasons: Vec<FailureReason>,
    /// Mean seconds from creation to delivery, when any event delivered.
    pub average_delivery_seconds: Option<f64>,
    /// Window start, when one was requested.
    pub window_start: Option<DateTime<Utc>>,
    /// Window end, when one was requested.
    pub window_end: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn event(attempt_count: i32, max_attempts: i32) -> WebhookEvent {
        let now = Utc::now();
        WebhookEvent {
            id: EventId::new(),
            tenant_id: TenantId::new(),
            event_type: "booking.confirmed".to_string(),
            target_url: "https://example.com/hooks".to_string(),
            payload: Json(serde_json::json!({"ok": true})),
            max_attempts,
            attempt_count,
            delivered: false,
            response_code: None,
            response_body: None,
            failure_reason: None,
            next_retry_at: None,
            delivered_at: None,
            metadata: Json(serde_json::Value::Null),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn exhaustion_is_derived_from_counts_and_schedule() {
        let mut e = event(3, 3);
        assert!(e.is_exhausted());

        e.next_retry_at = Some(Utc::now());
        assert!(!e.is_exhausted());

        let mut delivered = event(2, 3);
        delivered.delivered = true;
        assert!(!delivered.is_exhausted());
    }

    #[test]
    fn can_retry_now_respects_cooldown() {
        let now = Utc::now();
        let mut e = event(1, 3);
        assert!(e.can_retry_now(now));

        e.next_retry_at = Some(now + Duration::minutes(5));
        assert!(!e.can_retry_now(now));
        assert!(e.can_retry_now(now + Duration::minutes(5)));
    }

    #[test]
    fn can_retry_now_rejects_exhausted_and_delivered() {
        let now = Utc::now();
        let exhausted = event(3, 3);
        assert!(!exhausted.can_retry_now(now));

        let mut delivered = event(1, 3);
        delivered.delivered = true;
        assert!(!delivered.can_retry_now(now));
    }

    #[test]
    fn batch_result_accumulates_outcomes() {
        let mut result = RetryBatchResult::default();
        result.record_success();
        result.record_failure();
        result.record_error(EventId::new(), "database error: connection lost");

        assert_eq!(result.retried, 3);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 2);
        assert_eq!(result.errors.len(), 1);
    }
}
