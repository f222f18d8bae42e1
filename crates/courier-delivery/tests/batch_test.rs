//! Batch processor tests: eligibility re-checks, aggregate accounting, and
//! error isolation between events in one batch.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use courier_core::{
    models::{EventId, TenantId, WebhookEvent},
    Clock, TestClock,
};
use courier_delivery::{
    backoff::RetrySchedule, client::DeliveryClient, store::mock::MockEventStore, BatchProcessor,
    DeliveryService,
};
use sqlx::types::Json;
use uuid::Uuid;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn test_clock() -> TestClock {
    TestClock::starting_at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
}

fn processor_with(store: Arc<MockEventStore>, clock: TestClock) -> BatchProcessor {
    let service = Arc::new(DeliveryService::new(
        store,
        DeliveryClient::with_defaults().expect("client builds"),
        RetrySchedule::default(),
        Arc::new(clock),
    ));
    BatchProcessor::new(service)
}

fn event_for(tenant_id: TenantId, target_url: &str) -> WebhookEvent {
    let now = Utc::now();
    WebhookEvent {
        id: EventId::new(),
        tenant_id,
        event_type: "booking.confirmed".to_string(),
        target_url: target_url.to_string(),
        payload: Json(serde_json::json!({"booking_id": Uuid::new_v4()})),
        max_attempts: 3,
        attempt_count: 0,
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

fn failed_event(tenant_id: TenantId, target_url: &str, attempt_count: i32) -> WebhookEvent {
    let mut event = event_for(tenant_id, target_url);
    event.attempt_count = attempt_count;
    event.failure_reason = Some("endpoint returned HTTP 500".to_string());
    event.response_code = Some(500);
    event
}

async fn accepting_server() -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;
    mock_server
}

#[tokio::test]
async fn bulk_retry_skips_exhausted_events() {
    let mock_server = accepting_server().await;
    let tenant_id = TenantId::new();
    let store = Arc::new(MockEventStore::new());

    // Five failed events, two of them exhausted.
    for attempts in [1, 1, 2, 3, 3] {
        store.insert(failed_event(tenant_id, &mock_server.uri(), attempts)).await;
    }

    let processor = processor_with(store, test_clock());
    let result = processor.bulk_retry(tenant_id, None, None).await.unwrap();

    assert_eq!(result.retried, 3);
    assert_eq!(result.succeeded, 3);
    assert_eq!(result.failed, 0);
}

#[tokio::test]
async fn bulk_retry_honours_type_and_age_filters() {
    let mock_server = accepting_server().await;
    let tenant_id = TenantId::new();
    let clock = test_clock();
    let now = clock.now_utc();
    let store = Arc::new(MockEventStore::new());

    let mut old_booking = failed_event(tenant_id, &mock_server.uri(), 1);
    old_booking.created_at = now - Duration::days(2);
    store.insert(old_booking).await;

    let mut fresh_booking = failed_event(tenant_id, &mock_server.uri(), 1);
    fresh_booking.created_at = now;
    store.insert(fresh_booking).await;

    let mut old_payment = failed_event(tenant_id, &mock_server.uri(), 1);
    old_payment.event_type = "payment.captured".to_string();
    old_payment.created_at = now - Duration::days(2);
    store.insert(old_payment).await;

    let result = processor_with(store, clock)
        .bulk_retry(tenant_id, Some("booking.confirmed"), Some(now - Duration::days(1)))
        .await
        .unwrap();

    // Only the old booking event matches both filters.
    assert_eq!(result.retried, 1);
}

#[tokio::test]
async fn bulk_retry_skips_events_still_in_cooldown() {
    let mock_server = accepting_server().await;
    let tenant_id = TenantId::new();
    let clock = test_clock();
    let store = Arc::new(MockEventStore::new());

    let mut cooling = failed_event(tenant_id, &mock_server.uri(), 1);
    cooling.next_retry_at = Some(clock.now_utc() + Duration::minutes(30));
    store.insert(cooling).await;

    let mut due = failed_event(tenant_id, &mock_server.uri(), 1);
    due.next_retry_at = Some(clock.now_utc() - Duration::minutes(1));
    store.insert(due).await;

    let result = processor_with(store, clock).bulk_retry(tenant_id, None, None).await.unwrap();

    assert_eq!(result.retried, 1);
    assert_eq!(result.succeeded, 1);
}

#[tokio::test]
async fn process_pending_attempts_only_due_events() {
    let mock_server = accepting_server().await;
    let tenant_id = TenantId::new();
    let clock = test_clock();
    let now = clock.now_utc();
    let store = Arc::new(MockEventStore::new());

    let mut due = failed_event(tenant_id, &mock_server.uri(), 1);
    due.next_retry_at = Some(now - Duration::minutes(5));
    let due_id = due.id;
    store.insert(due).await;

    let mut not_due = failed_event(tenant_id, &mock_server.uri(), 1);
    not_due.next_retry_at = Some(now + Duration::minutes(5));
    let not_due_id = not_due.id;
    store.insert(not_due).await;

    let result = processor_with(store.clone(), clock).process_pending(10).await.unwrap();

    assert_eq!(result.retried, 1);
    assert!(store.get(due_id).await.unwrap().delivered);
    assert!(!store.get(not_due_id).await.unwrap().delivered);
}

#[tokio::test]
async fn process_pending_respects_batch_size() {
    let mock_server = accepting_server().await;
    let tenant_id = TenantId::new();
    let clock = test_clock();
    let now = clock.now_utc();
    let store = Arc::new(MockEventStore::new());

    for i in 0..5 {
        let mut event = failed_event(tenant_id, &mock_server.uri(), 1);
        event.next_retry_at = Some(now - Duration::minutes(i64::from(i) + 1));
        store.insert(event).await;
    }

    let result = processor_with(store, clock).process_pending(2).await.unwrap();

    assert_eq!(result.retried, 2);
}

#[tokio::test]
async fn retry_failed_aggregates_mixed_outcomes() {
    let ok_server = accepting_server().await;

    let failing_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("still broken"))
        .mount(&failing_server)
        .await;

    let tenant_id = TenantId::new();
    let clock = test_clock();
    let now = clock.now_utc();
    let store = Arc::new(MockEventStore::new());

    let mut succeeding = failed_event(tenant_id, &ok_server.uri(), 1);
    succeeding.created_at = now - Duration::minutes(10);
    store.insert(succeeding).await;

    let mut failing = failed_event(tenant_id, &failing_server.uri(), 1);
    failing.created_at = now - Duration::minutes(5);
    store.insert(failing).await;

    // Exhausted events are not candidates at all.
    store.insert(failed_event(tenant_id, &ok_server.uri(), 3)).await;

    let result = processor_with(store, clock).retry_failed(tenant_id, 10).await.unwrap();

    assert_eq!(result.retried, 2);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 1);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn retry_failed_is_scoped_to_the_tenant() {
    let mock_server = accepting_server().await;
    let tenant_id = TenantId::new();
    let store = Arc::new(MockEventStore::new());

    store.insert(failed_event(tenant_id, &mock_server.uri(), 1)).await;
    store.insert(failed_event(TenantId::new(), &mock_server.uri(), 1)).await;

    let result =
        processor_with(store, test_clock()).retry_failed(tenant_id, 10).await.unwrap();

    assert_eq!(result.retried, 1);
}

#[tokio::test]
async fn store_error_on_one_event_does_not_abort_the_batch() {
    let mock_server = accepting_server().await;
    let tenant_id = TenantId::new();
    let clock = test_clock();
    let now = clock.now_utc();
    let store = Arc::new(MockEventStore::new());

    let mut first = failed_event(tenant_id, &mock_server.uri(), 1);
    first.created_at = now - Duration::minutes(10);
    store.insert(first).await;

    let mut second = failed_event(tenant_id, &mock_server.uri(), 1);
    second.created_at = now - Duration::minutes(5);
    let second_id = second.id;
    store.insert(second).await;

    // The first event's increment fails; the batch continues.
    store.fail_next_increment("database error: connection lost").await;

    let result = processor_with(store.clone(), clock).retry_failed(tenant_id, 10).await.unwrap();

    assert_eq!(result.retried, 2);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("connection lost"));
    assert!(store.get(second_id).await.unwrap().delivered);
}
