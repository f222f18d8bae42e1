//! Core domain models, errors, and persistence for the Courier webhook
//! delivery engine.
//!
//! Provides strongly-typed domain primitives, the webhook event entity and
//! its derived-state rules, the event store repositories, trigger payload
//! builders, and the clock abstraction the delivery crate schedules against.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;
pub mod triggers;

pub use error::{CoreError, Result};
pub use models::{
    DeliveryResult, EventFilter, EventId, NewWebhookEvent, RetryBatchResult, TenantId,
    WebhookAnalytics, WebhookEvent, WebhookStats, DEFAULT_MAX_ATTEMPTS,
};
pub use time::{Clock, RealClock, TestClock};
