//! Webhook delivery engine with at-least-once semantics.
//!
//! This crate implements the delivery side of Courier: the HTTP transport,
//! the fixed-table backoff schedule, the per-event lifecycle state machine,
//! and the batch processors a background scheduler drives.
//!
//! # Delivery flow
//!
//! 1. A producer records an event via [`DeliveryService::create_event`];
//!    ingestion never delivers synchronously.
//! 2. A scheduler periodically invokes [`BatchProcessor::process_pending`],
//!    which drives each due event through a single delivery attempt.
//! 3. The attempt counter is incremented durably *before* the network call;
//!    failures schedule the next retry from the escalating backoff table
//!    until the attempt budget is exhausted.
//!
//! Receivers must tolerate duplicate POSTs: if two workers race on the same
//! retry window both may deliver. Idempotency of effects is the receiver's
//! responsibility.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_core::{storage::Storage, RealClock};
//! use courier_delivery::{
//!     backoff::RetrySchedule,
//!     client::{ClientConfig, DeliveryClient},
//!     lifecycle::DeliveryService,
//!     store::PostgresEventStore,
//!     BatchProcessor,
//! };
//!
//! # async fn example(pool: sqlx::PgPool) -> courier_delivery::Result<()> {
//! let store = Arc::new(PostgresEventStore::new(Arc::new(Storage::new(pool))));
//! let client = DeliveryClient::new(ClientConfig::default())?;
//! let service = Arc::new(DeliveryService::new(
//!     store,
//!     client,
//!     RetrySchedule::default(),
//!     Arc::new(RealClock::new()),
//! ));
//!
//! let processor = BatchProcessor::new(service);
//! processor.process_pending(50).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod analytics;
pub mod backoff;
pub mod batch;
pub mod client;
pub mod error;
pub mod lifecycle;
pub mod store;

pub use analytics::AnalyticsService;
pub use backoff::RetrySchedule;
pub use batch::BatchProcessor;
pub use client::{ClientConfig, DeliveryClient};
pub use error::{DeliveryError, Result};
pub use lifecycle::DeliveryService;
pub use store::{EventStore, PostgresEventStore};

/// Default batch size for the background scheduler entry point.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
