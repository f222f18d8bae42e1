//! Courier webhook delivery service.
//!
//! Main entry point: initializes tracing and the database pool, then runs
//! the background scheduler that drives pending retries through the
//! delivery engine and performs periodic cleanup.

mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_core::{storage::Storage, RealClock};
use courier_delivery::{
    backoff::RetrySchedule,
    client::{ClientConfig, DeliveryClient},
    AnalyticsService, BatchProcessor, DeliveryService, PostgresEventStore,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting Courier webhook delivery service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        poll_interval_seconds = config.poll_interval_seconds,
        batch_size = config.batch_size,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    run_migrations(&pool).await?;
    info!("database migrations completed");

    let store = Arc::new(PostgresEventStore::new(Arc::new(Storage::new(pool.clone()))));
    let clock = Arc::new(RealClock::new());
    let client = DeliveryClient::new(ClientConfig {
        timeout: Duration::from_secs(config.delivery_timeout_seconds),
        ..ClientConfig::default()
    })?;
    let service = Arc::new(DeliveryService::new(
        store.clone(),
        client,
        RetrySchedule::default(),
        clock.clone(),
    ));
    let processor = BatchProcessor::new(service);
    let analytics = AnalyticsService::new(store, clock);

    let shutdown = CancellationToken::new();
    let scheduler =
        tokio::spawn(run_scheduler(config.clone(), processor, analytics, shutdown.clone()));

    info!("courier is processing webhook retries");

    shutdown_signal().await;
    info!("shutdown signal received, stopping scheduler");

    shutdown.cancel();
    if let Err(e) = scheduler.await {
        error!(error = %e, "scheduler task panicked");
    }

    pool.close().await;
    info!("courier shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based filtering.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,courier=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with bounded retries.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;
                return Ok(pool);
            },
            Err(_) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Ensures the webhook_events table and its indexes exist.
// TODO: move to sqlx::migrate! once a migrations directory lands
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL,
            event_type TEXT NOT NULL,
            target_url TEXT NOT NULL,
            payload JSONB NOT NULL,
            max_attempts INTEGER NOT NULL DEFAULT 3 CHECK (max_attempts >= 1),
            attempt_count INTEGER NOT NULL DEFAULT 0,
            delivered BOOLEAN NOT NULL DEFAULT FALSE,
            response_code INTEGER,
            response_body TEXT,
            failure_reason TEXT,
            next_retry_at TIMESTAMPTZ,
            delivered_at TIMESTAMPTZ,
            metadata JSONB NOT NULL DEFAULT 'null'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_events table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_events_next_retry
        ON webhook_events(next_retry_at)
        WHERE NOT delivered AND next_retry_at IS NOT NULL
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create retry schedule index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_events_tenant
        ON webhook_events(tenant_id, created_at DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create tenant index")?;

    Ok(())
}

/// Scheduler loop: drives pending retries each poll interval and runs
/// cleanup on a slower cadence, until cancelled.
async fn run_scheduler(
    config: Config,
    processor: BatchProcessor,
    analytics: AnalyticsService,
    shutdown: CancellationToken,
) {
    let mut poll = tokio::time::interval(Duration::from_secs(config.poll_interval_seconds.max(1)));
    let mut cleanup =
        tokio::time::interval(Duration::from_secs(config.cleanup_interval_hours.max(1) * 3600));
    // The first tick of each interval fires immediately.
    poll.tick().await;
    cleanup.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("scheduler stopping");
                break;
            }
            _ = poll.tick() => {
                match processor.process_pending(config.batch_size).await {
                    Ok(result) if result.retried > 0 => {
                        info!(
                            retried = result.retried,
                            succeeded = result.succeeded,
                            failed = result.failed,
                            "scheduler pass complete"
                        );
                    },
                    Ok(_) => {},
                    Err(e) => error!(error = %e, "scheduler pass failed"),
                }
            }
            _ = cleanup.tick() => {
                if let Err(e) = analytics.cleanup_delivered(config.delivered_retention_days).await {
                    error!(error = %e, "delivered-event cleanup failed");
                }
                if let Err(e) = analytics.cleanup_old(config.retention_days).await {
                    error!(error = %e, "old-event cleanup failed");
                }
            }
        }
    }
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received CTRL+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
