//! Database access layer implementing the repository pattern for webhook
//! persistence.
//!
//! The repository layer translates between domain models and the database
//! schema. All database operations go through these repositories; direct SQL
//! outside this module is forbidden to keep the access paths auditable.

use std::sync::Arc;

use sqlx::PgPool;

pub mod webhook_events;

use crate::error::Result;

/// Container for repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for webhook event operations.
    pub webhook_events: Arc<webhook_events::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self { webhook_events: Arc::new(webhook_events::Repository::new(pool)) }
    }

    /// Performs a health check on the database connection.
    ///
    /// Executes a trivial query to verify connectivity; used as the engine's
    /// liveness probe.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.webhook_events.pool()).await?;

        Ok(())
    }
}
