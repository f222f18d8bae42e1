//! Error types for webhook delivery operations.
//!
//! Transport failures and non-2xx responses are both retryable failures,
//! distinguished only by the response code they carry (0 when the transport
//! produced no response). Validation and missing-entity errors are surfaced
//! synchronously and never retried.

use courier_core::{CoreError, EventId};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Endpoint responded with a non-2xx status.
    #[error("endpoint returned HTTP {status_code}")]
    HttpStatus {
        /// HTTP status code observed
        status_code: u16,
        /// Response body snippet, already truncated by the transport
        body: String,
    },

    /// Ingestion input rejected before persistence.
    #[error("validation failed: {message}")]
    Validation {
        /// What was missing or malformed
        message: String,
    },

    /// Referenced event does not exist.
    #[error("webhook event {event_id} not found")]
    EventNotFound {
        /// The missing event's identifier
        event_id: EventId,
    },

    /// Event store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Store error message
        message: String,
    },

    /// Invalid transport configuration.
    #[error("invalid delivery configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a non-2xx response error.
    pub fn http_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus { status_code, body: body.into() }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether this failure consumes retry budget rather than aborting.
    ///
    /// Every transport outcome short of success is retryable up to
    /// `max_attempts`, 4xx and 5xx alike. Validation, missing events, and
    /// configuration problems are not delivery failures and never retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::HttpStatus { .. } => true,
            Self::Validation { .. }
            | Self::EventNotFound { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. } => false,
        }
    }

    /// Response code recorded on the event for this failure.
    ///
    /// 0 signals a transport-level failure with no HTTP response.
    pub fn response_code(&self) -> i32 {
        match self {
            Self::HttpStatus { status_code, .. } => i32::from(*status_code),
            _ => 0,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(message) => Self::Validation { message },
            other => Self::Storage { message: other.to_string() },
        }
    }
}
