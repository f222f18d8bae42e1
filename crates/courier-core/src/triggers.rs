//! Payload builders for the business domains that produce webhook events.
//!
//! Producers stay decoupled from the engine through the [`EventTrigger`]
//! capability: each domain knows how to render its own payload document, and
//! the engine only ever sees the finished JSON plus an event type string.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::TenantId;

/// Capability implemented per business domain to turn a domain occurrence
/// into a deliverable webhook payload.
pub trait EventTrigger: Send + Sync {
    /// Event category recorded on the webhook event, e.g. `payment.captured`.
    fn event_type(&self) -> &'static str;

    /// Renders the JSON document posted to the receiver.
    ///
    /// Called exactly once at ingestion; the resulting payload is immutable
    /// for the lifetime of the event.
    fn build_payload(&self) -> Value;
}

/// Booking confirmation trigger.
#[derive(Debug, Clone)]
pub struct BookingConfirmedTrigger {
    /// Tenant the booking belongs to.
    pub tenant_id: TenantId,
    /// Booking identifier.
    pub booking_id: Uuid,
    /// Customer identifier.
    pub customer_id: Uuid,
    /// Scheduled start of the booked slot.
    pub starts_at: DateTime<Utc>,
    /// Total price in minor currency units.
    pub total_amount_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
}

impl EventTrigger for BookingConfirmedTrigger {
    fn event_type(&self) -> &'static str {
        "booking.confirmed"
    }

    fn build_payload(&self) -> Value {
        json!({
            "tenant_id": self.tenant_id,
            "booking": {
                "id": self.booking_id,
                "customer_id": self.customer_id,
                "starts_at": self.starts_at.to_rfc3339(),
                "total_amount_cents": self.total_amount_cents,
                "currency": self.currency,
            },
        })
    }
}

/// Payment capture trigger.
#[derive(Debug, Clone)]
pub struct PaymentCapturedTrigger {
    /// Tenant the payment belongs to.
    pub tenant_id: TenantId,
    /// Payment identifier.
    pub payment_id: Uuid,
    /// Booking the payment settles, if any.
    pub booking_id: Option<Uuid>,
    /// Captured amount in minor currency units.
    pub amount_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// When the capture settled.
    pub captured_at: DateTime<Utc>,
}

impl EventTrigger for PaymentCapturedTrigger {
    fn event_type(&self) -> &'static str {
        "payment.captured"
    }

    fn build_payload(&self) -> Value {
        json!({
            "tenant_id": self.tenant_id,
            "payment": {
                "id": self.payment_id,
                "booking_id": self.booking_id,
                "amount_cents": self.amount_cents,
                "currency": self.currency,
                "captured_at": self.captured_at.to_rfc3339(),
            },
        })
    }
}

/// User lifecycle trigger.
#[derive(Debug, Clone)]
pub struct UserLifecycleTrigger {
    /// Tenant the user belongs to.
    pub tenant_id: TenantId,
    /// User identifier.
    pub user_id: Uuid,
    /// Lifecycle transition, e.g. `created`, `deactivated`.
    pub transition: UserTransition,
    /// User email at the time of the transition.
    pub email: String,
}

/// Supported user lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTransition {
    /// Account created.
    Created,
    /// Account deactivated.
    Deactivated,
}

impl UserTransition {
    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deactivated => "deactivated",
        }
    }
}

impl EventTrigger for UserLifecycleTrigger {
    fn event_type(&self) -> &'static str {
        match self.transition {
            UserTransition::Created => "user.created",
            UserTransition::Deactivated => "user.deactivated",
        }
    }

    fn build_payload(&self) -> Value {
        json!({
            "tenant_id": self.tenant_id,
            "user": {
                "id": self.user_id,
                "email": self.email,
                "transition": self.transition.as_str(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_trigger_builds_complete_payload() {
        let trigger = BookingConfirmedTrigger {
            tenant_id: TenantId::new(),
            booking_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            starts_at: Utc::now(),
            total_amount_cents: 12_500,
            currency: "EUR".to_string(),
        };

        assert_eq!(trigger.event_type(), "booking.confirmed");

        let payload = trigger.build_payload();
        assert_eq!(payload["booking"]["total_amount_cents"], 12_500);
        assert_eq!(payload["booking"]["currency"], "EUR");
        assert!(payload["booking"]["starts_at"].is_string());
    }

    #[test]
    fn payment_trigger_handles_standalone_payments() {
        let trigger = PaymentCapturedTrigger {
            tenant_id: TenantId::new(),
            payment_id: Uuid::new_v4(),
            booking_id: None,
            amount_cents: 990,
            currency: "USD".to_string(),
            captured_at: Utc::now(),
        };

        let payload = trigger.build_payload();
        assert_eq!(trigger.event_type(), "payment.captured");
        assert!(payload["payment"]["booking_id"].is_null());
    }

    #[test]
    fn user_trigger_event_type_tracks_transition() {
        let mut trigger = UserLifecycleTrigger {
            tenant_id: TenantId::new(),
            user_id: Uuid::new_v4(),
            transition: UserTransition::Created,
            email: "ada@example.com".to_string(),
        };
        assert_eq!(trigger.event_type(), "user.created");

        trigger.transition = UserTransition::Deactivated;
        assert_eq!(trigger.event_type(), "user.deactivated");
        assert_eq!(trigger.build_payload()["user"]["transition"], "deactivated");
    }
}
