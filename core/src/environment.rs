//! Dependency injection traits.
//!
//! All external dependencies are abstracted behind traits and injected into
//! reducers and the coordinator. Production implementations live in the
//! `fieldbook` and `fieldbook-postgres` crates; deterministic test doubles live
//! in `fieldbook-testing`.

use crate::error::{GatewayError, NotifyError};
use crate::store::StoreError;
use crate::types::{
    BookingCode, Money, Notification, OrderCode, PricingRule, Principal, Resource, ResourceId,
    ResourceType, ResourceTypeId,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Read-only view of resources, resource types, and pricing rules.
///
/// Managed outside the engine; the engine only reads it.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// Look up a resource
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the catalog cannot be read.
    async fn resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError>;

    /// Look up a resource type
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the catalog cannot be read.
    async fn resource_type(&self, id: ResourceTypeId) -> Result<Option<ResourceType>, StoreError>;

    /// All pricing rules for a resource type, regardless of validity window
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the catalog cannot be read.
    async fn pricing_rules(&self, id: ResourceTypeId) -> Result<Vec<PricingRule>, StoreError>;
}

/// Operator notification channel. Delivery is best-effort.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] on delivery failure; callers log and move on.
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Status of a payment as reported by the gateway
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
    /// No matching payment yet
    Pending,
    /// Payment received
    Paid,
    /// Payment failed or was refused upstream
    Failed,
}

/// A gateway status report
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayPayment {
    /// Reported status
    pub status: GatewayPaymentStatus,
    /// Transaction reference (present once paid)
    pub reference: Option<String>,
    /// Amount received
    pub amount: Option<Money>,
    /// When the gateway saw the payment
    pub paid_at: Option<DateTime<Utc>>,
}

/// External payment provider
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Produce a scannable payment URL for an order
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on timeout, outage, or rejection.
    async fn create_qr_url(
        &self,
        amount: Money,
        memo: &str,
        order_code: &OrderCode,
    ) -> Result<String, GatewayError>;

    /// Ask the gateway whether an order has been paid
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on timeout, outage, or rejection.
    async fn check_status(&self, order_code: &OrderCode) -> Result<GatewayPayment, GatewayError>;
}

/// Supplies the authenticated caller, if any
pub trait IdentityContext: Send + Sync {
    /// Current principal (`None` for anonymous guests)
    fn principal(&self) -> Option<Principal>;
}

/// Generates human-facing codes.
///
/// Codes must be unique; the store rejects duplicates and the coordinator
/// regenerates on collision.
pub trait CodeGenerator: Send + Sync {
    /// A booking code for a booking on `date`
    fn booking_code(&self, date: NaiveDate) -> BookingCode;

    /// A payment order code
    fn order_code(&self) -> OrderCode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
