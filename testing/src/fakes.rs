//! Collaborator fakes: catalog, notifier, gateway, identity, code generator.

use async_trait::async_trait;
use chrono::NaiveDate;
use fieldbook_core::environment::{
    CodeGenerator, GatewayPayment, GatewayPaymentStatus, IdentityContext, NotificationSink,
    PaymentGateway, ResourceCatalog,
};
use fieldbook_core::error::{GatewayError, NotifyError};
use fieldbook_core::store::StoreError;
use fieldbook_core::types::{
    BookingCode, Money, Notification, OrderCode, PricingRule, Principal, Resource, ResourceId,
    ResourceStatus, ResourceType, ResourceTypeId, Role, UserId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Catalog
// ============================================================================

/// Catalog backed by in-memory maps; mutable so tests can flip statuses
#[derive(Debug, Default)]
pub struct StaticCatalog {
    resources: Mutex<HashMap<ResourceId, Resource>>,
    types: Mutex<HashMap<ResourceTypeId, ResourceType>>,
    rules: Mutex<Vec<PricingRule>>,
}

impl StaticCatalog {
    /// Empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource
    #[must_use]
    pub fn with_resource(self, resource: Resource) -> Self {
        lock(&self.resources).insert(resource.id, resource);
        self
    }

    /// Add a resource type
    #[must_use]
    pub fn with_type(self, resource_type: ResourceType) -> Self {
        lock(&self.types).insert(resource_type.id, resource_type);
        self
    }

    /// Add a pricing rule
    #[must_use]
    pub fn with_rule(self, rule: PricingRule) -> Self {
        lock(&self.rules).push(rule);
        self
    }

    /// Change a resource's status
    pub fn set_status(&self, id: ResourceId, status: ResourceStatus) {
        if let Some(resource) = lock(&self.resources).get_mut(&id) {
            resource.status = status;
        }
    }
}

#[async_trait]
impl ResourceCatalog for StaticCatalog {
    async fn resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        Ok(lock(&self.resources).get(&id).cloned())
    }

    async fn resource_type(&self, id: ResourceTypeId) -> Result<Option<ResourceType>, StoreError> {
        Ok(lock(&self.types).get(&id).cloned())
    }

    async fn pricing_rules(&self, id: ResourceTypeId) -> Result<Vec<PricingRule>, StoreError> {
        Ok(lock(&self.rules)
            .iter()
            .filter(|r| r.resource_type_id == id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Records delivered notifications; can be switched to fail
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Notification>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    /// Notifier that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier that rejects everything
    #[must_use]
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.set_failing(true);
        notifier
    }

    /// Switch failure mode
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delivered notifications, in order
    #[must_use]
    pub fn delivered(&self) -> Vec<Notification> {
        lock(&self.delivered).clone()
    }

    /// Kinds of delivered notifications, in order
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        lock(&self.delivered).iter().map(Notification::kind).collect()
    }

    /// Delivery attempts, including failed ones
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("sink offline".to_string()));
        }
        lock(&self.delivered).push(notification.clone());
        Ok(())
    }
}

// ============================================================================
// Payment gateway
// ============================================================================

/// Gateway whose answers are scripted by the test.
///
/// `check_status` pops scripted replies and reports Pending once the script
/// runs out. `create_qr_url` succeeds unless switched off.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    status_replies: Mutex<VecDeque<Result<GatewayPayment, GatewayError>>>,
    qr_failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
    status_calls: AtomicUsize,
    qr_calls: AtomicUsize,
}

impl ScriptedGateway {
    /// Gateway with an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `check_status`
    pub fn push_status(&self, reply: Result<GatewayPayment, GatewayError>) {
        lock(&self.status_replies).push_back(reply);
    }

    /// Queue a successful payment report
    pub fn push_paid(&self, reference: &str, amount: Money) {
        self.push_status(Ok(GatewayPayment {
            status: GatewayPaymentStatus::Paid,
            reference: Some(reference.to_string()),
            amount: Some(amount),
            paid_at: None,
        }));
    }

    /// Make `create_qr_url` fail
    pub fn set_qr_failing(&self, failing: bool) {
        self.qr_failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Number of `check_status` calls
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of `create_qr_url` calls
    #[must_use]
    pub fn qr_calls(&self) -> usize {
        self.qr_calls.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_qr_url(
        &self,
        amount: Money,
        memo: &str,
        order_code: &OrderCode,
    ) -> Result<String, GatewayError> {
        self.qr_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        if self.qr_failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("qr service down".to_string()));
        }
        Ok(format!(
            "https://pay.example.test/qr?amount={}&memo={memo}&order={order_code}",
            amount.minor()
        ))
    }

    async fn check_status(&self, _order_code: &OrderCode) -> Result<GatewayPayment, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        let reply = lock(&self.status_replies).pop_front();
        reply.unwrap_or(Ok(GatewayPayment {
            status: GatewayPaymentStatus::Pending,
            reference: None,
            amount: None,
            paid_at: None,
        }))
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Identity context holding a settable principal
#[derive(Debug, Default)]
pub struct StaticIdentity {
    principal: Mutex<Option<Principal>>,
}

impl StaticIdentity {
    /// No signed-in user
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A principal with `role`
    #[must_use]
    pub fn with_role(role: Role) -> Self {
        Self::of(Principal {
            user_id: UserId::new(),
            role,
        })
    }

    /// A specific principal
    #[must_use]
    pub fn of(principal: Principal) -> Self {
        Self {
            principal: Mutex::new(Some(principal)),
        }
    }

    /// Replace the principal
    pub fn set(&self, principal: Option<Principal>) {
        *lock(&self.principal) = principal;
    }
}

impl IdentityContext for StaticIdentity {
    fn principal(&self) -> Option<Principal> {
        *lock(&self.principal)
    }
}

// ============================================================================
// Codes
// ============================================================================

/// Predictable codes: `BK250101-0001`, `PO000001`, ...
#[derive(Debug, Default)]
pub struct SequentialCodes {
    bookings: AtomicU64,
    orders: AtomicU64,
}

impl SequentialCodes {
    /// Counter starting at 1
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodeGenerator for SequentialCodes {
    fn booking_code(&self, date: NaiveDate) -> BookingCode {
        let n = self.bookings.fetch_add(1, Ordering::SeqCst) + 1;
        BookingCode::new(format!("BK{}-{n:04}", date.format("%y%m%d")))
    }

    fn order_code(&self) -> OrderCode {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        OrderCode::new(format!("PO{n:06}"))
    }
}
