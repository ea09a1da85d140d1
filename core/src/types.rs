//! Domain types for Fieldbook.
//!
//! Value objects, entities, and statuses shared by every crate in the workspace:
//! identifiers, money, slots, the read-only catalog records (resources, resource
//! types, pricing rules), and the two mutable entities the engine owns
//! (bookings and payment orders).

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Creates a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a bookable resource (a field, a court)
    ResourceId
);
uuid_id!(
    /// Unique identifier for a resource type (e.g. "7-a-side pitch")
    ResourceTypeId
);
uuid_id!(
    /// Unique identifier for a pricing rule
    PricingRuleId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a payment order
    PaymentOrderId
);
uuid_id!(
    /// Unique identifier for a registered user
    UserId
);

/// Human-facing booking reference (e.g. `BK250101-7Q2M4X`)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingCode(String);

impl BookingCode {
    /// Wraps an already generated code
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payment order reference; doubles as the transfer memo the payer types in
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderCode(String);

impl OrderCode {
    /// Wraps an already generated code
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// An amount in the currency's smallest unit.
///
/// Integer-only so that pricing stays exact; the venue's currency has no
/// fractional unit in practice, so `Money::from_minor(200_000)` is 200,000.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(amount: u64) -> Self {
        Self(amount)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Subtracts two amounts (returns `None` if the result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(diff) => Some(Self(diff)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        f.write_str(&grouped)
    }
}

/// A price multiplier in basis points (`10_000` = ×1.0, `15_000` = ×1.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(u32);

impl Multiplier {
    /// ×1.0
    pub const NEUTRAL: Self = Self(10_000);

    /// Basis points per unit
    pub const SCALE: u32 = 10_000;

    /// Creates a multiplier from basis points
    #[must_use]
    pub const fn from_basis_points(bp: u32) -> Self {
        Self(bp)
    }

    /// Returns the multiplier in basis points
    #[must_use]
    pub const fn basis_points(&self) -> u32 {
        self.0
    }
}

impl Default for Multiplier {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "×{}.{:04}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

// ============================================================================
// Time
// ============================================================================

/// A candidate or booked interval on a given day.
///
/// Intervals are half-open: `[start, end)`. Two slots that merely touch
/// (`a.end == b.start`) do not overlap, so back-to-back bookings are allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    /// Local calendar date at the venue
    pub date: NaiveDate,
    /// Inclusive start time
    pub start: NaiveTime,
    /// Exclusive end time
    pub end: NaiveTime,
}

impl Slot {
    /// Creates a new `Slot` (no validation; see `is_well_formed`)
    #[must_use]
    pub const fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self { date, start, end }
    }

    /// `end > start`
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.end > self.start
    }

    /// Length of the slot in whole minutes (negative for malformed slots)
    #[must_use]
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Half-open overlap on the same date: `s1 < e2 && s2 < e1`
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.date == other.date && intervals_overlap(self.start, self.end, other.start, other.end)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.date,
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// Half-open interval overlap test.
#[must_use]
pub fn intervals_overlap(s1: NaiveTime, e1: NaiveTime, s2: NaiveTime, e2: NaiveTime) -> bool {
    s1 < e2 && s2 < e1
}

/// Daily opening window of a resource, `[open, close)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    /// Opening time
    pub open: NaiveTime,
    /// Closing time
    pub close: NaiveTime,
}

impl OperatingHours {
    /// Creates new operating hours
    #[must_use]
    pub const fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    /// Whether the whole slot fits inside the opening window
    #[must_use]
    pub fn contains(&self, slot: &Slot) -> bool {
        self.open <= slot.start && slot.end <= self.close
    }
}

// ============================================================================
// Catalog (read-only to the engine)
// ============================================================================

/// Operational status of a resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Open for bookings
    Active,
    /// Temporarily out of service
    Maintenance,
    /// Retired or hidden
    Inactive,
    /// Closed by the venue (holiday, private event)
    Closed,
}

impl ResourceStatus {
    /// Only active resources accept bookings
    #[must_use]
    pub const fn is_bookable(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Maintenance => "maintenance",
            Self::Inactive => "inactive",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "maintenance" => Ok(Self::Maintenance),
            "inactive" => Ok(Self::Inactive),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown resource status '{other}'")),
        }
    }
}

/// A bookable resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource ID
    pub id: ResourceId,
    /// Type used for pricing
    pub resource_type_id: ResourceTypeId,
    /// Display name
    pub name: String,
    /// Daily opening window
    pub hours: OperatingHours,
    /// Current status
    pub status: ResourceStatus,
}

/// A resource type with its default hourly price
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    /// Resource type ID
    pub id: ResourceTypeId,
    /// Display name
    pub name: String,
    /// Price per hour when no pricing rule applies
    pub base_price_per_hour: Money,
}

/// Day- and time-scoped price for a resource type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRule {
    /// Rule ID
    pub id: PricingRuleId,
    /// Resource type the rule prices
    pub resource_type_id: ResourceTypeId,
    /// Day of week the rule applies on
    pub day_of_week: Weekday,
    /// Window start (inclusive)
    pub start: NaiveTime,
    /// Window end (exclusive)
    pub end: NaiveTime,
    /// Price per hour inside the window
    pub price_per_hour: Money,
    /// Whether the peak multiplier applies
    pub peak: bool,
    /// Multiplier applied when `peak` is set
    pub peak_multiplier: Multiplier,
    /// First date the rule is valid
    pub effective_from: NaiveDate,
    /// Last date the rule is valid (open-ended when `None`)
    pub effective_to: Option<NaiveDate>,
}

impl PricingRule {
    /// Validity window check
    #[must_use]
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_to.is_none_or(|to| date <= to)
    }

    /// Whether the rule's window fully covers `[start, end)`
    #[must_use]
    pub fn covers(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start <= start && end <= self.end
    }

    /// Multiplier in effect for this rule
    #[must_use]
    pub const fn effective_multiplier(&self) -> Multiplier {
        if self.peak {
            self.peak_multiplier
        } else {
            Multiplier::NEUTRAL
        }
    }
}

// ============================================================================
// Bookings
// ============================================================================

/// Booking lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Awaiting payment or staff approval
    Pending,
    /// Confirmed by staff or by payment
    Confirmed,
    /// Cancelled (terminal)
    Cancelled,
    /// Session played (terminal)
    Completed,
}

impl BookingStatus {
    /// Pending and Confirmed bookings hold their slot
    #[must_use]
    pub const fn holds_slot(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Cancelled and Completed are terminal
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown booking status '{other}'")),
        }
    }
}

/// Settlement state of a booking's money
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingPaymentStatus {
    /// Nothing collected yet (cash on site)
    Unpaid,
    /// A payment order is open
    AwaitingPayment,
    /// Paid through the gateway
    Paid,
    /// The payment order lapsed
    Expired,
}

impl BookingPaymentStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Paid => "paid",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for BookingPaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(Self::Unpaid),
            "awaiting_payment" => Ok(Self::AwaitingPayment),
            "paid" => Ok(Self::Paid),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown payment status '{other}'")),
        }
    }
}

/// How the customer intends to pay
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Pay at the venue; staff approve the booking
    Cash,
    /// Bank transfer via QR code
    BankTransferQr,
    /// E-wallet checkout
    EWallet,
}

impl PaymentMethod {
    /// Whether a payment order must be opened at reservation time
    #[must_use]
    pub const fn requires_prepayment(self) -> bool {
        !matches!(self, Self::Cash)
    }

    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::BankTransferQr => "bank_transfer_qr",
            Self::EWallet => "e_wallet",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(Self::Cash),
            "bank_transfer_qr" => Ok(Self::BankTransferQr),
            "e_wallet" => Ok(Self::EWallet),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}

/// Contact details for a booking without a registered owner
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestContact {
    /// Full name
    pub name: String,
    /// Phone number
    pub phone: String,
    /// Optional email
    pub email: Option<String>,
}

/// Who a booking belongs to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingOwner {
    /// Registered user
    Registered {
        /// User ID
        user_id: UserId,
    },
    /// Guest identified by contact details only
    Guest {
        /// Contact details
        contact: GuestContact,
    },
}

impl BookingOwner {
    /// Registered owner's ID, if any
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Registered { user_id } => Some(*user_id),
            Self::Guest { .. } => None,
        }
    }
}

/// Whoever performed a lifecycle transition
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    /// A signed-in user (customer or staff)
    User {
        /// User ID
        user_id: UserId,
    },
    /// The external payment gateway, via reconciliation
    PaymentGateway,
    /// Background jobs (expiry sweep)
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { user_id } => write!(f, "user:{user_id}"),
            Self::PaymentGateway => f.write_str("payment-gateway"),
            Self::System => f.write_str("system"),
        }
    }
}

/// A reservation of one resource for one slot.
///
/// Never physically deleted; Cancelled and Completed are terminal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking ID
    pub id: BookingId,
    /// Unique human-facing code
    pub code: BookingCode,
    /// Booked resource
    pub resource_id: ResourceId,
    /// Owner (registered user or guest)
    pub owner: BookingOwner,
    /// Booked interval
    pub slot: Slot,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Price computed at reservation (or reschedule) time
    pub total_price: Money,
    /// Settlement state
    pub payment_status: BookingPaymentStatus,
    /// Chosen payment method
    pub payment_method: PaymentMethod,
    /// Free-form note from the customer
    pub note: Option<String>,
    /// When the booking was created
    pub created_at: DateTime<Utc>,
    /// Who confirmed it
    pub confirmed_by: Option<Actor>,
    /// When it was confirmed
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Who cancelled it
    pub cancelled_by: Option<Actor>,
    /// When it was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Why it was cancelled
    pub cancel_reason: Option<String>,
    /// When the session was checked out
    pub completed_at: Option<DateTime<Utc>>,
    /// Row version; starts at 1 and is bumped by every committed update
    pub version: u64,
}

impl Booking {
    /// Booked duration in minutes
    #[must_use]
    pub fn duration_minutes(&self) -> i64 {
        self.slot.duration_minutes()
    }

    /// Whether this booking currently holds its slot
    #[must_use]
    pub const fn holds_slot(&self) -> bool {
        self.status.holds_slot()
    }
}

// ============================================================================
// Payment orders
// ============================================================================

/// Payment order lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOrderStatus {
    /// Waiting for the external payment (TTL-bound)
    Pending,
    /// Settled (terminal)
    Paid,
    /// TTL elapsed (terminal)
    Expired,
    /// Withdrawn (terminal)
    Cancelled,
}

impl PaymentOrderStatus {
    /// Everything but Pending is terminal
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PaymentOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentOrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown payment order status '{other}'")),
        }
    }
}

/// A time-boxed request for an external payment, 1:1 with a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrder {
    /// Order ID
    pub id: PaymentOrderId,
    /// Unique code (also the transfer memo)
    pub code: OrderCode,
    /// Booking being paid for
    pub booking_id: BookingId,
    /// Amount due
    pub amount: Money,
    /// Lifecycle status
    pub status: PaymentOrderStatus,
    /// Payment method
    pub method: PaymentMethod,
    /// When the order was opened
    pub created_at: DateTime<Utc>,
    /// When the order lapses
    pub expires_at: DateTime<Utc>,
    /// When the payment was confirmed
    pub paid_at: Option<DateTime<Utc>>,
    /// Gateway transaction reference
    pub external_reference: Option<String>,
}

impl PaymentOrder {
    /// `now ≥ expires_at`
    #[must_use]
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Role of the acting principal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Self-service customer
    Customer,
    /// Front-desk staff
    Staff,
    /// Venue administrator
    Admin,
}

impl Role {
    /// Staff and admins may approve and check out bookings
    #[must_use]
    pub const fn is_staff(self) -> bool {
        matches!(self, Self::Staff | Self::Admin)
    }
}

/// The authenticated caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// User ID
    pub user_id: UserId,
    /// Role
    pub role: Role,
}

impl Principal {
    /// Actor recorded on transitions performed by this principal
    #[must_use]
    pub const fn actor(&self) -> Actor {
        Actor::User {
            user_id: self.user_id,
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Operator-facing event emitted after a committed state change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A booking was requested
    BookingRequested {
        /// Booking ID
        booking_id: BookingId,
        /// Booking code
        code: BookingCode,
        /// Resource
        resource_id: ResourceId,
        /// Slot
        slot: Slot,
        /// Price
        total_price: Money,
        /// Payment method
        payment_method: PaymentMethod,
    },
    /// A booking was confirmed
    BookingConfirmed {
        /// Booking ID
        booking_id: BookingId,
        /// Booking code
        code: BookingCode,
        /// Confirming actor
        actor: Actor,
    },
    /// A booking was cancelled
    BookingCancelled {
        /// Booking ID
        booking_id: BookingId,
        /// Booking code
        code: BookingCode,
        /// Cancelling actor
        actor: Actor,
        /// Reason
        reason: String,
    },
    /// A booking was checked out
    BookingCompleted {
        /// Booking ID
        booking_id: BookingId,
        /// Booking code
        code: BookingCode,
    },
    /// A booking moved to another slot
    BookingRescheduled {
        /// Booking ID
        booking_id: BookingId,
        /// Booking code
        code: BookingCode,
        /// Previous slot
        from: Slot,
        /// New slot
        to: Slot,
    },
    /// A payment order was opened
    PaymentRequested {
        /// Order ID
        order_id: PaymentOrderId,
        /// Order code
        code: OrderCode,
        /// Booking ID
        booking_id: BookingId,
        /// Amount due
        amount: Money,
        /// Expiry
        expires_at: DateTime<Utc>,
    },
    /// A payment order was paid
    PaymentReceived {
        /// Order ID
        order_id: PaymentOrderId,
        /// Order code
        code: OrderCode,
        /// Booking ID
        booking_id: BookingId,
        /// Amount
        amount: Money,
        /// Gateway reference
        reference: String,
    },
    /// A payment order lapsed
    PaymentExpired {
        /// Order ID
        order_id: PaymentOrderId,
        /// Order code
        code: OrderCode,
        /// Booking ID
        booking_id: BookingId,
    },
    /// A payment order was withdrawn
    PaymentCancelled {
        /// Order ID
        order_id: PaymentOrderId,
        /// Order code
        code: OrderCode,
        /// Booking ID
        booking_id: BookingId,
    },
}

impl Notification {
    /// Short machine-readable kind, used as a log/metric label
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BookingRequested { .. } => "booking_requested",
            Self::BookingConfirmed { .. } => "booking_confirmed",
            Self::BookingCancelled { .. } => "booking_cancelled",
            Self::BookingCompleted { .. } => "booking_completed",
            Self::BookingRescheduled { .. } => "booking_rescheduled",
            Self::PaymentRequested { .. } => "payment_requested",
            Self::PaymentReceived { .. } => "payment_received",
            Self::PaymentExpired { .. } => "payment_expired",
            Self::PaymentCancelled { .. } => "payment_cancelled",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[test]
    fn touching_slots_do_not_overlap() {
        let a = Slot::new(day(), t(9, 0), t(10, 0));
        let b = Slot::new(day(), t(10, 0), t(11, 0));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn partial_overlap_detected() {
        let a = Slot::new(day(), t(10, 0), t(11, 0));
        let b = Slot::new(day(), t(10, 30), t(11, 30));
        assert!(a.overlaps(&b));
    }

    #[test]
    fn different_dates_never_overlap() {
        let a = Slot::new(day(), t(10, 0), t(11, 0));
        let b = Slot::new(day().succ_opt().unwrap(), t(10, 0), t(11, 0));
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn money_display_groups_thousands() {
        assert_eq!(Money::from_minor(187_500).to_string(), "187,500");
        assert_eq!(Money::from_minor(999).to_string(), "999");
        assert_eq!(Money::from_minor(1_000_000).to_string(), "1,000,000");
    }

    #[test]
    fn rule_validity_window_is_inclusive() {
        let rule = PricingRule {
            id: PricingRuleId::new(),
            resource_type_id: ResourceTypeId::new(),
            day_of_week: Weekday::Wed,
            start: t(9, 0),
            end: t(10, 0),
            price_per_hour: Money::from_minor(100),
            peak: false,
            peak_multiplier: Multiplier::NEUTRAL,
            effective_from: day(),
            effective_to: Some(day()),
        };
        assert!(rule.is_effective_on(day()));
        assert!(!rule.is_effective_on(day().pred_opt().unwrap()));
        assert!(!rule.is_effective_on(day().succ_opt().unwrap()));
    }

    #[test]
    fn statuses_round_trip_through_storage_names() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Cancelled,
            BookingStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<PaymentOrderStatus>().is_err());
    }

    #[test]
    fn booking_owner_serializes_with_kind_tag() {
        let owner = BookingOwner::Guest {
            contact: GuestContact {
                name: "Linh".to_string(),
                phone: "0900000000".to_string(),
                email: None,
            },
        };
        let json = serde_json::to_value(&owner).unwrap();
        assert_eq!(json["kind"], "guest");
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in 0u32..1440, b in 1u32..240, c in 0u32..1440, d in 1u32..240) {
            let mk = |from: u32, len: u32| {
                let start = NaiveTime::from_num_seconds_from_midnight_opt(from * 60, 0).unwrap();
                let end_min = (from + len).min(1439);
                let end = NaiveTime::from_num_seconds_from_midnight_opt(end_min * 60, 0).unwrap();
                Slot::new(day(), start, end)
            };
            let x = mk(a, b);
            let y = mk(c, d);
            prop_assert_eq!(x.overlaps(&y), y.overlaps(&x));
        }
    }
}
