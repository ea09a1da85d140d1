//! Error taxonomy.
//!
//! Every operation fails with a [`BookingError`]. Its variants line up with
//! [`ErrorCategory`] so that callers can map failures to user-facing messages
//! (or HTTP statuses) without matching on every detail.

use crate::store::StoreError;
use crate::types::{BookingCode, BookingStatus, OrderCode, PaymentOrderStatus, ResourceId, ResourceStatus};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::fmt;
use thiserror::Error;

/// Coarse classification of a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed or impossible input
    Validation,
    /// The request clashes with current state (taken slot, expired order)
    Conflict,
    /// An illegal lifecycle transition
    Transition,
    /// Caller lacks permission
    Forbidden,
    /// Referenced entity does not exist
    NotFound,
    /// A collaborator (gateway, notifier) is unavailable
    ExternalDependency,
    /// Unexpected internal failure
    System,
}

impl ErrorCategory {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Transition => "transition",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::ExternalDependency => "external_dependency",
            Self::System => "system",
        }
    }
}

/// Input that can never succeed as given
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `end <= start`
    #[error("end time {end} must be after start time {start}")]
    InvalidTimeRange {
        /// Requested start
        start: NaiveTime,
        /// Requested end
        end: NaiveTime,
    },

    /// Duration outside the allowed window
    #[error("duration of {minutes} minutes is outside the allowed range ({min}..={max})")]
    DurationOutOfRange {
        /// Requested duration
        minutes: i64,
        /// Minimum allowed
        min: i64,
        /// Maximum allowed
        max: i64,
    },

    /// Date strictly before today (venue time)
    #[error("date {date} is in the past")]
    DateInPast {
        /// Requested date
        date: NaiveDate,
    },

    /// Today's slot whose start has already passed
    #[error("start time {start} has already passed today")]
    StartTimeElapsed {
        /// Requested start
        start: NaiveTime,
    },

    /// Resource is not accepting bookings
    #[error("resource {resource_id} is {status}")]
    ResourceUnavailable {
        /// Resource
        resource_id: ResourceId,
        /// Current status
        status: ResourceStatus,
    },

    /// Slot falls outside the resource's operating hours
    #[error("slot {start}-{end} is outside operating hours {open}-{close}")]
    OutsideOperatingHours {
        /// Requested start
        start: NaiveTime,
        /// Requested end
        end: NaiveTime,
        /// Opening time
        open: NaiveTime,
        /// Closing time
        close: NaiveTime,
    },

    /// Computed price is zero
    #[error("price must be positive")]
    NonPositivePrice,

    /// Guest contact details incomplete
    #[error("guest contact is incomplete: {0}")]
    IncompleteContact(String),

    /// A draft reservation token is unknown, expired or already used
    #[error("reservation draft is unknown or expired")]
    DraftExpired,

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// The request clashes with current state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// An active booking overlaps the requested slot
    #[error("slot on {date} {start}-{end} is already booked{}", conflicting_suffix(.conflicting.as_ref()))]
    SlotTaken {
        /// Resource
        resource_id: ResourceId,
        /// Date
        date: NaiveDate,
        /// Requested start
        start: NaiveTime,
        /// Requested end
        end: NaiveTime,
        /// Code of the overlapping booking, when known
        conflicting: Option<BookingCode>,
    },

    /// Another request holds the slot lock and did not finish in time
    #[error("slot is busy, try again")]
    SlotBusy,

    /// Payment arrived after the order lapsed
    #[error("payment order {code} expired at {expires_at}")]
    OrderExpired {
        /// Order code
        code: OrderCode,
        /// When it lapsed
        expires_at: DateTime<Utc>,
    },

    /// Expiry requested before the deadline
    #[error("payment order {code} does not expire until {expires_at}")]
    NotYetExpired {
        /// Order code
        code: OrderCode,
        /// Deadline
        expires_at: DateTime<Utc>,
    },

    /// Booking has captured money and cannot be cancelled in-engine
    #[error("booking {code} has been paid; cancellation requires a refund")]
    PaymentCaptured {
        /// Booking code
        code: BookingCode,
    },

    /// Reschedule attempted while a payment order is outstanding
    #[error("booking {code} has a payment in progress")]
    PaymentInProgress {
        /// Booking code
        code: BookingCode,
    },

    /// A paid booking cannot move to a slot with a different price
    #[error("booking {code} is paid; the new slot would change its price")]
    PriceChanged {
        /// Booking code
        code: BookingCode,
    },

    /// Payment amount differs from the order amount
    #[error("amount mismatch for order {code}")]
    AmountMismatch {
        /// Order code
        code: OrderCode,
    },

    /// State changed underneath the request
    #[error("state changed concurrently, retry the operation")]
    StaleState,
}

fn conflicting_suffix(code: Option<&BookingCode>) -> String {
    code.map(|c| format!(" (booking {c})")).unwrap_or_default()
}

/// Which entity a lifecycle error refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A booking
    Booking,
    /// A payment order
    PaymentOrder,
    /// A resource
    Resource,
    /// A resource type
    ResourceType,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Booking => "booking",
            Self::PaymentOrder => "payment order",
            Self::Resource => "resource",
            Self::ResourceType => "resource type",
        })
    }
}

/// Illegal lifecycle transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {attempted} a {from} {entity}")]
pub struct TransitionError {
    /// Entity kind
    pub entity: EntityKind,
    /// Current status name
    pub from: &'static str,
    /// Attempted operation name
    pub attempted: &'static str,
}

impl TransitionError {
    /// Booking transition failure
    #[must_use]
    pub const fn booking(from: BookingStatus, attempted: &'static str) -> Self {
        Self {
            entity: EntityKind::Booking,
            from: from.as_str(),
            attempted,
        }
    }

    /// Payment order transition failure
    #[must_use]
    pub const fn order(from: PaymentOrderStatus, attempted: &'static str) -> Self {
        Self {
            entity: EntityKind::PaymentOrder,
            from: from.as_str(),
            attempted,
        }
    }
}

/// Pricing failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// Some part of the slot has no applicable rule
    #[error("no pricing rule covers {start}-{end}")]
    NoApplicableRule {
        /// Uncovered segment start
        start: NaiveTime,
        /// Uncovered segment end
        end: NaiveTime,
    },

    /// Two rules with the same `effective_from` cover the same segment
    #[error("ambiguous pricing rules for {start}-{end}")]
    AmbiguousRules {
        /// Segment start
        start: NaiveTime,
        /// Segment end
        end: NaiveTime,
    },

    /// Price arithmetic overflowed
    #[error("price overflow")]
    Overflow,
}

/// Payment gateway failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No answer in time
    #[error("gateway timed out")]
    Timeout,

    /// Transport or upstream failure
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway refused the request
    #[error("gateway rejected request: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Timeouts and outages are worth retrying; rejections are not
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

/// Notification delivery failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Top-level error for every engine operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Invalid input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Clash with current state
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Illegal lifecycle transition
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Caller lacks permission
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Entity not found
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind
        entity: EntityKind,
        /// Lookup key (ID or code)
        key: String,
    },

    /// Collaborator unavailable
    #[error("external dependency failed: {0}")]
    ExternalDependency(String),

    /// Internal failure
    #[error("system error: {0}")]
    System(String),
}

impl BookingError {
    /// Shorthand for `NotFound`
    #[must_use]
    pub fn not_found(entity: EntityKind, key: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Category of this error
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::Transition(_) => ErrorCategory::Transition,
            Self::Forbidden(_) => ErrorCategory::Forbidden,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::ExternalDependency(_) => ErrorCategory::ExternalDependency,
            Self::System(_) => ErrorCategory::System,
        }
    }

    /// Message safe to show to end users.
    ///
    /// System errors are masked; everything else carries its detail.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::System(_) => "Something went wrong. Please try again later.".to_string(),
            Self::ExternalDependency(_) => {
                "A partner service is temporarily unavailable. Please try again.".to_string()
            }
            Self::Forbidden(_) => "You are not allowed to perform this action.".to_string(),
            other => {
                let text = other.to_string();
                let mut chars = text.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().chain(chars).collect()
                })
            }
        }
    }
}

impl From<PricingError> for BookingError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::NoApplicableRule { .. } => {
                Self::Validation(ValidationError::Other(err.to_string()))
            }
            PricingError::AmbiguousRules { .. } | PricingError::Overflow => {
                Self::System(err.to_string())
            }
        }
    }
}

impl From<StoreError> for BookingError {
    /// Generic mapping. Callers that can name the contested slot translate
    /// [`StoreError::SlotTaken`] themselves.
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StaleWrite(_) => Self::Conflict(ConflictError::StaleState),
            StoreError::SlotTaken { .. } | StoreError::Duplicate(_) | StoreError::Backend(_) => {
                Self::System(err.to_string())
            }
        }
    }
}

impl From<GatewayError> for BookingError {
    fn from(err: GatewayError) -> Self {
        Self::ExternalDependency(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_variants() {
        let err: BookingError = ConflictError::SlotBusy.into();
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let err: BookingError = TransitionError::booking(BookingStatus::Completed, "cancel").into();
        assert_eq!(err.category(), ErrorCategory::Transition);
        assert_eq!(err.to_string(), "cannot cancel a completed booking");
    }

    #[test]
    fn system_errors_are_masked_for_users() {
        let err = BookingError::System("connection reset by peer".to_string());
        assert!(!err.user_message().contains("connection"));
    }

    #[test]
    fn slot_taken_names_conflicting_booking() {
        let err = ConflictError::SlotTaken {
            resource_id: ResourceId::new(),
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            start: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            end: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
            conflicting: Some(BookingCode::new("BK-1")),
        };
        assert!(err.to_string().contains("BK-1"));
    }

    #[test]
    fn ambiguous_pricing_is_a_system_failure() {
        let err: BookingError = PricingError::AmbiguousRules {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::System);
    }

    #[test]
    fn stale_writes_surface_as_conflicts() {
        let err: BookingError = StoreError::StaleWrite("order PO1".into()).into();
        assert_eq!(err, BookingError::Conflict(ConflictError::StaleState));

        let err: BookingError = StoreError::Backend("pool timed out".into()).into();
        assert_eq!(err.category(), ErrorCategory::System);
    }

    #[test]
    fn gateway_timeouts_are_retryable() {
        assert!(GatewayError::Timeout.is_retryable());
        assert!(!GatewayError::Rejected("bad memo".into()).is_retryable());
    }
}
