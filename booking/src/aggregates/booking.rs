//! Booking lifecycle.
//!
//! ```text
//! Pending ──confirm──▶ Confirmed ──complete──▶ Completed
//!    │                     │
//!    └──────cancel─────────┴──────▶ Cancelled
//! ```
//!
//! Cancelled and Completed are terminal. Every guard runs before the booking
//! is touched, so a rejected action leaves it exactly as it was.

use crate::availability::Availability;
use chrono::FixedOffset;
use fieldbook_core::effect::Effect;
use fieldbook_core::environment::Clock;
use fieldbook_core::error::{ConflictError, EntityKind, TransitionError, ValidationError};
use fieldbook_core::reducer::{Outcome, Reducer};
use fieldbook_core::types::{
    Actor, Booking, BookingCode, BookingId, BookingOwner, BookingPaymentStatus, BookingStatus, Money,
    Notification, PaymentMethod, Resource, Slot,
};
use fieldbook_core::{BookingError, applied};
use std::sync::Arc;

// ============================================================================
// Actions
// ============================================================================

/// Everything needed to create a booking.
///
/// Price and availability are computed by the caller (under the slot lock)
/// and validated here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBooking {
    /// Pre-generated ID
    pub id: BookingId,
    /// Pre-generated code
    pub code: BookingCode,
    /// Resource as read from the catalog
    pub resource: Resource,
    /// Owner
    pub owner: BookingOwner,
    /// Requested slot
    pub slot: Slot,
    /// Computed price
    pub total_price: Money,
    /// Chosen payment method
    pub payment_method: PaymentMethod,
    /// Customer note
    pub note: Option<String>,
    /// Availability of `slot` at the time of the request
    pub availability: Availability,
}

/// Inputs accepted by [`BookingReducer`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingAction {
    /// Create a Pending booking
    Create(Box<NewBooking>),
    /// Pending → Confirmed
    Confirm {
        /// Who confirms (staff, or the gateway via reconciliation)
        actor: Actor,
    },
    /// Pending/Confirmed → Cancelled
    Cancel {
        /// Who cancels
        actor: Actor,
        /// Why
        reason: String,
    },
    /// Confirmed → Completed
    Complete,
    /// Move a Pending/Confirmed booking to another slot on the same day
    Reschedule {
        /// New slot
        slot: Slot,
        /// Price of the new slot
        total_price: Money,
        /// Availability of the new slot, excluding this booking
        availability: Availability,
    },
    /// The booking's payment order lapsed and the booking stays Pending
    MarkPaymentExpired,
    /// A new payment order is being opened for a Pending booking
    AwaitPayment {
        /// Method the customer now pays with
        method: PaymentMethod,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the booking reducer
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Venue offset from UTC; decides what "today" is
    pub venue_offset: FixedOffset,
    /// Longest allowed booking
    pub max_duration_minutes: i64,
}

impl BookingEnvironment {
    /// Creates a new `BookingEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, venue_offset: FixedOffset, max_duration_minutes: i64) -> Self {
        Self {
            clock,
            venue_offset,
            max_duration_minutes,
        }
    }

    /// Reject malformed, too long, or already elapsed slots.
    ///
    /// # Errors
    ///
    /// The first [`ValidationError`] the slot trips.
    pub fn validate_slot(&self, slot: &Slot) -> Result<(), ValidationError> {
        if !slot.is_well_formed() {
            return Err(ValidationError::InvalidTimeRange {
                start: slot.start,
                end: slot.end,
            });
        }

        let minutes = slot.duration_minutes();
        if minutes <= 0 || minutes > self.max_duration_minutes {
            return Err(ValidationError::DurationOutOfRange {
                minutes,
                min: 1,
                max: self.max_duration_minutes,
            });
        }

        let local_now = self.clock.now().with_timezone(&self.venue_offset);
        let today = local_now.date_naive();
        if slot.date < today {
            return Err(ValidationError::DateInPast { date: slot.date });
        }
        if slot.date == today && slot.start <= local_now.time() {
            return Err(ValidationError::StartTimeElapsed { start: slot.start });
        }

        Ok(())
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Booking state machine; state is `None` until created
#[derive(Clone, Copy, Debug, Default)]
pub struct BookingReducer;

impl BookingReducer {
    /// Creates a new `BookingReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn create(
        state: &mut Option<Booking>,
        new: NewBooking,
        env: &BookingEnvironment,
    ) -> Result<Outcome<BookingAction>, BookingError> {
        if let Some(existing) = state {
            return Err(TransitionError::booking(existing.status, "create").into());
        }

        env.validate_slot(&new.slot)?;

        if !new.resource.status.is_bookable() {
            return Err(ValidationError::ResourceUnavailable {
                resource_id: new.resource.id,
                status: new.resource.status,
            }
            .into());
        }
        if new.total_price.is_zero() {
            return Err(ValidationError::NonPositivePrice.into());
        }
        if let BookingOwner::Guest { contact } = &new.owner {
            if contact.name.trim().is_empty() || contact.phone.trim().is_empty() {
                return Err(ValidationError::IncompleteContact("name and phone are required".to_string()).into());
            }
        }
        new.availability.into_result(new.resource.id, &new.slot)?;

        let payment_status = if new.payment_method.requires_prepayment() {
            BookingPaymentStatus::AwaitingPayment
        } else {
            BookingPaymentStatus::Unpaid
        };

        let booking = Booking {
            id: new.id,
            code: new.code,
            resource_id: new.resource.id,
            owner: new.owner,
            slot: new.slot,
            status: BookingStatus::Pending,
            total_price: new.total_price,
            payment_status,
            payment_method: new.payment_method,
            note: new.note,
            created_at: env.clock.now(),
            confirmed_by: None,
            confirmed_at: None,
            cancelled_by: None,
            cancelled_at: None,
            cancel_reason: None,
            completed_at: None,
            version: 1,
        };

        let notification = Notification::BookingRequested {
            booking_id: booking.id,
            code: booking.code.clone(),
            resource_id: booking.resource_id,
            slot: booking.slot,
            total_price: booking.total_price,
            payment_method: booking.payment_method,
        };
        *state = Some(booking);

        Ok(applied![Effect::Notify(notification)])
    }
}

fn loaded(state: &mut Option<Booking>) -> Result<&mut Booking, BookingError> {
    state
        .as_mut()
        .ok_or_else(|| BookingError::not_found(EntityKind::Booking, "unloaded booking"))
}

impl Reducer for BookingReducer {
    type State = Option<Booking>;
    type Action = BookingAction;
    type Environment = BookingEnvironment;
    type Error = BookingError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Outcome<Self::Action>, Self::Error> {
        match action {
            // ========== Create ==========
            BookingAction::Create(new) => Self::create(state, *new, env),

            // ========== Confirm ==========
            BookingAction::Confirm { actor } => {
                let booking = loaded(state)?;
                if booking.status != BookingStatus::Pending {
                    return Err(TransitionError::booking(booking.status, "confirm").into());
                }

                if actor == Actor::PaymentGateway {
                    booking.payment_status = BookingPaymentStatus::Paid;
                }
                booking.status = BookingStatus::Confirmed;
                booking.confirmed_at = Some(env.clock.now());
                booking.confirmed_by = Some(actor.clone());

                Ok(applied![Effect::Notify(Notification::BookingConfirmed {
                    booking_id: booking.id,
                    code: booking.code.clone(),
                    actor,
                })])
            },

            // ========== Cancel ==========
            BookingAction::Cancel { actor, reason } => {
                let booking = loaded(state)?;
                if !booking.status.holds_slot() {
                    return Err(TransitionError::booking(booking.status, "cancel").into());
                }
                if booking.payment_status == BookingPaymentStatus::Paid {
                    return Err(ConflictError::PaymentCaptured {
                        code: booking.code.clone(),
                    }
                    .into());
                }

                if booking.payment_status == BookingPaymentStatus::AwaitingPayment {
                    booking.payment_status = BookingPaymentStatus::Unpaid;
                }
                booking.status = BookingStatus::Cancelled;
                booking.cancelled_at = Some(env.clock.now());
                booking.cancelled_by = Some(actor.clone());
                booking.cancel_reason = Some(reason.clone());

                Ok(applied![Effect::Notify(Notification::BookingCancelled {
                    booking_id: booking.id,
                    code: booking.code.clone(),
                    actor,
                    reason,
                })])
            },

            // ========== Complete ==========
            BookingAction::Complete => {
                let booking = loaded(state)?;
                if booking.status != BookingStatus::Confirmed {
                    return Err(TransitionError::booking(booking.status, "complete").into());
                }

                booking.status = BookingStatus::Completed;
                booking.completed_at = Some(env.clock.now());

                Ok(applied![Effect::Notify(Notification::BookingCompleted {
                    booking_id: booking.id,
                    code: booking.code.clone(),
                })])
            },

            // ========== Reschedule ==========
            BookingAction::Reschedule {
                slot,
                total_price,
                availability,
            } => {
                let booking = loaded(state)?;
                if !booking.status.holds_slot() {
                    return Err(TransitionError::booking(booking.status, "reschedule").into());
                }
                if slot.date != booking.slot.date {
                    return Err(ValidationError::Other("a booking can only move within its own day".to_string()).into());
                }
                env.validate_slot(&slot)?;
                if total_price.is_zero() {
                    return Err(ValidationError::NonPositivePrice.into());
                }
                availability.into_result(booking.resource_id, &slot)?;
                if booking.payment_status == BookingPaymentStatus::Paid && total_price != booking.total_price {
                    return Err(ConflictError::PriceChanged {
                        code: booking.code.clone(),
                    }
                    .into());
                }
                if slot == booking.slot {
                    return Ok(Outcome::Unchanged);
                }

                let from = booking.slot;
                booking.slot = slot;
                booking.total_price = total_price;

                Ok(applied![Effect::Notify(Notification::BookingRescheduled {
                    booking_id: booking.id,
                    code: booking.code.clone(),
                    from,
                    to: slot,
                })])
            },

            // ========== Payment expired, booking kept ==========
            BookingAction::MarkPaymentExpired => {
                let booking = loaded(state)?;
                match (booking.status, booking.payment_status) {
                    (_, BookingPaymentStatus::Expired) => Ok(Outcome::Unchanged),
                    (BookingStatus::Pending, BookingPaymentStatus::AwaitingPayment) => {
                        booking.payment_status = BookingPaymentStatus::Expired;
                        Ok(applied![])
                    },
                    (status, _) => Err(TransitionError::booking(status, "expire payment of").into()),
                }
            },

            // ========== Payment requested again ==========
            BookingAction::AwaitPayment { method } => {
                let booking = loaded(state)?;
                if booking.status != BookingStatus::Pending {
                    return Err(TransitionError::booking(booking.status, "request payment for").into());
                }
                match booking.payment_status {
                    BookingPaymentStatus::Paid => Err(ConflictError::PaymentCaptured {
                        code: booking.code.clone(),
                    }
                    .into()),
                    BookingPaymentStatus::AwaitingPayment if booking.payment_method == method => {
                        Ok(Outcome::Unchanged)
                    },
                    _ => {
                        booking.payment_method = method;
                        booking.payment_status = BookingPaymentStatus::AwaitingPayment;
                        Ok(applied![])
                    },
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::availability::UnavailableReason;
    use chrono::{NaiveDate, NaiveTime, Offset, Utc};
    use fieldbook_core::ErrorCategory;
    use fieldbook_core::types::{
        GuestContact, OperatingHours, ResourceId, ResourceStatus, ResourceTypeId, UserId,
    };
    use fieldbook_testing::{ReducerTest, assertions, test_clock};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn new_year() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn env() -> BookingEnvironment {
        BookingEnvironment::new(Arc::new(test_clock()), Utc.fix(), 480)
    }

    fn field() -> Resource {
        Resource {
            id: ResourceId::new(),
            resource_type_id: ResourceTypeId::new(),
            name: "Field 1".to_string(),
            hours: OperatingHours::new(t(6, 0), t(22, 0)),
            status: ResourceStatus::Active,
        }
    }

    fn request(slot: Slot, method: PaymentMethod) -> NewBooking {
        NewBooking {
            id: BookingId::new(),
            code: BookingCode::new("BK250101-0001"),
            resource: field(),
            owner: BookingOwner::Registered { user_id: UserId::new() },
            slot,
            total_price: Money::from_minor(200_000),
            payment_method: method,
            note: None,
            availability: Availability::Available,
        }
    }

    fn created(status: BookingStatus) -> Option<Booking> {
        let mut state = None;
        BookingReducer
            .reduce(
                &mut state,
                BookingAction::Create(Box::new(request(
                    Slot::new(new_year(), t(10, 0), t(11, 0)),
                    PaymentMethod::Cash,
                ))),
                &env(),
            )
            .unwrap();
        if let Some(b) = state.as_mut() {
            b.status = status;
        }
        state
    }

    #[test]
    fn create_yields_pending_booking() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(None)
            .when_action(BookingAction::Create(Box::new(request(
                Slot::new(new_year(), t(10, 0), t(11, 0)),
                PaymentMethod::BankTransferQr,
            ))))
            .then_state(|state| {
                let booking = state.as_ref().unwrap();
                assert_eq!(booking.status, BookingStatus::Pending);
                assert_eq!(booking.payment_status, BookingPaymentStatus::AwaitingPayment);
                assert_eq!(booking.duration_minutes(), 60);
            })
            .then_effects(|effects| assertions::assert_notifies(effects, "booking_requested"))
            .run();
    }

    #[test]
    fn cash_booking_starts_unpaid() {
        let state = created(BookingStatus::Pending);
        assert_eq!(state.unwrap().payment_status, BookingPaymentStatus::Unpaid);
    }

    #[test]
    fn create_rejects_inverted_range() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(None)
            .when_action(BookingAction::Create(Box::new(request(
                Slot::new(new_year(), t(11, 0), t(10, 0)),
                PaymentMethod::Cash,
            ))))
            .then_error(|err| {
                assert!(matches!(
                    err,
                    BookingError::Validation(ValidationError::InvalidTimeRange { .. })
                ));
            })
            .run();
    }

    #[test]
    fn create_rejects_more_than_eight_hours() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(None)
            .when_action(BookingAction::Create(Box::new(request(
                Slot::new(new_year(), t(6, 0), t(14, 30)),
                PaymentMethod::Cash,
            ))))
            .then_error(|err| {
                assert!(matches!(
                    err,
                    BookingError::Validation(ValidationError::DurationOutOfRange { minutes: 510, .. })
                ));
            })
            .run();
    }

    #[test]
    fn create_rejects_past_dates_and_elapsed_starts() {
        // Test clock: 2024-12-31 09:00 UTC
        let yesterday = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(None)
            .when_action(BookingAction::Create(Box::new(request(
                Slot::new(yesterday, t(10, 0), t(11, 0)),
                PaymentMethod::Cash,
            ))))
            .then_error(|err| {
                assert!(matches!(err, BookingError::Validation(ValidationError::DateInPast { .. })));
            })
            .run();

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(None)
            .when_action(BookingAction::Create(Box::new(request(
                Slot::new(today, t(8, 30), t(9, 30)),
                PaymentMethod::Cash,
            ))))
            .then_error(|err| {
                assert!(matches!(
                    err,
                    BookingError::Validation(ValidationError::StartTimeElapsed { .. })
                ));
            })
            .run();

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(None)
            .when_action(BookingAction::Create(Box::new(request(
                Slot::new(today, t(9, 30), t(10, 30)),
                PaymentMethod::Cash,
            ))))
            .then_state(|state| assert!(state.is_some()))
            .run();
    }

    #[test]
    fn venue_offset_decides_today() {
        // 09:00 UTC is 16:00 at UTC+7, so a 15:00 local start has elapsed
        let env = BookingEnvironment::new(
            Arc::new(test_clock()),
            FixedOffset::east_opt(7 * 3600).unwrap(),
            480,
        );
        let today = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();

        let err = env.validate_slot(&Slot::new(today, t(15, 0), t(16, 0))).unwrap_err();

        assert!(matches!(err, ValidationError::StartTimeElapsed { .. }));
    }

    #[test]
    fn create_rejects_resource_under_maintenance() {
        let mut req = request(Slot::new(new_year(), t(10, 0), t(11, 0)), PaymentMethod::Cash);
        req.resource.status = ResourceStatus::Maintenance;

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(None)
            .when_action(BookingAction::Create(Box::new(req)))
            .then_error(|err| {
                assert!(matches!(
                    err,
                    BookingError::Validation(ValidationError::ResourceUnavailable { .. })
                ));
            })
            .run();
    }

    #[test]
    fn create_rejects_zero_price() {
        let mut req = request(Slot::new(new_year(), t(10, 0), t(11, 0)), PaymentMethod::Cash);
        req.total_price = Money::ZERO;

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(None)
            .when_action(BookingAction::Create(Box::new(req)))
            .then_error(|err| assert_eq!(*err, BookingError::Validation(ValidationError::NonPositivePrice)))
            .run();
    }

    #[test]
    fn create_rejects_guest_without_phone() {
        let mut req = request(Slot::new(new_year(), t(10, 0), t(11, 0)), PaymentMethod::Cash);
        req.owner = BookingOwner::Guest {
            contact: GuestContact {
                name: "Minh".to_string(),
                phone: "  ".to_string(),
                email: None,
            },
        };

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(None)
            .when_action(BookingAction::Create(Box::new(req)))
            .then_error(|err| {
                assert!(matches!(err, BookingError::Validation(ValidationError::IncompleteContact(_))));
            })
            .run();
    }

    #[test]
    fn create_reports_overlap_as_conflict() {
        let mut req = request(Slot::new(new_year(), t(10, 30), t(11, 30)), PaymentMethod::Cash);
        req.availability = Availability::Unavailable(UnavailableReason::Overlaps {
            booking_id: BookingId::new(),
            code: BookingCode::new("BK250101-0007"),
            start: t(10, 0),
            end: t(11, 0),
        });

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(None)
            .when_action(BookingAction::Create(Box::new(req)))
            .then_error(|err| {
                assert_eq!(err.category(), ErrorCategory::Conflict);
                assert!(err.to_string().contains("BK250101-0007"));
            })
            .run();
    }

    #[test]
    fn staff_confirm_keeps_cash_unpaid() {
        let staff = UserId::new();
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(created(BookingStatus::Pending))
            .when_action(BookingAction::Confirm {
                actor: Actor::User { user_id: staff },
            })
            .then_state(move |state| {
                let booking = state.as_ref().unwrap();
                assert_eq!(booking.status, BookingStatus::Confirmed);
                assert_eq!(booking.payment_status, BookingPaymentStatus::Unpaid);
                assert_eq!(booking.confirmed_by, Some(Actor::User { user_id: staff }));
                assert!(booking.confirmed_at.is_some());
            })
            .then_effects(|effects| assertions::assert_notifies(effects, "booking_confirmed"))
            .run();
    }

    #[test]
    fn gateway_confirm_marks_paid() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(created(BookingStatus::Pending))
            .when_action(BookingAction::Confirm {
                actor: Actor::PaymentGateway,
            })
            .then_state(|state| {
                assert_eq!(state.as_ref().unwrap().payment_status, BookingPaymentStatus::Paid);
            })
            .run();
    }

    #[test]
    fn confirm_twice_is_a_transition_error() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(created(BookingStatus::Confirmed))
            .when_action(BookingAction::Confirm { actor: Actor::System })
            .then_error(|err| {
                assert_eq!(err.to_string(), "cannot confirm a confirmed booking");
            })
            .run();
    }

    #[test]
    fn cancel_terminal_bookings_fails() {
        for status in [BookingStatus::Completed, BookingStatus::Cancelled] {
            ReducerTest::new(BookingReducer::new())
                .with_env(env())
                .given_state(created(status))
                .when_action(BookingAction::Cancel {
                    actor: Actor::System,
                    reason: "changed plans".to_string(),
                })
                .then_error(|err| assert_eq!(err.category(), ErrorCategory::Transition))
                .run();
        }
    }

    #[test]
    fn cancel_records_actor_and_reason() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(created(BookingStatus::Confirmed))
            .when_action(BookingAction::Cancel {
                actor: Actor::System,
                reason: "rain".to_string(),
            })
            .then_state(|state| {
                let booking = state.as_ref().unwrap();
                assert_eq!(booking.status, BookingStatus::Cancelled);
                assert_eq!(booking.cancel_reason.as_deref(), Some("rain"));
                assert_eq!(booking.cancelled_by, Some(Actor::System));
            })
            .then_effects(|effects| assertions::assert_notifies(effects, "booking_cancelled"))
            .run();
    }

    #[test]
    fn paid_booking_cannot_be_cancelled() {
        let mut state = created(BookingStatus::Confirmed);
        if let Some(b) = state.as_mut() {
            b.payment_status = BookingPaymentStatus::Paid;
        }

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state)
            .when_action(BookingAction::Cancel {
                actor: Actor::System,
                reason: "no show".to_string(),
            })
            .then_error(|err| {
                assert!(matches!(err, BookingError::Conflict(ConflictError::PaymentCaptured { .. })));
            })
            .run();
    }

    #[test]
    fn complete_only_from_confirmed() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(created(BookingStatus::Pending))
            .when_action(BookingAction::Complete)
            .then_error(|err| assert_eq!(err.to_string(), "cannot complete a pending booking"))
            .run();

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(created(BookingStatus::Confirmed))
            .when_action(BookingAction::Complete)
            .then_state(|state| {
                let booking = state.as_ref().unwrap();
                assert_eq!(booking.status, BookingStatus::Completed);
                assert!(booking.completed_at.is_some());
            })
            .run();
    }

    #[test]
    fn reschedule_moves_slot_and_reprices() {
        let to = Slot::new(new_year(), t(12, 0), t(13, 30));
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(created(BookingStatus::Confirmed))
            .when_action(BookingAction::Reschedule {
                slot: to,
                total_price: Money::from_minor(300_000),
                availability: Availability::Available,
            })
            .then_state(move |state| {
                let booking = state.as_ref().unwrap();
                assert_eq!(booking.slot, to);
                assert_eq!(booking.total_price, Money::from_minor(300_000));
            })
            .then_effects(|effects| assertions::assert_notifies(effects, "booking_rescheduled"))
            .run();
    }

    #[test]
    fn reschedule_of_paid_booking_must_keep_price() {
        let mut state = created(BookingStatus::Confirmed);
        if let Some(b) = state.as_mut() {
            b.payment_status = BookingPaymentStatus::Paid;
        }

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state)
            .when_action(BookingAction::Reschedule {
                slot: Slot::new(new_year(), t(12, 0), t(13, 30)),
                total_price: Money::from_minor(300_000),
                availability: Availability::Available,
            })
            .then_error(|err| {
                assert!(matches!(err, BookingError::Conflict(ConflictError::PriceChanged { .. })));
            })
            .run();
    }

    #[test]
    fn reschedule_to_another_day_is_rejected() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(created(BookingStatus::Pending))
            .when_action(BookingAction::Reschedule {
                slot: Slot::new(new_year().succ_opt().unwrap(), t(10, 0), t(11, 0)),
                total_price: Money::from_minor(200_000),
                availability: Availability::Available,
            })
            .then_error(|err| assert_eq!(err.category(), ErrorCategory::Validation))
            .run();
    }

    #[test]
    fn payment_expiry_keeps_booking_pending() {
        let mut state = created(BookingStatus::Pending);
        if let Some(b) = state.as_mut() {
            b.payment_status = BookingPaymentStatus::AwaitingPayment;
        }

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state.clone())
            .when_action(BookingAction::MarkPaymentExpired)
            .then_state(|state| {
                let booking = state.as_ref().unwrap();
                assert_eq!(booking.status, BookingStatus::Pending);
                assert_eq!(booking.payment_status, BookingPaymentStatus::Expired);
            })
            .then_effects(assertions::assert_no_effects)
            .run();

        if let Some(b) = state.as_mut() {
            b.payment_status = BookingPaymentStatus::Expired;
        }
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state)
            .when_action(BookingAction::MarkPaymentExpired)
            .then_unchanged()
            .run();
    }

    #[test]
    fn cash_booking_switches_to_prepayment_once() {
        let state = created(BookingStatus::Pending);

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state.clone())
            .when_action(BookingAction::AwaitPayment {
                method: PaymentMethod::BankTransferQr,
            })
            .then_state(|state| {
                let booking = state.as_ref().unwrap();
                assert_eq!(booking.payment_method, PaymentMethod::BankTransferQr);
                assert_eq!(booking.payment_status, BookingPaymentStatus::AwaitingPayment);
            })
            .run();

        let mut awaiting = state;
        if let Some(b) = awaiting.as_mut() {
            b.payment_method = PaymentMethod::BankTransferQr;
            b.payment_status = BookingPaymentStatus::AwaitingPayment;
        }
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(awaiting)
            .when_action(BookingAction::AwaitPayment {
                method: PaymentMethod::BankTransferQr,
            })
            .then_unchanged()
            .run();
    }

    #[test]
    fn payment_cannot_be_requested_for_settled_bookings() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(created(BookingStatus::Confirmed))
            .when_action(BookingAction::AwaitPayment {
                method: PaymentMethod::EWallet,
            })
            .then_error(|err| assert_eq!(err.category(), ErrorCategory::Transition))
            .run();

        let mut paid = created(BookingStatus::Pending);
        if let Some(b) = paid.as_mut() {
            b.payment_status = BookingPaymentStatus::Paid;
        }
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(paid)
            .when_action(BookingAction::AwaitPayment {
                method: PaymentMethod::EWallet,
            })
            .then_error(|err| {
                assert!(matches!(err, BookingError::Conflict(ConflictError::PaymentCaptured { .. })));
            })
            .run();
    }
}
