//! Payment order lifecycle.
//!
//! An order waits in Pending for an external payment until its TTL runs out.
//! Paid, Expired and Cancelled are terminal and immutable. Replays of a
//! transition that already happened (a second gateway callback, a second
//! expiry timer) come back as [`Outcome::Unchanged`] so the caller persists
//! nothing and re-fires nothing.

use chrono::TimeDelta;
use fieldbook_core::effect::Effect;
use fieldbook_core::environment::Clock;
use fieldbook_core::error::{ConflictError, EntityKind, TransitionError, ValidationError};
use fieldbook_core::reducer::{Outcome, Reducer};
use fieldbook_core::types::{
    BookingId, Money, Notification, OrderCode, PaymentMethod, PaymentOrder, PaymentOrderId,
    PaymentOrderStatus,
};
use fieldbook_core::{BookingError, applied, delay};
use std::sync::Arc;
use std::time::Duration;

/// Inputs accepted by [`PaymentOrderReducer`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOrderAction {
    /// Open an order; a Pending order already in state is kept as is
    Open {
        /// Pre-generated ID
        id: PaymentOrderId,
        /// Pre-generated code
        code: OrderCode,
        /// Booking being paid for
        booking_id: BookingId,
        /// Amount due
        amount: Money,
        /// Payment method
        method: PaymentMethod,
    },
    /// External payment confirmed
    MarkPaid {
        /// Gateway transaction reference
        reference: String,
    },
    /// TTL elapsed
    MarkExpired,
    /// Withdrawn before payment
    Cancel,
}

/// Dependencies of the payment order reducer
#[derive(Clone)]
pub struct PaymentOrderEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Time-to-live of new orders
    pub ttl: Duration,
}

impl PaymentOrderEnvironment {
    /// Creates a new `PaymentOrderEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { clock, ttl }
    }
}

/// Payment order state machine; state is `None` until opened
#[derive(Clone, Copy, Debug, Default)]
pub struct PaymentOrderReducer;

impl PaymentOrderReducer {
    /// Creates a new `PaymentOrderReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn loaded(state: &mut Option<PaymentOrder>) -> Result<&mut PaymentOrder, BookingError> {
    state
        .as_mut()
        .ok_or_else(|| BookingError::not_found(EntityKind::PaymentOrder, "unloaded order"))
}

impl Reducer for PaymentOrderReducer {
    type State = Option<PaymentOrder>;
    type Action = PaymentOrderAction;
    type Environment = PaymentOrderEnvironment;
    type Error = BookingError;

    #[allow(clippy::too_many_lines)] // one arm per transition
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Outcome<Self::Action>, Self::Error> {
        let now = env.clock.now();

        match action {
            // ========== Open ==========
            PaymentOrderAction::Open {
                id,
                code,
                booking_id,
                amount,
                method,
            } => {
                match state {
                    Some(order) if order.status == PaymentOrderStatus::Pending => {
                        tracing::debug!(order = %order.code, "Pending order already open, reusing it");
                        return Ok(Outcome::Unchanged);
                    },
                    Some(order) => return Err(TransitionError::order(order.status, "reopen").into()),
                    None => {},
                }
                if amount.is_zero() {
                    return Err(ValidationError::NonPositivePrice.into());
                }
                let ttl = TimeDelta::from_std(env.ttl)
                    .map_err(|e| BookingError::System(format!("invalid order TTL: {e}")))?;

                let order = PaymentOrder {
                    id,
                    code,
                    booking_id,
                    amount,
                    status: PaymentOrderStatus::Pending,
                    method,
                    created_at: now,
                    expires_at: now + ttl,
                    paid_at: None,
                    external_reference: None,
                };
                let requested = Notification::PaymentRequested {
                    order_id: order.id,
                    code: order.code.clone(),
                    booking_id,
                    amount,
                    expires_at: order.expires_at,
                };
                *state = Some(order);

                Ok(applied![
                    Effect::Notify(requested),
                    delay! {
                        duration: env.ttl,
                        action: PaymentOrderAction::MarkExpired
                    },
                ])
            },

            // ========== Mark paid ==========
            PaymentOrderAction::MarkPaid { reference } => {
                let order = loaded(state)?;
                match order.status {
                    PaymentOrderStatus::Paid => {
                        if order.external_reference.as_deref() != Some(reference.as_str()) {
                            tracing::warn!(
                                order = %order.code,
                                recorded = ?order.external_reference,
                                received = %reference,
                                "Order already paid under a different reference"
                            );
                        }
                        Ok(Outcome::Unchanged)
                    },
                    PaymentOrderStatus::Expired => Err(ConflictError::OrderExpired {
                        code: order.code.clone(),
                        expires_at: order.expires_at,
                    }
                    .into()),
                    PaymentOrderStatus::Pending if order.is_past_expiry(now) => {
                        Err(ConflictError::OrderExpired {
                            code: order.code.clone(),
                            expires_at: order.expires_at,
                        }
                        .into())
                    },
                    PaymentOrderStatus::Pending => {
                        order.status = PaymentOrderStatus::Paid;
                        order.paid_at = Some(now);
                        order.external_reference = Some(reference.clone());

                        Ok(applied![Effect::Notify(Notification::PaymentReceived {
                            order_id: order.id,
                            code: order.code.clone(),
                            booking_id: order.booking_id,
                            amount: order.amount,
                            reference,
                        })])
                    },
                    PaymentOrderStatus::Cancelled => {
                        Err(TransitionError::order(order.status, "pay").into())
                    },
                }
            },

            // ========== Mark expired ==========
            PaymentOrderAction::MarkExpired => {
                let order = loaded(state)?;
                match order.status {
                    PaymentOrderStatus::Expired => Ok(Outcome::Unchanged),
                    PaymentOrderStatus::Pending if !order.is_past_expiry(now) => {
                        Err(ConflictError::NotYetExpired {
                            code: order.code.clone(),
                            expires_at: order.expires_at,
                        }
                        .into())
                    },
                    PaymentOrderStatus::Pending => {
                        order.status = PaymentOrderStatus::Expired;

                        Ok(applied![Effect::Notify(Notification::PaymentExpired {
                            order_id: order.id,
                            code: order.code.clone(),
                            booking_id: order.booking_id,
                        })])
                    },
                    status @ (PaymentOrderStatus::Paid | PaymentOrderStatus::Cancelled) => {
                        Err(TransitionError::order(status, "expire").into())
                    },
                }
            },

            // ========== Cancel ==========
            PaymentOrderAction::Cancel => {
                let order = loaded(state)?;
                if order.status != PaymentOrderStatus::Pending {
                    return Err(TransitionError::order(order.status, "cancel").into());
                }
                order.status = PaymentOrderStatus::Cancelled;

                Ok(applied![Effect::Notify(Notification::PaymentCancelled {
                    order_id: order.id,
                    code: order.code.clone(),
                    booking_id: order.booking_id,
                })])
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use fieldbook_core::ErrorCategory;
    use fieldbook_testing::{ManualClock, ReducerTest, assertions, test_clock};

    const TTL: Duration = Duration::from_secs(600);

    fn env_at(clock: &ManualClock) -> PaymentOrderEnvironment {
        PaymentOrderEnvironment::new(Arc::new(clock.clone()), TTL)
    }

    fn open_action() -> PaymentOrderAction {
        PaymentOrderAction::Open {
            id: PaymentOrderId::new(),
            code: OrderCode::new("PO000001"),
            booking_id: BookingId::new(),
            amount: Money::from_minor(200_000),
            method: PaymentMethod::BankTransferQr,
        }
    }

    fn pending(clock: &ManualClock) -> Option<PaymentOrder> {
        let mut state = None;
        PaymentOrderReducer
            .reduce(&mut state, open_action(), &env_at(clock))
            .unwrap();
        state
    }

    fn with_status(clock: &ManualClock, status: PaymentOrderStatus) -> Option<PaymentOrder> {
        let mut state = pending(clock);
        if let Some(order) = state.as_mut() {
            order.status = status;
            if status == PaymentOrderStatus::Paid {
                order.external_reference = Some("TX-1".to_string());
                order.paid_at = Some(order.created_at);
            }
        }
        state
    }

    #[test]
    fn open_sets_ttl_and_schedules_expiry() {
        let clock = test_clock();
        let opened_at = clock.now();

        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(None)
            .when_action(open_action())
            .then_state(move |state| {
                let order = state.as_ref().unwrap();
                assert_eq!(order.status, PaymentOrderStatus::Pending);
                assert_eq!(order.expires_at - opened_at, ChronoDuration::minutes(10));
            })
            .then_effects(|effects| {
                assertions::assert_notifies(effects, "payment_requested");
                assertions::assert_delayed(effects, TTL, &PaymentOrderAction::MarkExpired);
            })
            .run();
    }

    #[test]
    fn open_reuses_pending_order() {
        let clock = test_clock();
        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(pending(&clock))
            .when_action(open_action())
            .then_unchanged()
            .run();
    }

    #[test]
    fn open_rejects_zero_amount() {
        let clock = test_clock();
        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(None)
            .when_action(PaymentOrderAction::Open {
                id: PaymentOrderId::new(),
                code: OrderCode::new("PO000002"),
                booking_id: BookingId::new(),
                amount: Money::ZERO,
                method: PaymentMethod::EWallet,
            })
            .then_error(|err| assert_eq!(err.category(), ErrorCategory::Validation))
            .run();
    }

    #[test]
    fn mark_paid_before_expiry() {
        let clock = test_clock();
        let state = pending(&clock);
        clock.advance(ChronoDuration::minutes(9));

        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(state)
            .when_action(PaymentOrderAction::MarkPaid {
                reference: "TX-1".to_string(),
            })
            .then_state(|state| {
                let order = state.as_ref().unwrap();
                assert_eq!(order.status, PaymentOrderStatus::Paid);
                assert_eq!(order.external_reference.as_deref(), Some("TX-1"));
                assert!(order.paid_at.is_some());
            })
            .then_effects(|effects| assertions::assert_notifies(effects, "payment_received"))
            .run();
    }

    #[test]
    fn mark_paid_twice_is_idempotent() {
        let clock = test_clock();
        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(with_status(&clock, PaymentOrderStatus::Paid))
            .when_action(PaymentOrderAction::MarkPaid {
                reference: "TX-1".to_string(),
            })
            .then_unchanged()
            .run();
    }

    #[test]
    fn mark_paid_at_expiry_instant_is_rejected() {
        let clock = test_clock();
        let state = pending(&clock);
        clock.advance(ChronoDuration::minutes(10));

        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(state)
            .when_action(PaymentOrderAction::MarkPaid {
                reference: "TX-late".to_string(),
            })
            .then_error(|err| {
                assert!(matches!(err, BookingError::Conflict(ConflictError::OrderExpired { .. })));
            })
            .run();
    }

    #[test]
    fn mark_paid_on_expired_order_is_rejected() {
        let clock = test_clock();
        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(with_status(&clock, PaymentOrderStatus::Expired))
            .when_action(PaymentOrderAction::MarkPaid {
                reference: "TX-2".to_string(),
            })
            .then_error(|err| assert_eq!(err.category(), ErrorCategory::Conflict))
            .run();
    }

    #[test]
    fn mark_paid_on_cancelled_order_is_a_transition_error() {
        let clock = test_clock();
        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(with_status(&clock, PaymentOrderStatus::Cancelled))
            .when_action(PaymentOrderAction::MarkPaid {
                reference: "TX-3".to_string(),
            })
            .then_error(|err| assert_eq!(err.to_string(), "cannot pay a cancelled payment order"))
            .run();
    }

    #[test]
    fn mark_expired_waits_for_deadline() {
        let clock = test_clock();
        let state = pending(&clock);
        clock.advance(ChronoDuration::minutes(5));

        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(state)
            .when_action(PaymentOrderAction::MarkExpired)
            .then_error(|err| {
                assert!(matches!(err, BookingError::Conflict(ConflictError::NotYetExpired { .. })));
            })
            .run();
    }

    #[test]
    fn mark_expired_after_deadline_then_again() {
        let clock = test_clock();
        let state = pending(&clock);
        clock.advance(ChronoDuration::minutes(10));

        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(state)
            .when_action(PaymentOrderAction::MarkExpired)
            .then_state(|state| {
                assert_eq!(state.as_ref().unwrap().status, PaymentOrderStatus::Expired);
            })
            .then_effects(|effects| assertions::assert_notifies(effects, "payment_expired"))
            .run();

        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(with_status(&clock, PaymentOrderStatus::Expired))
            .when_action(PaymentOrderAction::MarkExpired)
            .then_unchanged()
            .run();
    }

    #[test]
    fn paid_order_never_expires() {
        let clock = test_clock();
        let state = with_status(&clock, PaymentOrderStatus::Paid);
        clock.advance(ChronoDuration::hours(1));

        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(state)
            .when_action(PaymentOrderAction::MarkExpired)
            .then_error(|err| assert_eq!(err.category(), ErrorCategory::Transition))
            .run();
    }

    #[test]
    fn cancel_only_from_pending() {
        let clock = test_clock();
        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(pending(&clock))
            .when_action(PaymentOrderAction::Cancel)
            .then_state(|state| {
                assert_eq!(state.as_ref().unwrap().status, PaymentOrderStatus::Cancelled);
            })
            .then_effects(|effects| assertions::assert_notifies(effects, "payment_cancelled"))
            .run();

        ReducerTest::new(PaymentOrderReducer::new())
            .with_env(env_at(&clock))
            .given_state(with_status(&clock, PaymentOrderStatus::Paid))
            .when_action(PaymentOrderAction::Cancel)
            .then_error(|err| assert_eq!(err.category(), ErrorCategory::Transition))
            .run();
    }
}
