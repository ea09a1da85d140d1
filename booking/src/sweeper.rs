//! Payment order expiry.
//!
//! Orders are expired three ways, all funnelled through
//! [`ExpirySweeper::expire_order`]: a per-order timer scheduled when the order
//! opens, a periodic sweep over overdue Pending orders, and lazily when a late
//! payment arrives. The order update is guarded on the Pending status, so a
//! payment racing the expiry leaves exactly one winner.

use crate::aggregates::{
    BookingAction, BookingEnvironment, BookingReducer, PaymentOrderAction, PaymentOrderEnvironment,
    PaymentOrderReducer,
};
use crate::config::ExpiryDisposition;
use crate::effects::EffectRunner;
use fieldbook_core::BookingError;
use fieldbook_core::effect::Effect;
use fieldbook_core::environment::Clock;
use fieldbook_core::error::{ConflictError, EntityKind};
use fieldbook_core::reducer::Reducer;
use fieldbook_core::store::{BookingStore, ChangeSet, StoreError};
use fieldbook_core::types::{Actor, BookingStatus, PaymentOrderId, PaymentOrderStatus};
use fieldbook_runtime::metrics::BookingMetrics;
use std::sync::Arc;
use std::time::Duration;

/// Reason recorded on bookings cancelled because their payment lapsed
pub const EXPIRY_CANCEL_REASON: &str = "payment expired";

/// What happened to one order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiryResult {
    /// The order was expired by this call
    Expired {
        /// Whether the booking was cancelled along with it
        booking_cancelled: bool,
    },
    /// It had already been expired
    AlreadyExpired,
    /// Its deadline has not passed
    NotDue,
    /// It was paid or cancelled first
    Settled,
    /// A concurrent transition committed between read and write
    Raced,
}

/// Totals of one sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Orders expired
    pub expired: usize,
    /// Orders that needed nothing
    pub skipped: usize,
    /// Orders another writer got to first
    pub raced: usize,
}

struct Inner {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    effects: EffectRunner,
    disposition: ExpiryDisposition,
    booking_env: BookingEnvironment,
    order_env: PaymentOrderEnvironment,
    batch_size: usize,
}

/// Expires overdue payment orders and applies the configured disposition to
/// their bookings
#[derive(Clone)]
pub struct ExpirySweeper {
    inner: Arc<Inner>,
}

impl ExpirySweeper {
    /// Creates a new `ExpirySweeper`
    #[must_use]
    pub fn new(
        store: Arc<dyn BookingStore>,
        effects: EffectRunner,
        disposition: ExpiryDisposition,
        booking_env: BookingEnvironment,
        order_env: PaymentOrderEnvironment,
        batch_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock: order_env.clock.clone(),
                effects,
                disposition,
                booking_env,
                order_env,
                batch_size: batch_size.max(1),
            }),
        }
    }

    /// Expire one order if its deadline has passed.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the order does not exist
    /// - [`BookingError::System`] if the store fails
    #[tracing::instrument(skip(self))]
    pub async fn expire_order(&self, order_id: PaymentOrderId) -> Result<ExpiryResult, BookingError> {
        let inner = &self.inner;
        let order = inner
            .store
            .payment_order(order_id)
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::PaymentOrder, order_id))?;

        let mut order_state = Some(order);
        let order_outcome =
            match PaymentOrderReducer::new().reduce(&mut order_state, PaymentOrderAction::MarkExpired, &inner.order_env) {
                Ok(outcome) => outcome,
                Err(BookingError::Conflict(ConflictError::NotYetExpired { .. })) => return Ok(ExpiryResult::NotDue),
                Err(BookingError::Transition(_)) => return Ok(ExpiryResult::Settled),
                Err(e) => return Err(e),
            };
        if !order_outcome.is_applied() {
            return Ok(ExpiryResult::AlreadyExpired);
        }
        let Some(order) = order_state else {
            return Err(BookingError::System("order vanished during expiry".to_string()));
        };

        let mut changes = ChangeSet::new().update_order(order.clone(), PaymentOrderStatus::Pending);
        let mut booking_effects: Vec<Effect<BookingAction>> = Vec::new();
        let mut booking_cancelled = false;

        if let Some(booking) = inner.store.booking(order.booking_id).await? {
            let mut state = Some(booking);
            let mut touched = false;
            let reducer = BookingReducer::new();

            match reducer.reduce(&mut state, BookingAction::MarkPaymentExpired, &inner.booking_env) {
                Ok(outcome) => {
                    touched |= outcome.is_applied();
                    booking_effects.extend(outcome.into_effects());
                },
                Err(e) => tracing::warn!(booking_id = %order.booking_id, error = %e, "Booking left as is"),
            }

            let still_pending = state.as_ref().is_some_and(|b| b.status == BookingStatus::Pending);
            if inner.disposition == ExpiryDisposition::CancelBooking && still_pending {
                let cancel = BookingAction::Cancel {
                    actor: Actor::System,
                    reason: EXPIRY_CANCEL_REASON.to_string(),
                };
                let outcome = reducer.reduce(&mut state, cancel, &inner.booking_env)?;
                touched |= outcome.is_applied();
                booking_cancelled = outcome.is_applied();
                booking_effects.extend(outcome.into_effects());
            }

            if let (true, Some(booking)) = (touched, state) {
                changes = changes.update_booking(booking);
            }
        }

        match inner.store.commit(changes).await {
            Ok(()) => {},
            Err(StoreError::StaleWrite(detail)) => {
                tracing::debug!(%detail, "Expiry lost a race");
                return Ok(ExpiryResult::Raced);
            },
            Err(e) => return Err(e.into()),
        }

        BookingMetrics::record_order("expired");
        tracing::info!(code = %order.code, booking_cancelled, "Payment order expired");

        inner.effects.run(order_outcome.into_effects()).await;
        inner.effects.run(booking_effects).await;

        Ok(ExpiryResult::Expired { booking_cancelled })
    }

    /// Expire every overdue Pending order, batch by batch.
    ///
    /// A failure on one order is logged and counted as skipped; the sweep
    /// carries on.
    ///
    /// # Errors
    ///
    /// [`BookingError::System`] if overdue orders cannot be listed.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport, BookingError> {
        let inner = &self.inner;
        let mut report = SweepReport::default();

        loop {
            let now = inner.clock.now();
            let batch = inner.store.pending_orders_expired_at(now, inner.batch_size).await?;
            let fetched = batch.len();
            let mut progressed = false;

            for order in batch {
                match self.expire_order(order.id).await {
                    Ok(ExpiryResult::Expired { .. }) => {
                        report.expired += 1;
                        progressed = true;
                    },
                    Ok(ExpiryResult::Raced) => {
                        report.raced += 1;
                        progressed = true;
                    },
                    Ok(_) => report.skipped += 1,
                    Err(e) => {
                        tracing::warn!(code = %order.code, error = %e, "Failed to expire order");
                        report.skipped += 1;
                    },
                }
            }

            if fetched < inner.batch_size || !progressed {
                break;
            }
        }

        if report.expired > 0 || report.raced > 0 {
            tracing::info!(expired = report.expired, raced = report.raced, "Sweep finished");
        }
        Ok(report)
    }

    /// Expire `order_id` once `delay` has elapsed, on a background task
    pub fn schedule(&self, order_id: PaymentOrderId, delay: Duration) {
        let sweeper = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match sweeper.expire_order(order_id).await {
                Ok(result) => tracing::debug!(%order_id, ?result, "Expiry timer fired"),
                Err(e) => tracing::warn!(%order_id, error = %e, "Expiry timer failed"),
            }
        });
    }
}
