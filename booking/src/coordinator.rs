//! Reservation coordinator.
//!
//! Orchestrates every write the engine performs:
//!
//! 1. load what the reducers need (catalog, current bookings, orders)
//! 2. run the reducers, which validate and describe effects
//! 3. commit the resulting [`ChangeSet`] atomically
//! 4. run the effects (notifications, expiry timers)
//!
//! Reservation holds the `(resource, date)` slot lock from the availability
//! check until the commit returns, so two requests for the same slot cannot
//! both pass the check. The store's overlap guard backs this up across
//! processes. Payment and expiry race on the order row and are settled by the
//! store's expected-status compare. Every booking write is guarded by the row
//! version it was read at, and every check against the booking's orders runs
//! after that read, so an order opened in between makes the write stale
//! instead of letting it overwrite the newer row.

use crate::aggregates::{
    BookingAction, BookingEnvironment, BookingReducer, NewBooking, PaymentOrderAction,
    PaymentOrderEnvironment, PaymentOrderReducer,
};
use crate::availability::{Availability, AvailabilityChecker, SlotSuggestions};
use crate::config::{BookingConfig, PaymentConfig, SweeperConfig};
use crate::draft::{BookingDraft, DraftId, DraftStore};
use crate::effects::EffectRunner;
use crate::gateway::ResilientGateway;
use crate::pricing::{PricingEngine, Quote};
use crate::sweeper::{ExpirySweeper, SweepReport};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Timelike, Utc};
use fieldbook_core::environment::{
    Clock, CodeGenerator, GatewayPaymentStatus, IdentityContext, NotificationSink, PaymentGateway,
    ResourceCatalog,
};
use fieldbook_core::error::{ConflictError, EntityKind, TransitionError, ValidationError};
use fieldbook_core::reducer::{Effects, Reducer};
use fieldbook_core::store::{BookingStore, ChangeSet, StoreError};
use fieldbook_core::types::{
    Actor, Booking, BookingCode, BookingId, BookingOwner, BookingStatus, Money, OrderCode,
    PaymentMethod, PaymentOrder, PaymentOrderId, PaymentOrderStatus, Principal, Resource, ResourceId,
    Slot,
};
use fieldbook_core::{BookingError, ErrorCategory};
use fieldbook_runtime::metrics::BookingMetrics;
use fieldbook_runtime::slot_lock::{SlotGuard, SlotLocks};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Booking codes tried before a persistent collision is reported
const CODE_ATTEMPTS: usize = 3;

/// External collaborators the coordinator is wired to
#[derive(Clone)]
pub struct Collaborators {
    /// Bookings and payment orders
    pub store: Arc<dyn BookingStore>,
    /// Resources, types, pricing rules
    pub catalog: Arc<dyn ResourceCatalog>,
    /// Operator notifications
    pub notifier: Arc<dyn NotificationSink>,
    /// Payment provider (wrapped with timeout and retries by the coordinator)
    pub gateway: Arc<dyn PaymentGateway>,
    /// Booking and order codes
    pub codes: Arc<dyn CodeGenerator>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// A request to reserve a slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Resource to book
    pub resource_id: ResourceId,
    /// Requested slot
    pub slot: Slot,
    /// Who the booking is for
    pub owner: BookingOwner,
    /// How the customer pays
    pub payment_method: PaymentMethod,
    /// Customer note
    pub note: Option<String>,
}

/// Payment details returned when prepayment applies
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCheckout {
    /// Order ID
    pub order_id: PaymentOrderId,
    /// Order code; also the transfer memo
    pub order_code: OrderCode,
    /// Amount due
    pub amount: Money,
    /// Deadline for the payment
    pub expires_at: DateTime<Utc>,
    /// Scannable payment URL; `None` if the gateway could not produce one
    pub qr_url: Option<String>,
}

/// Receipt of a successful reservation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Booking ID
    pub booking_id: BookingId,
    /// Booking code
    pub booking_code: BookingCode,
    /// Price of the slot
    pub total_price: Money,
    /// Booking status (always Pending on creation)
    pub status: BookingStatus,
    /// Present when the payment method requires prepayment
    pub payment: Option<PaymentCheckout>,
}

/// Result of reconciling an external payment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentConfirmation {
    /// The order was paid and the booking confirmed by this call
    Confirmed,
    /// The order had already been paid; nothing was repeated
    AlreadyPaid,
}

/// Where a payment stands after polling the gateway
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentProgress {
    /// Paid (now or earlier)
    Paid,
    /// No usable payment yet
    StillPending,
    /// The order lapsed
    Expired,
    /// The order was withdrawn
    Cancelled,
}

/// Entry point for every reservation and payment operation
pub struct ReservationCoordinator {
    store: Arc<dyn BookingStore>,
    catalog: Arc<dyn ResourceCatalog>,
    codes: Arc<dyn CodeGenerator>,
    clock: Arc<dyn Clock>,
    gateway: ResilientGateway,
    locks: SlotLocks,
    drafts: DraftStore,
    effects: EffectRunner,
    sweeper: ExpirySweeper,
    booking_env: BookingEnvironment,
    order_env: PaymentOrderEnvironment,
    booking_config: BookingConfig,
    schedule_expiry: bool,
}

fn slot_taken(resource_id: ResourceId, slot: &Slot, conflicting: Option<BookingCode>) -> BookingError {
    ConflictError::SlotTaken {
        resource_id,
        date: slot.date,
        start: slot.start,
        end: slot.end,
        conflicting,
    }
    .into()
}

fn store_failure(err: StoreError, resource_id: ResourceId, slot: &Slot) -> BookingError {
    match err {
        StoreError::SlotTaken { conflicting } => slot_taken(resource_id, slot, Some(conflicting)),
        other => other.into(),
    }
}

fn require_staff(identity: &dyn IdentityContext) -> Result<Principal, BookingError> {
    match identity.principal() {
        Some(principal) if principal.role.is_staff() => Ok(principal),
        Some(_) => Err(BookingError::Forbidden("staff role required".to_string())),
        None => Err(BookingError::Forbidden("authentication required".to_string())),
    }
}

fn require_staff_or_owner(identity: &dyn IdentityContext, booking: &Booking) -> Result<Principal, BookingError> {
    let principal = identity
        .principal()
        .ok_or_else(|| BookingError::Forbidden("authentication required".to_string()))?;
    if principal.role.is_staff() || booking.owner.user_id() == Some(principal.user_id) {
        Ok(principal)
    } else {
        Err(BookingError::Forbidden(format!(
            "only staff or the owner may change booking {}",
            booking.code
        )))
    }
}

fn unloaded(entity: EntityKind) -> BookingError {
    BookingError::System(format!("{entity} state missing after reduction"))
}

/// First quarter-hour boundary at or after `time`; `None` past the last one
fn next_quarter_hour(time: NaiveTime) -> Option<NaiveTime> {
    let secs = time.num_seconds_from_midnight().div_ceil(900) * 900;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, 0).filter(|_| secs < 86_400)
}

impl ReservationCoordinator {
    /// Wire a coordinator to its collaborators
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        booking: BookingConfig,
        payment: &PaymentConfig,
        sweeper: &SweeperConfig,
    ) -> Self {
        let Collaborators {
            store,
            catalog,
            notifier,
            gateway,
            codes,
            clock,
        } = collaborators;

        let booking_env = BookingEnvironment::new(clock.clone(), booking.venue_offset(), booking.max_duration_minutes);
        let order_env = PaymentOrderEnvironment::new(clock.clone(), payment.order_ttl());
        let effects = EffectRunner::new(notifier);
        let expiry = ExpirySweeper::new(
            store.clone(),
            effects.clone(),
            booking.expiry_disposition,
            booking_env.clone(),
            order_env.clone(),
            sweeper.batch_size,
        );

        Self {
            drafts: DraftStore::new(clock.clone(), booking.draft_ttl(), booking.max_duration_minutes),
            gateway: ResilientGateway::new(gateway, payment),
            locks: SlotLocks::new(),
            sweeper: expiry,
            schedule_expiry: payment.schedule_expiry_timers,
            store,
            catalog,
            codes,
            clock,
            effects,
            booking_env,
            order_env,
            booking_config: booking,
        }
    }

    /// The expiry sweeper sharing this coordinator's store and policy
    #[must_use]
    pub const fn sweeper(&self) -> &ExpirySweeper {
        &self.sweeper
    }

    /// The draft store
    #[must_use]
    pub const fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    // ========================================================================
    // Reservation
    // ========================================================================

    /// Reserve a slot: creates a Pending booking and, when the payment method
    /// requires prepayment, its payment order, in one commit.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Validation`] for malformed or past slots, unbookable
    ///   resources, closed hours, incomplete guest contact, a zero price
    /// - [`BookingError::Conflict`] when the slot is taken or its lock is busy
    /// - [`BookingError::NotFound`] for unknown resources
    /// - [`BookingError::System`] on store failures
    #[tracing::instrument(
        skip(self, request),
        fields(resource_id = %request.resource_id, slot = %request.slot, method = %request.payment_method)
    )]
    pub async fn reserve(&self, request: ReservationRequest) -> Result<Reservation, BookingError> {
        let result = self.create_reservation(request).await;

        let outcome = match &result {
            Ok(_) => "created",
            Err(BookingError::Conflict(ConflictError::SlotTaken { conflicting, .. })) => {
                BookingMetrics::record_conflict();
                tracing::warn!(conflicting = ?conflicting, "Slot already taken");
                "conflict"
            },
            Err(e) => match e.category() {
                ErrorCategory::Conflict => "conflict",
                ErrorCategory::System | ErrorCategory::ExternalDependency => {
                    tracing::error!(error = %e, "Reservation failed");
                    "failed"
                },
                _ => "rejected",
            },
        };
        BookingMetrics::record_reservation(outcome);
        result
    }

    async fn create_reservation(&self, request: ReservationRequest) -> Result<Reservation, BookingError> {
        let ReservationRequest {
            resource_id,
            slot,
            owner,
            payment_method,
            note,
        } = request;

        self.booking_env.validate_slot(&slot)?;
        let resource = self.resource(resource_id).await?;
        let total_price = self.price(&resource, &slot).await?.total;

        let guard = self.lock(resource_id, slot.date).await?;
        let existing = self.store.active_bookings_on(resource_id, slot.date).await?;
        let availability = AvailabilityChecker::check(&resource, &slot, &existing, None);

        let mut attempt = 0;
        let (booking, order, booking_effects, order_effects) = loop {
            attempt += 1;

            let new = NewBooking {
                id: BookingId::new(),
                code: self.codes.booking_code(slot.date),
                resource: resource.clone(),
                owner: owner.clone(),
                slot,
                total_price,
                payment_method,
                note: note.clone(),
                availability: availability.clone(),
            };
            let mut booking_state = None;
            let booking_effects = BookingReducer::new()
                .reduce(&mut booking_state, BookingAction::Create(Box::new(new)), &self.booking_env)?
                .into_effects();
            let booking = booking_state.ok_or_else(|| unloaded(EntityKind::Booking))?;
            let mut changes = ChangeSet::new().insert_booking(booking.clone());

            let mut order = None;
            let mut order_effects = Effects::new();
            if payment_method.requires_prepayment() {
                let open = PaymentOrderAction::Open {
                    id: PaymentOrderId::new(),
                    code: self.codes.order_code(),
                    booking_id: booking.id,
                    amount: booking.total_price,
                    method: payment_method,
                };
                let mut order_state = None;
                order_effects = PaymentOrderReducer::new()
                    .reduce(&mut order_state, open, &self.order_env)?
                    .into_effects();
                let opened = order_state.ok_or_else(|| unloaded(EntityKind::PaymentOrder))?;
                changes = changes.insert_order(opened.clone());
                order = Some(opened);
            }

            match self.store.commit(changes).await {
                Ok(()) => break (booking, order, booking_effects, order_effects),
                Err(StoreError::Duplicate(detail)) if attempt < CODE_ATTEMPTS => {
                    tracing::debug!(%detail, attempt, "Code collision, regenerating");
                },
                Err(e) => return Err(store_failure(e, resource_id, &slot)),
            }
        };
        drop(guard);

        tracing::info!(
            booking_code = %booking.code,
            total_price = %booking.total_price,
            order_code = order.as_ref().map(|o| o.code.as_str()),
            "Reservation created"
        );

        self.effects.run(booking_effects).await;
        let delayed = self.effects.run(order_effects).await;

        let payment = match order {
            Some(order) => {
                BookingMetrics::record_order("opened");
                self.schedule_timers(&order, delayed);
                Some(self.checkout(order).await)
            },
            None => None,
        };

        Ok(Reservation {
            booking_id: booking.id,
            booking_code: booking.code,
            total_price: booking.total_price,
            status: booking.status,
            payment,
        })
    }

    /// Reserve from a stored draft with the chosen payment method.
    ///
    /// # Errors
    ///
    /// [`ValidationError::DraftExpired`] if the draft is unknown, used, or
    /// expired; otherwise as [`Self::reserve`].
    #[tracing::instrument(skip(self))]
    pub async fn reserve_draft(
        &self,
        draft_id: DraftId,
        payment_method: PaymentMethod,
    ) -> Result<Reservation, BookingError> {
        let draft = self.drafts.take(draft_id).ok_or(ValidationError::DraftExpired)?;
        self.reserve(ReservationRequest {
            resource_id: draft.resource_id,
            slot: draft.slot,
            owner: draft.owner,
            payment_method,
            note: draft.note,
        })
        .await
    }

    /// Store a draft until the customer picks a payment method.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] when the draft's slot or contact is invalid.
    pub fn stash_draft(&self, draft: BookingDraft) -> Result<DraftId, BookingError> {
        self.drafts.stash(draft)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Whether `slot` is free on a resource, optionally ignoring one booking.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for unknown resources, [`BookingError::System`]
    /// on store failures.
    #[tracing::instrument(skip(self))]
    pub async fn is_available(
        &self,
        resource_id: ResourceId,
        slot: Slot,
        exclude: Option<BookingId>,
    ) -> Result<Availability, BookingError> {
        let resource = self.resource(resource_id).await?;
        let existing = self.store.active_bookings_on(resource_id, slot.date).await?;
        Ok(AvailabilityChecker::check(&resource, &slot, &existing, exclude))
    }

    /// Free slots of at most `max_minutes` on `date`. For today, no slot
    /// starts before the next quarter hour.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::DateInPast`] for past dates
    /// - [`BookingError::NotFound`] for unknown resources
    #[tracing::instrument(skip(self))]
    pub async fn suggest_available_slots(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
        max_minutes: i64,
    ) -> Result<SlotSuggestions, BookingError> {
        let local_now = self.clock.now().with_timezone(&self.booking_env.venue_offset);
        let today = local_now.date_naive();
        if date < today {
            return Err(ValidationError::DateInPast { date }.into());
        }

        let resource = self.resource(resource_id).await?;
        let not_before =
            (date == today).then(|| next_quarter_hour(local_now.time()).unwrap_or(resource.hours.close));
        let existing = self.store.active_bookings_on(resource_id, date).await?;

        Ok(AvailabilityChecker::suggest(
            &resource,
            date,
            &existing,
            TimeDelta::minutes(max_minutes.min(self.booking_config.max_duration_minutes)),
            TimeDelta::minutes(self.booking_config.min_suggestion_minutes),
            not_before,
        ))
    }

    /// Price breakdown for a slot, falling back to the base price where no
    /// rule applies.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidTimeRange`] if the slot ends before it starts
    /// - [`BookingError::NotFound`] for unknown resources or types
    /// - [`BookingError::System`] for ambiguous rules
    pub async fn quote(&self, resource_id: ResourceId, slot: Slot) -> Result<Quote, BookingError> {
        if !slot.is_well_formed() {
            return Err(ValidationError::InvalidTimeRange {
                start: slot.start,
                end: slot.end,
            }
            .into());
        }
        let resource = self.resource(resource_id).await?;
        self.price(&resource, &slot).await
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Reconcile an external payment: the order becomes Paid and its booking
    /// Confirmed in one commit. A replay for an already paid order succeeds
    /// without repeating anything.
    ///
    /// Notification failures after the commit are logged, never returned.
    ///
    /// # Errors
    ///
    /// - [`ConflictError::OrderExpired`] if the order lapsed (it is expired on
    ///   the spot if that had not happened yet)
    /// - [`BookingError::Transition`] if the order was cancelled or the
    ///   booking can no longer be confirmed
    /// - [`ConflictError::StaleState`] if the order changed concurrently
    /// - [`BookingError::NotFound`] for unknown codes
    #[tracing::instrument(skip(self))]
    pub async fn confirm_external_payment(
        &self,
        order_code: &OrderCode,
        reference: &str,
    ) -> Result<PaymentConfirmation, BookingError> {
        let order = self.order(order_code).await?;

        if order.status == PaymentOrderStatus::Pending && order.is_past_expiry(self.clock.now()) {
            let result = self.sweeper.expire_order(order.id).await?;
            tracing::warn!(?result, "Payment arrived after the order lapsed");
            return Err(ConflictError::OrderExpired {
                code: order.code,
                expires_at: order.expires_at,
            }
            .into());
        }

        let mut order_state = Some(order);
        let order_outcome = PaymentOrderReducer::new().reduce(
            &mut order_state,
            PaymentOrderAction::MarkPaid {
                reference: reference.to_string(),
            },
            &self.order_env,
        )?;
        if !order_outcome.is_applied() {
            tracing::debug!("Order already paid");
            return Ok(PaymentConfirmation::AlreadyPaid);
        }
        let order = order_state.ok_or_else(|| unloaded(EntityKind::PaymentOrder))?;

        let booking = self.booking(order.booking_id).await?;
        let mut booking_state = Some(booking);
        let booking_effects = BookingReducer::new()
            .reduce(
                &mut booking_state,
                BookingAction::Confirm {
                    actor: Actor::PaymentGateway,
                },
                &self.booking_env,
            )?
            .into_effects();
        let booking = booking_state.ok_or_else(|| unloaded(EntityKind::Booking))?;

        let changes = ChangeSet::new()
            .update_order(order.clone(), PaymentOrderStatus::Pending)
            .update_booking(booking.clone());
        match self.store.commit(changes).await {
            Ok(()) => {},
            Err(StoreError::StaleWrite(detail)) => {
                tracing::warn!(%detail, "Payment raced another transition");
                return self.settled_elsewhere(order_code).await;
            },
            Err(e) => return Err(e.into()),
        }

        BookingMetrics::record_order("paid");
        tracing::info!(booking_code = %booking.code, amount = %order.amount, "Payment reconciled");

        self.effects.run(order_outcome.into_effects()).await;
        self.effects.run(booking_effects).await;
        Ok(PaymentConfirmation::Confirmed)
    }

    async fn settled_elsewhere(&self, order_code: &OrderCode) -> Result<PaymentConfirmation, BookingError> {
        let order = self.order(order_code).await?;
        match order.status {
            PaymentOrderStatus::Paid => Ok(PaymentConfirmation::AlreadyPaid),
            PaymentOrderStatus::Expired => Err(ConflictError::OrderExpired {
                code: order.code,
                expires_at: order.expires_at,
            }
            .into()),
            _ => Err(ConflictError::StaleState.into()),
        }
    }

    /// Ask the gateway whether an order has been paid and reconcile if so.
    ///
    /// Gateway outages, failed payments and amount mismatches all leave the
    /// order pending. An order past its deadline is expired, never paid.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for unknown codes, [`BookingError::System`]
    /// on store failures.
    #[tracing::instrument(skip(self))]
    pub async fn poll_payment(&self, order_code: &OrderCode) -> Result<PaymentProgress, BookingError> {
        let order = self.order(order_code).await?;
        match order.status {
            PaymentOrderStatus::Paid => return Ok(PaymentProgress::Paid),
            PaymentOrderStatus::Expired => return Ok(PaymentProgress::Expired),
            PaymentOrderStatus::Cancelled => return Ok(PaymentProgress::Cancelled),
            PaymentOrderStatus::Pending => {},
        }
        if order.is_past_expiry(self.clock.now()) {
            self.sweeper.expire_order(order.id).await?;
            return Ok(PaymentProgress::Expired);
        }

        let report = match self.gateway.check_status(&order.code).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "Gateway unavailable, payment still pending");
                return Ok(PaymentProgress::StillPending);
            },
        };

        match report.status {
            GatewayPaymentStatus::Pending => Ok(PaymentProgress::StillPending),
            GatewayPaymentStatus::Failed => {
                tracing::warn!("Gateway reports a failed payment");
                Ok(PaymentProgress::StillPending)
            },
            GatewayPaymentStatus::Paid if report.amount != Some(order.amount) => {
                let mismatch = ConflictError::AmountMismatch { code: order.code.clone() };
                tracing::warn!(expected = %order.amount, received = ?report.amount, "{mismatch}");
                Ok(PaymentProgress::StillPending)
            },
            GatewayPaymentStatus::Paid => {
                let reference = report.reference.unwrap_or_else(|| order.code.to_string());
                match self.confirm_external_payment(&order.code, &reference).await {
                    Ok(_) => Ok(PaymentProgress::Paid),
                    Err(BookingError::Conflict(ConflictError::OrderExpired { .. })) => Ok(PaymentProgress::Expired),
                    Err(e) => Err(e),
                }
            },
        }
    }

    /// Request a fresh QR URL for a Pending order.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Transition`] if the order is no longer Pending
    /// - [`ConflictError::OrderExpired`] if its deadline passed
    /// - [`BookingError::ExternalDependency`] if the gateway fails
    #[tracing::instrument(skip(self))]
    pub async fn payment_qr(&self, order_code: &OrderCode) -> Result<String, BookingError> {
        let order = self.order(order_code).await?;
        if order.status != PaymentOrderStatus::Pending {
            return Err(TransitionError::order(order.status, "show a QR code for").into());
        }
        if order.is_past_expiry(self.clock.now()) {
            return Err(ConflictError::OrderExpired {
                code: order.code,
                expires_at: order.expires_at,
            }
            .into());
        }
        Ok(self
            .gateway
            .create_qr_url(order.amount, order.code.as_str(), &order.code)
            .await?)
    }

    /// Open a payment order for an existing Pending booking.
    ///
    /// Repeated requests return the order that is already open instead of
    /// creating another one. A cash booking switches to `method`; a booking
    /// whose previous order lapsed (and was kept) gets a fresh order.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::Other`] if `method` is cash
    /// - [`BookingError::Transition`] unless the booking is Pending
    /// - [`ConflictError::PaymentCaptured`] once the booking has been paid
    /// - [`ConflictError::StaleState`] if the booking changed concurrently
    /// - [`BookingError::NotFound`] for unknown bookings
    #[tracing::instrument(skip(self))]
    pub async fn request_payment(
        &self,
        booking_id: BookingId,
        method: PaymentMethod,
    ) -> Result<PaymentCheckout, BookingError> {
        if !method.requires_prepayment() {
            return Err(ValidationError::Other(format!("{method} does not take prepayment")).into());
        }

        if let Some(open) = self.store.open_order_for_booking(booking_id).await? {
            if !open.is_past_expiry(self.clock.now()) {
                tracing::debug!(order_code = %open.code, "Reusing open payment order");
                return Ok(self.checkout(open).await);
            }
            self.sweeper.expire_order(open.id).await?;
        }

        let booking = self.booking(booking_id).await?;
        let mut booking_state = Some(booking);
        let awaiting = BookingReducer::new().reduce(
            &mut booking_state,
            BookingAction::AwaitPayment { method },
            &self.booking_env,
        )?;
        if !awaiting.is_applied() {
            tracing::debug!("Booking already awaiting payment");
        }
        let booking = booking_state.ok_or_else(|| unloaded(EntityKind::Booking))?;

        let mut attempt = 0;
        let (order, order_effects) = loop {
            attempt += 1;

            let open = PaymentOrderAction::Open {
                id: PaymentOrderId::new(),
                code: self.codes.order_code(),
                booking_id,
                amount: booking.total_price,
                method,
            };
            let mut order_state = None;
            let order_effects = PaymentOrderReducer::new()
                .reduce(&mut order_state, open, &self.order_env)?
                .into_effects();
            let order = order_state.ok_or_else(|| unloaded(EntityKind::PaymentOrder))?;

            // The booking row is written even when unchanged so its version
            // fences off staff transitions that read it before this order existed
            let changes = ChangeSet::new()
                .update_booking(booking.clone())
                .insert_order(order.clone());

            match self.store.commit(changes).await {
                Ok(()) => break (order, order_effects),
                Err(StoreError::Duplicate(detail)) => {
                    // Either another request opened the order first or the code collided
                    if let Some(open) = self.store.open_order_for_booking(booking_id).await? {
                        tracing::debug!(%detail, order_code = %open.code, "Order opened concurrently");
                        return Ok(self.checkout(open).await);
                    }
                    if attempt >= CODE_ATTEMPTS {
                        return Err(StoreError::Duplicate(detail).into());
                    }
                },
                Err(StoreError::StaleWrite(detail)) => {
                    if let Some(open) = self.store.open_order_for_booking(booking_id).await? {
                        tracing::debug!(%detail, order_code = %open.code, "Order opened concurrently");
                        return Ok(self.checkout(open).await);
                    }
                    tracing::warn!(%detail, "Booking changed while opening its payment order");
                    return Err(ConflictError::StaleState.into());
                },
                Err(e) => return Err(e.into()),
            }
        };

        BookingMetrics::record_order("opened");
        tracing::info!(booking_code = %booking.code, order_code = %order.code, "Payment order opened");

        let delayed = self.effects.run(order_effects).await;
        self.schedule_timers(&order, delayed);
        Ok(self.checkout(order).await)
    }

    /// Run one expiry sweep over overdue orders.
    ///
    /// # Errors
    ///
    /// [`BookingError::System`] if overdue orders cannot be listed.
    pub async fn expire_sweep(&self) -> Result<SweepReport, BookingError> {
        self.sweeper.sweep().await
    }

    fn schedule_timers(&self, order: &PaymentOrder, delayed: Vec<(Duration, PaymentOrderAction)>) {
        if self.schedule_expiry {
            delayed
                .into_iter()
                .filter(|(_, action)| *action == PaymentOrderAction::MarkExpired)
                .for_each(|(delay, _)| self.sweeper.schedule(order.id, delay));
        }
    }

    async fn checkout(&self, order: PaymentOrder) -> PaymentCheckout {
        let qr_url = self.qr_url(&order).await;
        PaymentCheckout {
            order_id: order.id,
            order_code: order.code,
            amount: order.amount,
            expires_at: order.expires_at,
            qr_url,
        }
    }

    async fn qr_url(&self, order: &PaymentOrder) -> Option<String> {
        match self
            .gateway
            .create_qr_url(order.amount, order.code.as_str(), &order.code)
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(order_code = %order.code, error = %e, "QR code unavailable, order stays valid");
                None
            },
        }
    }

    // ========================================================================
    // Staff and owner operations
    // ========================================================================

    /// Confirm a Pending booking by hand (staff only).
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`] for non-staff callers
    /// - [`ConflictError::PaymentInProgress`] while a payment order is open
    /// - [`BookingError::Transition`] unless the booking is Pending
    #[tracing::instrument(skip(self, identity))]
    pub async fn confirm_booking(
        &self,
        booking_id: BookingId,
        identity: &dyn IdentityContext,
    ) -> Result<Booking, BookingError> {
        let principal = require_staff(identity)?;
        let booking = self.booking(booking_id).await?;
        if self.store.open_order_for_booking(booking_id).await?.is_some() {
            return Err(ConflictError::PaymentInProgress { code: booking.code }.into());
        }
        self.drive_booking(
            booking,
            BookingAction::Confirm {
                actor: principal.actor(),
            },
        )
        .await
    }

    /// Cancel a booking (staff or its registered owner). An open payment
    /// order is cancelled in the same commit.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`] for anyone else
    /// - [`ConflictError::PaymentCaptured`] once the booking has been paid
    /// - [`BookingError::Transition`] for Cancelled or Completed bookings
    #[tracing::instrument(skip(self, identity))]
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        reason: String,
        identity: &dyn IdentityContext,
    ) -> Result<Booking, BookingError> {
        let booking = self.booking(booking_id).await?;
        let principal = require_staff_or_owner(identity, &booking)?;

        let latest = self.store.latest_order_for_booking(booking_id).await?;
        if latest.as_ref().is_some_and(|o| o.status == PaymentOrderStatus::Paid) {
            return Err(ConflictError::PaymentCaptured { code: booking.code }.into());
        }

        let mut booking_state = Some(booking);
        let booking_effects = BookingReducer::new()
            .reduce(
                &mut booking_state,
                BookingAction::Cancel {
                    actor: principal.actor(),
                    reason,
                },
                &self.booking_env,
            )?
            .into_effects();
        let mut booking = booking_state.ok_or_else(|| unloaded(EntityKind::Booking))?;
        let mut changes = ChangeSet::new().update_booking(booking.clone());

        let mut order_effects = Effects::new();
        if let Some(order) = latest.filter(|o| o.status == PaymentOrderStatus::Pending) {
            let mut order_state = Some(order);
            order_effects = PaymentOrderReducer::new()
                .reduce(&mut order_state, PaymentOrderAction::Cancel, &self.order_env)?
                .into_effects();
            let order = order_state.ok_or_else(|| unloaded(EntityKind::PaymentOrder))?;
            changes = changes.update_order(order, PaymentOrderStatus::Pending);
        }

        self.store.commit(changes).await?;
        booking.version += 1;
        if !order_effects.is_empty() {
            BookingMetrics::record_order("cancelled");
        }
        tracing::info!(booking_code = %booking.code, "Booking cancelled");

        self.effects.run(booking_effects).await;
        self.effects.run(order_effects).await;
        Ok(booking)
    }

    /// Mark a Confirmed booking Completed at checkout (staff only).
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`] for non-staff callers
    /// - [`BookingError::Transition`] unless the booking is Confirmed
    #[tracing::instrument(skip(self, identity))]
    pub async fn complete_booking(
        &self,
        booking_id: BookingId,
        identity: &dyn IdentityContext,
    ) -> Result<Booking, BookingError> {
        require_staff(identity)?;
        let booking = self.booking(booking_id).await?;
        self.drive_booking(booking, BookingAction::Complete).await
    }

    /// Move a booking to another time on the same day (staff or owner).
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`] for anyone else
    /// - [`ConflictError::PaymentInProgress`] while a payment order is open
    /// - [`ConflictError::SlotTaken`] if the new time overlaps another booking
    /// - [`ConflictError::PriceChanged`] if a paid booking's price would change
    /// - [`BookingError::Validation`] for invalid times or other days
    #[tracing::instrument(skip(self, identity))]
    pub async fn reschedule(
        &self,
        booking_id: BookingId,
        start: NaiveTime,
        end: NaiveTime,
        identity: &dyn IdentityContext,
    ) -> Result<Booking, BookingError> {
        let booking = self.booking(booking_id).await?;
        require_staff_or_owner(identity, &booking)?;

        let slot = Slot::new(booking.slot.date, start, end);
        self.booking_env.validate_slot(&slot)?;
        let resource = self.resource(booking.resource_id).await?;
        let total_price = self.price(&resource, &slot).await?.total;

        let _guard = self.lock(resource.id, slot.date).await?;
        let booking = self.booking(booking_id).await?;
        if self.store.open_order_for_booking(booking_id).await?.is_some() {
            return Err(ConflictError::PaymentInProgress { code: booking.code }.into());
        }
        let existing = self.store.active_bookings_on(resource.id, slot.date).await?;
        let availability = AvailabilityChecker::check(&resource, &slot, &existing, Some(booking_id));

        self.drive_booking(
            booking,
            BookingAction::Reschedule {
                slot,
                total_price,
                availability,
            },
        )
        .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Run one booking transition and commit it guarded on the version read
    async fn drive_booking(&self, booking: Booking, action: BookingAction) -> Result<Booking, BookingError> {
        let mut state = Some(booking);
        let outcome = BookingReducer::new().reduce(&mut state, action, &self.booking_env)?;
        let mut booking = state.ok_or_else(|| unloaded(EntityKind::Booking))?;
        if !outcome.is_applied() {
            tracing::debug!(booking_code = %booking.code, "Nothing to change");
            return Ok(booking);
        }

        self.store
            .commit(ChangeSet::new().update_booking(booking.clone()))
            .await
            .map_err(|e| store_failure(e, booking.resource_id, &booking.slot))?;
        booking.version += 1;
        tracing::info!(booking_code = %booking.code, status = %booking.status, "Booking updated");

        self.effects.run(outcome.into_effects()).await;
        Ok(booking)
    }

    async fn lock(&self, resource_id: ResourceId, date: NaiveDate) -> Result<SlotGuard, BookingError> {
        self.locks
            .acquire((resource_id, date), self.booking_config.lock_timeout())
            .await
            .map_err(|_| ConflictError::SlotBusy.into())
    }

    async fn resource(&self, id: ResourceId) -> Result<Resource, BookingError> {
        self.catalog
            .resource(id)
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::Resource, id))
    }

    async fn price(&self, resource: &Resource, slot: &Slot) -> Result<Quote, BookingError> {
        let resource_type = self
            .catalog
            .resource_type(resource.resource_type_id)
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::ResourceType, resource.resource_type_id))?;
        let rules = self.catalog.pricing_rules(resource_type.id).await?;
        let quote = PricingEngine::quote(&resource_type, &rules, slot.date, slot.start, slot.end)?;
        if quote.used_fallback() {
            tracing::debug!(resource_type = %resource_type.name, "Priced partly at the base rate");
        }
        Ok(quote)
    }

    async fn booking(&self, id: BookingId) -> Result<Booking, BookingError> {
        self.store
            .booking(id)
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::Booking, id))
    }

    async fn order(&self, code: &OrderCode) -> Result<PaymentOrder, BookingError> {
        self.store
            .order_by_code(code)
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::PaymentOrder, code))
    }
}
