//! Persistence contract for bookings and payment orders.
//!
//! Every state change goes through [`BookingStore::commit`], which applies a
//! [`ChangeSet`] atomically. Implementations must:
//!
//! - reject a changeset in which a slot-holding booking overlaps another
//!   slot-holding booking on the same resource ([`StoreError::SlotTaken`]);
//! - apply a booking update only if the row still has the version it was read
//!   at, and a payment order update only if the row still has the expected
//!   prior status ([`StoreError::StaleWrite`]), so that racing transitions
//!   (payment vs. expiry, staff confirm vs. a new payment order) cannot both
//!   win;
//! - reject duplicate codes ([`StoreError::Duplicate`]).
//!
//! A failed commit changes nothing.

use crate::types::{
    Booking, BookingCode, BookingId, OrderCode, PaymentOrder, PaymentOrderId,
    PaymentOrderStatus, ResourceId,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Errors from store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A slot-holding booking already overlaps
    #[error("slot already taken by booking {conflicting}")]
    SlotTaken {
        /// Code of the overlapping booking
        conflicting: BookingCode,
    },

    /// A row no longer has the expected status
    #[error("stale write: {0}")]
    StaleWrite(String),

    /// Unique constraint violation (codes, one pending order per booking)
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Backend failure (connection, serialization)
    #[error("store backend error: {0}")]
    Backend(String),
}

/// A booking row update guarded by the version it was read at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingUpdate {
    /// New row contents, already carrying the next version
    pub booking: Booking,
    /// Version the stored row must currently have
    pub expected_version: u64,
}

/// A payment order row update guarded by its expected prior status
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderUpdate {
    /// New row contents
    pub order: PaymentOrder,
    /// Status the stored row must currently have
    pub expected: PaymentOrderStatus,
}

/// All writes of one logical operation, applied atomically
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Bookings to insert
    pub new_bookings: Vec<Booking>,
    /// Bookings to update
    pub booking_updates: Vec<BookingUpdate>,
    /// Payment orders to insert
    pub new_orders: Vec<PaymentOrder>,
    /// Payment orders to update
    pub order_updates: Vec<OrderUpdate>,
}

impl ChangeSet {
    /// Empty changeset
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a booking insert
    #[must_use]
    pub fn insert_booking(mut self, booking: Booking) -> Self {
        self.new_bookings.push(booking);
        self
    }

    /// Queue a booking update.
    ///
    /// `booking.version` must be the version the row was read at; the queued
    /// row carries the next one.
    #[must_use]
    pub fn update_booking(mut self, mut booking: Booking) -> Self {
        let expected_version = booking.version;
        booking.version = expected_version + 1;
        self.booking_updates.push(BookingUpdate {
            booking,
            expected_version,
        });
        self
    }

    /// Queue a payment order insert
    #[must_use]
    pub fn insert_order(mut self, order: PaymentOrder) -> Self {
        self.new_orders.push(order);
        self
    }

    /// Queue a payment order update
    #[must_use]
    pub fn update_order(mut self, order: PaymentOrder, expected: PaymentOrderStatus) -> Self {
        self.order_updates.push(OrderUpdate { order, expected });
        self
    }

    /// Nothing to write
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_bookings.is_empty()
            && self.booking_updates.is_empty()
            && self.new_orders.is_empty()
            && self.order_updates.is_empty()
    }

    /// Bookings in this changeset that will hold a slot once committed.
    ///
    /// These are the rows the store must check for overlaps.
    pub fn slot_holders(&self) -> impl Iterator<Item = &Booking> {
        self.new_bookings
            .iter()
            .chain(self.booking_updates.iter().map(|u| &u.booking))
            .filter(|b| b.holds_slot())
    }

    /// IDs of every booking touched by this changeset
    #[must_use]
    pub fn touched_booking_ids(&self) -> Vec<BookingId> {
        self.new_bookings
            .iter()
            .map(|b| b.id)
            .chain(self.booking_updates.iter().map(|u| u.booking.id))
            .collect()
    }

    /// Distinct `(resource, date)` keys whose schedule this changeset affects
    #[must_use]
    pub fn schedule_keys(&self) -> Vec<(ResourceId, NaiveDate)> {
        let mut keys: Vec<_> = self
            .slot_holders()
            .map(|b| (b.resource_id, b.slot.date))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Persistence for the engine's two mutable entities
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Load a booking by ID
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Load a booking by code
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn booking_by_code(&self, code: &BookingCode) -> Result<Option<Booking>, StoreError>;

    /// Pending and Confirmed bookings of a resource on a date
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn active_bookings_on(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Load a payment order by ID
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn payment_order(&self, id: PaymentOrderId) -> Result<Option<PaymentOrder>, StoreError>;

    /// Load a payment order by code
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn order_by_code(&self, code: &OrderCode) -> Result<Option<PaymentOrder>, StoreError>;

    /// The booking's Pending payment order, if one exists
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn open_order_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<PaymentOrder>, StoreError>;

    /// Most recent payment order of a booking
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn latest_order_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<PaymentOrder>, StoreError>;

    /// Pending orders with `expires_at <= now`, oldest first
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn pending_orders_expired_at(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError>;

    /// Apply a changeset atomically
    ///
    /// # Errors
    ///
    /// - [`StoreError::SlotTaken`] if a slot-holding booking would overlap
    /// - [`StoreError::StaleWrite`] if an update's expected status no longer matches
    /// - [`StoreError::Duplicate`] on unique-constraint violations
    /// - [`StoreError::Backend`] on backend failure
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}
