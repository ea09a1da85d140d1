//! In-memory `BookingStore`.
//!
//! Enforces the same commit contract as the PostgreSQL store (overlap
//! rejection, versioned booking updates, expected-status order updates, unique
//! codes, one pending order per booking) so coordinator tests exercise the
//! real guarantees. A one-shot stall on order lookups lets tests pin down the
//! interleaving of two racing operations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fieldbook_core::store::{BookingStore, ChangeSet, StoreError};
use fieldbook_core::types::{
    Booking, BookingCode, BookingId, OrderCode, PaymentOrder, PaymentOrderId, PaymentOrderStatus,
    ResourceId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Tables {
    bookings: HashMap<BookingId, Booking>,
    orders: HashMap<PaymentOrderId, PaymentOrder>,
}

/// In-memory store with failure injection
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    tables: Mutex<Tables>,
    fail_next_commit: AtomicBool,
    fail_reads: AtomicBool,
    stall_order_lookup: Mutex<Option<Duration>>,
    commits: AtomicUsize,
}

impl InMemoryBookingStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail with a backend error
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make every read fail until switched off
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay the result of the next open or latest order lookup by `by`.
    ///
    /// The lookup reads first and then pauses, so the calling operation
    /// carries a snapshot that another operation can overtake before the
    /// caller commits.
    pub fn stall_next_order_lookup(&self, by: Duration) {
        *self
            .stall_order_lookup
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(by);
    }

    async fn maybe_stall(&self) {
        let stall = self
            .stall_order_lookup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(by) = stall {
            tokio::time::sleep(by).await;
        }
    }

    /// Number of successful commits
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Every stored booking
    #[must_use]
    pub fn all_bookings(&self) -> Vec<Booking> {
        self.tables().bookings.values().cloned().collect()
    }

    /// Every stored payment order
    #[must_use]
    pub fn all_orders(&self) -> Vec<PaymentOrder> {
        self.tables().orders.values().cloned().collect()
    }

    /// Insert a booking directly, bypassing checks (fixtures)
    pub fn seed_booking(&self, booking: Booking) {
        self.tables().bookings.insert(booking.id, booking);
    }

    /// Insert a payment order directly, bypassing checks (fixtures)
    pub fn seed_order(&self, order: PaymentOrder) {
        self.tables().orders.insert(order.id, order);
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_guard(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected read failure".to_string()));
        }
        Ok(self.tables())
    }
}

fn check(tables: &Tables, changes: &ChangeSet) -> Result<(), StoreError> {
    for booking in &changes.new_bookings {
        if tables.bookings.contains_key(&booking.id) {
            return Err(StoreError::Duplicate(format!("booking id {}", booking.id)));
        }
        if tables.bookings.values().any(|b| b.code == booking.code) {
            return Err(StoreError::Duplicate(format!("booking code {}", booking.code)));
        }
    }

    for update in &changes.booking_updates {
        match tables.bookings.get(&update.booking.id) {
            Some(current) if current.version == update.expected_version => {},
            Some(current) => {
                return Err(StoreError::StaleWrite(format!(
                    "booking {} is at version {}, expected {}",
                    current.code, current.version, update.expected_version
                )));
            },
            None => return Err(StoreError::StaleWrite(format!("booking {} missing", update.booking.id))),
        }
    }

    for update in &changes.order_updates {
        match tables.orders.get(&update.order.id) {
            Some(current) if current.status == update.expected => {},
            Some(current) => {
                return Err(StoreError::StaleWrite(format!(
                    "order {} is {}, expected {}",
                    current.code, current.status, update.expected
                )));
            },
            None => return Err(StoreError::StaleWrite(format!("order {} missing", update.order.id))),
        }
    }

    for order in &changes.new_orders {
        if tables.orders.contains_key(&order.id) || tables.orders.values().any(|o| o.code == order.code) {
            return Err(StoreError::Duplicate(format!("order code {}", order.code)));
        }
        if order.status == PaymentOrderStatus::Pending {
            let still_pending = tables.orders.values().any(|o| {
                o.booking_id == order.booking_id
                    && o.status == PaymentOrderStatus::Pending
                    && !changes
                        .order_updates
                        .iter()
                        .any(|u| u.order.id == o.id && u.order.status != PaymentOrderStatus::Pending)
            });
            if still_pending {
                return Err(StoreError::Duplicate(format!(
                    "booking {} already has a pending order",
                    order.booking_id
                )));
            }
        }
    }

    let touched = changes.touched_booking_ids();
    let holders: Vec<&Booking> = changes.slot_holders().collect();
    for (i, candidate) in holders.iter().enumerate() {
        let stored_clash = tables.bookings.values().find(|b| {
            !touched.contains(&b.id)
                && b.holds_slot()
                && b.resource_id == candidate.resource_id
                && b.slot.overlaps(&candidate.slot)
        });
        let batch_clash = holders[i + 1..]
            .iter()
            .find(|b| b.resource_id == candidate.resource_id && b.slot.overlaps(&candidate.slot));
        if let Some(existing) = stored_clash.or(batch_clash.copied()) {
            return Err(StoreError::SlotTaken {
                conflicting: existing.code.clone(),
            });
        }
    }

    Ok(())
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.read_guard()?.bookings.get(&id).cloned())
    }

    async fn booking_by_code(&self, code: &BookingCode) -> Result<Option<Booking>, StoreError> {
        Ok(self
            .read_guard()?
            .bookings
            .values()
            .find(|b| &b.code == code)
            .cloned())
    }

    async fn active_bookings_on(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StoreError> {
        let mut found: Vec<Booking> = self
            .read_guard()?
            .bookings
            .values()
            .filter(|b| b.resource_id == resource_id && b.slot.date == date && b.holds_slot())
            .cloned()
            .collect();
        found.sort_by_key(|b| b.slot.start);
        Ok(found)
    }

    async fn payment_order(&self, id: PaymentOrderId) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self.read_guard()?.orders.get(&id).cloned())
    }

    async fn order_by_code(&self, code: &OrderCode) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self
            .read_guard()?
            .orders
            .values()
            .find(|o| &o.code == code)
            .cloned())
    }

    async fn open_order_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        let found = self
            .read_guard()?
            .orders
            .values()
            .find(|o| o.booking_id == booking_id && o.status == PaymentOrderStatus::Pending)
            .cloned();
        self.maybe_stall().await;
        Ok(found)
    }

    async fn latest_order_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        let found = self
            .read_guard()?
            .orders
            .values()
            .filter(|o| o.booking_id == booking_id)
            .max_by_key(|o| o.created_at)
            .cloned();
        self.maybe_stall().await;
        Ok(found)
    }

    async fn pending_orders_expired_at(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        let mut due: Vec<PaymentOrder> = self
            .read_guard()?
            .orders
            .values()
            .filter(|o| o.status == PaymentOrderStatus::Pending && o.expires_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|o| o.expires_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected commit failure".to_string()));
        }

        let mut tables = self.tables();
        check(&tables, &changes)?;

        for booking in changes.new_bookings {
            tables.bookings.insert(booking.id, booking);
        }
        for update in changes.booking_updates {
            tables.bookings.insert(update.booking.id, update.booking);
        }
        for order in changes.new_orders {
            tables.orders.insert(order.id, order);
        }
        for update in changes.order_updates {
            tables.orders.insert(update.order.id, update.order);
        }
        drop(tables);

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
