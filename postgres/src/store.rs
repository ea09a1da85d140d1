//! `PostgreSQL` implementation of [`BookingStore`].

use crate::rows::{self, BOOKING_COLUMNS, ORDER_COLUMNS, backend, minor, version};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fieldbook_core::store::{BookingStore, BookingUpdate, ChangeSet, OrderUpdate, StoreError};
use fieldbook_core::types::{
    Booking, BookingCode, BookingId, BookingStatus, OrderCode, PaymentOrder, PaymentOrderId,
    PaymentOrderStatus, ResourceId,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

/// Partial unique index on the slot of active bookings
const SLOT_INDEX: &str = "uq_bookings_active_slot";

/// SQLSTATE `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";

/// Booking store backed by `PostgreSQL`.
///
/// Each [`ChangeSet`] is applied in a single transaction that first takes a
/// transaction-scoped advisory lock per affected `(resource, date)`, so
/// overlap checks and writes for the same schedule never interleave across
/// processes.
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small default pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database is unreachable.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Create the catalog and booking tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))
    }

    /// The underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_booking(&self, filter: &str, value: Uuid) -> Result<Option<Booking>, StoreError> {
        let query = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE {filter} = $1");
        sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(rows::booking)
            .transpose()
    }

    async fn fetch_order(&self, query: &str, value: Uuid) -> Result<Option<PaymentOrder>, StoreError> {
        sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(rows::payment_order)
            .transpose()
    }

    async fn apply(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Keys come sorted, so concurrent commits lock in the same order.
        for (resource_id, date) in changes.schedule_keys() {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), $2::date - DATE '2000-01-01')")
                .bind(resource_id.to_string())
                .bind(date)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        check_overlaps(&mut tx, changes).await?;

        // Updates before inserts: a freed slot or a cancelled order may be
        // what makes room for the new row.
        for update in &changes.booking_updates {
            update_booking(&mut tx, update).await?;
        }
        for booking in &changes.new_bookings {
            insert_booking(&mut tx, booking).await?;
        }
        for update in &changes.order_updates {
            update_order(&mut tx, update).await?;
        }
        for order in &changes.new_orders {
            insert_order(&mut tx, order).await?;
        }

        tx.commit().await.map_err(backend)
    }

    /// Resolve a slot index violation into the booking that holds the slot
    async fn slot_conflict(&self, changes: &ChangeSet) -> StoreError {
        let touched: Vec<Uuid> = changes
            .touched_booking_ids()
            .iter()
            .map(|id| *id.as_uuid())
            .collect();
        for booking in changes.slot_holders() {
            let holder: Result<Option<String>, _> = sqlx::query_scalar(
                r"
                SELECT code FROM bookings
                WHERE resource_id = $1 AND booking_date = $2
                  AND start_time = $3 AND end_time = $4
                  AND status IN ('pending', 'confirmed')
                  AND id <> ALL($5)
                LIMIT 1
                ",
            )
            .bind(booking.resource_id.as_uuid())
            .bind(booking.slot.date)
            .bind(booking.slot.start)
            .bind(booking.slot.end)
            .bind(&touched)
            .fetch_optional(&self.pool)
            .await;
            match holder {
                Ok(Some(code)) => {
                    return StoreError::SlotTaken {
                        conflicting: BookingCode::new(code),
                    };
                },
                Ok(None) => {},
                Err(e) => return backend(e),
            }
        }
        StoreError::Duplicate(SLOT_INDEX.to_string())
    }
}

/// Reject slot holders that overlap each other or a stored active booking
async fn check_overlaps(conn: &mut PgConnection, changes: &ChangeSet) -> Result<(), StoreError> {
    let holders: Vec<&Booking> = changes.slot_holders().collect();
    for (i, a) in holders.iter().enumerate() {
        if let Some(b) = holders[i + 1..]
            .iter()
            .find(|b| b.resource_id == a.resource_id && b.slot.overlaps(&a.slot))
        {
            return Err(StoreError::SlotTaken {
                conflicting: b.code.clone(),
            });
        }
    }

    let touched: Vec<Uuid> = changes
        .touched_booking_ids()
        .iter()
        .map(|id| *id.as_uuid())
        .collect();

    for booking in holders {
        let conflicting: Option<String> = sqlx::query_scalar(
            r"
            SELECT code FROM bookings
            WHERE resource_id = $1 AND booking_date = $2
              AND status IN ('pending', 'confirmed')
              AND start_time < $4 AND $3 < end_time
              AND id <> ALL($5)
            ORDER BY start_time
            LIMIT 1
            ",
        )
        .bind(booking.resource_id.as_uuid())
        .bind(booking.slot.date)
        .bind(booking.slot.start)
        .bind(booking.slot.end)
        .bind(&touched)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;

        if let Some(code) = conflicting {
            return Err(StoreError::SlotTaken {
                conflicting: BookingCode::new(code),
            });
        }
    }
    Ok(())
}

fn write_failure(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::Duplicate(db.constraint().unwrap_or("unique index").to_string());
        }
    }
    backend(err)
}

async fn insert_booking(conn: &mut PgConnection, booking: &Booking) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO bookings (
            id, code, resource_id, owner, booking_date, start_time, end_time, status,
            total_price, payment_status, payment_method, note, created_at,
            confirmed_by, confirmed_at, cancelled_by, cancelled_at, cancel_reason, completed_at,
            version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
        ",
    )
    .bind(booking.id.as_uuid())
    .bind(booking.code.as_str())
    .bind(booking.resource_id.as_uuid())
    .bind(Json(&booking.owner))
    .bind(booking.slot.date)
    .bind(booking.slot.start)
    .bind(booking.slot.end)
    .bind(booking.status.as_str())
    .bind(minor(booking.total_price)?)
    .bind(booking.payment_status.as_str())
    .bind(booking.payment_method.as_str())
    .bind(booking.note.as_deref())
    .bind(booking.created_at)
    .bind(booking.confirmed_by.as_ref().map(Json))
    .bind(booking.confirmed_at)
    .bind(booking.cancelled_by.as_ref().map(Json))
    .bind(booking.cancelled_at)
    .bind(booking.cancel_reason.as_deref())
    .bind(booking.completed_at)
    .bind(version(booking.version)?)
    .execute(&mut *conn)
    .await
    .map_err(write_failure)?;
    Ok(())
}

async fn update_booking(conn: &mut PgConnection, update: &BookingUpdate) -> Result<(), StoreError> {
    let booking = &update.booking;
    let result = sqlx::query(
        r"
        UPDATE bookings SET
            booking_date = $3, start_time = $4, end_time = $5, status = $6,
            total_price = $7, payment_status = $8, payment_method = $9, note = $10,
            confirmed_by = $11, confirmed_at = $12, cancelled_by = $13, cancelled_at = $14,
            cancel_reason = $15, completed_at = $16, version = $17
        WHERE id = $1 AND version = $2
        ",
    )
    .bind(booking.id.as_uuid())
    .bind(version(update.expected_version)?)
    .bind(booking.slot.date)
    .bind(booking.slot.start)
    .bind(booking.slot.end)
    .bind(booking.status.as_str())
    .bind(minor(booking.total_price)?)
    .bind(booking.payment_status.as_str())
    .bind(booking.payment_method.as_str())
    .bind(booking.note.as_deref())
    .bind(booking.confirmed_by.as_ref().map(Json))
    .bind(booking.confirmed_at)
    .bind(booking.cancelled_by.as_ref().map(Json))
    .bind(booking.cancelled_at)
    .bind(booking.cancel_reason.as_deref())
    .bind(booking.completed_at)
    .bind(version(booking.version)?)
    .execute(&mut *conn)
    .await
    .map_err(write_failure)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::StaleWrite(format!(
            "booking {} changed since version {}",
            booking.code, update.expected_version
        )));
    }
    Ok(())
}

async fn insert_order(conn: &mut PgConnection, order: &PaymentOrder) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO payment_orders (
            id, code, booking_id, amount, status, method, created_at, expires_at,
            paid_at, external_reference
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ",
    )
    .bind(order.id.as_uuid())
    .bind(order.code.as_str())
    .bind(order.booking_id.as_uuid())
    .bind(minor(order.amount)?)
    .bind(order.status.as_str())
    .bind(order.method.as_str())
    .bind(order.created_at)
    .bind(order.expires_at)
    .bind(order.paid_at)
    .bind(order.external_reference.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(write_failure)?;
    Ok(())
}

async fn update_order(conn: &mut PgConnection, update: &OrderUpdate) -> Result<(), StoreError> {
    let order = &update.order;
    let result = sqlx::query(
        r"
        UPDATE payment_orders SET
            status = $3, expires_at = $4, paid_at = $5, external_reference = $6
        WHERE id = $1 AND status = $2
        ",
    )
    .bind(order.id.as_uuid())
    .bind(update.expected.as_str())
    .bind(order.status.as_str())
    .bind(order.expires_at)
    .bind(order.paid_at)
    .bind(order.external_reference.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(write_failure)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::StaleWrite(format!(
            "payment order {} is no longer {}",
            order.code, update.expected
        )));
    }
    Ok(())
}

#[async_trait]
impl BookingStore for PostgresBookingStore {
    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.fetch_booking("id", *id.as_uuid()).await
    }

    async fn booking_by_code(&self, code: &BookingCode) -> Result<Option<Booking>, StoreError> {
        let query = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE code = $1");
        sqlx::query(&query)
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(rows::booking)
            .transpose()
    }

    async fn active_bookings_on(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StoreError> {
        let query = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE resource_id = $1 AND booking_date = $2
               AND status IN ('{}', '{}')
             ORDER BY start_time",
            BookingStatus::Pending.as_str(),
            BookingStatus::Confirmed.as_str(),
        );
        sqlx::query(&query)
            .bind(resource_id.as_uuid())
            .bind(date)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .iter()
            .map(rows::booking)
            .collect()
    }

    async fn payment_order(&self, id: PaymentOrderId) -> Result<Option<PaymentOrder>, StoreError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM payment_orders WHERE id = $1");
        self.fetch_order(&query, *id.as_uuid()).await
    }

    async fn order_by_code(&self, code: &OrderCode) -> Result<Option<PaymentOrder>, StoreError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM payment_orders WHERE code = $1");
        sqlx::query(&query)
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(rows::payment_order)
            .transpose()
    }

    async fn open_order_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM payment_orders WHERE booking_id = $1 AND status = '{}'",
            PaymentOrderStatus::Pending.as_str()
        );
        self.fetch_order(&query, *booking_id.as_uuid()).await
    }

    async fn latest_order_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM payment_orders WHERE booking_id = $1
             ORDER BY created_at DESC LIMIT 1"
        );
        self.fetch_order(&query, *booking_id.as_uuid()).await
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn pending_orders_expired_at(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM payment_orders
             WHERE status = '{}' AND expires_at <= $1
             ORDER BY expires_at
             LIMIT $2",
            PaymentOrderStatus::Pending.as_str()
        );
        sqlx::query(&query)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .iter()
            .map(rows::payment_order)
            .collect()
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let result = match self.apply(&changes).await {
            Err(StoreError::Duplicate(constraint)) if constraint == SLOT_INDEX => {
                Err(self.slot_conflict(&changes).await)
            },
            other => other,
        };

        let outcome = match &result {
            Ok(()) => "committed",
            Err(StoreError::SlotTaken { .. }) => "slot_taken",
            Err(StoreError::StaleWrite(_)) => "stale_write",
            Err(StoreError::Duplicate(_)) => "duplicate",
            Err(StoreError::Backend(_)) => "error",
        };
        metrics::counter!("fieldbook_store_commits_total", "outcome" => outcome).increment(1);

        match &result {
            Ok(()) => tracing::debug!(
                bookings = changes.new_bookings.len() + changes.booking_updates.len(),
                orders = changes.new_orders.len() + changes.order_updates.len(),
                "Changeset committed"
            ),
            Err(StoreError::Backend(e)) => tracing::error!(error = %e, "Changeset commit failed"),
            Err(e) => tracing::debug!(error = %e, "Changeset rejected"),
        }
        result
    }
}
