//! Row mapping between `PostgreSQL` and domain types.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use fieldbook_core::store::StoreError;
use fieldbook_core::types::{
    Actor, Booking, BookingCode, BookingId, BookingOwner, Money, Multiplier, OperatingHours,
    OrderCode, PaymentOrder, PaymentOrderId, PricingRule, PricingRuleId, Resource, ResourceId,
    ResourceType, ResourceTypeId, Slot,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, Row};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Columns selected for a booking, in table order.
pub(crate) const BOOKING_COLUMNS: &str = "id, code, resource_id, owner, booking_date, start_time, \
     end_time, status, total_price, payment_status, payment_method, note, created_at, \
     confirmed_by, confirmed_at, cancelled_by, cancelled_at, cancel_reason, completed_at, version";

/// Columns selected for a payment order, in table order.
pub(crate) const ORDER_COLUMNS: &str = "id, code, booking_id, amount, status, method, \
     created_at, expires_at, paid_at, external_reference";

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub(crate) fn backend(err: impl Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Backend(format!("column '{name}': {e}")))
}

fn parsed<T>(row: &PgRow, name: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = String>,
{
    col::<String>(row, name)?.parse().map_err(StoreError::Backend)
}

fn money(row: &PgRow, name: &str) -> Result<Money, StoreError> {
    let raw: i64 = col(row, name)?;
    u64::try_from(raw)
        .map(Money::from_minor)
        .map_err(|_| StoreError::Backend(format!("column '{name}': negative amount {raw}")))
}

/// Row version as a `BIGINT` bind value
pub(crate) fn version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Backend(format!("version {version} exceeds BIGINT")))
}

/// Money as a `BIGINT` bind value
pub(crate) fn minor(amount: Money) -> Result<i64, StoreError> {
    i64::try_from(amount.minor())
        .map_err(|_| StoreError::Backend(format!("amount {amount} exceeds BIGINT")))
}

pub(crate) fn booking(row: &PgRow) -> Result<Booking, StoreError> {
    let date: NaiveDate = col(row, "booking_date")?;
    let start: NaiveTime = col(row, "start_time")?;
    let end: NaiveTime = col(row, "end_time")?;

    Ok(Booking {
        id: BookingId::from_uuid(col(row, "id")?),
        code: BookingCode::new(col::<String>(row, "code")?),
        resource_id: ResourceId::from_uuid(col(row, "resource_id")?),
        owner: col::<Json<BookingOwner>>(row, "owner")?.0,
        slot: Slot::new(date, start, end),
        status: parsed(row, "status")?,
        total_price: money(row, "total_price")?,
        payment_status: parsed(row, "payment_status")?,
        payment_method: parsed(row, "payment_method")?,
        note: col(row, "note")?,
        created_at: col(row, "created_at")?,
        confirmed_by: col::<Option<Json<Actor>>>(row, "confirmed_by")?.map(|j| j.0),
        confirmed_at: col(row, "confirmed_at")?,
        cancelled_by: col::<Option<Json<Actor>>>(row, "cancelled_by")?.map(|j| j.0),
        cancelled_at: col(row, "cancelled_at")?,
        cancel_reason: col(row, "cancel_reason")?,
        completed_at: col(row, "completed_at")?,
        version: u64::try_from(col::<i64>(row, "version")?)
            .map_err(|_| StoreError::Backend("negative booking version".to_string()))?,
    })
}

pub(crate) fn payment_order(row: &PgRow) -> Result<PaymentOrder, StoreError> {
    Ok(PaymentOrder {
        id: PaymentOrderId::from_uuid(col(row, "id")?),
        code: OrderCode::new(col::<String>(row, "code")?),
        booking_id: BookingId::from_uuid(col(row, "booking_id")?),
        amount: money(row, "amount")?,
        status: parsed(row, "status")?,
        method: parsed(row, "method")?,
        created_at: col::<DateTime<Utc>>(row, "created_at")?,
        expires_at: col(row, "expires_at")?,
        paid_at: col(row, "paid_at")?,
        external_reference: col(row, "external_reference")?,
    })
}

pub(crate) fn resource(row: &PgRow) -> Result<Resource, StoreError> {
    Ok(Resource {
        id: ResourceId::from_uuid(col(row, "id")?),
        resource_type_id: ResourceTypeId::from_uuid(col(row, "resource_type_id")?),
        name: col(row, "name")?,
        hours: OperatingHours::new(col(row, "open_time")?, col(row, "close_time")?),
        status: parsed(row, "status")?,
    })
}

pub(crate) fn resource_type(row: &PgRow) -> Result<ResourceType, StoreError> {
    Ok(ResourceType {
        id: ResourceTypeId::from_uuid(col(row, "id")?),
        name: col(row, "name")?,
        base_price_per_hour: money(row, "base_price_per_hour")?,
    })
}

pub(crate) fn pricing_rule(row: &PgRow) -> Result<PricingRule, StoreError> {
    let day: i16 = col(row, "day_of_week")?;
    let day_of_week = usize::try_from(day)
        .ok()
        .and_then(|d| WEEK.get(d).copied())
        .ok_or_else(|| StoreError::Backend(format!("day_of_week out of range: {day}")))?;
    let bp: i32 = col(row, "peak_multiplier_bp")?;
    let peak_multiplier = u32::try_from(bp)
        .map(Multiplier::from_basis_points)
        .map_err(|_| StoreError::Backend(format!("negative peak multiplier: {bp}")))?;

    Ok(PricingRule {
        id: PricingRuleId::from_uuid(col::<Uuid>(row, "id")?),
        resource_type_id: ResourceTypeId::from_uuid(col(row, "resource_type_id")?),
        day_of_week,
        start: col(row, "start_time")?,
        end: col(row, "end_time")?,
        price_per_hour: money(row, "price_per_hour")?,
        peak: col(row, "peak")?,
        peak_multiplier,
        effective_from: col(row, "effective_from")?,
        effective_to: col(row, "effective_to")?,
    })
}
