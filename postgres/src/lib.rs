//! `PostgreSQL` persistence for Fieldbook.
//!
//! - [`PostgresBookingStore`]: bookings and payment orders, implementing
//!   [`BookingStore`](fieldbook_core::store::BookingStore) with atomic,
//!   status-guarded changesets
//! - [`PostgresCatalog`]: read-only resources, resource types and pricing rules
//!
//! Queries are built at runtime with `sqlx::query`, so no database is needed
//! at compile time. Migrations are embedded and applied by
//! [`PostgresBookingStore::migrate`].
//!
//! # Example
//!
//! ```ignore
//! use fieldbook_postgres::{PostgresBookingStore, PostgresCatalog};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresBookingStore::connect("postgres://localhost/fieldbook").await?;
//!     store.migrate().await?;
//!     let catalog = PostgresCatalog::new(store.pool().clone());
//!     Ok(())
//! }
//! ```

mod catalog;
mod rows;
mod store;

pub use catalog::PostgresCatalog;
pub use store::PostgresBookingStore;
