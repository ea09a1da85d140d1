//! # Fieldbook
//!
//! Slot reservation and payment reconciliation for sports venues.
//!
//! Customers reserve a time slot on a resource (a field, a court) and, for
//! prepaid methods, pay through an external gateway within a fixed window.
//! The engine guarantees that no two active bookings of a resource overlap,
//! prices slots from day and time scoped rules, and reconciles time-boxed
//! external payments with their bookings.
//!
//! # Architecture
//!
//! ```text
//!                  ┌────────────────────────┐
//!   request ─────▶ │ ReservationCoordinator │ ◀──── gateway callback / poll
//!                  └───────────┬────────────┘
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!  ┌───────────────┐  ┌────────────────┐  ┌─────────────────┐
//!  │ Availability  │  │ PricingEngine  │  │  ExpirySweeper  │
//!  │   Checker     │  └────────────────┘  └────────┬────────┘
//!  └───────────────┘                               │
//!          ┌───────────────────┬───────────────────┘
//!          ▼                   ▼
//!  ┌───────────────┐  ┌────────────────────┐
//!  │ BookingReducer│  │ PaymentOrderReducer│   pure state machines
//!  └───────┬───────┘  └─────────┬──────────┘
//!          └─────────┬──────────┘
//!                    ▼
//!           BookingStore::commit (one atomic ChangeSet)
//!                    │
//!                    ▼
//!             EffectRunner (notifications, expiry timers)
//! ```
//!
//! # Concurrency
//!
//! Reservation is check-then-insert. The coordinator serializes writers on a
//! `(resource, date)` key with a bounded in-process lock, and the store
//! re-checks overlaps inside its own transaction, so a losing writer always
//! gets a clean `SlotTaken` conflict. Payment and expiry race on the order
//! row; every update is applied only if the row still has the status it was
//! read with.

pub mod aggregates;
pub mod availability;
pub mod codes;
pub mod config;
pub mod coordinator;
pub mod draft;
pub mod effects;
pub mod gateway;
pub mod notifications;
pub mod pricing;
pub mod sweeper;

pub use aggregates::{
    BookingAction, BookingEnvironment, BookingReducer, NewBooking, PaymentOrderAction,
    PaymentOrderEnvironment, PaymentOrderReducer,
};
pub use availability::{Availability, AvailabilityChecker, SlotSuggestions, UnavailableReason};
pub use config::{Config, ExpiryDisposition};
pub use coordinator::{
    Collaborators, PaymentCheckout, PaymentConfirmation, PaymentProgress, Reservation,
    ReservationCoordinator, ReservationRequest,
};
pub use draft::{BookingDraft, DraftId, DraftStore};
pub use pricing::{PricingEngine, Quote};
pub use sweeper::{ExpiryResult, ExpirySweeper, SweepReport};
