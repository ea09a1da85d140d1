//! Lifecycle state machines for bookings and payment orders.
//!
//! Both reducers are pure: they validate, mutate the entity in place, and
//! describe follow-up work as effects. Loading, committing, and running the
//! effects is the coordinator's job.

pub mod booking;
pub mod payment_order;

pub use booking::{BookingAction, BookingEnvironment, BookingReducer, NewBooking};
pub use payment_order::{PaymentOrderAction, PaymentOrderEnvironment, PaymentOrderReducer};
