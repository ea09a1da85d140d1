//! # Fieldbook Runtime
//!
//! Operational plumbing shared by the booking engine and its adapters:
//!
//! - [`retry`]: bounded retries with exponential backoff for slow collaborators
//! - [`slot_lock`]: per-`(resource, date)` locks with bounded acquisition
//! - [`metrics`]: Prometheus metric registration and recorders

pub mod metrics;
pub mod retry;
pub mod slot_lock;

pub use retry::{RetryPolicy, retry_if, retry_with_backoff};
pub use slot_lock::{LockTimeout, SlotGuard, SlotKey, SlotLocks};
