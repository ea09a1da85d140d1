//! # Fieldbook Testing
//!
//! Deterministic test doubles for the Fieldbook booking engine.
//!
//! This crate provides:
//! - [`ManualClock`]: time that only moves when the test says so
//! - [`ReducerTest`]: given/when/then harness for lifecycle reducers
//! - [`InMemoryBookingStore`]: a `BookingStore` with the same commit
//!   guarantees as the PostgreSQL store, plus failure injection
//! - collaborator fakes: [`StaticCatalog`], [`RecordingNotifier`],
//!   [`ScriptedGateway`], [`StaticIdentity`], [`SequentialCodes`]
//!
//! ## Example
//!
//! ```ignore
//! use fieldbook_testing::{test_clock, InMemoryBookingStore};
//!
//! #[tokio::test]
//! async fn reserve_then_confirm() {
//!     let clock = test_clock();
//!     let store = Arc::new(InMemoryBookingStore::new());
//!     // build a coordinator over the fakes and drive it
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use fieldbook_core::environment::Clock;
use std::sync::{Arc, Mutex, PoisonError};

pub mod fakes;
pub mod memory;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Arc, Clock, DateTime, Duration, Mutex, PoisonError, Utc};

    /// A clock that only moves when told to.
    ///
    /// Clones share the same instant, so a test can hand one clone to the
    /// engine and advance another.
    ///
    /// # Example
    ///
    /// ```
    /// use fieldbook_testing::mocks::ManualClock;
    /// use fieldbook_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::minutes(10));
    /// assert_eq!(clock.now() - before, Duration::minutes(10));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute instant
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Default test clock: 2024-12-31 09:00:00 UTC, the day before the
    /// bookings most tests make.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is a constant.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> ManualClock {
        ManualClock::new(
            DateTime::parse_from_rfc3339("2024-12-31T09:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing strategies for domain types
pub mod properties {
    use chrono::{NaiveDate, NaiveTime};
    use fieldbook_core::types::Slot;
    use proptest::prelude::*;

    /// Slots on `date` aligned to 15 minutes, between 06:00 and 23:00,
    /// 15 minutes to 3 hours long.
    pub fn slot_on(date: NaiveDate) -> impl Strategy<Value = Slot> {
        (24u32..88, 1u32..=12).prop_map(move |(start_q, len_q)| {
            let end_q = (start_q + len_q).min(92);
            Slot::new(date, quarter(start_q), quarter(end_q))
        })
    }

    fn quarter(q: u32) -> NaiveTime {
        NaiveTime::from_num_seconds_from_midnight_opt(q * 15 * 60, 0).unwrap_or(NaiveTime::MIN)
    }
}

/// Install a test-friendly tracing subscriber (idempotent).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use fakes::{RecordingNotifier, ScriptedGateway, SequentialCodes, StaticCatalog, StaticIdentity};
pub use memory::InMemoryBookingStore;
pub use mocks::{ManualClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};
