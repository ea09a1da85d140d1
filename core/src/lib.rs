//! # Fieldbook Core
//!
//! Domain types, error taxonomy, and collaborator contracts for the Fieldbook
//! booking engine.
//!
//! The engine is organised around small state machines:
//!
//! - **State**: the entity being driven (a booking, a payment order)
//! - **Action**: every input the state machine accepts
//! - **Reducer**: `(State, Action, Environment) → Result<Outcome>`; validates,
//!   mutates state in place, and describes follow-up work as effects
//! - **Effect**: a description of work to run *after* the change is committed
//!   (notifications, delayed actions such as payment expiry)
//! - **Environment**: injected collaborators (clock, catalog, gateway)
//!
//! Reducers never perform I/O. The coordinator in the `fieldbook` crate loads
//! state from a [`store::BookingStore`], runs reducers, commits the resulting
//! [`store::ChangeSet`] atomically, and only then executes the effects.
//!
//! ## Example
//!
//! ```ignore
//! use fieldbook_core::reducer::{Outcome, Reducer};
//!
//! impl Reducer for PaymentOrderReducer {
//!     type State = Option<PaymentOrder>;
//!     type Action = PaymentOrderAction;
//!     type Environment = PaymentOrderEnvironment;
//!     type Error = BookingError;
//!
//!     fn reduce(&self, state: &mut Self::State, action: Self::Action, env: &Self::Environment)
//!         -> Result<Outcome<Self::Action>, Self::Error> {
//!         // Business logic goes here
//!         Ok(Outcome::Unchanged)
//!     }
//! }
//! ```

pub mod effect_macros;
pub mod environment;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
pub use error::{BookingError, ErrorCategory};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - the core trait for business logic
///
/// Reducers are pure: `(State, Action, Environment) → (State', Effects)`.
/// They are deterministic given the environment's clock, which makes them
/// testable without a runtime.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// Effects produced by one reduction. Most transitions emit one or two.
    pub type Effects<Action> = SmallVec<[Effect<Action>; 4]>;

    /// Result of a successful reduction
    #[derive(Debug)]
    pub enum Outcome<Action> {
        /// State changed; run these effects once the change is committed
        Applied(Effects<Action>),
        /// Idempotent replay: nothing changed and nothing must be re-emitted
        Unchanged,
    }

    impl<Action> Outcome<Action> {
        /// Whether state was modified
        #[must_use]
        pub const fn is_applied(&self) -> bool {
            matches!(self, Self::Applied(_))
        }

        /// Effects to run (empty for `Unchanged`)
        #[must_use]
        pub fn into_effects(self) -> Effects<Action> {
            match self {
                Self::Applied(effects) => effects,
                Self::Unchanged => SmallVec::new(),
            }
        }
    }

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The entity this reducer drives (usually `Option<Entity>`,
    ///   `None` before creation)
    /// - `Action`: The inputs this reducer accepts
    /// - `Environment`: Injected dependencies
    /// - `Error`: Rejection type; a rejected action leaves state untouched
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Rejection type
        type Error;

        /// Reduce an action into a state change and effects.
        ///
        /// Implementations must validate before mutating: when `Err` is
        /// returned the state is exactly as it was.
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is invalid for the current state.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<Outcome<Self::Action>, Self::Error>;
    }
}

/// Effect module - descriptions of post-commit work
pub mod effect {
    use crate::types::Notification;
    use std::time::Duration;

    /// Work to run after a state change has been committed.
    ///
    /// Effects are values, not execution. The coordinator interprets them.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Deliver an operator notification (best-effort)
        Notify(Notification),

        /// Feed `action` back after `duration` (payment expiry timers)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Self>) -> Self {
            Self::Parallel(effects)
        }

        /// Flattens nested `Parallel` effects and drops `None`s
        #[must_use]
        pub fn flatten(self) -> Vec<Self> {
            match self {
                Self::None => Vec::new(),
                Self::Parallel(effects) => effects.into_iter().flat_map(Self::flatten).collect(),
                other => vec![other],
            }
        }

        /// Maps the action carried by delayed effects into another action type
        #[must_use]
        pub fn map<B>(self, f: &impl Fn(Action) -> B) -> Effect<B> {
            match self {
                Self::None => Effect::None,
                Self::Notify(n) => Effect::Notify(n),
                Self::Delay { duration, action } => Effect::Delay {
                    duration,
                    action: Box::new(f(*action)),
                },
                Self::Parallel(effects) => {
                    Effect::Parallel(effects.into_iter().map(|e| e.map(f)).collect())
                },
            }
        }
    }
}
