//! Declarative macros for ergonomic effect construction

/// Create an `Effect::Delay` that feeds `action` back after `duration`
///
/// # Example
///
/// ```rust,ignore
/// use fieldbook_core::delay;
///
/// let effect = delay! {
///     duration: Duration::from_secs(600),
///     action: PaymentOrderAction::MarkExpired
/// };
/// ```
#[macro_export]
macro_rules! delay {
    (duration: $duration:expr, action: $action:expr) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}

/// Create an `Outcome::Applied` from a list of effects
///
/// # Example
///
/// ```rust,ignore
/// use fieldbook_core::applied;
///
/// return Ok(applied![Effect::Notify(notification)]);
/// ```
#[macro_export]
macro_rules! applied {
    () => {
        $crate::reducer::Outcome::Applied($crate::SmallVec::new())
    };
    ($($effect:expr),+ $(,)?) => {
        $crate::reducer::Outcome::Applied($crate::smallvec![$($effect),+])
    };
}

#[cfg(test)]
mod tests {
    use crate::effect::Effect;
    use crate::reducer::Outcome;
    use std::time::Duration;

    #[test]
    fn delay_macro_boxes_action() {
        let effect: Effect<&str> = delay! {
            duration: Duration::from_secs(5),
            action: "expire"
        };
        assert!(matches!(effect, Effect::Delay { action, .. } if *action == "expire"));
    }

    #[test]
    fn applied_macro_collects_effects() {
        let outcome: Outcome<u8> = applied![Effect::None, Effect::None];
        assert_eq!(outcome.into_effects().len(), 2);

        let empty: Outcome<u8> = applied![];
        assert!(empty.is_applied());
    }
}
