//! Post-commit effect execution.
//!
//! Runs only after the state change that produced the effects has been
//! committed. Notifications are best-effort: a failed delivery is logged and
//! counted, never propagated. Delayed actions are handed back to the caller,
//! which decides how to schedule them.

use fieldbook_core::effect::Effect;
use fieldbook_core::environment::NotificationSink;
use fieldbook_core::types::Notification;
use fieldbook_runtime::metrics::BookingMetrics;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

/// Executes effects against the notification sink
#[derive(Clone)]
pub struct EffectRunner {
    notifier: Arc<dyn NotificationSink>,
}

impl EffectRunner {
    /// Creates a new `EffectRunner`
    #[must_use]
    pub fn new(notifier: Arc<dyn NotificationSink>) -> Self {
        Self { notifier }
    }

    /// Deliver every notification concurrently and return the delayed actions.
    pub async fn run<A>(&self, effects: impl IntoIterator<Item = Effect<A>>) -> Vec<(Duration, A)> {
        let mut notifications = Vec::new();
        let mut delayed = Vec::new();

        for effect in effects.into_iter().flat_map(Effect::flatten) {
            match effect {
                Effect::Notify(notification) => notifications.push(notification),
                Effect::Delay { duration, action } => delayed.push((duration, *action)),
                Effect::None | Effect::Parallel(_) => {},
            }
        }

        join_all(notifications.iter().map(|n| self.deliver(n))).await;
        delayed
    }

    async fn deliver(&self, notification: &Notification) {
        if let Err(e) = self.notifier.notify(notification).await {
            tracing::warn!(kind = notification.kind(), error = %e, "Notification delivery failed");
            BookingMetrics::record_notification_failure(notification.kind());
        }
    }
}
