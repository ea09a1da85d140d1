//! Notification sink that writes to the log.
//!
//! The worker has no operator channel of its own; notifications become
//! structured `info` events that a log shipper can route.

use async_trait::async_trait;
use fieldbook_core::environment::NotificationSink;
use fieldbook_core::error::NotifyError;
use fieldbook_core::types::Notification;

/// Emits every notification as a `tracing` event with a JSON payload
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification).map_err(|e| NotifyError(e.to_string()))?;
        tracing::info!(target: "fieldbook::notifications", kind = notification.kind(), %payload, "Notification");
        Ok(())
    }
}
