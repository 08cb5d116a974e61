//! Sends `malwareBlocked` notifications to an optional external reporting
//! endpoint. Defaults to a no-op sink: the reporting endpoint/UI is an
//! external collaborator, outside this proxy's own scope.

use std::sync::Arc;

use rama::telemetry::tracing;
use tokio::sync::mpsc;

use super::events::BlockedEvent;

/// A handle to send block notifications to a reporting endpoint. Cheaply
/// cloneable and shareable across interceptors.
#[derive(Clone)]
pub struct EventNotifier {
    inner: Option<Arc<EventNotifierInner>>,
}

struct EventNotifierInner {
    tx: mpsc::UnboundedSender<BlockedEvent>,
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("enabled", &self.inner.is_some())
            .finish()
    }
}

impl EventNotifier {
    /// Creates a notifier that reports to `reporting_endpoint`, or a no-op
    /// sink if none is configured.
    pub fn new(reporting_endpoint: Option<String>) -> Self {
        let Some(endpoint) = reporting_endpoint else {
            return Self::noop();
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(notification_worker(endpoint, rx));

        Self {
            inner: Some(Arc::new(EventNotifierInner { tx })),
        }
    }

    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Non-blocking; never fails even if the receiver is gone.
    pub fn notify(&self, event: BlockedEvent) {
        if let Some(inner) = &self.inner
            && let Err(err) = inner.tx.send(event)
        {
            tracing::debug!("failed to send event notification (receiver dropped): {err}");
        }
    }
}

async fn notification_worker(
    reporting_endpoint: String,
    mut rx: mpsc::UnboundedReceiver<BlockedEvent>,
) {
    tracing::info!("event notifier worker started, sending events to {reporting_endpoint}");

    while let Some(event) = rx.recv().await {
        tracing::debug!(
            "sending event notification: product={} artifact={:?}",
            event.artifact.product,
            event.artifact
        );

        // TODO: implement the actual HTTP POST to reporting_endpoint once a
        // reporting protocol is settled on; for now events are logged only.
        let _ = serde_json::to_vec(&event).inspect_err(|err| {
            tracing::warn!("failed to serialize event: {err}");
        });
    }

    tracing::debug!("event notifier worker shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::coordinate::PackageVersion;
    use crate::firewall::events::BlockedArtifact;

    #[test]
    fn test_noop_notifier_is_disabled() {
        let notifier = EventNotifier::noop();
        assert!(!notifier.is_enabled());
        notifier.notify(BlockedEvent::from_info(super::super::events::BlockedEventInfo {
            artifact: BlockedArtifact {
                product: "npm".into(),
                identifier: "left-pad".into(),
                version: Some(PackageVersion::parse("1.3.0")),
            },
        }));
    }

    #[tokio::test]
    async fn test_notify_delivers_to_worker() {
        let notifier = EventNotifier::new(Some("http://127.0.0.1:0/events".to_owned()));
        assert!(notifier.is_enabled());
        notifier.notify(BlockedEvent::from_info(super::super::events::BlockedEventInfo {
            artifact: BlockedArtifact {
                product: "pip".into(),
                identifier: "evil-pkg".into(),
                version: None,
            },
        }));
        tokio::task::yield_now().await;
    }
}
