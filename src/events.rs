//! Client Events
//!
//! Typed broadcast channel replacing ad-hoc callbacks. Subscribers receive
//! rate-limit warnings, throttle notices and surfaced API errors.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::ApiError;
use crate::throttle::QuotaState;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_BUFFER: usize = 256;

/// Events emitted by the executor.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Quota consumption crossed the configured fraction. Fires once per crossing.
    RateLimitApproaching { status: QuotaState, pct: f64 },
    /// The API throttled a request; the executor is waiting to retry.
    Throttled { status: Option<QuotaState> },
    /// A call ended in an error that is being returned to the caller.
    ApiError { error: ApiError },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Having no subscribers is fine.
    pub fn emit(&self, event: ClientEvent) {
        if self.sender.send(event).is_err() {
            debug!("Client event dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(ClientEvent::Throttled { status: None });

        match rx.recv().await.unwrap() {
            ClientEvent::Throttled { status } => assert!(status.is_none()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(ClientEvent::ApiError {
            error: ApiError::Timeout { elapsed_ms: 1 },
        });
    }
}
