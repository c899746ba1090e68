//! Broadcast of authentication and accounting outcomes.
//!
//! Engines publish one event per processed request. Subscribers come
//! and go (audit sinks, dashboards); publishing with no subscriber is
//! a no-op rather than an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Auth,
    Acct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventResult {
    Accept,
    Reject,
    Ack,
}

/// One processed request, as seen by subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct AaaEvent {
    pub kind: EventKind,
    pub result: EventResult,
    pub username: Option<String>,
    pub nas_identifier: String,
    pub timestamp: DateTime<Utc>,
}

impl AaaEvent {
    pub fn new(
        kind: EventKind,
        result: EventResult,
        username: Option<&str>,
        nas_identifier: &str,
    ) -> Self {
        AaaEvent {
            kind,
            result,
            username: username.map(str::to_string),
            nas_identifier: nas_identifier.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AaaEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AaaEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: AaaEvent) {
        // send() fails only when nobody is listening.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(256)
    }
}
