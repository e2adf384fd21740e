// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pub/sub ports for incident ingestion (§4.6) and sweeper republish (§4.7).

use async_trait::async_trait;
use chester_core::Incident;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode failure: {0}")]
    Decode(String),
}

/// One delivered message: the decoded incident plus an ack handle. The
/// caller must ack before dispatching (§4.6: acknowledge-before-handle).
pub struct DeliveredEvent {
    pub incident: Incident,
    ack_id: String,
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Block until the next message arrives, decode it, and return it
    /// unacknowledged. A JSON decode failure is returned as
    /// [`EventError::Decode`] — callers must treat this as fatal (§7).
    async fn recv(&self) -> Result<DeliveredEvent, EventError>;
    async fn ack(&self, ack_id: &str) -> Result<(), EventError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Republish an incident so ingestion picks it up again (§4.7 sweeper).
    async fn publish(&self, incident: &Incident) -> Result<(), EventError>;
}

/// Real pub/sub adapter over a pull-subscription REST API (§4.6, §6:
/// `PUBSUB_TOPIC`/`PUBSUB_SUBSCRIPTION`). Messages carry a base64-encoded
/// JSON-serialized [`Incident`] in `message.data`, matching the wire shape
/// the upstream GCF push handler already produces.
pub struct HttpPubSub {
    http: reqwest::Client,
    base_url: String,
    subscription: String,
    topic: String,
}

impl HttpPubSub {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            subscription: subscription.into(),
            topic: topic.into(),
        }
    }

    fn decode_incident(data_b64: &str) -> Result<Incident, EventError> {
        use base64::Engine;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(data_b64)
            .map_err(|e| EventError::Decode(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| EventError::Decode(e.to_string()))
    }
}

#[derive(serde::Deserialize)]
struct PullResponse {
    #[serde(default, rename = "receivedMessages")]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(serde::Deserialize)]
struct ReceivedMessage {
    #[serde(rename = "ackId")]
    ack_id: String,
    message: MessageWire,
}

#[derive(serde::Deserialize)]
struct MessageWire {
    data: String,
}

#[async_trait]
impl EventSource for HttpPubSub {
    /// Pulls one message at a time, blocking (via repeated long-poll
    /// requests) until the subscription yields something. A decode
    /// failure is returned immediately without acking — the caller is
    /// expected to treat it as fatal rather than retry forever (§7).
    async fn recv(&self) -> Result<DeliveredEvent, EventError> {
        loop {
            let url = format!("{}/subscriptions/{}:pull", self.base_url, self.subscription);
            let resp = self
                .http
                .post(&url)
                .json(&serde_json::json!({ "maxMessages": 1 }))
                .send()
                .await
                .map_err(|e| EventError::Transport(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(EventError::Transport(format!("{}", resp.status())));
            }
            let body: PullResponse = resp.json().await.map_err(|e| EventError::Transport(e.to_string()))?;
            if let Some(received) = body.received_messages.into_iter().next() {
                let incident = Self::decode_incident(&received.message.data)?;
                return Ok(DeliveredEvent {
                    incident,
                    ack_id: received.ack_id,
                });
            }
        }
    }

    async fn ack(&self, ack_id: &str) -> Result<(), EventError> {
        let url = format!("{}/subscriptions/{}:acknowledge", self.base_url, self.subscription);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "ackIds": [ack_id] }))
            .send()
            .await
            .map_err(|e| EventError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EventError::Transport(format!("{}", resp.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for HttpPubSub {
    async fn publish(&self, incident: &Incident) -> Result<(), EventError> {
        use base64::Engine;
        let payload = serde_json::to_vec(incident).map_err(|e| EventError::Decode(e.to_string()))?;
        let data_b64 = base64::engine::general_purpose::STANDARD.encode(payload);
        let url = format!("{}/topics/{}:publish", self.base_url, self.topic);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "messages": [{ "data": data_b64 }] }))
            .send()
            .await
            .map_err(|e| EventError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EventError::Transport(format!("{}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    struct State {
        queue: VecDeque<Incident>,
        acked: Vec<String>,
        published: Vec<Incident>,
    }

    /// In-memory pub/sub fake. `push` enqueues a message for `recv`;
    /// `published()` inspects what the sweeper (or anything else) sent via
    /// [`EventPublisher::publish`].
    pub struct FakeEventBus {
        state: Mutex<State>,
        notify: Notify,
    }

    impl Default for FakeEventBus {
        fn default() -> Self {
            Self {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    acked: Vec::new(),
                    published: Vec::new(),
                }),
                notify: Notify::new(),
            }
        }
    }

    impl FakeEventBus {
        pub fn push(&self, incident: Incident) {
            self.state.lock().queue.push_back(incident);
            self.notify.notify_one();
        }

        pub fn acked(&self) -> Vec<String> {
            self.state.lock().acked.clone()
        }

        pub fn published(&self) -> Vec<Incident> {
            self.state.lock().published.clone()
        }
    }

    #[async_trait]
    impl EventSource for FakeEventBus {
        async fn recv(&self) -> Result<DeliveredEvent, EventError> {
            loop {
                if let Some(incident) = self.state.lock().queue.pop_front() {
                    let ack_id = incident.incident_id.clone();
                    return Ok(DeliveredEvent { incident, ack_id });
                }
                self.notify.notified().await;
            }
        }

        async fn ack(&self, ack_id: &str) -> Result<(), EventError> {
            self.state.lock().acked.push(ack_id.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl EventPublisher for FakeEventBus {
        async fn publish(&self, incident: &Incident) -> Result<(), EventError> {
            self.state.lock().published.push(incident.clone());
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeEventBus;

impl DeliveredEvent {
    pub fn ack_id(&self) -> &str {
        &self.ack_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chester_core::{Action, IncidentBuilder};

    #[tokio::test]
    async fn recv_returns_pushed_incidents_in_order() {
        let bus = FakeEventBus::default();
        bus.push(IncidentBuilder::new("i1", Action::Add).build());
        bus.push(IncidentBuilder::new("i2", Action::Add).build());

        let first = bus.recv().await.unwrap();
        assert_eq!(first.incident.incident_id, "i1");
        bus.ack(first.ack_id()).await.unwrap();

        let second = bus.recv().await.unwrap();
        assert_eq!(second.incident.incident_id, "i2");

        assert_eq!(bus.acked(), vec!["i1".to_string()]);
    }

    #[tokio::test]
    async fn publish_is_recorded_for_sweeper_assertions() {
        let bus = FakeEventBus::default();
        let incident = IncidentBuilder::new("i1", Action::Add).build();
        bus.publish(&incident).await.unwrap();
        assert_eq!(bus.published().len(), 1);
    }
}
