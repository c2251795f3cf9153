/*!
In-memory MQTT transport for tests.

Records every operation in order and keeps the same per-topic handler
registry the production link has, so tests can inject incoming messages and
assert on exactly what a consumer did, without a broker.
*/

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;

use host2mqtt::transport::{MessageHandler, Transport, TransportError};

/// One recorded transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
        /// True for QoS 1 publishes counted toward a flush.
        acked: bool,
    },
    Flush,
    Subscribe(String),
    Unsubscribe(String),
}

/// Recording [`Transport`] double. Everything succeeds; flushes return
/// immediately.
#[derive(Default)]
pub struct StubTransport {
    ops: Mutex<Vec<TransportOp>>,
    handlers: Mutex<HashMap<String, MessageHandler>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation recorded so far, in call order.
    pub fn ops(&self) -> Vec<TransportOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Payloads published to `topic`, in order, regardless of QoS.
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                TransportOp::Publish {
                    topic: t, payload, ..
                } if t == topic => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Parse the most recent publish on `topic` as JSON.
    pub fn last_json<T: DeserializeOwned>(&self, topic: &str) -> Result<Option<T>> {
        match self.published(topic).last() {
            Some(payload) => Ok(Some(serde_json::from_slice(payload)?)),
            None => Ok(None),
        }
    }

    /// Topics currently subscribed: subscribes minus later unsubscribes.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics = Vec::new();
        for op in self.ops.lock().unwrap().iter() {
            match op {
                TransportOp::Subscribe(topic) => topics.push(topic.clone()),
                TransportOp::Unsubscribe(topic) => topics.retain(|t| t != topic),
                _ => {}
            }
        }
        topics
    }

    pub fn has_handler(&self, topic: &str) -> bool {
        self.handlers.lock().unwrap().contains_key(topic)
    }

    /// Deliver an incoming message to the registered handler, the way the
    /// production delivery task would. Returns false when no handler is
    /// registered for the topic.
    pub fn simulate_message(&self, topic: &str, payload: &[u8]) -> bool {
        let handler = self.handlers.lock().unwrap().get(topic).cloned();
        match handler {
            Some(handler) => {
                handler(topic, payload);
                true
            }
            None => false,
        }
    }

    /// Drop all recorded operations, keeping handlers and subscriptions.
    pub fn clear(&self) {
        self.ops.lock().unwrap().clear();
    }

    fn record(&self, op: TransportOp) {
        self.ops.lock().unwrap().push(op);
    }
}

impl Transport for StubTransport {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        self.record(TransportOp::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
            acked: false,
        });
        Ok(())
    }

    fn publish_acked(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        self.record(TransportOp::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
            acked: true,
        });
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<(), TransportError> {
        self.record(TransportOp::Flush);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.record(TransportOp::Subscribe(topic.to_string()));
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.record(TransportOp::Unsubscribe(topic.to_string()));
        Ok(())
    }

    fn set_message_handler(&self, topic: &str, handler: MessageHandler) {
        self.handlers
            .lock()
            .unwrap()
            .insert(topic.to_string(), handler);
    }

    fn clear_message_handler(&self, topic: &str) {
        self.handlers.lock().unwrap().remove(topic);
    }
}
