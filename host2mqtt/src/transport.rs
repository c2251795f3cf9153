//! MQTT transport layer.
//!
//! Everything above this module talks to the broker through the [`Transport`]
//! trait: synchronous enqueue operations backed by a background delivery task.
//! The production implementation [`MqttLink`] wraps `rumqttc`:
//! - publishes and subscriptions are enqueued without blocking the poll loop
//! - a spawned eventloop task drives the connection, dispatches per-topic
//!   message handlers and forwards (re)connect outcomes to the runtime
//! - QoS 1 publishes are counted so [`Transport::flush`] can wait until the
//!   broker has acknowledged them, which the shutdown and suspend paths
//!   require before the connection goes away

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rumqttc::{AsyncClient, ConnectReturnCode, Event, Incoming, LastWill, MqttOptions, QoS};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay between reconnect attempts after a connection error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Handler invoked on the delivery task when a message arrives on its topic.
///
/// Runs concurrently with the poll loop. Implementations must not block or
/// perform privileged actions; they may only hand work off to be picked up
/// by a later update tick.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mqtt request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("timed out waiting for broker acknowledgment of {pending} publish(es)")]
    FlushTimeout { pending: usize },
}

/// Connection events forwarded from the delivery task to the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Broker accepted the connection (initial connect or reconnect).
    Connected,
    /// Connect attempt failed or the connection dropped; carries the broker
    /// or transport supplied reason. The eventloop retries on its own.
    ConnectFailed(String),
}

/// Broker connection parameters, assembled by the runtime from the settings.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
    /// Topic and payload of the retained last will the broker publishes if
    /// the connection drops without a clean disconnect.
    pub last_will: Option<(String, String)>,
    pub keep_alive: Duration,
}

/// Narrow broker interface consumed by consumers and the runtime.
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish (QoS 0).
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError>;

    /// Publish at QoS 1, counted toward [`Transport::flush`].
    fn publish_acked(&self, topic: &str, payload: &[u8], retain: bool)
        -> Result<(), TransportError>;

    /// Block until every `publish_acked` message has been acknowledged by the
    /// broker, or `timeout` elapses.
    fn flush(&self, timeout: Duration) -> Result<(), TransportError>;

    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;
    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Route messages arriving on `topic` to `handler`. One handler per
    /// topic; registering again replaces the previous handler.
    fn set_message_handler(&self, topic: &str, handler: MessageHandler);
    fn clear_message_handler(&self, topic: &str);
}

/// Outstanding QoS 1 publishes, shared between enqueuers, the delivery task
/// and flush waiters.
#[derive(Default)]
struct AckWindow {
    pending: Mutex<usize>,
    acked: Condvar,
}

impl AckWindow {
    fn begin(&self) {
        *self.pending.lock().unwrap() += 1;
    }

    fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = pending.saturating_sub(1);
    }

    fn complete(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = pending.saturating_sub(1);
        self.acked.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock().unwrap();
        while *pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::FlushTimeout { pending: *pending });
            }
            let (guard, _) = self.acked.wait_timeout(pending, remaining).unwrap();
            pending = guard;
        }
        Ok(())
    }
}

struct LinkShared {
    handlers: Mutex<HashMap<String, MessageHandler>>,
    acks: AckWindow,
}

/// Production [`Transport`] backed by a `rumqttc` client.
pub struct MqttLink {
    client: AsyncClient,
    shared: Arc<LinkShared>,
    delivery: JoinHandle<()>,
}

impl MqttLink {
    /// Open the broker connection and spawn the background delivery task.
    ///
    /// The returned receiver yields one [`LinkEvent`] per (re)connect
    /// outcome; the runtime reacts to `Connected` by running every consumer's
    /// connect hook on the poll-loop thread, never on the delivery task.
    pub fn open(config: LinkConfig) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);
        if let Some((user, password)) = &config.credentials {
            options.set_credentials(user, password);
        }
        if let Some((topic, payload)) = &config.last_will {
            options.set_last_will(LastWill::new(
                topic,
                payload.as_bytes(),
                QoS::AtLeastOnce,
                true,
            ));
        }

        let (client, mut eventloop) = AsyncClient::new(options, 32);
        let shared = Arc::new(LinkShared {
            handlers: Mutex::new(HashMap::new()),
            acks: AckWindow::default(),
        });
        let (events, events_rx) = mpsc::unbounded_channel();

        let task_shared = shared.clone();
        let delivery = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            info!("connected to MQTT broker");
                            let _ = events.send(LinkEvent::Connected);
                        } else {
                            let _ = events.send(LinkEvent::ConnectFailed(format!("{:?}", ack.code)));
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let handler =
                            task_shared.handlers.lock().unwrap().get(&publish.topic).cloned();
                        match handler {
                            Some(handler) => handler(&publish.topic, &publish.payload),
                            None => debug!(topic = %publish.topic, "message without handler dropped"),
                        }
                    }
                    Ok(Event::Incoming(Incoming::PubAck(_))) => task_shared.acks.complete(),
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send(LinkEvent::ConnectFailed(e.to_string()));
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                    }
                }
            }
        });

        (
            Self {
                client,
                shared,
                delivery,
            },
            events_rx,
        )
    }

    /// Cleanly disconnect, then stop the background delivery task.
    ///
    /// Callers must [`Transport::flush`] first; nothing enqueued after this
    /// point reaches the broker.
    pub async fn close(self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("mqtt disconnect failed: {e}");
        }
        self.delivery.abort();
    }
}

impl Transport for MqttLink {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())?;
        Ok(())
    }

    fn publish_acked(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        self.shared.acks.begin();
        if let Err(e) = self
            .client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
        {
            self.shared.acks.cancel();
            return Err(e.into());
        }
        Ok(())
    }

    fn flush(&self, timeout: Duration) -> Result<(), TransportError> {
        self.shared.acks.wait(timeout)
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client.try_subscribe(topic, QoS::AtLeastOnce)?;
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client.try_unsubscribe(topic)?;
        Ok(())
    }

    fn set_message_handler(&self, topic: &str, handler: MessageHandler) {
        self.shared
            .handlers
            .lock()
            .unwrap()
            .insert(topic.to_string(), handler);
    }

    fn clear_message_handler(&self, topic: &str) {
        self.shared.handlers.lock().unwrap().remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ack_window_waits_for_completion() {
        let window = Arc::new(AckWindow::default());
        window.begin();
        window.begin();

        let acker = window.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            acker.complete();
            acker.complete();
        });

        window.wait(Duration::from_secs(2)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn ack_window_times_out_with_pending_publishes() {
        let window = AckWindow::default();
        window.begin();

        let err = window.wait(Duration::from_millis(20)).unwrap_err();
        match err {
            TransportError::FlushTimeout { pending } => assert_eq!(pending, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ack_window_is_idle_by_default() {
        let window = AckWindow::default();
        window.wait(Duration::from_millis(1)).unwrap();
    }

    #[test]
    fn cancel_undoes_a_failed_enqueue() {
        let window = AckWindow::default();
        window.begin();
        window.cancel();
        window.wait(Duration::from_millis(1)).unwrap();
    }

    // The shutdown and suspend paths wait inside block_in_place; with a lone
    // worker the acking task must still get to run while a waiter blocks.
    #[test]
    fn blocking_wait_leaves_a_lone_worker_free_for_the_acker() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let window = Arc::new(AckWindow::default());
            window.begin();

            let acker = window.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                acker.complete();
            });

            let waiter = window.clone();
            tokio::spawn(async move {
                tokio::task::block_in_place(|| waiter.wait(Duration::from_secs(2)))
            })
            .await
            .unwrap()
            .unwrap();
        });
    }
}
