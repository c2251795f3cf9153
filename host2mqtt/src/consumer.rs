//! The consumer contract: lifecycle hooks plus shared availability
//! bookkeeping.
//!
//! Feature modules (sensor publishers, command handlers) implement
//! [`Consumer`] and declare the availability topics they own in an
//! [`AvailabilitySet`]. The free functions in [`lifecycle`] layer the generic
//! online/offline publication over the hooks, so no module can forget it and
//! every registered topic reflects the true connection state.

use std::time::Duration;

use anyhow::Result;

use crate::transport::Transport;

/// Retained payloads for availability topics.
pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Privileged action a consumer asks the runtime to perform on the poll-loop
/// thread. Message handlers never execute these directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeRequest {
    Suspend,
    Poweroff,
}

/// Ordered set of availability topics owned by one consumer.
#[derive(Debug, Default, Clone)]
pub struct AvailabilitySet {
    topics: Vec<String>,
}

impl AvailabilitySet {
    /// Declare ownership of an availability topic. Registering the same topic
    /// twice keeps its original position.
    pub fn register(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if !self.topics.contains(&topic) {
            self.topics.push(topic);
        }
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// The contract every feature module implements.
///
/// Hooks are synchronous and run on the poll-loop thread. Anything a module
/// registers with the transport (message handlers) runs on the delivery task
/// instead and may only hand work back via flags or queues drained by
/// [`Consumer::update`].
pub trait Consumer: Send {
    /// Short module name used in log lines.
    fn name(&self) -> &str;

    /// Availability topics this consumer owns. Published "online"/"offline"
    /// by the [`lifecycle`] wrappers, never by the hooks themselves.
    fn availability(&self) -> &AvailabilitySet;

    /// Called once per successful connection, including reconnections:
    /// perform subscriptions, discovery publication and message-handler
    /// registration here. Must tolerate running again after a reconnect
    /// (retained discovery re-publication simply overwrites).
    fn on_connect(&mut self, link: &dyn Transport) -> Result<()>;

    /// Called once before a graceful shutdown: undo everything `on_connect`
    /// registered. Availability is handled by [`lifecycle::disconnect`], not
    /// here.
    fn on_disconnect(&mut self, link: &dyn Transport) -> Result<()>;

    /// Called once per update interval on the poll loop. Slow I/O must fail
    /// fast and log rather than stall the loop. Returns the privileged
    /// actions requested since the previous call.
    fn update(&mut self, link: &dyn Transport) -> Result<Vec<RuntimeRequest>>;
}

/// Generic lifecycle wrappers the runtime layers over every consumer.
///
/// Deliberately free functions rather than default trait methods, so a
/// consumer cannot override the availability bookkeeping.
pub mod lifecycle {
    use super::*;

    /// Run `on_connect`, then publish retained "online" to every registered
    /// availability topic. No delivery confirmation is awaited.
    pub fn connected(consumer: &mut dyn Consumer, link: &dyn Transport) -> Result<()> {
        consumer.on_connect(link)?;
        for topic in consumer.availability().topics() {
            link.publish(topic, PAYLOAD_ONLINE.as_bytes(), true)?;
        }
        Ok(())
    }

    /// Run `on_disconnect`, then publish retained "offline" to every
    /// registered availability topic and wait for broker acknowledgment.
    /// Must complete before the transport is told to disconnect, otherwise
    /// the retained offline state may never be flushed.
    pub fn disconnect(
        consumer: &mut dyn Consumer,
        link: &dyn Transport,
        ack_timeout: Duration,
    ) -> Result<()> {
        consumer.on_disconnect(link)?;
        for topic in consumer.availability().topics() {
            link.publish_acked(topic, PAYLOAD_OFFLINE.as_bytes(), true)?;
        }
        link.flush(ack_timeout)?;
        Ok(())
    }

    /// Mark the consumer offline ahead of an OS suspend. The last will cannot
    /// cover a clean suspend followed by a silent network drop during sleep.
    pub fn suspending(consumer: &dyn Consumer, link: &dyn Transport) -> Result<()> {
        for topic in consumer.availability().topics() {
            link.publish_acked(topic, PAYLOAD_OFFLINE.as_bytes(), true)?;
        }
        Ok(())
    }

    /// Mark the consumer online again after resume. Best effort: if the
    /// connection dropped during sleep, the reconnect handler re-runs
    /// [`connected`] anyway.
    pub fn resuming(consumer: &dyn Consumer, link: &dyn Transport) -> Result<()> {
        for topic in consumer.availability().topics() {
            link.publish(topic, PAYLOAD_ONLINE.as_bytes(), true)?;
        }
        Ok(())
    }
}
