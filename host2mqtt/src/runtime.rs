//! The orchestrator: owns the MQTT link, the consumers and the poll loop.
//!
//! Lifecycle: construct consumers from configuration, open the transport
//! with the global last will, then loop on a fixed short tick. Connect
//! confirmations arrive from the delivery task over a channel and are
//! handled here, so consumer hooks always run on the poll-loop thread.
//! Updates fire only once the configured interval has accumulated, keeping
//! shutdown-signal latency bounded by the tick rather than the interval.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::commands::HostCommands;
use crate::config::{Settings, DEFAULT_HEAD_TOPIC};
use crate::consumer::{lifecycle, Consumer, RuntimeRequest, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use crate::power;
use crate::sensors::HostSensors;
use crate::transport::{LinkConfig, LinkEvent, MqttLink, Transport};

/// Fixed poll tick, independent of the configured update interval.
pub const POLL_TICK: Duration = Duration::from_millis(500);
/// How long the shutdown and suspend paths wait for broker acknowledgments.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
/// Seconds between scheduling the OS poweroff and it firing, so the retained
/// offline state flushes first.
const POWEROFF_DELAY_SECS: u64 = 5;

/// Accumulates poll ticks and fires once the configured update interval has
/// elapsed. Primed so the first tick after startup triggers an update.
pub struct UpdateClock {
    interval: Duration,
    elapsed: Duration,
}

impl UpdateClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            elapsed: interval,
        }
    }

    /// Record one elapsed tick; returns true when an update is due.
    pub fn advance(&mut self, tick: Duration) -> bool {
        self.elapsed += tick;
        if self.elapsed >= self.interval {
            self.elapsed = Duration::ZERO;
            true
        } else {
            false
        }
    }
}

pub struct Runtime {
    link: MqttLink,
    events: UnboundedReceiver<LinkEvent>,
    consumers: Vec<Box<dyn Consumer>>,
    clock: UpdateClock,
    availability_topic: String,
    running: bool,
}

impl Runtime {
    /// Load everything from settings, construct the consumers and open the
    /// broker connection (the last will carries the global offline state).
    pub fn new(settings: Settings) -> Result<Self> {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        let client_name = settings.str_or("client", "name", &hostname);
        let head_topic = settings.str_or("mqtt", "topic", DEFAULT_HEAD_TOPIC);
        let availability_topic = format!("{head_topic}/{client_name}/availability");

        let update_interval = settings.u64_or("client", "update_interval", 60);

        let consumers: Vec<Box<dyn Consumer>> = vec![
            Box::new(
                HostSensors::new(&settings, &client_name).context("failed to set up sensors")?,
            ),
            Box::new(HostCommands::new(&settings, &client_name)),
        ];

        let port = u16::try_from(settings.u64_or("mqtt", "port", 1883))
            .context("mqtt.port out of range")?;
        let credentials = settings
            .get_str("mqtt", "user")
            .map(|user| (user.to_string(), settings.str_or("mqtt", "password", "")));

        let (link, events) = MqttLink::open(LinkConfig {
            client_id: format!("host2mqtt@{hostname}_{}", Uuid::new_v4()),
            host: settings.str_or("mqtt", "server", "localhost"),
            port,
            credentials,
            last_will: Some((availability_topic.clone(), PAYLOAD_OFFLINE.to_string())),
            keep_alive: KEEP_ALIVE,
        });

        Ok(Self {
            link,
            events,
            consumers,
            clock: UpdateClock::new(Duration::from_secs(update_interval)),
            availability_topic,
            running: false,
        })
    }

    /// Run until a termination signal or a poweroff request, then shut down
    /// in order: per-consumer offline (awaited), global offline (awaited),
    /// transport disconnect.
    pub async fn run(mut self) -> Result<()> {
        self.running = true;
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
        let mut tick = tokio::time::interval(POLL_TICK);

        while self.running {
            tokio::select! {
                _ = tick.tick() => {
                    if self.clock.advance(POLL_TICK) {
                        let requests = self.update_consumers();
                        for request in requests {
                            self.handle_request(request).await;
                        }
                    }
                }
                Some(event) = self.events.recv() => self.handle_link_event(event),
                _ = sigterm.recv() => {
                    info!("termination signal received, exiting");
                    self.running = false;
                }
                _ = sigint.recv() => {
                    info!("interrupt received, exiting");
                    self.running = false;
                }
            }
        }

        self.shutdown().await
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                for consumer in &mut self.consumers {
                    if let Err(e) = lifecycle::connected(consumer.as_mut(), &self.link) {
                        error!("connect hook for {} failed: {e:#}", consumer.name());
                    }
                }
                if let Err(e) =
                    self.link
                        .publish(&self.availability_topic, PAYLOAD_ONLINE.as_bytes(), true)
                {
                    error!("failed to publish global availability: {e}");
                }
            }
            LinkEvent::ConnectFailed(reason) => {
                error!("failed to connect to MQTT broker: {reason}");
            }
        }
    }

    fn update_consumers(&mut self) -> Vec<RuntimeRequest> {
        let mut requests = Vec::new();
        for consumer in &mut self.consumers {
            match consumer.update(&self.link) {
                Ok(mut r) => requests.append(&mut r),
                Err(e) => error!("update for {} failed: {e:#}", consumer.name()),
            }
        }
        requests
    }

    async fn handle_request(&mut self, request: RuntimeRequest) {
        match request {
            RuntimeRequest::Suspend => {
                info!("suspend requested");
                self.broadcast_suspending();
                if let Err(e) = power::suspend().await {
                    error!("suspend failed: {e:#}");
                }
                self.broadcast_resuming();
            }
            RuntimeRequest::Poweroff => {
                if let Err(e) = power::schedule_poweroff(POWEROFF_DELAY_SECS) {
                    error!("poweroff failed: {e:#}");
                }
                self.running = false;
            }
        }
    }

    /// Mark everything offline before the machine sleeps. The last will does
    /// not fire for a clean suspend followed by a silent drop during sleep,
    /// so this has to happen explicitly, acknowledged before the OS call.
    ///
    /// `flush` parks the calling thread on a condvar while the delivery task
    /// produces the PubAcks that wake it, so it must not occupy a runtime
    /// worker.
    fn broadcast_suspending(&mut self) {
        tokio::task::block_in_place(|| {
            for consumer in &self.consumers {
                if let Err(e) = lifecycle::suspending(consumer.as_ref(), &self.link) {
                    error!("suspend hook for {} failed: {e:#}", consumer.name());
                }
            }
            if let Err(e) =
                self.link
                    .publish_acked(&self.availability_topic, PAYLOAD_OFFLINE.as_bytes(), true)
            {
                error!("failed to publish global availability: {e}");
            }
            if let Err(e) = self.link.flush(ACK_TIMEOUT) {
                warn!("offline state may not have reached the broker: {e}");
            }
        });
    }

    fn broadcast_resuming(&mut self) {
        for consumer in &self.consumers {
            if let Err(e) = lifecycle::resuming(consumer.as_ref(), &self.link) {
                error!("resume hook for {} failed: {e:#}", consumer.name());
            }
        }
        if let Err(e) =
            self.link
                .publish(&self.availability_topic, PAYLOAD_ONLINE.as_bytes(), true)
        {
            error!("failed to publish global availability: {e}");
        }
    }

    async fn shutdown(mut self) -> Result<()> {
        info!("shutting down");
        // Same constraint as broadcast_suspending: the acked offline
        // publishes block on the delivery task, off the worker pool.
        tokio::task::block_in_place(|| {
            for consumer in &mut self.consumers {
                if let Err(e) = lifecycle::disconnect(consumer.as_mut(), &self.link, ACK_TIMEOUT) {
                    error!("disconnect hook for {} failed: {e:#}", consumer.name());
                }
            }
            if let Err(e) =
                self.link
                    .publish_acked(&self.availability_topic, PAYLOAD_OFFLINE.as_bytes(), true)
            {
                error!("failed to publish global availability: {e}");
            }
            if let Err(e) = self.link.flush(ACK_TIMEOUT) {
                warn!("offline state may not have reached the broker: {e}");
            }
        });
        self.link.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_triggers_an_update() {
        let mut clock = UpdateClock::new(Duration::from_secs(60));
        assert!(clock.advance(POLL_TICK));
    }

    #[test]
    fn updates_fire_once_per_interval() {
        let mut clock = UpdateClock::new(Duration::from_secs(60));
        assert!(clock.advance(POLL_TICK));

        // 60s / 0.5s: the 120th tick after a reset fires, none before.
        for _ in 0..119 {
            assert!(!clock.advance(POLL_TICK));
        }
        assert!(clock.advance(POLL_TICK));
        assert!(!clock.advance(POLL_TICK));
    }

    #[test]
    fn short_intervals_fire_every_tick() {
        let mut clock = UpdateClock::new(Duration::from_millis(500));
        assert!(clock.advance(POLL_TICK));
        assert!(clock.advance(POLL_TICK));
    }
}
