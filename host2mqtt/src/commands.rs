//! Command consumer: actuator buttons pressed over MQTT.
//!
//! Presses arrive on the transport's delivery task, not the poll loop. The
//! registered handler therefore only flips the button's pending flag; the
//! privileged action itself is returned from the next [`Consumer::update`]
//! call so the runtime executes it on the poll-loop thread, serialized with
//! availability publication.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::{Settings, DEFAULT_HEAD_TOPIC};
use crate::consumer::{AvailabilitySet, Consumer, RuntimeRequest};
use crate::discovery::{self, title_case, AvailabilityRef, ButtonDiscovery, Device};
use crate::transport::Transport;

/// Payload a hub sends to press a button. Anything else is ignored.
pub const PAYLOAD_PRESS: &str = "press";

/// One actuator button: command topic `<base>/set`, availability topic
/// `<base>/availability`, and a pending flag the message handler sets.
pub struct MqttButton {
    name: String,
    base_topic: String,
    icon: String,
    request: RuntimeRequest,
    pending: Arc<AtomicBool>,
}

impl MqttButton {
    fn new(name: &str, base_topic: String, icon: &str, request: RuntimeRequest) -> Self {
        Self {
            name: name.to_string(),
            base_topic,
            icon: icon.to_string(),
            request,
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command_topic(&self) -> String {
        format!("{}/set", self.base_topic)
    }

    pub fn availability_topic(&self) -> String {
        format!("{}/availability", self.base_topic)
    }
}

pub struct HostCommands {
    client_name: String,
    discovery_prefix: String,
    buttons: Vec<MqttButton>,
    availability: AvailabilitySet,
}

impl HostCommands {
    pub fn new(settings: &Settings, client_name: &str) -> Self {
        let head_topic = settings.str_or("mqtt", "topic", DEFAULT_HEAD_TOPIC);
        let sub_topic = settings.str_or("commands", "sub_topic", "commands");
        let base = format!("{head_topic}/{client_name}/{sub_topic}");

        let mut this = Self {
            client_name: client_name.to_string(),
            discovery_prefix: settings.str_or("mqtt", "discovery_prefix", discovery::DEFAULT_PREFIX),
            buttons: Vec::new(),
            availability: AvailabilitySet::default(),
        };

        if settings.bool_or("commands", "suspend", false) {
            this.push_button(MqttButton::new(
                "suspend",
                format!("{base}/suspend"),
                "mdi:power-sleep",
                RuntimeRequest::Suspend,
            ));
        }
        if settings.bool_or("commands", "poweroff", false) {
            this.push_button(MqttButton::new(
                "poweroff",
                format!("{base}/poweroff"),
                "mdi:power",
                RuntimeRequest::Poweroff,
            ));
        }
        this
    }

    fn push_button(&mut self, button: MqttButton) {
        self.availability.register(button.availability_topic());
        self.buttons.push(button);
    }

    pub fn buttons(&self) -> &[MqttButton] {
        &self.buttons
    }
}

impl Consumer for HostCommands {
    fn name(&self) -> &str {
        "commands"
    }

    fn availability(&self) -> &AvailabilitySet {
        &self.availability
    }

    fn on_connect(&mut self, link: &dyn Transport) -> Result<()> {
        for button in &self.buttons {
            let config = ButtonDiscovery {
                name: format!("{} {}", title_case(&button.name), self.client_name),
                object_id: format!("{}_{}", self.client_name, button.name),
                command_topic: button.command_topic(),
                payload_press: PAYLOAD_PRESS.to_string(),
                icon: button.icon.clone(),
                unique_id: format!("{}_{}_button", self.client_name, button.name),
                device: Device::for_client(&self.client_name),
                availability: AvailabilityRef {
                    topic: button.availability_topic(),
                },
            };
            let topic = ButtonDiscovery::config_topic(
                &self.discovery_prefix,
                &self.client_name,
                &button.name,
            );
            link.publish(&topic, &serde_json::to_vec(&config)?, true)?;

            let command_topic = button.command_topic();
            link.subscribe(&command_topic)?;
            let pending = button.pending.clone();
            let name = button.name.clone();
            link.set_message_handler(
                &command_topic,
                Arc::new(move |topic, payload| {
                    // Runs on the delivery task: only flip the flag here.
                    if payload != PAYLOAD_PRESS.as_bytes() {
                        warn!(
                            %topic,
                            "unexpected payload for button press: {:?}",
                            String::from_utf8_lossy(payload)
                        );
                        return;
                    }
                    info!("button {name} pressed");
                    pending.store(true, Ordering::SeqCst);
                }),
            );
            info!(
                "registered button {} on topic {}",
                button.name, command_topic
            );
        }
        Ok(())
    }

    fn on_disconnect(&mut self, link: &dyn Transport) -> Result<()> {
        for button in &self.buttons {
            let command_topic = button.command_topic();
            link.unsubscribe(&command_topic)?;
            link.clear_message_handler(&command_topic);
        }
        Ok(())
    }

    fn update(&mut self, _link: &dyn Transport) -> Result<Vec<RuntimeRequest>> {
        let mut requests = Vec::new();
        for button in &self.buttons {
            if button.pending.swap(false, Ordering::SeqCst) {
                requests.push(button.request);
            }
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buttons_follow_the_feature_flags() {
        let settings = Settings::from_toml_str("[commands]\nsuspend = true\n").unwrap();
        let commands = HostCommands::new(&settings, "office");
        let names: Vec<&str> = commands.buttons().iter().map(|b| b.name()).collect();
        assert_eq!(names, ["suspend"]);
        assert_eq!(
            commands.availability().topics(),
            ["host2mqtt/office/commands/suspend/availability"]
        );
    }

    #[test]
    fn command_topics_hang_off_the_button_base() {
        let settings = Settings::from_toml_str(
            r#"
            [commands]
            suspend = true
            poweroff = true
            "#,
        )
        .unwrap();
        let commands = HostCommands::new(&settings, "office");
        let topics: Vec<String> = commands
            .buttons()
            .iter()
            .map(|b| b.command_topic())
            .collect();
        assert_eq!(
            topics,
            [
                "host2mqtt/office/commands/suspend/set",
                "host2mqtt/office/commands/poweroff/set"
            ]
        );
    }
}
