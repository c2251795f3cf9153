//! Host sensor consumer.
//!
//! Periodically samples values through [`probes::ValueProducer`]s and
//! publishes them to per-sensor state topics, plus emits retained Home
//! Assistant discovery metadata on connect. When the feature flag is off the
//! module stays constructed but empty, and every hook is a no-op.

pub mod probes;

use anyhow::{anyhow, Result};
use tracing::{debug, error, info};

use crate::config::{Settings, DEFAULT_HEAD_TOPIC};
use crate::consumer::{AvailabilitySet, Consumer, RuntimeRequest};
use crate::discovery::{self, title_case, Device, SensorDiscovery};
use crate::transport::Transport;
use probes::{CpuTempProbe, CpuUsageProbe, MemoryUsageProbe, ValueProducer};

/// One published sensor entity: metadata plus its value source.
pub struct MqttSensor {
    pub name: String,
    pub state_topic: String,
    pub unit: String,
    pub value_template: String,
    pub friendly_name: String,
    pub device_class: Option<String>,
    pub producer: Box<dyn ValueProducer>,
}

impl MqttSensor {
    pub fn availability_topic(&self) -> String {
        format!("{}/availability", self.state_topic)
    }
}

pub struct HostSensors {
    client_name: String,
    discovery_enabled: bool,
    discovery_prefix: String,
    sensors: Vec<MqttSensor>,
    availability: AvailabilitySet,
}

impl HostSensors {
    pub fn new(settings: &Settings, client_name: &str) -> Result<Self> {
        let head_topic = settings.str_or("mqtt", "topic", DEFAULT_HEAD_TOPIC);
        let sub_topic = settings.str_or("sensors", "sub_topic", "sensors");
        let base_topic = format!("{head_topic}/{client_name}/{sub_topic}");

        let mut this = Self::empty(
            client_name,
            settings.bool_or("mqtt", "homeassistant", false),
            &settings.str_or("mqtt", "discovery_prefix", discovery::DEFAULT_PREFIX),
        );

        if !settings.bool_or("sensors", "enable", false) {
            info!("sensors disabled");
            return Ok(this);
        }
        info!("publishing sensor data under {base_topic}");

        if settings.bool_or("sensors", "cpu_temp", false) {
            let label = settings.get_str("sensors", "cpu_temp_sensor").ok_or_else(|| {
                anyhow!(
                    "sensors.cpu_temp_sensor must name a temperature component \
                     when sensors.cpu_temp is enabled"
                )
            })?;
            this.push_sensor(MqttSensor {
                name: "cpu_temp".into(),
                state_topic: format!("{base_topic}/cpu_temp"),
                unit: "°C".into(),
                value_template: "{{ value | float | round(1) }}".into(),
                friendly_name: format!("{} CPU Temperature", title_case(client_name)),
                device_class: Some("temperature".into()),
                producer: Box::new(CpuTempProbe::new(label)),
            });
        }
        if settings.bool_or("sensors", "cpu_usage", false) {
            this.push_sensor(MqttSensor {
                name: "cpu_usage".into(),
                state_topic: format!("{base_topic}/cpu_usage"),
                unit: "%".into(),
                value_template: "{{ value | int }}".into(),
                friendly_name: format!("{} CPU Usage", title_case(client_name)),
                device_class: None,
                producer: Box::new(CpuUsageProbe::new()),
            });
        }
        if settings.bool_or("sensors", "mem_usage", false) {
            this.push_sensor(MqttSensor {
                name: "mem_usage".into(),
                state_topic: format!("{base_topic}/mem_usage"),
                unit: "%".into(),
                value_template: "{{ value | int }}".into(),
                friendly_name: format!("{} Memory Usage", title_case(client_name)),
                device_class: None,
                producer: Box::new(MemoryUsageProbe::new()),
            });
        }

        Ok(this)
    }

    /// Start from an empty consumer, for assembling custom sensor sets with
    /// [`HostSensors::push_sensor`].
    pub fn empty(client_name: &str, discovery_enabled: bool, discovery_prefix: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
            discovery_enabled,
            discovery_prefix: discovery_prefix.to_string(),
            sensors: Vec::new(),
            availability: AvailabilitySet::default(),
        }
    }

    /// Availability topics exist only for discovered entities; without a hub
    /// watching them nobody consumes the retained online/offline state.
    pub fn push_sensor(&mut self, sensor: MqttSensor) {
        if self.discovery_enabled {
            self.availability.register(sensor.availability_topic());
        }
        self.sensors.push(sensor);
    }

    pub fn sensors(&self) -> &[MqttSensor] {
        &self.sensors
    }
}

impl Consumer for HostSensors {
    fn name(&self) -> &str {
        "sensors"
    }

    fn availability(&self) -> &AvailabilitySet {
        &self.availability
    }

    fn on_connect(&mut self, link: &dyn Transport) -> Result<()> {
        if self.sensors.is_empty() {
            return Ok(());
        }
        if !self.discovery_enabled {
            debug!("homeassistant discovery disabled");
            return Ok(());
        }
        for sensor in &self.sensors {
            let payload = SensorDiscovery {
                name: sensor.friendly_name.clone(),
                state_topic: sensor.state_topic.clone(),
                unit_of_measurement: sensor.unit.clone(),
                value_template: sensor.value_template.clone(),
                unique_id: format!("{}_{}", self.client_name, sensor.name),
                device: Device::for_client(&self.client_name),
                availability_topic: sensor.availability_topic(),
                device_class: sensor.device_class.clone(),
            };
            let topic = SensorDiscovery::config_topic(
                &self.discovery_prefix,
                &self.client_name,
                &sensor.name,
            );
            link.publish(&topic, &serde_json::to_vec(&payload)?, true)?;
        }
        Ok(())
    }

    fn on_disconnect(&mut self, link: &dyn Transport) -> Result<()> {
        // Clear the state topics so the hub does not show stale readings
        // while we are gone.
        for sensor in &self.sensors {
            link.publish(&sensor.state_topic, b"", false)?;
        }
        Ok(())
    }

    fn update(&mut self, link: &dyn Transport) -> Result<Vec<RuntimeRequest>> {
        for sensor in &mut self.sensors {
            match sensor.producer.produce() {
                Ok(Some(value)) => {
                    debug!(sensor = %sensor.name, %value, "publishing");
                    if let Err(e) = link.publish(&sensor.state_topic, value.as_bytes(), false) {
                        error!("failed to publish sensor {}: {e}", sensor.name);
                    }
                }
                Ok(None) => debug!(sensor = %sensor.name, "no value available yet"),
                Err(e) => error!("failed to read sensor {}: {e:#}", sensor.name),
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_module_has_no_sensors_and_no_availability() {
        let settings = Settings::from_toml_str("[sensors]\nenable = false\n").unwrap();
        let sensors = HostSensors::new(&settings, "test").unwrap();
        assert!(sensors.sensors().is_empty());
        assert!(sensors.availability().is_empty());
    }

    #[test]
    fn configured_sensors_come_from_the_feature_flags() {
        let settings = Settings::from_toml_str(
            r#"
            [mqtt]
            homeassistant = true

            [sensors]
            enable = true
            cpu_usage = true
            mem_usage = true
            "#,
        )
        .unwrap();
        let sensors = HostSensors::new(&settings, "office").unwrap();
        let names: Vec<&str> = sensors.sensors().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["cpu_usage", "mem_usage"]);
        assert_eq!(sensors.availability().topics().len(), 2);
    }

    #[test]
    fn availability_follows_the_discovery_flag() {
        let settings = Settings::from_toml_str(
            r#"
            [sensors]
            enable = true
            cpu_usage = true
            mem_usage = true
            "#,
        )
        .unwrap();
        let sensors = HostSensors::new(&settings, "office").unwrap();
        assert_eq!(sensors.sensors().len(), 2);
        assert!(sensors.availability().is_empty());
    }

    #[test]
    fn cpu_temp_without_component_label_is_a_config_error() {
        let settings = Settings::from_toml_str(
            r#"
            [sensors]
            enable = true
            cpu_temp = true
            "#,
        )
        .unwrap();
        assert!(HostSensors::new(&settings, "office").is_err());
    }
}
