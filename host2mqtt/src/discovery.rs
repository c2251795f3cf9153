//! Home Assistant discovery payloads.
//!
//! Retained JSON published under `<prefix>/<component>/.../config` so the hub
//! auto-registers one entity per sensor and button, grouped under a single
//! device per host.

use serde::Serialize;

/// Default discovery-topic namespace.
pub const DEFAULT_PREFIX: &str = "homeassistant";

/// Device block shared by every entity of one host.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: String,
}

impl Device {
    pub fn for_client(client_name: &str) -> Self {
        Self {
            identifiers: vec![client_name.to_string()],
            name: client_name.to_string(),
            model: "host2mqtt".to_string(),
        }
    }
}

/// Discovery payload for one sensor entity.
#[derive(Debug, Serialize)]
pub struct SensorDiscovery {
    pub name: String,
    pub state_topic: String,
    pub unit_of_measurement: String,
    pub value_template: String,
    pub unique_id: String,
    pub device: Device,
    pub availability_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
}

impl SensorDiscovery {
    pub fn config_topic(prefix: &str, client_name: &str, sensor_name: &str) -> String {
        format!("{prefix}/sensor/{client_name}/{sensor_name}/config")
    }
}

/// Availability reference used by button discovery payloads.
#[derive(Debug, Serialize)]
pub struct AvailabilityRef {
    pub topic: String,
}

/// Discovery payload for one button entity.
#[derive(Debug, Serialize)]
pub struct ButtonDiscovery {
    pub name: String,
    pub object_id: String,
    pub command_topic: String,
    pub payload_press: String,
    pub icon: String,
    pub unique_id: String,
    pub device: Device,
    pub availability: AvailabilityRef,
}

impl ButtonDiscovery {
    pub fn config_topic(prefix: &str, client_name: &str, button_name: &str) -> String {
        format!("{prefix}/button/{client_name}_commands/{button_name}/config")
    }
}

/// Capitalize the first letter of every word, for entity display names.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut boundary = true;
    for c in text.chars() {
        if boundary && c.is_alphanumeric() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        boundary = !c.is_alphanumeric();
    }
    out
}
