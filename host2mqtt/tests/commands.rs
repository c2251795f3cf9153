//! Button consumer behavior against the stub transport.

use host2mqtt::commands::HostCommands;
use host2mqtt::config::Settings;
use host2mqtt::consumer::RuntimeRequest;
use host2mqtt_devkit::ConsumerHarness;
use serde_json::Value;

const SUSPEND_CMD: &str = "host2mqtt/office/commands/suspend/set";
const POWEROFF_CMD: &str = "host2mqtt/office/commands/poweroff/set";

fn commands() -> HostCommands {
    let settings = Settings::from_toml_str(
        r#"
        [commands]
        suspend = true
        poweroff = true
        "#,
    )
    .unwrap();
    HostCommands::new(&settings, "office")
}

#[test]
fn connect_publishes_discovery_and_subscribes() {
    let harness = ConsumerHarness::new();
    let mut commands = commands();
    harness.connect(&mut commands).unwrap();

    let config: Value = harness
        .transport
        .last_json("homeassistant/button/office_commands/suspend/config")
        .unwrap()
        .expect("discovery payload");
    assert_eq!(config["command_topic"], SUSPEND_CMD);
    assert_eq!(config["payload_press"], "press");
    assert_eq!(config["icon"], "mdi:power-sleep");
    assert_eq!(config["name"], "Suspend office");

    assert_eq!(
        harness.transport.subscriptions(),
        [SUSPEND_CMD, POWEROFF_CMD]
    );
    assert!(harness.transport.has_handler(SUSPEND_CMD));
}

#[test]
fn press_defers_the_action_to_the_next_update() {
    let harness = ConsumerHarness::new();
    let mut commands = commands();
    harness.connect(&mut commands).unwrap();

    assert!(harness.press(SUSPEND_CMD));
    assert_eq!(
        harness.tick(&mut commands).unwrap(),
        [RuntimeRequest::Suspend]
    );
    // Flag is cleared after one update.
    assert!(harness.tick(&mut commands).unwrap().is_empty());
}

#[test]
fn mismatched_payload_is_ignored() {
    let harness = ConsumerHarness::new();
    let mut commands = commands();
    harness.connect(&mut commands).unwrap();

    assert!(harness.transport.simulate_message(SUSPEND_CMD, b"PRESS ME"));
    assert!(harness.tick(&mut commands).unwrap().is_empty());
}

#[test]
fn both_pending_actions_drain_in_button_order() {
    let harness = ConsumerHarness::new();
    let mut commands = commands();
    harness.connect(&mut commands).unwrap();

    harness.press(POWEROFF_CMD);
    harness.press(SUSPEND_CMD);
    assert_eq!(
        harness.tick(&mut commands).unwrap(),
        [RuntimeRequest::Suspend, RuntimeRequest::Poweroff]
    );
}

#[test]
fn disconnect_unsubscribes_and_removes_handlers() {
    let harness = ConsumerHarness::new();
    let mut commands = commands();
    harness.connect(&mut commands).unwrap();
    harness.disconnect(&mut commands).unwrap();

    assert!(harness.transport.subscriptions().is_empty());
    assert!(!harness.transport.has_handler(SUSPEND_CMD));
    assert!(!harness.press(SUSPEND_CMD));
}
