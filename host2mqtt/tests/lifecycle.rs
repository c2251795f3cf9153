//! End-to-end lifecycle checks across both consumers, driven through the
//! same wrappers the runtime uses.

use std::thread;

use host2mqtt::commands::HostCommands;
use host2mqtt::config::Settings;
use host2mqtt::consumer::{Consumer, RuntimeRequest};
use host2mqtt::sensors::HostSensors;
use host2mqtt_devkit::{ConsumerHarness, TransportOp};

const CONFIG: &str = r#"
[mqtt]
homeassistant = true

[sensors]
enable = true
cpu_usage = true
mem_usage = true

[commands]
suspend = true
poweroff = true
"#;

fn consumers() -> (HostSensors, HostCommands) {
    let settings = Settings::from_toml_str(CONFIG).unwrap();
    (
        HostSensors::new(&settings, "office").unwrap(),
        HostCommands::new(&settings, "office"),
    )
}

#[test]
fn connect_publishes_discovery_before_availability() {
    let harness = ConsumerHarness::new();
    let (mut sensors, mut commands) = consumers();
    harness.connect(&mut sensors).unwrap();
    harness.connect(&mut commands).unwrap();

    let ops = harness.transport.ops();
    let discovery = ops
        .iter()
        .position(|op| {
            matches!(op, TransportOp::Publish { topic, .. }
                if topic == "homeassistant/sensor/office/cpu_usage/config")
        })
        .expect("discovery publish");
    let online = ops
        .iter()
        .position(|op| {
            matches!(op, TransportOp::Publish { topic, .. }
                if topic == "host2mqtt/office/sensors/cpu_usage/availability")
        })
        .expect("availability publish");
    assert!(discovery < online);

    // Every registered availability topic went online exactly once.
    for topic in sensors
        .availability()
        .topics()
        .iter()
        .chain(commands.availability().topics())
    {
        assert_eq!(harness.availability_states(topic), vec!["online"]);
    }
}

#[test]
fn disconnect_acknowledges_offline_before_returning() {
    let harness = ConsumerHarness::new();
    let (mut sensors, mut commands) = consumers();
    harness.connect(&mut sensors).unwrap();
    harness.connect(&mut commands).unwrap();
    harness.disconnect(&mut sensors).unwrap();
    harness.disconnect(&mut commands).unwrap();

    for topic in sensors
        .availability()
        .topics()
        .iter()
        .chain(commands.availability().topics())
    {
        assert_eq!(harness.availability_states(topic), vec!["online", "offline"]);
        // The offline state is QoS 1 and a flush follows it.
        assert!(harness
            .transport
            .ops()
            .iter()
            .any(|op| matches!(op, TransportOp::Publish { topic: t, acked: true, retain: true, .. }
                if t == topic)));
        assert!(harness.flushed_after_publish(topic));
    }
}

#[test]
fn suspend_and_resume_walk_availability_offline_and_back() {
    let harness = ConsumerHarness::new();
    let (mut sensors, _) = consumers();
    harness.connect(&mut sensors).unwrap();
    harness.suspend(&sensors).unwrap();
    harness.resume(&sensors).unwrap();

    for topic in sensors.availability().topics() {
        assert_eq!(
            harness.availability_states(topic),
            vec!["online", "offline", "online"]
        );
    }
}

#[test]
fn press_from_another_thread_surfaces_on_the_next_update() {
    let harness = ConsumerHarness::new();
    let (_, mut commands) = consumers();
    harness.connect(&mut commands).unwrap();

    // Handlers run on the delivery task in production; a plain thread
    // exercises the same cross-thread path.
    thread::scope(|s| {
        s.spawn(|| {
            assert!(harness.press("host2mqtt/office/commands/poweroff/set"));
        });
    });

    assert_eq!(
        harness.tick(&mut commands).unwrap(),
        [RuntimeRequest::Poweroff]
    );
    assert!(harness.tick(&mut commands).unwrap().is_empty());
}

#[test]
fn reconnect_replays_discovery_and_availability() {
    let harness = ConsumerHarness::new();
    let (_, mut commands) = consumers();
    harness.connect(&mut commands).unwrap();
    harness.transport.clear();

    // A reconnect runs the same hook again; retained messages overwrite.
    harness.connect(&mut commands).unwrap();
    assert!(harness
        .transport
        .last_json::<serde_json::Value>("homeassistant/button/office_commands/suspend/config")
        .unwrap()
        .is_some());
    assert_eq!(
        harness.availability_states("host2mqtt/office/commands/suspend/availability"),
        vec!["online"]
    );
}
