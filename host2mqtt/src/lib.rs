/*!
Host telemetry and remote control over MQTT.

A small daemon that publishes host sensor readings (CPU temperature and
usage, memory usage) to an MQTT broker, exposes suspend/poweroff buttons a
home-automation hub can press, and keeps per-entity plus global availability
topics truthful across connect, disconnect, suspend and shutdown.
*/

pub mod commands;
pub mod config;
pub mod consumer;
pub mod discovery;
pub mod power;
pub mod runtime;
pub mod sensors;
pub mod transport;
