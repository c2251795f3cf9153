//! Configuration access.
//!
//! Settings are one TOML document read at startup and queried by section +
//! key with a caller-supplied default. Boolean and integer values may also be
//! given as strings ("true", "60") for parity with ini-style configs; an
//! unparsable value logs an error and falls back to the default. A missing or
//! unreadable file is fatal before anything connects.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml::{Table, Value};
use tracing::error;

/// Default head topic under which all state is published.
pub const DEFAULT_HEAD_TOPIC: &str = "host2mqtt";
/// Configuration file used when neither `--config` nor the environment
/// variable is given.
pub const DEFAULT_CONFIG_PATH: &str = "host2mqtt.toml";
/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "HOST2MQTT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {0} not found")]
    Missing(PathBuf),
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    root: Table,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let root = text.parse::<Table>().map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Parse settings from an in-memory TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        Ok(Self {
            root: text.parse()?,
        })
    }

    fn value(&self, section: &str, key: &str) -> Option<&Value> {
        self.root.get(section)?.as_table()?.get(key)
    }

    pub fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.value(section, key)?.as_str()
    }

    pub fn str_or(&self, section: &str, key: &str, default: &str) -> String {
        self.get_str(section, key).unwrap_or(default).to_string()
    }

    pub fn bool_or(&self, section: &str, key: &str, default: bool) -> bool {
        match self.value(section, key) {
            None => default,
            Some(Value::Boolean(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(other) => {
                error!("invalid value for {section}.{key}: {other}");
                default
            }
        }
    }

    pub fn u64_or(&self, section: &str, key: &str, default: u64) -> u64 {
        match self.value(section, key) {
            None => default,
            Some(Value::Integer(i)) if *i >= 0 => *i as u64,
            Some(Value::String(s)) => s.parse().unwrap_or_else(|_| {
                error!("invalid value for {section}.{key}: {s}");
                default
            }),
            Some(other) => {
                error!("invalid value for {section}.{key}: {other}");
                default
            }
        }
    }
}

/// Resolve the configuration path: `--config <path>` argument, then the
/// `HOST2MQTT_CONFIG` environment variable, then [`DEFAULT_CONFIG_PATH`].
pub fn config_path() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::from_toml_str(
            r#"
            [mqtt]
            server = "broker.local"
            port = 1884
            homeassistant = true

            [client]
            name = "office"
            update_interval = "45"

            [sensors]
            enable = "true"
            cpu_usage = false
            "#,
        )
        .unwrap()
    }

    #[test]
    fn string_lookup_with_default() {
        let s = settings();
        assert_eq!(s.str_or("mqtt", "server", "localhost"), "broker.local");
        assert_eq!(s.str_or("mqtt", "topic", "host2mqtt"), "host2mqtt");
        assert_eq!(s.get_str("mqtt", "user"), None);
    }

    #[test]
    fn bool_lookup_accepts_booleans_and_strings() {
        let s = settings();
        assert!(s.bool_or("mqtt", "homeassistant", false));
        assert!(s.bool_or("sensors", "enable", false));
        assert!(!s.bool_or("sensors", "cpu_usage", true));
        assert!(!s.bool_or("commands", "suspend", false));
    }

    #[test]
    fn int_lookup_accepts_integers_and_strings() {
        let s = settings();
        assert_eq!(s.u64_or("mqtt", "port", 1883), 1884);
        assert_eq!(s.u64_or("client", "update_interval", 60), 45);
        assert_eq!(s.u64_or("client", "missing", 60), 60);
    }

    #[test]
    fn invalid_int_falls_back_to_default() {
        let s = Settings::from_toml_str("[client]\nupdate_interval = \"soon\"\n").unwrap();
        assert_eq!(s.u64_or("client", "update_interval", 60), 60);
    }

    #[test]
    fn missing_section_uses_defaults() {
        let s = Settings::from_toml_str("").unwrap();
        assert_eq!(s.str_or("mqtt", "server", "localhost"), "localhost");
        assert!(!s.bool_or("sensors", "enable", false));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = Settings::load(Path::new("/nonexistent/host2mqtt.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }
}
