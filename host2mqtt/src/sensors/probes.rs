//! Concrete sensor value sources.
//!
//! Each probe exposes exactly one call: produce the current value, report
//! that no value is available yet (warm-up), or fail. Probe failures are
//! per-tick; the sensor module logs them and moves on to the next sensor.

use anyhow::{bail, Result};
use sysinfo::{Components, System};

/// A source of sensor readings, polled once per update interval.
pub trait ValueProducer: Send {
    /// Current value as the raw payload string, or `None` while warming up.
    fn produce(&mut self) -> Result<Option<String>>;
}

/// Global CPU usage percentage.
///
/// Usage is computed against the previous refresh, so the first sample only
/// establishes the baseline and reports no value.
pub struct CpuUsageProbe {
    sys: System,
    primed: bool,
}

impl CpuUsageProbe {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            primed: false,
        }
    }
}

impl Default for CpuUsageProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueProducer for CpuUsageProbe {
    fn produce(&mut self) -> Result<Option<String>> {
        self.sys.refresh_cpu_usage();
        if !self.primed {
            self.primed = true;
            return Ok(None);
        }
        Ok(Some(format!("{:.0}", self.sys.global_cpu_info().cpu_usage())))
    }
}

/// Temperature of one hardware-monitor component, matched by label
/// (e.g. "coretemp Package id 0").
pub struct CpuTempProbe {
    components: Components,
    label: String,
}

impl CpuTempProbe {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
            label: label.into(),
        }
    }
}

impl ValueProducer for CpuTempProbe {
    fn produce(&mut self) -> Result<Option<String>> {
        for component in self.components.list_mut() {
            if component.label() == self.label {
                component.refresh();
                return Ok(Some(format!("{:.1}", component.temperature())));
            }
        }
        let available: Vec<&str> = self.components.list().iter().map(|c| c.label()).collect();
        bail!(
            "temperature component {:?} not found, available: {:?}",
            self.label,
            available
        );
    }
}

/// Used memory percentage.
pub struct MemoryUsageProbe {
    sys: System,
}

impl MemoryUsageProbe {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for MemoryUsageProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueProducer for MemoryUsageProbe {
    fn produce(&mut self) -> Result<Option<String>> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            bail!("total memory reported as zero");
        }
        let percent = self.sys.used_memory() as f64 / total as f64 * 100.0;
        Ok(Some(format!("{percent:.0}")))
    }
}
