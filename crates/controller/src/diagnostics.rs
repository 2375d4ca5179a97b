//! Periodic host health report. On a Pi the interesting number is the SoC
//! temperature, which climbs when the enclosure gets warm.

use sysinfo::Components;
use tracing::{info, warn};

/// Sensor labels that identify the CPU package, lowercase.
const CPU_LABEL_HINTS: [&str; 3] = ["cpu", "soc", "package"];

pub struct CpuProbe {
    components: Components,
}

impl CpuProbe {
    pub fn new() -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
        }
    }

    /// Current `(label, °C)` for every temperature sensor the kernel exposes.
    pub fn readings(&mut self) -> Vec<(String, f32)> {
        self.components.refresh();
        self.components
            .list()
            .iter()
            .map(|c| (c.label().to_string(), c.temperature()))
            .filter(|(_, t)| t.is_finite())
            .collect()
    }

    pub fn report(&mut self) {
        let readings = self.readings();
        match cpu_temperature(&readings) {
            Some((label, celsius)) => {
                info!(sensor = %label, celsius, "cpu temperature")
            }
            None => warn!("no temperature sensors found"),
        }
    }
}

/// Pick the CPU sensor by label, falling back to the hottest sensor.
pub fn cpu_temperature(readings: &[(String, f32)]) -> Option<(&str, f32)> {
    let by_label = readings.iter().find(|(label, _)| {
        let label = label.to_lowercase();
        CPU_LABEL_HINTS.iter().any(|hint| label.contains(hint))
    });
    by_label
        .or_else(|| readings.iter().max_by(|a, b| a.1.total_cmp(&b.1)))
        .map(|(label, t)| (label.as_str(), *t))
}
