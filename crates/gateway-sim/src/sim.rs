//! Stateful weather-station gateway simulator for local development.
//!
//! Soil channels report humidity in percent and model a potted plant:
//! - Temporal coherence via random walk with mean reversion
//! - Gradual drying drift (evaporation)
//! - Per-reading sensor noise and a permanent per-channel offset
//! - A wet jump whenever the channel is watered
//!
//! Leak channels are either `Normal` or `Leaking` and only change when
//! toggled by hand.

use std::fmt;

use serde::Serialize;

const LEAK_NORMAL: &str = "Normal";
const LEAK_ALARM: &str = "Leaking";

/// Humidity added by one watering, in percent.
const WATERING_JUMP: f64 = 25.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries steadily, so plants cross a typical
    /// 30-40 % threshold within a few minutes of polling.
    Drying,
    /// Hovers near the centre with low noise. Watering should stay quiet.
    Stable,
    /// Starts wet and dries very slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }

    /// `(drift, walk_sigma, mean_reversion, noise_sigma, start)` in percent.
    fn params(self) -> (f64, f64, f64, f64, f64) {
        match self {
            Self::Drying => (-0.4, 0.5, 0.01, 1.0, 55.0),
            Self::Stable => (0.0, 0.3, 0.05, 0.5, 50.0),
            Self::Wet => (-0.05, 0.3, 0.01, 0.5, 85.0),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire shape of the gateway's live data endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct LiveData {
    pub ch_soil: Vec<SoilReading>,
    pub ch_leak: Vec<LeakReading>,
}

#[derive(Debug, Serialize)]
pub struct SoilReading {
    pub channel: String,
    pub name: String,
    pub battery: String,
    /// Percent with a trailing `%`, e.g. `"41%"`.
    pub humidity: String,
}

#[derive(Debug, Serialize)]
pub struct LeakReading {
    pub channel: String,
    pub name: String,
    pub battery: String,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Per-channel state
// ---------------------------------------------------------------------------

struct SoilChannel {
    channel: String,
    /// Current "true" soil humidity. Evolves each poll.
    base: f64,
    /// Permanent calibration offset; two sensors never read identically.
    offset: f64,
}

struct LeakChannel {
    channel: String,
    leaking: bool,
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct GatewaySim {
    soil: Vec<SoilChannel>,
    leaks: Vec<LeakChannel>,

    drift: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    center: f64,
}

impl GatewaySim {
    pub fn new(scenario: Scenario, soil_channels: &[String], leak_channels: &[String]) -> Self {
        let (drift, walk_sigma, mean_reversion, noise_sigma, start) = scenario.params();

        let soil = soil_channels
            .iter()
            .map(|channel| SoilChannel {
                channel: channel.clone(),
                base: gaussian(start, 3.0).clamp(0.0, 100.0),
                offset: gaussian(0.0, 2.0),
            })
            .collect();
        let leaks = leak_channels
            .iter()
            .map(|channel| LeakChannel {
                channel: channel.clone(),
                leaking: false,
            })
            .collect();

        Self {
            soil,
            leaks,
            drift,
            walk_sigma,
            mean_reversion,
            noise_sigma,
            center: 50.0,
        }
    }

    /// Advance every soil channel one step and report the gateway's view.
    pub fn sample(&mut self) -> LiveData {
        let (drift, walk_sigma, mean_reversion, noise_sigma, center) = (
            self.drift,
            self.walk_sigma,
            self.mean_reversion,
            self.noise_sigma,
            self.center,
        );
        let ch_soil = self
            .soil
            .iter_mut()
            .map(|s| {
                let pull = mean_reversion * (center - s.base);
                let walk = gaussian(0.0, walk_sigma);
                s.base = (s.base + drift + pull + walk).clamp(0.0, 100.0);

                let noise = gaussian(0.0, noise_sigma);
                // Whole percent; the cast also folds -0.0 into 0.
                let reading = (s.base + s.offset + noise).round().clamp(0.0, 100.0) as u8;
                SoilReading {
                    channel: s.channel.clone(),
                    name: format!("Soil CH{}", s.channel),
                    battery: "5".to_string(),
                    humidity: format!("{reading}%"),
                }
            })
            .collect();

        let ch_leak = self
            .leaks
            .iter()
            .map(|l| LeakReading {
                channel: l.channel.clone(),
                name: format!("Leak CH{}", l.channel),
                battery: "5".to_string(),
                status: if l.leaking { LEAK_ALARM } else { LEAK_NORMAL }.to_string(),
            })
            .collect();

        LiveData { ch_soil, ch_leak }
    }

    /// Soak `channel`. Returns false for an unknown channel.
    pub fn water(&mut self, channel: &str) -> bool {
        match self.soil.iter_mut().find(|s| s.channel == channel) {
            Some(s) => {
                s.base = (s.base + WATERING_JUMP).min(100.0);
                true
            }
            None => false,
        }
    }

    /// Flip a leak channel. Returns the new state, `None` if unknown.
    pub fn toggle_leak(&mut self, channel: &str) -> Option<bool> {
        let leak = self.leaks.iter_mut().find(|l| l.channel == channel)?;
        leak.leaking = !leak.leaking;
        Some(leak.leaking)
    }

    pub fn soil_count(&self) -> usize {
        self.soil.len()
    }

    pub fn leak_count(&self) -> usize {
        self.leaks.len()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
