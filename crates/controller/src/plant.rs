//! Per-plant watering state: threshold, rest period and the relay the plant
//! owns for the lifetime of the process.
//!
//! ```text
//! Active ──[humidity <= threshold: water]──▶ Resting { elapsed: 0 }
//!   ▲                                              │
//!   └──[humidity <= threshold, elapsed reaches rest length]
//! ```
//!
//! Readings above the threshold never change state, so a plant only leaves
//! its rest period while the soil is still dry.

use crate::config::PlantEntry;
use crate::relay::Relay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestState {
    /// Normal monitoring; a dry reading waters the plant.
    Active,
    /// Watered recently; dry readings only advance the counter.
    Resting { elapsed: u32 },
}

/// What a single reading means for a plant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Above threshold, nothing to do.
    Moist,
    /// Dry but resting; the counter now stands at `elapsed`.
    StillResting { elapsed: u32 },
    /// Dry and the rest period just ran out; watering resumes next tick.
    RestOver,
    /// Dry and active: open the valve.
    Water,
}

pub struct Plant {
    name: String,
    sensor_channel: String,
    threshold_percent: u8,
    rest: RestState,
    relay: Box<dyn Relay>,
}

impl Plant {
    pub fn new(entry: &PlantEntry, relay: Box<dyn Relay>) -> Self {
        Self {
            name: entry.name.clone(),
            sensor_channel: entry.sensor_channel.clone(),
            threshold_percent: entry.threshold_percent,
            rest: RestState::Active,
            relay,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sensor_channel(&self) -> &str {
        &self.sensor_channel
    }

    pub fn threshold_percent(&self) -> u8 {
        self.threshold_percent
    }

    pub fn rest(&self) -> RestState {
        self.rest
    }

    pub fn rest_active(&self) -> bool {
        matches!(self.rest, RestState::Resting { .. })
    }

    /// Ticks spent resting so far; zero while active.
    pub fn rest_elapsed(&self) -> u32 {
        match self.rest {
            RestState::Active => 0,
            RestState::Resting { elapsed } => elapsed,
        }
    }

    pub fn relay_mut(&mut self) -> &mut dyn Relay {
        self.relay.as_mut()
    }

    /// Advance the rest state machine for one reading. `Decision::Water`
    /// leaves the state untouched; the caller waters and then calls
    /// [`Plant::begin_rest`].
    pub fn on_reading(&mut self, humidity: u8, rest_period_ticks: u32) -> Decision {
        if humidity > self.threshold_percent {
            return Decision::Moist;
        }

        match self.rest {
            RestState::Active => Decision::Water,
            RestState::Resting { elapsed } => {
                let elapsed = elapsed.saturating_add(1);
                if elapsed >= rest_period_ticks {
                    self.rest = RestState::Active;
                    Decision::RestOver
                } else {
                    self.rest = RestState::Resting { elapsed };
                    Decision::StillResting { elapsed }
                }
            }
        }
    }

    pub fn begin_rest(&mut self) {
        self.rest = RestState::Resting { elapsed: 0 };
    }
}

// ===========================================================================
// Tests
// ===========================================================================
