//! Watering check: reads each plant's soil humidity and drives its relay
//! through the rest state machine in [`crate::plant`].

use std::time::Duration;

use tracing::info;

use crate::gateway::SensorGateway;
use crate::plant::{Decision, Plant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WateringPolicy {
    /// How long the valve stays open per watering.
    pub duration: Duration,
    /// Dry ticks to skip after a watering.
    pub rest_period_ticks: u32,
}

/// One watering-check tick over every plant, in configuration order.
pub async fn check_plants(gateway: &SensorGateway, plants: &mut [Plant], policy: &WateringPolicy) {
    for plant in plants.iter_mut() {
        let humidity = gateway.humidity(plant.sensor_channel()).await;
        apply_reading(plant, humidity, policy).await;
    }
}

/// Act on one humidity reading for `plant`.
pub async fn apply_reading(plant: &mut Plant, humidity: u8, policy: &WateringPolicy) -> Decision {
    info!(
        plant = %plant.name(),
        humidity,
        resting = plant.rest_active(),
        rest_elapsed = plant.rest_elapsed(),
        "soil humidity"
    );

    let decision = plant.on_reading(humidity, policy.rest_period_ticks);
    match decision {
        Decision::Moist => {}
        Decision::StillResting { elapsed } => {
            info!(
                plant = %plant.name(),
                humidity,
                threshold = plant.threshold_percent(),
                elapsed,
                rest_period = policy.rest_period_ticks,
                "at or below threshold, rest period active, skipping watering"
            );
        }
        Decision::RestOver => {
            info!(plant = %plant.name(), humidity, "rest period over");
        }
        Decision::Water => {
            info!(
                plant = %plant.name(),
                humidity,
                threshold = plant.threshold_percent(),
                "at or below threshold, watering"
            );
            water(plant, policy.duration).await;
            plant.begin_rest();
        }
    }
    decision
}

/// Open the valve, hold it for `duration`, close it.
///
/// The hold is awaited inline by the scheduler's job, so no other job (the
/// leak check included) runs until the valve is closed again.
pub async fn water(plant: &mut Plant, duration: Duration) {
    info!(plant = %plant.name(), duration_sec = duration.as_secs(), "starting watering");
    plant.relay_mut().on();
    tokio::time::sleep(duration).await;
    plant.relay_mut().off();
    info!(plant = %plant.name(), "watering done");
}

// ===========================================================================
// Tests
// ===========================================================================
