//! Leak guard: polls the leak sensor and, on a confirmed leak, de-energises
//! every relay and powers down the auxiliary devices. A leak is terminal;
//! the scheduler stops after the shutdown sequence.

use tracing::{error, info};

use crate::auxiliary::AuxiliaryDevice;
use crate::gateway::SensorGateway;
use crate::plant::Plant;
use crate::scheduler::JobOutcome;

/// Poll the leak sensor on `channel`; shut everything down if it is wet.
pub async fn check_for_leak(
    gateway: &SensorGateway,
    channel: &str,
    plants: &mut [Plant],
    auxiliaries: &[Box<dyn AuxiliaryDevice>],
) -> JobOutcome {
    if !gateway.is_leaking(channel).await {
        return JobOutcome::Continue;
    }

    error!(fatal = true, channel, "leak detected!");
    emergency_shutdown(plants, auxiliaries).await;
    JobOutcome::Shutdown
}

/// Relays first (local, cannot fail), then each auxiliary device in turn.
/// A device that cannot be reached is logged and skipped.
pub async fn emergency_shutdown(plants: &mut [Plant], auxiliaries: &[Box<dyn AuxiliaryDevice>]) {
    for plant in plants.iter_mut() {
        plant.relay_mut().off();
        info!(plant = %plant.name(), "relay forced off");
    }

    for device in auxiliaries {
        match device.set_power(false).await {
            Ok(()) => info!(device = device.name(), "auxiliary device powered off"),
            Err(e) => error!(device = device.name(), "failed to power off auxiliary device: {e:#}"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
