//! Watering relays. The `gpio` feature gates the real rppal driver; without
//! it, a mock relay logs state changes instead of touching hardware.

use anyhow::Result;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// A single on/off actuator. Both operations are idempotent and infallible.
pub trait Relay: Send {
    fn set(&mut self, on: bool);

    fn is_on(&self) -> bool;

    fn on(&mut self) {
        self.set(true);
    }

    fn off(&mut self) {
        self.set(false);
    }
}

/// Open the relay wired to `pin` for the plant called `label`.
#[cfg(feature = "gpio")]
pub fn open(label: &str, pin: u8, active_low: bool) -> Result<Box<dyn Relay>> {
    Ok(Box::new(GpioRelay::new(label, pin, active_low)?))
}

/// Open the relay wired to `pin` for the plant called `label`.
#[cfg(not(feature = "gpio"))]
pub fn open(label: &str, pin: u8, _active_low: bool) -> Result<Box<dyn Relay>> {
    Ok(Box::new(MockRelay::new(label, pin)))
}

// ---------------------------------------------------------------------------
// Real GPIO relay (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct GpioRelay {
    label: String,
    pin: OutputPin,
    active_low: bool, // many relay boards are active-low
    on: bool,
}

#[cfg(feature = "gpio")]
impl GpioRelay {
    pub fn new(label: &str, pin_num: u8, active_low: bool) -> Result<Self> {
        let pin = Gpio::new()?.get(pin_num)?.into_output();
        let mut relay = Self {
            label: label.to_string(),
            pin,
            active_low,
            on: true,
        };
        // Fail-safe: ensure "OFF" at startup
        relay.set(false);
        Ok(relay)
    }
}

#[cfg(feature = "gpio")]
impl Relay for GpioRelay {
    fn set(&mut self, on: bool) {
        // active-low: LOW = ON, HIGH = OFF
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        if self.on != on {
            info!(plant = %self.label, "relay set {}", if on { "ON" } else { "OFF" });
        }
        self.on = on;
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

// ---------------------------------------------------------------------------
// Mock relay (development, no hardware, logs state)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct MockRelay {
    label: String,
    on: bool,
}

#[cfg(not(feature = "gpio"))]
impl MockRelay {
    pub fn new(label: &str, pin: u8) -> Self {
        info!(plant = %label, gpio = pin, "[mock-gpio] relay registered (not wired)");
        Self {
            label: label.to_string(),
            on: false,
        }
    }
}

#[cfg(not(feature = "gpio"))]
impl Relay for MockRelay {
    fn set(&mut self, on: bool) {
        self.on = on;
        info!(
            plant = %self.label,
            "[mock-gpio] relay set {}",
            if on { "ON" } else { "OFF" }
        );
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

// ===========================================================================
// Tests
// ===========================================================================
