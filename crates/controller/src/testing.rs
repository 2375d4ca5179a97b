//! Test doubles shared by the module tests: relays and smart plugs that
//! record every command into one ordered log, plus an in-process HTTP server
//! for the gateway and smart-plug clients.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;

use crate::auxiliary::AuxiliaryDevice;
use crate::relay::Relay;

/// Ordered record of actuator commands, e.g. `"relay Lemon OFF"`.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct RecordingRelay {
    label: String,
    on: Arc<Mutex<bool>>,
    log: EventLog,
}

impl RecordingRelay {
    /// Returns the relay plus a handle that observes its state after the
    /// relay has been moved into a plant.
    pub fn new(label: &str, log: &EventLog) -> (Self, Arc<Mutex<bool>>) {
        let on = Arc::new(Mutex::new(false));
        let relay = Self {
            label: label.to_string(),
            on: Arc::clone(&on),
            log: log.clone(),
        };
        (relay, on)
    }
}

impl Relay for RecordingRelay {
    fn set(&mut self, on: bool) {
        *self.on.lock().unwrap() = on;
        self.log.push(format!(
            "relay {} {}",
            self.label,
            if on { "ON" } else { "OFF" }
        ));
    }

    fn is_on(&self) -> bool {
        *self.on.lock().unwrap()
    }
}

pub struct RecordingAux {
    name: String,
    fail: bool,
    log: EventLog,
}

impl RecordingAux {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            log: log.clone(),
        }
    }

    /// A device whose every command errors after being logged.
    pub fn failing(name: &str, log: &EventLog) -> Self {
        Self {
            fail: true,
            ..Self::new(name, log)
        }
    }
}

#[async_trait]
impl AuxiliaryDevice for RecordingAux {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_power(&self, on: bool) -> Result<()> {
        self.log.push(format!(
            "aux {} {}",
            self.name,
            if on { "ON" } else { "OFF" }
        ));
        if self.fail {
            bail!("{} unreachable", self.name);
        }
        Ok(())
    }
}

/// Serve `router` on an ephemeral localhost port for the rest of the test.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A localhost address with nothing listening on it.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
