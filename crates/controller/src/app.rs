//! Application context: everything the jobs operate on, built once from the
//! validated config and handed to the scheduler as its [`JobRunner`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use time::UtcOffset;
use tracing::{error, info, warn};

use crate::auxiliary::{self, AuxiliaryDevice};
use crate::camera::Camera;
use crate::config::Config;
use crate::diagnostics::CpuProbe;
use crate::gateway::SensorGateway;
use crate::leak;
use crate::plant::Plant;
use crate::relay;
use crate::scheduler::{Job, JobOutcome, JobRunner, Scheduler};
use crate::watering::{self, WateringPolicy};

pub struct AppContext {
    gateway: SensorGateway,
    plants: Vec<Plant>,
    auxiliaries: Vec<Box<dyn AuxiliaryDevice>>,
    watering: WateringPolicy,
    leak_channel: String,
    camera: Option<Camera>,
    diagnostics: CpuProbe,
}

impl AppContext {
    /// Open every relay (all start OFF), select the gateway transport and
    /// connect the optional collaborators. Only relay and gateway setup can
    /// fail; a missing camera or smart plug is logged and left out.
    pub async fn build(cfg: &Config, offset: UtcOffset) -> Result<Self> {
        let gateway = SensorGateway::from_config(&cfg.gateway)?;

        let mut plants = Vec::with_capacity(cfg.plants.len());
        for entry in &cfg.plants {
            let relay = relay::open(&entry.name, entry.relay_gpio_pin, cfg.relay.active_low)
                .with_context(|| format!("failed to open relay for plant '{}'", entry.name))?;
            info!(
                plant = %entry.name,
                channel = %entry.sensor_channel,
                threshold = entry.threshold_percent,
                gpio = entry.relay_gpio_pin,
                "plant registered"
            );
            plants.push(Plant::new(entry, relay));
        }
        if plants.is_empty() {
            warn!("no plants configured, watering checks will do nothing");
        }

        let auxiliaries = match &cfg.emporia {
            Some(section) => auxiliary::connect_emporia(section).await,
            None => Vec::new(),
        };

        let camera = match cfg.camera.as_ref().filter(|c| c.enabled) {
            Some(section) => match Camera::from_config(section, offset) {
                Ok(camera) => Some(camera),
                Err(e) => {
                    error!("camera disabled: {e:#}");
                    None
                }
            },
            None => None,
        };

        info!(
            gateway = gateway.mode(),
            plants = plants.len(),
            auxiliaries = auxiliaries.len(),
            camera = camera.is_some(),
            "controller ready"
        );

        Ok(Self {
            gateway,
            plants,
            auxiliaries,
            watering: WateringPolicy {
                duration: Duration::from_secs(cfg.watering.duration_sec),
                rest_period_ticks: cfg.watering.rest_period_ticks,
            },
            leak_channel: cfg.leak.channel.clone(),
            camera,
            diagnostics: CpuProbe::new(),
        })
    }

    /// The periodic jobs for this context. The camera job is only scheduled
    /// when a camera was actually set up.
    pub fn schedule(&self, cfg: &Config) -> Scheduler {
        let secs = Duration::from_secs;
        let mut scheduler = Scheduler::new()
            .every(secs(cfg.watering.check_interval_sec), Job::Watering)
            .every(secs(cfg.leak.check_interval_sec), Job::LeakCheck)
            .every(secs(cfg.diagnostics.interval_sec), Job::Diagnostics);
        if let (Some(_), Some(section)) = (&self.camera, &cfg.camera) {
            scheduler = scheduler.every(secs(section.interval_sec), Job::Camera);
        }
        scheduler
    }
}

#[async_trait]
impl JobRunner for AppContext {
    async fn run(&mut self, job: Job) -> JobOutcome {
        match job {
            Job::Watering => {
                watering::check_plants(&self.gateway, &mut self.plants, &self.watering).await;
                JobOutcome::Continue
            }
            Job::LeakCheck => {
                leak::check_for_leak(
                    &self.gateway,
                    &self.leak_channel,
                    &mut self.plants,
                    &self.auxiliaries,
                )
                .await
            }
            Job::Diagnostics => {
                self.diagnostics.report();
                JobOutcome::Continue
            }
            Job::Camera => {
                if let Some(camera) = &self.camera {
                    camera.tick().await;
                }
                JobOutcome::Continue
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
