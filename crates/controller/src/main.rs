mod app;
mod auxiliary;
mod camera;
mod config;
mod diagnostics;
mod gateway;
mod leak;
mod logging;
mod plant;
mod relay;
mod scheduler;
mod watering;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::env;
use time::error::IndeterminateOffset;
use time::UtcOffset;
use tracing::{error, info, warn};

use app::AppContext;
use scheduler::ShutdownReason;

fn main() -> Result<()> {
    // Must be read before any runtime threads exist.
    let (offset, offset_err) = local_offset_or_utc(UtcOffset::current_local_offset());

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    logging::init(&cfg.system)?;
    info!(config = %config_path, "wtr controller starting");
    if let Some(e) = offset_err {
        warn!("local UTC offset unavailable ({e}), camera window uses UTC");
    }

    // One thread: jobs run strictly one at a time.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let reason = runtime.block_on(async {
        let mut ctx = AppContext::build(&cfg, offset).await?;
        let scheduler = ctx.schedule(&cfg);
        anyhow::Ok(scheduler.run(&mut ctx).await)
    })?;

    match reason {
        ShutdownReason::RequestedBy(job) => {
            error!(fatal = true, %job, "controller halted, restart manually once it is safe");
        }
    }
    Ok(())
}

/// Falls back to UTC, keeping the lookup error so it can be logged once
/// logging is up.
fn local_offset_or_utc(
    found: Result<UtcOffset, IndeterminateOffset>,
) -> (UtcOffset, Option<IndeterminateOffset>) {
    match found {
        Ok(offset) => (offset, None),
        Err(e) => (UtcOffset::UTC, Some(e)),
    }
}
