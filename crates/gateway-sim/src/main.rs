mod sim;

use std::env;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sim::{GatewaySim, LiveData, Scenario};

type SharedSim = Arc<Mutex<GatewaySim>>;

fn router(sim: SharedSim) -> Router {
    Router::new()
        .route("/get_livedata_info", get(livedata))
        .route("/water/{channel}", post(water))
        .route("/leak/{channel}", post(toggle_leak))
        .with_state(sim)
}

async fn livedata(State(sim): State<SharedSim>) -> Json<LiveData> {
    Json(lock(&sim).sample())
}

async fn water(State(sim): State<SharedSim>, Path(channel): Path<String>) -> StatusCode {
    if lock(&sim).water(&channel) {
        info!(channel = %channel, "soil channel watered");
        StatusCode::NO_CONTENT
    } else {
        warn!(channel = %channel, "water: unknown soil channel");
        StatusCode::NOT_FOUND
    }
}

async fn toggle_leak(
    State(sim): State<SharedSim>,
    Path(channel): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let leaking = lock(&sim).toggle_leak(&channel).ok_or(StatusCode::NOT_FOUND)?;
    info!(channel = %channel, leaking, "leak channel toggled");
    Ok(Json(json!({ "channel": channel, "leaking": leaking })))
}

/// A poisoned lock only means a handler panicked mid-sample; the state is
/// still usable for a simulator.
fn lock(sim: &SharedSim) -> std::sync::MutexGuard<'_, GatewaySim> {
    sim.lock().unwrap_or_else(|e| e.into_inner())
}

fn channels_from_env(var: &str, default: &str) -> Vec<String> {
    parse_channels(&env::var(var).unwrap_or_else(|_| default.to_string()))
}

fn parse_channels(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Env config
    let port: u16 = env::var("SIM_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let soil = channels_from_env("SIM_SOIL_CHANNELS", "1,2");
    let leaks = channels_from_env("SIM_LEAK_CHANNELS", "1");

    let sim = GatewaySim::new(scenario, &soil, &leaks);
    info!(
        %scenario,
        soil_channels = sim.soil_count(),
        leak_channels = sim.leak_count(),
        "gateway simulator ready"
    );

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(Arc::new(Mutex::new(sim))))
        .await
        .context("server error")
}

// ===========================================================================
// Tests
// ===========================================================================
