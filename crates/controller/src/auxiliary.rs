//! Auxiliary powered devices (heater, lamp, humidifier) switched through
//! Emporia smart plugs. These are only ever switched off, by the leak guard.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::EmporiaSection;

const EMPORIA_API_URL: &str = "https://api.emporiaenergy.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A device the controller can power down. Calls are best-effort.
#[async_trait]
pub trait AuxiliaryDevice: Send + Sync {
    fn name(&self) -> &str;

    async fn set_power(&self, on: bool) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Emporia cloud API
// ---------------------------------------------------------------------------

/// Tokens saved by the Emporia login flow.
#[derive(Debug, Deserialize)]
pub struct EmporiaKeys {
    pub id_token: String,
}

impl EmporiaKeys {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read Emporia keys: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse Emporia keys: {}", path.display()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceList {
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Device {
    #[serde(default)]
    manufacturer_device_id: String,
    outlet: Option<Outlet>,
    /// Sub-devices attached to a hub.
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct Outlet {
    device_gid: u64,
    outlet_on: bool,
}

/// Authenticated Emporia account session.
pub struct EmporiaClient {
    http: reqwest::Client,
    base_url: String,
    id_token: String,
}

impl EmporiaClient {
    pub fn new(base_url: &str, keys: &EmporiaKeys) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build Emporia HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            id_token: keys.id_token.clone(),
        })
    }

    async fn devices(&self) -> Result<Vec<Device>> {
        let list: DeviceList = self
            .http
            .get(format!("{}/customers/devices", self.base_url))
            .header("authtoken", &self.id_token)
            .send()
            .await
            .context("device list request failed")?
            .error_for_status()
            .context("device list rejected")?
            .json()
            .await
            .context("malformed device list")?;
        Ok(list.devices)
    }

    async fn update_outlet(&self, device_gid: u64, on: bool) -> Result<()> {
        self.http
            .put(format!("{}/devices/outlet", self.base_url))
            .header("authtoken", &self.id_token)
            .json(&Outlet {
                device_gid,
                outlet_on: on,
            })
            .send()
            .await
            .context("outlet update request failed")?
            .error_for_status()
            .context("outlet update rejected")?;
        Ok(())
    }
}

fn find_outlet<'a>(devices: &'a [Device], manufacturer_id: &str) -> Option<&'a Outlet> {
    devices.iter().find_map(|d| {
        if d.manufacturer_device_id == manufacturer_id {
            d.outlet.as_ref()
        } else {
            find_outlet(&d.devices, manufacturer_id)
        }
    })
}

pub struct EmporiaOutlet {
    name: String,
    device_gid: u64,
    client: Arc<EmporiaClient>,
}

#[async_trait]
impl AuxiliaryDevice for EmporiaOutlet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_power(&self, on: bool) -> Result<()> {
        self.client
            .update_outlet(self.device_gid, on)
            .await
            .with_context(|| format!("failed to switch {} plug", self.name))
    }
}

/// Log in with the saved tokens and resolve every configured plug.
///
/// Problems are logged and the affected plugs are left out; the controller
/// runs without them.
pub async fn connect_emporia(section: &EmporiaSection) -> Vec<Box<dyn AuxiliaryDevice>> {
    match try_connect(EMPORIA_API_URL, section).await {
        Ok(devices) => devices,
        Err(e) => {
            error!("emporia unavailable, running without smart plugs: {e:#}");
            Vec::new()
        }
    }
}

async fn try_connect(base_url: &str, section: &EmporiaSection) -> Result<Vec<Box<dyn AuxiliaryDevice>>> {
    let keys = EmporiaKeys::load(&section.keys_file)?;
    let client = Arc::new(EmporiaClient::new(base_url, &keys)?);
    let devices = client.devices().await.with_context(|| {
        format!("couldn't log in to Emporia, check {}", section.keys_file.display())
    })?;

    let mut plugs: Vec<Box<dyn AuxiliaryDevice>> = Vec::new();
    for (label, manufacturer_id) in section.plugs() {
        match find_outlet(&devices, manufacturer_id) {
            Some(outlet) => {
                info!(plug = label, device_gid = outlet.device_gid, on = outlet.outlet_on, "emporia plug found");
                plugs.push(Box::new(EmporiaOutlet {
                    name: label.to_string(),
                    device_gid: outlet.device_gid,
                    client: Arc::clone(&client),
                }));
            }
            None => {
                error!(plug = label, manufacturer_id, "emporia plug not found on account");
            }
        }
    }

    if plugs.is_empty() && !section.plugs().is_empty() {
        return Err(anyhow!("none of the configured plugs were found"));
    }
    Ok(plugs)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{closed_addr, serve};
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<Value>>>;

    fn device_list() -> Value {
        json!({
            "customerGid": 1,
            "devices": [
                {
                    "deviceGid": 100,
                    "manufacturerDeviceId": "HUB-1",
                    "model": "VUE002",
                    "outlet": null,
                    "devices": [
                        {"deviceGid": 201, "manufacturerDeviceId": "LAMP-9", "outlet": {"deviceGid": 201, "outletOn": true, "loadGid": 5}, "devices": []}
                    ]
                },
                {"deviceGid": 300, "manufacturerDeviceId": "HEAT-2", "outlet": {"deviceGid": 300, "outletOn": true}}
            ]
        })
    }

    async fn fake_emporia(seen: Seen) -> String {
        async fn devices(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
            if headers.get("authtoken").and_then(|v| v.to_str().ok()) != Some("ID") {
                return Err(StatusCode::UNAUTHORIZED);
            }
            Ok(Json(device_list()))
        }

        async fn outlet(State(seen): State<Seen>, Json(body): Json<Value>) -> StatusCode {
            let gid = body["deviceGid"].as_u64();
            seen.lock().unwrap().push(body);
            if gid == Some(300) {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }

        let router = Router::new()
            .route("/customers/devices", get(devices))
            .route("/devices/outlet", put(outlet))
            .with_state(seen);
        format!("http://{}", serve(router).await)
    }

    fn write_keys(test: &str, id_token: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "wtr-emporia-keys-{}-{test}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            json!({"id_token": id_token, "access_token": "A", "refresh_token": "R"}).to_string(),
        )
        .unwrap();
        path
    }

    fn section(keys_file: std::path::PathBuf) -> EmporiaSection {
        EmporiaSection {
            keys_file,
            heater_plug_id: Some("HEAT-2".into()),
            lamp_plug_id: Some("LAMP-9".into()),
            humidifier_plug_id: Some("MISSING".into()),
        }
    }

    #[test]
    fn find_outlet_searches_sub_devices() {
        let list: DeviceList = serde_json::from_value(device_list()).unwrap();
        assert_eq!(find_outlet(&list.devices, "LAMP-9").unwrap().device_gid, 201);
        assert_eq!(find_outlet(&list.devices, "HEAT-2").unwrap().device_gid, 300);
        assert!(find_outlet(&list.devices, "HUB-1").is_none());
        assert!(find_outlet(&list.devices, "nope").is_none());
    }

    #[tokio::test]
    async fn connect_resolves_configured_plugs_and_skips_missing() {
        let seen = Seen::default();
        let base = fake_emporia(Arc::clone(&seen)).await;
        let plugs = try_connect(&base, &section(write_keys("resolve", "ID"))).await.unwrap();

        let names: Vec<&str> = plugs.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["heater", "lamp"]);
    }

    #[tokio::test]
    async fn set_power_puts_outlet_state() {
        let seen = Seen::default();
        let base = fake_emporia(Arc::clone(&seen)).await;
        let plugs = try_connect(&base, &section(write_keys("put", "ID"))).await.unwrap();

        plugs[0].set_power(false).await.unwrap();
        assert!(plugs[1].set_power(false).await.is_err());

        let bodies = seen.lock().unwrap().clone();
        assert_eq!(bodies[0], json!({"deviceGid": 300, "outletOn": false}));
        assert_eq!(bodies[1], json!({"deviceGid": 201, "outletOn": false}));
    }

    #[tokio::test]
    async fn bad_token_fails_login() {
        let base = fake_emporia(Seen::default()).await;
        assert!(try_connect(&base, &section(write_keys("bad-token", "WRONG"))).await.is_err());
    }

    #[tokio::test]
    async fn no_matching_plugs_is_not_reported_as_login_failure() {
        let base = fake_emporia(Seen::default()).await;
        let cfg = EmporiaSection {
            heater_plug_id: Some("NOPE-1".into()),
            lamp_plug_id: None,
            humidifier_plug_id: Some("NOPE-2".into()),
            ..section(write_keys("no-match", "ID"))
        };
        let err = format!("{:#}", try_connect(&base, &cfg).await.err().unwrap());
        assert!(err.contains("none of the configured plugs"), "{err}");
        assert!(!err.contains("log in"), "{err}");
    }

    #[tokio::test]
    async fn bad_token_is_reported_as_login_failure() {
        let base = fake_emporia(Seen::default()).await;
        let err = format!(
            "{:#}",
            try_connect(&base, &section(write_keys("login-msg", "WRONG"))).await.err().unwrap()
        );
        assert!(err.contains("couldn't log in to Emporia"), "{err}");
    }

    #[tokio::test]
    async fn missing_keys_file_yields_no_devices() {
        let cfg = section(std::env::temp_dir().join("wtr-no-such-keys.json"));
        assert!(connect_emporia(&cfg).await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_api_fails_login() {
        let base = format!("http://{}", closed_addr().await);
        assert!(try_connect(&base, &section(write_keys("unreachable", "ID"))).await.is_err());
    }
}
