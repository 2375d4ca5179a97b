//! Soil-moisture and leak readings from the weather-station gateway.
//!
//! Two transports provide the same capability: the gateway's own HTTP
//! endpoint on the LAN, or the vendor cloud API. Callers only see
//! [`SensorGateway::humidity`] and [`SensorGateway::is_leaking`]; every
//! transport or payload problem is logged and turned into a fail-safe value
//! that never triggers watering or an emergency stop:
//!
//! | query        | on failure |
//! |--------------|------------|
//! | humidity     | 100 %      |
//! | leak status  | not leaking |

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::GatewayConfig;

/// Humidity reported when no trustworthy reading is available.
pub const SATURATED_PERCENT: u8 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CLOUD_API_URL: &str = "https://api.ecowitt.net/api/v3/device/info";

/// The only cloud status message that carries usable data.
const CLOUD_SUCCESS: &str = "success";

/// Local leak status meaning "dry".
const LEAK_NORMAL: &str = "Normal";

/// Cloud leak value meaning "wet".
const CLOUD_LEAKING: &str = "1";

// ---------------------------------------------------------------------------
// Public gateway
// ---------------------------------------------------------------------------

pub enum SensorGateway {
    Local(LocalGateway),
    Cloud(CloudGateway),
}

impl SensorGateway {
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self> {
        let client = http_client(REQUEST_TIMEOUT)?;

        Ok(match cfg {
            GatewayConfig::Local { ip } => Self::Local(LocalGateway::new(client, ip)),
            GatewayConfig::Cloud {
                app_key,
                api_key,
                device_mac,
            } => Self::Cloud(CloudGateway::new(
                client,
                CLOUD_API_URL,
                app_key,
                api_key,
                device_mac,
            )),
        })
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Cloud(_) => "cloud",
        }
    }

    /// Soil humidity in percent for `channel`, or [`SATURATED_PERCENT`] when
    /// the reading could not be obtained.
    pub async fn humidity(&self, channel: &str) -> u8 {
        let reading = match self {
            Self::Local(g) => g.humidity(channel).await,
            Self::Cloud(g) => g.humidity(channel).await,
        };
        reading.unwrap_or_else(|e| {
            error!(channel, mode = self.mode(), "error fetching soil humidity: {e:#}");
            SATURATED_PERCENT
        })
    }

    /// Whether the leak sensor on `channel` reports water. A failed query
    /// reports no leak.
    pub async fn is_leaking(&self, channel: &str) -> bool {
        let status = match self {
            Self::Local(g) => g.is_leaking(channel).await,
            Self::Cloud(g) => g.is_leaking(channel).await,
        };
        status.unwrap_or_else(|e| {
            error!(channel, mode = self.mode(), "error fetching leak status: {e:#}");
            false
        })
    }
}

/// HTTP client for gateway queries. A request still running after
/// `timeout` fails like any other transport error.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build gateway HTTP client")
}

async fn fetch_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let response = request.send().await.context("request failed")?;
    let response = response.error_for_status().context("bad HTTP status")?;
    response.json::<T>().await.context("malformed response body")
}

// ---------------------------------------------------------------------------
// Local transport
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LiveData {
    #[serde(default)]
    ch_soil: Vec<SoilChannel>,
    #[serde(default)]
    ch_leak: Vec<LeakChannel>,
}

#[derive(Debug, Deserialize)]
struct SoilChannel {
    channel: String,
    /// Percentage string such as `"41%"`.
    humidity: String,
}

#[derive(Debug, Deserialize)]
struct LeakChannel {
    channel: String,
    status: String,
}

pub struct LocalGateway {
    client: reqwest::Client,
    url: String,
}

impl LocalGateway {
    /// `host` is the gateway address, optionally with a port.
    pub fn new(client: reqwest::Client, host: &str) -> Self {
        Self {
            client,
            url: format!("http://{host}/get_livedata_info"),
        }
    }

    async fn live_data(&self) -> Result<LiveData> {
        debug!(url = %self.url, "fetching live data");
        fetch_json(self.client.get(&self.url))
            .await
            .with_context(|| format!("error fetching {}", self.url))
    }

    async fn humidity(&self, channel: &str) -> Result<u8> {
        local_humidity(&self.live_data().await?, channel)
    }

    async fn is_leaking(&self, channel: &str) -> Result<bool> {
        local_leak(&self.live_data().await?, channel)
    }
}

fn local_humidity(data: &LiveData, channel: &str) -> Result<u8> {
    let sensor = data
        .ch_soil
        .iter()
        .find(|s| s.channel == channel)
        .ok_or_else(|| anyhow!("no soil sensor on channel {channel}"))?;
    parse_percent(sensor.humidity.trim().trim_end_matches('%'))
}

fn local_leak(data: &LiveData, channel: &str) -> Result<bool> {
    let sensor = data
        .ch_leak
        .iter()
        .find(|s| s.channel == channel)
        .ok_or_else(|| anyhow!("no leak sensor on channel {channel}"))?;
    Ok(sensor.status != LEAK_NORMAL)
}

fn parse_percent(text: &str) -> Result<u8> {
    let value: u8 = text
        .trim()
        .parse()
        .with_context(|| format!("humidity {text:?} is not an integer percentage"))?;
    if value > 100 {
        bail!("humidity {value}% out of range");
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Cloud transport
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CloudResponse {
    msg: String,
    #[serde(default)]
    data: Value,
}

pub struct CloudGateway {
    client: reqwest::Client,
    url: String,
    app_key: String,
    api_key: String,
    device_mac: String,
}

impl CloudGateway {
    pub fn new(
        client: reqwest::Client,
        url: &str,
        app_key: &str,
        api_key: &str,
        device_mac: &str,
    ) -> Self {
        Self {
            client,
            url: url.to_string(),
            app_key: app_key.to_string(),
            api_key: api_key.to_string(),
            device_mac: device_mac.to_string(),
        }
    }

    /// Fetch the device info and unwrap its payload. Any status message other
    /// than "success" is an upstream error.
    async fn device_info(&self) -> Result<Value> {
        // The query string carries credentials; only the endpoint is logged.
        debug!(url = %self.url, "fetching device info");
        let request = self.client.get(&self.url).query(&[
            ("application_key", self.app_key.as_str()),
            ("api_key", self.api_key.as_str()),
            ("mac", self.device_mac.as_str()),
        ]);
        let response: CloudResponse = fetch_json(request)
            .await
            .with_context(|| format!("error fetching {}", self.url))?;
        cloud_payload(response)
    }

    async fn humidity(&self, channel: &str) -> Result<u8> {
        cloud_humidity(&self.device_info().await?, channel)
    }

    async fn is_leaking(&self, channel: &str) -> Result<bool> {
        cloud_leak(&self.device_info().await?, channel)
    }
}

fn cloud_payload(response: CloudResponse) -> Result<Value> {
    if response.msg != CLOUD_SUCCESS {
        bail!("upstream error: {}", Value::String(response.msg));
    }
    Ok(response.data)
}

fn cloud_humidity(data: &Value, channel: &str) -> Result<u8> {
    let key = format!("soil_ch{channel}");
    let value = lookup(data, &["last_update", &key, "soilmoisture", "value"])
        .ok_or_else(|| anyhow!("no soil moisture for {key}"))?;
    match value {
        Value::Number(n) => {
            let percent = n
                .as_f64()
                .map(f64::trunc)
                .filter(|p| (0.0..=100.0).contains(p))
                .ok_or_else(|| anyhow!("humidity {n} out of range"))?;
            Ok(percent as u8)
        }
        Value::String(s) => parse_percent(s),
        other => bail!("unexpected humidity value {other}"),
    }
}

fn cloud_leak(data: &Value, channel: &str) -> Result<bool> {
    let key = format!("leak_ch{channel}");
    let value = lookup(data, &["last_update", "water_leak", &key, "value"])
        .ok_or_else(|| anyhow!("no leak status for {key}"))?;
    Ok(value.as_str() == Some(CLOUD_LEAKING))
}

fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, key| node.get(key))
}

// ===========================================================================
// Tests
// ===========================================================================
