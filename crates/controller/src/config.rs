//! TOML config file loading and validation for the gateway, plants, watering
//! policy, leak guard and the optional camera / smart-plug collaborators.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use time::Time;

time::serde::format_description!(clock_time, Time, "[hour]:[minute]:[second]");

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemSection,
    pub gateway: GatewayConfig,
    pub watering: WateringSection,
    pub leak: LeakSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub plants: Vec<PlantEntry>,
    #[serde(default)]
    pub diagnostics: DiagnosticsSection,
    pub camera: Option<CameraSection>,
    pub emporia: Option<EmporiaSection>,
}

#[derive(Debug, Deserialize)]
pub struct SystemSection {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// Which transport the soil/leak readings come from. Exactly one is active.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum GatewayConfig {
    /// Gateway on the LAN, polled at `http://<ip>/get_livedata_info`.
    Local { ip: String },
    /// Vendor cloud API.
    Cloud {
        app_key: String,
        api_key: String,
        device_mac: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct WateringSection {
    pub check_interval_sec: u64,
    pub duration_sec: u64,
    /// Counted in watering-check ticks. Older configs call this
    /// `rest_period_minutes`; the unit is still ticks.
    #[serde(alias = "rest_period_minutes")]
    pub rest_period_ticks: u32,
}

#[derive(Debug, Deserialize)]
pub struct LeakSection {
    pub channel: String,
    pub check_interval_sec: u64,
}

#[derive(Debug, Deserialize)]
pub struct RelaySection {
    /// Many common relay boards are active-low.
    #[serde(default = "default_true")]
    pub active_low: bool,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self { active_low: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantEntry {
    pub name: String,
    pub sensor_channel: String,
    pub threshold_percent: u8,
    pub relay_gpio_pin: u8,
}

#[derive(Debug, Deserialize)]
pub struct DiagnosticsSection {
    #[serde(default = "default_diagnostics_interval")]
    pub interval_sec: u64,
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            interval_sec: default_diagnostics_interval(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CameraSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_capture_folder")]
    pub folder: PathBuf,
    pub interval_sec: u64,
    pub crop: Option<CropRect>,
    pub window: Option<CaptureWindow>,
    /// Rebuild an animated timelapse from every capture after each shot.
    #[serde(default = "default_true")]
    pub timelapse: bool,
    #[serde(default = "default_timelapse_file")]
    pub timelapse_file: PathBuf,
    #[serde(default = "default_capture_command")]
    pub command: String,
}

/// Region of interest as fractions of the full sensor frame.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CropRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Local time-of-day range during which captures are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CaptureWindow {
    #[serde(with = "clock_time")]
    pub start: Time,
    #[serde(with = "clock_time")]
    pub end: Time,
}

#[derive(Debug, Deserialize)]
pub struct EmporiaSection {
    #[serde(default = "default_emporia_keys")]
    pub keys_file: PathBuf,
    pub heater_plug_id: Option<String>,
    pub lamp_plug_id: Option<String>,
    pub humidifier_plug_id: Option<String>,
}

impl EmporiaSection {
    /// Configured plugs as `(label, manufacturer id)` pairs.
    pub fn plugs(&self) -> Vec<(&'static str, &str)> {
        [
            ("heater", &self.heater_plug_id),
            ("lamp", &self.lamp_plug_id),
            ("humidifier", &self.humidifier_plug_id),
        ]
        .into_iter()
        .filter_map(|(label, id)| id.as_deref().map(|id| (label, id)))
        .collect()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_diagnostics_interval() -> u64 {
    300
}

fn default_capture_folder() -> PathBuf {
    PathBuf::from("captures")
}

fn default_timelapse_file() -> PathBuf {
    PathBuf::from("timelapse.gif")
}

fn default_capture_command() -> String {
    "rpicam-still".to_string()
}

fn default_emporia_keys() -> PathBuf {
    PathBuf::from("emporia_keys.json")
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_gateway(&mut errors);
        self.validate_schedule(&mut errors);
        self.validate_plants(&mut errors);
        self.validate_camera(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_gateway(&self, errors: &mut Vec<String>) {
        match &self.gateway {
            GatewayConfig::Local { ip } => {
                if ip.trim().is_empty() {
                    errors.push("gateway: ip is empty".to_string());
                }
            }
            GatewayConfig::Cloud {
                app_key,
                api_key,
                device_mac,
            } => {
                for (field, value) in [
                    ("app_key", app_key),
                    ("api_key", api_key),
                    ("device_mac", device_mac),
                ] {
                    if value.trim().is_empty() {
                        errors.push(format!("gateway: {field} is empty"));
                    }
                }
            }
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        if self.watering.check_interval_sec == 0 {
            errors.push("watering: check_interval_sec must be positive".to_string());
        }
        if self.leak.check_interval_sec == 0 {
            errors.push("leak: check_interval_sec must be positive".to_string());
        }
        if self.leak.channel.trim().is_empty() {
            errors.push("leak: channel is empty".to_string());
        }
        if self.diagnostics.interval_sec == 0 {
            errors.push("diagnostics: interval_sec must be positive".to_string());
        }
    }

    fn validate_plants(&self, errors: &mut Vec<String>) {
        let mut seen_names: HashSet<&str> = HashSet::new();
        let mut seen_pins: HashSet<u8> = HashSet::new();

        for (i, p) in self.plants.iter().enumerate() {
            let ctx = || {
                if p.name.is_empty() {
                    format!("plants[{i}]")
                } else {
                    format!("plant '{}'", p.name)
                }
            };

            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if !seen_names.insert(&p.name) {
                errors.push(format!("{}: duplicate name", ctx()));
            }

            if p.sensor_channel.trim().is_empty() {
                errors.push(format!("{}: sensor_channel is empty", ctx()));
            }

            if p.threshold_percent > 100 {
                errors.push(format!(
                    "{}: threshold_percent {} out of range [0, 100]",
                    ctx(),
                    p.threshold_percent
                ));
            }

            if !VALID_GPIO_PINS.contains(&p.relay_gpio_pin) {
                errors.push(format!(
                    "{}: relay_gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    ctx(),
                    p.relay_gpio_pin
                ));
            } else if !seen_pins.insert(p.relay_gpio_pin) {
                errors.push(format!(
                    "{}: relay_gpio_pin {} is already used by another plant",
                    ctx(),
                    p.relay_gpio_pin
                ));
            }
        }
    }

    fn validate_camera(&self, errors: &mut Vec<String>) {
        let Some(cam) = self.camera.as_ref().filter(|c| c.enabled) else {
            return;
        };

        if cam.interval_sec == 0 {
            errors.push("camera: interval_sec must be positive".to_string());
        }
        if cam.command.trim().is_empty() {
            errors.push("camera: command is empty".to_string());
        }
        if let Some(w) = cam.window {
            if w.start >= w.end {
                errors.push(format!(
                    "camera: window start ({}) must be before end ({})",
                    w.start, w.end
                ));
            }
        }
        if let Some(c) = cam.crop {
            let in_unit = |v: f32| (0.0..=1.0).contains(&v);
            if !(in_unit(c.x) && in_unit(c.y) && in_unit(c.width) && in_unit(c.height)) {
                errors.push("camera: crop values must be fractions in [0.0, 1.0]".to_string());
            } else if c.width == 0.0 || c.height == 0.0 {
                errors.push("camera: crop width and height must be non-zero".to_string());
            } else if c.x + c.width > 1.0 || c.y + c.height > 1.0 {
                errors.push("camera: crop extends past the frame".to_string());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::time;

    const MINIMAL: &str = r#"
[gateway]
mode = "local"
ip = "192.168.1.50"

[watering]
check_interval_sec = 60
duration_sec = 10
rest_period_ticks = 30

[leak]
channel = "1"
check_interval_sec = 15

[[plants]]
name = "Lemon"
sensor_channel = "1"
threshold_percent = 40
relay_gpio_pin = 17
"#;

    fn valid_plant() -> PlantEntry {
        PlantEntry {
            name: "Lemon".into(),
            sensor_channel: "1".into(),
            threshold_percent: 40,
            relay_gpio_pin: 17,
        }
    }

    fn valid_config() -> Config {
        toml::from_str(MINIMAL).unwrap()
    }

    fn enabled_camera() -> CameraSection {
        CameraSection {
            enabled: true,
            folder: "captures".into(),
            interval_sec: 600,
            crop: None,
            window: None,
            timelapse: false,
            timelapse_file: default_timelapse_file(),
            command: "rpicam-still".into(),
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_minimal_config_applies_defaults() {
        let cfg = valid_config();
        assert_eq!(
            cfg.gateway,
            GatewayConfig::Local {
                ip: "192.168.1.50".into()
            }
        );
        assert_eq!(cfg.plants.len(), 1);
        assert_eq!(cfg.system.log_level, "info");
        assert!(cfg.system.log_file.is_none());
        assert!(cfg.relay.active_low);
        assert_eq!(cfg.diagnostics.interval_sec, 300);
        assert!(cfg.camera.is_none());
        assert!(cfg.emporia.is_none());
    }

    #[test]
    fn parse_cloud_gateway() {
        let toml_str = MINIMAL.replace(
            "mode = \"local\"\nip = \"192.168.1.50\"",
            "mode = \"cloud\"\napp_key = \"APP\"\napi_key = \"API\"\ndevice_mac = \"AA:BB\"",
        );
        let cfg: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            cfg.gateway,
            GatewayConfig::Cloud {
                app_key: "APP".into(),
                api_key: "API".into(),
                device_mac: "AA:BB".into(),
            }
        );
    }

    #[test]
    fn parse_unknown_gateway_mode_fails() {
        let toml_str = MINIMAL.replace("mode = \"local\"", "mode = \"carrier-pigeon\"");
        assert!(toml::from_str::<Config>(&toml_str).is_err());
    }

    #[test]
    fn rest_period_minutes_alias_accepted() {
        let toml_str = MINIMAL.replace("rest_period_ticks", "rest_period_minutes");
        let cfg: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg.watering.rest_period_ticks, 30);
    }

    #[test]
    fn parse_camera_window_and_crop() {
        let toml_str = format!(
            "{MINIMAL}\n[camera]\nenabled = true\ninterval_sec = 300\n\
             window = {{ start = \"07:30:00\", end = \"19:00:00\" }}\n\
             crop = {{ x = 0.25, y = 0.25, width = 0.5, height = 0.5 }}\n"
        );
        let cfg: Config = toml::from_str(&toml_str).unwrap();
        let cam = cfg.camera.unwrap();
        assert!(cam.enabled);
        assert_eq!(cam.folder, PathBuf::from("captures"));
        assert_eq!(cam.command, "rpicam-still");
        assert!(cam.timelapse);
        assert_eq!(cam.timelapse_file, PathBuf::from("timelapse.gif"));
        let window = cam.window.unwrap();
        assert_eq!(window.start, time!(7:30:00));
        assert_eq!(window.end, time!(19:00:00));
        assert_eq!(cam.crop.unwrap().width, 0.5);
    }

    #[test]
    fn emporia_plugs_lists_only_configured_ids() {
        let section = EmporiaSection {
            keys_file: default_emporia_keys(),
            heater_plug_id: Some("H-1".into()),
            lamp_plug_id: None,
            humidifier_plug_id: Some("U-3".into()),
        };
        assert_eq!(section.plugs(), vec![("heater", "H-1"), ("humidifier", "U-3")]);
    }

    // -- Validation: valid configs pass -----------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn no_plants_passes() {
        let mut cfg = valid_config();
        cfg.plants.clear();
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_duration_and_rest_pass() {
        let mut cfg = valid_config();
        cfg.watering.duration_sec = 0;
        cfg.watering.rest_period_ticks = 0;
        cfg.validate().unwrap();
    }

    #[test]
    fn disabled_camera_is_not_validated() {
        let mut cfg = valid_config();
        cfg.camera = Some(CameraSection {
            enabled: false,
            interval_sec: 0,
            ..enabled_camera()
        });
        cfg.validate().unwrap();
    }

    // -- Gateway ----------------------------------------------------------

    #[test]
    fn local_gateway_empty_ip_rejected() {
        let mut cfg = valid_config();
        cfg.gateway = GatewayConfig::Local { ip: " ".into() };
        assert_validation_err(&cfg, "gateway: ip is empty");
    }

    #[test]
    fn cloud_gateway_empty_credentials_rejected() {
        let mut cfg = valid_config();
        cfg.gateway = GatewayConfig::Cloud {
            app_key: "".into(),
            api_key: "key".into(),
            device_mac: "".into(),
        };
        assert_validation_err(&cfg, "gateway: app_key is empty");
        assert_validation_err(&cfg, "gateway: device_mac is empty");
    }

    // -- Schedule ---------------------------------------------------------

    #[test]
    fn zero_check_intervals_rejected() {
        let mut cfg = valid_config();
        cfg.watering.check_interval_sec = 0;
        cfg.leak.check_interval_sec = 0;
        assert_validation_err(&cfg, "watering: check_interval_sec must be positive");
        assert_validation_err(&cfg, "leak: check_interval_sec must be positive");
    }

    #[test]
    fn empty_leak_channel_rejected() {
        let mut cfg = valid_config();
        cfg.leak.channel = "".into();
        assert_validation_err(&cfg, "leak: channel is empty");
    }

    // -- Plants -----------------------------------------------------------

    #[test]
    fn plant_empty_name_rejected() {
        let mut cfg = valid_config();
        cfg.plants[0].name = "  ".into();
        assert_validation_err(&cfg, "name is empty");
    }

    #[test]
    fn plant_duplicate_name_rejected() {
        let mut cfg = valid_config();
        cfg.plants.push(PlantEntry {
            relay_gpio_pin: 27,
            ..valid_plant()
        });
        assert_validation_err(&cfg, "plant 'Lemon': duplicate name");
    }

    #[test]
    fn plant_empty_channel_rejected() {
        let mut cfg = valid_config();
        cfg.plants[0].sensor_channel = "".into();
        assert_validation_err(&cfg, "sensor_channel is empty");
    }

    #[test]
    fn plant_threshold_above_100_rejected() {
        let mut cfg = valid_config();
        cfg.plants[0].threshold_percent = 101;
        assert_validation_err(&cfg, "threshold_percent 101 out of range");
    }

    #[test]
    fn plant_threshold_boundaries_accepted() {
        let mut cfg = valid_config();
        cfg.plants[0].threshold_percent = 0;
        cfg.validate().unwrap();
        cfg.plants[0].threshold_percent = 100;
        cfg.validate().unwrap();
    }

    #[test]
    fn plant_gpio_pin_outside_header_rejected() {
        for pin in [0, 1, 28] {
            let mut cfg = valid_config();
            cfg.plants[0].relay_gpio_pin = pin;
            assert_validation_err(&cfg, "not a valid BCM GPIO pin");
        }
    }

    #[test]
    fn plant_duplicate_gpio_rejected() {
        let mut cfg = valid_config();
        cfg.plants.push(PlantEntry {
            name: "Orange".into(),
            sensor_channel: "2".into(),
            ..valid_plant()
        });
        assert_validation_err(&cfg, "already used by another plant");
    }

    // -- Camera -----------------------------------------------------------

    #[test]
    fn camera_window_must_be_ordered() {
        let mut cfg = valid_config();
        cfg.camera = Some(CameraSection {
            window: Some(CaptureWindow {
                start: time!(18:00:00),
                end: time!(6:00:00),
            }),
            ..enabled_camera()
        });
        assert_validation_err(&cfg, "must be before end");
    }

    #[test]
    fn camera_crop_outside_frame_rejected() {
        let mut cfg = valid_config();
        cfg.camera = Some(CameraSection {
            crop: Some(CropRect {
                x: 0.6,
                y: 0.0,
                width: 0.5,
                height: 1.0,
            }),
            ..enabled_camera()
        });
        assert_validation_err(&cfg, "crop extends past the frame");
    }

    #[test]
    fn camera_zero_interval_rejected() {
        let mut cfg = valid_config();
        cfg.camera = Some(CameraSection {
            interval_sec: 0,
            ..enabled_camera()
        });
        assert_validation_err(&cfg, "camera: interval_sec must be positive");
    }

    // -- Multiple errors reported at once ---------------------------------

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = valid_config();
        cfg.leak.channel = "".into();
        cfg.plants[0] = PlantEntry {
            name: "".into(),
            sensor_channel: "".into(),
            threshold_percent: 150,
            relay_gpio_pin: 0,
        };
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("5 errors"), "unexpected count in: {msg}");
        assert!(msg.contains("leak: channel is empty"), "missing leak error in: {msg}");
        assert!(
            msg.contains("not a valid BCM GPIO pin"),
            "missing gpio error in: {msg}"
        );
    }
}
