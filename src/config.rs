use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rules::{
    AlertRules, CameraRule, TrackingRules, ZoneFilter, DEFAULT_DISPLACEMENT_THRESHOLD,
    LABEL_WILDCARD,
};

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_CLIENT_ID: &str = "fepd";
const DEFAULT_FRIGATE_PORT: u16 = 5000;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    mqtt: Option<MqttConfigFile>,
    frigate: Option<FrigateConfigFile>,

    #[serde(default)]
    alerts: Vec<AlertEntryFile>,

    alert_rules: Option<AlertRulesFile>,
    object_tracking: Option<ObjectTrackingFile>,
    logging: Option<LoggingConfigFile>,
}

#[derive(Debug, Default, Deserialize)]
struct MqttConfigFile {
    host: Option<String>,
    port: Option<u16>,
    listen_topic: Option<String>,
    alert_topic: Option<String>,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FrigateConfigFile {
    host: Option<String>,
    port: Option<u16>,
    ssl: Option<bool>,
    verify_artifacts: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct AlertEntryFile {
    camera: String,

    #[serde(default)]
    labels: Vec<String>,

    zones: Option<ZonesFile>,
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ZonesFile {
    #[serde(default)]
    require: Vec<ZoneFilterFile>,

    #[serde(default)]
    ignore: Vec<ZoneFilterFile>,
}

/// A zone filter is either a bare zone name (applies to every label) or a
/// table with an explicit label scope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ZoneFilterFile {
    Name(String),
    Scoped {
        zone: String,
        #[serde(default)]
        labels: Vec<String>,
    },
}

impl ZoneFilterFile {
    fn into_filter(self) -> ZoneFilter {
        match self {
            Self::Name(zone) => ZoneFilter {
                zone,
                labels: vec![LABEL_WILDCARD.to_string()],
            },
            Self::Scoped { zone, labels } => ZoneFilter {
                zone,
                labels: if labels.is_empty() {
                    vec![LABEL_WILDCARD.to_string()]
                } else {
                    labels
                },
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AlertRulesFile {
    min_event_duration: Option<RawDuration>,
    max_event_duration: Option<RawDuration>,
    snapshot: Option<bool>,
    video: Option<bool>,
    cooldown: Option<CooldownFile>,
}

#[derive(Debug, Default, Deserialize)]
struct CooldownFile {
    camera: Option<RawDuration>,
    label: Option<RawDuration>,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectTrackingFile {
    enabled: Option<bool>,
    displacement_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingConfigFile {
    level: Option<String>,
    path: Option<PathBuf>,
}

/// A duration is either a bare number of seconds or a string with an
/// `s`/`m`/`h` suffix.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(f64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self, key: &str) -> Result<Duration> {
        match self {
            Self::Seconds(secs) if secs.is_finite() && secs >= 0.0 => {
                Ok(Duration::from_secs_f64(secs))
            }
            Self::Seconds(secs) => Err(anyhow!("{} must be non-negative, got {}", key, secs)),
            Self::Text(raw) => {
                parse_duration(&raw).map_err(|e| anyhow!("invalid {} '{}': {}", key, raw, e))
            }
        }
    }
}

/// Parse a duration like `30s`, `5m`, `1h`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.chars().last() {
        Some('s') => (&raw[..raw.len() - 1], 1.0),
        Some('m') => (&raw[..raw.len() - 1], 60.0),
        Some('h') => (&raw[..raw.len() - 1], 3600.0),
        Some(c) if c.is_ascii_digit() => (raw, 1.0),
        Some(c) => return Err(anyhow!("unsupported duration suffix '{}'", c)),
        None => return Err(anyhow!("empty duration")),
    };
    let value: f64 = digits
        .trim()
        .parse()
        .map_err(|_| anyhow!("expected a number before the suffix"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("duration must be a non-negative number"));
    }
    Ok(Duration::from_secs_f64(value * multiplier))
}

#[derive(Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub listen_topic: String,
    pub alert_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

#[derive(Clone, Debug)]
pub struct FrigateConfig {
    pub host: Option<String>,
    pub port: u16,
    pub ssl: bool,
    pub verify_artifacts: bool,
}

impl FrigateConfig {
    /// Base URL for artifact fetches, when a Frigate host is configured.
    pub fn base_url(&self) -> Option<String> {
        self.host.as_ref().map(|host| {
            let scheme = if self.ssl { "https" } else { "http" };
            format!("{}://{}:{}", scheme, host, self.port)
        })
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub frigate: FrigateConfig,
    pub rules: AlertRules,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file: ConfigFile = read_config_file(path)?;
        let mut cfg = Self::from_file(file)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let mqtt_file = file.mqtt.unwrap_or_default();
        let mqtt = MqttConfig {
            host: mqtt_file.host.ok_or_else(|| anyhow!("mqtt.host is required"))?,
            port: mqtt_file.port.unwrap_or(DEFAULT_MQTT_PORT),
            listen_topic: mqtt_file
                .listen_topic
                .ok_or_else(|| anyhow!("mqtt.listen_topic is required"))?,
            alert_topic: mqtt_file
                .alert_topic
                .ok_or_else(|| anyhow!("mqtt.alert_topic is required"))?,
            username: mqtt_file.username,
            password: mqtt_file.password,
            client_id: mqtt_file
                .client_id
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
        };

        let frigate_file = file.frigate.unwrap_or_default();
        let frigate = FrigateConfig {
            host: frigate_file.host,
            port: frigate_file.port.unwrap_or(DEFAULT_FRIGATE_PORT),
            ssl: frigate_file.ssl.unwrap_or(false),
            verify_artifacts: frigate_file.verify_artifacts.unwrap_or(false),
        };

        let cameras = file
            .alerts
            .into_iter()
            .map(|entry| {
                let zones = entry.zones.unwrap_or_default();
                CameraRule {
                    camera: entry.camera,
                    labels: entry.labels,
                    require: zones
                        .require
                        .into_iter()
                        .map(ZoneFilterFile::into_filter)
                        .collect(),
                    ignore: zones
                        .ignore
                        .into_iter()
                        .map(ZoneFilterFile::into_filter)
                        .collect(),
                    enabled: entry.enabled.unwrap_or(true),
                }
            })
            .collect();

        let rules_file = file.alert_rules.unwrap_or_default();
        let cooldown = rules_file.cooldown.unwrap_or_default();
        let tracking_file = file.object_tracking.unwrap_or_default();
        let rules = AlertRules {
            cameras,
            min_event_duration: rules_file
                .min_event_duration
                .map(|d| d.into_duration("alert_rules.min_event_duration"))
                .transpose()?
                .unwrap_or(Duration::ZERO),
            max_event_duration: rules_file
                .max_event_duration
                .map(|d| d.into_duration("alert_rules.max_event_duration"))
                .transpose()?
                .unwrap_or(Duration::ZERO),
            require_snapshot: rules_file.snapshot.unwrap_or(false),
            require_video: rules_file.video.unwrap_or(false),
            camera_cooldown: cooldown
                .camera
                .map(|d| d.into_duration("alert_rules.cooldown.camera"))
                .transpose()?
                .unwrap_or(Duration::ZERO),
            label_cooldown: cooldown
                .label
                .map(|d| d.into_duration("alert_rules.cooldown.label"))
                .transpose()?
                .unwrap_or(Duration::ZERO),
            tracking: TrackingRules {
                enabled: tracking_file.enabled.unwrap_or(false),
                displacement_threshold: tracking_file
                    .displacement_threshold
                    .unwrap_or(DEFAULT_DISPLACEMENT_THRESHOLD),
            },
        };

        let logging_file = file.logging.unwrap_or_default();
        let logging = LoggingConfig {
            level: logging_file
                .level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            path: logging_file.path,
        };

        Ok(Self {
            mqtt,
            frigate,
            rules,
            logging,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("FEP_MQTT_HOST") {
            if !host.trim().is_empty() {
                self.mqtt.host = host;
            }
        }
        if let Ok(port) = std::env::var("FEP_MQTT_PORT") {
            if !port.trim().is_empty() {
                self.mqtt.port = port
                    .parse()
                    .map_err(|_| anyhow!("FEP_MQTT_PORT must be a port number"))?;
            }
        }
        if let Ok(username) = std::env::var("FEP_MQTT_USERNAME") {
            if !username.trim().is_empty() {
                self.mqtt.username = Some(username);
            }
        }
        if let Ok(password) = std::env::var("FEP_MQTT_PASSWORD") {
            if !password.is_empty() {
                self.mqtt.password = Some(password);
            }
        }
        if let Ok(level) = std::env::var("FEP_LOG_LEVEL") {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            return Err(anyhow!("mqtt.host must not be empty"));
        }
        if self.mqtt.port == 0 {
            return Err(anyhow!("mqtt.port must not be zero"));
        }
        if self.mqtt.listen_topic.trim().is_empty() || self.mqtt.alert_topic.trim().is_empty() {
            return Err(anyhow!("mqtt topics must not be empty"));
        }
        if self.mqtt.listen_topic == self.mqtt.alert_topic {
            return Err(anyhow!(
                "mqtt.listen_topic and mqtt.alert_topic must differ; publishing alerts \
                 back onto the listen topic would loop"
            ));
        }

        if let Some(base) = self.frigate.base_url() {
            url::Url::parse(&base)
                .map_err(|e| anyhow!("invalid frigate host/port ({}): {}", base, e))?;
        }
        if self.frigate.verify_artifacts && self.frigate.host.is_none() {
            return Err(anyhow!(
                "frigate.verify_artifacts requires frigate.host to be set"
            ));
        }

        let min = self.rules.min_event_duration;
        let max = self.rules.max_event_duration;
        if max > Duration::ZERO && min > max {
            return Err(anyhow!(
                "alert_rules.min_event_duration ({:?}) exceeds max_event_duration ({:?})",
                min,
                max
            ));
        }

        let threshold = self.rules.tracking.displacement_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(anyhow!(
                "object_tracking.displacement_threshold must be a positive number"
            ));
        }

        for rule in &self.rules.cameras {
            if rule.camera.trim().is_empty() {
                return Err(anyhow!("alerts entry with empty camera name"));
            }
            if rule.labels.is_empty() {
                // Tolerated so one bad entry cannot take the daemon down;
                // the evaluator denies everything it sees for this camera.
                log::warn!(
                    "alerts entry for camera '{}' has no labels and will never match",
                    rule.camera
                );
            }
            for filter in rule.require.iter().chain(rule.ignore.iter()) {
                if filter.zone.trim().is_empty() {
                    return Err(anyhow!(
                        "alerts entry for camera '{}' has a zone filter with an empty zone",
                        rule.camera
                    ));
                }
            }
        }

        Ok(())
    }
}

fn read_config_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;

    let cfg = if path.extension().map(|e| e == "toml").unwrap_or(false) {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid TOML config file {}: {}", path.display(), e))?
    } else if path.extension().map(|e| e == "json").unwrap_or(false) {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid JSON config file {}: {}", path.display(), e))?
    } else {
        match toml::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(toml_err) => match serde_json::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(json_err) => {
                    return Err(anyhow!(
                        "invalid config file {} (tried TOML and JSON): toml error: {}; json error: {}",
                        path.display(),
                        toml_err,
                        json_err
                    ));
                }
            },
        }
    };
    Ok(cfg)
}
