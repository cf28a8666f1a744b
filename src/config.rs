//! # Settings
//!
//! Resolved configuration shared by both endpoints. The file format is TOML with
//! four sections (`[broker]`, `[topics]`, `[dashboard]`, `[device]`); every field
//! has a default so a partial file, or no file at all, still yields usable
//! settings.
//!
//! Settings are immutable once loaded. Each controller receives its own clone
//! and derives the gateway configuration it needs from it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_ENV: &str = "THERMOLINK_CONFIG";
const CONFIG_DIR: &str = "thermolink";
const CONFIG_FILE: &str = "config.toml";

/// Errors raised while loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Complete, validated configuration for one process.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub topics: TopicMap,
    pub dashboard: DashboardSettings,
    pub device: DeviceSettings,
}

/// Broker connection parameters.
///
/// Credentials are only sent when both `username` and `password` are present
/// and non-empty; anything else results in an anonymous connection.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    /// Keepalive interval in seconds
    pub keepalive: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".into(),
            port: 1883,
            keepalive: 60,
            username: None,
            password: None,
        }
    }
}

impl BrokerSettings {
    /// Returns the credential pair if one is fully configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pw)) if !user.is_empty() && !pw.is_empty() => Some((user, pw)),
            _ => None,
        }
    }
}

/// Names of the four broker channels.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct TopicMap {
    pub sensor_temp: String,
    pub sensor_humidity: String,
    pub led_status: String,
    pub led_control: String,
}

impl Default for TopicMap {
    fn default() -> Self {
        Self {
            sensor_temp: "sensor/esp32/2/temperature".into(),
            sensor_humidity: "sensor/esp32/2/humidity".into(),
            led_status: "sensor/esp32/2/led/status".into(),
            led_control: "sensor/esp32/2/led/control".into(),
        }
    }
}

impl TopicMap {
    /// Topics the console listens on.
    pub fn console_subscriptions(&self) -> Vec<String> {
        vec![
            self.sensor_temp.clone(),
            self.sensor_humidity.clone(),
            self.led_status.clone(),
        ]
    }

    /// Topics the device listens on.
    pub fn device_subscriptions(&self) -> Vec<String> {
        vec![self.led_control.clone()]
    }

    fn all(&self) -> [&str; 4] {
        [
            &self.sensor_temp,
            &self.sensor_humidity,
            &self.led_status,
            &self.led_control,
        ]
    }
}

/// Operator console settings.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DashboardSettings {
    pub title: String,
    /// Redraw period in milliseconds
    pub refresh_rate: u64,
    pub client_id: String,
    /// Seconds between reconnect attempts after the broker link drops
    pub reconnect_backoff: u64,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            title: "Temperature & Humidity Monitor".into(),
            refresh_rate: 1000,
            client_id: "dashboard-client".into(),
            reconnect_backoff: 5,
        }
    }
}

impl DashboardSettings {
    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_rate)
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff.max(1))
    }
}

/// Sensing device settings.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    pub client_id: String,
    /// Seconds between control cycles
    pub publish_interval: u64,
    /// Seconds to back off after a failed cycle
    pub retry_backoff: u64,
    /// Seconds to wait for the broker to acknowledge a connection
    pub connect_timeout: u64,
    /// Makes every n-th simulated sensor read fail
    pub simulate_failure_every: Option<u32>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            client_id: "esp-sensor-suhu-2".into(),
            publish_interval: 5,
            retry_backoff: 2,
            connect_timeout: 10,
            simulate_failure_every: None,
        }
    }
}

impl DeviceSettings {
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(self.publish_interval)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout.max(1))
    }
}

impl Settings {
    /// Parses and validates settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a file on disk.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading settings from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&content)
    }

    /// Resolves the settings for this process.
    ///
    /// Lookup order: the explicit path, `$THERMOLINK_CONFIG`, then
    /// `<config dir>/thermolink/config.toml`. An explicit path must exist; the
    /// implicit locations fall back to defaults when missing.
    pub async fn resolve(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            info!("Loading settings from {}", path.display());
            return Self::load(&path).await;
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            info!("Loading settings from ${} = {}", CONFIG_ENV, path);
            return Self::load(Path::new(&path)).await;
        }

        if let Some(path) = default_config_path() {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                info!("Loading settings from {}", path.display());
                return Self::load(&path).await;
            }
            warn!(
                "No config file at {}, continuing with defaults",
                path.display()
            );
        } else {
            warn!("No config directory available, continuing with defaults");
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let topics = self.topics.all();
        if topics.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid("topic names must not be empty".into()));
        }
        for (i, a) in topics.iter().enumerate() {
            if topics[i + 1..].contains(a) {
                return Err(ConfigError::Invalid(format!(
                    "topic `{}` is assigned to more than one channel",
                    a
                )));
            }
        }
        if self.dashboard.refresh_rate == 0 {
            return Err(ConfigError::Invalid("dashboard.refresh_rate must be > 0".into()));
        }
        if self.device.publish_interval == 0 {
            return Err(ConfigError::Invalid("device.publish_interval must be > 0".into()));
        }
        if self.device.simulate_failure_every == Some(0) {
            return Err(ConfigError::Invalid(
                "device.simulate_failure_every must be > 0 when set".into(),
            ));
        }
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.host must not be empty".into()));
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut dir| {
        dir.push(CONFIG_DIR);
        dir.push(CONFIG_FILE);
        dir
    })
}
