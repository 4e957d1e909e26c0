//! Application configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;
use tracing::warn;

use crate::{
    emitter::EmitterSettings,
    errors::VesselWatchError,
    identity::Identity,
    models::{AlertConfig, AlertKind, Position, VesselPrefs},
    radar::RadarSettings,
    services::{DEFAULT_ELEVATION_URL, DEFAULT_WEATHER_URL},
    simulator::Scenario,
};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub vessel: VesselConfig,
    pub store: StoreConfig,
    pub mqtt: MqttConfig,
    pub monitor: MonitorConfig,
    pub radar: RadarConfig,
    pub weather: WeatherConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VesselConfig {
    pub account_id: String,
    pub nickname: String,
    pub sharing_id: Option<String>,
    pub fleet_id: Option<String>,
    /// JSON document holding identity and map state
    pub state_path: PathBuf,
    pub mooring_radius_m: f64,
    pub remove_on_stop: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Mqtt,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MqttTransport {
    #[default]
    Tcp,
    Tls,
    Wss,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub transport: MqttTransport,
    pub topic_prefix: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub keep_alive: Duration,
}

/// Alert settings as written in configuration, with a sound label
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AlertSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub sound: String,
    #[serde(default, rename = "loop")]
    pub looping: bool,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sharing ids to observe, in addition to `fleet_id` members
    pub watch_ids: Vec<String>,
    pub fleet_id: Option<String>,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub evaluation_interval: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub offline_timeout: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub watch_duration: Duration,
    pub watch_enabled: bool,
    pub volume: f32,
    pub notify_enabled: bool,
    pub battery_threshold: u8,
    /// Alert kind label -> settings
    pub alerts: HashMap<String, AlertSettings>,
    /// Sound label -> resource URL
    pub sounds: HashMap<String, String>,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RadarConfig {
    pub enabled: bool,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub scan_interval: Duration,
    pub rescan_distance_m: f64,
    pub max_speed_knots: f64,
    pub persistence_hits: u32,
    pub elevation_url: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WeatherConfig {
    pub url: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulatorConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub scenario: Scenario,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub tick: Duration,
}

fn default_true() -> bool {
    true
}

impl Default for VesselConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            nickname: String::new(),
            sharing_id: None,
            fleet_id: None,
            state_path: PathBuf::from("state/vessel-watch.json"),
            mooring_radius_m: 50.0,
            remove_on_stop: true,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "vessel-watch".to_string(),
            transport: MqttTransport::Tcp,
            topic_prefix: "vesselwatch".to_string(),
            keep_alive: Duration::from_secs(5),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let alert = |sound: &str, looping: bool| AlertSettings {
            enabled: true,
            sound: sound.to_string(),
            looping,
        };
        let alerts = HashMap::from([
            (AlertKind::Emergency.to_string(), alert("siren", true)),
            (AlertKind::Offline.to_string(), alert("horn", true)),
            (AlertKind::Drifting.to_string(), alert("siren", true)),
            (AlertKind::Stationary.to_string(), alert("chime", true)),
            (AlertKind::LowBattery.to_string(), alert("chime", false)),
        ]);
        let sounds = HashMap::from([
            ("siren".to_string(), "sounds/siren.mp3".to_string()),
            ("horn".to_string(), "sounds/horn.mp3".to_string()),
            ("chime".to_string(), "sounds/chime.mp3".to_string()),
        ]);

        Self {
            watch_ids: Vec::new(),
            fleet_id: None,
            evaluation_interval: Duration::from_secs(5),
            offline_timeout: Duration::from_secs(120),
            watch_duration: Duration::from_secs(30 * 60),
            watch_enabled: false,
            volume: 1.0,
            notify_enabled: true,
            battery_threshold: 20,
            alerts,
            sounds,
        }
    }
}

impl Default for RadarConfig {
    fn default() -> Self {
        let settings = RadarSettings::default();
        Self {
            enabled: true,
            scan_interval: settings.scan_interval,
            rescan_distance_m: settings.rescan_distance_m,
            max_speed_knots: settings.max_speed_knots,
            persistence_hits: settings.persistence_hits,
            elevation_url: DEFAULT_ELEVATION_URL.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WEATHER_URL.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            latitude: -22.27,
            longitude: 166.45,
            scenario: Scenario::Stationary,
            tick: Duration::from_secs(1),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("VESSELWATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("monitor.watch_ids"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), VesselWatchError> {
        self.vessel.validate()?;
        self.monitor.validate()?;
        self.radar.validate()?;
        Ok(())
    }
}

impl VesselConfig {
    pub fn validate(&self) -> Result<(), VesselWatchError> {
        if !(self.mooring_radius_m > 0.0) {
            return Err(VesselWatchError::ConfigurationError {
                message: "Mooring radius must be greater than zero".to_string(),
            });
        }
        if self.state_path.to_str().unwrap_or("").is_empty() {
            return Err(VesselWatchError::ConfigurationError {
                message: "State path cannot be empty".to_string(),
            });
        }
        if let Some(dir) = self.state_path.parent() {
            self.ensure_directory_exists(dir)?;
        }
        Ok(())
    }

    fn ensure_directory_exists(&self, dir: &Path) -> Result<(), VesselWatchError> {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            warn!("State directory does not exist, attempting to create it");
            std::fs::create_dir_all(dir).map_err(|e| VesselWatchError::ConfigurationError {
                message: format!("Could not create state directory: {}", e),
            })?;
        }
        Ok(())
    }

    /// Identity used on first start, before anything was persisted
    pub fn default_identity(&self) -> Identity {
        Identity {
            account_id: self.account_id.clone(),
            nickname: self.nickname.clone(),
            sharing_id: self.sharing_id.clone(),
            fleet_id: self.fleet_id.clone(),
            history: Vec::new(),
        }
    }

    pub fn emitter_settings(&self) -> EmitterSettings {
        EmitterSettings {
            mooring_radius_m: self.mooring_radius_m,
            remove_on_stop: self.remove_on_stop,
            ..Default::default()
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), VesselWatchError> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(VesselWatchError::ConfigurationError {
                message: "Volume must be between 0.0 and 1.0".to_string(),
            });
        }
        if self.evaluation_interval.is_zero() {
            return Err(VesselWatchError::ConfigurationError {
                message: "Evaluation interval must be greater than zero".to_string(),
            });
        }
        if self.offline_timeout.is_zero() {
            return Err(VesselWatchError::ConfigurationError {
                message: "Offline timeout must be greater than zero".to_string(),
            });
        }
        self.prefs().map(|_| ())
    }

    /// Resolve alert settings into typed preferences.
    ///
    /// Kinds missing from the configuration keep their defaults. Unknown
    /// kinds or sound labels are rejected.
    pub fn prefs(&self) -> Result<VesselPrefs, VesselWatchError> {
        let mut settings: HashMap<AlertKind, AlertSettings> = HashMap::new();
        for (label, alert) in MonitorConfig::default().alerts {
            settings.insert(label.parse()?, alert);
        }
        for (label, alert) in &self.alerts {
            settings.insert(label.parse()?, alert.clone());
        }

        let mut alerts = HashMap::new();
        for (kind, alert) in settings {
            let sound_url = self
                .sounds
                .get(&alert.sound)
                .ok_or_else(|| VesselWatchError::UnknownSoundLabel(alert.sound.clone()))?;
            alerts.insert(
                kind,
                AlertConfig {
                    enabled: alert.enabled,
                    sound_url: sound_url.clone(),
                    looping: alert.looping,
                },
            );
        }

        Ok(VesselPrefs {
            volume: self.volume,
            notify_enabled: self.notify_enabled,
            battery_threshold: self.battery_threshold,
            watch_duration: self.watch_duration,
            watch_enabled: self.watch_enabled,
            offline_timeout: self.offline_timeout,
            alerts,
        })
    }
}

impl RadarConfig {
    pub fn validate(&self) -> Result<(), VesselWatchError> {
        if self.scan_interval.is_zero() {
            return Err(VesselWatchError::ConfigurationError {
                message: "Scan interval must be greater than zero".to_string(),
            });
        }
        if self.persistence_hits == 0 {
            return Err(VesselWatchError::ConfigurationError {
                message: "Persistence hits must be at least one".to_string(),
            });
        }
        Ok(())
    }

    pub fn settings(&self) -> RadarSettings {
        RadarSettings {
            scan_interval: self.scan_interval,
            rescan_distance_m: self.rescan_distance_m,
            max_speed_knots: self.max_speed_knots,
            persistence_hits: self.persistence_hits,
            ..Default::default()
        }
    }
}

impl SimulatorConfig {
    pub fn origin(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}
