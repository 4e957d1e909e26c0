//! Data models.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::VesselWatchError;

/// WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Map link used in distress messages and log exports
    pub fn map_link(&self) -> String {
        format!(
            "https://maps.google.com/?q={:.6},{:.6}",
            self.latitude, self.longitude
        )
    }
}

/// A single fix from the device location source.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub position: Position,
    /// Speed over ground in m/s, None if the device did not report one
    pub speed_mps: Option<f64>,
    /// Heading in degrees, None if not available
    pub heading_deg: Option<f64>,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
}

/// Events produced by a location source.
///
/// `SignalLost` does not terminate the stream; fixes may resume afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Fix(LocationFix),
    SignalLost(String),
}

/// Motion status of a vessel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VesselStatus {
    Moving,
    #[default]
    Stationary,
    Drifting,
    Emergency,
}

impl fmt::Display for VesselStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VesselStatus::Moving => "moving",
            VesselStatus::Stationary => "stationary",
            VesselStatus::Drifting => "drifting",
            VesselStatus::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

/// Shared vessel record, one per sharing id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VesselState {
    pub id: String,
    pub owner_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fleet_id: Option<String>,
    pub position: Position,
    pub status: VesselStatus,
    /// Heading in degrees
    pub heading: f64,
    pub speed_knots: f64,
    /// Battery level in percent, None if not reported
    #[serde(default)]
    pub battery_level: Option<u8>,
    #[serde(default)]
    pub is_charging: bool,
    pub is_sharing: bool,
    pub last_active_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_label: Option<String>,
}

/// Partial update merged into a [`VesselState`] by the store.
///
/// `last_active_at` is not part of the update; the store assigns it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VesselUpdate {
    pub owner_id: Option<String>,
    pub display_name: Option<String>,
    pub fleet_id: Option<String>,
    pub position: Option<Position>,
    pub status: Option<VesselStatus>,
    pub heading: Option<f64>,
    pub speed_knots: Option<f64>,
    pub battery_level: Option<u8>,
    pub is_charging: Option<bool>,
    pub is_sharing: Option<bool>,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub event_label: Option<Option<String>>,
}

impl VesselUpdate {
    /// Combine with a later update; fields set in `newer` win
    pub fn overlay(self, newer: VesselUpdate) -> VesselUpdate {
        VesselUpdate {
            owner_id: newer.owner_id.or(self.owner_id),
            display_name: newer.display_name.or(self.display_name),
            fleet_id: newer.fleet_id.or(self.fleet_id),
            position: newer.position.or(self.position),
            status: newer.status.or(self.status),
            heading: newer.heading.or(self.heading),
            speed_knots: newer.speed_knots.or(self.speed_knots),
            battery_level: newer.battery_level.or(self.battery_level),
            is_charging: newer.is_charging.or(self.is_charging),
            is_sharing: newer.is_sharing.or(self.is_sharing),
            status_changed_at: newer.status_changed_at.or(self.status_changed_at),
            event_label: newer.event_label.or(self.event_label),
        }
    }

    /// Merge this update into an existing record, creating it if absent.
    pub fn apply(self, id: &str, existing: Option<VesselState>, now: DateTime<Utc>) -> VesselState {
        let mut state = existing.unwrap_or_else(|| VesselState {
            id: id.to_string(),
            owner_id: String::new(),
            display_name: id.to_string(),
            fleet_id: None,
            position: Position::default(),
            status: VesselStatus::default(),
            heading: 0.0,
            speed_knots: 0.0,
            battery_level: None,
            is_charging: false,
            is_sharing: true,
            last_active_at: now,
            status_changed_at: now,
            event_label: None,
        });

        if let Some(owner_id) = self.owner_id {
            state.owner_id = owner_id;
        }
        if let Some(display_name) = self.display_name {
            state.display_name = display_name;
        }
        if self.fleet_id.is_some() {
            state.fleet_id = self.fleet_id;
        }
        if let Some(position) = self.position {
            state.position = position;
        }
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(heading) = self.heading {
            state.heading = heading;
        }
        if let Some(speed) = self.speed_knots {
            state.speed_knots = speed;
        }
        if self.battery_level.is_some() {
            state.battery_level = self.battery_level;
        }
        if let Some(charging) = self.is_charging {
            state.is_charging = charging;
        }
        if let Some(sharing) = self.is_sharing {
            state.is_sharing = sharing;
        }
        if let Some(changed_at) = self.status_changed_at {
            state.status_changed_at = changed_at;
        }
        if let Some(label) = self.event_label {
            state.event_label = label;
        }
        state.last_active_at = now;
        state
    }
}

/// Selection of vessel records for queries and observation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VesselFilter {
    All,
    Ids(Vec<String>),
    /// `fleetId == X AND isSharing == true`
    Fleet(String),
}

impl VesselFilter {
    pub fn matches(&self, vessel: &VesselState) -> bool {
        match self {
            VesselFilter::All => true,
            VesselFilter::Ids(ids) => ids.iter().any(|id| *id == vessel.id),
            VesselFilter::Fleet(fleet) => {
                vessel.is_sharing && vessel.fleet_id.as_deref() == Some(fleet.as_str())
            }
        }
    }
}

/// Alert types, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    Emergency,
    Offline,
    Drifting,
    Stationary,
    LowBattery,
}

impl AlertKind {
    pub const ALL: [AlertKind; 5] = [
        AlertKind::Emergency,
        AlertKind::Offline,
        AlertKind::Drifting,
        AlertKind::Stationary,
        AlertKind::LowBattery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Emergency => "emergency",
            AlertKind::Offline => "offline",
            AlertKind::Drifting => "drifting",
            AlertKind::Stationary => "stationary",
            AlertKind::LowBattery => "lowBattery",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AlertKind::Emergency | AlertKind::Drifting => Severity::Critical,
            AlertKind::Offline => Severity::Warning,
            AlertKind::Stationary | AlertKind::LowBattery => Severity::Info,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = VesselWatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| VesselWatchError::UnknownAlertKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Alert settings with the sound already resolved to a playable resource
#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    pub enabled: bool,
    pub sound_url: String,
    pub looping: bool,
}

/// Alert preferences of the observing account
#[derive(Debug, Clone, PartialEq)]
pub struct VesselPrefs {
    /// Playback volume, 0.0 - 1.0
    pub volume: f32,
    pub notify_enabled: bool,
    /// Battery percentage below which `LowBattery` fires
    pub battery_threshold: u8,
    pub watch_duration: Duration,
    pub watch_enabled: bool,
    pub offline_timeout: Duration,
    pub alerts: HashMap<AlertKind, AlertConfig>,
}

impl VesselPrefs {
    pub fn alert(&self, kind: AlertKind) -> Option<&AlertConfig> {
        self.alerts.get(&kind)
    }

    pub fn is_enabled(&self, kind: AlertKind) -> bool {
        self.alert(kind).map(|a| a.enabled).unwrap_or(false)
    }
}

/// Retained historical position sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub position: Position,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DangerKind {
    Land,
    Reef,
}

/// Confirmed hazard near the vessel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarDanger {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub distance_meters: f64,
    #[serde(rename = "type")]
    pub kind: DangerKind,
    pub elevation_meters: f64,
}

/// Tactical marker types recorded by fleet members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TacticalKind {
    Fish,
    Birds,
    Debris,
    Hazard,
    Photo,
    Other,
}

/// Entry of a fleet's tactical log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TacticalLogEntry {
    pub id: String,
    pub fleet_id: String,
    pub vessel_id: String,
    pub kind: TacticalKind,
    pub position: Position,
    pub timestamp: DateTime<Utc>,
    pub wind_speed_knots: f64,
    pub wind_direction_deg: f64,
    pub temperature_c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
}

/// Ambient conditions at a position
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Weather {
    pub wind_speed_knots: f64,
    pub wind_direction_deg: f64,
    pub temperature_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistressKind {
    Mayday,
    ManOverboard,
    Fire,
    Medical,
    Breakdown,
}

impl DistressKind {
    pub fn label(&self) -> &'static str {
        match self {
            DistressKind::Mayday => "MAYDAY",
            DistressKind::ManOverboard => "MAN OVERBOARD",
            DistressKind::Fire => "FIRE ON BOARD",
            DistressKind::Medical => "MEDICAL EMERGENCY",
            DistressKind::Breakdown => "ENGINE BREAKDOWN",
        }
    }
}

/// Pre-filled distress message ready for external dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistressMessage {
    pub contact: String,
    pub kind: DistressKind,
    pub body: String,
    pub map_link: String,
}
