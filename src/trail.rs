//! Map and trail state
//!
//! Breadcrumb trail, tile overlay selection, persisted viewport and the
//! tactical marker layer shown on the map.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    errors::VesselWatchError,
    geo,
    identity::KeyValueStore,
    models::{Breadcrumb, Position, TacticalLogEntry, VesselStatus},
};

pub const TRAIL_RETENTION: Duration = Duration::from_secs(30 * 60);
pub const TRAIL_MIN_DISPLACEMENT_M: f64 = 2.0;

const MAP_STATE_KEY: &str = "map_state";

/// Decaying breadcrumb trail
#[derive(Debug, Clone)]
pub struct BreadcrumbTrail {
    crumbs: VecDeque<Breadcrumb>,
    retention: Duration,
    min_displacement_m: f64,
    returning: bool,
}

impl Default for BreadcrumbTrail {
    fn default() -> Self {
        Self::new(TRAIL_RETENTION, TRAIL_MIN_DISPLACEMENT_M)
    }
}

impl BreadcrumbTrail {
    pub fn new(retention: Duration, min_displacement_m: f64) -> Self {
        Self {
            crumbs: VecDeque::new(),
            retention,
            min_displacement_m,
            returning: false,
        }
    }

    /// Returning mode records the way back to a saved point even when the
    /// vessel is not classified as moving.
    pub fn set_returning(&mut self, returning: bool) {
        self.returning = returning;
    }

    pub fn is_returning(&self) -> bool {
        self.returning
    }

    /// Record a position; returns whether a crumb was added
    pub fn record(&mut self, position: Position, status: VesselStatus, now: DateTime<Utc>) -> bool {
        self.prune(now);
        if status != VesselStatus::Moving && !self.returning {
            return false;
        }
        if let Some(last) = self.crumbs.back() {
            if geo::distance_m(&last.position, &position) <= self.min_displacement_m {
                return false;
            }
        }
        self.crumbs.push_back(Breadcrumb {
            position,
            timestamp: now,
        });
        true
    }

    /// Drop crumbs older than the retention window
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return;
        };
        let cutoff = now - retention;
        while self.crumbs.front().is_some_and(|c| c.timestamp < cutoff) {
            self.crumbs.pop_front();
        }
    }

    pub fn points(&self) -> impl Iterator<Item = &Breadcrumb> {
        self.crumbs.iter()
    }

    pub fn len(&self) -> usize {
        self.crumbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crumbs.is_empty()
    }

    pub fn clear(&mut self) {
        self.crumbs.clear();
    }
}

/// Selectable map tile overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TileOverlay {
    #[default]
    None,
    Hazards,
    Wind,
    Waves,
    Nautical,
}

impl TileOverlay {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileOverlay::None => "none",
            TileOverlay::Hazards => "hazards",
            TileOverlay::Wind => "wind",
            TileOverlay::Waves => "waves",
            TileOverlay::Nautical => "nautical",
        }
    }
}

impl fmt::Display for TileOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TileOverlay {
    type Err = VesselWatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(TileOverlay::None),
            "hazards" => Ok(TileOverlay::Hazards),
            "wind" => Ok(TileOverlay::Wind),
            "waves" => Ok(TileOverlay::Waves),
            "nautical" => Ok(TileOverlay::Nautical),
            other => Err(VesselWatchError::UnknownOverlay(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: Position,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            center: Position::default(),
            zoom: 12.0,
        }
    }
}

/// Map state persisted across sessions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MapState {
    pub viewport: Viewport,
    pub overlay: TileOverlay,
}

pub struct MapStateStore {
    kv: Arc<dyn KeyValueStore>,
}

impl MapStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Last saved state, or the default when missing or unreadable
    pub fn load(&self) -> MapState {
        match self.kv.get(MAP_STATE_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding unreadable map state: {}", e);
                MapState::default()
            }),
            Ok(None) => MapState::default(),
            Err(e) => {
                warn!("Failed to read map state: {}", e);
                MapState::default()
            }
        }
    }

    pub fn save(&self, state: &MapState) -> Result<(), VesselWatchError> {
        self.kv.set(MAP_STATE_KEY, &serde_json::to_string(state)?)
    }
}

/// Difference applied by [`MarkerLayer::sync`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkerChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl MarkerChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Tactical markers displayed on the map
#[derive(Debug, Clone, Default)]
pub struct MarkerLayer {
    markers: HashMap<String, TacticalLogEntry>,
}

impl MarkerLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile the layer with the current fleet log
    pub fn sync(&mut self, entries: &[TacticalLogEntry]) -> MarkerChanges {
        let mut changes = MarkerChanges::default();

        self.markers.retain(|id, _| {
            let keep = entries.iter().any(|e| e.id == *id);
            if !keep {
                changes.removed.push(id.clone());
            }
            keep
        });
        for entry in entries {
            if !self.markers.contains_key(&entry.id) {
                changes.added.push(entry.id.clone());
            }
            self.markers.insert(entry.id.clone(), entry.clone());
        }

        changes.added.sort();
        changes.removed.sort();
        if !changes.is_empty() {
            debug!(
                "Markers synced: {} added, {} removed",
                changes.added.len(),
                changes.removed.len()
            );
        }
        changes
    }

    pub fn get(&self, id: &str) -> Option<&TacticalLogEntry> {
        self.markers.get(id)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryKeyValueStore;
    use crate::models::TacticalKind;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap()
    }

    #[test]
    fn close_positions_yield_one_crumb() {
        let origin = Position::new(-22.27, 166.45);
        let mut trail = BreadcrumbTrail::default();

        assert!(trail.record(origin, VesselStatus::Moving, t0()));
        assert!(!trail.record(
            geo::destination(&origin, 90.0, 1.0),
            VesselStatus::Moving,
            t0() + ChronoDuration::seconds(1)
        ));
        assert_eq!(trail.len(), 1);
    }

    #[test]
    fn distant_positions_yield_two_crumbs() {
        let origin = Position::new(-22.27, 166.45);
        let mut trail = BreadcrumbTrail::default();

        trail.record(origin, VesselStatus::Moving, t0());
        trail.record(
            geo::destination(&origin, 90.0, 5.0),
            VesselStatus::Moving,
            t0() + ChronoDuration::seconds(1),
        );
        assert_eq!(trail.len(), 2);
    }

    #[test]
    fn only_moving_or_returning_records() {
        let origin = Position::new(-22.27, 166.45);
        let mut trail = BreadcrumbTrail::default();

        assert!(!trail.record(origin, VesselStatus::Stationary, t0()));
        assert!(!trail.record(origin, VesselStatus::Drifting, t0()));

        trail.set_returning(true);
        assert!(trail.record(origin, VesselStatus::Stationary, t0()));
    }

    #[test]
    fn crumbs_expire_after_retention() {
        let origin = Position::new(-22.27, 166.45);
        let mut trail = BreadcrumbTrail::default();
        trail.record(origin, VesselStatus::Moving, t0());
        trail.record(
            geo::destination(&origin, 0.0, 100.0),
            VesselStatus::Moving,
            t0() + ChronoDuration::minutes(20),
        );

        trail.prune(t0() + ChronoDuration::minutes(31));
        assert_eq!(trail.len(), 1);
        trail.prune(t0() + ChronoDuration::minutes(51));
        assert!(trail.is_empty());
    }

    #[test]
    fn overlay_parse() {
        assert_eq!("Wind".parse::<TileOverlay>().unwrap(), TileOverlay::Wind);
        assert!("radar".parse::<TileOverlay>().is_err());
    }

    #[test]
    fn map_state_persists() -> Result<(), VesselWatchError> {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let state = MapState {
            viewport: Viewport {
                center: Position::new(-22.27, 166.45),
                zoom: 14.5,
            },
            overlay: TileOverlay::Hazards,
        };
        MapStateStore::new(kv.clone()).save(&state)?;
        assert_eq!(MapStateStore::new(kv).load(), state);
        Ok(())
    }

    #[test]
    fn unreadable_map_state_falls_back() -> Result<(), VesselWatchError> {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(MAP_STATE_KEY, "{not json")?;
        assert_eq!(MapStateStore::new(kv).load(), MapState::default());
        Ok(())
    }

    fn entry(id: &str) -> TacticalLogEntry {
        TacticalLogEntry {
            id: id.to_string(),
            fleet_id: "noumea".to_string(),
            vessel_id: "kanaka".to_string(),
            kind: TacticalKind::Fish,
            position: Position::new(-22.3, 166.4),
            timestamp: t0(),
            wind_speed_knots: 0.0,
            wind_direction_deg: 0.0,
            temperature_c: 0.0,
            photo_ref: None,
        }
    }

    #[test]
    fn marker_sync_reports_changes() {
        let mut layer = MarkerLayer::new();
        let changes = layer.sync(&[entry("a"), entry("b")]);
        assert_eq!(changes.added, vec!["a", "b"]);

        let changes = layer.sync(&[entry("b"), entry("c")]);
        assert_eq!(changes.added, vec!["c"]);
        assert_eq!(changes.removed, vec!["a"]);
        assert_eq!(layer.len(), 2);

        assert!(layer.sync(&[entry("b"), entry("c")]).is_empty());
    }
}
