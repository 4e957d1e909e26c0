//! Hazard radar
//!
//! Samples ground elevation on concentric rings around the vessel and reports
//! shallow water or land. A cell must be flagged on several consecutive scans
//! before it is reported, which filters out single noisy samples from the
//! elevation model.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    errors::VesselWatchError,
    geo,
    models::{DangerKind, Position, RadarDanger, VesselStatus},
};

/// Ground elevation lookup
#[async_trait]
pub trait ElevationService: Send + Sync {
    /// Elevation in meters for each position, in order
    async fn elevations(&self, positions: &[Position]) -> Result<Vec<f64>, VesselWatchError>;
}

#[derive(Debug, Clone)]
pub struct RadarSettings {
    pub bearing_step_deg: f64,
    pub ring_step_m: f64,
    pub max_range_m: f64,
    /// Inclusive elevation band considered critical
    pub critical_min_m: f64,
    pub critical_max_m: f64,
    /// Below this under the vessel, no scan is needed
    pub deep_water_m: f64,
    pub persistence_hits: u32,
    pub max_speed_knots: f64,
    pub scan_interval: Duration,
    pub rescan_distance_m: f64,
    /// Decimal places of the cell key
    pub key_precision: i32,
}

impl Default for RadarSettings {
    fn default() -> Self {
        Self {
            bearing_step_deg: 45.0,
            ring_step_m: 50.0,
            max_range_m: 200.0,
            critical_min_m: -1.2,
            critical_max_m: 0.5,
            deep_water_m: -10.0,
            persistence_hits: 3,
            max_speed_knots: 10.0,
            scan_interval: Duration::from_secs(10),
            rescan_distance_m: 10.0,
            key_precision: 4,
        }
    }
}

/// Quantized cell coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellKey {
    lat: i64,
    lng: i64,
}

impl CellKey {
    pub fn new(position: &Position, precision: i32) -> Self {
        let scale = 10f64.powi(precision);
        Self {
            lat: (position.latitude * scale).round() as i64,
            lng: (position.longitude * scale).round() as i64,
        }
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.lat, self.lng)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HazardCandidate {
    pub key: CellKey,
    pub position: Position,
    pub elevation_m: f64,
    pub consecutive_hits: u32,
}

/// Outcome of a single scan cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Scanned { critical: usize },
    DeepWater,
    Skipped,
}

/// Published radar state
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RadarReport {
    pub active: bool,
    pub dangers: Vec<RadarDanger>,
    pub closest_danger: Option<RadarDanger>,
}

/// Input of the scan loop, updated on every position fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarInput {
    pub position: Position,
    pub status: VesselStatus,
    pub speed_knots: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RadarCommand {
    Ignore(String),
    ClearIgnored,
}

pub struct HazardRadar {
    settings: RadarSettings,
    elevation: Arc<dyn ElevationService>,
    candidates: HashMap<CellKey, HazardCandidate>,
    ignored: HashSet<String>,
    last_scan: Option<Position>,
}

impl HazardRadar {
    pub fn new(settings: RadarSettings, elevation: Arc<dyn ElevationService>) -> Self {
        Self {
            settings,
            elevation,
            candidates: HashMap::new(),
            ignored: HashSet::new(),
            last_scan: None,
        }
    }

    /// The radar only runs for slow vessels in a safety-relevant state
    pub fn is_active(&self, status: VesselStatus, speed_knots: f64) -> bool {
        matches!(
            status,
            VesselStatus::Stationary | VesselStatus::Drifting | VesselStatus::Emergency
        ) && speed_knots <= self.settings.max_speed_knots
    }

    /// Sample points on the rings around `center`
    pub fn ring_points(&self, center: &Position) -> Vec<Position> {
        let mut points = Vec::new();
        let mut distance = self.settings.ring_step_m;
        while distance <= self.settings.max_range_m + f64::EPSILON {
            let mut bearing = 0.0;
            while bearing < 360.0 {
                points.push(geo::destination(center, bearing, distance));
                bearing += self.settings.bearing_step_deg;
            }
            distance += self.settings.ring_step_m;
        }
        points
    }

    fn is_critical(&self, elevation: f64) -> bool {
        (self.settings.critical_min_m..=self.settings.critical_max_m).contains(&elevation)
    }

    /// Drop all findings
    pub fn clear(&mut self) {
        self.candidates.clear();
        self.last_scan = None;
    }

    pub fn candidates(&self) -> impl Iterator<Item = &HazardCandidate> {
        self.candidates.values()
    }

    pub fn last_scan(&self) -> Option<Position> {
        self.last_scan
    }

    /// Run one scan cycle around `center`.
    ///
    /// A failed lookup leaves the candidates untouched so the next cycle can
    /// continue the persistence count.
    pub async fn scan(&mut self, center: Position) -> ScanOutcome {
        match self.elevation.elevations(&[center]).await {
            Ok(under) => {
                if under.first().is_some_and(|e| *e < self.settings.deep_water_m) {
                    debug!("Deep water under the vessel, skipping scan");
                    self.candidates.clear();
                    self.last_scan = Some(center);
                    return ScanOutcome::DeepWater;
                }
            }
            Err(e) => {
                warn!("Elevation lookup under vessel failed: {}", e);
                return ScanOutcome::Skipped;
            }
        }

        let points = self.ring_points(&center);
        let elevations = match self.elevation.elevations(&points).await {
            Ok(elevations) if elevations.len() == points.len() => elevations,
            Ok(elevations) => {
                warn!(
                    "Elevation lookup returned {} values for {} points",
                    elevations.len(),
                    points.len()
                );
                return ScanOutcome::Skipped;
            }
            Err(e) => {
                warn!("Elevation lookup failed: {}", e);
                return ScanOutcome::Skipped;
            }
        };

        let mut flagged: HashMap<CellKey, (Position, f64)> = HashMap::new();
        for (point, elevation) in points.iter().zip(elevations) {
            if self.is_critical(elevation) {
                flagged.insert(CellKey::new(point, self.settings.key_precision), (*point, elevation));
            }
        }

        self.candidates.retain(|key, _| flagged.contains_key(key));
        for (key, (position, elevation)) in &flagged {
            let candidate = self.candidates.entry(*key).or_insert(HazardCandidate {
                key: *key,
                position: *position,
                elevation_m: *elevation,
                consecutive_hits: 0,
            });
            candidate.consecutive_hits += 1;
            candidate.position = *position;
            candidate.elevation_m = *elevation;
        }

        self.last_scan = Some(center);
        ScanOutcome::Scanned {
            critical: flagged.len(),
        }
    }

    /// Confirmed dangers sorted by distance from `current`
    pub fn dangers(&self, current: &Position) -> Vec<RadarDanger> {
        let mut dangers: Vec<RadarDanger> = self
            .candidates
            .values()
            .filter(|c| c.consecutive_hits >= self.settings.persistence_hits)
            .filter(|c| !self.ignored.contains(&c.key.id()))
            .map(|c| RadarDanger {
                id: c.key.id(),
                lat: c.position.latitude,
                lng: c.position.longitude,
                distance_meters: geo::distance_m(current, &c.position),
                kind: if c.elevation_m > 0.0 {
                    DangerKind::Land
                } else {
                    DangerKind::Reef
                },
                elevation_meters: c.elevation_m,
            })
            .collect();
        dangers.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        dangers
    }

    pub fn closest_danger(&self, current: &Position) -> Option<RadarDanger> {
        self.dangers(current).into_iter().next()
    }

    pub fn report(&self, current: &Position, active: bool) -> RadarReport {
        let dangers = self.dangers(current);
        RadarReport {
            active,
            closest_danger: dangers.first().cloned(),
            dangers,
        }
    }

    /// Suppress a danger until [`Self::clear_ignored`]
    pub fn ignore(&mut self, id: &str) {
        info!("Ignoring danger {}", id);
        self.ignored.insert(id.to_string());
    }

    pub fn clear_ignored(&mut self) {
        self.ignored.clear();
    }

    fn needs_rescan(&self, position: &Position) -> bool {
        match &self.last_scan {
            Some(last) => geo::distance_m(last, position) > self.settings.rescan_distance_m,
            None => true,
        }
    }

    /// Scan loop: a fixed interval, plus an immediate scan after moving more
    /// than the rescan distance since the last one.
    pub async fn run(
        mut self,
        mut input: watch::Receiver<Option<RadarInput>>,
        mut commands: mpsc::Receiver<RadarCommand>,
        report: watch::Sender<RadarReport>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.settings.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut observing = true;

        loop {
            let scan_due = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => true,
                changed = input.changed(), if observing => {
                    if changed.is_err() {
                        observing = false;
                        false
                    } else {
                        let current = *input.borrow_and_update();
                        current.is_some_and(|i| self.needs_rescan(&i.position))
                    }
                }
                Some(command) = commands.recv() => {
                    match command {
                        RadarCommand::Ignore(id) => self.ignore(&id),
                        RadarCommand::ClearIgnored => self.clear_ignored(),
                    }
                    false
                }
            };

            let current = *input.borrow();
            let Some(current) = current else {
                continue;
            };

            let active = self.is_active(current.status, current.speed_knots);
            if !active {
                if !self.candidates.is_empty() {
                    debug!("Radar idle, clearing findings");
                }
                self.clear();
            } else if scan_due {
                self.scan(current.position).await;
                // Distances follow the latest position, not the scan center
                let latest = input.borrow().map(|i| i.position).unwrap_or(current.position);
                report.send_replace(self.report(&latest, active));
                continue;
            }
            report.send_replace(self.report(&current.position, active));
        }
    }
}
