//! Position reporter
//!
//! Turns the device location stream into vessel state: derives speed and
//! heading, classifies the motion status and publishes merged updates to the
//! shared store. Each sharing session is a pair of tasks: the tracker, which
//! owns the motion state, and a publisher draining a bounded queue so a slow
//! store never blocks the location callback.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    errors::VesselWatchError,
    geo,
    identity::{Identity, IdentityStore},
    models::{LocationEvent, LocationFix, Position, VesselStatus, VesselUpdate},
    store::StateStore,
};

/// m/s to knots
pub const KNOTS_PER_MPS: f64 = 1.94384;

/// Below this speed a vessel is stationary
pub const STATIONARY_KNOTS: f64 = 0.2;

/// Speed at which a vessel outside its mooring circle counts as under way
pub const UNDER_WAY_KNOTS: f64 = 2.0;

/// Consecutive under-way fixes that lift the anchor point
pub const UNDER_WAY_FIXES: u32 = 3;

/// Displacement under which no heading is derived
const MIN_HEADING_DISPLACEMENT_M: f64 = 1.0;

pub fn knots_from_mps(mps: f64) -> f64 {
    mps * KNOTS_PER_MPS
}

/// Classify motion from speed and distance to the anchor point.
///
/// Leaving the mooring circle wins over low speed: a vessel dragging its
/// anchor can be slower than the stationary threshold.
pub fn classify_motion(
    anchor: Option<&Position>,
    mooring_radius_m: f64,
    position: &Position,
    speed_knots: f64,
) -> VesselStatus {
    if let Some(anchor) = anchor {
        if geo::distance_m(anchor, position) > mooring_radius_m {
            return VesselStatus::Drifting;
        }
    }
    if speed_knots < STATIONARY_KNOTS {
        VesselStatus::Stationary
    } else {
        VesselStatus::Moving
    }
}

/// Result of feeding one fix into the [`MotionTracker`]
#[derive(Debug, Clone, PartialEq)]
pub struct MotionUpdate {
    pub position: Position,
    pub speed_knots: f64,
    pub heading: f64,
    pub status: VesselStatus,
    pub status_changed: bool,
    pub status_changed_at: DateTime<Utc>,
}

/// Motion state of one vessel
#[derive(Debug, Clone)]
pub struct MotionTracker {
    mooring_radius_m: f64,
    status: VesselStatus,
    status_changed_at: Option<DateTime<Utc>>,
    anchor: Option<Position>,
    manual: Option<VesselStatus>,
    last_fix: Option<LocationFix>,
    speed_knots: f64,
    heading: f64,
    under_way_fixes: u32,
}

impl MotionTracker {
    pub fn new(mooring_radius_m: f64) -> Self {
        Self {
            mooring_radius_m,
            status: VesselStatus::Stationary,
            status_changed_at: None,
            anchor: None,
            manual: None,
            last_fix: None,
            speed_knots: 0.0,
            heading: 0.0,
            under_way_fixes: 0,
        }
    }

    /// Start with an anchor already dropped at `anchor`
    pub fn with_anchor(mut self, anchor: Position) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn status(&self) -> VesselStatus {
        self.status
    }

    pub fn status_changed_at(&self) -> Option<DateTime<Utc>> {
        self.status_changed_at
    }

    pub fn anchor(&self) -> Option<Position> {
        self.anchor
    }

    pub fn manual_override(&self) -> Option<VesselStatus> {
        self.manual
    }

    pub fn update(&mut self, fix: &LocationFix) -> MotionUpdate {
        let speed_knots = self.derive_speed(fix);
        let heading = self.derive_heading(fix);
        self.speed_knots = speed_knots;
        self.heading = heading;
        if speed_knots >= UNDER_WAY_KNOTS {
            self.under_way_fixes = self.under_way_fixes.saturating_add(1);
        } else {
            self.under_way_fixes = 0;
        }

        let status = match self.manual {
            Some(manual) => manual,
            None => self.auto_status(&fix.position, speed_knots),
        };
        let status_changed = self.transition(status, fix.timestamp);
        self.last_fix = Some(fix.clone());

        MotionUpdate {
            position: fix.position,
            speed_knots,
            heading,
            status,
            status_changed,
            status_changed_at: self.status_changed_at.unwrap_or(fix.timestamp),
        }
    }

    /// Force a status, suspending automatic classification. Returns whether
    /// the status changed.
    pub fn set_manual(&mut self, status: VesselStatus, now: DateTime<Utc>) -> bool {
        self.manual = Some(status);
        self.transition(status, now)
    }

    /// Resume automatic classification from the last known fix
    pub fn clear_manual(&mut self, now: DateTime<Utc>) -> bool {
        self.manual = None;
        let status = match self.last_fix.as_ref().map(|f| f.position) {
            Some(position) => self.auto_status(&position, self.speed_knots),
            None => VesselStatus::Stationary,
        };
        self.transition(status, now)
    }

    fn auto_status(&mut self, position: &Position, speed_knots: f64) -> VesselStatus {
        // Sustained speed ends the mooring
        if self.anchor.is_some() && self.under_way_fixes >= UNDER_WAY_FIXES {
            debug!("Under way, lifting anchor point");
            self.anchor = None;
        }
        let status = classify_motion(
            self.anchor.as_ref(),
            self.mooring_radius_m,
            position,
            speed_knots,
        );
        match status {
            VesselStatus::Moving => self.anchor = None,
            VesselStatus::Stationary if self.anchor.is_none() => {
                debug!(
                    "Anchor point set at {:.6},{:.6}",
                    position.latitude, position.longitude
                );
                self.anchor = Some(*position);
            }
            _ => {}
        }
        status
    }

    fn transition(&mut self, status: VesselStatus, now: DateTime<Utc>) -> bool {
        if self.status_changed_at.is_some() && self.status == status {
            return false;
        }
        self.status = status;
        self.status_changed_at = Some(now);
        true
    }

    fn derive_speed(&self, fix: &LocationFix) -> f64 {
        if let Some(mps) = fix.speed_mps.filter(|s| s.is_finite() && *s >= 0.0) {
            return knots_from_mps(mps);
        }
        match &self.last_fix {
            Some(last) => {
                let elapsed = (fix.timestamp - last.timestamp).num_milliseconds() as f64 / 1000.0;
                if elapsed > 0.0 {
                    knots_from_mps(geo::distance_m(&last.position, &fix.position) / elapsed)
                } else {
                    self.speed_knots
                }
            }
            None => 0.0,
        }
    }

    fn derive_heading(&self, fix: &LocationFix) -> f64 {
        if let Some(heading) = fix.heading_deg.filter(|h| h.is_finite()) {
            return heading.rem_euclid(360.0);
        }
        match &self.last_fix {
            Some(last)
                if geo::distance_m(&last.position, &fix.position) > MIN_HEADING_DISPLACEMENT_M =>
            {
                geo::bearing_deg(&last.position, &fix.position)
            }
            _ => self.heading,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmitterSettings {
    pub mooring_radius_m: f64,
    /// Remove the record on stop instead of flagging `is_sharing: false`
    pub remove_on_stop: bool,
    pub publish_queue: usize,
}

impl Default for EmitterSettings {
    fn default() -> Self {
        Self {
            mooring_radius_m: 50.0,
            remove_on_stop: true,
            publish_queue: 32,
        }
    }
}

/// Latest local view of the sharing session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmitterSnapshot {
    pub position: Option<Position>,
    pub status: VesselStatus,
    pub speed_knots: f64,
    pub heading: f64,
    pub anchor: Option<Position>,
    pub status_changed_at: Option<DateTime<Utc>>,
    /// User-facing warning, e.g. location signal lost
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmitterCommand {
    SetEmergency { label: Option<String> },
    ClearEmergency,
    SetBattery { level: u8, charging: bool },
}

pub struct Emitter {
    settings: EmitterSettings,
    identity: Identity,
    identity_store: IdentityStore,
    store: Arc<dyn StateStore>,
}

impl Emitter {
    /// Create an emitter, loading the persisted identity or using `defaults`
    pub fn new(
        settings: EmitterSettings,
        identity_store: IdentityStore,
        defaults: Identity,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, VesselWatchError> {
        let identity = identity_store.load(defaults)?;
        Ok(Self {
            settings,
            identity,
            identity_store,
            store,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn set_nickname(&mut self, nickname: &str) -> Result<(), VesselWatchError> {
        self.identity.nickname = nickname.trim().to_string();
        self.identity_store.save(&self.identity)
    }

    pub fn set_sharing_id(&mut self, id: &str) -> Result<(), VesselWatchError> {
        self.identity.sharing_id = Some(id.to_string());
        self.identity_store.save(&self.identity)
    }

    pub fn set_fleet(&mut self, fleet_id: Option<&str>) -> Result<(), VesselWatchError> {
        self.identity.fleet_id = fleet_id.map(str::to_string);
        self.identity_store.save(&self.identity)
    }

    /// Begin publishing vessel state from `events`.
    ///
    /// Fails without side effects if no sharing id can be determined.
    pub fn start_sharing(
        &mut self,
        events: mpsc::Receiver<LocationEvent>,
    ) -> Result<SharingHandle, VesselWatchError> {
        let sharing_id = self.identity.effective_sharing_id();
        if sharing_id.is_empty() {
            return Err(VesselWatchError::MissingSharingId);
        }

        self.identity.remember(&sharing_id);
        if let Err(e) = self.identity_store.save(&self.identity) {
            warn!("Failed to persist identity: {}", e);
        }

        info!("Start sharing as {}", sharing_id);

        let (publish_tx, publish_rx) = mpsc::channel(self.settings.publish_queue.max(1));
        let (command_tx, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(EmitterSnapshot::default());
        let cancel = CancellationToken::new();

        let publisher = tokio::spawn(run_publisher(
            self.store.clone(),
            sharing_id.clone(),
            publish_rx,
        ));

        let initial = VesselUpdate {
            owner_id: Some(self.identity.account_id.clone()),
            display_name: Some(self.identity.display_name()),
            fleet_id: self.identity.fleet(),
            is_sharing: Some(true),
            ..Default::default()
        };
        let tracker = Tracker {
            motion: MotionTracker::new(self.settings.mooring_radius_m),
            publish: publish_tx,
            snapshot: snapshot_tx,
            signal_lost: false,
            event_label: None,
            pending: None,
        };
        let tracker = tokio::spawn(tracker.run(initial, events, command_rx, cancel.clone()));

        Ok(SharingHandle {
            sharing_id,
            cancel,
            commands: command_tx,
            snapshot: snapshot_rx,
            tracker,
            publisher,
            store: self.store.clone(),
            remove_on_stop: self.settings.remove_on_stop,
        })
    }
}

/// Handle of a running sharing session
pub struct SharingHandle {
    sharing_id: String,
    cancel: CancellationToken,
    commands: mpsc::Sender<EmitterCommand>,
    snapshot: watch::Receiver<EmitterSnapshot>,
    tracker: JoinHandle<()>,
    publisher: JoinHandle<()>,
    store: Arc<dyn StateStore>,
    remove_on_stop: bool,
}

impl SharingHandle {
    pub fn sharing_id(&self) -> &str {
        &self.sharing_id
    }

    pub fn snapshot(&self) -> EmitterSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EmitterSnapshot> {
        self.snapshot.clone()
    }

    pub async fn set_emergency(&self, label: Option<String>) -> Result<(), VesselWatchError> {
        self.send(EmitterCommand::SetEmergency { label }).await
    }

    pub async fn clear_emergency(&self) -> Result<(), VesselWatchError> {
        self.send(EmitterCommand::ClearEmergency).await
    }

    pub async fn set_battery(&self, level: u8, charging: bool) -> Result<(), VesselWatchError> {
        self.send(EmitterCommand::SetBattery { level, charging })
            .await
    }

    async fn send(&self, command: EmitterCommand) -> Result<(), VesselWatchError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VesselWatchError::ChannelClosed)
    }

    /// Stop observing positions and withdraw the vessel record
    pub async fn stop(self) -> Result<(), VesselWatchError> {
        self.cancel.cancel();
        if let Err(e) = self.tracker.await {
            error!("Tracker task failed: {}", e);
        }
        // The tracker owned the only queue sender, so the publisher drains and ends
        if let Err(e) = self.publisher.await {
            error!("Publisher task failed: {}", e);
        }

        if self.remove_on_stop {
            self.store.remove(&self.sharing_id).await?;
        } else if self.store.get(&self.sharing_id).await?.is_some() {
            self.store
                .merge(
                    &self.sharing_id,
                    VesselUpdate {
                        is_sharing: Some(false),
                        ..Default::default()
                    },
                )
                .await?;
        }
        info!("Stopped sharing {}", self.sharing_id);
        Ok(())
    }
}

struct Tracker {
    motion: MotionTracker,
    publish: mpsc::Sender<VesselUpdate>,
    snapshot: watch::Sender<EmitterSnapshot>,
    signal_lost: bool,
    event_label: Option<String>,
    /// Updates held back until the first fix gives the record a position
    pending: Option<VesselUpdate>,
}

impl Tracker {
    async fn run(
        mut self,
        initial: VesselUpdate,
        mut events: mpsc::Receiver<LocationEvent>,
        mut commands: mpsc::Receiver<EmitterCommand>,
        cancel: CancellationToken,
    ) {
        self.pending = Some(initial);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(command) = commands.recv() => self.handle_command(command),
                event = events.recv(), if events_open => match event {
                    Some(LocationEvent::Fix(fix)) => self.handle_fix(&fix),
                    Some(LocationEvent::SignalLost(reason)) => self.handle_signal_lost(reason),
                    None => {
                        info!("Location stream ended");
                        events_open = false;
                    }
                },
            }
        }
    }

    fn handle_fix(&mut self, fix: &LocationFix) {
        if self.signal_lost {
            info!("Location signal restored");
            self.signal_lost = false;
        }

        let update = self.motion.update(fix);
        if update.status_changed {
            info!("Status changed to {}", update.status);
        }

        self.publish(VesselUpdate {
            position: Some(update.position),
            heading: Some(update.heading),
            speed_knots: Some(update.speed_knots),
            status: update.status_changed.then_some(update.status),
            status_changed_at: update.status_changed.then_some(update.status_changed_at),
            is_sharing: Some(true),
            ..Default::default()
        });

        let anchor = self.motion.anchor();
        self.snapshot.send_modify(|s| {
            s.position = Some(update.position);
            s.status = update.status;
            s.speed_knots = update.speed_knots;
            s.heading = update.heading;
            s.anchor = anchor;
            s.status_changed_at = Some(update.status_changed_at);
            s.warning = None;
        });
    }

    fn handle_signal_lost(&mut self, reason: String) {
        if self.signal_lost {
            return;
        }
        self.signal_lost = true;
        warn!("Location signal lost: {}", reason);
        self.snapshot
            .send_modify(|s| s.warning = Some(format!("Location unavailable: {}", reason)));
    }

    fn handle_command(&mut self, command: EmitterCommand) {
        let now = Utc::now();
        match command {
            EmitterCommand::SetEmergency { label } => {
                warn!("Emergency declared");
                let changed = self.motion.set_manual(VesselStatus::Emergency, now);
                self.event_label = label;
                self.publish_status(changed);
            }
            EmitterCommand::ClearEmergency => {
                if self.motion.manual_override().is_none() {
                    return;
                }
                info!("Emergency cleared");
                let changed = self.motion.clear_manual(now);
                self.event_label = None;
                self.publish_status(changed);
            }
            EmitterCommand::SetBattery { level, charging } => {
                self.publish(VesselUpdate {
                    battery_level: Some(level.min(100)),
                    is_charging: Some(charging),
                    ..Default::default()
                });
            }
        }
    }

    fn publish_status(&mut self, changed: bool) {
        let status = self.motion.status();
        let changed_at = self.motion.status_changed_at();
        self.publish(VesselUpdate {
            status: Some(status),
            status_changed_at: if changed { changed_at } else { None },
            event_label: Some(self.event_label.clone()),
            ..Default::default()
        });
        self.snapshot.send_modify(|s| {
            s.status = status;
            s.status_changed_at = changed_at;
        });
    }

    /// Queue an update without waiting on the store
    fn publish(&mut self, update: VesselUpdate) {
        let update = match self.pending.take() {
            Some(pending) => {
                let merged = pending.overlay(update);
                if merged.position.is_none() {
                    self.pending = Some(merged);
                    return;
                }
                merged
            }
            None => update,
        };
        if let Err(e) = self.publish.try_send(update) {
            warn!("Dropping vessel update: {}", e);
        }
    }
}

async fn run_publisher(
    store: Arc<dyn StateStore>,
    sharing_id: String,
    mut updates: mpsc::Receiver<VesselUpdate>,
) {
    while let Some(update) = updates.recv().await {
        if let Err(e) = store.merge(&sharing_id, update).await {
            warn!("Failed to publish vessel state: {}", e);
        }
    }
    debug!("Publisher for {} finished", sharing_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryKeyValueStore;
    use crate::models::VesselFilter;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::time::Duration;

    fn fix(position: Position, speed_mps: f64, seconds: i64) -> LocationFix {
        LocationFix {
            position,
            speed_mps: Some(speed_mps),
            heading_deg: None,
            accuracy_m: 5.0,
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap()
                + ChronoDuration::seconds(seconds),
        }
    }

    #[test]
    fn knot_conversion() {
        for mps in [0.0, 0.1, 1.0, 2.5, 10.0, 51.4] {
            assert_eq!(knots_from_mps(mps), mps * 1.94384);
        }
    }

    #[test]
    fn drift_outside_mooring_radius() {
        let anchor = Position::new(0.0, 0.0);
        let far = geo::destination(&anchor, 90.0, 150.0);
        let near = geo::destination(&anchor, 90.0, 50.0);

        assert_eq!(
            classify_motion(Some(&anchor), 100.0, &far, 0.0),
            VesselStatus::Drifting
        );
        assert_ne!(
            classify_motion(Some(&anchor), 100.0, &near, 0.0),
            VesselStatus::Drifting
        );
        assert_eq!(
            classify_motion(Some(&anchor), 100.0, &near, 0.1),
            VesselStatus::Stationary
        );
        assert_eq!(classify_motion(None, 100.0, &far, 3.0), VesselStatus::Moving);
    }

    #[test]
    fn repeated_sample_keeps_status_timestamp() {
        let mut tracker = MotionTracker::new(100.0);
        let p = Position::new(-22.27, 166.45);

        let first = tracker.update(&fix(p, 0.0, 0));
        assert!(first.status_changed);
        assert_eq!(first.status, VesselStatus::Stationary);

        let second = tracker.update(&fix(p, 0.0, 5));
        assert!(!second.status_changed);
        assert_eq!(second.status_changed_at, first.status_changed_at);
    }

    #[test]
    fn anchor_tracking() {
        let origin = Position::new(-22.27, 166.45);
        let mut tracker = MotionTracker::new(100.0);

        tracker.update(&fix(origin, 0.0, 0));
        assert_eq!(tracker.anchor(), Some(origin));

        let drifted = geo::destination(&origin, 200.0, 150.0);
        let update = tracker.update(&fix(drifted, 0.1, 600));
        assert_eq!(update.status, VesselStatus::Drifting);
        assert_eq!(tracker.anchor(), Some(origin));

        let update = tracker.update(&fix(drifted, 0.1, 630));
        assert_eq!(update.status, VesselStatus::Drifting);
        assert_eq!(tracker.anchor(), Some(origin));

        let mut fresh = MotionTracker::new(100.0).with_anchor(origin);
        let update = fresh.update(&fix(geo::destination(&origin, 0.0, 20.0), 3.0, 0));
        assert_eq!(update.status, VesselStatus::Moving);
        assert_eq!(fresh.anchor(), None);
    }

    #[test]
    fn sustained_passage_lifts_anchor() {
        let origin = Position::new(-22.27, 166.45);
        let mut tracker = MotionTracker::new(50.0);
        tracker.update(&fix(origin, 0.0, 0));

        // First fix after leaving already lies outside the circle
        let mut position = geo::destination(&origin, 0.0, 120.0);
        let update = tracker.update(&fix(position, 3.1, 60));
        assert_eq!(update.status, VesselStatus::Drifting);

        let mut status = update.status;
        for step in 1..=20 {
            position = geo::destination(&position, 0.0, 300.0);
            status = tracker.update(&fix(position, 3.1, 60 + step * 100)).status;
            if step < UNDER_WAY_FIXES as i64 - 1 {
                assert_eq!(status, VesselStatus::Drifting);
            }
        }
        assert_eq!(status, VesselStatus::Moving);
        assert_eq!(tracker.anchor(), None);
    }

    #[test]
    fn slow_drift_keeps_anchor() {
        let origin = Position::new(-22.27, 166.45);
        let mut tracker = MotionTracker::new(50.0);
        tracker.update(&fix(origin, 0.0, 0));

        for step in 1..=10 {
            let position = geo::destination(&origin, 200.0, 60.0 + step as f64 * 5.0);
            let update = tracker.update(&fix(position, 0.5, step * 60));
            assert_eq!(update.status, VesselStatus::Drifting);
        }
        assert_eq!(tracker.anchor(), Some(origin));
    }

    #[test]
    fn emergency_is_sticky() {
        let p = Position::new(-22.27, 166.45);
        let mut tracker = MotionTracker::new(100.0);
        tracker.update(&fix(p, 0.0, 0));

        let now = Utc::now();
        assert!(tracker.set_manual(VesselStatus::Emergency, now));
        let update = tracker.update(&fix(p, 5.0, 10));
        assert_eq!(update.status, VesselStatus::Emergency);
        assert!(!update.status_changed);

        assert!(tracker.clear_manual(now));
        assert_eq!(tracker.status(), VesselStatus::Moving);
    }

    #[test]
    fn derives_speed_and_heading_from_displacement() {
        let origin = Position::new(-22.27, 166.45);
        let mut tracker = MotionTracker::new(100.0);
        let mut first = fix(origin, 0.0, 0);
        first.speed_mps = None;
        tracker.update(&first);

        let mut second = fix(geo::destination(&origin, 90.0, 100.0), 0.0, 50);
        second.speed_mps = None;
        let update = tracker.update(&second);

        assert!((update.speed_knots - knots_from_mps(2.0)).abs() < 1e-6);
        assert!((update.heading - 90.0).abs() < 0.01);
    }

    fn emitter(store: Arc<MemoryStore>, account: &str) -> Emitter {
        Emitter::new(
            EmitterSettings::default(),
            IdentityStore::new(Arc::new(MemoryKeyValueStore::new())),
            Identity {
                account_id: account.to_string(),
                nickname: "Kanaka".to_string(),
                fleet_id: Some("noumea".to_string()),
                ..Default::default()
            },
            store,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn start_without_id_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut emitter = emitter(store.clone(), "  ");
        let (_tx, rx) = mpsc::channel(1);

        assert!(matches!(
            emitter.start_sharing(rx),
            Err(VesselWatchError::MissingSharingId)
        ));
        assert!(emitter.identity().history.is_empty());
    }

    #[tokio::test]
    async fn publishes_and_withdraws_record() -> Result<(), VesselWatchError> {
        let store = Arc::new(MemoryStore::new());
        let mut emitter = emitter(store.clone(), "ACC-1");
        let (tx, rx) = mpsc::channel(8);
        let handle = emitter.start_sharing(rx)?;
        let mut snapshot = handle.subscribe();

        tx.send(LocationEvent::Fix(fix(Position::new(-22.27, 166.45), 0.0, 0)))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), snapshot.changed())
            .await
            .expect("no snapshot")
            .unwrap();

        let mut fleet = store.observe(VesselFilter::Fleet("noumea".to_string()));
        tokio::time::timeout(
            Duration::from_secs(1),
            fleet.wait_for(|v| v.iter().any(|v| v.position.latitude == -22.27)),
        )
        .await
        .expect("record not published")
        .unwrap();

        let record = store.get("acc-1").await?.expect("record");
        assert_eq!(record.display_name, "Kanaka");
        assert_eq!(record.status, VesselStatus::Stationary);
        assert_eq!(emitter.identity().history, vec!["acc-1"]);

        handle.stop().await?;
        assert!(store.get("acc-1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn record_waits_for_first_fix() -> Result<(), VesselWatchError> {
        let store = Arc::new(MemoryStore::new());
        let mut emitter = emitter(store.clone(), "acc-3");
        let (tx, rx) = mpsc::channel(8);
        let handle = emitter.start_sharing(rx)?;
        let mut observed = store.observe(VesselFilter::All);

        handle.set_battery(80, true).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get("acc-3").await?.is_none());

        let berth = Position::new(-22.27, 166.45);
        tx.send(LocationEvent::Fix(fix(berth, 0.0, 0))).await.unwrap();
        let vessels = tokio::time::timeout(
            Duration::from_secs(1),
            observed.wait_for(|v| !v.is_empty()),
        )
        .await
        .expect("record not published")
        .unwrap()
        .clone();

        // The first record already carries the fix, identity and battery
        assert_eq!(vessels[0].position, berth);
        assert_eq!(vessels[0].display_name, "Kanaka");
        assert_eq!(vessels[0].fleet_id.as_deref(), Some("noumea"));
        assert_eq!(vessels[0].battery_level, Some(80));
        assert!(vessels[0].is_charging);

        handle.stop().await
    }

    #[tokio::test]
    async fn signal_loss_warns_and_keeps_session() -> Result<(), VesselWatchError> {
        let store = Arc::new(MemoryStore::new());
        let mut emitter = emitter(store.clone(), "acc-2");
        let (tx, rx) = mpsc::channel(8);
        let handle = emitter.start_sharing(rx)?;
        let mut snapshot = handle.subscribe();

        tx.send(LocationEvent::SignalLost("no fix".to_string()))
            .await
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            snapshot.wait_for(|s| s.warning.is_some()),
        )
        .await
        .expect("no warning")
        .unwrap();

        tx.send(LocationEvent::Fix(fix(Position::new(-22.27, 166.45), 3.0, 0)))
            .await
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            snapshot.wait_for(|s| s.warning.is_none() && s.status == VesselStatus::Moving),
        )
        .await
        .expect("session stopped")
        .unwrap();

        handle.stop().await
    }
}
