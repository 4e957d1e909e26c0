//! Status monitor
//!
//! Watches observed vessel records, resolves the single most important alert
//! per vessel and escalates transitions into sounds and notifications.
//!
//! An acknowledgment silences the current episode only: it is remembered per
//! vessel as the acknowledged [`AlertKind`] and cleared when the vessel's
//! condition resolves, so a later transition alerts again.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    audio::AudioEngine,
    models::{AlertKind, Severity, VesselPrefs, VesselState, VesselStatus},
};

/// Determine the active alert for a vessel, highest priority first
pub fn resolve_alert(
    vessel: &VesselState,
    prefs: &VesselPrefs,
    now: DateTime<Utc>,
) -> Option<AlertKind> {
    AlertKind::ALL
        .into_iter()
        .filter(|kind| prefs.is_enabled(*kind))
        .find(|kind| condition_holds(*kind, vessel, prefs, now))
}

fn condition_holds(
    kind: AlertKind,
    vessel: &VesselState,
    prefs: &VesselPrefs,
    now: DateTime<Utc>,
) -> bool {
    match kind {
        AlertKind::Emergency => vessel.status == VesselStatus::Emergency,
        AlertKind::Offline => vessel.is_sharing && elapsed(vessel.last_active_at, now) > prefs.offline_timeout,
        AlertKind::Drifting => vessel.status == VesselStatus::Drifting,
        AlertKind::Stationary => {
            prefs.watch_enabled
                && vessel.status == VesselStatus::Stationary
                && elapsed(vessel.status_changed_at, now) >= prefs.watch_duration
        }
        AlertKind::LowBattery => {
            !vessel.is_charging
                && vessel
                    .battery_level
                    .is_some_and(|level| level < prefs.battery_threshold)
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// UI notification raised when an alert fires
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub vessel_id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub body: String,
}

impl Notification {
    fn new(vessel: &VesselState, kind: AlertKind, now: DateTime<Utc>) -> Self {
        let name = &vessel.display_name;
        let (title, body) = match kind {
            AlertKind::Emergency => (
                format!("EMERGENCY: {}", name),
                match &vessel.event_label {
                    Some(label) => format!("{} reports an emergency: {}", name, label),
                    None => format!("{} reports an emergency", name),
                },
            ),
            AlertKind::Offline => (
                format!("{} is offline", name),
                format!(
                    "No position from {} for {} s",
                    name,
                    elapsed(vessel.last_active_at, now).as_secs()
                ),
            ),
            AlertKind::Drifting => (
                format!("{} is drifting", name),
                format!("{} has left its mooring radius", name),
            ),
            AlertKind::Stationary => (
                format!("{} is not moving", name),
                format!(
                    "{} has been stationary for {} min",
                    name,
                    elapsed(vessel.status_changed_at, now).as_secs() / 60
                ),
            ),
            AlertKind::LowBattery => (
                format!("{} battery low", name),
                format!(
                    "Battery at {}%",
                    vessel.battery_level.unwrap_or_default()
                ),
            ),
        };

        Self {
            vessel_id: vessel.id.clone(),
            kind,
            severity: kind.severity(),
            title,
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// A new alert became active. `silenced` when previously acknowledged.
    Triggered {
        notification: Option<Notification>,
        vessel_id: String,
        kind: AlertKind,
        silenced: bool,
    },
    Resolved {
        vessel_id: String,
        kind: AlertKind,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorCommand {
    StopAllAlarms,
    Acknowledge(String),
    UpdatePrefs(Box<VesselPrefs>),
    UnlockAudio,
}

pub struct StatusMonitor {
    prefs: VesselPrefs,
    audio: AudioEngine,
    last_triggered: HashMap<String, AlertKind>,
    acknowledged: HashMap<String, AlertKind>,
}

impl StatusMonitor {
    pub fn new(prefs: VesselPrefs, audio: AudioEngine) -> Self {
        Self {
            prefs,
            audio,
            last_triggered: HashMap::new(),
            acknowledged: HashMap::new(),
        }
    }

    pub fn audio(&self) -> &AudioEngine {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioEngine {
        &mut self.audio
    }

    pub fn prefs(&self) -> &VesselPrefs {
        &self.prefs
    }

    pub fn set_prefs(&mut self, prefs: VesselPrefs) {
        self.prefs = prefs;
    }

    pub fn active_alert(&self, vessel_id: &str) -> Option<AlertKind> {
        self.last_triggered.get(vessel_id).copied()
    }

    pub fn acknowledged(&self, vessel_id: &str) -> Option<AlertKind> {
        self.acknowledged.get(vessel_id).copied()
    }

    /// Sound id of an alert, unique per vessel
    pub fn sound_id(vessel_id: &str, kind: AlertKind) -> String {
        format!("{}:{}", vessel_id, kind)
    }

    /// Compare the observed records against the last triggered alerts
    pub fn evaluate(&mut self, vessels: &[VesselState], now: DateTime<Utc>) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        let mut seen = HashSet::new();

        for vessel in vessels {
            seen.insert(vessel.id.as_str());
            let active = resolve_alert(vessel, &self.prefs, now);
            let previous = self.last_triggered.get(&vessel.id).copied();

            match (previous, active) {
                (Some(prev), Some(kind)) if prev == kind => {}
                (prev, Some(kind)) => {
                    if let Some(prev) = prev {
                        self.audio.stop(&Self::sound_id(&vessel.id, prev));
                    }
                    events.push(self.trigger(vessel, kind, now));
                }
                (Some(prev), None) => events.push(self.resolve(&vessel.id, prev)),
                (None, None) => {}
            }
        }

        // Vessels that left the observed set
        let gone: Vec<(String, AlertKind)> = self
            .last_triggered
            .iter()
            .filter(|(id, _)| !seen.contains(id.as_str()))
            .map(|(id, kind)| (id.clone(), *kind))
            .collect();
        for (id, kind) in gone {
            events.push(self.resolve(&id, kind));
        }

        events
    }

    fn trigger(&mut self, vessel: &VesselState, kind: AlertKind, now: DateTime<Utc>) -> MonitorEvent {
        let silenced = self.acknowledged.get(&vessel.id) == Some(&kind);
        info!(
            "Alert {} for {}{}",
            kind,
            vessel.id,
            if silenced { " (acknowledged)" } else { "" }
        );

        if !silenced {
            if let Some(config) = self.prefs.alert(kind) {
                self.audio.play(
                    &Self::sound_id(&vessel.id, kind),
                    &config.sound_url,
                    self.prefs.volume,
                    config.looping,
                );
            }
        }
        self.last_triggered.insert(vessel.id.clone(), kind);

        MonitorEvent::Triggered {
            notification: self
                .prefs
                .notify_enabled
                .then(|| Notification::new(vessel, kind, now)),
            vessel_id: vessel.id.clone(),
            kind,
            silenced,
        }
    }

    fn resolve(&mut self, vessel_id: &str, kind: AlertKind) -> MonitorEvent {
        info!("Alert {} for {} resolved", kind, vessel_id);
        self.audio.stop(&Self::sound_id(vessel_id, kind));
        self.last_triggered.remove(vessel_id);
        self.acknowledged.remove(vessel_id);
        MonitorEvent::Resolved {
            vessel_id: vessel_id.to_string(),
            kind,
        }
    }

    /// Silence every sound and acknowledge all current alerts.
    ///
    /// Monitoring continues; only new transitions alert again.
    pub fn stop_all_alarms(&mut self) {
        self.audio.stop_all();
        for (id, kind) in &self.last_triggered {
            self.acknowledged.insert(id.clone(), *kind);
        }
        info!("All alarms acknowledged ({})", self.acknowledged.len());
    }

    /// Silence the current alert of a single vessel
    pub fn acknowledge(&mut self, vessel_id: &str) {
        match self.last_triggered.get(vessel_id).copied() {
            Some(kind) => {
                self.audio.stop(&Self::sound_id(vessel_id, kind));
                self.acknowledged.insert(vessel_id.to_string(), kind);
            }
            None => debug!("Nothing to acknowledge for {}", vessel_id),
        }
    }

    fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::StopAllAlarms => self.stop_all_alarms(),
            MonitorCommand::Acknowledge(id) => self.acknowledge(&id),
            MonitorCommand::UpdatePrefs(prefs) => self.set_prefs(*prefs),
            MonitorCommand::UnlockAudio => self.audio.unlock(),
        }
    }

    /// Evaluation loop: runs on every change of the observed collection and
    /// on `tick` for time-based conditions (offline, prolonged stationary).
    pub async fn run(
        mut self,
        mut observed: watch::Receiver<Vec<VesselState>>,
        mut commands: mpsc::Receiver<MonitorCommand>,
        events: mpsc::Sender<MonitorEvent>,
        tick: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut observing = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(command) = commands.recv() => {
                    self.handle_command(command);
                    continue;
                }
                changed = observed.changed(), if observing => {
                    if changed.is_err() {
                        warn!("Observed collection closed");
                        observing = false;
                    }
                }
                _ = ticker.tick() => {}
            }

            let vessels = observed.borrow_and_update().clone();
            for event in self.evaluate(&vessels, Utc::now()) {
                if events.send(event).await.is_err() {
                    debug!("Monitor event receiver dropped");
                }
            }
        }

        self.audio.stop_all();
        self
    }
}
