use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;

use vessel_watch::{
    audio::{AudioEngine, PlaybackBackend},
    config::MonitorConfig,
    emitter::{Emitter, EmitterSettings},
    errors::VesselWatchError,
    identity::{Identity, IdentityStore, MemoryKeyValueStore},
    models::{AlertKind, LocationEvent, LocationFix, Position, VesselFilter, VesselStatus},
    monitor::{MonitorEvent, StatusMonitor},
    simulator::{MotionSimulator, Scenario},
    store::{MemoryStore, StateStore},
};

#[derive(Clone, Default)]
struct SharedBackend {
    playing: Arc<Mutex<Vec<String>>>,
}

impl PlaybackBackend for SharedBackend {
    fn load_and_play(
        &mut self,
        id: &str,
        _url: &str,
        _volume: f32,
        _looping: bool,
    ) -> Result<(), VesselWatchError> {
        self.playing.lock().unwrap().push(id.to_string());
        Ok(())
    }

    fn stop(&mut self, id: &str) {
        self.playing.lock().unwrap().retain(|p| p != id);
    }
}

fn monitor(backend: SharedBackend) -> StatusMonitor {
    let prefs = MonitorConfig {
        watch_enabled: true,
        watch_duration: Duration::from_secs(60),
        ..Default::default()
    }
    .prefs()
    .unwrap();
    let mut audio = AudioEngine::new(Box::new(backend));
    audio.unlock();
    StatusMonitor::new(prefs, audio)
}

#[tokio::test]
async fn stationary_watch_fires_then_resolves_on_departure() -> Result<(), VesselWatchError> {
    let store = Arc::new(MemoryStore::new());
    let mut emitter = Emitter::new(
        EmitterSettings::default(),
        IdentityStore::new(Arc::new(MemoryKeyValueStore::new())),
        Identity {
            account_id: "kanaka".to_string(),
            nickname: "Kanaka".to_string(),
            ..Default::default()
        },
        store.clone(),
    )?;

    let origin = Position::new(-22.27, 166.45);
    let start = Utc::now();
    let mut simulator =
        MotionSimulator::new(origin, Scenario::Stationary, Duration::from_secs(1), start);

    let (tx, rx) = mpsc::channel(8);
    let handle = emitter.start_sharing(rx)?;
    let mut observed = store.observe(VesselFilter::All);

    tx.send(simulator.next().unwrap()).await.unwrap();
    let vessels = tokio::time::timeout(
        Duration::from_secs(1),
        observed.wait_for(|v| v.iter().any(|v| v.status == VesselStatus::Stationary)),
    )
    .await
    .expect("stationary record not published")
    .unwrap()
    .clone();

    let backend = SharedBackend::default();
    let mut monitor = monitor(backend.clone());
    let since = vessels[0].status_changed_at;

    assert!(monitor
        .evaluate(&vessels, since + ChronoDuration::seconds(59))
        .is_empty());

    let events = monitor.evaluate(&vessels, since + ChronoDuration::seconds(60));
    assert!(matches!(
        events.as_slice(),
        [MonitorEvent::Triggered { kind: AlertKind::Stationary, silenced: false, .. }]
    ));
    assert_eq!(
        *backend.playing.lock().unwrap(),
        vec![StatusMonitor::sound_id("kanaka", AlertKind::Stationary)]
    );

    // Departure
    tx.send(LocationEvent::Fix(LocationFix {
        position: Position::new(-22.2698, 166.45),
        speed_mps: Some(3.0),
        heading_deg: Some(0.0),
        accuracy_m: 5.0,
        timestamp: start + ChronoDuration::seconds(30),
    }))
    .await
    .unwrap();
    let vessels = tokio::time::timeout(
        Duration::from_secs(1),
        observed.wait_for(|v| v.iter().any(|v| v.status == VesselStatus::Moving)),
    )
    .await
    .expect("moving record not published")
    .unwrap()
    .clone();

    let events = monitor.evaluate(&vessels, since + ChronoDuration::seconds(61));
    assert_eq!(
        events,
        vec![MonitorEvent::Resolved {
            vessel_id: "kanaka".to_string(),
            kind: AlertKind::Stationary,
        }]
    );
    assert!(backend.playing.lock().unwrap().is_empty());
    assert!(!monitor.audio().is_alarm_active());

    handle.stop().await?;
    assert!(store.get("kanaka").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn departure_before_watch_duration_stays_silent() -> Result<(), VesselWatchError> {
    let store = Arc::new(MemoryStore::new());
    let mut emitter = Emitter::new(
        EmitterSettings::default(),
        IdentityStore::new(Arc::new(MemoryKeyValueStore::new())),
        Identity {
            account_id: "vaka".to_string(),
            ..Default::default()
        },
        store.clone(),
    )?;

    let origin = Position::new(-22.27, 166.45);
    let start = Utc::now();
    let mut simulator =
        MotionSimulator::new(origin, Scenario::Stationary, Duration::from_secs(1), start);

    let (tx, rx) = mpsc::channel(8);
    let handle = emitter.start_sharing(rx)?;
    let mut observed = store.observe(VesselFilter::All);

    tx.send(simulator.next().unwrap()).await.unwrap();
    let vessels = tokio::time::timeout(
        Duration::from_secs(1),
        observed.wait_for(|v| v.iter().any(|v| v.status == VesselStatus::Stationary)),
    )
    .await
    .expect("stationary record not published")
    .unwrap()
    .clone();
    let since = vessels[0].status_changed_at;

    let backend = SharedBackend::default();
    let mut monitor = monitor(backend.clone());
    assert!(monitor
        .evaluate(&vessels, since + ChronoDuration::seconds(30))
        .is_empty());

    // Under way at 30 s
    tx.send(LocationEvent::Fix(LocationFix {
        position: Position::new(-22.2698, 166.45),
        speed_mps: Some(3.0),
        heading_deg: Some(0.0),
        accuracy_m: 5.0,
        timestamp: start + ChronoDuration::seconds(30),
    }))
    .await
    .unwrap();
    let vessels = tokio::time::timeout(
        Duration::from_secs(1),
        observed.wait_for(|v| v.iter().any(|v| v.status == VesselStatus::Moving)),
    )
    .await
    .expect("moving record not published")
    .unwrap()
    .clone();

    let events = monitor.evaluate(&vessels, since + ChronoDuration::seconds(60));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, MonitorEvent::Triggered { .. })),
        "unexpected events {:?}",
        events
    );
    assert!(backend.playing.lock().unwrap().is_empty());
    assert!(!monitor.audio().is_alarm_active());
    assert_eq!(monitor.active_alert("vaka"), None);

    handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn simulated_drift_raises_drifting_alert() -> Result<(), VesselWatchError> {
    let store = Arc::new(MemoryStore::new());
    let mut emitter = Emitter::new(
        EmitterSettings::default(),
        IdentityStore::new(Arc::new(MemoryKeyValueStore::new())),
        Identity {
            account_id: "moana".to_string(),
            ..Default::default()
        },
        store.clone(),
    )?;

    // Below the stationary threshold, so the first fix anchors; 0.15 kn
    // leaves the 50 m mooring radius after about twelve minutes
    let simulator = MotionSimulator::new(
        Position::new(-22.27, 166.45),
        Scenario::Drifting {
            bearing_deg: 200.0,
            speed_knots: 0.15,
        },
        Duration::from_secs(60),
        Utc::now(),
    );

    let (tx, rx) = mpsc::channel(32);
    let handle = emitter.start_sharing(rx)?;
    let mut observed = store.observe(VesselFilter::Ids(vec!["moana".to_string()]));

    for event in simulator.take(15) {
        tx.send(event).await.unwrap();
    }
    let vessels = tokio::time::timeout(
        Duration::from_secs(1),
        observed.wait_for(|v| v.iter().any(|v| v.status == VesselStatus::Drifting)),
    )
    .await
    .expect("drift not published")
    .unwrap()
    .clone();

    let mut monitor = monitor(SharedBackend::default());
    let events = monitor.evaluate(&vessels, Utc::now());
    match events.as_slice() {
        [MonitorEvent::Triggered {
            kind: AlertKind::Drifting,
            notification: Some(notification),
            ..
        }] => assert!(notification.title.to_lowercase().contains("drift")),
        other => panic!("unexpected events {:?}", other),
    }
    assert!(monitor.audio().is_alarm_active());

    handle.stop().await?;
    Ok(())
}
