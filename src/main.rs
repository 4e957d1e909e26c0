//! Vessel watch daemon

use std::sync::Arc;

use chrono::Utc;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vessel_watch::{
    audio::{AudioEngine, LoggingBackend},
    config::{AppConfig, StoreBackend},
    emitter::{Emitter, EmitterSnapshot},
    errors::VesselWatchError,
    fleet::{FleetCoordinator, LoggingDispatch},
    identity::{normalize_id, FileKeyValueStore, IdentityStore, KeyValueStore},
    models::{VesselFilter, VesselStatus},
    monitor::{MonitorEvent, StatusMonitor},
    mqtt::MqttStoreBuilder,
    radar::{HazardRadar, RadarInput, RadarReport},
    services::{HttpElevationClient, HttpWeatherClient},
    simulator::MotionSimulator,
    store::{MemoryStore, StateStore},
    trail::{BreadcrumbTrail, MapStateStore},
};

#[tokio::main]
async fn main() -> Result<(), VesselWatchError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    config.validate()?;

    let store: Arc<dyn StateStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Mqtt => Arc::new(MqttStoreBuilder::new(&config.mqtt)?.connect().await?),
    };
    let kv: Arc<dyn KeyValueStore> =
        Arc::new(FileKeyValueStore::new(config.vessel.state_path.clone()));

    let map_state = MapStateStore::new(kv.clone()).load();
    debug!("Map overlay {}, zoom {}", map_state.overlay, map_state.viewport.zoom);

    let cancel = CancellationToken::new();

    // Reporter, fed by the simulated location stream
    let mut emitter = Emitter::new(
        config.vessel.emitter_settings(),
        IdentityStore::new(kv),
        config.vessel.default_identity(),
        store.clone(),
    )?;
    let simulator = MotionSimulator::new(
        config.simulator.origin(),
        config.simulator.scenario,
        config.simulator.tick,
        Utc::now(),
    );
    let sharing = emitter.start_sharing(simulator.spawn(config.simulator.tick))?;

    if let Some(fleet_id) = emitter.identity().fleet() {
        let weather = HttpWeatherClient::new(
            config.weather.url.clone(),
            config.weather.request_timeout,
        )?;
        let fleet =
            FleetCoordinator::new(store.clone(), Arc::new(weather), Arc::new(LoggingDispatch));
        match fleet.members(&fleet_id).await {
            Ok(members) => info!("Fleet {} has {} sharing vessels", fleet_id, members.len()),
            Err(e) => warn!("Failed to query fleet {}: {}", fleet_id, e),
        }
    }

    // Monitor
    let filter = match (&config.monitor.fleet_id, config.monitor.watch_ids.is_empty()) {
        (Some(fleet_id), _) => VesselFilter::Fleet(normalize_id(fleet_id)),
        (None, true) => VesselFilter::All,
        (None, false) => VesselFilter::Ids(
            config
                .monitor
                .watch_ids
                .iter()
                .map(|id| normalize_id(id))
                .collect(),
        ),
    };
    let mut audio = AudioEngine::new(Box::new(LoggingBackend));
    audio.unlock();
    let monitor = StatusMonitor::new(config.monitor.prefs()?, audio);
    // The daemon has no control input; commands are issued through the library API
    let (_monitor_commands, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);
    let monitor_task = tokio::spawn(monitor.run(
        store.observe(filter),
        command_rx,
        event_tx,
        config.monitor.evaluation_interval,
        cancel.clone(),
    ));
    let events_task = tokio::spawn(log_monitor_events(event_rx));

    // Radar and trail follow the reporter's snapshot
    let (input_tx, input_rx) = watch::channel(None);
    let follow_task = tokio::spawn(follow_position(sharing.subscribe(), input_tx, cancel.clone()));

    // Held open for the radar loop; ignore commands come from the library API
    let (_radar_commands, radar_command_rx) = mpsc::channel(16);
    let radar_task = if config.radar.enabled {
        let elevation = HttpElevationClient::new(
            config.radar.elevation_url.clone(),
            config.radar.request_timeout,
        )?;
        let radar = HazardRadar::new(config.radar.settings(), Arc::new(elevation));
        let (report_tx, report_rx) = watch::channel(RadarReport::default());
        tokio::spawn(log_radar_reports(report_rx));
        Some(tokio::spawn(radar.run(
            input_rx,
            radar_command_rx,
            report_tx,
            cancel.clone(),
        )))
    } else {
        None
    };

    info!("Sharing as {}", sharing.sharing_id());
    signal::ctrl_c().await?;
    info!("Received shutdown signal");

    cancel.cancel();
    if let Err(e) = sharing.stop().await {
        error!("Failed to withdraw vessel record: {}", e);
    }
    if let Err(e) = monitor_task.await {
        error!("Monitor task failed: {}", e);
    }
    if let Some(task) = radar_task {
        if let Err(e) = task.await {
            error!("Radar task failed: {}", e);
        }
    }
    if let Err(e) = follow_task.await {
        error!("Position follower task failed: {}", e);
    }
    if let Err(e) = events_task.await {
        error!("Monitor event logger task failed: {}", e);
    }

    Ok(())
}

async fn follow_position(
    mut snapshots: watch::Receiver<EmitterSnapshot>,
    radar_input: watch::Sender<Option<RadarInput>>,
    cancel: CancellationToken,
) {
    let mut trail = BreadcrumbTrail::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let snapshot = snapshots.borrow_and_update().clone();
        if let Some(warning) = &snapshot.warning {
            warn!("{}", warning);
        }
        let Some(position) = snapshot.position else {
            continue;
        };

        if trail.record(position, snapshot.status, Utc::now()) {
            debug!("Trail has {} breadcrumbs", trail.len());
        }
        radar_input.send_replace(Some(RadarInput {
            position,
            status: snapshot.status,
            speed_knots: snapshot.speed_knots,
        }));
        if snapshot.status == VesselStatus::Drifting {
            debug!("Drifting from anchor {:?}", snapshot.anchor);
        }
    }
}

async fn log_monitor_events(mut events: mpsc::Receiver<MonitorEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            MonitorEvent::Triggered {
                notification: Some(notification),
                ..
            } => {
                warn!("{}: {}", notification.title, notification.body);
            }
            MonitorEvent::Triggered {
                vessel_id,
                kind,
                silenced,
                ..
            } => {
                info!("{} alert for {} (silenced: {})", kind, vessel_id, silenced);
            }
            MonitorEvent::Resolved { vessel_id, kind } => {
                info!("{} alert resolved for {}", kind, vessel_id);
            }
        }
    }
}

async fn log_radar_reports(mut reports: watch::Receiver<RadarReport>) {
    while reports.changed().await.is_ok() {
        let report = reports.borrow_and_update().clone();
        if let Some(danger) = report.closest_danger {
            warn!(
                "Hazard {} ({:?}) at {:.0} m, {} total",
                danger.id,
                danger.kind,
                danger.distance_meters,
                report.dangers.len()
            );
        }
    }
}
