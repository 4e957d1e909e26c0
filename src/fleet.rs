//! Fleet and tactical log coordination

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    errors::VesselWatchError,
    identity::normalize_id,
    models::{
        DistressKind, DistressMessage, Position, TacticalKind, TacticalLogEntry, VesselFilter,
        VesselState, Weather,
    },
    store::StateStore,
};

/// Ambient conditions lookup
#[async_trait]
pub trait WeatherService: Send + Sync {
    async fn weather_at(&self, position: &Position) -> Result<Weather, VesselWatchError>;
}

/// External channel for distress messages (e.g. SMS). No delivery
/// confirmation is available.
#[async_trait]
pub trait DistressDispatch: Send + Sync {
    async fn dispatch(&self, message: &DistressMessage) -> Result<(), VesselWatchError>;
}

/// Dispatch that only logs the composed message
#[derive(Debug, Default)]
pub struct LoggingDispatch;

#[async_trait]
impl DistressDispatch for LoggingDispatch {
    async fn dispatch(&self, message: &DistressMessage) -> Result<(), VesselWatchError> {
        warn!("Distress message to {}: {}", message.contact, message.body);
        Ok(())
    }
}

pub struct FleetCoordinator {
    store: Arc<dyn StateStore>,
    weather: Arc<dyn WeatherService>,
    dispatch: Arc<dyn DistressDispatch>,
}

impl FleetCoordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        weather: Arc<dyn WeatherService>,
        dispatch: Arc<dyn DistressDispatch>,
    ) -> Self {
        Self {
            store,
            weather,
            dispatch,
        }
    }

    /// Vessels currently sharing under `fleet_id`
    pub async fn members(&self, fleet_id: &str) -> Result<Vec<VesselState>, VesselWatchError> {
        self.store
            .query(&VesselFilter::Fleet(normalize_id(fleet_id)))
            .await
    }

    pub fn observe_members(&self, fleet_id: &str) -> watch::Receiver<Vec<VesselState>> {
        self.store.observe(VesselFilter::Fleet(normalize_id(fleet_id)))
    }

    /// Record a tactical marker in the fleet log.
    ///
    /// Weather and store failures are logged; the entry is always returned.
    pub async fn log_event(
        &self,
        fleet_id: &str,
        vessel_id: &str,
        kind: TacticalKind,
        position: Position,
        photo_ref: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> TacticalLogEntry {
        let weather = match self.weather.weather_at(&position).await {
            Ok(weather) => weather,
            Err(e) => {
                warn!("Weather lookup failed, logging without conditions: {}", e);
                Weather::default()
            }
        };

        let fleet_id = normalize_id(fleet_id);
        let entry = TacticalLogEntry {
            id: format!("{}-{}", vessel_id, timestamp.timestamp_millis()),
            fleet_id,
            vessel_id: vessel_id.to_string(),
            kind,
            position,
            timestamp,
            wind_speed_knots: weather.wind_speed_knots,
            wind_direction_deg: weather.wind_direction_deg,
            temperature_c: weather.temperature_c,
            photo_ref,
        };

        if let Err(e) = self.store.append_log(entry.clone()).await {
            warn!("Failed to store tactical log entry {}: {}", entry.id, e);
        }
        entry
    }

    pub async fn fleet_log(&self, fleet_id: &str) -> Result<Vec<TacticalLogEntry>, VesselWatchError> {
        self.store.fleet_log(&normalize_id(fleet_id)).await
    }

    /// Compose a distress message and hand it to the dispatcher without
    /// waiting for the outcome.
    pub fn emergency_broadcast(
        &self,
        contact: &str,
        kind: DistressKind,
        vessel_name: &str,
        position: Position,
    ) -> Result<DistressMessage, VesselWatchError> {
        let message = compose_distress(contact, kind, vessel_name, position)?;
        info!("Dispatching {} for {}", kind.label(), vessel_name);

        let dispatch = self.dispatch.clone();
        let outgoing = message.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatch.dispatch(&outgoing).await {
                warn!("Distress dispatch failed: {}", e);
            }
        });
        Ok(message)
    }
}

/// Build the pre-filled distress text
pub fn compose_distress(
    contact: &str,
    kind: DistressKind,
    vessel_name: &str,
    position: Position,
) -> Result<DistressMessage, VesselWatchError> {
    let contact = contact.trim();
    if contact.is_empty() {
        return Err(VesselWatchError::EmptyDistressContact);
    }

    let map_link = position.map_link();
    let body = format!(
        "{} - {} - position {:.5}, {:.5} - {}",
        kind.label(),
        vessel_name,
        position.latitude,
        position.longitude,
        map_link
    );
    Ok(DistressMessage {
        contact: contact.to_string(),
        kind,
        body,
        map_link,
    })
}
