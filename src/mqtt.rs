//! MQTT-backed shared state store
//!
//! Vessel records are retained messages on `{prefix}/vessels/{id}`; an empty
//! retained payload deletes the record. Tactical log entries are retained on
//! `{prefix}/fleets/{fleet}/log/{entry}` so late subscribers receive the
//! history.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};

use crate::{
    config::{MqttConfig, MqttTransport},
    errors::VesselWatchError,
    models::{TacticalLogEntry, VesselFilter, VesselState, VesselUpdate},
    store::{StateStore, VesselCache},
};

/// Message received on one of the store topics
#[derive(Debug, Clone, PartialEq)]
pub enum StoreMessage {
    Vessel(VesselState),
    VesselRemoved(String),
    LogEntry(TacticalLogEntry),
}

pub struct MqttStoreBuilder {
    client: AsyncClient,
    event_loop: EventLoop,
    prefix: String,
}

pub struct MqttStore {
    client: AsyncClient,
    cache: VesselCache,
    prefix: String,
    _handle: tokio::task::JoinHandle<Result<(), VesselWatchError>>,
}

impl MqttStoreBuilder {
    /// Create a new MQTT client
    pub fn new(config: &MqttConfig) -> Result<Self, VesselWatchError> {
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

        match config.transport {
            MqttTransport::Tcp => {}
            MqttTransport::Tls => {
                mqtt_options.set_transport(Transport::tls_with_default_config());
            }
            MqttTransport::Wss => {
                mqtt_options.set_transport(Transport::wss_with_default_config());
            }
        }
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(true);

        let (client, event_loop) = AsyncClient::new(mqtt_options, 100);

        Ok(Self {
            client,
            event_loop,
            prefix: config.topic_prefix.trim_end_matches('/').to_string(),
        })
    }

    /// Start the event loop. Subscriptions are made on every ConnAck, so
    /// they are restored after a reconnect.
    pub async fn connect(self) -> Result<MqttStore, VesselWatchError> {
        let cache = VesselCache::new();

        let _handle = tokio::spawn(Self::process_events(
            self.event_loop,
            self.client.clone(),
            self.prefix.clone(),
            cache.clone(),
        ));

        Ok(MqttStore {
            client: self.client,
            cache,
            prefix: self.prefix,
            _handle,
        })
    }

    fn topics(prefix: &str) -> Vec<String> {
        vec![
            format!("{}/vessels/+", prefix),
            format!("{}/fleets/+/log/+", prefix),
        ]
    }

    async fn subscribe(client: &AsyncClient, prefix: &str) -> Result<(), VesselWatchError> {
        for topic in Self::topics(prefix) {
            info!("Subscribing to topic: {}", topic);
            client.subscribe(topic, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    /// Process MQTT events
    ///
    /// `rumqttc` reconnects by itself when polled after an error; a short
    /// pause avoids spinning while the broker is unreachable.
    async fn process_events(
        mut event_loop: EventLoop,
        client: AsyncClient,
        prefix: String,
        cache: VesselCache,
    ) -> Result<(), VesselWatchError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker, subscribing to topics");
                    if let Err(e) = Self::subscribe(&client, &prefix).await {
                        error!("Failed to subscribe: {}", e);
                        break Err(e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match Self::parse_message(&prefix, &publish.topic, &publish.payload) {
                        Ok(StoreMessage::Vessel(state)) => cache.upsert(state),
                        Ok(StoreMessage::VesselRemoved(id)) => cache.delete(&id),
                        Ok(StoreMessage::LogEntry(entry)) => cache.push_log(entry),
                        Err(e) => warn!("Failed to parse message: {}", e),
                    }
                }
                Err(e) => {
                    error!("MQTT Error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                _ => continue,
            }
        }
    }

    /// Parse incoming message based on topic
    fn parse_message(
        prefix: &str,
        topic: &str,
        payload: &[u8],
    ) -> Result<StoreMessage, VesselWatchError> {
        let rest = topic
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| VesselWatchError::InvalidTopic(topic.to_string()))?;
        let parts: Vec<&str> = rest.split('/').collect();

        match parts.as_slice() {
            ["vessels", id] if !id.is_empty() => {
                if payload.is_empty() {
                    return Ok(StoreMessage::VesselRemoved(id.to_string()));
                }
                let mut state: VesselState = serde_json::from_slice(payload)?;
                state.id = id.to_string();
                Ok(StoreMessage::Vessel(state))
            }
            ["fleets", fleet, "log", _] => {
                let mut entry: TacticalLogEntry = serde_json::from_slice(payload)?;
                entry.fleet_id = fleet.to_string();
                Ok(StoreMessage::LogEntry(entry))
            }
            _ => Err(VesselWatchError::InvalidTopic(topic.to_string())),
        }
    }
}

impl MqttStore {
    fn vessel_topic(&self, id: &str) -> String {
        format!("{}/vessels/{}", self.prefix, id)
    }

    fn log_topic(&self, entry: &TacticalLogEntry) -> String {
        format!("{}/fleets/{}/log/{}", self.prefix, entry.fleet_id, entry.id)
    }
}

#[async_trait]
impl StateStore for MqttStore {
    async fn get(&self, id: &str) -> Result<Option<VesselState>, VesselWatchError> {
        Ok(self.cache.get(id))
    }

    async fn merge(
        &self,
        id: &str,
        update: VesselUpdate,
    ) -> Result<VesselState, VesselWatchError> {
        let merged = update.apply(id, self.cache.get(id), Utc::now());
        let payload = serde_json::to_vec(&merged)?;
        self.client
            .publish(self.vessel_topic(id), QoS::AtLeastOnce, true, payload)
            .await?;
        self.cache.upsert(merged.clone());
        Ok(merged)
    }

    async fn remove(&self, id: &str) -> Result<(), VesselWatchError> {
        self.client
            .publish(self.vessel_topic(id), QoS::AtLeastOnce, true, Vec::new())
            .await?;
        self.cache.delete(id);
        debug!("Cleared retained record {}", id);
        Ok(())
    }

    async fn query(&self, filter: &VesselFilter) -> Result<Vec<VesselState>, VesselWatchError> {
        Ok(self.cache.snapshot(filter))
    }

    fn observe(&self, filter: VesselFilter) -> watch::Receiver<Vec<VesselState>> {
        self.cache.observe(filter)
    }

    async fn append_log(&self, entry: TacticalLogEntry) -> Result<(), VesselWatchError> {
        let payload = serde_json::to_vec(&entry)?;
        self.client
            .publish(self.log_topic(&entry), QoS::AtLeastOnce, true, payload)
            .await?;
        self.cache.push_log(entry);
        Ok(())
    }

    async fn fleet_log(&self, fleet_id: &str) -> Result<Vec<TacticalLogEntry>, VesselWatchError> {
        Ok(self.cache.log(fleet_id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::models::{Position, TacticalKind, VesselStatus};

    use super::*;

    #[test]
    fn parse_vessel_message() {
        let topic = "vesselwatch/vessels/kanaka";
        let payload = r#"{
            "id": "ignored",
            "ownerId": "acc-1",
            "displayName": "Kanaka",
            "position": { "lat": -22.27, "lng": 166.45 },
            "status": "stationary",
            "heading": 0.0,
            "speedKnots": 0.0,
            "isSharing": true,
            "lastActiveAt": "2026-10-19T10:00:00Z",
            "statusChangedAt": "2026-10-19T10:00:00Z"
        }"#
        .as_bytes();

        let message = MqttStoreBuilder::parse_message("vesselwatch", topic, payload).unwrap();

        match message {
            StoreMessage::Vessel(state) => {
                assert_eq!(state.id, "kanaka");
                assert_eq!(state.status, VesselStatus::Stationary);
                assert_eq!(state.position, Position::new(-22.27, 166.45));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_cleared_vessel() {
        let message =
            MqttStoreBuilder::parse_message("vesselwatch", "vesselwatch/vessels/kanaka", b"")
                .unwrap();
        assert_eq!(message, StoreMessage::VesselRemoved("kanaka".to_string()));
    }

    #[test]
    fn parse_log_entry() {
        let entry = TacticalLogEntry {
            id: "kanaka-1".to_string(),
            fleet_id: "other".to_string(),
            vessel_id: "kanaka".to_string(),
            kind: TacticalKind::Birds,
            position: Position::new(-22.3, 166.4),
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap(),
            wind_speed_knots: 12.0,
            wind_direction_deg: 100.0,
            temperature_c: 25.0,
            photo_ref: None,
        };
        let payload = serde_json::to_vec(&entry).unwrap();

        let message = MqttStoreBuilder::parse_message(
            "vesselwatch",
            "vesselwatch/fleets/noumea/log/kanaka-1",
            &payload,
        )
        .unwrap();

        assert_eq!(
            message,
            StoreMessage::LogEntry(TacticalLogEntry {
                fleet_id: "noumea".to_string(),
                ..entry
            })
        );
    }

    #[test]
    fn reject_foreign_topics() {
        assert!(MqttStoreBuilder::parse_message("vesselwatch", "vessels-v2/123/location", b"{}").is_err());
        assert!(MqttStoreBuilder::parse_message("vesselwatch", "vesselwatch/vessels/", b"{}").is_err());
        assert!(MqttStoreBuilder::parse_message("vesselwatch", "vesselwatch/other/x", b"{}").is_err());
    }

    #[test]
    fn subscription_topics() {
        assert_eq!(
            MqttStoreBuilder::topics("vesselwatch"),
            vec!["vesselwatch/vessels/+", "vesselwatch/fleets/+/log/+"]
        );
    }
}
