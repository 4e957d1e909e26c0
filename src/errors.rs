//! Errors for vessel watch
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VesselWatchError {
    #[error("MQTT connection failed")]
    MqttConnectionError(#[from] rumqttc::ConnectionError),

    #[error("MQTT client error")]
    MqttClientError(#[from] rumqttc::ClientError),

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("HTTP error")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Invalid topic")]
    InvalidTopic(String),

    #[error("Sharing id is required to start sharing")]
    MissingSharingId,

    #[error("Distress contact cannot be empty")]
    EmptyDistressContact,

    #[error("Unknown sound label: {0}")]
    UnknownSoundLabel(String),

    #[error("Unknown alert kind: {0}")]
    UnknownAlertKind(String),

    #[error("Unknown tile overlay: {0}")]
    UnknownOverlay(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Elevation lookup failed: {0}")]
    ElevationError(String),

    #[error("Weather lookup failed: {0}")]
    WeatherError(String),

    #[error("Playback error: {0}")]
    PlaybackError(String),

    #[error("Dispatch error: {0}")]
    DispatchError(String),

    #[error("Channel closed")]
    ChannelClosed,
}
