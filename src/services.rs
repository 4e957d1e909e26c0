//! HTTP clients for the elevation and weather lookups.
//!
//! Both speak the Open-Meteo JSON API. Only the fields needed here are
//! deserialized.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{
    emitter::KNOTS_PER_MPS,
    errors::VesselWatchError,
    fleet::WeatherService,
    models::{Position, Weather},
    radar::ElevationService,
};

pub const DEFAULT_ELEVATION_URL: &str = "https://api.open-meteo.com/v1/elevation";
pub const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Maximum coordinates per elevation request
const ELEVATION_BATCH: usize = 100;

fn http_client(timeout: Duration) -> Result<reqwest::Client, VesselWatchError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

#[derive(Deserialize)]
struct ElevationResponse {
    elevation: Vec<f64>,
}

pub struct HttpElevationClient {
    http: reqwest::Client,
    url: String,
}

impl HttpElevationClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, VesselWatchError> {
        Ok(Self {
            http: http_client(timeout)?,
            url,
        })
    }

    fn coordinate_params(positions: &[Position]) -> (String, String) {
        let join = |f: fn(&Position) -> f64| {
            positions
                .iter()
                .map(|p| format!("{:.6}", f(p)))
                .collect::<Vec<_>>()
                .join(",")
        };
        (join(|p| p.latitude), join(|p| p.longitude))
    }
}

#[async_trait]
impl ElevationService for HttpElevationClient {
    async fn elevations(&self, positions: &[Position]) -> Result<Vec<f64>, VesselWatchError> {
        let mut result = Vec::with_capacity(positions.len());
        for chunk in positions.chunks(ELEVATION_BATCH) {
            let (latitude, longitude) = Self::coordinate_params(chunk);
            let response: ElevationResponse = self
                .http
                .get(&self.url)
                .query(&[("latitude", latitude), ("longitude", longitude)])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            if response.elevation.len() != chunk.len() {
                return Err(VesselWatchError::ElevationError(format!(
                    "expected {} elevations, got {}",
                    chunk.len(),
                    response.elevation.len()
                )));
            }
            result.extend(response.elevation);
        }
        debug!("Fetched {} elevations", result.len());
        Ok(result)
    }
}

#[derive(Deserialize)]
struct ForecastResponse {
    current: CurrentConditions,
}

#[derive(Deserialize)]
struct CurrentConditions {
    temperature_2m: f64,
    /// m/s, requested with `wind_speed_unit=ms`
    wind_speed_10m: f64,
    wind_direction_10m: f64,
}

pub struct HttpWeatherClient {
    http: reqwest::Client,
    url: String,
}

impl HttpWeatherClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, VesselWatchError> {
        Ok(Self {
            http: http_client(timeout)?,
            url,
        })
    }
}

#[async_trait]
impl WeatherService for HttpWeatherClient {
    async fn weather_at(&self, position: &Position) -> Result<Weather, VesselWatchError> {
        let response: ForecastResponse = self
            .http
            .get(&self.url)
            .query(&[
                ("latitude", format!("{:.5}", position.latitude)),
                ("longitude", format!("{:.5}", position.longitude)),
                (
                    "current",
                    "temperature_2m,wind_speed_10m,wind_direction_10m".to_string(),
                ),
                ("wind_speed_unit", "ms".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.current.into())
    }
}

impl From<CurrentConditions> for Weather {
    fn from(current: CurrentConditions) -> Self {
        Weather {
            wind_speed_knots: current.wind_speed_10m * KNOTS_PER_MPS,
            wind_direction_deg: current.wind_direction_10m,
            temperature_c: current.temperature_2m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevation_response_deserialize() {
        let json = r#"{"elevation": [-12.0, 0.4, 38.0]}"#;
        let response: ElevationResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.elevation, vec![-12.0, 0.4, 38.0]);
    }

    #[test]
    fn forecast_response_converts_to_knots() {
        let json = r#"{
            "latitude": -22.25,
            "longitude": 166.5,
            "current_units": {"temperature_2m": "°C", "wind_speed_10m": "m/s"},
            "current": {
                "time": "2026-10-19T10:00",
                "interval": 900,
                "temperature_2m": 24.3,
                "wind_speed_10m": 5.0,
                "wind_direction_10m": 110.0
            }
        }"#;
        let response: ForecastResponse = serde_json::from_str(json).unwrap();
        let weather: Weather = response.current.into();

        assert_eq!(weather.temperature_c, 24.3);
        assert_eq!(weather.wind_speed_knots, 5.0 * KNOTS_PER_MPS);
        assert_eq!(weather.wind_direction_deg, 110.0);
    }

    #[test]
    fn coordinate_params_are_joined() {
        let (lat, lng) = HttpElevationClient::coordinate_params(&[
            Position::new(-22.27, 166.45),
            Position::new(-22.28, 166.46),
        ]);
        assert_eq!(lat, "-22.270000,-22.280000");
        assert_eq!(lng, "166.450000,166.460000");
    }
}
