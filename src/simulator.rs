//! Synthetic location source
//!
//! Produces deterministic fixes for drift and motion scenarios. Shares the
//! [`LocationEvent`] contract with the device stream so it can replace it in
//! tests and in the demo binary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    emitter::KNOTS_PER_MPS,
    geo,
    models::{LocationEvent, LocationFix, Position},
};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scenario {
    /// At rest on the origin
    Stationary,
    /// Slowly carried away by wind or current, bow swinging
    Drifting { bearing_deg: f64, speed_knots: f64 },
    /// Under way on a steady course
    Moving { course_deg: f64, speed_knots: f64 },
    /// Stationary fixes, then signal lost from `after_steps` on
    SignalLoss { after_steps: u64 },
}

#[derive(Debug, Clone)]
pub struct MotionSimulator {
    origin: Position,
    scenario: Scenario,
    tick: Duration,
    start: DateTime<Utc>,
    step: u64,
}

impl MotionSimulator {
    pub fn new(origin: Position, scenario: Scenario, tick: Duration, start: DateTime<Utc>) -> Self {
        Self {
            origin,
            scenario,
            tick,
            start,
            step: 0,
        }
    }

    /// Event at `step`, independent of previously generated steps
    pub fn sample(&self, step: u64) -> LocationEvent {
        let elapsed = self.tick.as_secs_f64() * step as f64;
        let timestamp = self.start
            + chrono::Duration::milliseconds((elapsed * 1000.0).round() as i64);

        let (position, speed_mps, heading) = match self.scenario {
            Scenario::Stationary => (self.origin, 0.0, 0.0),
            Scenario::SignalLoss { after_steps } => {
                if step >= after_steps {
                    return LocationEvent::SignalLost("simulated signal loss".to_string());
                }
                (self.origin, 0.0, 0.0)
            }
            Scenario::Drifting {
                bearing_deg,
                speed_knots,
            } => {
                let mps = speed_knots / KNOTS_PER_MPS;
                // Drifting boats yaw around their drift direction
                let yaw = (step as f64 * 0.7).sin() * 25.0;
                (
                    geo::destination(&self.origin, bearing_deg, mps * elapsed),
                    mps,
                    (bearing_deg + yaw).rem_euclid(360.0),
                )
            }
            Scenario::Moving {
                course_deg,
                speed_knots,
            } => {
                let mps = speed_knots / KNOTS_PER_MPS;
                (
                    geo::destination(&self.origin, course_deg, mps * elapsed),
                    mps,
                    course_deg,
                )
            }
        };

        LocationEvent::Fix(LocationFix {
            position,
            speed_mps: Some(speed_mps),
            heading_deg: Some(heading),
            accuracy_m: 5.0,
            timestamp,
        })
    }

    /// Stream events on a real-time interval until the receiver is dropped
    pub fn spawn(mut self, interval: Duration) -> mpsc::Receiver<LocationEvent> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let event = match self.next() {
                    Some(event) => event,
                    None => break,
                };
                if tx.send(event).await.is_err() {
                    debug!("Simulator receiver dropped");
                    break;
                }
            }
        });
        rx
    }
}

impl Iterator for MotionSimulator {
    type Item = LocationEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.sample(self.step);
        self.step += 1;
        Some(event)
    }
}
