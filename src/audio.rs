//! Audio alert engine
//!
//! Wraps a platform playback capability with the unlock requirement and
//! bookkeeping of which named sounds are currently playing.

use std::collections::HashMap;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::errors::VesselWatchError;

/// Platform playback capability
pub trait PlaybackBackend: Send {
    /// Load the resource at `url` and start playing it under `id`
    fn load_and_play(
        &mut self,
        id: &str,
        url: &str,
        volume: f32,
        looping: bool,
    ) -> Result<(), VesselWatchError>;

    /// Halt and rewind the sound registered under `id`
    fn stop(&mut self, id: &str);
}

/// Backend that only logs, for headless deployments
#[derive(Debug, Default)]
pub struct LoggingBackend;

impl PlaybackBackend for LoggingBackend {
    fn load_and_play(
        &mut self,
        id: &str,
        url: &str,
        volume: f32,
        looping: bool,
    ) -> Result<(), VesselWatchError> {
        info!(
            "Playing sound {} from {} (volume={:.2}, loop={})",
            id, url, volume, looping
        );
        Ok(())
    }

    fn stop(&mut self, id: &str) {
        info!("Stopping sound {}", id);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ActiveSound {
    url: String,
    looping: bool,
}

pub struct AudioEngine {
    backend: Box<dyn PlaybackBackend>,
    unlocked: bool,
    locked_warning_logged: bool,
    active: HashMap<String, ActiveSound>,
    alarm: watch::Sender<bool>,
}

impl AudioEngine {
    pub fn new(backend: Box<dyn PlaybackBackend>) -> Self {
        let (alarm, _) = watch::channel(false);
        Self {
            backend,
            unlocked: false,
            locked_warning_logged: false,
            active: HashMap::new(),
            alarm,
        }
    }

    /// Must be called from a direct user interaction
    pub fn unlock(&mut self) {
        if !self.unlocked {
            info!("Audio playback unlocked");
        }
        self.unlocked = true;
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Start or replace the sound registered under `id`.
    ///
    /// A no-op while locked. Calling again for a looping sound that is
    /// already playing does nothing.
    pub fn play(&mut self, id: &str, url: &str, volume: f32, looping: bool) {
        if !self.unlocked {
            if !self.locked_warning_logged {
                warn!("Audio is locked, ignoring playback of {} until unlocked", id);
                self.locked_warning_logged = true;
            } else {
                debug!("Audio locked, skipping {}", id);
            }
            return;
        }

        if let Some(existing) = self.active.get(id) {
            if existing.looping && looping && existing.url == url {
                return;
            }
            self.backend.stop(id);
            self.active.remove(id);
        }

        match self
            .backend
            .load_and_play(id, url, volume.clamp(0.0, 1.0), looping)
        {
            Ok(()) => {
                self.active.insert(
                    id.to_string(),
                    ActiveSound {
                        url: url.to_string(),
                        looping,
                    },
                );
            }
            Err(e) => error!("Failed to play {}: {}", id, e),
        }
        self.publish();
    }

    pub fn stop(&mut self, id: &str) {
        if self.active.remove(id).is_some() {
            self.backend.stop(id);
            self.publish();
        }
    }

    pub fn stop_all(&mut self) {
        for id in self.active.keys() {
            self.backend.stop(id);
        }
        self.active.clear();
        self.publish();
    }

    /// The backend reports that a non-looping sound reached its end
    pub fn finished(&mut self, id: &str) {
        if self.active.get(id).is_some_and(|s| !s.looping) {
            self.active.remove(id);
            self.publish();
        }
    }

    pub fn is_playing(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    pub fn is_alarm_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Observe the aggregate "any alarm playing" flag
    pub fn alarm_state(&self) -> watch::Receiver<bool> {
        self.alarm.subscribe()
    }

    fn publish(&self) {
        let active = self.is_alarm_active();
        self.alarm.send_if_modified(|current| {
            if *current != active {
                *current = active;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Play(String, bool),
        Stop(String),
    }

    /// Backend recording every call, shared with the test body
    #[derive(Clone, Default)]
    pub struct RecordingBackend {
        pub calls: Arc<Mutex<Vec<Call>>>,
        pub fail: bool,
    }

    impl RecordingBackend {
        pub fn plays(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    Call::Play(id, _) => Some(id.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl PlaybackBackend for RecordingBackend {
        fn load_and_play(
            &mut self,
            id: &str,
            _url: &str,
            _volume: f32,
            looping: bool,
        ) -> Result<(), VesselWatchError> {
            if self.fail {
                return Err(VesselWatchError::PlaybackError("device busy".to_string()));
            }
            self.calls
                .lock()
                .unwrap()
                .push(Call::Play(id.to_string(), looping));
            Ok(())
        }

        fn stop(&mut self, id: &str) {
            self.calls.lock().unwrap().push(Call::Stop(id.to_string()));
        }
    }

    fn unlocked_engine() -> (AudioEngine, RecordingBackend) {
        let backend = RecordingBackend::default();
        let mut engine = AudioEngine::new(Box::new(backend.clone()));
        engine.unlock();
        (engine, backend)
    }

    #[test]
    fn play_is_noop_until_unlocked() {
        let backend = RecordingBackend::default();
        let mut engine = AudioEngine::new(Box::new(backend.clone()));

        engine.play("alarm", "siren.mp3", 1.0, true);
        assert!(!engine.is_alarm_active());
        assert!(backend.plays().is_empty());

        engine.unlock();
        engine.play("alarm", "siren.mp3", 1.0, true);
        assert!(engine.is_alarm_active());
    }

    #[test]
    fn looping_sound_is_idempotent() {
        let (mut engine, backend) = unlocked_engine();
        engine.play("alarm", "siren.mp3", 1.0, true);
        engine.play("alarm", "siren.mp3", 1.0, true);

        assert_eq!(backend.plays(), vec!["alarm"]);
    }

    #[test]
    fn one_shot_sound_is_replaced() {
        let (mut engine, backend) = unlocked_engine();
        engine.play("chime", "chime.mp3", 0.5, false);
        engine.play("chime", "chime.mp3", 0.5, false);

        assert_eq!(
            *backend.calls.lock().unwrap(),
            vec![
                Call::Play("chime".to_string(), false),
                Call::Stop("chime".to_string()),
                Call::Play("chime".to_string(), false),
            ]
        );
    }

    #[test]
    fn alarm_flag_follows_active_sounds() {
        let (mut engine, _backend) = unlocked_engine();
        let state = engine.alarm_state();

        engine.play("a", "siren.mp3", 1.0, true);
        engine.play("b", "chime.mp3", 1.0, false);
        assert!(*state.borrow());

        engine.finished("b");
        assert!(engine.is_alarm_active());
        engine.finished("a");
        assert!(engine.is_alarm_active(), "looping sounds do not finish");

        engine.stop_all();
        assert!(!*state.borrow());
        assert!(!engine.is_playing("a"));
    }

    #[test]
    fn playback_failure_is_not_tracked() {
        let backend = RecordingBackend {
            fail: true,
            ..Default::default()
        };
        let mut engine = AudioEngine::new(Box::new(backend));
        engine.unlock();
        engine.play("alarm", "siren.mp3", 1.0, true);

        assert!(!engine.is_alarm_active());
    }
}
