use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::{AnalysisEngine, AnalysisSummary, AudioConfig, MusicFeaturesError, RawSample, Result};

/// Upper bound on simultaneously registered track listeners.
pub const MAX_LISTENERS: usize = 16;

/// Track lifecycle notification broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEvent {
    Loaded { generation: u64, label: String },
    Stopped { generation: u64 },
}

impl TrackEvent {
    pub fn generation(&self) -> u64 {
        match self {
            TrackEvent::Loaded { generation, .. } | TrackEvent::Stopped { generation } => {
                *generation
            }
        }
    }
}

/// Latest published sample tagged with the track generation it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSnapshot {
    pub sample: RawSample,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct SharedAudio {
    sample: RawSample,
    generation: u64,
    playing: bool,
}

type Listener = Arc<Mutex<dyn FnMut(&TrackEvent) + Send>>;

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Single writer of the shared audio state.
///
/// The engine owns the analysis stage and the transport flags. Everything it
/// publishes is read through cloneable [`AudioStateHandle`]s, which never
/// write back.
pub struct AudioEngine {
    shared: Arc<Mutex<SharedAudio>>,
    analysis: Mutex<AnalysisEngine>,
    listeners: Arc<Mutex<ListenerRegistry>>,
}

impl AudioEngine {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SharedAudio::default())),
            analysis: Mutex::new(AnalysisEngine::new(config)),
            listeners: Arc::new(Mutex::new(ListenerRegistry::default())),
        }
    }

    /// Returns a read-only view of the published state.
    pub fn handle(&self) -> AudioStateHandle {
        AudioStateHandle {
            shared: self.shared.clone(),
        }
    }

    /// Replaces the published sample. `playing` is taken from the transport,
    /// not from the caller.
    pub fn publish(&self, sample: RawSample) -> Result<()> {
        self.store(sample).map(|_| ())
    }

    /// Analyses a block of mono PCM and publishes the resulting sample.
    pub fn push_samples(&self, samples: &[f32]) -> Result<RawSample> {
        let sample = self.lock_analysis()?.process_block(samples)?;
        self.store(sample)
    }

    fn store(&self, mut sample: RawSample) -> Result<RawSample> {
        let mut shared = self.lock_shared()?;
        sample.playing = shared.playing;
        shared.sample = sample;
        Ok(sample)
    }

    /// Starts a new track: bumps the generation so readers drop stale state.
    pub fn load_track(&self, label: impl Into<String>) -> Result<u64> {
        self.lock_analysis()?.reset();
        let generation = {
            let mut shared = self.lock_shared()?;
            shared.generation += 1;
            shared.playing = true;
            shared.sample = RawSample {
                playing: true,
                ..RawSample::default()
            };
            shared.generation
        };

        let label = label.into();
        tracing::info!(generation, %label, "track loaded");
        self.broadcast(&TrackEvent::Loaded { generation, label })?;
        Ok(generation)
    }

    pub fn stop_track(&self) -> Result<u64> {
        let generation = {
            let mut shared = self.lock_shared()?;
            shared.generation += 1;
            shared.playing = false;
            shared.sample = RawSample::default();
            shared.generation
        };

        tracing::info!(generation, "track stopped");
        self.broadcast(&TrackEvent::Stopped { generation })?;
        Ok(generation)
    }

    /// Registers a lifecycle listener. The listener stays registered until the
    /// returned [`Subscription`] is dropped.
    ///
    /// Listeners run on the thread that changes the track, after the registry
    /// lock is released, so they may subscribe, unsubscribe or query
    /// [`listener_count`](Self::listener_count). Loading or stopping a track
    /// from inside a listener deadlocks on that listener.
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: FnMut(&TrackEvent) + Send + 'static,
    {
        let mut registry = self.lock_listeners()?;
        if registry.listeners.len() >= MAX_LISTENERS {
            return Err(MusicFeaturesError::msg(format!(
                "listener registry is full ({MAX_LISTENERS} listeners)"
            )));
        }
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .listeners
            .push((id, Arc::new(Mutex::new(listener)) as Listener));
        Ok(Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        })
    }

    pub fn listener_count(&self) -> Result<usize> {
        Ok(self.lock_listeners()?.listeners.len())
    }

    /// Returns an up-to-date summary of the analysed stream.
    pub fn summary(&self) -> Result<AnalysisSummary> {
        Ok(self.lock_analysis()?.summary().clone())
    }

    fn broadcast(&self, event: &TrackEvent) -> Result<()> {
        let listeners: Vec<Listener> = self
            .lock_listeners()?
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            // a listener that panicked earlier is skipped
            if let Ok(mut listener) = listener.lock() {
                (&mut *listener)(event);
            }
        }
        Ok(())
    }

    fn lock_shared(&self) -> Result<MutexGuard<'_, SharedAudio>> {
        self.shared
            .lock()
            .map_err(|_| MusicFeaturesError::msg("audio state has been poisoned"))
    }

    fn lock_analysis(&self) -> Result<MutexGuard<'_, AnalysisEngine>> {
        self.analysis
            .lock()
            .map_err(|_| MusicFeaturesError::msg("analysis pipeline has been poisoned"))
    }

    fn lock_listeners(&self) -> Result<MutexGuard<'_, ListenerRegistry>> {
        self.listeners
            .lock()
            .map_err(|_| MusicFeaturesError::msg("listener registry has been poisoned"))
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine").finish_non_exhaustive()
    }
}

/// Shared, thread-safe read view over the state published by [`AudioEngine`].
#[derive(Clone)]
pub struct AudioStateHandle {
    shared: Arc<Mutex<SharedAudio>>,
}

impl AudioStateHandle {
    /// Copies out the latest sample and its generation.
    pub fn snapshot(&self) -> Result<AudioSnapshot> {
        let shared = self
            .shared
            .lock()
            .map_err(|_| MusicFeaturesError::msg("audio state has been poisoned"))?;
        Ok(AudioSnapshot {
            sample: shared.sample,
            generation: shared.generation,
        })
    }
}

impl std::fmt::Debug for AudioStateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStateHandle").finish()
    }
}

/// Owned unsubscribe token returned by [`AudioEngine::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<ListenerRegistry>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(shared) = self.registry.upgrade() else {
            return;
        };
        // a poisoned registry is dropped with the engine anyway
        if let Ok(mut registry) = shared.lock() {
            registry.listeners.retain(|(id, _)| *id != self.id);
        };
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    fn engine() -> AudioEngine {
        AudioEngine::new(AudioConfig {
            sample_rate: 8_000,
            ..AudioConfig::default()
        })
    }

    #[test]
    fn pushes_samples_into_shared_state() {
        let audio = engine();
        let handle = audio.handle();
        audio.load_track("tone").unwrap();

        let block: Vec<f32> = (0..2048)
            .map(|i| 0.5 * (2.0 * PI * 440.0 * i as f32 / 8_000.0).sin())
            .collect();
        audio.push_samples(&block).unwrap();

        let snapshot = handle.snapshot().unwrap();
        assert!(snapshot.sample.has_audio);
        assert!(snapshot.sample.playing);
        assert!((snapshot.sample.pitch_hz - 440.0).abs() < 3.0);
        assert_eq!(snapshot.generation, 1);
    }

    #[test]
    fn publish_takes_playing_from_transport() {
        let audio = engine();
        audio
            .publish(RawSample {
                playing: true,
                has_audio: true,
                ..RawSample::default()
            })
            .unwrap();
        assert!(!audio.handle().snapshot().unwrap().sample.playing);
    }

    #[test]
    fn lifecycle_bumps_generation_and_notifies() {
        let audio = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = audio
            .subscribe(move |event| sink.lock().unwrap().push(event.clone()))
            .unwrap();

        assert_eq!(audio.load_track("first").unwrap(), 1);
        assert_eq!(audio.stop_track().unwrap(), 2);

        let snapshot = audio.handle().snapshot().unwrap();
        assert_eq!(snapshot.generation, 2);
        assert!(!snapshot.sample.playing);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                TrackEvent::Loaded {
                    generation: 1,
                    label: "first".to_string()
                },
                TrackEvent::Stopped { generation: 2 },
            ]
        );
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let audio = engine();
        let subscription = audio.subscribe(|_| {}).unwrap();
        assert_eq!(audio.listener_count().unwrap(), 1);
        drop(subscription);
        assert_eq!(audio.listener_count().unwrap(), 0);
    }

    #[test]
    fn listener_can_unsubscribe_during_broadcast() {
        let audio = engine();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let own = slot.clone();
        let counter = calls.clone();
        let subscription = audio
            .subscribe(move |_| {
                *counter.lock().unwrap() += 1;
                drop(own.lock().unwrap().take());
            })
            .unwrap();
        *slot.lock().unwrap() = Some(subscription);

        audio.load_track("first").unwrap();
        assert_eq!(audio.listener_count().unwrap(), 0);
        audio.stop_track().unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn push_samples_returns_its_own_sample() {
        let audio = engine();
        audio.load_track("tone").unwrap();
        let block: Vec<f32> = (0..2048)
            .map(|i| 0.5 * (2.0 * PI * 440.0 * i as f32 / 8_000.0).sin())
            .collect();
        let sample = audio.push_samples(&block).unwrap();
        assert!(sample.playing);
        assert!((sample.pitch_hz - 440.0).abs() < 3.0);
        assert_eq!(audio.handle().snapshot().unwrap().sample, sample);
    }

    #[test]
    fn registry_is_bounded() {
        let audio = engine();
        let subscriptions: Vec<_> = (0..MAX_LISTENERS)
            .map(|_| audio.subscribe(|_| {}).unwrap())
            .collect();
        assert!(audio.subscribe(|_| {}).is_err());
        drop(subscriptions);
        assert!(audio.subscribe(|_| {}).is_ok());
    }

    #[test]
    fn reader_sees_writer_across_threads() {
        let audio = Arc::new(engine());
        let handle = audio.handle();
        audio.load_track("threaded").unwrap();

        let writer = {
            let audio = audio.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    audio
                        .publish(RawSample {
                            pitch_hz: 100.0 + i as f64,
                            has_audio: true,
                            ..RawSample::default()
                        })
                        .unwrap();
                }
            })
        };
        writer.join().unwrap();

        let snapshot = handle.snapshot().unwrap();
        assert_eq!(snapshot.sample.pitch_hz, 149.0);
        assert!(snapshot.sample.playing);
    }
}
