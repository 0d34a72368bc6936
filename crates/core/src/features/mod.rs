//! Per-frame composition of the beat envelope and the pitch color phase
//! controller into one [`MusicFeaturesFrame`].

use serde::{Deserialize, Serialize};

use crate::{
    audio::AudioSnapshot,
    beat::{BeatEnvelope, BeatInput},
    color::{clamp_unit, pitch_class_name, HslColor},
    config::{FeatureConfig, WeightConfig},
    phase::{PhaseInput, PhaseMode, PitchColorPhaseController},
    policy::ColorDecision,
};

/// One reading from the audio sampler. The pipeline only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSample {
    pub pitch_hz: f64,
    pub clarity: f64,
    /// `-inf` for digital silence. Serialises as `null` in JSON.
    #[serde(with = "volume_db")]
    pub volume_db: f64,
    pub is_beat: bool,
    pub beat_strength: f64,
    pub has_audio: bool,
    pub playing: bool,
}

impl Default for RawSample {
    fn default() -> Self {
        Self {
            pitch_hz: 0.0,
            clarity: 0.0,
            volume_db: f64::NEG_INFINITY,
            is_beat: false,
            beat_strength: 0.0,
            has_audio: false,
            playing: false,
        }
    }
}

/// JSON has no infinities, so `-inf` dB travels as `null`.
mod volume_db {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NEG_INFINITY))
    }
}

/// Timing for one animation frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInput<'a> {
    pub delta_seconds: f64,
    pub now_ms: f64,
    pub audio: &'a RawSample,
}

/// Immutable snapshot of every signal animations read for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MusicFeaturesFrame {
    pub now_ms: f64,
    pub delta_seconds: f64,
    pub has_music: bool,
    pub music_weight01: f64,
    pub volume_db: Option<f64>,
    pub beat_envelope: f64,
    pub beat_trigger: bool,
    pub move_group: u8,
    pub pitch_class: Option<u8>,
    pub pitch_name: Option<&'static str>,
    pub pitch_changed: bool,
    pub pitch_mode: PhaseMode,
    pub pitch_color: HslColor,
    pub pitch_decision: Option<ColorDecision>,
}

/// Maps clarity onto `[0, 1]` between `clarity_min` and `clarity_full`.
/// A collapsed or inverted window degrades to a step at `clarity_min`.
pub fn music_weight(has_music: bool, clarity: f64, weight: &WeightConfig) -> f64 {
    if !has_music {
        return 0.0;
    }
    let span = weight.clarity_full - weight.clarity_min;
    if span > f64::EPSILON {
        clamp_unit((clarity - weight.clarity_min) / span)
    } else if clarity >= weight.clarity_min {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug)]
pub struct MusicFeatureExtractor {
    weight: WeightConfig,
    beat: BeatEnvelope,
    phase: PitchColorPhaseController,
    generation: Option<u64>,
}

impl MusicFeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        if let Err(err) = config.validate() {
            tracing::warn!(%err, "feature config is degenerate, continuing with guards");
        }
        Self {
            weight: config.weight,
            beat: BeatEnvelope::new(config.envelope),
            phase: PitchColorPhaseController::new(config.phase, config.policy, config.hysteresis),
            generation: None,
        }
    }

    pub fn beat(&self) -> &BeatEnvelope {
        &self.beat
    }

    pub fn phase(&self) -> &PitchColorPhaseController {
        &self.phase
    }

    pub fn reset(&mut self) {
        self.beat.reset();
        self.phase.reset();
    }

    pub fn step(&mut self, input: FrameInput<'_>) -> MusicFeaturesFrame {
        let audio = input.audio;
        let delta_ms = input.delta_seconds * 1000.0;
        let has_music = audio.has_audio && audio.playing;
        let music_weight01 = music_weight(has_music, audio.clarity, &self.weight);

        let beat = self.beat.step(BeatInput {
            dt_ms: delta_ms,
            now_ms: input.now_ms,
            is_beat: has_music && audio.is_beat,
            strength: audio.beat_strength,
        });

        let (pitch_hz, clarity) = if has_music {
            (audio.pitch_hz, audio.clarity)
        } else {
            (f64::NAN, 0.0)
        };
        let phase = self.phase.step(PhaseInput {
            now_ms: input.now_ms,
            delta_ms,
            pitch_hz,
            clarity,
        });

        MusicFeaturesFrame {
            now_ms: input.now_ms,
            delta_seconds: input.delta_seconds,
            has_music,
            music_weight01,
            volume_db: audio.volume_db.is_finite().then_some(audio.volume_db),
            beat_envelope: beat.envelope,
            beat_trigger: beat.did_trigger,
            move_group: beat.move_group,
            pitch_class: phase.committed_pitch_class,
            pitch_name: phase.committed_pitch_class.map(pitch_class_name),
            pitch_changed: phase.committed,
            pitch_mode: phase.mode,
            pitch_color: phase.color,
            pitch_decision: phase.decision,
        }
    }

    /// Steps from a shared audio snapshot, resetting first if the track
    /// generation moved since the last call.
    pub fn step_snapshot(
        &mut self,
        delta_seconds: f64,
        now_ms: f64,
        snapshot: &AudioSnapshot,
    ) -> MusicFeaturesFrame {
        if self.generation.is_some_and(|seen| seen != snapshot.generation) {
            tracing::debug!(
                generation = snapshot.generation,
                "track generation changed, resetting features"
            );
            self.reset();
        }
        self.generation = Some(snapshot.generation);
        self.step(FrameInput {
            delta_seconds,
            now_ms,
            audio: &snapshot.sample,
        })
    }
}
