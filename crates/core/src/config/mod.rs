use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{MusicFeaturesError, Result};

/// Top-level configuration for the feature pipeline. Every section falls back
/// to its defaults, so a config file only needs the values it overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub hysteresis: HysteresisConfig,
    pub policy: PolicyConfig,
    pub phase: PhaseConfig,
    pub envelope: EnvelopeConfig,
    pub weight: WeightConfig,
    pub audio: AudioConfig,
}

impl FeatureConfig {
    /// Parses a JSON document into a config.
    pub fn from_json_str(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&contents)?;
        tracing::debug!(path = %path.as_ref().display(), "loaded feature config");
        Ok(config)
    }

    /// Reports the first value that would make a component degenerate.
    ///
    /// Components guard against all of these at runtime, so an invalid config
    /// still runs; validation exists to tell the user about it.
    pub fn validate(&self) -> Result<()> {
        let h = &self.hysteresis;
        if !(h.micro_semitone_range > 0.0) {
            return Err(invalid("hysteresis.micro_semitone_range must be positive"));
        }
        if !(0.0..=1.0).contains(&h.min_clarity) {
            return Err(invalid("hysteresis.min_clarity must lie in [0, 1]"));
        }

        let p = &self.policy;
        for (name, range) in [
            ("policy.silence_ranges.saturation", p.silence_ranges.saturation),
            ("policy.silence_ranges.lightness", p.silence_ranges.lightness),
        ] {
            if range[0] > range[1] {
                return Err(invalid(format!("{name} is inverted")));
            }
        }

        if !(self.phase.color_interval_ms > 0.0) {
            return Err(invalid("phase.color_interval_ms must be positive"));
        }
        if self.phase.stable_drift.ramp_ms < 0.0 {
            return Err(invalid("phase.stable_drift.ramp_ms must not be negative"));
        }

        let e = &self.envelope;
        if e.attack < 0.0 || e.decay < 0.0 {
            return Err(invalid("envelope attack/decay must not be negative"));
        }

        if self.weight.clarity_full <= self.weight.clarity_min {
            return Err(invalid(format!(
                "weight.clarity_full ({}) must exceed weight.clarity_min ({})",
                self.weight.clarity_full, self.weight.clarity_min
            )));
        }

        if self.audio.block_size < 2 {
            return Err(invalid("audio.block_size must be at least 2"));
        }
        if self.audio.min_hz >= self.audio.max_hz {
            return Err(invalid("audio.min_hz must be below audio.max_hz"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> MusicFeaturesError {
    MusicFeaturesError::InvalidConfig(message.into())
}

/// Options for [`crate::PitchHysteresis`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    pub min_hz: f64,
    pub min_clarity: f64,
    pub hold_after_silence_ms: f64,
    pub min_stable_ms: f64,
    pub min_hold_ms: f64,
    pub smoothing_base: f64,
    pub smoothing_clarity_scale: f64,
    /// Output clamp for the fractional semitone offset.
    pub micro_semitone_range: f64,
    /// Maximum distance from the nearest semitone at which a commit may happen.
    pub deadband_frac: f64,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            min_hz: 20.0,
            min_clarity: 0.78,
            hold_after_silence_ms: 3000.0,
            min_stable_ms: 120.0,
            min_hold_ms: 250.0,
            smoothing_base: 0.25,
            smoothing_clarity_scale: 0.5,
            micro_semitone_range: 0.5,
            deadband_frac: 0.35,
        }
    }
}

/// Saturation and lightness windows the silence fallback color is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceRanges {
    pub saturation: [f64; 2],
    pub lightness: [f64; 2],
}

impl Default for SilenceRanges {
    fn default() -> Self {
        Self {
            saturation: [40.0, 70.0],
            lightness: [35.0, 60.0],
        }
    }
}

/// Options for [`crate::PitchColorPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub micro_hue_drift_deg: f64,
    pub pitch_saturation: f64,
    pub pitch_lightness: f64,
    pub silence_ranges: SilenceRanges,
    /// Only adopt a new color on pitch-class commits.
    pub note_step: bool,
    /// Seed for the fallback color generator. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            micro_hue_drift_deg: 12.0,
            pitch_saturation: 80.0,
            pitch_lightness: 55.0,
            silence_ranges: SilenceRanges::default(),
            note_step: false,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldDriftConfig {
    pub deg: f64,
    pub hz: f64,
}

impl Default for HoldDriftConfig {
    fn default() -> Self {
        Self { deg: 8.0, hz: 0.25 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StableDriftConfig {
    pub ramp_ms: f64,
    pub hz: f64,
    pub hue_deg: f64,
    pub sat_deg: f64,
    pub light_deg: f64,
}

impl Default for StableDriftConfig {
    fn default() -> Self {
        Self {
            ramp_ms: 1500.0,
            hz: 0.12,
            hue_deg: 6.0,
            sat_deg: 4.0,
            light_deg: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub hold_ms: f64,
    pub smoothing_responsiveness: f64,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            hold_ms: 350.0,
            smoothing_responsiveness: 8.0,
        }
    }
}

/// Options for [`crate::PitchColorPhaseController`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub color_interval_ms: f64,
    pub listen_after_silence_ms: f64,
    pub hold_drift: HoldDriftConfig,
    pub stable_drift: StableDriftConfig,
    pub commit: CommitConfig,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            color_interval_ms: 120.0,
            listen_after_silence_ms: 600.0,
            hold_drift: HoldDriftConfig::default(),
            stable_drift: StableDriftConfig::default(),
            commit: CommitConfig::default(),
        }
    }
}

/// Options for [`crate::BeatEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub gate_cooldown_ms: f64,
    pub strength_power: f64,
    pub strength_scale: f64,
    /// Rise rate in 1/s.
    pub attack: f64,
    /// Fall rate in 1/s.
    pub decay: f64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            gate_cooldown_ms: 120.0,
            strength_power: 1.5,
            strength_scale: 1.0,
            attack: 28.0,
            decay: 6.0,
        }
    }
}

/// Clarity window mapped onto `music_weight01`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub clarity_min: f64,
    pub clarity_full: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            clarity_min: 0.5,
            clarity_full: 0.9,
        }
    }
}

/// Configuration specific to the reference PCM sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub min_hz: f64,
    pub max_hz: f64,
    /// Blocks quieter than this are reported as having no audio.
    pub silence_db: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
            min_hz: 50.0,
            max_hz: 2000.0,
            silence_db: -60.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        FeatureConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = FeatureConfig::from_json_str(
            r#"{ "envelope": { "attack": 40.0 }, "policy": { "note_step": true, "seed": 7 } }"#,
        )
        .unwrap();

        assert_eq!(config.envelope.attack, 40.0);
        assert_eq!(config.envelope.decay, 6.0);
        assert!(config.policy.note_step);
        assert_eq!(config.policy.seed, Some(7));
        assert_eq!(config.hysteresis, HysteresisConfig::default());
    }

    #[test]
    fn rejects_collapsed_clarity_window() {
        let mut config = FeatureConfig::default();
        config.weight.clarity_full = config.weight.clarity_min;

        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("clarity_full"));
    }

    #[test]
    fn rejects_inverted_silence_range() {
        let mut config = FeatureConfig::default();
        config.policy.silence_ranges.lightness = [70.0, 20.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            FeatureConfig::from_json_str("{ nope"),
            Err(MusicFeaturesError::Json(_))
        ));
    }
}
