//! Maps the committed pitch class onto a hue wheel color, with a random
//! fallback color for long silences.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::{
    color::{clamp_total, HslColor, PITCH_CLASS_HUES},
    config::{HysteresisConfig, PolicyConfig},
    hysteresis::{PitchHysteresis, PitchInput, PitchResult},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyInput {
    pub pitch_hz: f64,
    pub clarity: f64,
    pub now_ms: f64,
    pub dt_ms: f64,
}

/// The color chosen for one tick together with the pitch reading behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorDecision {
    pub color: HslColor,
    pub result: PitchResult,
}

#[derive(Debug)]
pub struct PitchColorPolicy {
    config: PolicyConfig,
    micro_semitone_range: f64,
    hysteresis: PitchHysteresis,
    rng: StdRng,
    last_good: HslColor,
}

impl PitchColorPolicy {
    pub fn new(config: PolicyConfig, hysteresis: HysteresisConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let last_good = random_color(&mut rng, &config);
        Self {
            micro_semitone_range: hysteresis.micro_semitone_range,
            hysteresis: PitchHysteresis::new(hysteresis),
            config,
            rng,
            last_good,
        }
    }

    pub fn hysteresis(&self) -> &PitchHysteresis {
        &self.hysteresis
    }

    /// The color returned while no pitch is present.
    pub fn last_good_color(&self) -> HslColor {
        self.last_good
    }

    /// Clears the pitch tracker. The fallback color is kept so a reset does
    /// not cause a jump.
    pub fn reset(&mut self) {
        self.hysteresis.reset();
    }

    pub fn decide(&mut self, input: PolicyInput) -> ColorDecision {
        let result = self.hysteresis.update(PitchInput {
            pitch_hz: input.pitch_hz,
            clarity: input.clarity,
            dt_ms: input.dt_ms,
            now_ms: input.now_ms,
        });

        match result {
            PitchResult::Silence { .. } => {
                // Re-rolls on every tick past the threshold, not once.
                if self.hysteresis.is_silent_long_enough() {
                    self.last_good = random_color(&mut self.rng, &self.config);
                }
            }
            PitchResult::Pitch {
                pitch_class,
                fractional_distance,
                changed,
                ..
            } => {
                if !self.config.note_step || changed {
                    self.last_good = self.pitch_color(pitch_class, fractional_distance);
                }
            }
        }

        ColorDecision {
            color: self.last_good,
            result,
        }
    }

    fn pitch_color(&self, pitch_class: u8, fractional_distance: f64) -> HslColor {
        let normalised = if self.micro_semitone_range > 0.0 {
            clamp_total(fractional_distance / self.micro_semitone_range, -1.0, 1.0)
        } else {
            0.0
        };
        let hue_offset = normalised * self.config.micro_hue_drift_deg;
        let base_hue = PITCH_CLASS_HUES[usize::from(pitch_class % 12)];
        HslColor::new(
            base_hue + hue_offset,
            self.config.pitch_saturation,
            self.config.pitch_lightness,
        )
    }
}

fn random_in(rng: &mut StdRng, range: [f64; 2]) -> f64 {
    let (lo, hi) = if range[0] <= range[1] {
        (range[0], range[1])
    } else {
        (range[1], range[0])
    };
    if !lo.is_finite() || !hi.is_finite() {
        return if lo.is_finite() { lo } else { hi };
    }
    if !(hi - lo > f64::EPSILON) {
        return lo;
    }
    rng.random_range(lo..=hi)
}

fn random_color(rng: &mut StdRng, config: &PolicyConfig) -> HslColor {
    let hue = rng.random_range(0.0..360.0);
    let saturation = random_in(rng, config.silence_ranges.saturation);
    let lightness = random_in(rng, config.silence_ranges.lightness);
    HslColor::new(hue, saturation, lightness)
}
