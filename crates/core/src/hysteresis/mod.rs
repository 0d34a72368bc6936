//! Pitch stabiliser that turns a jittery Hz reading into a committed pitch
//! class.
//!
//! A new class is only accepted once it has been the candidate for
//! `min_stable_ms`, the previous commit is at least `min_hold_ms` old, and the
//! reading sits within `deadband_frac` of a semitone. The very first valid
//! reading commits immediately.

use serde::{Deserialize, Serialize};

use crate::{color::clamp_total, config::HysteresisConfig};

/// One raw pitch reading plus its timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchInput {
    pub pitch_hz: f64,
    pub clarity: f64,
    pub dt_ms: f64,
    pub now_ms: f64,
}

/// Outcome of a single [`PitchHysteresis::update`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PitchResult {
    Silence {
        silence_ms: f64,
    },
    Pitch {
        /// Smoothed frequency.
        hz: f64,
        /// Continuous MIDI note number of `hz`.
        midi: f64,
        /// Committed pitch class, `0..=11`.
        pitch_class: u8,
        /// Signed semitone offset from the nearest step, clamped to
        /// `±micro_semitone_range`.
        fractional_distance: f64,
        /// True only on the tick a new class was committed.
        changed: bool,
    },
}

impl PitchResult {
    pub fn is_silence(&self) -> bool {
        matches!(self, PitchResult::Silence { .. })
    }

    pub fn changed(&self) -> bool {
        matches!(self, PitchResult::Pitch { changed: true, .. })
    }

    pub fn pitch_class(&self) -> Option<u8> {
        match self {
            PitchResult::Pitch { pitch_class, .. } => Some(*pitch_class),
            PitchResult::Silence { .. } => None,
        }
    }
}

/// Mutable tracker state, persisted across ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HysteresisState {
    pub smoothed_hz: Option<f64>,
    pub silence_ms: f64,
    pub committed_pitch_class: Option<u8>,
    pub candidate_pitch_class: Option<u8>,
    pub candidate_stable_ms: f64,
    pub last_commit_at_ms: f64,
}

/// Converts a frequency to a continuous MIDI note number. Non-positive
/// frequencies yield NaN or -inf.
pub fn hz_to_midi(hz: f64) -> f64 {
    69.0 + 12.0 * (hz / 440.0).log2()
}

#[derive(Debug, Clone)]
pub struct PitchHysteresis {
    config: HysteresisConfig,
    state: HysteresisState,
}

impl PitchHysteresis {
    pub fn new(config: HysteresisConfig) -> Self {
        Self {
            config,
            state: HysteresisState::default(),
        }
    }

    pub fn config(&self) -> &HysteresisConfig {
        &self.config
    }

    pub fn state(&self) -> &HysteresisState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = HysteresisState::default();
    }

    /// True once accumulated silence reaches `hold_after_silence_ms`.
    pub fn is_silent_long_enough(&self) -> bool {
        self.state.silence_ms >= self.config.hold_after_silence_ms
    }

    fn is_valid(&self, input: &PitchInput) -> bool {
        input.pitch_hz.is_finite()
            && input.pitch_hz > self.config.min_hz
            && input.clarity >= self.config.min_clarity
    }

    pub fn update(&mut self, input: PitchInput) -> PitchResult {
        let dt_ms = clamp_total(input.dt_ms, 0.0, f64::INFINITY);

        if !self.is_valid(&input) {
            self.state.silence_ms += dt_ms;
            self.state.candidate_pitch_class = None;
            self.state.candidate_stable_ms = 0.0;
            return PitchResult::Silence {
                silence_ms: self.state.silence_ms,
            };
        }

        self.state.silence_ms = 0.0;

        let alpha = clamp_total(
            self.config.smoothing_base + input.clarity * self.config.smoothing_clarity_scale,
            0.0,
            1.0,
        );
        let hz = match self.state.smoothed_hz {
            Some(previous) => previous + (input.pitch_hz - previous) * alpha,
            None => input.pitch_hz,
        };
        self.state.smoothed_hz = Some(hz);

        let midi = hz_to_midi(hz);
        let step = midi.round();
        let fractional = midi - step;
        let candidate = (step as i64).rem_euclid(12) as u8;
        let range = self.config.micro_semitone_range.abs();
        let fractional_distance = clamp_total(fractional, -range, range);

        let Some(committed) = self.state.committed_pitch_class else {
            self.commit(candidate, input.now_ms);
            return PitchResult::Pitch {
                hz,
                midi,
                pitch_class: candidate,
                fractional_distance,
                changed: true,
            };
        };

        if self.state.candidate_pitch_class != Some(candidate) {
            self.state.candidate_pitch_class = Some(candidate);
            self.state.candidate_stable_ms = 0.0;
        } else {
            self.state.candidate_stable_ms += dt_ms;
        }

        let held = input.now_ms - self.state.last_commit_at_ms >= self.config.min_hold_ms;
        let stable = self.state.candidate_stable_ms >= self.config.min_stable_ms;
        let centred = fractional.abs() <= self.config.deadband_frac;

        let changed = candidate != committed && held && stable && centred;
        if changed {
            self.commit(candidate, input.now_ms);
        }

        PitchResult::Pitch {
            hz,
            midi,
            pitch_class: if changed { candidate } else { committed },
            fractional_distance,
            changed,
        }
    }

    fn commit(&mut self, pitch_class: u8, now_ms: f64) {
        tracing::debug!(
            from = ?self.state.committed_pitch_class,
            to = pitch_class,
            now_ms,
            "pitch class committed"
        );
        self.state.committed_pitch_class = Some(pitch_class);
        self.state.candidate_pitch_class = Some(pitch_class);
        self.state.candidate_stable_ms = 0.0;
        self.state.last_commit_at_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: f64 = 16.0;

    fn tracker() -> PitchHysteresis {
        PitchHysteresis::new(HysteresisConfig {
            smoothing_base: 1.0,
            smoothing_clarity_scale: 0.0,
            ..HysteresisConfig::default()
        })
    }

    fn input(pitch_hz: f64, now_ms: f64) -> PitchInput {
        PitchInput {
            pitch_hz,
            clarity: 0.9,
            dt_ms: TICK,
            now_ms,
        }
    }

    /// Frequency `cents` away from MIDI note `midi`.
    fn hz(midi: f64, cents: f64) -> f64 {
        440.0 * 2f64.powf((midi + cents / 100.0 - 69.0) / 12.0)
    }

    /// Feeds `hz` every tick from `start` for `duration` ms, returning the
    /// last result and the next timestamp.
    fn feed(
        tracker: &mut PitchHysteresis,
        hz: f64,
        start: f64,
        duration: f64,
    ) -> (PitchResult, f64) {
        let mut now = start;
        let mut last = tracker.update(input(hz, now));
        while now < start + duration {
            now += TICK;
            last = tracker.update(input(hz, now));
        }
        (last, now + TICK)
    }

    #[test]
    fn first_valid_sample_commits_immediately() {
        let mut tracker = tracker();
        let result = tracker.update(input(440.0, 0.0));

        match result {
            PitchResult::Pitch {
                pitch_class,
                changed,
                midi,
                ..
            } => {
                assert_eq!(pitch_class, 9);
                assert!(changed);
                assert!((midi - 69.0).abs() < 1e-9);
            }
            other => panic!("expected pitch, got {other:?}"),
        }
    }

    #[test]
    fn silence_accumulates_until_threshold() {
        let mut tracker = PitchHysteresis::new(HysteresisConfig {
            min_hz: 20.0,
            min_clarity: 0.78,
            hold_after_silence_ms: 1000.0,
            ..HysteresisConfig::default()
        });

        let mut ticks = 0;
        while !tracker.is_silent_long_enough() {
            let result = tracker.update(PitchInput {
                pitch_hz: 0.0,
                clarity: 0.0,
                dt_ms: TICK,
                now_ms: ticks as f64 * TICK,
            });
            assert!(result.is_silence());
            ticks += 1;
        }

        // 1000 / 16 = 62.5, so the 63rd tick crosses the threshold
        assert_eq!(ticks, 63);
        assert!(tracker.state().silence_ms >= 1000.0);
        assert!(tracker.is_silent_long_enough());

        tracker.update(PitchInput {
            pitch_hz: f64::NAN,
            clarity: 1.0,
            dt_ms: TICK,
            now_ms: 2000.0,
        });
        assert!(tracker.is_silent_long_enough());
    }

    #[test]
    fn invalid_readings_are_silence() {
        let mut tracker = tracker();
        for (pitch_hz, clarity) in [
            (f64::NAN, 0.99),
            (f64::INFINITY, 0.99),
            (15.0, 0.99),
            (440.0, 0.5),
            (-440.0, 0.99),
        ] {
            let result = tracker.update(PitchInput {
                pitch_hz,
                clarity,
                dt_ms: TICK,
                now_ms: 0.0,
            });
            assert!(result.is_silence(), "{pitch_hz} @ {clarity}");
        }
        assert_eq!(tracker.state().committed_pitch_class, None);
    }

    #[test]
    fn commits_when_hold_stability_and_deadband_agree() {
        let mut tracker = tracker();
        let (_, now) = feed(&mut tracker, hz(69.0, 0.0), 0.0, 400.0);

        let (result, _) = feed(&mut tracker, hz(72.0, 0.0), now, 200.0);
        assert_eq!(result.pitch_class(), Some(0));
        assert_eq!(tracker.state().committed_pitch_class, Some(0));
    }

    #[test]
    fn hold_time_blocks_commit() {
        let mut tracker = PitchHysteresis::new(HysteresisConfig {
            smoothing_base: 1.0,
            smoothing_clarity_scale: 0.0,
            min_hold_ms: 10_000.0,
            ..HysteresisConfig::default()
        });
        let (_, now) = feed(&mut tracker, hz(69.0, 0.0), 0.0, 100.0);

        let (result, _) = feed(&mut tracker, hz(72.0, 0.0), now, 1000.0);
        assert_eq!(result.pitch_class(), Some(9));
        assert!(!result.changed());
    }

    #[test]
    fn stability_blocks_commit() {
        let mut tracker = tracker();
        let (_, mut now) = feed(&mut tracker, hz(69.0, 0.0), 0.0, 400.0);

        // alternate between two foreign classes so neither stays the candidate
        for i in 0..60 {
            let midi = if i % 2 == 0 { 72.0 } else { 74.0 };
            let result = tracker.update(input(hz(midi, 0.0), now));
            assert_eq!(result.pitch_class(), Some(9));
            now += TICK;
        }
    }

    #[test]
    fn deadband_blocks_commit() {
        let mut tracker = tracker();
        let (_, now) = feed(&mut tracker, hz(69.0, 0.0), 0.0, 400.0);

        // 45 cents off the C is outside the 0.35 semitone dead-band
        let (result, _) = feed(&mut tracker, hz(72.0, 45.0), now, 1000.0);
        assert_eq!(result.pitch_class(), Some(9));
        match result {
            PitchResult::Pitch {
                fractional_distance,
                ..
            } => assert!((fractional_distance - 0.45).abs() < 1e-6),
            other => panic!("expected pitch, got {other:?}"),
        }
    }

    #[test]
    fn fractional_distance_is_clamped_for_output() {
        let mut tracker = PitchHysteresis::new(HysteresisConfig {
            micro_semitone_range: 0.2,
            ..HysteresisConfig::default()
        });
        match tracker.update(input(hz(69.0, -40.0), 0.0)) {
            PitchResult::Pitch {
                fractional_distance,
                ..
            } => assert!((fractional_distance + 0.2).abs() < 1e-12),
            other => panic!("expected pitch, got {other:?}"),
        }
    }

    #[test]
    fn nan_micro_range_degrades_instead_of_panicking() {
        let mut tracker = PitchHysteresis::new(HysteresisConfig {
            micro_semitone_range: f64::NAN,
            ..HysteresisConfig::default()
        });
        let result = tracker.update(input(440.0, 0.0));
        assert_eq!(result.pitch_class(), Some(9));
    }

    #[test]
    fn silence_clears_candidate_stability() {
        let mut tracker = tracker();
        let (_, now) = feed(&mut tracker, hz(69.0, 0.0), 0.0, 400.0);
        feed(&mut tracker, hz(72.0, 0.0), now, 80.0);
        assert!(tracker.state().candidate_stable_ms > 0.0);

        tracker.update(PitchInput {
            pitch_hz: 0.0,
            clarity: 0.0,
            dt_ms: TICK,
            now_ms: now + 100.0,
        });
        assert_eq!(tracker.state().candidate_pitch_class, None);
        assert_eq!(tracker.state().candidate_stable_ms, 0.0);

        // returning pitch starts its stability count from scratch
        let result = tracker.update(input(hz(72.0, 0.0), now + 116.0));
        assert!(!result.changed());
        assert_eq!(tracker.state().candidate_stable_ms, 0.0);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut tracker = tracker();
        feed(&mut tracker, hz(64.0, 0.0), 0.0, 200.0);

        tracker.reset();
        let once = tracker.state().clone();
        tracker.reset();
        assert_eq!(tracker.state(), &once);
        assert_eq!(once, HysteresisState::default());
    }
}
