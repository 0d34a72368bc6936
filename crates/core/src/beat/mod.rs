//! Attack/decay envelope follower for beat cues.
//!
//! Raw beats are shaped, gated by a cooldown and then smoothed. A beat that
//! passes the gate also flips the two-way `move_group` bit, which animations
//! use to alternate between poses.

use serde::Serialize;

use crate::{
    color::{clamp_total, clamp_unit, exp_smoothing},
    config::EnvelopeConfig,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatInput {
    pub dt_ms: f64,
    pub now_ms: f64,
    pub is_beat: bool,
    pub strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BeatOutput {
    pub envelope: f64,
    pub move_group: u8,
    /// One-shot pulse, true only on the tick a beat passed the gate.
    pub did_trigger: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BeatEnvelopeState {
    pub envelope: f64,
    pub last_beat_at_ms: Option<f64>,
    pub move_group: u8,
}

#[derive(Debug, Clone)]
pub struct BeatEnvelope {
    config: EnvelopeConfig,
    state: BeatEnvelopeState,
}

impl BeatEnvelope {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self {
            config,
            state: BeatEnvelopeState::default(),
        }
    }

    pub fn state(&self) -> &BeatEnvelopeState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = BeatEnvelopeState::default();
    }

    pub fn step(&mut self, input: BeatInput) -> BeatOutput {
        let raw = if input.is_beat {
            clamp_unit(input.strength)
        } else {
            0.0
        };
        let shaped = clamp_unit(raw.powf(self.config.strength_power) * self.config.strength_scale);

        let cooled = self
            .state
            .last_beat_at_ms
            .map_or(true, |last| input.now_ms - last > self.config.gate_cooldown_ms);
        let gated = if input.is_beat && cooled { shaped } else { 0.0 };

        let did_trigger = gated > 0.0;
        if did_trigger {
            self.state.last_beat_at_ms = Some(input.now_ms);
            self.state.move_group ^= 1;
            tracing::trace!(strength = gated, now_ms = input.now_ms, "beat triggered");
        }

        let responsiveness = if gated > self.state.envelope {
            self.config.attack
        } else {
            self.config.decay
        };
        let alpha = exp_smoothing(clamp_total(input.dt_ms, 0.0, f64::INFINITY), responsiveness);
        let envelope = self.state.envelope + (gated - self.state.envelope) * alpha;
        self.state.envelope = clamp_unit(envelope);

        BeatOutput {
            envelope: self.state.envelope,
            move_group: self.state.move_group,
            did_trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: f64 = 16.0;

    fn envelope() -> BeatEnvelope {
        BeatEnvelope::new(EnvelopeConfig {
            attack: 28.0,
            decay: 6.0,
            strength_power: 1.0,
            ..EnvelopeConfig::default()
        })
    }

    fn beat(now_ms: f64, is_beat: bool) -> BeatInput {
        BeatInput {
            dt_ms: TICK,
            now_ms,
            is_beat,
            strength: 1.0,
        }
    }

    #[test]
    fn rises_fast_then_decays() {
        let mut env = envelope();
        let first = env.step(beat(0.0, true));
        assert!(first.did_trigger);
        assert!(first.envelope > 0.3);

        let mut previous = first.envelope;
        let mut now = TICK;
        while now <= 500.0 {
            let out = env.step(beat(now, false));
            assert!(!out.did_trigger);
            assert!(out.envelope >= 0.0 && out.envelope <= 1.0);
            assert!(out.envelope < previous);
            previous = out.envelope;
            now += TICK;
        }
        assert!(previous < 0.05);
    }

    #[test]
    fn cooldown_suppresses_second_beat() {
        let mut env = envelope();
        assert!(env.step(beat(0.0, true)).did_trigger);
        assert!(!env.step(beat(100.0, true)).did_trigger);
        assert!(!env.step(beat(120.0, true)).did_trigger);
        assert!(env.step(beat(240.0, true)).did_trigger);
    }

    #[test]
    fn move_group_toggles_on_trigger_only() {
        let mut env = envelope();
        assert_eq!(env.step(beat(0.0, true)).move_group, 1);
        assert_eq!(env.step(beat(16.0, true)).move_group, 1);
        assert_eq!(env.step(beat(32.0, false)).move_group, 1);
        assert_eq!(env.step(beat(300.0, true)).move_group, 0);
    }

    #[test]
    fn zero_strength_beat_does_not_trigger() {
        let mut env = envelope();
        let out = env.step(BeatInput {
            strength: 0.0,
            ..beat(0.0, true)
        });
        assert!(!out.did_trigger);
        assert_eq!(env.state().last_beat_at_ms, None);
    }

    #[test]
    fn envelope_stays_bounded_for_hostile_input() {
        let mut env = BeatEnvelope::new(EnvelopeConfig {
            strength_scale: 50.0,
            gate_cooldown_ms: 0.0,
            ..EnvelopeConfig::default()
        });
        let mut now = 0.0;
        for strength in [f64::NAN, f64::INFINITY, -3.0, 7.0, 1.0, 0.5] {
            now += 1000.0;
            let out = env.step(BeatInput {
                dt_ms: 1e6,
                now_ms: now,
                is_beat: true,
                strength,
            });
            assert!((0.0..=1.0).contains(&out.envelope), "{strength}: {out:?}");
        }
    }

    #[test]
    fn reset_is_idempotent() {
        let mut env = envelope();
        env.step(beat(0.0, true));
        env.reset();
        let once = env.state().clone();
        env.reset();
        assert_eq!(env.state(), &once);
    }
}
