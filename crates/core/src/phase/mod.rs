//! Two-state controller that turns per-tick color decisions into a
//! continuously rendered color.
//!
//! * **Holding**: a pitch class was just committed. The controller stops
//!   sampling for `commit.hold_ms`, eases toward the committed color and lets
//!   it breathe with a slow one-sided hue wave.
//! * **Listening**: the policy is sampled every tick, but its color is only
//!   adopted on commits or every `color_interval_ms`. While the pitch is
//!   stable a two-harmonic drift keeps the color alive. Sustained silence
//!   sends the controller back to Holding.
//!
//! Drift is kept as an overlay on top of the rendered color. When the drift
//! source changes the overlay is folded into the rendered color and the commit
//! transition eases it out, so switching modes never produces a jump.

use std::f64::consts::TAU;

use serde::Serialize;

use crate::{
    color::{clamp_total, clamp_unit, exp_smoothing, HslColor},
    config::{HysteresisConfig, PhaseConfig, PolicyConfig},
    policy::{ColorDecision, PitchColorPolicy, PolicyInput},
};

/// Hold drift is faded in over this long after a commit.
const HOLD_SETTLE_MS: f64 = 400.0;
/// Rate of the second stable-drift harmonic relative to the first.
const STABLE_SECOND_HARMONIC: f64 = 2.7;
const STABLE_PRIMARY_WEIGHT: f64 = 0.7;
const STABLE_SECONDARY_WEIGHT: f64 = 0.3;
/// Channel deltas below which a transition counts as settled.
const SETTLE_HUE_DEG: f64 = 0.1;
const SETTLE_SAT: f64 = 0.5;
const SETTLE_LIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    Holding,
    Listening,
}

/// What the last sample was treated as. Brief dropouts still count as pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Pitch,
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    None,
    Hold,
    Stable,
}

/// Per-channel offset applied on top of the rendered color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HslOffset {
    pub hue: f64,
    pub saturation: f64,
    pub lightness: f64,
}

impl HslOffset {
    fn is_zero(&self) -> bool {
        self.hue == 0.0 && self.saturation == 0.0 && self.lightness == 0.0
    }

    fn apply(&self, color: &HslColor) -> HslColor {
        color.offset(self.hue, self.saturation, self.lightness)
    }
}

/// Easing of the rendered color toward `color`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommitTransition {
    pub active: bool,
    pub color: HslColor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseState {
    pub committed_color: Option<HslColor>,
    pub committed_at_ms: f64,
    pub hold_phase: f64,
    pub stable_phase: f64,
    pub stable_since_ms: f64,
    pub transition: CommitTransition,
    /// Color before drift is applied.
    pub rendered: HslColor,
    pub drift: HslOffset,
    pub drift_kind: DriftKind,
    pub silence_ms: f64,
    pub sample_elapsed_ms: f64,
    pub hold_elapsed_ms: f64,
    pub hold_listening: bool,
    pub last_kind: SampleKind,
    pub last_changed: bool,
}

impl PhaseState {
    fn new(color: HslColor) -> Self {
        Self {
            committed_color: None,
            committed_at_ms: 0.0,
            hold_phase: 0.0,
            stable_phase: 0.0,
            stable_since_ms: 0.0,
            transition: CommitTransition {
                active: false,
                color,
            },
            rendered: color,
            drift: HslOffset::default(),
            drift_kind: DriftKind::None,
            silence_ms: 0.0,
            sample_elapsed_ms: 0.0,
            hold_elapsed_ms: 0.0,
            hold_listening: false,
            last_kind: SampleKind::Silence,
            last_changed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseInput {
    pub now_ms: f64,
    pub delta_ms: f64,
    pub pitch_hz: f64,
    pub clarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseOutput {
    pub color: HslColor,
    pub mode: PhaseMode,
    /// Present on ticks where the policy was sampled.
    pub decision: Option<ColorDecision>,
    /// A pitch class was committed on this tick.
    pub committed: bool,
    pub committed_pitch_class: Option<u8>,
}

#[derive(Debug)]
pub struct PitchColorPhaseController {
    config: PhaseConfig,
    policy: PitchColorPolicy,
    state: PhaseState,
}

impl PitchColorPhaseController {
    pub fn new(config: PhaseConfig, policy: PolicyConfig, hysteresis: HysteresisConfig) -> Self {
        let policy = PitchColorPolicy::new(policy, hysteresis);
        let state = PhaseState::new(policy.last_good_color());
        Self {
            config,
            policy,
            state,
        }
    }

    pub fn policy(&self) -> &PitchColorPolicy {
        &self.policy
    }

    pub fn state(&self) -> &PhaseState {
        &self.state
    }

    pub fn mode(&self) -> PhaseMode {
        if self.state.committed_color.is_some() && !self.state.hold_listening {
            PhaseMode::Holding
        } else {
            PhaseMode::Listening
        }
    }

    /// The color handed to renderers: rendered color plus drift overlay.
    pub fn color(&self) -> HslColor {
        self.state.drift.apply(&self.state.rendered)
    }

    pub fn reset(&mut self) {
        self.policy.reset();
        self.state = PhaseState::new(self.policy.last_good_color());
        tracing::debug!("phase controller reset");
    }

    pub fn step(&mut self, input: PhaseInput) -> PhaseOutput {
        let delta = clamp_total(input.delta_ms, 0.0, f64::INFINITY);
        let now = input.now_ms;

        if self.mode() == PhaseMode::Holding
            && now - self.state.committed_at_ms >= self.config.commit.hold_ms
        {
            self.enter_listening(now);
        }

        let mut decision = None;
        let mut committed = false;
        let kind = if self.mode() == PhaseMode::Holding {
            DriftKind::Hold
        } else {
            let (sampled, did_commit) = self.listen(&input, delta);
            decision = Some(sampled);
            committed = did_commit;
            if self.mode() == PhaseMode::Holding {
                DriftKind::Hold
            } else if self.state.committed_color.is_some()
                && self.state.last_kind == SampleKind::Pitch
                && !self.state.last_changed
            {
                DriftKind::Stable
            } else {
                DriftKind::None
            }
        };

        if kind != self.state.drift_kind {
            self.bake_drift();
            self.state.drift_kind = kind;
            if kind == DriftKind::Stable {
                self.state.stable_since_ms = now;
            }
        }
        match kind {
            DriftKind::Hold => self.advance_hold_drift(now, delta),
            DriftKind::Stable => self.advance_stable_drift(now, delta),
            DriftKind::None => {}
        }

        self.progress_transition(delta);

        PhaseOutput {
            color: self.color(),
            mode: self.mode(),
            decision,
            committed,
            committed_pitch_class: self.policy.hysteresis().state().committed_pitch_class,
        }
    }

    /// Samples the policy. Returns the decision and whether it was a commit.
    fn listen(&mut self, input: &PhaseInput, delta: f64) -> (ColorDecision, bool) {
        let decision = self.policy.decide(PolicyInput {
            pitch_hz: input.pitch_hz,
            clarity: input.clarity,
            now_ms: input.now_ms,
            dt_ms: delta,
        });
        self.state.sample_elapsed_ms += delta;

        let kind = if decision.result.is_silence() {
            self.state.silence_ms += delta;
            if self.state.silence_ms < self.config.listen_after_silence_ms {
                SampleKind::Pitch
            } else {
                SampleKind::Silence
            }
        } else {
            self.state.silence_ms = 0.0;
            SampleKind::Pitch
        };
        self.state.last_kind = kind;
        self.state.last_changed = decision.result.changed();

        let first_commit = self.state.committed_color.is_none() && !decision.result.is_silence();
        if decision.result.changed() || first_commit {
            self.enter_holding(decision.color, input.now_ms);
            return (decision, true);
        }

        if self.state.sample_elapsed_ms >= self.config.color_interval_ms {
            self.state.sample_elapsed_ms = 0.0;
            // a debounced dropout keeps the current target
            if !decision.result.is_silence() {
                self.state.committed_color = Some(decision.color);
                self.retarget(decision.color);
            } else if kind == SampleKind::Silence {
                self.retarget(decision.color);
            }
        }

        if kind == SampleKind::Silence {
            self.force_hold(decision.color, input.now_ms);
        }

        (decision, false)
    }

    fn enter_holding(&mut self, color: HslColor, now: f64) {
        tracing::debug!(
            hue = color.hue,
            now_ms = now,
            pitch_class = ?self.policy.hysteresis().state().committed_pitch_class,
            "entering hold after commit"
        );
        self.bake_drift();
        self.state.committed_color = Some(color);
        self.state.committed_at_ms = now;
        self.state.transition = CommitTransition {
            active: true,
            color,
        };
        self.state.hold_phase = 0.0;
        self.state.stable_phase = 0.0;
        self.state.hold_elapsed_ms = 0.0;
        self.state.hold_listening = false;
    }

    /// Goes dormant on sustained silence, holding on the fallback color.
    fn force_hold(&mut self, color: HslColor, now: f64) {
        tracing::debug!(now_ms = now, "sustained silence, holding");
        self.state.committed_color = Some(color);
        self.retarget(color);
        self.state.committed_at_ms = now;
        self.state.hold_elapsed_ms = 0.0;
        self.state.hold_listening = false;
    }

    fn enter_listening(&mut self, now: f64) {
        tracing::trace!(now_ms = now, "hold expired, listening");
        self.state.hold_listening = true;
        self.state.silence_ms = 0.0;
        self.state.sample_elapsed_ms = 0.0;
    }

    fn retarget(&mut self, color: HslColor) {
        if self.state.transition.color != color || self.state.rendered != color {
            self.state.transition = CommitTransition {
                active: true,
                color,
            };
        }
    }

    /// Folds the drift overlay into the rendered color so the transition can
    /// ease it away.
    fn bake_drift(&mut self) {
        if self.state.drift.is_zero() {
            return;
        }
        self.state.rendered = self.state.drift.apply(&self.state.rendered);
        self.state.drift = HslOffset::default();
        self.state.transition.active = true;
    }

    fn advance_hold_drift(&mut self, now: f64, delta: f64) {
        self.state.hold_elapsed_ms += delta;
        if self.state.hold_elapsed_ms < self.config.color_interval_ms {
            return;
        }

        let hold = self.config.hold_drift;
        self.state.hold_phase += TAU * hold.hz * self.state.hold_elapsed_ms / 1000.0;
        self.state.hold_elapsed_ms = 0.0;

        let settle = clamp_unit(1.0 - (now - self.state.committed_at_ms) / HOLD_SETTLE_MS);
        let wave = self.state.hold_phase.sin().powi(2);
        self.state.drift = HslOffset {
            hue: wave * hold.deg * (1.0 - settle),
            ..HslOffset::default()
        };
    }

    fn advance_stable_drift(&mut self, now: f64, delta: f64) {
        let stable = self.config.stable_drift;
        self.state.stable_phase += TAU * stable.hz * delta / 1000.0;

        let phase = self.state.stable_phase;
        let wave = STABLE_PRIMARY_WEIGHT * (0.5 - 0.5 * phase.cos())
            + STABLE_SECONDARY_WEIGHT * (0.5 - 0.5 * (phase * STABLE_SECOND_HARMONIC).cos());
        let ramp = if stable.ramp_ms > 0.0 {
            smoothstep(clamp_unit((now - self.state.stable_since_ms) / stable.ramp_ms))
        } else {
            1.0
        };

        let amount = wave * ramp;
        self.state.drift = HslOffset {
            hue: amount * stable.hue_deg,
            saturation: amount * stable.sat_deg,
            lightness: amount * stable.light_deg,
        };
    }

    fn progress_transition(&mut self, delta: f64) {
        let transition = self.state.transition;
        if !transition.active {
            return;
        }

        let alpha = exp_smoothing(delta, self.config.commit.smoothing_responsiveness);
        let rendered = self.state.rendered.lerp_toward(&transition.color, alpha);
        let (hue, saturation, lightness) = rendered.distance(&transition.color);
        if hue < SETTLE_HUE_DEG && saturation < SETTLE_SAT && lightness < SETTLE_LIGHT {
            self.state.rendered = transition.color;
            self.state.transition.active = false;
        } else {
            self.state.rendered = rendered;
        }
    }
}

fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}
