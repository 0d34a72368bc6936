//! HSL color value and the total boundary math shared by the pipeline.
//!
//! Every helper here is defined for all `f64` inputs: NaN collapses to the low
//! edge of the range, infinities saturate, and a non-finite hue wraps to `0`.

use serde::{Deserialize, Serialize};

/// Base hue for each pitch class, C first, evenly spaced around the wheel.
pub const PITCH_CLASS_HUES: [f64; 12] = [
    0.0, 30.0, 60.0, 90.0, 120.0, 150.0, 180.0, 210.0, 240.0, 270.0, 300.0, 330.0,
];

pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Wraps a hue into `[0, 360)`.
pub fn wrap_hue(hue: f64) -> f64 {
    if !hue.is_finite() {
        return 0.0;
    }
    let wrapped = hue.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Clamps into `[lo, hi]`, mapping NaN to `lo`.
pub fn clamp_total(value: f64, lo: f64, hi: f64) -> f64 {
    // NaN bounds are open, inverted bounds collapse onto `lo`
    if lo > hi {
        return lo;
    }
    let value = if value.is_nan() { lo } else { value };
    value.max(lo).min(hi)
}

pub fn clamp_unit(value: f64) -> f64 {
    clamp_total(value, 0.0, 1.0)
}

pub fn clamp_percent(value: f64) -> f64 {
    clamp_total(value, 0.0, 100.0)
}

/// Signed shortest-arc distance from `from` to `to`, in `(-180, 180]`.
pub fn hue_delta(from: f64, to: f64) -> f64 {
    let delta = wrap_hue(to - from);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

/// `1 - exp(-rate * dt)`: the blend factor of a first-order smoother after
/// `delta_ms` milliseconds at `responsiveness` per second.
pub fn exp_smoothing(delta_ms: f64, responsiveness: f64) -> f64 {
    let dt = clamp_total(delta_ms, 0.0, f64::INFINITY) / 1000.0;
    let rate = clamp_total(responsiveness, 0.0, f64::INFINITY);
    clamp_unit(1.0 - (-rate * dt).exp())
}

pub fn pitch_class_name(pitch_class: u8) -> &'static str {
    PITCH_CLASS_NAMES[usize::from(pitch_class % 12)]
}

/// A color in HSL space: hue in degrees, saturation and lightness in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HslColor {
    pub hue: f64,
    pub saturation: f64,
    pub lightness: f64,
}

impl Default for HslColor {
    fn default() -> Self {
        Self::new(0.0, 0.0, 50.0)
    }
}

impl HslColor {
    /// Builds a color, wrapping the hue and clamping the other channels.
    pub fn new(hue: f64, saturation: f64, lightness: f64) -> Self {
        Self {
            hue: wrap_hue(hue),
            saturation: clamp_percent(saturation),
            lightness: clamp_percent(lightness),
        }
    }

    /// Returns this color shifted by the given channel deltas.
    pub fn offset(&self, hue: f64, saturation: f64, lightness: f64) -> Self {
        Self::new(
            self.hue + hue,
            self.saturation + saturation,
            self.lightness + lightness,
        )
    }

    /// Moves `alpha` of the way toward `target`, taking the short way round the
    /// hue circle.
    pub fn lerp_toward(&self, target: &HslColor, alpha: f64) -> Self {
        let alpha = clamp_unit(alpha);
        Self::new(
            self.hue + hue_delta(self.hue, target.hue) * alpha,
            self.saturation + (target.saturation - self.saturation) * alpha,
            self.lightness + (target.lightness - self.lightness) * alpha,
        )
    }

    /// Absolute per-channel distance `(hue, saturation, lightness)` to `other`.
    pub fn distance(&self, other: &HslColor) -> (f64, f64, f64) {
        (
            hue_delta(self.hue, other.hue).abs(),
            (self.saturation - other.saturation).abs(),
            (self.lightness - other.lightness).abs(),
        )
    }

    pub fn to_rgb(&self) -> [u8; 3] {
        let s = self.saturation / 100.0;
        let l = self.lightness / 100.0;
        let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let sector = self.hue / 60.0;
        let x = chroma * (1.0 - (sector.rem_euclid(2.0) - 1.0).abs());
        let (r, g, b) = match sector as u32 {
            0 => (chroma, x, 0.0),
            1 => (x, chroma, 0.0),
            2 => (0.0, chroma, x),
            3 => (0.0, x, chroma),
            4 => (x, 0.0, chroma),
            _ => (chroma, 0.0, x),
        };
        let m = l - chroma / 2.0;
        let channel = |value: f64| (clamp_unit(value + m) * 255.0).round() as u8;
        [channel(r), channel(g), channel(b)]
    }

    pub fn to_hex(&self) -> String {
        let [r, g, b] = self.to_rgb();
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}
