use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{config::AudioConfig, MusicFeaturesError, RawSample, Result};

const BEAT_GAIN: f32 = 12.0;
const BEAT_THRESHOLD: f32 = 0.6;
const MIN_BEAT_INTERVAL: f32 = 0.2;
const MAX_BEAT_HISTORY: usize = 32;
/// Bins either side of the spectral peak that count toward clarity.
const PEAK_NEIGHBOURS: usize = 1;

/// Summary of the stream metadata accumulated so far.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisSummary {
    pub sample_rate: u32,
    pub tempo_bpm: Option<f32>,
    pub duration_seconds: Option<f32>,
}

/// Reference sampler that turns mono PCM blocks into [`RawSample`]s.
///
/// Pitch is the strongest spectral peak inside the configured band, refined
/// with Gaussian interpolation on the log magnitudes. Clarity is the share of
/// in-band energy concentrated around that peak, so a pure tone scores close
/// to 1 and noise scores low. Beats come from positive jumps in RMS.
pub struct AnalysisEngine {
    config: AudioConfig,
    summary: AnalysisSummary,
    processed_samples: usize,
    last_rms: f32,
    beat_timestamps: Vec<f32>,
    latest: Option<RawSample>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl AnalysisEngine {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            summary: AnalysisSummary {
                sample_rate: config.sample_rate,
                ..Default::default()
            },
            config,
            processed_samples: 0,
            last_rms: 0.0,
            beat_timestamps: Vec::new(),
            latest: None,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Returns metadata collected so far about the analysed stream.
    pub fn summary(&self) -> &AnalysisSummary {
        &self.summary
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Returns the latest sample emitted by the engine, if any.
    pub fn latest(&self) -> Option<&RawSample> {
        self.latest.as_ref()
    }

    /// Clears the accumulated state while preserving configuration.
    pub fn reset(&mut self) {
        self.summary = AnalysisSummary {
            sample_rate: self.config.sample_rate,
            ..Default::default()
        };
        self.processed_samples = 0;
        self.last_rms = 0.0;
        self.beat_timestamps.clear();
        self.latest = None;
    }

    /// Analyses one block. The returned sample has `playing` unset; the
    /// caller owns transport state.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<RawSample> {
        if samples.is_empty() {
            return Err(MusicFeaturesError::InvalidInput(
                "analysis requires at least one sample",
            ));
        }

        if samples.len() < 2 {
            return Err(MusicFeaturesError::InvalidInput(
                "analysis requires blocks with at least two samples",
            ));
        }

        let block_size = samples.len();
        let sample_rate = (self.config.sample_rate as f32).max(1.0);
        let start_time = self.processed_samples as f32 / sample_rate;
        let end_time = (self.processed_samples + block_size) as f32 / sample_rate;
        let timestamp = start_time + (end_time - start_time) * 0.5;

        let rms = compute_rms(samples);
        let (is_beat, beat_strength) = self.update_beats(timestamp, rms);
        let volume_db = if rms > 0.0 {
            20.0 * f64::from(rms).log10()
        } else {
            f64::NEG_INFINITY
        };
        let has_audio = volume_db > self.config.silence_db;

        let (pitch_hz, clarity) = if has_audio {
            self.estimate_pitch(samples)?
        } else {
            (0.0, 0.0)
        };

        self.processed_samples += block_size;
        self.summary.duration_seconds = Some(
            self.summary
                .duration_seconds
                .map(|d| d.max(end_time))
                .unwrap_or(end_time),
        );

        let sample = RawSample {
            pitch_hz,
            clarity,
            volume_db,
            is_beat,
            beat_strength: f64::from(beat_strength),
            has_audio,
            playing: false,
        };
        self.latest = Some(sample);
        Ok(sample)
    }

    fn update_beats(&mut self, timestamp: f32, rms: f32) -> (bool, f32) {
        let delta = (rms - self.last_rms).max(0.0);
        self.last_rms = rms;
        let confidence = (delta * BEAT_GAIN).clamp(0.0, 1.0);

        if confidence < BEAT_THRESHOLD {
            return (false, confidence);
        }

        let spaced = self
            .beat_timestamps
            .last()
            .map(|last| timestamp - last >= MIN_BEAT_INTERVAL)
            .unwrap_or(true);
        if !spaced {
            return (false, confidence);
        }

        self.beat_timestamps.push(timestamp);
        if self.beat_timestamps.len() > MAX_BEAT_HISTORY {
            let overflow = self.beat_timestamps.len() - MAX_BEAT_HISTORY;
            self.beat_timestamps.drain(0..overflow);
        }
        self.update_tempo_estimate();
        (true, confidence)
    }

    fn update_tempo_estimate(&mut self) {
        if self.beat_timestamps.len() < 2 {
            return;
        }

        let mut sum = 0.0;
        let mut count = 0;
        for window in self.beat_timestamps.windows(2) {
            let interval = window[1] - window[0];
            if interval > f32::EPSILON {
                sum += interval;
                count += 1;
            }
        }

        if count > 0 {
            let average_interval = sum / count as f32;
            if average_interval > 0.0 {
                self.summary.tempo_bpm = Some(60.0 / average_interval);
            }
        }
    }

    /// Returns `(pitch_hz, clarity)`, or zeros when nothing lies in band.
    fn estimate_pitch(&mut self, samples: &[f32]) -> Result<(f64, f64)> {
        let len = samples.len();
        let bin_hz = self.config.sample_rate as f64 / len as f64;
        let min_hz = self.config.min_hz;
        let max_hz = self.config.max_hz;
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let first = ((min_hz / bin_hz).ceil().max(1.0)) as usize;
        let last = ((max_hz / bin_hz).floor() as usize).min(fft.spectrum.len().saturating_sub(2));
        if first > last {
            return Ok((0.0, 0.0));
        }

        let magnitudes: Vec<f64> = fft.spectrum.iter().map(|bin| f64::from(bin.norm())).collect();
        let band = &magnitudes[first..=last];
        let total_energy: f64 = band.iter().map(|m| m * m).sum();
        if total_energy <= f64::EPSILON {
            return Ok((0.0, 0.0));
        }

        let peak = band
            .iter()
            .enumerate()
            .fold((0, 0.0), |best, (i, &m)| if m > best.1 { (i, m) } else { best })
            .0
            + first;

        let lo = peak.saturating_sub(PEAK_NEIGHBOURS).max(first);
        let hi = (peak + PEAK_NEIGHBOURS).min(last);
        let peak_energy: f64 = magnitudes[lo..=hi].iter().map(|m| m * m).sum();
        let clarity = (peak_energy / total_energy).clamp(0.0, 1.0);

        let offset = interpolate_peak(
            magnitudes[peak - 1],
            magnitudes[peak],
            magnitudes[peak + 1],
        );
        Ok(((peak as f64 + offset) * bin_hz, clarity))
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        if self.fft.as_ref().is_some_and(|fft| fft.size != size) {
            self.fft = None;
        }

        let planner = &mut self.fft_planner;
        self.fft.get_or_insert_with(|| {
            let plan = planner.plan_fft_forward(size);
            FftResources {
                size,
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            }
        })
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("config", &self.config)
            .field("summary", &self.summary)
            .field("processed_samples", &self.processed_samples)
            .field("last_rms", &self.last_rms)
            .field("beat_timestamps", &self.beat_timestamps.len())
            .field("fft_size", &self.fft.as_ref().map(|fft| fft.size))
            .finish()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

/// Fractional bin offset of a peak from its two neighbours, fitted on log
/// magnitudes. Falls back to 0 when any of them is zero.
fn interpolate_peak(left: f64, centre: f64, right: f64) -> f64 {
    if left <= 0.0 || centre <= 0.0 || right <= 0.0 {
        return 0.0;
    }
    let (l, c, r) = (left.ln(), centre.ln(), right.ln());
    let denominator = l - 2.0 * c + r;
    if denominator.abs() <= f64::EPSILON {
        return 0.0;
    }
    (0.5 * (l - r) / denominator).clamp(-0.5, 0.5)
}
