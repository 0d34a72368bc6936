//! Core library for the music feature extraction pipeline.
//!
//! Raw per-frame pitch, clarity and beat readings are noisy. The modules here
//! layer stabilisers on top of them so animations receive a committed pitch
//! class, a continuously drifting color and a gated beat envelope:
//!
//! * [`hysteresis`] commits pitch classes with hold/dead-band rules,
//! * [`policy`] maps them onto a hue wheel with a silence fallback,
//! * [`phase`] turns decisions into a smoothly rendered color,
//! * [`beat`] shapes beat cues into an attack/decay envelope,
//! * [`features`] composes everything into one frame per tick.
//!
//! [`audio`] and [`analysis`] provide the shared sample plumbing and a
//! reference PCM sampler for driving the pipeline offline.

pub mod analysis;
pub mod audio;
pub mod beat;
pub mod color;
pub mod config;
pub mod error;
pub mod features;
pub mod hysteresis;
pub mod phase;
pub mod policy;
pub mod timeline;

pub use analysis::{AnalysisEngine, AnalysisSummary};
pub use audio::{AudioEngine, AudioSnapshot, AudioStateHandle, Subscription, TrackEvent};
pub use beat::{BeatEnvelope, BeatInput, BeatOutput};
pub use color::{wrap_hue, HslColor};
pub use config::{AudioConfig, FeatureConfig};
pub use error::{MusicFeaturesError, Result};
pub use features::{FrameInput, MusicFeatureExtractor, MusicFeaturesFrame, RawSample};
pub use hysteresis::{PitchHysteresis, PitchInput, PitchResult};
pub use phase::{PhaseMode, PitchColorPhaseController};
pub use policy::{ColorDecision, PitchColorPolicy};
pub use timeline::{FrameScheduler, FrameTick, PlaybackClock};
