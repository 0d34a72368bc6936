/// Result alias that carries the custom [`MusicFeaturesError`] type.
pub type Result<T> = std::result::Result<T, MusicFeaturesError>;

/// Common error type for the core crate.
///
/// The per-tick feature pipeline never produces errors: missing pitch is a
/// [`crate::PitchResult::Silence`] value and out-of-range numbers are clamped.
/// These variants only surface at the edges (configuration, PCM analysis,
/// shared state plumbing).
#[derive(Debug, thiserror::Error)]
pub enum MusicFeaturesError {
    /// Free-form message for failures that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// Caller supplied data the analysis stage cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A configuration value is out of its meaningful range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration or sample stream could not be (de)serialised.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// The FFT backend rejected its buffers.
    #[error("fft: {0}")]
    Fft(#[from] realfft::FftError),
}

impl MusicFeaturesError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for MusicFeaturesError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MusicFeaturesError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
