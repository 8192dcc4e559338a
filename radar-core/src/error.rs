//! Error taxonomy for the radar pipeline.

/// Result alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, RadarError>;

/// Failures surfaced by [`RadarLoop`](crate::RadarLoop) and its stages.
///
/// The type is `Clone` so that callers coalesced into a single in-flight
/// update all observe the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RadarError {
    /// Invalid coordinates or options at construction. No network call is made.
    #[error("Invalid configuration for '{field}': {reason}")]
    Configuration { field: &'static str, reason: String },

    /// The remote frame listing could not be reached or parsed.
    #[error("Radar source unavailable: {0}")]
    SourceUnavailable(String),

    /// Fewer frames than the configured quorum were fetched.
    #[error("Insufficient radar frames: {fetched} fetched, at least {required} required")]
    InsufficientFrames { required: usize, fetched: usize },

    /// Frame decoding, overlay or animation encoding failed.
    #[error("Radar loop composition failed: {0}")]
    Composition(String),
}

impl RadarError {
    pub fn configuration(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration { field, reason: reason.into() }
    }

    pub fn composition(msg: impl std::fmt::Display) -> Self {
        Self::Composition(msg.to_string())
    }

    /// Wrap a collaborator error, keeping its whole context chain.
    pub fn source_unavailable(err: &anyhow::Error) -> Self {
        Self::SourceUnavailable(format!("{err:#}"))
    }
}
