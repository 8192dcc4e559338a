//! Core library for the `radar` CLI.
//!
//! This crate turns the time-sequenced radar snapshots of a remote weather
//! service into one animated loop for a location:
//! - Locating and fetching frames, tolerating individual failures
//! - Deterministic rain/snow classification
//! - Compositing with legend, bilingual timestamp and configurable opacity
//! - Caching the latest loop behind a single-flight `update`
//!
//! Network access goes through the [`ByteSource`] and [`FrameDirectory`]
//! traits, so the pipeline can run against any transport.

pub mod classifier;
pub mod compositor;
pub mod config;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod locator;
pub mod model;
pub mod source;

pub use config::{RadarConfig, RadarSettings};
pub use controller::{CachedLoop, CachedState, RadarLoop};
pub use error::{RadarError, Result};
pub use model::{
    Coordinates, Frame, FrameDescriptor, FrameSet, Language, LoopArtifact, LoopOptions,
    PrecipMode, PrecipType, RadarProduct, Region,
};
pub use source::{ByteSource, FrameDirectory, GeoMetDirectory, HttpSource};
