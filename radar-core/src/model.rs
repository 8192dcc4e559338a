use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt};

use crate::error::{RadarError, Result};

/// Kilometres per degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// A validated geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(RadarError::configuration(
                "latitude",
                format!("{latitude} is outside -90..=90"),
            ));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(RadarError::configuration(
                "longitude",
                format!("{longitude} is outside -180..=180"),
            ));
        }
        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

/// Geographic extent in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    /// Square-ish box of `radius_km` around `center`, clamped to valid ranges.
    pub fn around(center: Coordinates, radius_km: f64) -> Self {
        let lat_span = radius_km / KM_PER_DEGREE;
        // Keep the cosine away from zero near the poles.
        let cos_lat = center.latitude.to_radians().cos().max(0.01);
        let lon_span = radius_km / (KM_PER_DEGREE * cos_lat);

        Self {
            lat_min: (center.latitude - lat_span).max(-90.0),
            lat_max: (center.latitude + lat_span).min(90.0),
            lon_min: (center.longitude - lon_span).max(-180.0),
            lon_max: (center.longitude + lon_span).min(180.0),
        }
    }
}

/// The area and pixel size a frame set was requested for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub center: Coordinates,
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(center: Coordinates, radius_km: f64, width: u32, height: u32) -> Self {
        Self { center, bbox: BoundingBox::around(center, radius_km), width, height }
    }
}

/// A named radar layer on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RadarProduct(String);

impl RadarProduct {
    pub const RAIN_LAYER: &'static str = "RADAR_1KM_RRAI";
    pub const SNOW_LAYER: &'static str = "RADAR_1KM_RSNO";

    pub fn new(layer: impl Into<String>) -> Self {
        Self(layer.into())
    }

    /// Default layer for a precipitation mode: snow rate when snow is pinned,
    /// rain rate otherwise.
    pub fn for_mode(mode: PrecipMode) -> Self {
        match mode {
            PrecipMode::Snow => Self::new(Self::SNOW_LAYER),
            PrecipMode::Auto | PrecipMode::Rain => Self::new(Self::RAIN_LAYER),
        }
    }

    /// Rate layer whose colour ramp matches `precip_type`.
    pub fn for_type(precip_type: PrecipType) -> Self {
        match precip_type {
            PrecipType::Rain => Self::new(Self::RAIN_LAYER),
            PrecipType::Snow => Self::new(Self::SNOW_LAYER),
        }
    }

    pub fn layer(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RadarProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One available radar snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Location handed to the byte source.
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

/// A descriptor together with its fetched image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub descriptor: FrameDescriptor,
    pub bytes: Vec<u8>,
}

impl Frame {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.descriptor.timestamp
    }
}

/// Frames for one region and generation cycle, strictly increasing by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSet {
    region: Region,
    generated_at: DateTime<Utc>,
    frames: Vec<Frame>,
}

impl FrameSet {
    /// Orders `frames` by timestamp; for duplicate timestamps the first one wins.
    pub fn new(region: Region, generated_at: DateTime<Utc>, mut frames: Vec<Frame>) -> Self {
        frames.sort_by_key(Frame::timestamp);
        frames.dedup_by_key(|f| f.timestamp());
        Self { region, generated_at, frames }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Resolved precipitation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecipType {
    Rain,
    Snow,
}

impl PrecipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecipType::Rain => "rain",
            PrecipType::Snow => "snow",
        }
    }
}

impl fmt::Display for PrecipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precipitation selection requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecipMode {
    /// Let the classifier decide from frame content.
    #[default]
    Auto,
    Rain,
    Snow,
}

impl PrecipMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecipMode::Auto => "auto",
            PrecipMode::Rain => "rain",
            PrecipMode::Snow => "snow",
        }
    }

    /// The concrete type for a manual pin, `None` for [`PrecipMode::Auto`].
    pub fn pinned(self) -> Option<PrecipType> {
        match self {
            PrecipMode::Auto => None,
            PrecipMode::Rain => Some(PrecipType::Rain),
            PrecipMode::Snow => Some(PrecipType::Snow),
        }
    }
}

impl TryFrom<&str> for PrecipMode {
    type Error = RadarError;

    fn try_from(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "auto" => Ok(PrecipMode::Auto),
            "rain" => Ok(PrecipMode::Rain),
            "snow" => Ok(PrecipMode::Snow),
            _ => Err(RadarError::configuration(
                "precip",
                format!("unknown precipitation mode '{value}', expected auto, rain or snow"),
            )),
        }
    }
}

/// Label language for overlays and attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "fr")]
    French,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::French => "fr",
        }
    }
}

impl TryFrom<&str> for Language {
    type Error = RadarError;

    fn try_from(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "en" | "english" => Ok(Language::English),
            "fr" | "french" | "francais" | "français" => Ok(Language::French),
            _ => Err(RadarError::configuration(
                "language",
                format!("unknown language '{value}', expected en or fr"),
            )),
        }
    }
}

/// Compositing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopOptions {
    pub legend: bool,
    pub timestamp: bool,
    pub fps: u32,
    /// Radar layer opacity in `[0, 1]`.
    pub opacity: f32,
    pub language: Language,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self { legend: true, timestamp: true, fps: 5, opacity: 0.65, language: Language::English }
    }
}

/// An encoded animated GIF and the parameters it was built with.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopArtifact {
    bytes: Vec<u8>,
    frame_count: usize,
    fps: u32,
    opacity: f32,
    legend_enabled: bool,
    timestamp_enabled: bool,
    created_at: DateTime<Utc>,
}

impl LoopArtifact {
    pub(crate) fn new(
        bytes: Vec<u8>,
        frame_count: usize,
        options: &LoopOptions,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            bytes,
            frame_count,
            fps: options.fps,
            opacity: options.opacity,
            legend_enabled: options.legend,
            timestamp_enabled: options.timestamp,
            created_at,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn legend_enabled(&self) -> bool {
        self.legend_enabled
    }

    pub fn timestamp_enabled(&self) -> bool {
        self.timestamp_enabled
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
