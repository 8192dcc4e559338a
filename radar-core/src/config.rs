use anyhow::{Context, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

use crate::{
    error::{RadarError, Result},
    model::{Coordinates, Language, LoopOptions, PrecipMode, PrecipType, RadarProduct},
};

/// Radar loop configuration as stored on disk.
///
/// Example TOML:
/// ```toml
/// latitude = 45.5
/// longitude = -73.6
/// precip = "auto"
/// fps = 5
/// opacity = 0.65
/// language = "fr"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_km: f64,
    /// Remote layer name; defaults to the rain or snow rate layer.
    pub layer: Option<String>,
    pub precip: PrecipMode,
    pub fps: u32,
    pub opacity: f32,
    pub legend: bool,
    pub timestamp: bool,
    pub language: Language,
    pub width: u32,
    pub height: u32,
    pub max_frames: usize,
    pub min_frames: usize,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout_secs: u64,
    pub basemap: bool,
}

impl Default for RadarConfig {
    fn default() -> Self {
        let options = LoopOptions::default();
        Self {
            latitude: None,
            longitude: None,
            radius_km: 200.0,
            layer: None,
            precip: PrecipMode::Auto,
            fps: options.fps,
            opacity: options.opacity,
            legend: options.legend,
            timestamp: options.timestamp,
            language: options.language,
            width: 800,
            height: 800,
            max_frames: 12,
            min_frames: 1,
            max_concurrent_fetches: 4,
            fetch_timeout_secs: 30,
            basemap: true,
        }
    }
}

/// Configuration that passed validation; the only input a [`RadarLoop`](crate::RadarLoop) accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct RadarSettings {
    pub coordinates: Coordinates,
    pub radius_km: f64,
    /// Layer fetched first.
    pub product: RadarProduct,
    /// `product` was named in the config rather than derived from `precip`.
    pub custom_layer: bool,
    pub precip: PrecipMode,
    pub options: LoopOptions,
    pub width: u32,
    pub height: u32,
    pub max_frames: usize,
    pub min_frames: usize,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout: Duration,
    pub basemap: bool,
}

impl RadarSettings {
    /// Layer whose legend matches `precip_type`.
    ///
    /// A configured layer is used as-is for every type.
    pub fn product_for(&self, precip_type: PrecipType) -> RadarProduct {
        if self.custom_layer {
            self.product.clone()
        } else {
            RadarProduct::for_type(precip_type)
        }
    }
}

impl RadarConfig {
    /// Config for a location with every other field at its default.
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self { latitude: Some(latitude), longitude: Some(longitude), ..Self::default() }
    }

    /// Check every field and produce typed settings.
    pub fn validate(&self) -> Result<RadarSettings> {
        let (latitude, longitude) = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(RadarError::configuration(
                    "location",
                    "latitude and longitude are both required. \
                     Hint: run `radar configure` or pass --lat/--lon",
                ));
            }
        };
        let coordinates = Coordinates::new(latitude, longitude)?;

        if !self.radius_km.is_finite() || self.radius_km <= 0.0 || self.radius_km > 1000.0 {
            return Err(RadarError::configuration(
                "radius_km",
                format!("{} is outside (0, 1000]", self.radius_km),
            ));
        }
        if self.fps == 0 {
            return Err(RadarError::configuration("fps", "must be greater than zero"));
        }
        if !self.opacity.is_finite() || !(0.0..=1.0).contains(&self.opacity) {
            return Err(RadarError::configuration(
                "opacity",
                format!("{} is outside [0, 1]", self.opacity),
            ));
        }
        for (field, value) in [("width", self.width), ("height", self.height)] {
            if !(16..=4096).contains(&value) {
                return Err(RadarError::configuration(field, format!("{value} is outside 16..=4096")));
            }
        }
        if self.max_frames == 0 {
            return Err(RadarError::configuration("max_frames", "must be at least 1"));
        }
        if self.min_frames == 0 {
            return Err(RadarError::configuration("min_frames", "must be at least 1"));
        }
        if self.min_frames > self.max_frames {
            return Err(RadarError::configuration(
                "min_frames",
                format!("{} exceeds max_frames ({})", self.min_frames, self.max_frames),
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(RadarError::configuration("max_concurrent_fetches", "must be at least 1"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(RadarError::configuration("fetch_timeout_secs", "must be at least 1"));
        }

        let product = match self.layer.as_deref().map(str::trim) {
            Some("") => return Err(RadarError::configuration("layer", "must not be empty")),
            Some(layer) => RadarProduct::new(layer),
            None => RadarProduct::for_mode(self.precip),
        };

        Ok(RadarSettings {
            coordinates,
            radius_km: self.radius_km,
            product,
            custom_layer: self.layer.is_some(),
            precip: self.precip,
            options: LoopOptions {
                legend: self.legend,
                timestamp: self.timestamp,
                fps: self.fps,
                opacity: self.opacity,
                language: self.language,
            },
            width: self.width,
            height: self.height,
            max_frames: self.max_frames,
            min_frames: self.min_frames,
            max_concurrent_fetches: self.max_concurrent_fetches,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            basemap: self.basemap,
        })
    }

    /// Load config from disk, or return the defaults if it doesn't exist yet.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: RadarConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> anyhow::Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "radar-loop", "radar-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}
