//! Resolves which radar frames currently exist for a location.

use std::sync::Arc;
use tracing::debug;

use crate::{
    config::RadarSettings,
    error::{RadarError, Result},
    model::{Coordinates, FrameDescriptor, RadarProduct, Region},
    source::FrameDirectory,
};

#[derive(Debug, Clone)]
pub struct FrameLocator {
    directory: Arc<dyn FrameDirectory>,
    radius_km: f64,
    width: u32,
    height: u32,
    max_frames: usize,
}

impl FrameLocator {
    pub fn new(
        directory: Arc<dyn FrameDirectory>,
        radius_km: f64,
        (width, height): (u32, u32),
        max_frames: usize,
    ) -> Self {
        Self { directory, radius_km, width, height, max_frames }
    }

    pub fn for_settings(settings: &RadarSettings, directory: Arc<dyn FrameDirectory>) -> Self {
        Self::new(
            directory,
            settings.radius_km,
            (settings.width, settings.height),
            settings.max_frames,
        )
    }

    /// Region requested for `coordinates`.
    pub fn region_for(&self, coordinates: Coordinates) -> Region {
        Region::new(coordinates, self.radius_km, self.width, self.height)
    }

    /// Newest `max_frames` descriptors in ascending timestamp order.
    ///
    /// An empty listing is not an error.
    pub async fn list_frames(
        &self,
        coordinates: Coordinates,
        product: &RadarProduct,
    ) -> Result<Vec<FrameDescriptor>> {
        let region = self.region_for(coordinates);

        let mut descriptors = self
            .directory
            .list(product, &region)
            .await
            .map_err(|e| RadarError::source_unavailable(&e))?;

        descriptors.sort_by_key(|d| d.timestamp);
        descriptors.dedup_by_key(|d| d.timestamp);

        let excess = descriptors.len().saturating_sub(self.max_frames);
        descriptors.drain(..excess);

        debug!(
            %coordinates,
            layer = %product,
            frames = descriptors.len(),
            "Located radar frames"
        );

        Ok(descriptors)
    }
}
