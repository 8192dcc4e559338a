//! Pipeline orchestration and the cached radar loop.

use chrono::{DateTime, Utc};
use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    classifier,
    compositor::{self, ComposeInput},
    config::{RadarConfig, RadarSettings},
    error::{RadarError, Result},
    fetcher::FrameFetcher,
    locator::FrameLocator,
    model::{FrameSet, Language, LoopArtifact, PrecipMode, PrecipType, RadarProduct, Region},
    source::{ByteSource, FrameDirectory, GeoMetDirectory},
};

pub const ATTRIBUTION_EN: &str = "Data provided by Environment Canada";
pub const ATTRIBUTION_FR: &str = "Données fournies par Environnement Canada";

const BASEMAP_URL: &str =
    "https://services.arcgisonline.com/ArcGIS/rest/services/Canvas/World_Light_Gray_Base/MapServer/export";

/// Result of the last successful update.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedLoop {
    pub artifact: Arc<LoopArtifact>,
    pub precip_type: PrecipType,
    /// Layer the frames were fetched from.
    pub product: RadarProduct,
    pub region: Region,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum CachedState {
    /// No update has succeeded yet.
    #[default]
    Empty,
    Ready(Arc<CachedLoop>),
}

/// State only touched by the update currently holding the lock.
#[derive(Debug, Default)]
struct UpdateSlot {
    last_outcome: Option<Result<()>>,
    basemap: Option<Arc<Vec<u8>>>,
}

/// Radar loop for one configured location.
///
/// `update` runs at most one pipeline at a time; callers that arrive while a
/// run is in flight receive that run's outcome. A failed update never touches
/// the cached loop.
#[derive(Debug)]
pub struct RadarLoop {
    settings: RadarSettings,
    locator: FrameLocator,
    fetcher: FrameFetcher,
    source: Arc<dyn ByteSource>,
    cache: RwLock<CachedState>,
    runs: AtomicU64,
    update_slot: Mutex<UpdateSlot>,
}

impl RadarLoop {
    /// Validate `config` and wire the GeoMet directory over `source`.
    pub fn new(config: &RadarConfig, source: Arc<dyn ByteSource>) -> Result<Self> {
        let settings = config.validate()?;
        let directory = Arc::new(GeoMetDirectory::new(Arc::clone(&source), settings.options.language));
        Ok(Self::from_settings(settings, source, directory))
    }

    /// Like [`new`](Self::new) with a caller-supplied frame directory.
    pub fn with_directory(
        config: &RadarConfig,
        source: Arc<dyn ByteSource>,
        directory: Arc<dyn FrameDirectory>,
    ) -> Result<Self> {
        let settings = config.validate()?;
        Ok(Self::from_settings(settings, source, directory))
    }

    fn from_settings(
        settings: RadarSettings,
        source: Arc<dyn ByteSource>,
        directory: Arc<dyn FrameDirectory>,
    ) -> Self {
        let locator = FrameLocator::for_settings(&settings, directory);
        let fetcher = FrameFetcher::new(
            Arc::clone(&source),
            settings.max_concurrent_fetches,
            settings.min_frames,
        );

        Self {
            settings,
            locator,
            fetcher,
            source,
            cache: RwLock::new(CachedState::Empty),
            runs: AtomicU64::new(0),
            update_slot: Mutex::new(UpdateSlot::default()),
        }
    }

    /// Run the whole pipeline and replace the cached loop on success.
    pub async fn update(&self) -> Result<()> {
        let seen = self.runs.load(Ordering::Acquire);
        let mut slot = self.update_slot.lock().await;

        if self.runs.load(Ordering::Acquire) != seen {
            if let Some(outcome) = &slot.last_outcome {
                debug!("Update coalesced into the run that just finished");
                return outcome.clone();
            }
        }

        let outcome = self.run_pipeline(&mut slot).await;
        if let Err(e) = &outcome {
            warn!(error = %e, "Radar loop update failed, keeping previous loop");
        }

        slot.last_outcome = Some(outcome.clone());
        self.runs.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn run_pipeline(&self, slot: &mut UpdateSlot) -> Result<()> {
        let settings = &self.settings;
        info!(
            coordinates = %settings.coordinates,
            layer = %settings.product,
            "Updating radar loop"
        );

        let region = self.locator.region_for(settings.coordinates);
        let mut product = settings.product.clone();
        let mut frames = self.fetch_frames(&region, &product).await?;

        let (classified, precip_type) = classify(frames, settings.precip).await?;
        frames = classified;

        // The legend must describe the layer on screen.
        let matching = settings.product_for(precip_type);
        if matching != product {
            info!(%precip_type, layer = %matching, "Refetching frames from the matching layer");
            frames = self.fetch_frames(&region, &matching).await?;
            product = matching;
        }

        let basemap = if settings.basemap { self.basemap(slot, &region).await } else { None };

        let generated_at = frames.generated_at();
        let options = settings.options;
        let artifact = tokio::task::spawn_blocking(move || {
            let input = ComposeInput {
                frames: &frames,
                precip_type,
                basemap: basemap.as_deref().map(Vec::as_slice),
            };
            compositor::compose(&input, &options)
        })
        .await
        .map_err(|e| RadarError::composition(format!("compositing task failed: {e}")))??;

        info!(
            frames = artifact.frame_count(),
            precip_type = %precip_type,
            layer = %product,
            bytes = artifact.bytes().len(),
            "Radar loop updated"
        );

        let cached = CachedLoop {
            artifact: Arc::new(artifact),
            precip_type,
            product,
            region,
            generated_at,
        };
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) =
            CachedState::Ready(Arc::new(cached));

        Ok(())
    }

    async fn fetch_frames(&self, region: &Region, product: &RadarProduct) -> Result<FrameSet> {
        let descriptors = self.locator.list_frames(self.settings.coordinates, product).await?;
        self.fetcher.fetch_within(region, descriptors, self.settings.fetch_timeout).await
    }

    /// Basemap bytes for `region`, fetched once per instance.
    async fn basemap(&self, slot: &mut UpdateSlot, region: &Region) -> Option<Arc<Vec<u8>>> {
        if let Some(map) = &slot.basemap {
            return Some(Arc::clone(map));
        }

        match self.source.fetch(&basemap_url(region)).await {
            Ok(bytes) => {
                let map = Arc::new(bytes);
                slot.basemap = Some(Arc::clone(&map));
                Some(map)
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Basemap unavailable, using plain background");
                None
            }
        }
    }

    /// The cached loop, running one update first if nothing is cached yet.
    pub async fn get_loop(&self) -> Result<Arc<LoopArtifact>> {
        if let Some(cached) = self.cached() {
            return Ok(Arc::clone(&cached.artifact));
        }

        self.update().await?;
        self.cached()
            .map(|cached| Arc::clone(&cached.artifact))
            .ok_or_else(|| RadarError::composition("no radar loop cached after update"))
    }

    /// Alias of [`get_loop`](Self::get_loop) for camera-style integrations.
    pub async fn get_image(&self) -> Result<Arc<LoopArtifact>> {
        self.get_loop().await
    }

    pub fn state(&self) -> CachedState {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn cached(&self) -> Option<Arc<CachedLoop>> {
        match &*self.cache.read().unwrap_or_else(PoisonError::into_inner) {
            CachedState::Ready(cached) => Some(Arc::clone(cached)),
            CachedState::Empty => None,
        }
    }

    /// Precipitation type resolved by the last successful update.
    pub fn precip_type(&self) -> Option<PrecipType> {
        self.cached().map(|c| c.precip_type)
    }

    /// Layer shown by the cached loop.
    pub fn product(&self) -> Option<RadarProduct> {
        self.cached().map(|c| c.product.clone())
    }

    pub fn region(&self) -> Option<Region> {
        self.cached().map(|c| c.region)
    }

    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        self.cached().map(|c| c.generated_at)
    }

    pub fn attribution(&self) -> &'static str {
        match self.settings.options.language {
            Language::English => ATTRIBUTION_EN,
            Language::French => ATTRIBUTION_FR,
        }
    }

    pub fn settings(&self) -> &RadarSettings {
        &self.settings
    }
}

async fn classify(frames: FrameSet, mode: PrecipMode) -> Result<(FrameSet, PrecipType)> {
    tokio::task::spawn_blocking(move || {
        let precip_type = classifier::decide(&frames, mode);
        (frames, precip_type)
    })
    .await
    .map_err(|e| RadarError::composition(format!("classification task failed: {e}")))
}

fn basemap_url(region: &Region) -> String {
    let bbox = &region.bbox;
    format!(
        "{BASEMAP_URL}?bbox={:.4},{:.4},{:.4},{:.4}&bboxSR=4326&imageSR=4326&size={},{}\
         &format=png32&transparent=false&f=image",
        bbox.lon_min, bbox.lat_min, bbox.lon_max, bbox.lat_max, region.width, region.height,
    )
}
