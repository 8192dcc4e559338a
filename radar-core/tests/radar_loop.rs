//! Controller scenarios against in-memory collaborators.
//!
//! These tests cover:
//! - Partial fetch failure and the frame quorum
//! - Manual precipitation pins and automatic classification
//! - Stale-but-available cache on failed updates
//! - Single-flight `update` and lazy `get_loop`
//! - Eager configuration validation

use std::{
    collections::HashSet,
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use image::{ImageFormat, Rgba, RgbaImage};
use radar_core::{
    ByteSource, CachedState, FrameDescriptor, FrameDirectory, Language, PrecipMode, PrecipType,
    RadarConfig, RadarError, RadarLoop, RadarProduct, Region,
};

// =============================================================================
// Test Helpers
// =============================================================================

const SNOW_BLUE: [u8; 4] = [0, 80, 255, 255];
const RAIN_GREEN: [u8; 4] = [0, 200, 0, 255];

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, minute, 0).unwrap()
}

fn png(color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_fn(32, 32, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 { Rgba(color) } else { Rgba([0, 0, 0, 0]) }
    });
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
    out
}

/// Lists `frame_count` frames six minutes apart, recording the layers asked for.
#[derive(Debug)]
struct FakeDirectory {
    frame_count: AtomicUsize,
    calls: AtomicUsize,
    layers: Mutex<Vec<String>>,
    delay: Duration,
    fail: bool,
}

impl FakeDirectory {
    fn new(frame_count: usize) -> Arc<Self> {
        Arc::new(Self {
            frame_count: AtomicUsize::new(frame_count),
            calls: AtomicUsize::new(0),
            layers: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            fail: false,
        })
    }

    fn slow(frame_count: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            frame_count: AtomicUsize::new(frame_count),
            calls: AtomicUsize::new(0),
            layers: Mutex::new(Vec::new()),
            delay,
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            frame_count: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            layers: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn layers(&self) -> Vec<String> {
        self.layers.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameDirectory for FakeDirectory {
    async fn list(
        &self,
        product: &RadarProduct,
        _region: &Region,
    ) -> anyhow::Result<Vec<FrameDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.layers.lock().unwrap().push(product.layer().to_string());
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(anyhow!("capabilities returned 502 Bad Gateway"));
        }
        let n = self.frame_count.load(Ordering::SeqCst) as u32;
        Ok((0..n)
            .map(|i| FrameDescriptor {
                id: format!("{}/frame-{i}", product.layer()),
                timestamp: at(i * 6),
            })
            .collect())
    }
}

/// Serves one PNG per layer; ids containing a failing pattern error out.
#[derive(Debug)]
struct FakeSource {
    image: Vec<u8>,
    snow_layer_image: Option<Vec<u8>>,
    failing: Mutex<HashSet<String>>,
    fetches: AtomicUsize,
    completed: AtomicUsize,
    delay: Duration,
}

impl FakeSource {
    fn new(color: [u8; 4]) -> Arc<Self> {
        Self::slow(color, Duration::ZERO)
    }

    fn slow(color: [u8; 4], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            image: png(color),
            snow_layer_image: None,
            failing: Mutex::new(HashSet::new()),
            fetches: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            delay,
        })
    }

    /// Serves `rate_color` everywhere except the snow-rate layer, which gets `snow_color`.
    fn by_layer(rate_color: [u8; 4], snow_color: [u8; 4]) -> Arc<Self> {
        Arc::new(Self {
            image: png(rate_color),
            snow_layer_image: Some(png(snow_color)),
            failing: Mutex::new(HashSet::new()),
            fetches: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn fail_on(&self, pattern: &str) {
        self.failing.lock().unwrap().insert(pattern.to_string());
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ByteSource for FakeSource {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().iter().any(|pattern| url.contains(pattern.as_str())) {
            return Err(anyhow!("404 Not Found"));
        }
        match &self.snow_layer_image {
            Some(image) if url.starts_with(RadarProduct::SNOW_LAYER) => Ok(image.clone()),
            _ => Ok(self.image.clone()),
        }
    }
}

fn config() -> RadarConfig {
    RadarConfig { width: 32, height: 32, basemap: false, ..RadarConfig::at(45.5, -73.6) }
}

fn radar_loop(
    config: &RadarConfig,
    source: &Arc<FakeSource>,
    directory: &Arc<FakeDirectory>,
) -> RadarLoop {
    RadarLoop::with_directory(config, source.clone(), directory.clone()).expect("valid config")
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn one_failed_frame_out_of_five_still_updates() {
    let source = FakeSource::new(RAIN_GREEN);
    source.fail_on("/frame-3");
    let directory = FakeDirectory::new(5);
    let radar = radar_loop(&config(), &source, &directory);

    radar.update().await.expect("quorum of one is met");

    let artifact = radar.get_loop().await.unwrap();
    assert_eq!(artifact.frame_count(), 4);
    assert_eq!(source.fetches(), 5);
}

#[tokio::test]
async fn snow_pin_wins_over_rainy_frames() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::new(3);
    let cfg = RadarConfig { precip: PrecipMode::Snow, ..config() };
    let radar = radar_loop(&cfg, &source, &directory);

    radar.update().await.unwrap();

    assert_eq!(radar.precip_type(), Some(PrecipType::Snow));
    assert_eq!(directory.layers(), vec![RadarProduct::SNOW_LAYER]);
}

#[tokio::test]
async fn auto_snow_switches_to_the_snow_rate_layer() {
    let source = FakeSource::new(SNOW_BLUE);
    let directory = FakeDirectory::new(3);
    let radar = radar_loop(&config(), &source, &directory);

    assert_eq!(radar.precip_type(), None);
    radar.update().await.unwrap();

    assert_eq!(radar.precip_type(), Some(PrecipType::Snow));
    assert_eq!(directory.layers(), vec![RadarProduct::RAIN_LAYER, RadarProduct::SNOW_LAYER]);
    assert_eq!(radar.product().unwrap().layer(), RadarProduct::SNOW_LAYER);
    assert_eq!(source.fetches(), 6);
}

#[tokio::test]
async fn auto_rain_keeps_the_rain_rate_layer() {
    let source = FakeSource::by_layer(RAIN_GREEN, SNOW_BLUE);
    let directory = FakeDirectory::new(3);
    let radar = radar_loop(&config(), &source, &directory);

    radar.update().await.unwrap();

    assert_eq!(radar.precip_type(), Some(PrecipType::Rain));
    assert_eq!(directory.layers(), vec![RadarProduct::RAIN_LAYER]);
    assert_eq!(radar.product().unwrap().layer(), RadarProduct::RAIN_LAYER);
}

#[tokio::test]
async fn configured_layer_is_never_switched() {
    let source = FakeSource::new(SNOW_BLUE);
    let directory = FakeDirectory::new(2);
    let cfg = RadarConfig { layer: Some("RADAR_1KM_RDBR".into()), ..config() };
    let radar = radar_loop(&cfg, &source, &directory);

    radar.update().await.unwrap();

    assert_eq!(radar.precip_type(), Some(PrecipType::Snow));
    assert_eq!(directory.layers(), vec!["RADAR_1KM_RDBR"]);
}

#[tokio::test]
async fn failed_switch_to_snow_layer_keeps_cache_empty() {
    let source = FakeSource::new(SNOW_BLUE);
    source.fail_on(RadarProduct::SNOW_LAYER);
    let directory = FakeDirectory::new(2);
    let radar = radar_loop(&config(), &source, &directory);

    let err = radar.update().await.unwrap_err();

    assert_eq!(err, RadarError::InsufficientFrames { required: 1, fetched: 0 });
    assert_eq!(radar.state(), CachedState::Empty);
}

#[tokio::test]
async fn ten_fps_loop_with_overlays() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::new(4);
    let cfg = RadarConfig { fps: 10, legend: true, timestamp: true, ..config() };
    let radar = radar_loop(&cfg, &source, &directory);

    let artifact = radar.get_loop().await.unwrap();

    assert_eq!(artifact.frame_count(), 4);
    assert_eq!(artifact.fps(), 10);
    assert!(artifact.legend_enabled());
    assert!(artifact.timestamp_enabled());
    assert!(artifact.bytes().starts_with(b"GIF89a"));
}

#[tokio::test]
async fn empty_listing_leaves_uninitialized_cache_empty() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::new(0);
    let radar = radar_loop(&config(), &source, &directory);

    let err = radar.update().await.unwrap_err();

    assert_eq!(err, RadarError::InsufficientFrames { required: 1, fetched: 0 });
    assert_eq!(radar.state(), CachedState::Empty);
    assert_eq!(radar.region(), None);
}

#[tokio::test]
async fn failed_update_keeps_previous_loop() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::new(3);
    let radar = radar_loop(&config(), &source, &directory);

    radar.update().await.unwrap();
    let before = radar.get_loop().await.unwrap();
    let generated = radar.generated_at();

    directory.frame_count.store(0, Ordering::SeqCst);
    let err = radar.update().await.unwrap_err();
    assert!(matches!(err, RadarError::InsufficientFrames { .. }));

    let after = radar.get_loop().await.unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(radar.generated_at(), generated);
    assert_eq!(radar.precip_type(), Some(PrecipType::Rain));
}

#[tokio::test]
async fn unreachable_listing_is_source_unavailable() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::failing();
    let radar = radar_loop(&config(), &source, &directory);

    let err = radar.update().await.unwrap_err();

    match err {
        RadarError::SourceUnavailable(msg) => assert!(msg.contains("502 Bad Gateway")),
        other => panic!("expected SourceUnavailable, got {other:?}"),
    }
    assert_eq!(source.fetches(), 0);
    assert_eq!(radar.state(), CachedState::Empty);
}

#[tokio::test]
async fn concurrent_updates_run_one_pipeline() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::slow(3, Duration::from_millis(100));
    let radar = Arc::new(radar_loop(&config(), &source, &directory));

    let results = futures::future::join_all((0..8).map(|_| {
        let radar = Arc::clone(&radar);
        async move { radar.update().await }
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(directory.calls(), 1);
    assert_eq!(source.fetches(), 3);
}

#[tokio::test]
async fn get_loop_updates_once_then_serves_cache() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::new(2);
    let radar = radar_loop(&config(), &source, &directory);

    let first = radar.get_image().await.unwrap();
    let second = radar.get_loop().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(directory.calls(), 1);
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn later_update_replaces_cached_loop() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::new(2);
    let radar = radar_loop(&config(), &source, &directory);

    let first = radar.get_loop().await.unwrap();
    directory.frame_count.store(3, Ordering::SeqCst);
    radar.update().await.unwrap();
    let second = radar.get_loop().await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.frame_count(), 3);
    assert_eq!(directory.calls(), 2);
}

#[tokio::test]
async fn cancelled_update_aborts_fetches_and_leaves_cache_untouched() {
    let source = FakeSource::slow(RAIN_GREEN, Duration::from_millis(200));
    let directory = FakeDirectory::new(3);
    let radar = radar_loop(&config(), &source, &directory);

    let cancelled = tokio::time::timeout(Duration::from_millis(50), radar.update()).await;
    assert!(cancelled.is_err());
    assert_eq!(source.fetches(), 3);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(source.completed(), 0);
    assert_eq!(radar.state(), CachedState::Empty);

    radar.update().await.expect("a later update runs a fresh pipeline");
    assert_eq!(directory.calls(), 2);
    assert_eq!(radar.get_loop().await.unwrap().frame_count(), 3);
}

#[tokio::test]
async fn invalid_config_fails_before_any_network_call() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::new(3);
    let cfg = RadarConfig { opacity: 2.0, ..config() };

    let err = RadarLoop::with_directory(&cfg, source.clone(), directory.clone()).unwrap_err();

    assert!(matches!(err, RadarError::Configuration { field: "opacity", .. }));
    assert_eq!(directory.calls(), 0);
    assert_eq!(source.fetches(), 0);
}

#[tokio::test]
async fn basemap_is_fetched_once_and_its_failure_is_tolerated() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::new(2);
    let cfg = RadarConfig { basemap: true, ..config() };
    let radar = radar_loop(&cfg, &source, &directory);

    radar.update().await.unwrap();
    radar.update().await.unwrap();
    // Two frames per update plus a single basemap request.
    assert_eq!(source.fetches(), 5);

    let source = FakeSource::new(RAIN_GREEN);
    source.fail_on("https://services.arcgisonline.com/");
    let directory = FakeDirectory::new(2);
    let radar = radar_loop(&cfg, &source, &directory);

    radar.update().await.expect("frames alone are enough");
    assert_eq!(radar.get_loop().await.unwrap().frame_count(), 2);
}

#[test]
fn attribution_follows_language() {
    let source = FakeSource::new(RAIN_GREEN);
    let directory = FakeDirectory::new(1);

    let en = radar_loop(&config(), &source, &directory);
    assert_eq!(en.attribution(), "Data provided by Environment Canada");

    let fr_cfg = RadarConfig { language: Language::French, ..config() };
    let fr = radar_loop(&fr_cfg, &source, &directory);
    assert_eq!(fr.attribution(), "Données fournies par Environnement Canada");
}
