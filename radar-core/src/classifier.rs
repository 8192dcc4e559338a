//! Deterministic precipitation-type classification.
//!
//! Each echo pixel is matched to the nearest colour of the rain or snow
//! palette. Every frame votes for the type with more matches, and the
//! majority of frame votes wins. All ties resolve to rain. The result
//! depends on frame bytes only.

use image::RgbaImage;
use tracing::debug;

use crate::model::{FrameSet, PrecipMode, PrecipType};

/// Rain-rate colour ramp, light to heavy.
pub(crate) const RAIN_PALETTE: [[u8; 3]; 7] = [
    [152, 251, 152],
    [0, 200, 0],
    [0, 128, 0],
    [255, 255, 0],
    [255, 165, 0],
    [255, 0, 0],
    [200, 0, 120],
];

/// Snow-rate colour ramp, light to heavy.
pub(crate) const SNOW_PALETTE: [[u8; 3]; 7] = [
    [200, 255, 255],
    [150, 210, 255],
    [80, 150, 255],
    [0, 80, 255],
    [0, 0, 180],
    [120, 60, 220],
    [80, 0, 140],
];

/// Pixels below this alpha are treated as "no echo".
const ECHO_ALPHA_MIN: u8 = 32;

pub(crate) fn palette(precip: PrecipType) -> &'static [[u8; 3]] {
    match precip {
        PrecipType::Rain => &RAIN_PALETTE,
        PrecipType::Snow => &SNOW_PALETTE,
    }
}

/// Echo pixels of one frame attributed to each palette.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixelTally {
    pub rain: u64,
    pub snow: u64,
}

impl PixelTally {
    /// `None` when the frame shows no echoes.
    fn vote(self) -> Option<PrecipType> {
        match (self.rain, self.snow) {
            (0, 0) => None,
            (rain, snow) if snow > rain => Some(PrecipType::Snow),
            _ => Some(PrecipType::Rain),
        }
    }
}

/// Resolve the precipitation type for `frames`.
///
/// A pinned `mode` is returned without looking at the frames.
pub fn decide(frames: &FrameSet, mode: PrecipMode) -> PrecipType {
    if let Some(pinned) = mode.pinned() {
        return pinned;
    }

    let (mut rain_votes, mut snow_votes) = (0usize, 0usize);
    for frame in frames.frames() {
        let vote = match image::load_from_memory(&frame.bytes) {
            Ok(img) => tally(&img.to_rgba8()).vote(),
            Err(e) => {
                debug!(frame = %frame.timestamp(), error = %e, "Frame not decodable, no vote");
                None
            }
        };
        match vote {
            Some(PrecipType::Rain) => rain_votes += 1,
            Some(PrecipType::Snow) => snow_votes += 1,
            None => {}
        }
    }

    let decided = if snow_votes > rain_votes { PrecipType::Snow } else { PrecipType::Rain };
    debug!(rain_votes, snow_votes, %decided, "Precipitation type classified");
    decided
}

/// Count echo pixels closest to each palette.
pub fn tally(img: &RgbaImage) -> PixelTally {
    let mut counts = PixelTally::default();
    for px in img.pixels() {
        let [r, g, b, a] = px.0;
        if a < ECHO_ALPHA_MIN {
            continue;
        }
        let rain = nearest_distance(&RAIN_PALETTE, [r, g, b]);
        let snow = nearest_distance(&SNOW_PALETTE, [r, g, b]);
        if snow < rain {
            counts.snow += 1;
        } else {
            counts.rain += 1;
        }
    }
    counts
}

fn nearest_distance(palette: &[[u8; 3]], rgb: [u8; 3]) -> u32 {
    palette
        .iter()
        .map(|c| {
            c.iter()
                .zip(rgb)
                .map(|(&a, b)| (i32::from(a) - i32::from(b)).unsigned_abs().pow(2))
                .sum()
        })
        .min()
        .unwrap_or(u32::MAX)
}
