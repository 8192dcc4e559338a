//! Overlays and animation assembly.
//!
//! Every frame is drawn over the basemap (or a flat background) at the
//! configured opacity. Then the timestamp label and the legend panel are
//! stamped on. The frames are encoded as an endlessly looping GIF. Nothing
//! here reads the clock, so identical inputs produce identical bytes.

use ab_glyph::{FontRef, PxScale};
use chrono::{DateTime, Datelike, Timelike, Utc};
use image::{
    Delay, Rgba, RgbaImage,
    codecs::gif::{GifEncoder, Repeat},
    imageops::{self, FilterType},
};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use tracing::{debug, warn};

use crate::{
    classifier,
    error::{RadarError, Result},
    model::{FrameSet, Language, LoopArtifact, LoopOptions, PrecipType},
};

const FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");
/// Label line height in pixels at overlay scale 1.
const TEXT_PX: f32 = 12.0;

const BACKGROUND: Rgba<u8> = Rgba([230, 230, 230, 255]);
const LABEL_BACKGROUND: Rgba<u8> = Rgba([40, 40, 40, 255]);
const LABEL_INK: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LEGEND_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LEGEND_INK: Rgba<u8> = Rgba([20, 20, 20, 255]);

/// GIF quantizer speed (1 = best quality, 30 = fastest).
const GIF_SPEED: i32 = 10;

const FRENCH_MONTHS: [&str; 12] = [
    "janv.", "févr.", "mars", "avr.", "mai", "juin", "juil.", "août", "sept.", "oct.", "nov.",
    "déc.",
];

/// Everything a loop is composed from besides the options.
#[derive(Debug, Clone, Copy)]
pub struct ComposeInput<'a> {
    pub frames: &'a FrameSet,
    /// Selects the legend ramp and title.
    pub precip_type: PrecipType,
    /// Encoded basemap image; a flat background is used when absent.
    pub basemap: Option<&'a [u8]>,
}

/// Overlay and encode `input.frames` into one animated artifact.
///
/// `options` normally comes from validated settings; out-of-range values
/// passed directly still fail as [`RadarError::Composition`].
pub fn compose(input: &ComposeInput<'_>, options: &LoopOptions) -> Result<LoopArtifact> {
    if options.fps == 0 {
        return Err(RadarError::composition("fps must be greater than zero"));
    }
    if !(0.0..=1.0).contains(&options.opacity) {
        return Err(RadarError::composition(format!(
            "opacity {} is outside [0, 1]",
            options.opacity
        )));
    }

    let frames = input.frames.frames();
    let Some(first) = frames.first() else {
        return Err(RadarError::composition("no frames to compose"));
    };

    let decode = |bytes: &[u8], at: DateTime<Utc>| {
        image::load_from_memory(bytes)
            .map(|img| img.to_rgba8())
            .map_err(|e| RadarError::composition(format!("frame {at} could not be decoded: {e}")))
    };

    let font = load_font()?;
    let first_img = decode(&first.bytes, first.timestamp())?;
    let (width, height) = first_img.dimensions();
    let background = background(input.basemap, width, height);

    let mut rendered = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        let radar = if i == 0 { first_img.clone() } else { decode(&frame.bytes, frame.timestamp())? };
        let radar = fit(radar, width, height);
        rendered.push(render_frame(
            &background,
            &radar,
            frame.timestamp(),
            input.precip_type,
            options,
            &font,
        ));
    }

    let bytes = encode_gif(rendered, options.fps)?;
    debug!(
        frames = frames.len(),
        width,
        height,
        size = bytes.len(),
        "Radar loop composed"
    );

    Ok(LoopArtifact::new(bytes, frames.len(), options, input.frames.generated_at()))
}

fn load_font() -> Result<FontRef<'static>> {
    FontRef::try_from_slice(FONT_DATA)
        .map_err(|e| RadarError::composition(format!("bundled label font is unreadable: {e}")))
}

fn background(basemap: Option<&[u8]>, width: u32, height: u32) -> RgbaImage {
    match basemap.map(image::load_from_memory) {
        Some(Ok(img)) => fit(img.to_rgba8(), width, height),
        Some(Err(e)) => {
            warn!(error = %e, "Basemap could not be decoded, using plain background");
            RgbaImage::from_pixel(width, height, BACKGROUND)
        }
        None => RgbaImage::from_pixel(width, height, BACKGROUND),
    }
}

fn fit(img: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if img.dimensions() == (width, height) {
        img
    } else {
        imageops::resize(&img, width, height, FilterType::Nearest)
    }
}

/// One finished frame: background, radar layer, then overlays.
pub(crate) fn render_frame(
    background: &RgbaImage,
    radar: &RgbaImage,
    at: DateTime<Utc>,
    precip_type: PrecipType,
    options: &LoopOptions,
    font: &FontRef<'_>,
) -> RgbaImage {
    let mut canvas = background.clone();
    for (dst, src) in canvas.pixels_mut().zip(radar.pixels()) {
        blend(dst, *src, options.opacity);
    }

    let scale = (canvas.width() / 400).max(1);
    if options.timestamp {
        draw_timestamp(&mut canvas, &timestamp_label(at, options.language), font, scale);
    }
    if options.legend {
        draw_legend(&mut canvas, precip_type, options.language, font, scale);
    }
    canvas
}

fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, opacity: f32) {
    let alpha = f32::from(src[3]) / 255.0 * opacity;
    if alpha <= 0.0 {
        return;
    }
    for c in 0..3 {
        let mixed = f32::from(dst[c]) * (1.0 - alpha) + f32::from(src[c]) * alpha;
        dst[c] = mixed.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = 255;
}

/// Localized UTC timestamp.
pub fn timestamp_label(at: DateTime<Utc>, language: Language) -> String {
    match language {
        Language::English => at.format("%b %-d %Y  %-I:%M %p UTC").to_string(),
        Language::French => format!(
            "{} {} {}  {} h {:02} UTC",
            at.day(),
            FRENCH_MONTHS[at.month0() as usize],
            at.year(),
            at.hour(),
            at.minute(),
        ),
    }
}

fn legend_title(precip_type: PrecipType, language: Language) -> &'static str {
    match (precip_type, language) {
        (PrecipType::Rain, Language::English) => "Rain (mm/h)",
        (PrecipType::Snow, Language::English) => "Snow (cm/h)",
        (PrecipType::Rain, Language::French) => "Pluie (mm/h)",
        (PrecipType::Snow, Language::French) => "Neige (cm/h)",
    }
}

fn margin(scale: u32) -> i32 {
    4 * scale as i32
}

fn padding(scale: u32) -> u32 {
    2 * scale
}

fn text_scale(scale: u32) -> PxScale {
    PxScale::from(TEXT_PX * scale as f32)
}

fn line_height(scale: u32) -> u32 {
    (TEXT_PX * scale as f32).ceil() as u32
}

/// Dark box with white text in the bottom-left corner.
fn draw_timestamp(canvas: &mut RgbaImage, label: &str, font: &FontRef<'_>, scale: u32) {
    let px = text_scale(scale);
    let pad = padding(scale);
    let (text_w, _) = text_size(px, font, label);
    let box_w = text_w + 2 * pad;
    let box_h = line_height(scale) + 2 * pad;
    let x = margin(scale);
    let y = canvas.height() as i32 - margin(scale) - box_h as i32;

    draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(box_w, box_h), LABEL_BACKGROUND);
    draw_text_mut(canvas, LABEL_INK, x + pad as i32, y + pad as i32, px, font, label);
}

/// White panel in the top-right corner: title, then the colour ramp with
/// the heaviest rate on top.
fn draw_legend(
    canvas: &mut RgbaImage,
    precip_type: PrecipType,
    language: Language,
    font: &FontRef<'_>,
    scale: u32,
) {
    let title = legend_title(precip_type, language);
    let ramp = classifier::palette(precip_type);

    let px = text_scale(scale);
    let pad = padding(scale);
    let (title_w, _) = text_size(px, font, title);
    let swatch_w = 10 * scale;
    let swatch_h = 6 * scale;
    let panel_w = title_w.max(swatch_w) + 2 * pad;
    let panel_h = 3 * pad + line_height(scale) + swatch_h * ramp.len() as u32;
    let x = canvas.width() as i32 - margin(scale) - panel_w as i32;
    let y = margin(scale);

    draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(panel_w, panel_h), LEGEND_BACKGROUND);
    draw_text_mut(canvas, LEGEND_INK, x + pad as i32, y + pad as i32, px, font, title);

    let ramp_top = y + (2 * pad + line_height(scale)) as i32;
    for (i, [r, g, b]) in ramp.iter().rev().enumerate() {
        let swatch_y = ramp_top + i as i32 * swatch_h as i32;
        draw_filled_rect_mut(
            canvas,
            Rect::at(x + pad as i32, swatch_y).of_size(swatch_w, swatch_h),
            Rgba([*r, *g, *b, 255]),
        );
    }
}

fn encode_gif(frames: Vec<RgbaImage>, fps: u32) -> Result<Vec<u8>> {
    let delay = Delay::from_numer_denom_ms(1000, fps);
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut bytes, GIF_SPEED);
        encoder.set_repeat(Repeat::Infinite).map_err(RadarError::composition)?;
        for frame in frames {
            encoder
                .encode_frame(image::Frame::from_parts(frame, 0, 0, delay))
                .map_err(RadarError::composition)?;
        }
    }
    Ok(bytes)
}
