//! Frame directory backed by the GeoMet WMS service.
//!
//! Available snapshots are read from the `time` dimension advertised in the
//! layer's `GetCapabilities` document; each snapshot becomes a `GetMap` URL
//! for the requested region.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use quick_xml::{Reader, events::Event};
use tracing::debug;

use super::{ByteSource, FrameDirectory};
use crate::model::{FrameDescriptor, Language, RadarProduct, Region};

pub const GEOMET_URL: &str = "https://geo.weather.gc.ca/geomet";

/// Upper bound on timestamps expanded from one interval.
const MAX_EXPANDED_TIMES: usize = 10_000;

#[derive(Debug, Clone)]
pub struct GeoMetDirectory<S> {
    source: S,
    base_url: String,
    language: Language,
}

impl<S: ByteSource> GeoMetDirectory<S> {
    pub fn new(source: S, language: Language) -> Self {
        Self::with_base_url(source, GEOMET_URL, language)
    }

    pub fn with_base_url(source: S, base_url: impl Into<String>, language: Language) -> Self {
        Self { source, base_url: base_url.into(), language }
    }

    pub fn capabilities_url(&self, product: &RadarProduct) -> String {
        format!(
            "{}?lang={}&service=WMS&version=1.3.0&request=GetCapabilities&layer={}",
            self.base_url,
            self.language.code(),
            product.layer(),
        )
    }

    pub fn frame_url(&self, product: &RadarProduct, region: &Region, at: DateTime<Utc>) -> String {
        let bbox = &region.bbox;
        // WMS 1.3.0 with EPSG:4326 uses latitude-first axis order.
        format!(
            "{}?lang={}&service=WMS&version=1.3.0&request=GetMap&layers={}&styles=\
             &crs=EPSG:4326&bbox={:.4},{:.4},{:.4},{:.4}&width={}&height={}\
             &format=image/png&transparent=true&time={}",
            self.base_url,
            self.language.code(),
            product.layer(),
            bbox.lat_min,
            bbox.lon_min,
            bbox.lat_max,
            bbox.lon_max,
            region.width,
            region.height,
            at.format("%Y-%m-%dT%H:%M:%SZ"),
        )
    }
}

#[async_trait]
impl<S: ByteSource> FrameDirectory for GeoMetDirectory<S> {
    async fn list(&self, product: &RadarProduct, region: &Region) -> Result<Vec<FrameDescriptor>> {
        let url = self.capabilities_url(product);
        let bytes = self
            .source
            .fetch(&url)
            .await
            .with_context(|| format!("Failed to fetch GeoMet capabilities for {product}"))?;

        let xml = std::str::from_utf8(&bytes).context("GeoMet capabilities are not valid UTF-8")?;
        let dimension = time_dimension(xml, product.layer())?;
        let times = expand_time_dimension(&dimension)
            .with_context(|| format!("Invalid time dimension '{dimension}' for {product}"))?;

        debug!(layer = %product, frames = times.len(), "GeoMet time dimension expanded");

        Ok(times
            .into_iter()
            .map(|timestamp| FrameDescriptor {
                id: self.frame_url(product, region, timestamp),
                timestamp,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    LayerName,
    TimeDimension,
}

/// Extract the `time` dimension text of `layer` from a capabilities document.
fn time_dimension(xml: &str, layer: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // One entry per open <Layer>, holding its <Name> once seen.
    let mut layers: Vec<Option<String>> = Vec::new();
    let mut target: Option<TextTarget> = None;

    loop {
        match reader.read_event().context("Malformed GeoMet capabilities XML")? {
            Event::Start(e) => {
                target = match e.local_name().as_ref() {
                    b"Layer" => {
                        layers.push(None);
                        None
                    }
                    b"Name" if matches!(layers.last(), Some(None)) => Some(TextTarget::LayerName),
                    b"Dimension" | b"Extent" if !layers.is_empty() => {
                        let is_time = e
                            .try_get_attribute("name")
                            .context("Malformed dimension attribute")?
                            .is_some_and(|a| a.value.as_ref() == b"time");
                        is_time.then_some(TextTarget::TimeDimension)
                    }
                    _ => None,
                };
            }
            Event::Text(t) => {
                let text = t.decode().context("Undecodable capabilities text")?;
                match target {
                    Some(TextTarget::LayerName) => {
                        if let Some(slot) = layers.last_mut() {
                            *slot = Some(text.trim().to_string());
                        }
                    }
                    Some(TextTarget::TimeDimension) => {
                        let owner = layers.iter().rev().flatten().next();
                        if owner.is_some_and(|name| name == layer) {
                            return Ok(text.trim().to_string());
                        }
                    }
                    None => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"Layer" {
                    layers.pop();
                }
                target = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Err(anyhow!("No time dimension advertised for layer {layer}"))
}

/// Expand `start/end/period`, a comma-separated list, or a single instant.
fn expand_time_dimension(value: &str) -> Result<Vec<DateTime<Utc>>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }

    if value.contains(',') {
        return value.split(',').map(|s| parse_instant(s.trim())).collect();
    }

    let parts: Vec<&str> = value.split('/').collect();
    match parts.as_slice() {
        [instant] => Ok(vec![parse_instant(instant)?]),
        [start, end, period] => {
            let start = parse_instant(start)?;
            let end = parse_instant(end)?;
            let step = parse_period(period)?;

            let mut times = Vec::new();
            let mut at = start;
            while at <= end {
                if times.len() == MAX_EXPANDED_TIMES {
                    bail!("interval expands to more than {MAX_EXPANDED_TIMES} timestamps");
                }
                times.push(at);
                at = at
                    .checked_add_signed(step)
                    .ok_or_else(|| anyhow!("interval overflows the supported date range"))?;
            }
            Ok(times)
        }
        _ => bail!("unrecognised time dimension format"),
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{s}'"))
}

/// Parse an ISO-8601 duration such as `PT6M`, `PT1H30M` or `P1D`.
fn parse_period(s: &str) -> Result<TimeDelta> {
    let rest = s.strip_prefix('P').ok_or_else(|| anyhow!("Period '{s}' must start with 'P'"))?;
    let (date_part, time_part) = rest.split_once('T').unwrap_or((rest, ""));

    let mut total = TimeDelta::zero();
    for (part, in_time) in [(date_part, false), (time_part, true)] {
        let mut digits = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let n: i64 = digits.parse().with_context(|| format!("Invalid period '{s}'"))?;
            digits.clear();
            let component = match (c, in_time) {
                ('W', false) => TimeDelta::try_weeks(n),
                ('D', false) => TimeDelta::try_days(n),
                ('H', true) => TimeDelta::try_hours(n),
                ('M', true) => TimeDelta::try_minutes(n),
                ('S', true) => TimeDelta::try_seconds(n),
                _ => bail!("Unsupported period component '{c}' in '{s}'"),
            };
            total = component
                .and_then(|d| total.checked_add(&d))
                .ok_or_else(|| anyhow!("Period '{s}' is out of range"))?;
        }
        if !digits.is_empty() {
            bail!("Dangling number in period '{s}'");
        }
    }

    if total <= TimeDelta::zero() {
        bail!("Period '{s}' must be positive");
    }
    Ok(total)
}
