use anyhow::Context;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use inquire::{CustomType, Select};
use radar_core::{
    GeoMetDirectory, HttpSource, Language, PrecipMode, RadarConfig, RadarLoop,
    locator::FrameLocator,
};
use std::{path::PathBuf, sync::Arc};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "radar", version, about = "Animated weather radar loops")]
pub struct Cli {
    /// Log pipeline progress to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Location overrides; the saved config is used when absent.
#[derive(Debug, Args)]
pub struct LocationArgs {
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively set location and loop options.
    Configure,

    /// List the radar frames currently available.
    Frames {
        #[command(flatten)]
        location: LocationArgs,
    },

    /// Build a radar loop and write it as a GIF.
    Loop {
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        location: LocationArgs,

        #[arg(long)]
        fps: Option<u32>,

        /// Radar layer opacity between 0 and 1.
        #[arg(long)]
        opacity: Option<f32>,

        /// "auto", "rain" or "snow".
        #[arg(long)]
        precip: Option<String>,

        /// "en" or "fr".
        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        no_legend: bool,

        #[arg(long)]
        no_timestamp: bool,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Frames { location } => {
                let config = location.apply(RadarConfig::load()?);
                list_frames(&config).await
            }
            Command::Loop {
                output,
                location,
                fps,
                opacity,
                precip,
                language,
                no_legend,
                no_timestamp,
                json,
            } => {
                let mut config = location.apply(RadarConfig::load()?);
                if let Some(fps) = fps {
                    config.fps = fps;
                }
                if let Some(opacity) = opacity {
                    config.opacity = opacity;
                }
                if let Some(precip) = precip {
                    config.precip = PrecipMode::try_from(precip.as_str())?;
                }
                if let Some(language) = language {
                    config.language = Language::try_from(language.as_str())?;
                }
                config.legend &= !no_legend;
                config.timestamp &= !no_timestamp;

                write_loop(&config, &output, json).await
            }
        }
    }
}

impl LocationArgs {
    fn apply(self, mut config: RadarConfig) -> RadarConfig {
        if let Some(lat) = self.lat {
            config.latitude = Some(lat);
        }
        if let Some(lon) = self.lon {
            config.longitude = Some(lon);
        }
        config
    }
}

const PRECIP_CHOICES: [&str; 3] = ["auto", "rain", "snow"];
const LANGUAGE_CHOICES: [&str; 2] = ["en", "fr"];

/// Index of the saved value, so re-running `configure` keeps it preselected.
fn starting_cursor(choices: &[&str], current: &str) -> usize {
    choices.iter().position(|c| *c == current).unwrap_or(0)
}

fn configure() -> anyhow::Result<()> {
    let mut config = RadarConfig::load()?;

    config.latitude = Some(
        CustomType::<f64>::new("Latitude:")
            .with_default(config.latitude.unwrap_or(45.5))
            .with_error_message("Please enter a decimal latitude, e.g. 45.5")
            .prompt()?,
    );
    config.longitude = Some(
        CustomType::<f64>::new("Longitude:")
            .with_default(config.longitude.unwrap_or(-73.6))
            .with_error_message("Please enter a decimal longitude, e.g. -73.6")
            .prompt()?,
    );

    let precip = Select::new("Precipitation type:", PRECIP_CHOICES.to_vec())
        .with_starting_cursor(starting_cursor(&PRECIP_CHOICES, config.precip.as_str()))
        .prompt()?;
    config.precip = PrecipMode::try_from(precip)?;

    let language = Select::new("Language:", LANGUAGE_CHOICES.to_vec())
        .with_starting_cursor(starting_cursor(&LANGUAGE_CHOICES, config.language.code()))
        .prompt()?;
    config.language = Language::try_from(language)?;

    config.fps = CustomType::<u32>::new("Frames per second:").with_default(config.fps).prompt()?;
    config.opacity =
        CustomType::<f32>::new("Radar opacity (0-1):").with_default(config.opacity).prompt()?;

    config.validate()?;
    config.save()?;

    println!("Saved configuration to {}", RadarConfig::config_file_path()?.display());
    Ok(())
}

async fn list_frames(config: &RadarConfig) -> anyhow::Result<()> {
    let settings = config.validate()?;
    let directory = GeoMetDirectory::new(HttpSource::new()?, settings.options.language);
    let locator = FrameLocator::for_settings(&settings, Arc::new(directory));

    let frames = locator.list_frames(settings.coordinates, &settings.product).await?;
    if frames.is_empty() {
        println!("No recent {} frames for {}.", settings.product, settings.coordinates);
        return Ok(());
    }

    println!("{} frames for {} ({}):", frames.len(), settings.coordinates, settings.product);
    for frame in frames {
        let local = frame.timestamp.with_timezone(&Local);
        println!("  {}  ({})", frame.timestamp.format("%Y-%m-%d %H:%M UTC"), local.format("%H:%M local"));
    }
    Ok(())
}

async fn write_loop(config: &RadarConfig, output: &PathBuf, json: bool) -> anyhow::Result<()> {
    let radar = RadarLoop::new(config, Arc::new(HttpSource::new()?))?;
    let artifact = radar.get_loop().await?;

    std::fs::write(output, artifact.bytes())
        .with_context(|| format!("Failed to write radar loop to {}", output.display()))?;

    if json {
        let summary = serde_json::json!({
            "output": output,
            "precip_type": radar.precip_type(),
            "layer": radar.product(),
            "frame_count": artifact.frame_count(),
            "fps": artifact.fps(),
            "generated_at": radar.generated_at(),
            "region": radar.region(),
            "attribution": radar.attribution(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Wrote {} ({} frames at {} fps)", output.display(), artifact.frame_count(), artifact.fps());
    if let Some(precip) = radar.precip_type() {
        println!("Precipitation: {precip}");
    }
    if let Some(generated_at) = radar.generated_at() {
        println!("Generated: {}", generated_at.format("%Y-%m-%d %H:%M UTC"));
    }
    println!("{}", radar.attribution());
    Ok(())
}
