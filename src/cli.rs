use clap::Parser;
use std::path::PathBuf;
use svgconvert::{Algorithm, Preset, Settings, SmoothingLevel, VectorizationConfig};

#[derive(Parser)]
#[command(name = "svgconvert")]
#[command(about = "Convert PNG and JPEG images to SVG")]
#[command(version)]
pub struct Cli {
    /// Input images (.png, .jpg, .jpeg)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory for the .svg files (default: next to each input)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Starting settings; individual flags override them
    #[arg(long, value_enum)]
    pub preset: Option<Preset>,

    /// JSON settings file (vectorization, pipeline and batch sections)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Palette size, clamped to 2-256
    #[arg(short, long)]
    pub colors: Option<u16>,

    #[arg(short, long, value_enum)]
    pub smoothing: Option<SmoothingLevel>,

    /// Path simplification tolerance in pixels, clamped to 0.1-10
    #[arg(short = 'p', long)]
    pub simplification: Option<f64>,

    /// Keep transparent areas empty instead of flattening onto white
    #[arg(long)]
    pub preserve_transparency: Option<bool>,

    #[arg(short, long, value_enum)]
    pub algorithm: Option<Algorithm>,

    /// Use the 50 MB per-file limit instead of 10 MB
    #[arg(long)]
    pub professional: bool,

    /// Convert on a background worker thread
    #[arg(short, long)]
    pub worker: bool,

    /// Print the batch report as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Layers file settings, preset and flags, then clamps the result into
    /// range.
    pub fn vectorization_config(&self, settings: &Settings) -> VectorizationConfig {
        let mut config = match self.preset {
            Some(preset) => VectorizationConfig::preset(preset),
            None => settings.vectorization.clone(),
        };
        if let Some(colors) = self.colors {
            config.color_count = colors;
        }
        if let Some(level) = self.smoothing {
            config.smoothing_level = level;
        }
        if let Some(tolerance) = self.simplification {
            config.path_simplification = tolerance;
        }
        if let Some(keep) = self.preserve_transparency {
            config.preserve_transparency = keep;
        }
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        config.clamped()
    }
}
