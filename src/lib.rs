//! svgconvert - PNG/JPEG to SVG conversion pipeline
//!
//! Converts raster images into scalable vector graphics by reducing the
//! image to a small palette, finding the boundaries between color regions
//! and tracing each region as a filled path.
//!
//! ## Features
//!
//! - **K-means color quantization** in a perceptually weighted RGB space
//! - **Sobel and Canny** edge detection, picked per image
//! - **Crack-following** region tracing with holes, simplified with Douglas-Peucker
//! - **Cubic Bézier fitting** for smooth outlines
//! - **Per-stage timeouts** and a memory budget, with raster fallback when
//!   vectorization fails
//! - **Batch processing**, optionally on a background worker thread
//!
//! ## Example
//!
//! ```rust,no_run
//! use svgconvert::{convert, VectorizationConfig, Preset};
//! use std::path::Path;
//!
//! let config = VectorizationConfig::preset(Preset::Logo);
//! let result = convert(Path::new("input.png"), Path::new("output.svg"), &config)
//!     .expect("Conversion failed");
//! println!("{} paths, {} bytes", result.path_count, result.vector_size);
//! ```

pub mod batch;
pub mod bezier_fitter;
pub mod config;
pub mod edge_detector;
pub mod error;
pub mod image_processor;
pub mod job;
pub mod pipeline;
pub mod preprocessor;
pub mod progress;
pub mod quantizer;
pub mod region_extractor;
pub mod svg_generator;
pub mod vectorizer;
pub mod worker;

pub use batch::{BatchProcessor, BatchProgress, BatchReport, JobOutcome};
pub use config::{Algorithm, BatchLimits, PipelineLimits, Preset, Settings, SmoothingLevel, VectorizationConfig};
pub use error::{ConversionError, ErrorKind, Result};
pub use image_processor::{decode_image, load_image, Color, PixelBuffer, RasterFormat, SourceFile};
pub use job::{ConversionJob, ConversionStrategy, JobStatus, ProcessingResult};
pub use pipeline::ConversionPipeline;
pub use progress::{CancellationToken, NoProgress, ProcessingProgress, ProgressSink, Stage};
pub use quantizer::{map_to_palette, quantize, Palette};
pub use svg_generator::{generate_fallback_svg, generate_svg, SvgOptions, SvgOutput};
pub use vectorizer::{vectorize_edges, Point, VectorPath};
pub use worker::{Dispatcher, Worker};

use std::path::Path;

/// Reads an image file and returns it ready for the pipeline.
pub fn read_source(path: &Path) -> Result<SourceFile> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SourceFile::new(name, bytes))
}

/// Convert an image file to SVG with default limits.
///
/// # Example
///
/// ```rust,no_run
/// use svgconvert::{convert, VectorizationConfig};
/// use std::path::Path;
///
/// convert(Path::new("input.png"), Path::new("output.svg"), &VectorizationConfig::default())?;
/// # Ok::<(), svgconvert::ConversionError>(())
/// ```
pub fn convert(input_path: &Path, output_path: &Path, config: &VectorizationConfig) -> Result<ProcessingResult> {
    let file = read_source(input_path)?;
    let result = ConversionPipeline::default().run(&file, config, &NoProgress, &CancellationToken::new())?;
    std::fs::write(output_path, &result.svg_content)?;
    Ok(result)
}

/// Convert encoded image bytes directly to an SVG string.
///
/// `name` is only used for type validation and log messages, so it needs
/// a `.png`, `.jpg` or `.jpeg` extension.
pub fn convert_to_svg_string(name: &str, bytes: Vec<u8>, config: &VectorizationConfig) -> Result<String> {
    let file = SourceFile::new(name, bytes);
    ConversionPipeline::default()
        .run(&file, config, &NoProgress, &CancellationToken::new())
        .map(|r| r.svg_content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_convert_to_svg_string() {
        let img = image::RgbaImage::from_pixel(3, 3, image::Rgba([0, 255, 0, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        let svg = convert_to_svg_string("green.png", out.into_inner(), &VectorizationConfig::default()).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("#00ff00"));
    }

    #[test]
    fn test_convert_missing_file() {
        let err = convert(
            Path::new("definitely/not/here.png"),
            Path::new("unused.svg"),
            &VectorizationConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }
}
