//! Stage orchestration for a single file.
//!
//! A run walks upload → preprocess → quantize → vectorize → generate on the
//! caller's thread, reporting a start and finish event per stage. Failures
//! go through [`RECOVERY_STEPS`] before anything reaches the caller.

use crate::config::{Algorithm, PipelineLimits, VectorizationConfig};
use crate::edge_detector::EdgeSettings;
use crate::error::{ConversionError, Result};
use crate::image_processor::{decode_image, probe_dimensions, RasterFormat, SourceFile};
use crate::job::{ConversionStrategy, ProcessingResult};
use crate::preprocessor::{preprocess, PreprocessOptions};
use crate::progress::{CancellationToken, Deadline, ProcessingProgress, ProgressSink, Stage};
use crate::quantizer::{count_distinct_colors, estimate_working_set, map_to_palette, quantize, QuantizeSettings};
use crate::svg_generator::{generate_fallback_svg, generate_svg, SvgOptions, SvgOutput};
use crate::vectorizer::vectorize_edges;
use std::time::Instant;

/// More distinct colors than this and `Algorithm::Auto` treats the image as
/// a photo.
const PHOTO_DISTINCT_COLORS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryStep {
    /// Wrap the original raster in a minimal SVG.
    EmbedRaster,
    /// Rerun the stages once with [`VectorizationConfig::reduced`].
    ReducedSettings,
}

/// Tried in order; the first step that produces a result wins.
const RECOVERY_STEPS: [RecoveryStep; 3] = [
    RecoveryStep::EmbedRaster,
    RecoveryStep::ReducedSettings,
    RecoveryStep::EmbedRaster,
];

struct Reporter<'a> {
    sink: &'a dyn ProgressSink,
    started: Instant,
}

impl Reporter<'_> {
    fn emit(&self, stage: Stage, progress: u8, message: &str) {
        let mut event = ProcessingProgress::new(stage, progress, message);
        let overall = event.overall();
        if overall > 0 {
            let elapsed = self.started.elapsed().as_secs_f64() * 1000.0;
            event.estimated_time_remaining_ms = Some(elapsed * f64::from(100 - overall) / f64::from(overall));
        }
        self.sink.report(event);
    }

    fn stage<T>(&self, cancel: &CancellationToken, stage: Stage, work: impl FnOnce() -> Result<T>) -> Result<T> {
        cancel.check()?;
        self.emit(stage, 0, describe(stage));
        let t = Instant::now();
        let value = work()?;
        log::debug!("{stage} finished in {:?}", t.elapsed());
        self.emit(stage, 100, describe(stage));
        Ok(value)
    }
}

fn describe(stage: Stage) -> &'static str {
    match stage {
        Stage::Upload => "Validating file",
        Stage::Preprocess => "Decoding image",
        Stage::Quantize => "Reducing colors",
        Stage::Vectorize => "Tracing shapes",
        Stage::Generate => "Writing SVG",
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversionPipeline {
    limits: PipelineLimits,
}

impl ConversionPipeline {
    pub fn new(limits: PipelineLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &PipelineLimits {
        &self.limits
    }

    /// Converts one file, recovering from stage failures where possible.
    ///
    /// Validation errors and cancellation are returned as they are. Any
    /// other failure is retried through the recovery steps; when all of
    /// them fail the original error is returned.
    pub fn run(
        &self,
        file: &SourceFile,
        config: &VectorizationConfig,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ProcessingResult> {
        config.validate()?;
        let reporter = Reporter {
            sink: progress,
            started: Instant::now(),
        };
        log::info!("converting {} ({} bytes)", file.name, file.size());

        reporter.stage(cancel, Stage::Upload, || file.validate(self.limits.max_file_size))?;

        let result = match self.convert(file, config, &reporter, cancel, ConversionStrategy::Vectorized) {
            Ok(result) => Ok(result),
            Err(e) if !e.is_recoverable() || e.is_fallback() => Err(e),
            Err(e) => self.recover(file, config, &reporter, cancel, e),
        };

        match &result {
            Ok(r) => log::info!(
                "{}: {:?}, {} paths, {} -> {} bytes in {}ms",
                file.name,
                r.strategy,
                r.path_count,
                r.original_size,
                r.vector_size,
                r.processing_time_ms
            ),
            Err(e) => log::info!("{}: failed: {e}", file.name),
        }
        result
    }

    fn recover(
        &self,
        file: &SourceFile,
        config: &VectorizationConfig,
        reporter: &Reporter<'_>,
        cancel: &CancellationToken,
        original: ConversionError,
    ) -> Result<ProcessingResult> {
        log::warn!("{}: {original}; attempting recovery", file.name);
        let mut embed_tried = false;
        let mut reduced_tried = false;

        for step in RECOVERY_STEPS {
            let attempt = match step {
                // The second embed only follows a failed reduced retry.
                RecoveryStep::EmbedRaster if embed_tried && !reduced_tried => continue,
                RecoveryStep::EmbedRaster => {
                    embed_tried = true;
                    cancel.check()?;
                    self.embed_raster(file, reporter)
                }
                RecoveryStep::ReducedSettings if !original.is_resource_related() => continue,
                RecoveryStep::ReducedSettings => {
                    reduced_tried = true;
                    cancel.check()?;
                    let reduced = config.reduced();
                    log::warn!(
                        "{}: retrying with {} colors, simplification {}",
                        file.name,
                        reduced.color_count,
                        reduced.path_simplification
                    );
                    self.convert(file, &reduced, reporter, cancel, ConversionStrategy::ReducedSettings)
                }
            };
            match attempt {
                Ok(result) => return Ok(result),
                Err(ConversionError::Cancelled) => return Err(ConversionError::Cancelled),
                Err(e) => log::warn!("{}: recovery step {step:?} failed: {e}", file.name),
            }
        }
        Err(original)
    }

    fn embed_raster(&self, file: &SourceFile, reporter: &Reporter<'_>) -> Result<ProcessingResult> {
        let embed = || {
            if file.size() > self.limits.max_embed_size {
                return Err(ConversionError::Resource(format!(
                    "{} bytes is too large to embed (limit {})",
                    file.size(),
                    self.limits.max_embed_size
                )));
            }
            let format = RasterFormat::detect(&file.bytes)
                .ok_or_else(|| ConversionError::Decode("unrecognised image format".to_string()))?;
            let (width, height) = probe_dimensions(&file.bytes)
                .ok_or_else(|| ConversionError::Decode("cannot read image dimensions".to_string()))?;
            generate_fallback_svg(&file.bytes, format, width, height)
        };
        let svg = embed().map_err(ConversionError::into_fallback)?;
        reporter.emit(Stage::Generate, 100, "Embedded original image");
        Ok(finish(file, svg, reporter, ConversionStrategy::RasterFallback))
    }

    fn quantize_settings(&self) -> QuantizeSettings {
        QuantizeSettings {
            color_cap: self.limits.color_cap,
            max_iterations: self.limits.kmeans_max_iterations,
            sample_limit: self.limits.kmeans_sample_limit,
            ..QuantizeSettings::default()
        }
    }

    fn convert(
        &self,
        file: &SourceFile,
        config: &VectorizationConfig,
        reporter: &Reporter<'_>,
        cancel: &CancellationToken,
        strategy: ConversionStrategy,
    ) -> Result<ProcessingResult> {
        let timeouts = &self.limits.timeouts;

        let (image, photo_like) = reporter.stage(cancel, Stage::Preprocess, || {
            let decoded = decode_image(
                &file.bytes,
                self.limits.max_dimension,
                &Deadline::new(Stage::Preprocess, timeouts.decode),
            )?;
            let photo_like = match config.algorithm {
                Algorithm::Photo => true,
                Algorithm::Auto => count_distinct_colors(&decoded, PHOTO_DISTINCT_COLORS) > PHOTO_DISTINCT_COLORS,
                Algorithm::Shapes | Algorithm::Lineart => false,
            };
            let options = PreprocessOptions::for_config(config, photo_like);
            let image = preprocess(&decoded, &options, &Deadline::new(Stage::Preprocess, timeouts.preprocess))?;
            Ok((image, photo_like))
        })?;

        let (palette, mapped) = reporter.stage(cancel, Stage::Quantize, || {
            let settings = self.quantize_settings();
            let needed = estimate_working_set(image.pixel_count(), config.color_count, &settings);
            if needed > self.limits.quantize_memory_budget {
                return Err(ConversionError::Resource(format!(
                    "quantizing {}x{} needs about {needed} bytes of memory, over the {} byte budget",
                    image.width,
                    image.height,
                    self.limits.quantize_memory_budget
                )));
            }
            let deadline = Deadline::new(Stage::Quantize, timeouts.quantize);
            let palette = quantize(&image, config.color_count, &settings, &deadline)?;
            deadline.check()?;
            let mapped = map_to_palette(&image, &palette)?;
            Ok((palette, mapped))
        })?;
        drop(image);

        let paths = reporter.stage(cancel, Stage::Vectorize, || {
            let deadline = Deadline::new(Stage::Vectorize, timeouts.vectorize);
            let edges = EdgeSettings::for_config(config, photo_like).detect(&mapped, &deadline)?;
            vectorize_edges(&edges, &mapped, &palette, config, self.limits.min_region_area, &deadline)
        })?;

        let svg = reporter.stage(cancel, Stage::Generate, || {
            let deadline = Deadline::new(Stage::Generate, timeouts.generate);
            let svg = generate_svg(&paths, mapped.width, mapped.height, &palette, &SvgOptions::for_config(config))?;
            deadline.check()?;
            Ok(svg)
        })?;

        Ok(finish(file, svg, reporter, strategy))
    }
}

fn finish(file: &SourceFile, svg: SvgOutput, reporter: &Reporter<'_>, strategy: ConversionStrategy) -> ProcessingResult {
    ProcessingResult {
        original_size: file.size(),
        vector_size: svg.vector_size,
        processing_time_ms: reporter.started.elapsed().as_millis() as u64,
        color_count: svg.color_count,
        path_count: svg.path_count,
        strategy,
        svg_content: svg.content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::progress::NoProgress;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::time::Duration;

    fn png(width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_fn(width, height, |x, y| image::Rgba(f(x, y)));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    fn two_tone(width: u32, height: u32) -> SourceFile {
        let bytes = png(width, height, |x, _| {
            if x < width / 2 { [200, 20, 20, 255] } else { [20, 20, 200, 255] }
        });
        SourceFile::new("two_tone.png", bytes)
    }

    fn run(pipeline: &ConversionPipeline, file: &SourceFile) -> Result<ProcessingResult> {
        pipeline.run(file, &VectorizationConfig::default(), &NoProgress, &CancellationToken::new())
    }

    #[test]
    fn test_vectorizes_simple_image() {
        let result = run(&ConversionPipeline::default(), &two_tone(16, 16)).unwrap();
        assert_eq!(result.strategy, ConversionStrategy::Vectorized);
        assert_eq!(result.path_count, 2);
        assert_eq!(result.color_count, 2);
        assert!(result.svg_content.contains("viewBox=\"0 0 16 16\""));
        assert_eq!(result.vector_size, result.svg_content.len() as u64);
    }

    #[test]
    fn test_progress_covers_every_stage() {
        let events = RefCell::new(Vec::new());
        let sink = |p: ProcessingProgress| events.borrow_mut().push(p);
        ConversionPipeline::default()
            .run(&two_tone(8, 8), &VectorizationConfig::default(), &sink, &CancellationToken::new())
            .unwrap();

        let events = events.into_inner();
        let seen: Vec<(Stage, u8)> = events.iter().map(|e| (e.stage, e.progress)).collect();
        let expected: Vec<(Stage, u8)> = Stage::ALL.iter().flat_map(|&s| [(s, 0), (s, 100)]).collect();
        assert_eq!(seen, expected);
        assert!(events.windows(2).all(|w| w[0].overall() <= w[1].overall()));
        assert_eq!(events.last().unwrap().overall(), 100);
        assert_eq!(events.last().unwrap().estimated_time_remaining_ms, Some(0.0));
        assert!(events[0].estimated_time_remaining_ms.is_none());
    }

    #[test]
    fn test_validation_error_is_not_recovered() {
        let file = SourceFile::new("notes.txt", png(2, 2, |_, _| [0, 0, 0, 255]));
        let err = run(&ConversionPipeline::default(), &file).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let bad_config = VectorizationConfig { color_count: 0, ..Default::default() };
        let err = ConversionPipeline::default()
            .run(&two_tone(4, 4), &bad_config, &NoProgress, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_timeout_falls_back_to_raster() {
        let mut limits = PipelineLimits::default();
        limits.timeouts.quantize = Duration::ZERO;
        let result = run(&ConversionPipeline::new(limits), &two_tone(8, 8)).unwrap();
        assert_eq!(result.strategy, ConversionStrategy::RasterFallback);
        assert!(result.svg_content.contains("data:image/png;base64,"));
        assert_eq!(result.path_count, 0);
    }

    #[test]
    fn test_truncated_png_falls_back_using_header() {
        let mut bytes = png(48, 36, |x, y| [(x * 37 % 256) as u8, (y * 91 % 256) as u8, ((x ^ y) * 13 % 256) as u8, 255]);
        // Cut inside the pixel data: the header stays readable.
        bytes.truncate(bytes.len() / 2);
        let result = run(&ConversionPipeline::default(), &SourceFile::new("cut.png", bytes)).unwrap();
        assert_eq!(result.strategy, ConversionStrategy::RasterFallback);
        assert!(result.svg_content.contains("viewBox=\"0 0 48 36\""));
    }

    #[test]
    fn test_memory_budget_retries_with_reduced_settings() {
        // 64x64 at k=16 needs 393216 bytes; at k=4 it needs 196608.
        let limits = PipelineLimits {
            quantize_memory_budget: 300_000,
            max_embed_size: 0,
            ..PipelineLimits::default()
        };
        let result = run(&ConversionPipeline::new(limits), &two_tone(64, 64)).unwrap();
        assert_eq!(result.strategy, ConversionStrategy::ReducedSettings);
        assert_eq!(result.path_count, 2);
    }

    #[test]
    fn test_exhausted_recovery_surfaces_original_error() {
        let limits = PipelineLimits {
            quantize_memory_budget: 1,
            max_embed_size: 0,
            ..PipelineLimits::default()
        };
        let err = run(&ConversionPipeline::new(limits), &two_tone(8, 8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(!err.is_fallback());
        assert!(err.to_string().contains("budget"));
    }

    #[test]
    fn test_cancel_after_preprocess_stops_run() {
        let cancel = CancellationToken::new();
        let events = RefCell::new(Vec::new());
        let sink = |p: ProcessingProgress| {
            if p.stage == Stage::Preprocess && p.progress == 100 {
                cancel.cancel();
            }
            events.borrow_mut().push(p.stage);
        };
        let err = ConversionPipeline::default()
            .run(&two_tone(8, 8), &VectorizationConfig::default(), &sink, &cancel)
            .unwrap_err();
        assert_eq!(err, ConversionError::Cancelled);
        assert!(events.borrow().iter().all(|s| *s <= Stage::Preprocess));
    }

    #[test]
    fn test_photo_algorithm_still_vectorizes() {
        let file = SourceFile::new(
            "gradient.png",
            png(24, 24, |x, y| [(x * 10) as u8, (y * 10) as u8, 128, 255]),
        );
        let config = VectorizationConfig { algorithm: Algorithm::Photo, color_count: 4, ..Default::default() };
        let result = ConversionPipeline::default()
            .run(&file, &config, &NoProgress, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.strategy, ConversionStrategy::Vectorized);
        assert!(result.color_count <= 4);
        assert!(result.path_count >= 1);
    }
}
