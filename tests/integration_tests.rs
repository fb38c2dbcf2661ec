// Integration tests for svgconvert
use std::cell::RefCell;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use svgconvert::{
    convert, BatchLimits, BatchProcessor, CancellationToken, ConversionError, ConversionJob, ConversionPipeline,
    ConversionStrategy, Dispatcher, JobStatus, NoProgress, PipelineLimits, ProcessingProgress, SmoothingLevel,
    SourceFile, Stage, VectorizationConfig,
};

// Create a simple test image programmatically
fn create_test_png(width: u32, height: u32, pattern: &str) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        let (r, g, b) = match pattern {
            "gradient" => {
                let r = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                (r, g, 128)
            }
            "checkerboard" => {
                let size = 10;
                let is_white = ((x / size) + (y / size)) % 2 == 0;
                if is_white { (255, 255, 255) } else { (0, 0, 0) }
            }
            "circle" => {
                let (cx, cy) = (width as i32 / 2, height as i32 / 2);
                let radius = width.min(height) as i32 / 4;
                let (dx, dy) = (x as i32 - cx, y as i32 - cy);
                if dx * dx + dy * dy < radius * radius { (255, 0, 0) } else { (255, 255, 255) }
            }
            "red" => (255, 0, 0),
            _ => (128, 128, 128),
        };
        image::Rgba([r, g, b, 255])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
    out.into_inner()
}

fn create_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 { image::Rgb([0, 90, 200]) } else { image::Rgb([250, 250, 250]) }
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageOutputFormat::Jpeg(95))
        .unwrap();
    out.into_inner()
}

fn run(pipeline: &ConversionPipeline, file: &SourceFile, config: &VectorizationConfig) -> svgconvert::Result<svgconvert::ProcessingResult> {
    pipeline.run(file, config, &NoProgress, &CancellationToken::new())
}

#[test]
fn test_single_red_pixel_round_trip() {
    let file = SourceFile::new("red.png", create_test_png(1, 1, "red"));
    let config = VectorizationConfig { color_count: 2, ..Default::default() };
    let mut job = ConversionJob::new(file.clone(), config.clone()).unwrap();
    job.start();
    job.finish(run(&ConversionPipeline::default(), &file, &config));

    assert_eq!(job.status(), JobStatus::Completed);
    let result = job.result().unwrap();
    assert!(result.vector_size > 0);
    assert_eq!(result.strategy, ConversionStrategy::Vectorized);
    assert!(result.svg_content.contains("viewBox=\"0 0 1 1\""));
    assert!(result.svg_content.contains("#ff0000"));
}

#[test]
fn test_full_pipeline_circle() {
    let file = SourceFile::new("circle.png", create_test_png(60, 60, "circle"));
    for level in [SmoothingLevel::Low, SmoothingLevel::Medium, SmoothingLevel::High] {
        let config = VectorizationConfig { smoothing_level: level, ..Default::default() };
        let result = run(&ConversionPipeline::default(), &file, &config).unwrap();
        assert_eq!(result.strategy, ConversionStrategy::Vectorized);
        assert_eq!(result.color_count, 2);
        assert_eq!(result.path_count, 2);
        // The background has the circle as a hole.
        assert!(result.svg_content.contains("evenodd"));
    }
}

#[test]
fn test_full_pipeline_checkerboard() {
    let file = SourceFile::new("checker.png", create_test_png(40, 40, "checkerboard"));
    let result = run(&ConversionPipeline::default(), &file, &VectorizationConfig::default()).unwrap();
    assert_eq!(result.color_count, 2);
    assert_eq!(result.path_count, 16);
}

#[test]
fn test_full_pipeline_gradient_respects_color_count() {
    let file = SourceFile::new("gradient.png", create_test_png(50, 50, "gradient"));
    for colors in [2u16, 4, 8] {
        let config = VectorizationConfig { color_count: colors, ..Default::default() };
        let result = run(&ConversionPipeline::default(), &file, &config).unwrap();
        assert!(result.color_count <= colors as usize);
        assert!(result.path_count >= 1);
    }
}

#[test]
fn test_jpeg_input() {
    let file = SourceFile::new("photo.jpg", create_test_jpeg(32, 16));
    let config = VectorizationConfig { color_count: 2, ..Default::default() };
    let result = run(&ConversionPipeline::default(), &file, &config).unwrap();
    assert_eq!(result.strategy, ConversionStrategy::Vectorized);
    assert!(result.svg_content.contains("viewBox=\"0 0 32 16\""));
}

#[test]
fn test_zero_timeouts_fall_back_to_raster() {
    let mut limits = PipelineLimits::default();
    limits.timeouts.decode = Duration::ZERO;
    limits.timeouts.preprocess = Duration::ZERO;
    limits.timeouts.quantize = Duration::ZERO;
    limits.timeouts.vectorize = Duration::ZERO;
    limits.timeouts.generate = Duration::ZERO;
    let file = SourceFile::new("circle.png", create_test_png(20, 20, "circle"));
    let result = run(&ConversionPipeline::new(limits), &file, &VectorizationConfig::default()).unwrap();
    assert_eq!(result.strategy, ConversionStrategy::RasterFallback);
    assert!(result.svg_content.contains("data:image/png;base64,"));
    assert!(result.svg_content.contains("viewBox=\"0 0 20 20\""));
}

#[test]
fn test_tiny_memory_budget_falls_back() {
    let limits = PipelineLimits { quantize_memory_budget: 16, ..PipelineLimits::default() };
    let file = SourceFile::new("gradient.png", create_test_png(30, 30, "gradient"));
    let result = run(&ConversionPipeline::new(limits), &file, &VectorizationConfig::default()).unwrap();
    assert_eq!(result.strategy, ConversionStrategy::RasterFallback);
}

#[test]
fn test_oversized_batch_is_rejected_whole() {
    let mut batch = BatchProcessor::new(
        Dispatcher::in_process(ConversionPipeline::default()),
        BatchLimits::default(),
    );
    let files: Vec<SourceFile> = (0..21)
        .map(|i| SourceFile::new(format!("img{i}.png"), create_test_png(2, 2, "red")))
        .collect();
    let err = batch.add_files(files, &VectorizationConfig::default()).unwrap_err();
    assert!(matches!(err, ConversionError::Validation(_)));
    assert!(err.to_string().contains("20"));
    assert!(batch.jobs().is_empty());
}

#[test]
fn test_cancel_between_preprocess_and_quantize() {
    let file = SourceFile::new("circle.png", create_test_png(20, 20, "circle"));
    let config = VectorizationConfig::default();
    let cancel = CancellationToken::new();
    let events = RefCell::new(Vec::new());
    let sink = |p: ProcessingProgress| {
        let done_preprocessing = p.stage == Stage::Preprocess && p.progress == 100;
        events.borrow_mut().push(p);
        if done_preprocessing {
            cancel.cancel();
        }
    };

    let mut job = ConversionJob::new(file.clone(), config.clone()).unwrap();
    job.start();
    job.finish(ConversionPipeline::default().run(&file, &config, &sink, &cancel));

    assert_eq!(job.status(), JobStatus::Cancelled);
    assert!(job.result().is_none());
    let events = events.into_inner();
    assert_eq!(events.last().unwrap().stage, Stage::Preprocess);
    assert!(events.iter().all(|e| e.stage <= Stage::Preprocess));
}

#[test]
fn test_worker_dispatch_and_fallback() {
    let file = SourceFile::new("circle.png", create_test_png(24, 24, "circle"));
    let config = VectorizationConfig::default();
    let mut dispatcher = Dispatcher::with_worker(ConversionPipeline::default());
    let on_worker = dispatcher.run(&file, &config, &NoProgress, &CancellationToken::new()).unwrap();

    dispatcher.shutdown();
    let fallback = dispatcher.run(&file, &config, &NoProgress, &CancellationToken::new()).unwrap();
    assert_eq!(on_worker.svg_content, fallback.svg_content);
}

#[test]
fn test_batch_on_worker() {
    let mut batch = BatchProcessor::new(
        Dispatcher::with_worker(ConversionPipeline::default()),
        BatchLimits::default(),
    );
    let files = vec![
        SourceFile::new("a.png", create_test_png(10, 10, "circle")),
        SourceFile::new("b.jpg", create_test_jpeg(10, 10)),
    ];
    batch.add_files(files, &VectorizationConfig::default()).unwrap();
    let report = batch.process(|_| {});
    assert_eq!(report.completed.len(), 2);
    assert!(report.failure_summary().is_none());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["completed"][0]["fileName"], "a.png");
    assert!(json["completed"][1]["result"]["vectorSize"].as_u64().unwrap() > 0);
}

#[test]
fn test_convert_writes_file() {
    let dir = std::env::temp_dir().join(format!("svgconvert-test-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let input: PathBuf = dir.join("circle.png");
    let output: PathBuf = dir.join("circle.svg");
    fs::write(&input, create_test_png(30, 30, "circle")).unwrap();

    let result = convert(&input, &output, &VectorizationConfig::default()).unwrap();
    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(written, result.svg_content);
    assert!(written.starts_with("<svg"));

    fs::remove_dir_all(&dir).ok();
}
