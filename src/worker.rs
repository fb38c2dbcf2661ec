//! Whole-job delegation to a background thread.
//!
//! A [`Worker`] owns one thread that runs the same [`ConversionPipeline`]
//! and streams [`WorkerMessage`]s back over a channel. [`Dispatcher`] hides
//! the choice: when the worker is busy, gone, or dies mid-job, the job is
//! run again on the caller's thread. Progress seen by the caller never
//! moves backwards across such a rerun.

use crate::config::VectorizationConfig;
use crate::error::Result;
use crate::image_processor::SourceFile;
use crate::job::ProcessingResult;
use crate::pipeline::ConversionPipeline;
use crate::progress::{CancellationToken, ProcessingProgress, ProgressSink};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// What the worker thread sends back while running a job.
#[derive(Debug)]
pub enum WorkerMessage {
    Progress(ProcessingProgress),
    Done(Result<ProcessingResult>),
}

/// Why a job could not be completed on the worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerFailure {
    #[error("worker is already running a job")]
    Busy,
    #[error("worker thread is not running")]
    Gone,
    #[error("worker stopped before reporting a result")]
    Disconnected,
}

struct Request {
    file: SourceFile,
    config: VectorizationConfig,
    cancel: CancellationToken,
    reply: Sender<WorkerMessage>,
}

struct Forward<'a>(&'a Sender<WorkerMessage>);

impl ProgressSink for Forward<'_> {
    fn report(&self, progress: ProcessingProgress) {
        let _ = self.0.send(WorkerMessage::Progress(progress));
    }
}

pub struct Worker {
    requests: Option<Sender<Request>>,
    handle: Option<JoinHandle<()>>,
    busy: Arc<AtomicBool>,
}

impl Worker {
    pub fn spawn(pipeline: ConversionPipeline) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<Request>();
        let handle = thread::Builder::new()
            .name("svgconvert-worker".to_string())
            .spawn(move || serve(pipeline, rx))?;
        Ok(Self {
            requests: Some(tx),
            handle: Some(handle),
            busy: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Runs one job on the worker thread, forwarding its progress to
    /// `progress` on the calling thread.
    pub fn run(
        &self,
        file: &SourceFile,
        config: &VectorizationConfig,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> std::result::Result<Result<ProcessingResult>, WorkerFailure> {
        let requests = self.requests.as_ref().ok_or(WorkerFailure::Gone)?;
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WorkerFailure::Busy);
        }
        let outcome = self.exchange(requests, file, config, progress, cancel);
        self.busy.store(false, Ordering::SeqCst);
        outcome
    }

    fn exchange(
        &self,
        requests: &Sender<Request>,
        file: &SourceFile,
        config: &VectorizationConfig,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> std::result::Result<Result<ProcessingResult>, WorkerFailure> {
        let (reply, replies) = unbounded();
        let request = Request {
            file: file.clone(),
            config: config.clone(),
            cancel: cancel.clone(),
            reply,
        };
        requests.send(request).map_err(|_| WorkerFailure::Gone)?;

        for message in replies.iter() {
            match message {
                WorkerMessage::Progress(p) => progress.report(p),
                WorkerMessage::Done(outcome) => return Ok(outcome),
            }
        }
        Err(WorkerFailure::Disconnected)
    }

    /// Stops accepting jobs and waits for the thread to exit.
    pub fn shutdown(&mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(pipeline: ConversionPipeline, requests: Receiver<Request>) {
    log::debug!("worker started");
    for request in requests.iter() {
        let sink = Forward(&request.reply);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let result = pipeline.run(&request.file, &request.config, &sink, &request.cancel);
            crash_before_reply(&request.file);
            result
        }));
        match outcome {
            Ok(result) => {
                let _ = request.reply.send(WorkerMessage::Done(result));
            }
            // Dropping the reply sender tells the caller to rerun the job.
            Err(_) => log::error!("worker panicked while converting {}", request.file.name),
        }
    }
    log::debug!("worker stopped");
}

/// Files with this name make the worker panic after the pipeline has
/// reported all of its progress, so tests can exercise the rerun path.
#[cfg(test)]
const CRASHING_FILE_NAME: &str = "crash-worker.png";

#[cfg(test)]
fn crash_before_reply(file: &SourceFile) {
    if file.name == CRASHING_FILE_NAME {
        panic!("worker crashed on {}", file.name);
    }
}

#[cfg(not(test))]
fn crash_before_reply(_file: &SourceFile) {}

/// Drops events whose overall progress is below one already reported.
struct ForwardOnly<'a> {
    inner: &'a dyn ProgressSink,
    high_water: Cell<u8>,
}

impl ProgressSink for ForwardOnly<'_> {
    fn report(&self, progress: ProcessingProgress) {
        let overall = progress.overall();
        if overall < self.high_water.get() {
            return;
        }
        self.high_water.set(overall);
        self.inner.report(progress);
    }
}

/// Runs jobs on the worker when one is available, otherwise in-process.
pub struct Dispatcher {
    pipeline: ConversionPipeline,
    worker: Option<Worker>,
}

impl Dispatcher {
    pub fn in_process(pipeline: ConversionPipeline) -> Self {
        Self { pipeline, worker: None }
    }

    /// Starts a worker thread; if the thread cannot be spawned, jobs run
    /// in-process.
    pub fn with_worker(pipeline: ConversionPipeline) -> Self {
        let worker = match Worker::spawn(pipeline.clone()) {
            Ok(worker) => Some(worker),
            Err(e) => {
                log::warn!("could not start worker thread: {e}; converting in-process");
                None
            }
        };
        Self { pipeline, worker }
    }

    pub fn pipeline(&self) -> &ConversionPipeline {
        &self.pipeline
    }

    pub fn has_worker(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    pub fn run(
        &self,
        file: &SourceFile,
        config: &VectorizationConfig,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ProcessingResult> {
        let progress = ForwardOnly { inner: progress, high_water: Cell::new(0) };
        if let Some(worker) = &self.worker {
            match worker.run(file, config, &progress, cancel) {
                Ok(outcome) => return outcome,
                Err(failure) => log::warn!("{}: {failure}; converting on the calling thread", file.name),
            }
        }
        self.pipeline.run(file, config, &progress, cancel)
    }

    /// Stops the worker thread. Later jobs run in-process.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            worker.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ConversionStrategy;
    use crate::progress::{NoProgress, Stage};
    use std::io::Cursor;
    use std::sync::Mutex;

    fn red_png() -> SourceFile {
        let img = image::RgbaImage::from_pixel(6, 6, image::Rgba([255, 0, 0, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        SourceFile::new("red.png", out.into_inner())
    }

    #[test]
    fn test_worker_matches_in_process() {
        let file = red_png();
        let config = VectorizationConfig::default();
        let cancel = CancellationToken::new();

        let local = Dispatcher::in_process(ConversionPipeline::default())
            .run(&file, &config, &NoProgress, &cancel)
            .unwrap();
        let dispatcher = Dispatcher::with_worker(ConversionPipeline::default());
        assert!(dispatcher.has_worker());
        let remote = dispatcher.run(&file, &config, &NoProgress, &cancel).unwrap();

        assert_eq!(remote.svg_content, local.svg_content);
        assert_eq!(remote.strategy, ConversionStrategy::Vectorized);
    }

    #[test]
    fn test_worker_forwards_progress() {
        let stages = Mutex::new(Vec::new());
        let sink = |p: ProcessingProgress| stages.lock().unwrap().push((p.stage, p.progress));
        let worker = Worker::spawn(ConversionPipeline::default()).unwrap();
        let outcome = worker
            .run(&red_png(), &VectorizationConfig::default(), &sink, &CancellationToken::new())
            .unwrap();
        assert!(outcome.is_ok());
        assert!(!worker.is_busy());
        let stages = stages.into_inner().unwrap();
        assert_eq!(stages.first(), Some(&(Stage::Upload, 0)));
        assert_eq!(stages.last(), Some(&(Stage::Generate, 100)));
    }

    #[test]
    fn test_shutdown_worker_falls_back_in_process() {
        let mut worker = Worker::spawn(ConversionPipeline::default()).unwrap();
        worker.shutdown();
        assert!(!worker.is_running());
        let failure = worker
            .run(&red_png(), &VectorizationConfig::default(), &NoProgress, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(failure, WorkerFailure::Gone);

        let mut dispatcher = Dispatcher::with_worker(ConversionPipeline::default());
        dispatcher.shutdown();
        assert!(!dispatcher.has_worker());
        let result = dispatcher
            .run(&red_png(), &VectorizationConfig::default(), &NoProgress, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.strategy, ConversionStrategy::Vectorized);
    }

    fn crashing_file() -> SourceFile {
        SourceFile::new(CRASHING_FILE_NAME, red_png().bytes)
    }

    #[test]
    fn test_worker_panic_disconnects() {
        let worker = Worker::spawn(ConversionPipeline::default()).unwrap();
        let failure = worker
            .run(&crashing_file(), &VectorizationConfig::default(), &NoProgress, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(failure, WorkerFailure::Disconnected);
        assert!(!worker.is_busy());

        // The thread survives the panic and keeps serving.
        assert!(worker.is_running());
        let outcome = worker
            .run(&red_png(), &VectorizationConfig::default(), &NoProgress, &CancellationToken::new())
            .unwrap();
        assert!(outcome.is_ok());
    }

    #[test]
    fn test_worker_panic_reruns_in_process() {
        let overall = Mutex::new(Vec::new());
        let sink = |p: ProcessingProgress| overall.lock().unwrap().push(p.overall());
        let dispatcher = Dispatcher::with_worker(ConversionPipeline::default());
        let result = dispatcher
            .run(&crashing_file(), &VectorizationConfig::default(), &sink, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.strategy, ConversionStrategy::Vectorized);

        let overall = overall.into_inner().unwrap();
        assert_eq!(overall.first(), Some(&0));
        assert_eq!(overall.last(), Some(&100));
        assert!(overall.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {overall:?}");
    }

    #[test]
    fn test_cancellation_reaches_worker() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dispatcher = Dispatcher::with_worker(ConversionPipeline::default());
        let err = dispatcher
            .run(&red_png(), &VectorizationConfig::default(), &NoProgress, &cancel)
            .unwrap_err();
        assert_eq!(err, crate::error::ConversionError::Cancelled);
    }
}
