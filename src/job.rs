//! Conversion job state and the result it produces.
//!
//! A [`ConversionJob`] moves from pending through processing to exactly one
//! terminal state. Failures keep a user-facing message next to the
//! underlying error text.

use crate::config::VectorizationConfig;
use crate::error::{ConversionError, ErrorKind, Result};
use crate::image_processor::SourceFile;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// pending -> processing -> terminal; a pending job may also be
    /// cancelled before it starts.
    fn can_become(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing | JobStatus::Cancelled) => true,
            (JobStatus::Processing, n) => n.is_terminal(),
            _ => false,
        }
    }
}

/// How the SVG in a [`ProcessingResult`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStrategy {
    Vectorized,
    /// Vectorized after retrying with fewer colors and coarser paths.
    ReducedSettings,
    /// The original raster embedded as a data URI.
    RasterFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    #[serde(skip_serializing)]
    pub svg_content: String,
    pub original_size: u64,
    pub vector_size: u64,
    pub processing_time_ms: u64,
    pub color_count: usize,
    pub path_count: usize,
    pub strategy: ConversionStrategy,
}

impl ProcessingResult {
    /// Output size relative to the input, 1.0 meaning equal.
    pub fn size_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        self.vector_size as f64 / self.original_size as f64
    }
}

/// One file's trip through the pipeline.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: u64,
    pub file: SourceFile,
    pub config: VectorizationConfig,
    status: JobStatus,
    progress: u8,
    result: Option<ProcessingResult>,
    error: Option<String>,
    detail: Option<String>,
    error_kind: Option<ErrorKind>,
}

impl ConversionJob {
    /// Validates `config` up front; it stays fixed for the job's lifetime.
    pub fn new(file: SourceFile, config: VectorizationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            file,
            config,
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            detail: None,
            error_kind: None,
        })
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn result(&self) -> Option<&ProcessingResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The underlying error text, for logs and bug reports.
    pub fn error_detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.can_become(next) {
            log::debug!("job {}: {:?} -> {:?}", self.id, self.status, next);
            self.status = next;
            true
        } else {
            log::warn!("job {}: ignoring transition {:?} -> {:?}", self.id, self.status, next);
            false
        }
    }

    pub fn start(&mut self) -> bool {
        self.transition(JobStatus::Processing)
    }

    /// Progress never moves backwards and only changes while processing.
    pub fn set_progress(&mut self, progress: u8) {
        if self.status == JobStatus::Processing {
            self.progress = self.progress.max(progress.min(100));
        }
    }

    pub fn complete(&mut self, result: ProcessingResult) -> bool {
        if !self.transition(JobStatus::Completed) {
            return false;
        }
        self.progress = 100;
        self.result = Some(result);
        true
    }

    pub fn fail(&mut self, error: &ConversionError) -> bool {
        let next = if matches!(error, ConversionError::Cancelled) {
            JobStatus::Cancelled
        } else {
            JobStatus::Failed
        };
        if !self.transition(next) {
            return false;
        }
        self.error = Some(error.user_message());
        self.detail = Some(error.to_string());
        self.error_kind = Some(error.kind());
        true
    }

    pub fn cancel(&mut self) -> bool {
        if !self.transition(JobStatus::Cancelled) {
            return false;
        }
        self.error = Some(ConversionError::Cancelled.user_message());
        self.detail = Some(ConversionError::Cancelled.to_string());
        self.error_kind = Some(ErrorKind::Cancelled);
        true
    }

    /// Applies a pipeline outcome.
    pub fn finish(&mut self, outcome: Result<ProcessingResult>) -> bool {
        match outcome {
            Ok(result) => self.complete(result),
            Err(e) => self.fail(&e),
        }
    }

    /// Fresh pending copy for a manual retry; gets a new id.
    pub fn retry(&self) -> Self {
        Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            file: self.file.clone(),
            config: self.config.clone(),
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            detail: None,
            error_kind: None,
        }
    }
}
