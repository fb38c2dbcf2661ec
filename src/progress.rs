//! Progress events, cooperative cancellation and stage deadlines.
//!
//! The pipeline never talks to a renderer directly: it pushes
//! [`ProcessingProgress`] values into a [`ProgressSink`], which can be a
//! closure, a channel sender, or [`NoProgress`].

use crate::error::{ConversionError, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Preprocess,
    Quantize,
    Vectorize,
    Generate,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Upload,
        Stage::Preprocess,
        Stage::Quantize,
        Stage::Vectorize,
        Stage::Generate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Preprocess => "preprocess",
            Stage::Quantize => "quantize",
            Stage::Vectorize => "vectorize",
            Stage::Generate => "generate",
        }
    }

    /// Share of total job time a stage typically takes, in percent.
    pub fn weight(self) -> u8 {
        match self {
            Stage::Upload => 5,
            Stage::Preprocess => 15,
            Stage::Quantize => 30,
            Stage::Vectorize => 40,
            Stage::Generate => 10,
        }
    }

    /// Overall job progress once this stage has reached `intra` percent.
    pub fn overall_progress(self, intra: u8) -> u8 {
        let before: u32 = Stage::ALL
            .iter()
            .take_while(|s| **s != self)
            .map(|s| s.weight() as u32)
            .sum();
        let within = self.weight() as u32 * intra.min(100) as u32 / 100;
        (before + within).min(100) as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingProgress {
    pub stage: Stage,
    /// Intra-stage progress, 0..=100.
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_ms: Option<f64>,
}

impl ProcessingProgress {
    pub fn new(stage: Stage, progress: u8, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress: progress.min(100),
            message: message.into(),
            estimated_time_remaining_ms: None,
        }
    }

    pub fn overall(&self) -> u8 {
        self.stage.overall_progress(self.progress)
    }
}

pub trait ProgressSink {
    fn report(&self, progress: ProcessingProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(ProcessingProgress),
{
    fn report(&self, progress: ProcessingProgress) {
        self(progress)
    }
}

impl ProgressSink for crossbeam_channel::Sender<ProcessingProgress> {
    fn report(&self, progress: ProcessingProgress) {
        // A dropped receiver only means nobody is watching.
        let _ = self.send(progress);
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: ProcessingProgress) {}
}

/// Shared flag checked between stages and between batch items.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clears the flag so a processor can be reused after a cancelled run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ConversionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Time budget for one stage, polled from inside the algorithms.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    stage: Stage,
    started: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn new(stage: Stage, limit: Duration) -> Self {
        Self {
            stage,
            started: Instant::now(),
            limit,
        }
    }

    /// A deadline that never expires in practice; for direct algorithm calls.
    pub fn unbounded(stage: Stage) -> Self {
        Self::new(stage, Duration::from_secs(60 * 60 * 24 * 365))
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self) -> Result<()> {
        if self.started.elapsed() >= self.limit {
            Err(ConversionError::Timeout {
                stage: self.stage,
                limit: self.limit,
            })
        } else {
            Ok(())
        }
    }
}
