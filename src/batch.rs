//! Multi-file conversion.
//!
//! Files are admitted all at once or not at all, then converted strictly one
//! after another. A failed file never stops the batch; a cancelled batch
//! marks every remaining job cancelled.

use crate::config::{BatchLimits, VectorizationConfig};
use crate::error::{ConversionError, Result};
use crate::image_processor::SourceFile;
use crate::job::{ConversionJob, JobStatus, ProcessingResult};
use crate::progress::{CancellationToken, ProcessingProgress, Stage};
use crate::worker::Dispatcher;
use serde::Serialize;
use std::cell::Cell;

/// Progress of one file within a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub job_id: u64,
    pub file_name: String,
    /// Zero-based position among the jobs being processed.
    pub index: usize,
    pub total: usize,
    pub stage: Stage,
    /// Overall progress of the current file, 0..=100.
    pub file_progress: u8,
    /// Progress across the whole batch, 0..=100.
    pub overall: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: u64,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl JobOutcome {
    fn from_job(job: &ConversionJob) -> Self {
        Self {
            job_id: job.id,
            file_name: job.file.name.clone(),
            result: job.result().cloned(),
            error: job.error().map(str::to_string),
            error_detail: job.error_detail().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub completed: Vec<JobOutcome>,
    pub failed: Vec<JobOutcome>,
    pub cancelled: Vec<JobOutcome>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len() + self.cancelled.len()
    }

    /// One line naming every failed file, or `None` when nothing failed.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        let names: Vec<String> = self
            .failed
            .iter()
            .map(|o| format!("{} ({})", o.file_name, o.error.as_deref().unwrap_or("unknown error")))
            .collect();
        Some(format!(
            "{} of {} files failed: {}",
            self.failed.len(),
            self.total(),
            names.join(", ")
        ))
    }
}

pub struct BatchProcessor {
    dispatcher: Dispatcher,
    limits: BatchLimits,
    jobs: Vec<ConversionJob>,
    cancel: CancellationToken,
}

impl BatchProcessor {
    pub fn new(dispatcher: Dispatcher, limits: BatchLimits) -> Self {
        Self {
            dispatcher,
            limits,
            jobs: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn jobs(&self) -> &[ConversionJob] {
        &self.jobs
    }

    pub fn job(&self, id: u64) -> Option<&ConversionJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Token that stops [`process`](Self::process) before its next job.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Queues every file or none of them. Returns the new job ids in input
    /// order.
    pub fn add_files(&mut self, files: Vec<SourceFile>, config: &VectorizationConfig) -> Result<Vec<u64>> {
        if self.jobs.len() + files.len() > self.limits.max_files {
            return Err(ConversionError::Validation(format!(
                "a batch holds at most {} files, got {}",
                self.limits.max_files,
                self.jobs.len() + files.len()
            )));
        }
        config.validate()?;
        for file in &files {
            file.validate(self.limits.max_file_size)?;
        }

        let mut admitted = Vec::with_capacity(files.len());
        for file in files {
            admitted.push(ConversionJob::new(file, config.clone())?);
        }
        let ids = admitted.iter().map(|j| j.id).collect();
        log::info!("admitted {} files ({} queued)", admitted.len(), self.jobs.len() + admitted.len());
        self.jobs.extend(admitted);
        Ok(ids)
    }

    /// Converts every pending job in order and reports how each ended.
    ///
    /// The cancellation flag is cleared afterwards so the processor can be
    /// reused.
    pub fn process(&mut self, on_progress: impl Fn(BatchProgress)) -> BatchReport {
        let pending: Vec<usize> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status() == JobStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        let total = pending.len();
        let mut report = BatchReport::default();

        for (index, &slot) in pending.iter().enumerate() {
            let job = &mut self.jobs[slot];
            if self.cancel.is_cancelled() {
                job.cancel();
                report.cancelled.push(JobOutcome::from_job(job));
                continue;
            }

            job.start();
            let latest = Cell::new(0u8);
            let (job_id, file_name) = (job.id, job.file.name.clone());
            let sink = |p: ProcessingProgress| {
                let file_progress = p.overall();
                latest.set(latest.get().max(file_progress));
                on_progress(BatchProgress {
                    job_id,
                    file_name: file_name.clone(),
                    index,
                    total,
                    stage: p.stage,
                    file_progress,
                    overall: batch_overall(index, total, file_progress),
                });
            };
            let outcome = self.dispatcher.run(&job.file, &job.config, &sink, &self.cancel);
            job.set_progress(latest.get());
            job.finish(outcome);

            let entry = JobOutcome::from_job(job);
            match job.status() {
                JobStatus::Completed => report.completed.push(entry),
                JobStatus::Cancelled => report.cancelled.push(entry),
                _ => {
                    log::warn!("{}: {}", entry.file_name, entry.error_detail.as_deref().unwrap_or("failed"));
                    report.failed.push(entry)
                }
            }
        }

        self.cancel.reset();
        log::info!(
            "batch finished: {} completed, {} failed, {} cancelled",
            report.completed.len(),
            report.failed.len(),
            report.cancelled.len()
        );
        report
    }

    /// Requeues failed jobs under new ids. Returns how many were requeued.
    pub fn retry_failed(&mut self) -> usize {
        let mut count = 0;
        for job in &mut self.jobs {
            if job.status() == JobStatus::Failed {
                *job = job.retry();
                count += 1;
            }
        }
        count
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }
}

fn batch_overall(index: usize, total: usize, file_progress: u8) -> u8 {
    if total == 0 {
        return 100;
    }
    ((index * 100 + file_progress as usize) / total).min(100) as u8
}
