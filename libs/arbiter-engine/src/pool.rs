// Worker pool: at most `pool_size` submissions are judged concurrently
use crate::coordinator::{cancelled_report, Judge};
use crate::error::JudgeError;
use arbiter_common::types::{EvaluationReport, LanguageTag, Submission};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Shared front door to a [`Judge`].
///
/// Each evaluation runs on its own task, so a panic inside one submission is
/// contained and turned into a `SystemError` report for that submission only.
#[derive(Clone)]
pub struct JudgePool {
    judge: Arc<Judge>,
    workers: Arc<Semaphore>,
    size: usize,
}

/// A reserved worker. Dropping it without evaluating frees the slot.
pub struct WorkerSlot {
    judge: Arc<Judge>,
    _permit: OwnedSemaphorePermit,
}

impl JudgePool {
    pub fn new(judge: Arc<Judge>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            judge,
            workers: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn judge(&self) -> &Arc<Judge> {
        &self.judge
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Wait for a free worker.
    pub async fn reserve(&self) -> Result<WorkerSlot, JudgeError> {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JudgeError::PoolClosed)?;
        Ok(WorkerSlot {
            judge: self.judge.clone(),
            _permit: permit,
        })
    }

    /// Stop handing out workers. Evaluations already running finish normally.
    pub fn close(&self) {
        self.workers.close();
    }

    pub async fn submit(&self, submission: Submission) -> EvaluationReport {
        self.submit_with_cancel(submission, CancellationToken::new()).await
    }

    /// Queue for a worker, then evaluate. Cancelling while still queued
    /// returns immediately without touching the sandbox.
    pub async fn submit_with_cancel(
        &self,
        submission: Submission,
        cancel: CancellationToken,
    ) -> EvaluationReport {
        let slot = tokio::select! {
            _ = cancel.cancelled() => {
                return cancelled_report(submission.id, queued_language(&submission));
            }
            slot = self.reserve() => slot,
        };
        match slot {
            Ok(slot) => slot.evaluate(submission, cancel).await,
            Err(e) => EvaluationReport::system_error(
                submission.id,
                queued_language(&submission),
                e.to_string(),
            ),
        }
    }
}

impl WorkerSlot {
    /// Evaluate on a dedicated task that owns this slot.
    ///
    /// The slot moves into the task, so the worker stays busy until the
    /// evaluation finishes even if the caller stops waiting for the report.
    pub async fn evaluate(self, submission: Submission, cancel: CancellationToken) -> EvaluationReport {
        let id = submission.id;
        let language = queued_language(&submission);

        let handle = tokio::spawn(async move {
            let slot = self;
            slot.judge.evaluate(submission, cancel).await
        });
        match handle.await {
            Ok(report) => report,
            Err(e) => {
                error!(submission_id = %id, error = %e, "Evaluation task failed");
                EvaluationReport::system_error(id, language, format!("evaluation task failed: {}", e))
            }
        }
    }
}

fn queued_language(submission: &Submission) -> LanguageTag {
    submission
        .language_hint
        .clone()
        .unwrap_or_else(LanguageTag::unknown)
}
