// Queue intake: BLPOP submissions, judge them on the pool, store reports
use arbiter_common::redis as keys;
use arbiter_common::types::{EvaluationReport, LanguageTag, Submission};
use arbiter_engine::{JudgePool, WorkerSlot};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// BLPOP timeout, so shutdown is noticed between pops.
const POP_TIMEOUT_SECONDS: f64 = 5.0;
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pull submissions until `shutdown` fires, then wait for in-flight ones.
///
/// A worker slot is reserved before each pop, so the queue is only drained as
/// fast as the pool can judge.
pub async fn run(
    pool: JudgePool,
    mut conn: ConnectionManager,
    queue: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut in_flight = JoinSet::new();

    loop {
        let slot = tokio::select! {
            _ = shutdown.cancelled() => break,
            slot = pool.reserve() => slot?,
        };

        // Not raced against shutdown: an interrupted BLPOP could lose a payload
        match keys::pop_submission(&mut conn, queue, POP_TIMEOUT_SECONDS).await {
            Ok(Some(payload)) => match parse_payload(&payload) {
                Ok(submission) => {
                    info!(
                        submission_id = %submission.id,
                        language_hint = ?submission.language_hint,
                        test_cases = submission.test_cases.len(),
                        source_size = submission.source_code.len(),
                        "Received submission"
                    );
                    in_flight.spawn(judge_and_store(slot, submission, conn.clone()));
                }
                Err(Malformed { report: Some(report), reason }) => {
                    warn!(submission_id = %report.submission_id, error = %reason, "Rejecting malformed submission");
                    drop(slot);
                    if let Err(e) = keys::store_report(&mut conn, &report).await {
                        error!(submission_id = %report.submission_id, error = %e, "Failed to persist report");
                    }
                }
                Err(Malformed { report: None, reason }) => {
                    error!(error = %reason, payload_size = payload.len(), "Dropping malformed submission");
                }
            },
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        // Reap finished tasks so the set does not grow without bound
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Submission task failed");
            }
        }
    }

    info!(in_flight = in_flight.len(), "Draining in-flight submissions");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Submission task failed");
        }
    }
    Ok(())
}

/// A queue payload that is not a valid submission.
#[derive(Debug)]
struct Malformed {
    /// Present when the payload still names a submission id to report against.
    report: Option<EvaluationReport>,
    reason: String,
}

fn parse_payload(payload: &str) -> Result<Submission, Malformed> {
    let value: serde_json::Value = serde_json::from_str(payload).map_err(|e| Malformed {
        report: None,
        reason: e.to_string(),
    })?;

    let id = value
        .get("id")
        .and_then(|id| id.as_str())
        .and_then(|id| Uuid::parse_str(id).ok());
    let language = value
        .get("language_hint")
        .and_then(|hint| hint.as_str())
        .map(LanguageTag::new)
        .unwrap_or_else(LanguageTag::unknown);

    serde_json::from_value::<Submission>(value).map_err(|e| Malformed {
        report: id.map(|id| {
            EvaluationReport::rejected(id, language, format!("malformed submission: {}", e))
        }),
        reason: e.to_string(),
    })
}

#[instrument(skip_all, fields(submission_id = %submission.id))]
async fn judge_and_store(slot: WorkerSlot, submission: Submission, mut conn: ConnectionManager) {
    let id = submission.id;
    let cancel = CancellationToken::new();
    let done = CancellationToken::new();
    let watcher = tokio::spawn(watch_cancellation(
        id,
        conn.clone(),
        cancel.clone(),
        done.clone(),
    ));

    let report = slot.evaluate(submission, cancel).await;
    done.cancel();
    let _ = watcher.await;

    log_report(&report);
    match keys::store_report(&mut conn, &report).await {
        Ok(()) => info!("Report persisted to Redis"),
        // Non-fatal: the worker keeps serving the queue
        Err(e) => error!(error = %e, "Failed to persist report"),
    }
}

/// Poll the cancellation flag until the evaluation finishes.
async fn watch_cancellation(
    id: uuid::Uuid,
    mut conn: ConnectionManager,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    let mut ticker = tokio::time::interval(CANCEL_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = done.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match keys::is_cancelled(&mut conn, &id).await {
            Ok(true) => {
                warn!(submission_id = %id, "Cancellation requested");
                cancel.cancel();
                return;
            }
            Ok(false) => {}
            // Keep judging; a flaky check must not cancel anything
            Err(e) => warn!(submission_id = %id, error = %e, "Failed to check cancellation"),
        }
    }
}

fn log_report(report: &EvaluationReport) {
    for (idx, result) in report.test_results.iter().enumerate() {
        debug!(
            test_num = idx + 1,
            status = ?result.status,
            wall_time_ms = result.outcome.wall_time_ms,
            exit_code = result.outcome.exit_code,
            "Test result"
        );
    }
}
