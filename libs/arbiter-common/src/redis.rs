use crate::types::{EvaluationReport, Submission};
use redis::{AsyncCommands, RedisResult};

/// Redis key scheme shared by whoever enqueues submissions and the worker.
/// The submission id doubles as the correlation id for the report.

pub const QUEUE_KEY: &str = "arbiter:queue:submissions";
pub const REPORT_PREFIX: &str = "arbiter:report";
pub const CANCEL_PREFIX: &str = "arbiter:cancel";

pub fn report_key(submission_id: &uuid::Uuid) -> String {
    format!("{}:{}", REPORT_PREFIX, submission_id)
}

pub fn cancel_key(submission_id: &uuid::Uuid) -> String {
    format!("{}:{}", CANCEL_PREFIX, submission_id)
}

fn serde_error(what: &'static str, e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, what, e.to_string()))
}

/// Enqueue a submission (RPUSH, FIFO with `pop_submission`).
pub async fn push_submission(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
    submission: &Submission,
) -> RedisResult<()> {
    let payload =
        serde_json::to_string(submission).map_err(|e| serde_error("serialization error", e))?;
    conn.rpush(queue, payload).await
}

/// Raw payload popped from the queue.
///
/// Parsing is left to the caller so a malformed entry can be logged and
/// skipped without turning into a connection error.
pub async fn pop_submission(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
    timeout_seconds: f64,
) -> RedisResult<Option<String>> {
    let result: Option<(String, String)> = conn.blpop(queue, timeout_seconds).await?;
    Ok(result.map(|(_key, payload)| payload))
}

pub async fn store_report(
    conn: &mut redis::aio::ConnectionManager,
    report: &EvaluationReport,
) -> RedisResult<()> {
    let key = report_key(&report.submission_id);
    let payload =
        serde_json::to_string(report).map_err(|e| serde_error("serialization error", e))?;
    // 24-hour TTL, the caller is expected to pick the report up well before
    let _: () = conn.set_ex(&key, payload, 86400).await?;
    Ok(())
}

pub async fn get_report(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &uuid::Uuid,
) -> RedisResult<Option<EvaluationReport>> {
    let payload: Option<String> = conn.get(report_key(submission_id)).await?;
    match payload {
        Some(data) => serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| serde_error("deserialization error", e)),
        None => Ok(None),
    }
}

/// Flag a submission as cancelled, e.g. when a competition round closes.
pub async fn request_cancel(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &uuid::Uuid,
) -> RedisResult<()> {
    let _: () = conn
        .set_ex(cancel_key(submission_id), 1, 86400)
        .await?;
    Ok(())
}

pub async fn is_cancelled(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &uuid::Uuid,
) -> RedisResult<bool> {
    conn.exists(cancel_key(submission_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_report_key_deterministic() {
        let id = Uuid::new_v4();
        let key1 = report_key(&id);
        let key2 = report_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("arbiter:report:"));
    }

    #[test]
    fn test_cancel_key_format() {
        let id = Uuid::new_v4();
        let key = cancel_key(&id);
        assert!(key.starts_with("arbiter:cancel:"));
        assert!(key.contains(&id.to_string()));
        assert_ne!(key, report_key(&id));
    }
}
