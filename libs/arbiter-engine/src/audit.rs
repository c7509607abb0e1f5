// Append-only audit trail of submission lifecycle transitions
use arbiter_common::types::Stage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub submission_id: Uuid,
    pub stage: Stage,
    pub detail: String,
}

/// Bounded ring buffer; the oldest entry is evicted once `capacity` is reached.
///
/// Constructed once at startup and shared by reference, every append is also
/// emitted as a tracing event.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, submission_id: Uuid, stage: Stage, detail: impl Into<String>) {
        let entry = AuditEntry {
            at: Utc::now(),
            submission_id,
            stage,
            detail: detail.into(),
        };
        tracing::info!(
            submission_id = %entry.submission_id,
            stage = %entry.stage,
            detail = %entry.detail,
            "audit"
        );

        // A poisoned lock only means another writer panicked mid-push
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Entries oldest first.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Entries for one submission, oldest first.
    pub fn trail(&self, submission_id: Uuid) -> Vec<AuditEntry> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.submission_id == submission_id)
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_when_full() {
        let log = AuditLog::new(3);
        let id = Uuid::new_v4();
        for stage in [Stage::Received, Stage::Classified, Stage::Compiling, Stage::Executing] {
            log.record(id, stage, "");
        }
        let stages: Vec<_> = log.snapshot().into_iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec![Stage::Classified, Stage::Compiling, Stage::Executing]);
    }

    #[test]
    fn test_trail_filters_by_submission() {
        let log = AuditLog::new(16);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        log.record(a, Stage::Received, "a");
        log.record(b, Stage::Received, "b");
        log.record(a, Stage::Reported, "a done");

        let trail = log.trail(a);
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].detail, "a done");
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let log = AuditLog::new(0);
        log.record(Uuid::new_v4(), Stage::Received, "");
        log.record(Uuid::new_v4(), Stage::Received, "");
        assert_eq!(log.snapshot().len(), 1);
        assert_eq!(log.capacity(), 1);
    }
}
