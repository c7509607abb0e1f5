use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Language identifier attached to a submission.
///
/// Tags are lowercase and trimmed so that `"Python "` and `"python"` name the
/// same runner. `unknown` is reserved for sources the classifier could not
/// place and never resolves to a runner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LanguageTag(String);

impl LanguageTag {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().trim().to_lowercase())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LanguageTag {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for LanguageTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<LanguageTag> for String {
    fn from(value: LanguageTag) -> Self {
        value.0
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// A piece of source code to judge. Immutable once handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub language_hint: Option<LanguageTag>,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
    pub points_available: u32,
}

/// Raw result of one sandboxed process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub wall_time_ms: u64,
    pub timed_out: bool,
    pub resource_exceeded: bool,
}

impl ExecutionOutcome {
    /// True when the process ran to completion inside its limits.
    pub fn exited_cleanly(&self) -> bool {
        !self.timed_out && !self.resource_exceeded && self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    Passed,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
    ResourceLimitExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case: TestCase,
    pub outcome: ExecutionOutcome,
    pub passed: bool,
    pub status: TestStatus,
    pub normalized_actual: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Accepted,
    PartiallyAccepted,
    Rejected,
    CompileError,
    SystemError,
}

/// Lifecycle states of a submission inside the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Received,
    Classified,
    Compiling,
    Executing,
    Scored,
    Reported,
    CompileError,
    SystemError,
    Rejected,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The only artifact the engine hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub submission_id: Uuid,
    pub language: LanguageTag,
    pub verdict: Verdict,
    pub score: u32,
    pub test_results: Vec<TestResult>,
    pub diagnostic: String,
    pub stage: Stage,
    pub retryable: bool,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl EvaluationReport {
    /// Infrastructure failure or cancellation; the caller may resubmit.
    pub fn system_error(
        submission_id: Uuid,
        language: LanguageTag,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            submission_id,
            language,
            verdict: Verdict::SystemError,
            score: 0,
            test_results: Vec::new(),
            diagnostic: diagnostic.into(),
            stage: Stage::SystemError,
            retryable: true,
            elapsed_ms: 0,
            finished_at: Utc::now(),
        }
    }

    /// Submission refused without running anything.
    pub fn rejected(
        submission_id: Uuid,
        language: LanguageTag,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            submission_id,
            language,
            verdict: Verdict::Rejected,
            score: 0,
            test_results: Vec::new(),
            diagnostic: diagnostic.into(),
            stage: Stage::Rejected,
            retryable: false,
            elapsed_ms: 0,
            finished_at: Utc::now(),
        }
    }

    /// The submission did not build; no case was attempted.
    pub fn compile_error(
        submission_id: Uuid,
        language: LanguageTag,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            verdict: Verdict::CompileError,
            stage: Stage::CompileError,
            ..Self::rejected(submission_id, language, diagnostic)
        }
    }

    pub fn passed_count(&self) -> usize {
        self.test_results.iter().filter(|r| r.passed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_tag_normalizes() {
        assert_eq!(LanguageTag::new(" Python "), LanguageTag::new("python"));
        assert!(LanguageTag::new("UNKNOWN").is_unknown());
        assert!(!LanguageTag::new("rust").is_unknown());
    }

    #[test]
    fn test_submission_json_defaults() {
        let raw = r#"{
            "source_code": "print(input())",
            "test_cases": [{"input": "1", "expected_output": "1"}],
            "points_available": 100
        }"#;
        let submission: Submission = serde_json::from_str(raw).unwrap();
        assert!(submission.language_hint.is_none());
        assert_eq!(submission.test_cases.len(), 1);
    }

    #[test]
    fn test_language_hint_is_normalized_on_deserialize() {
        let raw = r#"{
            "language_hint": "Java",
            "source_code": "",
            "test_cases": [],
            "points_available": 10
        }"#;
        let submission: Submission = serde_json::from_str(raw).unwrap();
        assert_eq!(submission.language_hint, Some(LanguageTag::new("java")));
    }

    #[test]
    fn test_system_error_report_is_retryable() {
        let report = EvaluationReport::system_error(Uuid::new_v4(), LanguageTag::unknown(), "boom");
        assert_eq!(report.verdict, Verdict::SystemError);
        assert!(report.retryable);
        assert_eq!(report.score, 0);

        let rejected = EvaluationReport::rejected(Uuid::new_v4(), LanguageTag::unknown(), "empty");
        assert!(!rejected.retryable);
        assert_eq!(rejected.stage, Stage::Rejected);
    }

    #[test]
    fn test_exited_cleanly() {
        let mut outcome = ExecutionOutcome::default();
        assert!(outcome.exited_cleanly());
        outcome.exit_code = 1;
        assert!(!outcome.exited_cleanly());
        outcome.exit_code = 0;
        outcome.timed_out = true;
        assert!(!outcome.exited_cleanly());
    }
}
