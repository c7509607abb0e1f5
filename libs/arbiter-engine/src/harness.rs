/// Test Harness - one sandbox run per test case
///
/// **Comparison rules:**
/// - Line endings: `\r\n` and lone `\r` become `\n`
/// - Trailing whitespace on every line is ignored
/// - Trailing empty lines are ignored
/// - Leading whitespace, interior content and case are significant
///
/// A case that timed out, exceeded a resource limit or exited non-zero fails
/// regardless of its output. Failures never stop the remaining cases; only
/// infrastructure errors (after retries) and cancellation abort the run.
use crate::error::SandboxError;
use crate::runner::{Artifact, RunContext, Runner};
use crate::sandbox::{self, Limits};
use arbiter_common::types::{ExecutionOutcome, TestCase, TestResult, TestStatus};
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct HarnessOptions {
    /// Cases of one submission allowed in flight at once.
    pub parallelism: usize,
    pub system_retries: u32,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            system_retries: 2,
        }
    }
}

pub fn normalize_output(output: &str) -> String {
    let unified = output.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    let keep = lines
        .iter()
        .rposition(|line| !line.is_empty())
        .map_or(0, |last| last + 1);
    lines[..keep].join("\n")
}

/// Judge a single finished execution against its expected output
pub fn judge_case(test_case: &TestCase, outcome: ExecutionOutcome) -> TestResult {
    let normalized_actual = normalize_output(&outcome.stdout);

    let status = if outcome.timed_out {
        TestStatus::TimeLimitExceeded
    } else if outcome.resource_exceeded {
        TestStatus::ResourceLimitExceeded
    } else if outcome.exit_code != 0 {
        TestStatus::RuntimeError
    } else if normalized_actual == normalize_output(&test_case.expected_output) {
        TestStatus::Passed
    } else {
        TestStatus::WrongAnswer
    };

    TestResult {
        test_case: test_case.clone(),
        outcome,
        passed: status == TestStatus::Passed,
        status,
        normalized_actual,
    }
}

/// Run every test case against `artifact`; results keep the input order.
pub async fn evaluate(
    runner: &dyn Runner,
    ctx: &RunContext<'_>,
    artifact: &Artifact,
    test_cases: &[TestCase],
    limits: &Limits,
    options: HarnessOptions,
) -> Result<Vec<TestResult>, SandboxError> {
    info!(
        language = %runner.language(),
        test_count = test_cases.len(),
        parallelism = options.parallelism,
        "Executing test cases"
    );

    // Boxed up front so the combined future stays Send for spawned evaluations
    let cases: Vec<BoxFuture<'_, Result<TestResult, SandboxError>>> = test_cases
        .iter()
        .enumerate()
        .map(|(index, test_case)| {
            async move {
                let outcome = sandbox::with_retries(options.system_retries, "execute", || {
                    runner.execute(ctx, artifact, &test_case.input, limits)
                })
                .await?;

                let result = judge_case(test_case, outcome);
                debug!(
                    test_index = index,
                    status = ?result.status,
                    wall_time_ms = result.outcome.wall_time_ms,
                    exit_code = result.outcome.exit_code,
                    "Test case judged"
                );
                Ok::<_, SandboxError>(result)
            }
            .boxed()
        })
        .collect();

    stream::iter(cases)
        .buffered(options.parallelism.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(expected: &str) -> TestCase {
        TestCase {
            input: String::new(),
            expected_output: expected.to_string(),
        }
    }

    fn outcome(stdout: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("hello"), "hello");
        assert_eq!(normalize_output("hello  \n"), "hello");
        assert_eq!(normalize_output("a \r\nb\t\r\n\r\n"), "a\nb");
        assert_eq!(normalize_output("a\rb"), "a\nb");
        assert_eq!(normalize_output("   "), "");
        assert_eq!(normalize_output(""), "");
    }

    #[test]
    fn test_normalize_keeps_leading_and_interior() {
        assert_eq!(normalize_output("  x"), "  x");
        assert_eq!(normalize_output("a\n\nb\n"), "a\n\nb");
        assert_eq!(normalize_output("a  b"), "a  b");
    }

    #[test]
    fn test_exact_match_passes() {
        let result = judge_case(&case("120"), outcome("120\n"));
        assert!(result.passed);
        assert_eq!(result.status, TestStatus::Passed);
        assert_eq!(result.normalized_actual, "120");
    }

    #[test]
    fn test_crlf_output_matches() {
        let result = judge_case(&case("line1\nline2"), outcome("line1\r\nline2\r\n"));
        assert!(result.passed);
    }

    #[test]
    fn test_mismatch_and_case_sensitivity() {
        assert_eq!(judge_case(&case("Hello"), outcome("hello")).status, TestStatus::WrongAnswer);
        assert_eq!(judge_case(&case("1 2"), outcome(" 1 2")).status, TestStatus::WrongAnswer);
    }

    #[test]
    fn test_failed_execution_never_passes() {
        let mut timed_out = outcome("120");
        timed_out.timed_out = true;
        assert_eq!(judge_case(&case("120"), timed_out).status, TestStatus::TimeLimitExceeded);

        let mut oom = outcome("120");
        oom.resource_exceeded = true;
        assert_eq!(judge_case(&case("120"), oom).status, TestStatus::ResourceLimitExceeded);

        let mut crashed = outcome("120");
        crashed.exit_code = 1;
        let result = judge_case(&case("120"), crashed);
        assert_eq!(result.status, TestStatus::RuntimeError);
        assert!(!result.passed);
    }

    #[test]
    fn test_empty_expected_output() {
        assert!(judge_case(&case(""), outcome("   \n")).passed);
    }
}
