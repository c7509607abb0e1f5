/// Scoring Engine - test results → (score, verdict)
///
/// **Policy:**
/// - Every case passed → `Accepted`, full points
/// - No case passed → `Rejected`, 0
/// - Otherwise → `PartiallyAccepted`,
///   `floor(points * passed / total * partial_factor)`
///
/// `CompileError` and `SystemError` never reach this module; the coordinator
/// assigns them before any case runs.
use arbiter_common::types::{TestResult, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scored {
    pub score: u32,
    pub verdict: Verdict,
}

pub fn score(results: &[TestResult], points_available: u32, partial_factor: f64) -> Scored {
    let total = results.len();
    let passed = results.iter().filter(|r| r.passed).count();

    if total == 0 || passed == 0 {
        return Scored {
            score: 0,
            verdict: Verdict::Rejected,
        };
    }

    if passed == total {
        return Scored {
            score: points_available,
            verdict: Verdict::Accepted,
        };
    }

    let factor = partial_factor.clamp(0.0, 1.0);
    let raw = (points_available as f64 * passed as f64 / total as f64 * factor).floor();
    Scored {
        score: (raw as u32).min(points_available),
        verdict: Verdict::PartiallyAccepted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_common::types::{ExecutionOutcome, TestCase, TestStatus};

    fn results(pattern: &[bool]) -> Vec<TestResult> {
        pattern
            .iter()
            .map(|&passed| TestResult {
                test_case: TestCase {
                    input: String::new(),
                    expected_output: String::new(),
                },
                outcome: ExecutionOutcome::default(),
                passed,
                status: if passed {
                    TestStatus::Passed
                } else {
                    TestStatus::WrongAnswer
                },
                normalized_actual: String::new(),
            })
            .collect()
    }

    #[test]
    fn test_all_pass() {
        let scored = score(&results(&[true, true]), 100, 0.5);
        assert_eq!(scored, Scored { score: 100, verdict: Verdict::Accepted });
    }

    #[test]
    fn test_three_of_four_half_credit() {
        let scored = score(&results(&[true, true, true, false]), 100, 0.5);
        assert_eq!(scored.score, 37);
        assert_eq!(scored.verdict, Verdict::PartiallyAccepted);
    }

    #[test]
    fn test_none_pass() {
        let scored = score(&results(&[false, false, false]), 100, 0.5);
        assert_eq!(scored, Scored { score: 0, verdict: Verdict::Rejected });
    }

    #[test]
    fn test_empty_is_never_accepted() {
        let scored = score(&[], 100, 0.5);
        assert_eq!(scored.verdict, Verdict::Rejected);
        assert_eq!(scored.score, 0);
    }

    #[test]
    fn test_partial_can_floor_to_zero() {
        let scored = score(&results(&[true, false, false]), 1, 0.5);
        assert_eq!(scored.score, 0);
        assert_eq!(scored.verdict, Verdict::PartiallyAccepted);
    }

    #[test]
    fn test_score_stays_in_bounds() {
        for points in [0u32, 1, 7, 100, u32::MAX] {
            for factor in [0.0, 0.5, 1.0, 3.0] {
                let scored = score(&results(&[true, false]), points, factor);
                assert!(scored.score <= points);
            }
        }
    }

    #[test]
    fn test_full_factor_gives_proportional_credit() {
        let scored = score(&results(&[true, false]), 10, 1.0);
        assert_eq!(scored.score, 5);
    }
}
