/// Test Evaluator - Output Comparison and Verdict Aggregation
///
/// **Core Responsibility:**
/// Decide pass/fail for tests that exited cleanly, and reduce the ordered
/// per-test outcomes into one final verdict.
///
/// **Critical Properties:**
/// - Knows nothing about Docker
/// - Knows nothing about language runtimes
/// - Knows nothing about Redis
/// - Pure functions: (outputs, expected outputs) → verdict
///
/// **Normalization Rules (Applied to All Languages):**
/// - Trim leading/trailing whitespace: YES
/// - Internal whitespace: preserved, must match exactly
/// - Case sensitivity: YES (exact match required)
/// - Floating-point tolerance: NO
///
/// **Final Status Precedence:**
/// Accepted (every test passed) → CompilationError → SystemError →
/// RuntimeError → TimeLimitExceeded → WrongAnswer

use judge_common::types::{JudgeStatus, TestCase, TestOutcome, Verdict};

/// Cap for diagnostics and captured output kept in a verdict
pub const MAX_DIAGNOSTIC_BYTES: usize = 4096;

const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Normalize output string for comparison
///
/// **Preserves:**
/// - Internal whitespace
/// - Case sensitivity
/// - Empty lines within content
fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Trim a diagnostic to MAX_DIAGNOSTIC_BYTES on a char boundary
pub fn truncate_diagnostic(text: &str) -> String {
    if text.len() <= MAX_DIAGNOSTIC_BYTES {
        return text.to_string();
    }
    let mut end = MAX_DIAGNOSTIC_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], TRUNCATION_MARKER)
}

/// Compare the stdout of a cleanly exited run against the expected output
///
/// Match ⇒ Accepted; mismatch ⇒ WrongAnswer with the expected output kept
/// alongside the actual one.
pub fn compare_output(
    stdout: &str,
    stderr: &str,
    execution_time_ms: u64,
    test_case: &TestCase,
) -> TestOutcome {
    let actual = normalize_output(stdout);
    let expected = normalize_output(&test_case.expected_output);

    let (status, expected_output) = if actual == expected {
        (JudgeStatus::Accepted, None)
    } else {
        (JudgeStatus::WrongAnswer, Some(truncate_diagnostic(expected)))
    };

    TestOutcome {
        status,
        stdout: truncate_diagnostic(actual),
        stderr: truncate_diagnostic(stderr),
        execution_time_ms: Some(execution_time_ms),
        memory_used_mb: 0,
        expected_output,
        is_hidden: test_case.is_hidden,
    }
}

/// A failure outside the per-test loop that ends the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum StageFailure {
    /// Compiler exited nonzero; carries its diagnostic
    Compilation(String),
    /// Infrastructure failure before or around the test loop
    System(String),
}

impl StageFailure {
    fn status(&self) -> JudgeStatus {
        match self {
            StageFailure::Compilation(_) => JudgeStatus::CompilationError,
            StageFailure::System(_) => JudgeStatus::SystemError,
        }
    }

    fn message(&self) -> &str {
        match self {
            StageFailure::Compilation(msg) | StageFailure::System(msg) => msg,
        }
    }
}

fn final_status(
    passed_tests: usize,
    total_tests: usize,
    observed: &[JudgeStatus],
    stage_failure: Option<&StageFailure>,
) -> JudgeStatus {
    let saw = |status: JudgeStatus| observed.contains(&status);

    if stage_failure.is_none() && passed_tests == total_tests {
        JudgeStatus::Accepted
    } else if saw(JudgeStatus::CompilationError) {
        JudgeStatus::CompilationError
    } else if saw(JudgeStatus::SystemError) {
        JudgeStatus::SystemError
    } else if saw(JudgeStatus::RuntimeError) {
        JudgeStatus::RuntimeError
    } else if saw(JudgeStatus::TimeLimitExceeded) {
        JudgeStatus::TimeLimitExceeded
    } else {
        JudgeStatus::WrongAnswer
    }
}

/// Reduce the ordered outcomes of one judging pass into a verdict
///
/// ## Arguments
/// * `total_tests` - Number of test cases in the job, attempted or not
/// * `outcomes` - Outcomes of the tests that were attempted, in submission order
/// * `stage_failure` - Compile or infrastructure failure that stopped the pass
pub fn aggregate(
    total_tests: usize,
    outcomes: Vec<TestOutcome>,
    stage_failure: Option<StageFailure>,
) -> Verdict {
    let passed_tests = outcomes
        .iter()
        .filter(|o| o.status == JudgeStatus::Accepted)
        .count();

    let mut observed: Vec<JudgeStatus> = outcomes.iter().map(|o| o.status).collect();
    if let Some(failure) = &stage_failure {
        observed.push(failure.status());
    }

    let final_status = final_status(passed_tests, total_tests, &observed, stage_failure.as_ref());

    let timings: Vec<u64> = outcomes.iter().filter_map(|o| o.execution_time_ms).collect();
    let avg_execution_time_ms = if timings.is_empty() {
        0.0
    } else {
        timings.iter().sum::<u64>() as f64 / timings.len() as f64
    };

    // Diagnostic: the stage failure if there was one, otherwise the stderr of
    // the outcome that decided the final status
    let message = match &stage_failure {
        Some(failure) => Some(truncate_diagnostic(failure.message())),
        None => outcomes
            .iter()
            .find(|o| o.status == final_status && o.status != JudgeStatus::Accepted)
            .map(|o| o.stderr.as_str())
            .filter(|stderr| !stderr.is_empty())
            .map(truncate_diagnostic),
    };

    Verdict {
        final_status,
        passed_tests,
        total_tests,
        avg_execution_time_ms,
        per_test_results: outcomes,
        message,
    }
}
