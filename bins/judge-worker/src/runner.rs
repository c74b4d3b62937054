// Test Runner - executes test cases in submission order against the built program

use crate::config::LanguageConfig;
use crate::evaluator::{compare_output, truncate_diagnostic};
use crate::sandbox::{ExecOutput, Sandbox};
use crate::workspace::{Workspace, INPUT_FILE};
use judge_common::types::{EffectiveLimits, JudgeStatus, TestCase, TestOutcome};
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed margin added on top of the time limit before a run is killed
pub const TIME_SLACK: Duration = Duration::from_secs(1);

/// Wall clock budget handed to the sandbox for one test run
pub fn run_timeout(time_limit_ms: u64) -> Duration {
    Duration::from_millis(time_limit_ms) + TIME_SLACK
}

fn run_command(language: &LanguageConfig) -> String {
    format!("{} < {}", language.run_command, INPUT_FILE)
}

/// Classify one finished run
///
/// 1. Timeout signal (highest priority) ⇒ TimeLimitExceeded, timed at the limit
/// 2. Nonzero exit ⇒ RuntimeError
/// 3. Clean exit ⇒ handed to the output comparator
pub fn classify(output: &ExecOutput, test_case: &TestCase, time_limit_ms: u64) -> TestOutcome {
    let execution_time_ms = output.wall_time.as_millis() as u64;

    if output.timed_out {
        return TestOutcome {
            status: JudgeStatus::TimeLimitExceeded,
            stdout: truncate_diagnostic(&output.stdout),
            stderr: truncate_diagnostic(&output.stderr),
            execution_time_ms: Some(time_limit_ms),
            memory_used_mb: 0,
            expected_output: None,
            is_hidden: test_case.is_hidden,
        };
    }

    if output.exit_code != Some(0) {
        return TestOutcome {
            status: JudgeStatus::RuntimeError,
            stdout: truncate_diagnostic(&output.stdout),
            stderr: truncate_diagnostic(&output.stderr),
            execution_time_ms: Some(execution_time_ms),
            memory_used_mb: 0,
            expected_output: None,
            is_hidden: test_case.is_hidden,
        };
    }

    compare_output(&output.stdout, &output.stderr, execution_time_ms, test_case)
}

fn system_error(test_case: &TestCase, error: &anyhow::Error) -> TestOutcome {
    TestOutcome {
        status: JudgeStatus::SystemError,
        stdout: String::new(),
        stderr: truncate_diagnostic(&format!("{:#}", error)),
        execution_time_ms: None,
        memory_used_mb: 0,
        expected_output: None,
        is_hidden: test_case.is_hidden,
    }
}

/// Run every test case in order and collect their outcomes
///
/// Stops right after the first CompilationError, RuntimeError or SystemError;
/// WrongAnswer and TimeLimitExceeded keep the loop going. Infrastructure
/// failures on a single test become a SystemError outcome for that test.
#[tracing::instrument(
    skip_all,
    fields(tests = test_cases.len(), time_limit_ms = limits.time_limit_ms)
)]
pub async fn run_tests(
    sandbox: &Sandbox,
    workspace: &Workspace,
    language: &LanguageConfig,
    test_cases: &[TestCase],
    limits: EffectiveLimits,
) -> Vec<TestOutcome> {
    let command = run_command(language);
    let timeout = run_timeout(limits.time_limit_ms);
    let mut outcomes = Vec::with_capacity(test_cases.len());

    for (idx, test_case) in test_cases.iter().enumerate() {
        let test_index = idx + 1;

        let outcome = match workspace.write_input(test_case) {
            Err(e) => system_error(test_case, &e),
            Ok(_) => match sandbox.exec(&command, timeout).await {
                Ok(output) => classify(&output, test_case, limits.time_limit_ms),
                Err(e) => system_error(test_case, &e.context("Failed to run test in sandbox")),
            },
        };

        debug!(
            test_index,
            status = %outcome.status,
            execution_ms = ?outcome.execution_time_ms,
            "Test finished"
        );

        let halt = outcome.status.halts_pipeline();
        outcomes.push(outcome);

        if halt {
            warn!(
                test_index,
                remaining = test_cases.len() - test_index,
                "Halting test loop"
            );
            break;
        }
    }

    outcomes
}
