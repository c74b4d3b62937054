// Wire format for verdict publication.
// The internal JudgeStatus enum is mapped to its wire string here and nowhere else.

use crate::types::{JudgeStatus, TestOutcome, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictEvent {
    pub submission_id: i64,
    pub status: String,
    /// None for non-terminal status updates such as `judging`
    pub result: Option<VerdictRecord>,
    pub judged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub status: String,
    pub passed_tests: usize,
    pub total_tests: usize,
    /// Average execution time in milliseconds
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub test_results: Vec<TestResultRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultRecord {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
    pub memory_used: u64,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerdictEvent {
    /// Non-terminal status change, e.g. Pending -> Judging
    pub fn status_update(submission_id: i64, status: JudgeStatus, at: DateTime<Utc>) -> Self {
        Self {
            submission_id,
            status: status.as_wire_str().to_string(),
            result: None,
            judged_at: at,
        }
    }

    pub fn from_verdict(submission_id: i64, verdict: &Verdict, at: DateTime<Utc>) -> Self {
        let status = verdict.final_status.as_wire_str().to_string();
        Self {
            submission_id,
            status: status.clone(),
            result: Some(VerdictRecord {
                status,
                passed_tests: verdict.passed_tests,
                total_tests: verdict.total_tests,
                execution_time: verdict.avg_execution_time_ms,
                message: verdict.message.clone(),
                test_results: verdict.per_test_results.iter().map(TestResultRecord::from).collect(),
            }),
            judged_at: at,
        }
    }

    /// Parsed status, if the wire string is one we know
    pub fn judge_status(&self) -> Option<JudgeStatus> {
        JudgeStatus::from_wire_str(&self.status)
    }
}

impl From<&TestOutcome> for TestResultRecord {
    fn from(outcome: &TestOutcome) -> Self {
        if outcome.is_hidden {
            return Self {
                status: outcome.status.as_wire_str().to_string(),
                execution_time: outcome.execution_time_ms,
                memory_used: outcome.memory_used_mb,
                hidden: true,
                actual: None,
                expected: None,
                error: None,
            };
        }

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        Self {
            status: outcome.status.as_wire_str().to_string(),
            execution_time: outcome.execution_time_ms,
            memory_used: outcome.memory_used_mb,
            hidden: false,
            actual: non_empty(&outcome.stdout),
            expected: outcome.expected_output.clone(),
            error: non_empty(&outcome.stderr),
        }
    }
}
