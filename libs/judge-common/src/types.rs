use serde::{Deserialize, Serialize};
use std::fmt;

/// Languages the judge knows how to build and run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Cpp,
    Java,
    Javascript,
    Go,
    Rust,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::Cpp,
        Language::Java,
        Language::Javascript,
        Language::Go,
        Language::Rust,
    ];

    /// Parse a lowercase language name as it appears on the wire
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|lang| lang.as_str() == name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Javascript => "javascript",
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input_data: String,
    pub expected_output: String,
    /// Only affects what gets published, never how the test runs
    #[serde(default)]
    pub is_hidden: bool,
}

/// Per-job limits as they arrive on the queue; missing values fall back to worker defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
}

impl Limits {
    pub fn resolve(&self, defaults: EffectiveLimits) -> EffectiveLimits {
        EffectiveLimits {
            time_limit_ms: self.time_limit_ms.unwrap_or(defaults.time_limit_ms),
            memory_limit_mb: self.memory_limit_mb.unwrap_or(defaults.memory_limit_mb),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub time_limit_ms: u64,
    pub memory_limit_mb: u64,
}

/// A submission pulled from the judge queue. Consumed exactly once by one judging pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionJob {
    #[serde(alias = "submission_id")]
    pub id: i64,
    pub code: String,
    pub language: Language,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<i64>,
    #[serde(default)]
    pub limits: Limits,
}

/// Submission status taxonomy.
///
/// Internal control value only; the wire spelling lives in `as_wire_str`
/// and is applied when events are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JudgeStatus {
    Pending,
    Judging,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    /// Part of the taxonomy but never produced: memory usage is not measured
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    SystemError,
}

impl JudgeStatus {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            JudgeStatus::Pending => "pending",
            JudgeStatus::Judging => "judging",
            JudgeStatus::Accepted => "accepted",
            JudgeStatus::WrongAnswer => "wrong_answer",
            JudgeStatus::TimeLimitExceeded => "time_limit_exceeded",
            JudgeStatus::MemoryLimitExceeded => "memory_limit_exceeded",
            JudgeStatus::RuntimeError => "runtime_error",
            JudgeStatus::CompilationError => "compilation_error",
            JudgeStatus::SystemError => "system_error",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        let status = match s {
            "pending" => JudgeStatus::Pending,
            "judging" => JudgeStatus::Judging,
            "accepted" => JudgeStatus::Accepted,
            "wrong_answer" => JudgeStatus::WrongAnswer,
            "time_limit_exceeded" => JudgeStatus::TimeLimitExceeded,
            "memory_limit_exceeded" => JudgeStatus::MemoryLimitExceeded,
            "runtime_error" => JudgeStatus::RuntimeError,
            "compilation_error" => JudgeStatus::CompilationError,
            "system_error" => JudgeStatus::SystemError,
            _ => return None,
        };
        Some(status)
    }

    /// Everything after `Judging` is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JudgeStatus::Pending | JudgeStatus::Judging)
    }

    /// Outcomes that stop the test loop. WrongAnswer and TimeLimitExceeded keep going.
    pub fn halts_pipeline(&self) -> bool {
        matches!(
            self,
            JudgeStatus::CompilationError | JudgeStatus::RuntimeError | JudgeStatus::SystemError
        )
    }
}

impl fmt::Display for JudgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// Classified result of running one test case
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub status: JudgeStatus,
    pub stdout: String,
    pub stderr: String,
    /// None when the test never produced a timing (infrastructure failure)
    pub execution_time_ms: Option<u64>,
    /// Always 0 for now
    pub memory_used_mb: u64,
    /// Kept on WrongAnswer for diagnostics
    pub expected_output: Option<String>,
    pub is_hidden: bool,
}

/// Final judgement for one submission
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub final_status: JudgeStatus,
    pub passed_tests: usize,
    pub total_tests: usize,
    pub avg_execution_time_ms: f64,
    /// In submission order; only tests that were actually attempted
    pub per_test_results: Vec<TestOutcome>,
    /// Compiler stderr, runtime stderr or infrastructure error, length-capped
    pub message: Option<String>,
}
