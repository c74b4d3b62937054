/// Judge Engine - One Judging Pass per Submission
///
/// **Core Responsibility:**
/// Turn a SubmissionJob into exactly one Verdict.
///
/// **Pipeline:**
/// 1. Workspace Manager writes the source into a fresh directory
/// 2. Isolation Provider allocates a sandbox with the workspace mounted
/// 3. Compiler Stage builds the program (compiled languages only)
/// 4. Test Runner executes the test cases in order
/// 5. Verdict Aggregator reduces the outcomes
///
/// **Guarantees:**
/// - Limits outside the accepted range are rejected before any sandbox exists
/// - Every failure inside the pipeline becomes a SystemError verdict; `judge`
///   itself cannot fail
/// - The sandbox and the workspace are released exactly once on every path
/// - Nothing about the job outlives the call
///
/// Dependencies (isolation provider, language table) are handed in at
/// construction; the engine holds no global state.

use crate::compiler::{self, CompileOutcome};
use crate::config::{
    LanguageConfig, LanguageConfigManager, MAX_MEMORY_LIMIT_MB, MAX_TIME_LIMIT_MS,
};
use crate::evaluator::{self, StageFailure};
use crate::runner;
use crate::sandbox::{IsolationProvider, Sandbox, SandboxSpec};
use crate::workspace::{Workspace, WorkspaceManager};
use anyhow::{bail, Context, Result};
use judge_common::types::{EffectiveLimits, SubmissionJob, Verdict};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Safety limits to prevent pathological inputs from reaching Docker
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

pub struct Judge {
    provider: Arc<dyn IsolationProvider>,
    languages: LanguageConfigManager,
    workspaces: WorkspaceManager,
    default_limits: EffectiveLimits,
    cpu_quota: f64,
}

impl Judge {
    pub fn new(
        provider: Arc<dyn IsolationProvider>,
        languages: LanguageConfigManager,
        workspaces: WorkspaceManager,
        default_limits: EffectiveLimits,
        cpu_quota: f64,
    ) -> Self {
        Self {
            provider,
            languages,
            workspaces,
            default_limits,
            cpu_quota,
        }
    }

    /// Judge one submission. Always returns a verdict.
    #[tracing::instrument(
        skip(self, job),
        fields(
            submission_id = job.id,
            language = %job.language,
            test_count = job.test_cases.len()
        )
    )]
    pub async fn judge(&self, job: &SubmissionJob) -> Verdict {
        let start = Instant::now();

        let verdict = match self.try_judge(job).await {
            Ok(verdict) => verdict,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Judging failed");
                evaluator::aggregate(
                    job.test_cases.len(),
                    Vec::new(),
                    Some(StageFailure::System(format!("{:#}", e))),
                )
            }
        };

        info!(
            status = %verdict.final_status,
            passed_tests = verdict.passed_tests,
            total_tests = verdict.total_tests,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Judging complete"
        );

        verdict
    }

    async fn try_judge(&self, job: &SubmissionJob) -> Result<Verdict> {
        validate_sizes(job)?;

        let language = self.languages.get_config(&job.language)?;
        let limits = job.limits.resolve(self.default_limits);
        validate_limits(limits)?;

        let workspace = self
            .workspaces
            .prepare(job, &language.source_file)
            .context("Failed to prepare workspace")?;

        let result = self.judge_in_workspace(job, language, limits, &workspace).await;

        workspace.cleanup();
        result
    }

    async fn judge_in_workspace(
        &self,
        job: &SubmissionJob,
        language: &LanguageConfig,
        limits: EffectiveLimits,
        workspace: &Workspace,
    ) -> Result<Verdict> {
        let spec = SandboxSpec {
            image: language.image.clone(),
            memory_limit_mb: limits.memory_limit_mb,
            cpu_quota: self.cpu_quota,
            network_disabled: true,
            privileges_dropped: true,
            workspace_mount: workspace.path().to_path_buf(),
        };

        let sandbox = Sandbox::acquire(self.provider.clone(), &spec)
            .await
            .context("Failed to create sandbox")?;

        debug!(
            sandbox_id = %sandbox.handle().id,
            compiled = language.needs_compilation(),
            source = %workspace.source_path().display(),
            time_limit_ms = limits.time_limit_ms,
            memory_limit_mb = limits.memory_limit_mb,
            "Sandbox ready"
        );

        let result = run_pipeline(job, language, limits, workspace, &sandbox).await;

        sandbox.release().await;
        result
    }
}

async fn run_pipeline(
    job: &SubmissionJob,
    language: &LanguageConfig,
    limits: EffectiveLimits,
    workspace: &Workspace,
    sandbox: &Sandbox,
) -> Result<Verdict> {
    let total_tests = job.test_cases.len();

    if let CompileOutcome::Failed { diagnostic } = compiler::compile(sandbox, language).await? {
        return Ok(evaluator::aggregate(
            total_tests,
            Vec::new(),
            Some(StageFailure::Compilation(diagnostic)),
        ));
    }

    let outcomes = runner::run_tests(sandbox, workspace, language, &job.test_cases, limits).await;

    Ok(evaluator::aggregate(total_tests, outcomes, None))
}

/// Per-job limits come off the wire; zero would mean unlimited to Docker
fn validate_limits(limits: EffectiveLimits) -> Result<()> {
    if !(1..=MAX_TIME_LIMIT_MS).contains(&limits.time_limit_ms) {
        bail!(
            "Time limit of {} ms is outside 1..={} ms",
            limits.time_limit_ms,
            MAX_TIME_LIMIT_MS
        );
    }
    if !(1..=MAX_MEMORY_LIMIT_MB).contains(&limits.memory_limit_mb) {
        bail!(
            "Memory limit of {} MB is outside 1..={} MB",
            limits.memory_limit_mb,
            MAX_MEMORY_LIMIT_MB
        );
    }
    Ok(())
}

fn validate_sizes(job: &SubmissionJob) -> Result<()> {
    if job.code.len() > MAX_SOURCE_CODE_BYTES {
        bail!("Source code exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES);
    }
    if let Some(idx) = job
        .test_cases
        .iter()
        .position(|tc| tc.input_data.len() > MAX_TEST_INPUT_BYTES)
    {
        bail!(
            "Input of test {} exceeds maximum size of {} bytes",
            idx + 1,
            MAX_TEST_INPUT_BYTES
        );
    }
    Ok(())
}
