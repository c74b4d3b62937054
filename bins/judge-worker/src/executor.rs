/// Job Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Take one popped job from intake to published verdict.
///
/// **Flow:**
/// 1. Announce `judging` on the result sink
/// 2. Hand the job to the Judge (engine.rs)
/// 3. Publish the terminal verdict
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How outcomes reduce to a verdict (evaluator's job)
/// - Where events end up (sink's job)
///
/// Publishing is best effort: a sink failure is logged and the worker moves on.

use crate::engine::Judge;
use crate::evaluator::{self, StageFailure};
use crate::sink::{publish_best_effort, ResultSink};
use chrono::Utc;
use judge_common::event::VerdictEvent;
use judge_common::types::{JudgeStatus, SubmissionJob, Verdict};
use tracing::{debug, info, warn};

/// Judge one job and publish its status updates
pub async fn process_job(job: &SubmissionJob, judge: &Judge, sink: &dyn ResultSink) -> Verdict {
    info!(
        submission_id = job.id,
        language = %job.language,
        problem_id = ?job.problem_id,
        test_cases = job.test_cases.len(),
        source_size = job.code.len(),
        "Received job"
    );

    publish_best_effort(
        sink,
        &VerdictEvent::status_update(job.id, JudgeStatus::Judging, Utc::now()),
    )
    .await;

    let verdict = judge.judge(job).await;

    for (idx, outcome) in verdict.per_test_results.iter().enumerate() {
        debug!(
            submission_id = job.id,
            test_num = idx + 1,
            status = %outcome.status,
            execution_ms = ?outcome.execution_time_ms,
            hidden = outcome.is_hidden,
            "Test result"
        );
    }

    let event = VerdictEvent::from_verdict(job.id, &verdict, Utc::now());
    if publish_best_effort(sink, &event).await {
        info!(submission_id = job.id, status = %verdict.final_status, "Verdict published");
    }

    verdict
}

/// Report a payload that could not be decoded into a job
///
/// Without a submission id nobody is listening for the answer, so it is only logged.
pub async fn process_malformed(
    submission_id: Option<i64>,
    error: &str,
    sink: &dyn ResultSink,
) -> Option<Verdict> {
    let Some(submission_id) = submission_id else {
        warn!(error, "Dropping malformed job without submission id");
        return None;
    };

    warn!(submission_id, error, "Malformed job payload");

    let verdict = evaluator::aggregate(
        0,
        Vec::new(),
        Some(StageFailure::System(format!("Malformed job payload: {}", error))),
    );
    let event = VerdictEvent::from_verdict(submission_id, &verdict, Utc::now());
    publish_best_effort(sink, &event).await;

    Some(verdict)
}
