use crate::event::VerdictEvent;
use crate::types::SubmissionJob;
use redis::{AsyncCommands, RedisResult};

// Redis queue semantics - shared by the worker and anything that enqueues jobs,
// so producers and consumers never drift on key names or payload shape.
//
// Delivery is at-most-once: jobs are RPUSHed and BLPOPed with no acknowledgement.
// Each payload goes to exactly one popping client; a worker that dies after the
// pop loses that job.

pub const DEFAULT_QUEUE: &str = "judge_queue";
pub const DEFAULT_CHANNEL: &str = "submission_updates";

/// What came off the queue
#[derive(Debug)]
pub enum PoppedJob {
    Job(SubmissionJob),
    /// Payload that did not parse. `submission_id` is recovered when the payload
    /// still carries a numeric `id` / `submission_id`.
    Malformed {
        submission_id: Option<i64>,
        error: String,
    },
}

fn serialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

/// Decode one queue payload
pub fn parse_job(payload: &str) -> PoppedJob {
    match serde_json::from_str::<SubmissionJob>(payload) {
        Ok(job) => PoppedJob::Job(job),
        Err(e) => {
            let submission_id = serde_json::from_str::<serde_json::Value>(payload)
                .ok()
                .and_then(|value| {
                    ["id", "submission_id"]
                        .iter()
                        .find_map(|key| value.get(key).and_then(|id| id.as_i64()))
                });
            PoppedJob::Malformed {
                submission_id,
                error: e.to_string(),
            }
        }
    }
}

/// Push a job to the judge queue
/// Uses RPUSH so that BLPOP consumes in FIFO order
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
    job: &SubmissionJob,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(serialization_error)?;
    conn.rpush(queue, payload).await
}

/// Pop a job from the judge queue
/// Uses BLPOP with a bounded wait so the caller can check for shutdown
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
    timeout_seconds: f64,
) -> RedisResult<Option<PoppedJob>> {
    let result: Option<(String, String)> = conn.blpop(queue, timeout_seconds).await?;
    Ok(result.map(|(_key, payload)| parse_job(&payload)))
}

/// Publish a status or verdict event on the updates channel
pub async fn publish_event(
    conn: &mut redis::aio::ConnectionManager,
    channel: &str,
    event: &VerdictEvent,
) -> RedisResult<()> {
    let payload = serde_json::to_string(event).map_err(serialization_error)?;
    let _receivers: i64 = conn.publish(channel, payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Language;

    #[test]
    fn test_parse_valid_job() {
        let payload = r#"{"id": 5, "code": "x", "language": "cpp",
            "test_cases": [{"input_data": "1", "expected_output": "2"}], "problem_id": 1}"#;

        match parse_job(payload) {
            PoppedJob::Job(job) => {
                assert_eq!(job.id, 5);
                assert_eq!(job.language, Language::Cpp);
                assert_eq!(job.test_cases.len(), 1);
            }
            other => panic!("expected job, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_keeps_id() {
        let payload = r#"{"id": 11, "code": "x", "language": "brainfuck", "test_cases": []}"#;

        match parse_job(payload) {
            PoppedJob::Malformed { submission_id, error } => {
                assert_eq!(submission_id, Some(11));
                assert!(!error.is_empty());
            }
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_alias_id() {
        let payload = r#"{"submission_id": 12, "language": "python"}"#;

        match parse_job(payload) {
            PoppedJob::Malformed { submission_id, .. } => assert_eq!(submission_id, Some(12)),
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_non_numeric_id_falls_back_to_alias() {
        let payload = r#"{"id": "12", "submission_id": 13, "language": "python"}"#;

        match parse_job(payload) {
            PoppedJob::Malformed { submission_id, .. } => assert_eq!(submission_id, Some(13)),
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_garbage() {
        match parse_job("not json at all") {
            PoppedJob::Malformed { submission_id, .. } => assert_eq!(submission_id, None),
            other => panic!("expected malformed, got {:?}", other),
        }
    }
}
