// Result sink - where status updates and final verdicts go

use anyhow::{Context, Result};
use async_trait::async_trait;
use judge_common::event::VerdictEvent;
use judge_common::redis as queue;
use redis::aio::ConnectionManager;
use tracing::{debug, error};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, event: &VerdictEvent) -> Result<()>;
}

/// Publishes events on a Redis pub/sub channel
pub struct RedisSink {
    conn: ConnectionManager,
    channel: String,
}

impl RedisSink {
    pub fn new(conn: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            conn,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl ResultSink for RedisSink {
    async fn publish(&self, event: &VerdictEvent) -> Result<()> {
        // ConnectionManager is a cheap handle onto one multiplexed connection
        let mut conn = self.conn.clone();
        queue::publish_event(&mut conn, &self.channel, event)
            .await
            .with_context(|| format!("Failed to publish to channel '{}'", self.channel))?;

        debug!(
            submission_id = event.submission_id,
            status = %event.status,
            channel = %self.channel,
            "Event published"
        );
        Ok(())
    }
}

/// Publish without letting a sink failure reach the caller
///
/// Returns whether the event went out.
pub async fn publish_best_effort(sink: &dyn ResultSink, event: &VerdictEvent) -> bool {
    match sink.publish(event).await {
        Ok(()) => true,
        Err(e) => {
            error!(
                submission_id = event.submission_id,
                status = %event.status,
                error = %format!("{:#}", e),
                "Failed to publish event"
            );
            false
        }
    }
}
