mod compiler;
mod config;
mod docker;
mod engine;
mod evaluator;
mod executor;
mod runner;
mod sandbox;
mod sink;
mod workspace;

#[cfg(test)]
mod testing;

use config::JudgeSettings;
use docker::DockerSandbox;
use engine::Judge;
use judge_common::redis::{self as queue, PoppedJob};
use sink::RedisSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, instrument, warn};
use workspace::WorkspaceManager;

/// BLPOP wait; bounds how long a shutdown request can go unnoticed
const POP_TIMEOUT_SECS: f64 = 1.0;
const IDLE_BACKOFF: Duration = Duration::from_millis(200);
const REDIS_ERROR_BACKOFF: Duration = Duration::from_secs(1);

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = JudgeSettings::from_env()?;
    init_tracing(settings.log_json);

    info!("Judge worker booting...");

    let languages = settings.language_table().map_err(|e| {
        error!("Failed to load language configurations: {:#}", e);
        e
    })?;
    info!(languages = ?languages.list_languages(), "Loaded language configurations");

    std::fs::create_dir_all(&settings.workspace_root)?;
    info!(
        workspace_root = %settings.workspace_root.display(),
        timeout_secs = settings.timeout_secs,
        memory_limit_mb = settings.memory_limit_mb,
        cpu_limit = settings.cpu_limit,
        "Judge settings"
    );

    // Connect to Redis
    let client = ::redis::Client::open(settings.redis.url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!(url = %settings.redis.url, queue = %settings.redis.queue, "Connected to Redis");

    let provider = Arc::new(DockerSandbox::connect()?);
    let judge = Judge::new(
        provider,
        languages,
        WorkspaceManager::new(&settings.workspace_root),
        settings.default_limits(),
        settings.cpu_limit,
    );
    let sink = RedisSink::new(redis_conn.clone(), settings.redis.channel.clone());

    // Setup graceful shutdown; the job in flight always finishes
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Received shutdown signal, finishing current job...");
                    shutdown.store(true, Ordering::SeqCst);
                }
                Err(e) => error!(error = %e, "Failed to install CTRL+C signal handler"),
            }
        });
    }

    worker_loop(redis_conn, &settings.redis.queue, &judge, &sink, &shutdown).await;

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip(redis_conn, judge, sink, shutdown))]
async fn worker_loop(
    mut redis_conn: ::redis::aio::ConnectionManager,
    queue_name: &str,
    judge: &Judge,
    sink: &RedisSink,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match queue::pop_job(&mut redis_conn, queue_name, POP_TIMEOUT_SECS).await {
            Ok(Some(PoppedJob::Job(job))) => {
                executor::process_job(&job, judge, sink).await;
            }
            Ok(Some(PoppedJob::Malformed { submission_id, error })) => {
                executor::process_malformed(submission_id, &error, sink).await;
            }
            Ok(None) => {
                // Queue empty - check for shutdown
                tokio::time::sleep(IDLE_BACKOFF).await;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(REDIS_ERROR_BACKOFF).await;
            }
        }
    }
}
