// CLI commands for talking to a running judge
use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use judge_common::config::RedisSettings;
use judge_common::event::VerdictEvent;
use judge_common::redis as queue;
use judge_common::types::{Language, Limits, SubmissionJob, TestCase};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Everything `submit` needs besides the Redis settings
pub struct SubmitArgs<'a> {
    pub source: &'a Path,
    pub tests: &'a Path,
    pub language: Option<&'a str>,
    pub id: Option<i64>,
    pub time_limit_ms: Option<u64>,
    pub memory_limit_mb: Option<u64>,
    pub wait: bool,
}

/// Guess the language from a source file extension
pub fn language_from_extension(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "py" => Some(Language::Python),
        "cpp" | "cc" | "cxx" => Some(Language::Cpp),
        "java" => Some(Language::Java),
        "js" | "mjs" => Some(Language::Javascript),
        "go" => Some(Language::Go),
        "rs" => Some(Language::Rust),
        _ => None,
    }
}

fn resolve_language(source: &Path, name: Option<&str>) -> Result<Language> {
    match name {
        Some(name) => Language::from_name(name).with_context(|| {
            let known: Vec<_> = Language::ALL.iter().map(|l| l.as_str()).collect();
            format!("Unknown language '{}' (known: {})", name, known.join(", "))
        }),
        None => language_from_extension(source).with_context(|| {
            format!("Cannot infer language from {}; pass --language", source.display())
        }),
    }
}

/// Parse a test file: a JSON array of `{input_data, expected_output, is_hidden?}`
pub fn parse_tests(content: &str) -> Result<Vec<TestCase>> {
    serde_json::from_str(content).context("Failed to parse test cases")
}

fn default_submission_id() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Build the job that would be enqueued
pub fn build_job(args: &SubmitArgs<'_>) -> Result<SubmissionJob> {
    let language = resolve_language(args.source, args.language)?;

    let code = fs::read_to_string(args.source)
        .with_context(|| format!("Failed to read {}", args.source.display()))?;
    let tests = fs::read_to_string(args.tests)
        .with_context(|| format!("Failed to read {}", args.tests.display()))?;

    Ok(SubmissionJob {
        id: args.id.unwrap_or_else(default_submission_id),
        code,
        language,
        test_cases: parse_tests(&tests)?,
        problem_id: None,
        limits: Limits {
            time_limit_ms: args.time_limit_ms,
            memory_limit_mb: args.memory_limit_mb,
        },
    })
}

/// One line per event, plus the verdict summary for terminal ones
pub fn format_event(event: &VerdictEvent) -> String {
    let mut line = format!(
        "[{}] #{} {}",
        event.judged_at.format("%H:%M:%S"),
        event.submission_id,
        event.status
    );

    if let Some(result) = &event.result {
        line.push_str(&format!(
            " ({}/{} passed, avg {:.1} ms)",
            result.passed_tests, result.total_tests, result.execution_time
        ));
        for (idx, test) in result.test_results.iter().enumerate() {
            let time = test
                .execution_time
                .map(|t| format!("{} ms", t))
                .unwrap_or_else(|| "-".to_string());
            let hidden = if test.hidden { " (hidden)" } else { "" };
            line.push_str(&format!(
                "\n    test {:>3}: {:<22} {}{}",
                idx + 1,
                test.status,
                time,
                hidden
            ));
        }
        if let Some(message) = &result.message {
            line.push_str(&format!("\n    message: {}", message));
        }
    }

    line
}

fn is_terminal(event: &VerdictEvent) -> bool {
    event.judge_status().map_or(event.result.is_some(), |s| s.is_terminal())
}

async fn open_pubsub(settings: &RedisSettings) -> Result<redis::aio::PubSub> {
    let client = redis::Client::open(settings.url.as_str())?;
    let mut pubsub = client
        .get_async_connection()
        .await
        .context("Failed to connect to Redis")?
        .into_pubsub();
    pubsub.subscribe(&settings.channel).await?;
    Ok(pubsub)
}

/// Print events for one or all submissions
async fn follow(
    mut pubsub: redis::aio::PubSub,
    submission_id: Option<i64>,
    stop_on_terminal: bool,
) -> Result<()> {
    let mut messages = Box::pin(pubsub.on_message());

    while let Some(msg) = messages.next().await {
        let payload: String = msg.get_payload()?;
        let event: VerdictEvent = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                eprintln!("⚠️  Skipping unreadable event: {}", e);
                continue;
            }
        };

        if submission_id.is_some_and(|id| id != event.submission_id) {
            continue;
        }

        println!("{}", format_event(&event));

        if stop_on_terminal && is_terminal(&event) {
            return Ok(());
        }
    }

    bail!("Subscription closed before a verdict arrived")
}

/// Enqueue a submission, optionally waiting for its verdict
pub async fn submit(settings: &RedisSettings, args: SubmitArgs<'_>) -> Result<()> {
    let job = build_job(&args)?;

    // Subscribe before pushing so a fast verdict is not missed
    let pubsub = if args.wait {
        Some(open_pubsub(settings).await?)
    } else {
        None
    };

    let client = redis::Client::open(settings.url.as_str())?;
    let mut conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    queue::push_job(&mut conn, &settings.queue, &job).await?;

    println!(
        "🚀 Submitted #{} ({}, {} test(s)) to '{}'",
        job.id,
        job.language,
        job.test_cases.len(),
        settings.queue
    );

    if let Some(pubsub) = pubsub {
        println!("⏳ Waiting for verdict on '{}'...", settings.channel);
        follow(pubsub, Some(job.id), true).await?;
    }

    Ok(())
}

/// Stream events from the updates channel
pub async fn watch(settings: &RedisSettings, submission_id: Option<i64>) -> Result<()> {
    let pubsub = open_pubsub(settings).await?;
    println!("📡 Listening on '{}' (Ctrl-C to stop)", settings.channel);
    follow(pubsub, submission_id, submission_id.is_some()).await
}

pub fn list_languages() {
    println!("📋 Supported Languages:\n");
    for language in Language::ALL {
        println!("  {}", language);
    }
    println!("\n✅ Total: {} language(s)", Language::ALL.len());
}
