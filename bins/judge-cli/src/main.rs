mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use judge_common::config::RedisSettings;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "judge-cli")]
#[command(about = "Judge CLI - Submit code and follow verdicts", long_about = None)]
struct Cli {
    /// Queue to push submissions to (defaults to JUDGE_QUEUE or judge_queue)
    #[arg(long, global = true)]
    queue: Option<String>,

    /// Channel verdicts are published on (defaults to JUDGE_CHANNEL or submission_updates)
    #[arg(long, global = true)]
    channel: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a source file for judging
    Submit {
        /// Source file to judge
        file: PathBuf,

        /// JSON array of test cases
        #[arg(short, long)]
        tests: PathBuf,

        /// Language name (inferred from the file extension if omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// Submission id (defaults to the current time in milliseconds)
        #[arg(long)]
        id: Option<i64>,

        /// Per-test time limit in milliseconds
        #[arg(long)]
        time_limit: Option<u64>,

        /// Memory limit in MB
        #[arg(long)]
        memory_limit: Option<u64>,

        /// Wait for and print the verdict
        #[arg(short, long, default_value = "false")]
        wait: bool,
    },

    /// Print status updates and verdicts as they are published
    Watch {
        /// Only show this submission and exit after its verdict
        #[arg(short, long)]
        submission_id: Option<i64>,
    },

    /// List supported languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = RedisSettings::from_env();
    if let Some(queue) = cli.queue {
        settings.queue = queue;
    }
    if let Some(channel) = cli.channel {
        settings.channel = channel;
    }

    match cli.command {
        Commands::Submit {
            file,
            tests,
            language,
            id,
            time_limit,
            memory_limit,
            wait,
        } => {
            commands::submit(
                &settings,
                commands::SubmitArgs {
                    source: &file,
                    tests: &tests,
                    language: language.as_deref(),
                    id,
                    time_limit_ms: time_limit,
                    memory_limit_mb: memory_limit,
                    wait,
                },
            )
            .await?;
        }
        Commands::Watch { submission_id } => {
            commands::watch(&settings, submission_id).await?;
        }
        Commands::Languages => {
            commands::list_languages();
        }
    }

    Ok(())
}
