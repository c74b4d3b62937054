// Compiler Stage - builds the submission inside the sandbox before any test runs

use crate::config::LanguageConfig;
use crate::sandbox::Sandbox;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

/// Fixed wall clock budget for compilation
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    /// Interpreted language, nothing to build
    Skipped,
    Succeeded { compilation_time_ms: u64 },
    /// Compiler rejected the source; carries the diagnostic for the user
    Failed { diagnostic: String },
}

/// Run the language's compile command, if it has one
///
/// An Err means the sandbox itself failed, not the user's code.
#[tracing::instrument(skip(sandbox, language), fields(language = %language.name))]
pub async fn compile(sandbox: &Sandbox, language: &LanguageConfig) -> Result<CompileOutcome> {
    let Some(command) = language.compile_command.as_deref() else {
        return Ok(CompileOutcome::Skipped);
    };

    let output = sandbox
        .exec(command, COMPILE_TIMEOUT)
        .await
        .context("Failed to run compiler in sandbox")?;

    let compilation_time_ms = output.wall_time.as_millis() as u64;

    if output.timed_out {
        warn!(compilation_time_ms, "Compilation timed out");
        return Ok(CompileOutcome::Failed {
            diagnostic: "Compilation timeout".to_string(),
        });
    }

    if !output.succeeded() {
        // Most compilers report on stderr; fall back to stdout for the rest
        let diagnostic = if output.stderr.trim().is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        warn!(
            compilation_time_ms,
            exit_code = ?output.exit_code,
            error_preview = diagnostic.lines().next().unwrap_or(""),
            "Compilation failed"
        );
        return Ok(CompileOutcome::Failed { diagnostic });
    }

    info!(compilation_time_ms, "Compilation succeeded");
    Ok(CompileOutcome::Succeeded { compilation_time_ms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfigManager;
    use crate::sandbox::SandboxSpec;
    use crate::testing::{exit, ok, timed_out, FakeProvider};
    use judge_common::types::Language;
    use std::sync::Arc;

    async fn sandbox(provider: Arc<FakeProvider>) -> Sandbox {
        let spec = SandboxSpec {
            image: "gcc:11".to_string(),
            memory_limit_mb: 256,
            cpu_quota: 1.0,
            network_disabled: true,
            privileges_dropped: true,
            workspace_mount: std::env::temp_dir(),
        };
        Sandbox::acquire(provider, &spec).await.unwrap()
    }

    fn language(lang: Language) -> LanguageConfig {
        LanguageConfigManager::builtin().get_config(&lang).unwrap().clone()
    }

    #[tokio::test]
    async fn test_interpreted_language_skips() {
        let provider = Arc::new(FakeProvider::new(|_| panic!("nothing should execute")));
        let sandbox = sandbox(provider.clone()).await;

        let outcome = compile(&sandbox, &language(Language::Python)).await.unwrap();
        sandbox.release().await;

        assert_eq!(outcome, CompileOutcome::Skipped);
        assert!(provider.execs().is_empty());
    }

    #[tokio::test]
    async fn test_successful_compile() {
        let provider = Arc::new(FakeProvider::new(|_| Ok(ok(""))));
        let sandbox = sandbox(provider.clone()).await;

        let outcome = compile(&sandbox, &language(Language::Cpp)).await.unwrap();
        sandbox.release().await;

        assert!(matches!(outcome, CompileOutcome::Succeeded { .. }));
        let execs = provider.execs();
        assert_eq!(execs.len(), 1);
        assert!(execs[0].command.starts_with("g++"));
        assert_eq!(execs[0].timeout, COMPILE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_compile_error_keeps_stderr() {
        let provider = Arc::new(FakeProvider::new(|_| {
            Ok(exit(1, "main.cpp:3:5: error: expected ';'"))
        }));
        let sandbox = sandbox(provider.clone()).await;

        let outcome = compile(&sandbox, &language(Language::Cpp)).await.unwrap();
        sandbox.release().await;

        assert_eq!(
            outcome,
            CompileOutcome::Failed {
                diagnostic: "main.cpp:3:5: error: expected ';'".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_compile_error_falls_back_to_stdout() {
        let provider = Arc::new(FakeProvider::new(|_| {
            let mut output = exit(2, "");
            output.stdout = "Main.java:1: error: class expected".to_string();
            Ok(output)
        }));
        let sandbox = sandbox(provider.clone()).await;

        let outcome = compile(&sandbox, &language(Language::Java)).await.unwrap();
        sandbox.release().await;

        assert_eq!(
            outcome,
            CompileOutcome::Failed {
                diagnostic: "Main.java:1: error: class expected".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_compile_timeout() {
        let provider = Arc::new(FakeProvider::new(|_| Ok(timed_out(COMPILE_TIMEOUT))));
        let sandbox = sandbox(provider.clone()).await;

        let outcome = compile(&sandbox, &language(Language::Rust)).await.unwrap();
        sandbox.release().await;

        assert_eq!(
            outcome,
            CompileOutcome::Failed {
                diagnostic: "Compilation timeout".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_sandbox_failure_is_an_error() {
        let provider = Arc::new(FakeProvider::new(|_| anyhow::bail!("exec create failed")));
        let sandbox = sandbox(provider.clone()).await;

        let result = compile(&sandbox, &language(Language::Go)).await;
        sandbox.release().await;

        assert!(result.is_err());
    }
}
