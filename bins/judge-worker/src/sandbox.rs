/// Isolation Provider - Sandbox Abstraction
///
/// **Contract:**
/// - `create` allocates a resource-bounded, network-isolated sandbox with the
///   job workspace mounted at `/workspace`. A failed create leaves nothing behind.
/// - `exec` runs a shell command inside the sandbox and never blocks past its
///   timeout; a timeout is reported through `ExecOutput::timed_out`.
/// - `destroy` is idempotent.
///
/// The engine never talks to a provider directly for lifetime management: it
/// goes through `Sandbox`, which releases the handle exactly once.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Mount point of the job workspace inside every sandbox
pub const SANDBOX_WORKDIR: &str = "/workspace";

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSpec {
    pub image: String,
    pub memory_limit_mb: u64,
    /// Fraction of one CPU
    pub cpu_quota: f64,
    pub network_disabled: bool,
    pub privileges_dropped: bool,
    /// Host directory bind-mounted at SANDBOX_WORKDIR
    pub workspace_mount: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxHandle {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    /// None when the process never reported an exit code (killed at the deadline)
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub wall_time: Duration,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait IsolationProvider: Send + Sync {
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle>;

    async fn exec(
        &self,
        sandbox: &SandboxHandle,
        command: &str,
        workdir: &str,
        timeout: Duration,
    ) -> Result<ExecOutput>;

    async fn destroy(&self, sandbox: &SandboxHandle) -> Result<()>;
}

/// A live sandbox owned by one judging pass.
///
/// `release` destroys it; if the owner unwinds without releasing, `Drop`
/// schedules the destroy instead. Either way the provider sees one destroy.
pub struct Sandbox {
    provider: Arc<dyn IsolationProvider>,
    handle: SandboxHandle,
    released: bool,
}

impl Sandbox {
    pub async fn acquire(provider: Arc<dyn IsolationProvider>, spec: &SandboxSpec) -> Result<Self> {
        let handle = provider.create(spec).await?;
        debug!(sandbox_id = %handle.id, image = %spec.image, "Sandbox created");
        Ok(Self {
            provider,
            handle,
            released: false,
        })
    }

    pub fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    /// Run a shell command in the workspace directory
    pub async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        self.provider
            .exec(&self.handle, command, SANDBOX_WORKDIR, timeout)
            .await
    }

    /// Destroy the sandbox. Failures are logged, never returned.
    pub async fn release(mut self) {
        self.released = true;
        match self.provider.destroy(&self.handle).await {
            Ok(()) => debug!(sandbox_id = %self.handle.id, "Sandbox destroyed"),
            Err(e) => warn!(sandbox_id = %self.handle.id, error = %e, "Failed to destroy sandbox"),
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Cannot await in Drop; hand the destroy to the runtime if there is one
        let provider = self.provider.clone();
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = provider.destroy(&handle).await {
                        warn!(
                            sandbox_id = %handle.id,
                            error = %e,
                            "Failed to destroy abandoned sandbox"
                        );
                    }
                });
            }
            Err(_) => {
                warn!(
                    sandbox_id = %handle.id,
                    "Sandbox dropped outside a runtime; it was not destroyed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ok, FakeProvider};

    fn spec() -> SandboxSpec {
        SandboxSpec {
            image: "python:3.11-slim".to_string(),
            memory_limit_mb: 256,
            cpu_quota: 0.5,
            network_disabled: true,
            privileges_dropped: true,
            workspace_mount: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn test_release_destroys_once() {
        let provider = Arc::new(FakeProvider::new(|_| Ok(ok(""))));

        let sandbox = Sandbox::acquire(provider.clone(), &spec()).await.unwrap();
        let id = sandbox.handle().id.clone();
        sandbox.release().await;

        assert_eq!(provider.destroy_count(&id), 1);
        provider.assert_all_released();
    }

    #[tokio::test]
    async fn test_drop_without_release_still_destroys() {
        let provider = Arc::new(FakeProvider::new(|_| Ok(ok(""))));

        let sandbox = Sandbox::acquire(provider.clone(), &spec()).await.unwrap();
        let id = sandbox.handle().id.clone();
        drop(sandbox);

        // let the spawned destroy run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(provider.destroy_count(&id), 1);
    }

    #[tokio::test]
    async fn test_exec_uses_workspace_dir() {
        let provider = Arc::new(FakeProvider::new(|call| {
            assert_eq!(call.workdir, SANDBOX_WORKDIR);
            Ok(ok("hi"))
        }));

        let sandbox = Sandbox::acquire(provider.clone(), &spec()).await.unwrap();
        let output = sandbox.exec("echo hi", Duration::from_secs(1)).await.unwrap();
        sandbox.release().await;

        assert!(output.succeeded());
        assert_eq!(output.stdout, "hi");
    }

    #[test]
    fn test_exec_output_succeeded() {
        let mut output = ExecOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(output.succeeded());

        output.timed_out = true;
        assert!(!output.succeeded());

        output.timed_out = false;
        output.exit_code = Some(1);
        assert!(!output.succeeded());
    }
}
