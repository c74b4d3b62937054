/// Docker-based isolation provider
///
/// **Sandbox Rules:**
/// 1. Pulls the language image if it is not present locally
/// 2. Creates a long-lived container per judging pass:
///    - Network disabled
///    - Memory capped (no extra swap), CPU quota enforced, process count capped
///    - All capabilities dropped, no-new-privileges
///    - Job workspace bind-mounted at /workspace
/// 3. Runs each command through `docker exec` under coreutils `timeout`,
///    with a host-side deadline as a backstop; captured output is capped per stream
/// 4. Force-removes the container on destroy; a missing container is not an error

use crate::sandbox::{
    ExecOutput, IsolationProvider, SandboxHandle, SandboxSpec, SANDBOX_WORKDIR,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Exit status coreutils `timeout` uses when the command ran out of time
const TIMEOUT_EXIT_CODE: i64 = 124;
/// 128 + SIGKILL, reported when `timeout -k` had to escalate
const KILLED_EXIT_CODE: i64 = 137;
/// Extra host-side wait past the in-container deadline before giving up on exec
const HOST_DEADLINE_GRACE: Duration = Duration::from_secs(2);
/// Keep-alive for the idle container; commands arrive through exec
const CONTAINER_LIFETIME_SECS: u64 = 3600;
const CPU_PERIOD_US: i64 = 100_000;
/// Smallest CFS quota the kernel accepts
const MIN_CPU_QUOTA_US: i64 = 1_000;
/// Processes and threads per sandbox
const PIDS_LIMIT: i64 = 256;
/// Captured bytes kept per stream; the rest is drained and dropped
const MAX_CAPTURED_BYTES: usize = 16 * 1024 * 1024;

pub struct DockerSandbox {
    docker: Docker,
}

impl DockerSandbox {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                debug!(container_id, "Container already gone");
                Ok(())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove container {}", container_id))
            }
        }
    }
}

/// Docker reads a memory limit of 0 as unlimited, so 0 is rejected along with overflow
fn memory_bytes(limit_mb: u64) -> Result<i64> {
    i64::try_from(limit_mb)
        .ok()
        .and_then(|mb| mb.checked_mul(1024 * 1024))
        .filter(|bytes| *bytes > 0)
        .with_context(|| format!("Memory limit of {} MB is out of range", limit_mb))
}

fn cpu_quota_us(cpu_quota: f64) -> Result<i64> {
    let quota = (cpu_quota * CPU_PERIOD_US as f64) as i64;
    if quota < MIN_CPU_QUOTA_US {
        bail!(
            "CPU quota {} is below the minimum of {}",
            cpu_quota,
            MIN_CPU_QUOTA_US as f64 / CPU_PERIOD_US as f64
        );
    }
    Ok(quota)
}

fn container_config(spec: &SandboxSpec, mount_source: &str) -> Result<Config<String>> {
    let memory_bytes = memory_bytes(spec.memory_limit_mb)?;

    let mut host_config = bollard::models::HostConfig {
        memory: Some(memory_bytes),
        memory_swap: Some(memory_bytes),
        cpu_period: Some(CPU_PERIOD_US),
        cpu_quota: Some(cpu_quota_us(spec.cpu_quota)?),
        pids_limit: Some(PIDS_LIMIT),
        binds: Some(vec![format!("{}:{}:rw", mount_source, SANDBOX_WORKDIR)]),
        ..Default::default()
    };

    if spec.network_disabled {
        host_config.network_mode = Some("none".to_string());
    }
    if spec.privileges_dropped {
        host_config.cap_drop = Some(vec!["ALL".to_string()]);
        host_config.security_opt = Some(vec!["no-new-privileges".to_string()]);
    }

    Ok(Config {
        image: Some(spec.image.clone()),
        cmd: Some(vec!["sleep".to_string(), CONTAINER_LIFETIME_SECS.to_string()]),
        working_dir: Some(SANDBOX_WORKDIR.to_string()),
        network_disabled: Some(spec.network_disabled),
        host_config: Some(host_config),
        ..Default::default()
    })
}

/// Exec output gathered as raw bytes, decoded once the stream ends
///
/// Frames can split a UTF-8 sequence, so nothing is decoded per frame.
#[derive(Debug)]
struct OutputCollector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    cap: usize,
    truncated: bool,
}

/// Append what fits under `cap`; returns true if anything was dropped
fn append_capped(buf: &mut Vec<u8>, bytes: &[u8], cap: usize) -> bool {
    let take = cap.saturating_sub(buf.len()).min(bytes.len());
    buf.extend_from_slice(&bytes[..take]);
    take < bytes.len()
}

impl OutputCollector {
    fn new(cap: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, frame: LogOutput) {
        let dropped = match frame {
            LogOutput::StdOut { message } => append_capped(&mut self.stdout, &message, self.cap),
            LogOutput::StdErr { message } => append_capped(&mut self.stderr, &message, self.cap),
            _ => false,
        };
        self.truncated |= dropped;
    }

    fn finish(self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
        )
    }
}

/// Single-quote a string for `sh -c`
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wrap a command so the kernel side enforces the deadline
fn wrap_with_timeout(command: &str, timeout: Duration) -> String {
    format!(
        "timeout -k 1s {:.3}s sh -c {}",
        timeout.as_secs_f64(),
        shell_quote(command)
    )
}

/// Did `timeout` stop the command?
fn is_timeout_exit(exit_code: Option<i64>, wall_time: Duration, timeout: Duration) -> bool {
    match exit_code {
        Some(TIMEOUT_EXIT_CODE) => true,
        // SIGKILL also comes from the OOM killer; only the deadline escalation counts
        Some(KILLED_EXIT_CODE) => wall_time >= timeout,
        _ => false,
    }
}

#[async_trait]
impl IsolationProvider for DockerSandbox {
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle> {
        self.ensure_image(&spec.image).await.with_context(|| {
            format!("Failed to ensure Docker image '{}' is available", spec.image)
        })?;

        let mount_source = spec.workspace_mount.canonicalize().with_context(|| {
            format!("Workspace {} is not accessible", spec.workspace_mount.display())
        })?;
        let mount_source = mount_source.to_string_lossy();

        let container_name = format!("judge-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let config = container_config(spec, &mount_source)?;
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;

        // A container that fails to start is removed here so callers never see it
        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(cleanup) = self.remove(&container.id).await {
                warn!(
                    container_id = %container.id,
                    error = %cleanup,
                    "Failed to remove unstarted container"
                );
            }
            return Err(e).context("Failed to start Docker container");
        }

        debug!(container_id = %container.id, name = %container_name, "Container started");
        Ok(SandboxHandle { id: container.id })
    }

    async fn exec(
        &self,
        sandbox: &SandboxHandle,
        command: &str,
        workdir: &str,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let exec_config = CreateExecOptions {
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                wrap_with_timeout(command, timeout),
            ]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(workdir.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&sandbox.id, exec_config)
            .await
            .context("Failed to create exec")?;

        let start_time = Instant::now();

        let execution_future = async {
            let start_config = StartExecOptions {
                detach: false,
                ..Default::default()
            };
            let output = self.docker.start_exec(&exec.id, Some(start_config)).await?;

            let mut collector = OutputCollector::new(MAX_CAPTURED_BYTES);

            if let StartExecResults::Attached { mut output, .. } = output {
                while let Some(msg) = output.next().await {
                    collector.push(msg?);
                }
            }

            if collector.truncated {
                warn!(
                    container_id = %sandbox.id,
                    cap_bytes = MAX_CAPTURED_BYTES,
                    "Exec output truncated"
                );
            }

            let inspect = self.docker.inspect_exec(&exec.id).await?;
            let (stdout, stderr) = collector.finish();
            Ok::<_, anyhow::Error>((stdout, stderr, inspect.exit_code))
        };

        match tokio::time::timeout(timeout + HOST_DEADLINE_GRACE, execution_future).await {
            Ok(Ok((stdout, stderr, exit_code))) => {
                let wall_time = start_time.elapsed();
                Ok(ExecOutput {
                    timed_out: is_timeout_exit(exit_code, wall_time, timeout),
                    exit_code,
                    stdout,
                    stderr,
                    wall_time,
                })
            }
            Ok(Err(e)) => Err(e).context("Exec failed"),
            Err(_) => {
                // `timeout -k` inside the container has already killed the command;
                // stop waiting on the stream
                warn!(
                    container_id = %sandbox.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Exec missed host deadline"
                );
                Ok(ExecOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    wall_time: start_time.elapsed(),
                    timed_out: true,
                })
            }
        }
    }

    async fn destroy(&self, sandbox: &SandboxHandle) -> Result<()> {
        self.remove(&sandbox.id).await
    }
}
