// In-memory isolation provider for tests.
// Records every create/exec/destroy so tests can account for sandbox handles,
// and reads the real input file from the mounted workspace on each exec.

use crate::sandbox::{ExecOutput, IsolationProvider, SandboxHandle, SandboxSpec};
use crate::workspace::INPUT_FILE;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct ExecCall {
    pub sandbox_id: String,
    pub command: String,
    pub workdir: String,
    pub timeout: Duration,
    /// Contents of the workspace input file at the time of the call
    pub input: Option<String>,
}

impl ExecCall {
    pub fn is_test_run(&self) -> bool {
        self.command.contains(INPUT_FILE)
    }
}

type Script = dyn Fn(&ExecCall) -> Result<ExecOutput> + Send + Sync;

#[derive(Default)]
struct FakeState {
    next_id: usize,
    mounts: HashMap<String, PathBuf>,
    specs: Vec<SandboxSpec>,
    created: Vec<String>,
    destroyed: HashMap<String, usize>,
    execs: Vec<ExecCall>,
}

pub(crate) struct FakeProvider {
    script: Box<Script>,
    fail_create: bool,
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new(script: impl Fn(&ExecCall) -> Result<ExecOutput> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            fail_create: false,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::new(|_| Ok(ok("")))
        }
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn specs(&self) -> Vec<SandboxSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    pub fn destroy_count(&self, id: &str) -> usize {
        self.state.lock().unwrap().destroyed.get(id).copied().unwrap_or(0)
    }

    pub fn execs(&self) -> Vec<ExecCall> {
        self.state.lock().unwrap().execs.clone()
    }

    pub fn test_runs(&self) -> Vec<ExecCall> {
        self.execs().into_iter().filter(ExecCall::is_test_run).collect()
    }

    /// Every created sandbox destroyed exactly once, nothing else destroyed
    pub fn assert_all_released(&self) {
        let state = self.state.lock().unwrap();
        for id in &state.created {
            assert_eq!(
                state.destroyed.get(id).copied().unwrap_or(0),
                1,
                "sandbox {} must be destroyed exactly once",
                id
            );
        }
        assert_eq!(state.destroyed.len(), state.created.len(), "destroy of unknown sandbox");
    }
}

#[async_trait]
impl IsolationProvider for FakeProvider {
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle> {
        if self.fail_create {
            bail!("Cannot connect to the Docker daemon");
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.mounts.insert(id.clone(), spec.workspace_mount.clone());
        state.specs.push(spec.clone());
        state.created.push(id.clone());
        Ok(SandboxHandle { id })
    }

    async fn exec(
        &self,
        sandbox: &SandboxHandle,
        command: &str,
        workdir: &str,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let mount = {
            let state = self.state.lock().unwrap();
            if state.destroyed.contains_key(&sandbox.id) {
                bail!("sandbox {} already destroyed", sandbox.id);
            }
            match state.mounts.get(&sandbox.id) {
                Some(mount) => mount.clone(),
                None => bail!("unknown sandbox {}", sandbox.id),
            }
        };

        let call = ExecCall {
            sandbox_id: sandbox.id.clone(),
            command: command.to_string(),
            workdir: workdir.to_string(),
            timeout,
            input: std::fs::read_to_string(mount.join(INPUT_FILE)).ok(),
        };
        self.state.lock().unwrap().execs.push(call.clone());

        (self.script)(&call)
    }

    async fn destroy(&self, sandbox: &SandboxHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        *state.destroyed.entry(sandbox.id.clone()).or_insert(0) += 1;
        Ok(())
    }
}

pub(crate) fn ok(stdout: &str) -> ExecOutput {
    ExecOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
        wall_time: Duration::from_millis(5),
        timed_out: false,
    }
}

pub(crate) fn exit(code: i64, stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
        wall_time: Duration::from_millis(5),
        timed_out: false,
    }
}

pub(crate) fn timed_out(after: Duration) -> ExecOutput {
    ExecOutput {
        exit_code: Some(124),
        stdout: String::new(),
        stderr: String::new(),
        wall_time: after,
        timed_out: true,
    }
}
