// Workspace Manager - one ephemeral directory per judging pass.
// Holds the source file and the single input file shared by every test run.

use anyhow::{Context, Result};
use judge_common::types::{SubmissionJob, TestCase};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const INPUT_FILE: &str = "input.txt";

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the job directory and write the source under `source_file`
    pub fn prepare(&self, job: &SubmissionJob, source_file: &str) -> Result<Workspace> {
        let dir = self
            .root
            .join(format!("{}-{}", job.id, uuid::Uuid::new_v4().simple()));

        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create workspace {}", dir.display()))?;

        // From here on the directory is owned by the Workspace and removed on drop
        let workspace = Workspace {
            source_path: dir.join(source_file),
            dir,
            removed: false,
        };

        open_permissions(&workspace.dir)?;
        fs::write(&workspace.source_path, &job.code).with_context(|| {
            format!("Failed to write source file {}", workspace.source_path.display())
        })?;

        debug!(submission_id = job.id, path = %workspace.dir.display(), "Workspace prepared");
        Ok(workspace)
    }
}

// The sandbox runs as a different user with every capability dropped, so the
// mounted directory has to be writable by anyone for compilers to emit binaries.
#[cfg(unix)]
fn open_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o777))
        .with_context(|| format!("Failed to set permissions on {}", dir.display()))
}

#[cfg(not(unix))]
fn open_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    source_path: PathBuf,
    removed: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn input_path(&self) -> PathBuf {
        self.dir.join(INPUT_FILE)
    }

    /// Overwrite the shared input file with this test's input
    pub fn write_input(&self, test_case: &TestCase) -> Result<PathBuf> {
        let input_path = self.input_path();
        fs::write(&input_path, &test_case.input_data)
            .with_context(|| format!("Failed to write input file {}", input_path.display()))?;
        Ok(input_path)
    }

    /// Remove the directory tree. Never fails; errors are logged.
    pub fn cleanup(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(path = %self.dir.display(), "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.dir.display(), error = %e, "Failed to remove workspace"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.remove();
    }
}
