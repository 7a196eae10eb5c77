//! This crate supervises the node under test.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use chain_it_common::futures::PollingWaitBehavior;

pub mod process;

use process::{Process, ProcessReadinessWaitBehavior, ProbeFuture, ShutdownPolicy};

/// Resolves an executable the way the suite expects to find it: in the build output directory
/// first and in `$PATH` afterwards. Names containing a path separator are resolved against the
/// current directory.
pub fn resolve_executable(executable: &Path, build_directory: &Path) -> Result<PathBuf> {
    let current_directory =
        std::env::current_dir().context("Failed to read the current directory")?;

    which::which_in(executable, Some(build_directory), &current_directory)
        .or_else(|_| which::which(executable))
        .with_context(|| {
            format!(
                "Cannot find the executable '{}' in '{}' or in $PATH",
                executable.display(),
                build_directory.display()
            )
        })
}

/// The node process supervised for the lifetime of a suite.
#[derive(Debug)]
pub struct NodeProcess {
    executable: PathBuf,
    process: Process,
}

impl NodeProcess {
    const LOG_FILE_PREFIX: &str = "node";

    /// Starts the node and waits until `probe` reports that it answers queries.
    ///
    /// The probe is retried for up to `start_timeout`. A node that exits before its probe succeeds
    /// fails the start immediately.
    pub async fn start(
        executable: &Path,
        args: &[String],
        logs_directory: &Path,
        start_timeout: std::time::Duration,
        shutdown_policy: ShutdownPolicy,
        probe: impl FnMut() -> ProbeFuture + Send + 'static,
    ) -> Result<Self> {
        tracing::info!(
            executable = %executable.display(),
            ?args,
            logs = %logs_directory.display(),
            "Starting the node"
        );

        let mut process = Process::new(
            Self::LOG_FILE_PREFIX,
            logs_directory,
            executable,
            |command| {
                command.args(args);
            },
            shutdown_policy,
        )
        .context("Failed to start the node")?;

        process
            .wait_ready(ProcessReadinessWaitBehavior::TimeBoundedProbe {
                max_wait_duration: start_timeout,
                polling_wait_behavior: PollingWaitBehavior::ExponentialBackoff,
                probe: Box::new(probe),
            })
            .await
            .context("The node did not become ready")?;

        tracing::info!(pid = process.id(), "The node is ready");
        Ok(Self {
            executable: executable.to_path_buf(),
            process,
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn id(&self) -> u32 {
        self.process.id()
    }

    /// Fails if the node has exited since it was started.
    pub fn ensure_running(&mut self) -> Result<()> {
        self.process
            .ensure_running()
            .context("The node is no longer running")
    }
}
