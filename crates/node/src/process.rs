use std::{
    fs::{File, OpenOptions},
    io::Write,
    ops::ControlFlow,
    path::{Path, PathBuf},
    pin::Pin,
    process::{Child, Command},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use chain_it_common::futures::{PollingWaitBehavior, poll};

/// The amount of log lines included in startup errors.
const LOG_TAIL_LINES: usize = 20;

/// A wrapper around a long running child process which logs its stdout and stderr to files and
/// kills it when dropped, unless told to leave it running.
#[derive(Debug)]
pub struct Process {
    /// The handle of the child process.
    child: Child,

    /// The file that stdout is being logged to.
    stdout_logs_file: File,

    /// The file that stderr is being logged to.
    stderr_logs_file: File,

    stdout_logs_path: PathBuf,
    stderr_logs_path: PathBuf,

    shutdown_policy: ShutdownPolicy,
}

impl Process {
    /// Spawns the process without waiting for it to become ready.
    pub fn new(
        log_file_prefix: &str,
        logs_directory: impl AsRef<Path>,
        binary_path: impl AsRef<Path>,
        command_building_callback: impl FnOnce(&mut Command),
        shutdown_policy: ShutdownPolicy,
    ) -> Result<Self> {
        let stdout_logs_path = logs_directory
            .as_ref()
            .join(format!("{log_file_prefix}_stdout.log"));
        let stderr_logs_path = logs_directory
            .as_ref()
            .join(format!("{log_file_prefix}_stderr.log"));

        let stdout_logs_file = open_log_file(&stdout_logs_path)
            .context("Failed to open the stdout logs file")?;
        let stderr_logs_file = open_log_file(&stderr_logs_path)
            .context("Failed to open the stderr logs file")?;

        let mut command = Command::new(binary_path.as_ref());
        command_building_callback(&mut command);
        command
            .stdout(
                stdout_logs_file
                    .try_clone()
                    .context("Failed to clone the stdout logs file")?,
            )
            .stderr(
                stderr_logs_file
                    .try_clone()
                    .context("Failed to clone the stderr logs file")?,
            );

        let child = command.spawn().with_context(|| {
            format!("Failed to spawn '{}'", binary_path.as_ref().display())
        })?;
        tracing::debug!(
            pid = child.id(),
            stdout = %stdout_logs_path.display(),
            stderr = %stderr_logs_path.display(),
            "Spawned process"
        );

        Ok(Self {
            child,
            stdout_logs_file,
            stderr_logs_file,
            stdout_logs_path,
            stderr_logs_path,
            shutdown_policy,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Waits until the process is ready according to `behavior`.
    ///
    /// A process that exits while being waited on fails the wait with the tail of its logs.
    pub async fn wait_ready(&mut self, behavior: ProcessReadinessWaitBehavior) -> Result<()> {
        match behavior {
            ProcessReadinessWaitBehavior::NoStartupWait => {}
            ProcessReadinessWaitBehavior::WaitDuration(duration) => {
                tokio::time::sleep(duration).await;
                self.ensure_running()?;
            }
            ProcessReadinessWaitBehavior::TimeBoundedProbe {
                max_wait_duration,
                polling_wait_behavior,
                mut probe,
            } => {
                poll(max_wait_duration, polling_wait_behavior, || {
                    let exited = self.ensure_running();
                    let probe = probe();
                    async move {
                        exited?;
                        Ok(match probe.await {
                            Ok(()) => ControlFlow::Break(()),
                            Err(error) => ControlFlow::Continue(format!("{error:#}")),
                        })
                    }
                })
                .await
                .with_context(|| {
                    format!(
                        "The process did not become ready\n{}",
                        self.log_tails()
                    )
                })?;
            }
        }
        Ok(())
    }

    /// Fails if the child has already exited.
    pub fn ensure_running(&mut self) -> Result<()> {
        match self
            .child
            .try_wait()
            .context("Failed to query the process status")?
        {
            None => Ok(()),
            Some(status) => bail!("The process exited with {status}\n{}", self.log_tails()),
        }
    }

    fn log_tails(&self) -> String {
        format!(
            "stdout tail:\n{}\nstderr tail:\n{}",
            tail(&self.stdout_logs_path),
            tail(&self.stderr_logs_path)
        )
    }

    /// Kills the process now, regardless of the shutdown policy.
    pub fn kill(&mut self) -> Result<()> {
        self.child.kill().context("Failed to kill the process")?;
        self.child
            .wait()
            .context("Failed to reap the killed process")?;
        Ok(())
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        match self.shutdown_policy {
            ShutdownPolicy::Kill => {
                if let Err(error) = self.kill() {
                    tracing::warn!(?error, pid = self.child.id(), "Failed to stop the process");
                }
            }
            ShutdownPolicy::LeaveRunning => {
                tracing::info!(pid = self.child.id(), "Leaving the process running");
            }
        }
        let _ = self.stdout_logs_file.flush();
        let _ = self.stderr_logs_file.flush();
    }
}

/// What happens to the process when its handle is dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShutdownPolicy {
    #[default]
    Kill,
    LeaveRunning,
}

pub type ProbeFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

pub type Probe = Box<dyn FnMut() -> ProbeFuture + Send>;

pub enum ProcessReadinessWaitBehavior {
    /// The process can be used straight away.
    NoStartupWait,

    /// The process is assumed ready after a fixed amount of time.
    WaitDuration(Duration),

    /// The process is ready once the probe succeeds. The probe is retried until it succeeds, the
    /// process exits, or `max_wait_duration` passes.
    TimeBoundedProbe {
        max_wait_duration: Duration,
        polling_wait_behavior: PollingWaitBehavior,
        probe: Probe,
    },
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .create(true)
        .open(path)
}

fn tail(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let lines = contents.lines().collect::<Vec<_>>();
            lines[lines.len().saturating_sub(LOG_TAIL_LINES)..].join("\n")
        }
        Err(error) => format!("<unreadable: {error}>"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use temp_dir::TempDir;

    use super::*;

    fn spawn_sh(logs: &TempDir, script: &str) -> Process {
        let script = script.to_owned();
        Process::new(
            "node",
            logs.path(),
            "sh",
            move |command| {
                command.arg("-c").arg(script);
            },
            ShutdownPolicy::Kill,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn output_is_logged_to_files() {
        // Arrange
        let logs = TempDir::new().unwrap();
        let mut process = spawn_sh(&logs, "echo started; echo warming up >&2; sleep 5");

        // Act
        process
            .wait_ready(ProcessReadinessWaitBehavior::WaitDuration(
                Duration::from_millis(200),
            ))
            .await
            .unwrap();

        // Assert
        let stdout = std::fs::read_to_string(logs.path().join("node_stdout.log")).unwrap();
        let stderr = std::fs::read_to_string(logs.path().join("node_stderr.log")).unwrap();
        assert_eq!(stdout, "started\n");
        assert_eq!(stderr, "warming up\n");
    }

    #[tokio::test]
    async fn probes_are_retried_until_they_succeed() {
        // Arrange
        let logs = TempDir::new().unwrap();
        let mut process = spawn_sh(&logs, "sleep 5");
        let attempts = Arc::new(AtomicUsize::new(0));
        let probe_attempts = attempts.clone();

        // Act
        let result = process
            .wait_ready(ProcessReadinessWaitBehavior::TimeBoundedProbe {
                max_wait_duration: Duration::from_secs(5),
                polling_wait_behavior: PollingWaitBehavior::Constant(Duration::from_millis(10)),
                probe: Box::new(move || -> ProbeFuture {
                    let attempt = probe_attempts.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async move {
                        if attempt < 2 {
                            bail!("connection refused")
                        }
                        Ok(())
                    })
                }),
            })
            .await;

        // Assert
        result.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn processes_exiting_during_startup_fail_the_wait() {
        // Arrange
        let logs = TempDir::new().unwrap();
        let mut process = spawn_sh(&logs, "echo 'Fatal: genesis missing' >&2; exit 2");

        // Act
        let result = process
            .wait_ready(ProcessReadinessWaitBehavior::TimeBoundedProbe {
                max_wait_duration: Duration::from_secs(5),
                polling_wait_behavior: PollingWaitBehavior::Constant(Duration::from_millis(50)),
                probe: Box::new(|| -> ProbeFuture {
                    Box::pin(async { Err::<(), _>(anyhow::anyhow!("connection refused")) })
                }),
            })
            .await;

        // Assert
        let error = format!("{:#}", result.unwrap_err());
        assert!(error.contains("Fatal: genesis missing"), "{error}");
    }
}
