//! Runs the cli client as a subprocess.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::ExitStatus,
};

use anyhow::Result;
use thiserror::Error;
use tokio::{process::Command, sync::oneshot};

/// Invokes one executable with varying argument lists.
///
/// Invocations run to completion: there is no timeout and no way to cancel one, so a hung
/// subprocess hangs its caller.
#[derive(Clone, Debug)]
pub struct CommandRunner {
    binary: PathBuf,
}

impl CommandRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Runs the binary with `args`, waits for it to exit and returns its captured output.
    ///
    /// Fails with a [`CommandError`] if the process can't be spawned or exits unsuccessfully.
    pub async fn run<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args = args
            .into_iter()
            .map(|arg| arg.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        tracing::debug!(binary = %self.binary.display(), ?args, "Running command");

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let output = CommandOutput {
            binary: self.binary.clone(),
            args,
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        };
        tracing::trace!(
            status = %output.status,
            stdout = %output.stdout_text(),
            stderr = %output.stderr_text(),
            "Command exited"
        );

        if !output.status.success() {
            return Err(CommandError::NonZeroExit(Box::new(output)).into());
        }
        Ok(output)
    }

    /// Runs the invocation on a background task. The result is delivered through the returned
    /// [`PendingOutput`] once the subprocess exits.
    pub fn spawn<I, S>(&self, args: I) -> PendingOutput
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect::<Vec<_>>();
        let runner = self.clone();
        let (sender, receiver) = oneshot::channel();

        tokio::spawn(async move {
            let result = runner.run(args).await;
            if sender.send(result).is_err() {
                tracing::warn!("The command result was dropped before anyone waited for it");
            }
        });

        PendingOutput { receiver }
    }
}

/// The single-use completion signal of a command running in the background.
#[derive(Debug)]
#[must_use = "the command result is only observable through `wait`"]
pub struct PendingOutput {
    receiver: oneshot::Receiver<Result<CommandOutput>>,
}

impl PendingOutput {
    /// Blocks the calling task until the command completes.
    pub async fn wait(self) -> Result<CommandOutput> {
        self.receiver.await.map_err(|_| {
            anyhow::anyhow!("The command task ended without signalling its completion")
        })?
    }
}

/// The captured result of one cli invocation.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// The invocation as it would be typed in a shell.
    pub fn command_line(&self) -> String {
        std::iter::once(self.binary.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn '{}': {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "'{}' exited with {}\nstdout: {}\nstderr: {}",
        .0.command_line(),
        .0.status,
        .0.stdout_text().trim_end(),
        .0.stderr_text().trim_end()
    )]
    NonZeroExit(Box<CommandOutput>),
}

impl CommandError {
    /// The output captured before the failure, if the process ran at all.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            Self::Spawn { .. } => None,
            Self::NonZeroExit(output) => Some(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stdout_is_captured() {
        // Act
        let output = CommandRunner::new("sh")
            .run(["-c", "echo txHash:0xabc"])
            .await
            .unwrap();

        // Assert
        assert_eq!(output.stdout_text(), "txHash:0xabc\n");
        assert_eq!(output.args, vec!["-c", "echo txHash:0xabc"]);
    }

    #[tokio::test]
    async fn unsuccessful_exits_carry_the_output() {
        // Act
        let error = CommandRunner::new("sh")
            .run(["-c", "echo invalid nonce; exit 3"])
            .await
            .unwrap_err();

        // Assert
        let error = error.downcast::<CommandError>().unwrap();
        let output = error.output().unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout_text(), "invalid nonce\n");
        assert!(error.to_string().contains("invalid nonce"));
    }

    #[tokio::test]
    async fn missing_binaries_fail_to_spawn() {
        // Act
        let error = CommandRunner::new("/nonexistent/anntool")
            .run(["query", "balance"])
            .await
            .unwrap_err();

        // Assert
        assert!(matches!(
            error.downcast_ref::<CommandError>(),
            Some(CommandError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn background_invocations_signal_completion() {
        // Arrange
        let runner = CommandRunner::new("sh");

        // Act
        let pending = runner.spawn(["-c", "sleep 0.1; echo done"]);
        let output = pending.wait().await.unwrap();

        // Assert
        assert_eq!(output.stdout_text().trim(), "done");
    }
}
