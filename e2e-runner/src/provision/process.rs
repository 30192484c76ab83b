//! Running external tools with streamed logs and cancellation.

use e2e_common::{mask_sensitive_command, render_command};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub(crate) enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("`{command}` was killed after cancellation")]
    Canceled { command: String },

    #[error("failed waiting for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub(crate) fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    pub(crate) fn stderr(&self) -> &str {
        match self {
            Self::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A program plus arguments and extra environment, loggable with secrets masked.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl Invocation {
    pub(crate) fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub(crate) fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Rendered command line with sensitive values masked.
    pub(crate) fn display(&self) -> String {
        mask_sensitive_command(&render_command(&self.program, &self.args))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run to completion, streaming output into `debug!` events.
    ///
    /// On cancellation the child is killed and `CommandError::Canceled`
    /// returned. A non-zero exit becomes `CommandError::Failed`.
    pub(crate) async fn output(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let command = self.display();
        debug!("Running {}", command);

        let mut cmd = self.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

        let stdout = child.stdout.take().map(|s| stream_lines(s, "stdout", &self.program));
        let stderr = child.stderr.take().map(|s| stream_lines(s, "stderr", &self.program));

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(CommandError::Canceled { command });
            }
            status = child.wait() => status.map_err(|source| CommandError::Wait {
                command: command.clone(),
                source,
            })?,
        };

        let output = CommandOutput {
            stdout: collect(stdout).await,
            stderr: collect(stderr).await,
        };
        if !status.success() {
            return Err(CommandError::Failed {
                command,
                status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run attached to the caller's terminal.
    pub(crate) async fn interactive(&self, cancel: &CancellationToken) -> Result<(), CommandError> {
        let command = self.display();
        debug!("Running interactively {}", command);

        let mut cmd = self.command();
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(CommandError::Canceled { command });
            }
            status = child.wait() => status.map_err(|source| CommandError::Wait {
                command: command.clone(),
                source,
            })?,
        };
        if !status.success() {
            return Err(CommandError::Failed {
                command,
                status,
                stderr: String::new(),
            });
        }
        Ok(())
    }
}

fn stream_lines<R>(reader: R, stream: &'static str, program: &str) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let program = program.to_string();
    tokio::spawn(async move {
        let mut collected = String::new();
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(program = %program, stream, "{}", line);
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    })
}

async fn collect(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}
