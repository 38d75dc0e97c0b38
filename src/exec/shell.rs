//! Shell-backed command runner.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command as Process};
use tracing::{debug, info};

use crate::error::{CommandError, DeployerError, Result};

use super::command::{CommandOutput, CommandRunner, Invocation};

/// Runs invocations through `sh -c`.
///
/// Output is always captured. When the invocation asks for streaming, each
/// line is also logged as it arrives under the `deployer::command` target.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    /// Creates a new runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let shown = invocation.display();
        debug!("Running: {}", shown);

        let spawn_failed = |e: io::Error| {
            DeployerError::Command(CommandError::SpawnFailed {
                command: shown.to_string(),
                message: e.to_string(),
            })
        };

        let mut process = Process::new("sh");
        process
            .arg("-c")
            .arg(&invocation.line)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .kill_on_drop(true);

        let mut child = process.spawn().map_err(spawn_failed)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let feed = async {
            match (stdin, invocation.stdin.as_deref()) {
                (Some(pipe), Some(input)) => write_stdin(pipe, input).await,
                _ => Ok(()),
            }
        };

        let (_, stdout, stderr) = tokio::try_join!(
            feed,
            collect(stdout, invocation.stream),
            collect(stderr, invocation.stream),
        )
        .map_err(spawn_failed)?;

        let status = child.wait().await.map_err(spawn_failed)?;
        debug!("`{}` finished with {}", shown, status);

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Writes `input` to the child and closes its stdin.
///
/// A broken pipe means the child exited without reading everything and is
/// left for its exit status to report.
async fn write_stdin(mut pipe: ChildStdin, input: &str) -> io::Result<()> {
    let written = async {
        pipe.write_all(input.as_bytes()).await?;
        pipe.shutdown().await
    };
    match written.await {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!("Child closed stdin before reading all input");
            Ok(())
        }
        other => other,
    }
}

/// Reads `pipe` to the end, logging each line when `stream` is set.
async fn collect<R>(pipe: Option<R>, stream: bool) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };

    let mut reader = BufReader::new(pipe);
    let mut captured = String::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if stream {
            info!(target: "deployer::command", "{}", line.trim_end());
        }
        captured.push_str(&line);
    }

    Ok(captured)
}
