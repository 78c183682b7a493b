//! Child-process plumbing for CLI-backed adapters.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Output of a finished child process.
#[derive(Debug, Clone, Default)]
pub(crate) struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (1 if signal-killed).
    pub exit_code: i32,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawn `cmd` with piped output and wait for it, killing it after `limit`.
pub(crate) async fn run_capture(mut cmd: Command, limit: Duration) -> Result<CapturedOutput> {
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().context("Failed to spawn command")?;
    tokio::time::timeout(limit, wait_and_capture(child))
        .await
        .with_context(|| format!("Command did not finish within {}s", limit.as_secs()))?
}

async fn wait_and_capture(mut child: tokio::process::Child) -> Result<CapturedOutput> {
    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_reader = BufReader::new(stderr);
    let mut output = CapturedOutput::default();
    let mut stdout_line = String::new();
    let mut stderr_line = String::new();
    let mut stdout_done = false;
    let mut stderr_done = false;

    // Drain both pipes concurrently so a chatty stderr never blocks stdout.
    while !stdout_done || !stderr_done {
        tokio::select! {
            result = stdout_reader.read_line(&mut stdout_line), if !stdout_done => {
                match result {
                    Ok(0) | Err(_) => stdout_done = true,
                    Ok(_) => {
                        output.stdout.push_str(&stdout_line);
                        stdout_line.clear();
                    }
                }
            }
            result = stderr_reader.read_line(&mut stderr_line), if !stderr_done => {
                match result {
                    Ok(0) | Err(_) => stderr_done = true,
                    Ok(_) => {
                        output.stderr.push_str(&stderr_line);
                        stderr_line.clear();
                    }
                }
            }
        }
    }

    let status = child.wait().await.context("Failed to wait for command")?;
    output.exit_code = status.code().unwrap_or(1);
    Ok(output)
}
