// ez-snapshot/src/utils/process.rs
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, Result};

/// Spawns `program` with piped stderr. The child is killed if its handle is dropped.
pub(crate) fn spawn_tool(
    tool: &str,
    program: &Path,
    args: &[String],
    stdin: Stdio,
    stdout: Stdio,
) -> Result<Child> {
    tracing::debug!(tool, program = %program.display(), "starting external tool");
    Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::tool(tool, format!("failed to start {}: {}", program.display(), e)))
}

/// Drains a child's stderr in the background so the child never blocks on a full pipe.
pub(crate) fn capture_stderr(child: &mut Child) -> JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        match stderr {
            Some(stderr) => read_lossy(stderr).await,
            None => String::new(),
        }
    })
}

async fn read_lossy<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::warn!("failed to read tool stderr: {}", e);
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}

/// Waits for the child to exit, killing it if `cancel` fires first.
/// A non-zero exit is reported together with whatever the tool wrote to stderr.
pub(crate) async fn wait_for_tool(
    tool: &str,
    child: &mut Child,
    stderr: JoinHandle<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let status = tokio::select! {
        status = child.wait() => status
            .map_err(|e| AppError::tool(tool, format!("failed waiting for process: {}", e)))?,
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                tracing::warn!(tool, "failed to kill cancelled process: {}", e);
            }
            stderr.abort();
            return Err(AppError::Cancelled(format!("{} was cancelled", tool)));
        }
    };

    let stderr = stderr.await.unwrap_or_default();
    if !status.success() {
        let detail = if stderr.is_empty() {
            format!("exited with {}", status)
        } else {
            format!("exited with {}: {}", status, stderr)
        };
        return Err(AppError::tool(tool, detail));
    }
    if !stderr.is_empty() {
        tracing::debug!(tool, "stderr: {}", stderr);
    }
    Ok(())
}
