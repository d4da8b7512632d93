// ez-snapshot/src/restore/db_restore.rs
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;

use crate::backup::archive::{self, EXPORT_EXTENSION, ExportEntry};
use crate::config::DbConnectionProfile;
use crate::errors::{AppError, Result};
use crate::storage::ByteStream;
use crate::utils::process::{capture_stderr, spawn_tool, wait_for_tool};

const TOOL_EXIT_GRACE: Duration = Duration::from_millis(500);

/// Streams the `.sql` entry of a tar.gz archive into `mysql <database>`.
///
/// Archive decoding runs on a blocking thread that writes straight into mysql's stdin,
/// so neither the archive nor the export is ever held in memory. mysql is started
/// before the scan begins; when the archive has no `.sql` entry it receives an empty
/// input, and the call still fails with `NotFound` once mysql has exited.
pub async fn restore_from_archive(
    profile: &DbConnectionProfile,
    mysql: &Path,
    archive: ByteStream,
    cancel: &CancellationToken,
) -> Result<()> {
    tracing::info!(database = %profile.database, host = %profile.host, "starting restore");

    let mut args = profile.client_args();
    args.push(profile.database.clone());

    let mut child = spawn_tool("mysql", mysql, &args, Stdio::piped(), Stdio::inherit())?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::tool("mysql", "stdin was not captured"))?;
    let stderr = capture_stderr(&mut child);

    let source = SyncIoBridge::new(archive);
    let sink = SyncIoBridge::new(stdin);
    let mut feeder = tokio::task::spawn_blocking(move || {
        archive::copy_export_entry(source, sink, EXPORT_EXTENSION)
    });

    let fed = tokio::select! {
        joined = &mut feeder => joined,
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to kill cancelled mysql restore: {}", e);
            }
            return Err(AppError::Cancelled("mysql restore was cancelled".to_string()));
        }
    };

    let entry = match fed {
        Ok(Ok(entry)) => entry,
        Ok(Err(feed_err)) => return Err(abort_tool(&mut child, stderr, feed_err).await),
        Err(join_err) => {
            let feed_err = AppError::stream("restore feeder task", join_err);
            return Err(abort_tool(&mut child, stderr, feed_err).await);
        }
    };

    wait_for_tool("mysql", &mut child, stderr, cancel).await?;

    match entry {
        ExportEntry::Found { name, bytes } => {
            tracing::info!(entry = %name, bytes, "restore finished");
            Ok(())
        }
        ExportEntry::Missing => Err(AppError::NotFound(format!(
            "no .{} entry found in archive",
            EXPORT_EXTENSION
        ))),
    }
}

/// Stops mysql after the feed failed so a truncated export is never reported as restored.
/// mysql gets a short grace period to exit on its own first: if it failed by itself
/// (which usually breaks the pipe), its error wins.
async fn abort_tool(
    child: &mut tokio::process::Child,
    stderr: tokio::task::JoinHandle<String>,
    feed_err: AppError,
) -> AppError {
    match tokio::time::timeout(TOOL_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            if status.code().is_some_and(|code| code != 0) {
                let stderr = stderr.await.unwrap_or_default();
                return AppError::tool("mysql", format!("exited with {}: {}", status, stderr));
            }
            feed_err
        }
        Ok(Err(e)) => {
            tracing::warn!("failed waiting for mysql after feed error: {}", e);
            feed_err
        }
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to kill mysql after feed error: {}", e);
            }
            feed_err
        }
    }
}
