// ez-snapshot/src/backup/db_dump.rs
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::archive::{self, ARCHIVE_EXTENSION, EXPORT_EXTENSION};
use crate::config::DbConnectionProfile;
use crate::errors::{AppError, Result};
use crate::utils::process::{capture_stderr, spawn_tool, wait_for_tool};

/// `<database>_<YYYYmmdd_HHMMSS>.tar.gz`
pub fn archive_file_name(database: &str, at: DateTime<Local>) -> String {
    format!("{}_{}.{}", database, at.format("%Y%m%d_%H%M%S"), ARCHIVE_EXTENSION)
}

/// Name of the single export entry stored inside the archive.
pub fn export_entry_name(database: &str) -> String {
    format!("{}.{}", database, EXPORT_EXTENSION)
}

/// Dumps the database with `mysqldump` into `<output_dir>/<database>_<timestamp>.tar.gz`.
///
/// The dump is first drained into a temporary file while mysqldump runs; once the tool
/// has exited the final size is known and the file is packed into the archive.
pub async fn dump_database(
    profile: &DbConnectionProfile,
    mysqldump: &Path,
    output_dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    tracing::info!(database = %profile.database, host = %profile.host, "starting mysqldump");

    let temp_dump = tempfile::Builder::new()
        .prefix("mysqldump-")
        .suffix(".sql")
        .tempfile()
        .map_err(|e| AppError::stream("create temporary dump file", e))?;
    let temp_file = temp_dump
        .reopen()
        .map_err(|e| AppError::stream("open temporary dump file", e))?;

    let mut args = profile.client_args();
    args.push(profile.database.clone());

    let mut child = spawn_tool("mysqldump", mysqldump, &args, Stdio::null(), Stdio::piped())?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::tool("mysqldump", "stdout was not captured"))?;
    let stderr = capture_stderr(&mut child);

    let drain = tokio::spawn(async move {
        let mut file = tokio::fs::File::from_std(temp_file);
        let copied = tokio::io::copy(&mut stdout, &mut file).await?;
        file.flush().await?;
        Ok::<u64, std::io::Error>(copied)
    });

    wait_for_tool("mysqldump", &mut child, stderr, cancel).await?;
    let dumped = match drain.await {
        Ok(result) => result.map_err(|e| AppError::stream("write mysqldump output to temp file", e))?,
        Err(e) => return Err(AppError::stream("mysqldump drain task", e)),
    };
    tracing::info!(bytes = dumped, "mysqldump finished");

    let archive_path = output_dir.join(archive_file_name(&profile.database, Local::now()));
    let entry_name = export_entry_name(&profile.database);
    let dest = archive_path.clone();
    // temp_dump moves into the blocking task and is deleted when it finishes.
    tokio::task::spawn_blocking(move || {
        archive::write_single_entry_archive(temp_dump.path(), &dest, &entry_name)
    })
    .await
    .map_err(|e| AppError::stream("archive task", e))??;

    Ok(archive_path)
}
