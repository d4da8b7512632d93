pub(crate) mod archive; // Single-entry tar.gz writer and export-entry scanner
pub(crate) mod db_dump; // mysqldump -> temp file -> archive

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{AppConfig, DbConnectionProfile};
use crate::errors;
use crate::restore::{db_restore, schema_reset};
use crate::storage::{ByteStream, StorageRepository};
use crate::utils::ToolPaths;

/// What the restore workflow needs from a database: dump it, reload it, empty it.
#[async_trait]
pub trait DatabaseBackup: Send + Sync {
    /// Writes a compressed archive of the live database and returns its local path.
    async fn dump(&self, cancel: &CancellationToken) -> errors::Result<PathBuf>;

    /// Streams the export entry of `archive` into the database.
    async fn restore(&self, cancel: &CancellationToken, archive: ByteStream) -> errors::Result<()>;

    /// Drops every table of the database. An empty database is a no-op.
    async fn drop_all_tables(&self, cancel: &CancellationToken) -> errors::Result<()>;
}

/// `DatabaseBackup` backed by the MySQL command-line client tools.
#[derive(Debug, Clone)]
pub struct MySqlBackup {
    profile: DbConnectionProfile,
    tools: ToolPaths,
    output_dir: PathBuf,
}

impl MySqlBackup {
    pub fn new(profile: DbConnectionProfile, tools: ToolPaths, output_dir: PathBuf) -> Self {
        Self {
            profile,
            tools,
            output_dir,
        }
    }
}

#[async_trait]
impl DatabaseBackup for MySqlBackup {
    async fn dump(&self, cancel: &CancellationToken) -> errors::Result<PathBuf> {
        db_dump::dump_database(&self.profile, &self.tools.mysqldump, &self.output_dir, cancel).await
    }

    async fn restore(&self, cancel: &CancellationToken, archive: ByteStream) -> errors::Result<()> {
        db_restore::restore_from_archive(&self.profile, &self.tools.mysql, archive, cancel).await
    }

    async fn drop_all_tables(&self, cancel: &CancellationToken) -> errors::Result<()> {
        schema_reset::drop_all_tables(&self.profile, &self.tools.mysql, cancel).await
    }
}

/// A completed backup as recorded after upload.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub id: Uuid,
    pub created_at: DateTime<Local>,
    pub name: String,
    pub path: String,
    pub size: u64,
}

/// Public entry point for the backup process: dump, upload, then drop the local archive
/// unless the configuration asks to keep it.
pub async fn run_backup_flow(
    app_config: &AppConfig,
    backup: &dyn DatabaseBackup,
    storage: &dyn StorageRepository,
    cancel: &CancellationToken,
) -> Result<BackupRecord> {
    let dump_path = backup.dump(cancel).await.context("Database dump failed")?;
    println!("✅ Dump created at {}", dump_path.display());

    let name = dump_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .context("Dump path has no file name")?;
    let file = tokio::fs::File::open(&dump_path)
        .await
        .with_context(|| format!("Failed to open dump archive {}", dump_path.display()))?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat dump archive {}", dump_path.display()))?
        .len();

    println!("Uploading {} ({} bytes) to file storage...", name, size);
    let remote_path = storage
        .upload(cancel, &name, Box::new(file))
        .await
        .with_context(|| format!("Upload of {} failed", name))?;

    let record = BackupRecord {
        id: Uuid::new_v4(),
        created_at: Local::now(),
        name,
        path: remote_path,
        size,
    };
    tracing::info!(
        id = %record.id,
        name = %record.name,
        path = %record.path,
        created_at = %record.created_at,
        size = record.size,
        "backup recorded"
    );

    if !app_config.keep_local_archives {
        tokio::fs::remove_file(&dump_path)
            .await
            .with_context(|| format!("Failed to remove local archive {}", dump_path.display()))?;
    }

    Ok(record)
}
