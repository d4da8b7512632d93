// ez-snapshot/src/restore/logic.rs
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backup::DatabaseBackup;
use crate::errors::{AppError, Result};
use crate::storage::StorageRepository;

/// Prefix marking the pre-restore dump as a safety copy.
pub const SAFETY_COPY_PREFIX: &str = "backup_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RestoreStage {
    Idle,
    BackingUp,
    Uploading,
    Downloading,
    ResettingSchema,
    Restoring,
    Complete,
    Failed,
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreStage::Idle => "idle",
            RestoreStage::BackingUp => "safety backup",
            RestoreStage::Uploading => "safety upload",
            RestoreStage::Downloading => "snapshot download",
            RestoreStage::ResettingSchema => "schema reset",
            RestoreStage::Restoring => "restore",
            RestoreStage::Complete => "complete",
            RestoreStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A restore failure tagged with the stage it happened in.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct RestoreError {
    pub stage: RestoreStage,
    #[source]
    pub source: AppError,
}

impl RestoreError {
    /// True once tables may already have been dropped.
    pub fn is_destructive(&self) -> bool {
        self.stage >= RestoreStage::ResettingSchema
    }
}

/// Outcome of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub safety_copy_key: String,
    pub restored_key: String,
}

/// Replaces the live database with a stored snapshot.
///
/// Idle → BackingUp → Uploading → Downloading → ResettingSchema → Restoring → Complete.
/// Any step's error moves to `Failed` and is returned tagged with that step. Tables are
/// only dropped once a safety copy is uploaded and the snapshot stream is open; nothing
/// is retried or rolled back.
pub struct RestoreOrchestrator {
    backup: Arc<dyn DatabaseBackup>,
    storage: Arc<dyn StorageRepository>,
    keep_local_archive: bool,
    state: Mutex<RestoreStage>,
}

impl RestoreOrchestrator {
    pub fn new(backup: Arc<dyn DatabaseBackup>, storage: Arc<dyn StorageRepository>) -> Self {
        Self {
            backup,
            storage,
            keep_local_archive: false,
            state: Mutex::new(RestoreStage::Idle),
        }
    }

    pub fn keep_local_archive(mut self, keep: bool) -> Self {
        self.keep_local_archive = keep;
        self
    }

    pub fn state(&self) -> RestoreStage {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, stage: RestoreStage) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        tracing::info!(from = %*state, to = %stage, "restore transition");
        *state = stage;
    }

    fn fail(&self, stage: RestoreStage, source: AppError) -> RestoreError {
        tracing::error!(%stage, error = %source, "restore failed");
        self.enter(RestoreStage::Failed);
        RestoreError { stage, source }
    }

    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        target_key: &str,
    ) -> std::result::Result<RestoreReport, RestoreError> {
        self.enter(RestoreStage::Idle);

        self.enter(RestoreStage::BackingUp);
        let dump_path = self
            .backup
            .dump(cancel)
            .await
            .map_err(|e| self.fail(RestoreStage::BackingUp, e))?;

        self.enter(RestoreStage::Uploading);
        let safety_copy_key = self
            .upload_safety_copy(cancel, &dump_path)
            .await
            .map_err(|e| self.fail(RestoreStage::Uploading, e))?;

        self.enter(RestoreStage::Downloading);
        let snapshot = self
            .storage
            .download(cancel, target_key)
            .await
            .map_err(|e| self.fail(RestoreStage::Downloading, e))?;

        self.enter(RestoreStage::ResettingSchema);
        self.backup
            .drop_all_tables(cancel)
            .await
            .map_err(|e| self.fail(RestoreStage::ResettingSchema, e))?;

        self.enter(RestoreStage::Restoring);
        self.backup
            .restore(cancel, snapshot)
            .await
            .map_err(|e| self.fail(RestoreStage::Restoring, e))?;

        self.enter(RestoreStage::Complete);
        Ok(RestoreReport {
            safety_copy_key,
            restored_key: target_key.to_string(),
        })
    }

    /// Renames the fresh dump to `backup_<name>` and uploads it under that name.
    async fn upload_safety_copy(&self, cancel: &CancellationToken, dump_path: &Path) -> Result<String> {
        let safety_path = safety_copy_path(dump_path)?;
        tokio::fs::rename(dump_path, &safety_path)
            .await
            .map_err(|e| AppError::stream(&format!("rename dump to {}", safety_path.display()), e))?;

        let key = safety_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| AppError::Stream(format!("no file name in {}", safety_path.display())))?;
        let file = tokio::fs::File::open(&safety_path)
            .await
            .map_err(|e| AppError::stream(&format!("open {}", safety_path.display()), e))?;

        let uploaded = self.storage.upload(cancel, &key, Box::new(file)).await?;

        if !self.keep_local_archive {
            if let Err(e) = tokio::fs::remove_file(&safety_path).await {
                tracing::warn!("Failed to remove local safety copy {}: {}", safety_path.display(), e);
            }
        }
        Ok(uploaded)
    }
}

fn safety_copy_path(dump_path: &Path) -> Result<PathBuf> {
    let name = dump_path
        .file_name()
        .ok_or_else(|| AppError::Stream(format!("dump path has no file name: {}", dump_path.display())))?;
    Ok(dump_path.with_file_name(format!("{}{}", SAFETY_COPY_PREFIX, name.to_string_lossy())))
}
