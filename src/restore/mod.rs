pub(crate) mod db_restore; // Streams an archived export into mysql
pub(crate) mod logic; // Restore state machine
pub(crate) mod schema_reset; // Drops all tables before a restore

use anyhow::{Context, Result, bail};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::backup::DatabaseBackup;
use crate::config::AppConfig;
use crate::storage::{BackupObject, StorageRepository};
use logic::RestoreOrchestrator;

/// Public entry point for the restore process.
///
/// With no `key`, the stored backups are listed and the user picks one by index. An empty
/// listing is not an error: there is simply nothing to restore.
pub async fn run_restore_flow(
    app_config: &AppConfig,
    backup: Arc<dyn DatabaseBackup>,
    storage: Arc<dyn StorageRepository>,
    cancel: &CancellationToken,
    key: Option<String>,
) -> Result<()> {
    let key = match key {
        Some(key) => key,
        None => {
            let objects = storage.list(cancel).await.context("Failed to list backups")?;
            if objects.is_empty() {
                println!("No backup(s) found");
                return Ok(());
            }
            print_backups(&objects);
            let stdin = std::io::stdin();
            select_backup(&objects, &mut stdin.lock())?
        }
    };

    println!("🔄 Restoring {}...", key);
    let orchestrator =
        RestoreOrchestrator::new(backup, storage).keep_local_archive(app_config.keep_local_archives);
    match orchestrator.execute(cancel, &key).await {
        Ok(report) => {
            println!("✅ Safety copy uploaded as {}", report.safety_copy_key);
            println!("✅ Restore of {} has been complete", report.restored_key);
            Ok(())
        }
        Err(e) => {
            if e.is_destructive() {
                println!(
                    "⚠️ Tables may already have been dropped. Recover manually from the safety copy (backup_*)."
                );
            }
            Err(e).with_context(|| format!("Restore of {} failed", key))
        }
    }
}

/// Prints the stored backups as `[index]: name`.
pub async fn run_list_flow(storage: &dyn StorageRepository, cancel: &CancellationToken) -> Result<()> {
    let objects = storage.list(cancel).await.context("Failed to list backups")?;
    if objects.is_empty() {
        println!("No backup(s) found");
        return Ok(());
    }
    print_backups(&objects);
    Ok(())
}

pub async fn run_delete_flow(
    storage: &dyn StorageRepository,
    cancel: &CancellationToken,
    key: &str,
) -> Result<()> {
    storage
        .delete(cancel, key)
        .await
        .with_context(|| format!("Failed to delete {}", key))?;
    println!("🗑️ Deleted {}", key);
    Ok(())
}

fn print_backups(objects: &[BackupObject]) {
    for (i, object) in objects.iter().enumerate() {
        tracing::debug!(
            path = %object.path,
            size = object.size,
            mod_time = ?object.mod_time,
            mime_type = ?object.mime_type,
            tier = ?object.tier,
            "backup object"
        );
        println!("[{}]: {}", i, object.name);
    }
}

/// Reads an index from `input` and returns the matching object's path.
fn select_backup(objects: &[BackupObject], input: &mut impl BufRead) -> Result<String> {
    print!("Select backup index: ");
    std::io::stdout().flush().context("Failed to flush stdout")?;

    let mut line = String::new();
    input.read_line(&mut line).context("Failed to read user input")?;
    let index: usize = line
        .trim()
        .parse()
        .with_context(|| format!("'{}' is not a valid index", line.trim()))?;
    match objects.get(index) {
        Some(object) => Ok(object.path.clone()),
        None => bail!("Index {} is out of range (0..{})", index, objects.len()),
    }
}
