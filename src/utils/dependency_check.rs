// ez-snapshot/src/utils/dependency_check.rs
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::storage::StorageRepository;
use crate::utils::ToolPaths;

/// Makes sure the MySQL client tools are installed and the rclone control plane answers.
pub async fn check_dependencies(
    storage: &dyn StorageRepository,
    cancel: &CancellationToken,
) -> Result<ToolPaths> {
    println!("Checking dependencies...");
    let tools = ToolPaths::discover().context("dependency check failed")?;
    println!("✅ mysql found at {}", tools.mysql.display());
    println!("✅ mysqldump found at {}", tools.mysqldump.display());

    println!("Checking rclone connectivity...");
    storage.list(cancel).await.context(
        "rclone rc API is not reachable, run it first using rclone rcd --rc-no-auth --rc-addr=:5572",
    )?;
    println!("✅ rclone server is running");

    Ok(tools)
}
