// ez-snapshot/src/restore/schema_reset.rs
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::DbConnectionProfile;
use crate::errors::{AppError, Result};
use crate::utils::process::{capture_stderr, spawn_tool, wait_for_tool};

/// Drops every table in the target database in one `mysql` invocation.
///
/// Foreign key checks are switched off for the batch because the drop order is not
/// derived from the constraint graph. A failure part-way through leaves whatever the
/// server already dropped; nothing is re-created.
pub async fn drop_all_tables(
    profile: &DbConnectionProfile,
    mysql: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let tables = list_tables(profile, mysql, cancel).await?;
    if tables.is_empty() {
        tracing::info!(database = %profile.database, "no tables to drop");
        return Ok(());
    }

    tracing::info!(database = %profile.database, count = tables.len(), "dropping tables");
    let batch = build_drop_batch(&tables);

    let mut args = profile.client_args();
    args.push(profile.database.clone());
    let mut child = spawn_tool("mysql", mysql, &args, Stdio::piped(), Stdio::inherit())?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::tool("mysql", "stdin was not captured"))?;
    let stderr = capture_stderr(&mut child);

    let writer = tokio::spawn(async move {
        stdin.write_all(batch.as_bytes()).await?;
        stdin.shutdown().await
    });

    wait_for_tool("mysql", &mut child, stderr, cancel)
        .await
        .map_err(|e| match e {
            AppError::ToolInvocation { tool, detail } => {
                AppError::tool(tool, format!("failed to drop tables: {}", detail))
            }
            other => other,
        })?;
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(AppError::stream("write drop batch to mysql", e)),
        Err(e) => return Err(AppError::stream("drop batch writer task", e)),
    }

    tracing::info!(database = %profile.database, count = tables.len(), "✓ tables dropped");
    Ok(())
}

/// Runs `SHOW TABLES` without column headers and returns one name per output line.
async fn list_tables(
    profile: &DbConnectionProfile,
    mysql: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let mut args = profile.client_args();
    args.extend([
        "-N".to_string(),
        "-B".to_string(),
        "-e".to_string(),
        "SHOW TABLES".to_string(),
        profile.database.clone(),
    ]);

    let mut child = spawn_tool("mysql", mysql, &args, Stdio::null(), Stdio::piped())?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::tool("mysql", "stdout was not captured"))?;
    let stderr = capture_stderr(&mut child);
    let reader = tokio::spawn(async move {
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.map(|_| out)
    });

    wait_for_tool("mysql", &mut child, stderr, cancel)
        .await
        .map_err(|e| match e {
            AppError::ToolInvocation { tool, detail } => {
                AppError::tool(tool, format!("failed to list tables: {}", detail))
            }
            other => other,
        })?;
    let output = match reader.await {
        Ok(result) => result.map_err(|e| AppError::stream("read table list", e))?,
        Err(e) => return Err(AppError::stream("table list reader task", e)),
    };

    Ok(parse_table_list(&output))
}

fn parse_table_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn build_drop_batch(tables: &[String]) -> String {
    let mut sql = String::from("SET FOREIGN_KEY_CHECKS=0;\n");
    for table in tables {
        sql.push_str(&format!("DROP TABLE IF EXISTS {};\n", quote_identifier(table)));
    }
    sql.push_str("SET FOREIGN_KEY_CHECKS=1;\n");
    sql
}
