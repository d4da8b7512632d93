//! MySQL snapshot tool
//!
//! Backs a database up to an rclone remote and restores it from a stored snapshot

// ez-snapshot/src/main.rs
mod backup;
mod config;
mod errors;
mod restore;
mod storage;
mod utils;

use anyhow::{Context, Result};
use backup::{DatabaseBackup, MySqlBackup};
use config::AppConfig;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use storage::StorageRepository;
use storage::rclone::RcloneStorage;
use tokio_util::sync::CancellationToken;

const CONFIG_ENV_VAR: &str = "EZ_SNAPSHOT_CONFIG";

/// Main entry point for the snapshot tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Backup,
    Restore(Option<String>),
    List,
    Delete(String),
    Help,
}

fn parse_command(args: &[String]) -> Result<Command> {
    let name = args.first().map(|a| a.trim().trim_start_matches("--")).unwrap_or("");
    let operand = args.get(1).map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
    match name {
        "1" | "backup" => Ok(Command::Backup),
        "2" | "restore" => Ok(Command::Restore(operand)),
        "3" | "list" => Ok(Command::List),
        "4" | "delete" => match operand {
            Some(key) => Ok(Command::Delete(key)),
            None => anyhow::bail!("delete needs the key of the backup to remove"),
        },
        "help" | "-h" => Ok(Command::Help),
        other => {
            print_help();
            anyhow::bail!("Invalid operation choice: '{}'", other)
        }
    }
}

async fn run_app() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = if args.is_empty() {
        parse_command(&prompt_choice()?)?
    } else {
        parse_command(&args)?
    };
    if command == Command::Help {
        print_help();
        return Ok(());
    }

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let app_config = AppConfig::load_from_json(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;
    tracing::info!(database = %app_config.db.database, rclone = %app_config.storage.host, "configuration loaded");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n⚠️ Interrupted, cancelling...");
            on_interrupt.cancel();
        }
    });

    let storage: Arc<dyn StorageRepository> = Arc::new(
        RcloneStorage::from_endpoint(app_config.storage.clone())
            .context("Failed to build rclone client")?,
    );
    let tools = utils::dependency_check::check_dependencies(storage.as_ref(), &cancel).await?;
    let backup: Arc<dyn DatabaseBackup> = Arc::new(MySqlBackup::new(
        app_config.db.clone(),
        tools,
        app_config.work_dir.clone(),
    ));

    match command {
        Command::Backup => {
            println!("🚀 Starting Backup Process...");
            let record = backup::run_backup_flow(&app_config, backup.as_ref(), storage.as_ref(), &cancel)
                .await
                .context("Backup process failed")?;
            println!("✅ Backup {} uploaded to {} ({} bytes)", record.id, record.path, record.size);
        }
        Command::Restore(key) => {
            println!("🔄 Starting Restore Process...");
            restore::run_restore_flow(&app_config, backup, storage, &cancel, key)
                .await
                .context("Restore process failed")?;
        }
        Command::List => {
            restore::run_list_flow(storage.as_ref(), &cancel)
                .await
                .context("Listing backups failed")?;
        }
        Command::Delete(key) => {
            restore::run_delete_flow(storage.as_ref(), &cancel, &key)
                .await
                .context("Delete failed")?;
        }
        Command::Help => {}
    }
    Ok(())
}

fn print_help() {
    println!("Usage: ez-snapshot <command>");
    println!("  --backup          Backup database and upload it to the rclone remote");
    println!("  --restore [key]   Restore database from a selected backup");
    println!("  --list            List stored backups");
    println!("  --delete <key>    Delete a stored backup");
    println!("  --help            Show this help");
}

/// Prompts user to select an operation
///
/// Returns the user's choice split into words
fn prompt_choice() -> Result<Vec<String>> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Backup (or type 'restore [key]')");
    println!("3. List Backups (or type 'list')");
    println!("4. Delete Backup (or type 'delete <key>')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.split_whitespace().map(str::to_string).collect())
}
