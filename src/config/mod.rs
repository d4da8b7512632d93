// ez-snapshot/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_MYSQL_HOST: &str = "localhost";
const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_RCLONE_HOST: &str = "http://localhost:5572";
pub const PASSWORD_ENV_VAR: &str = "EZ_SNAPSHOT_MYSQL_PASSWORD";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonMySqlConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRcloneConfig {
    pub host: Option<String>,
    pub fs: Option<String>,
    pub remote: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub mysql: Option<JsonMySqlConfig>,
    pub rclone: Option<JsonRcloneConfig>,
    pub work_dir: Option<PathBuf>,
    pub keep_local_archives: Option<bool>,
}

/// Connection settings shared by the dump, restore and schema-reset tools.
#[derive(Clone, PartialEq, Eq)]
pub struct DbConnectionProfile {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl DbConnectionProfile {
    /// Connection arguments understood by both `mysql` and `mysqldump`.
    /// The database name is not included; callers append it last.
    pub fn client_args(&self) -> Vec<String> {
        vec![
            "-h".to_string(),
            self.host.clone(),
            "-P".to_string(),
            self.port.to_string(),
            "-u".to_string(),
            self.username.clone(),
            format!("--password={}", self.password),
        ]
    }
}

impl fmt::Debug for DbConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Where backups live: an rclone remote-control server, the rclone filesystem
/// (e.g. `s3:my-bucket`) and the directory used as listing/upload root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEndpoint {
    pub host: Url,
    pub fs: String,
    pub remote: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db: DbConnectionProfile,
    pub storage: StorageEndpoint,
    pub work_dir: PathBuf,
    pub keep_local_archives: bool,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let mut raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        if let Ok(password) = std::env::var(PASSWORD_ENV_VAR) {
            raw_json_config
                .mysql
                .get_or_insert_with(JsonMySqlConfig::default)
                .password = Some(password);
        }

        Self::from_raw(raw_json_config)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let mysql = raw
            .mysql
            .context("mysql section must be set in config.json")?;
        let rclone = raw
            .rclone
            .context("rclone section must be set in config.json")?;

        let username = non_empty(mysql.username)
            .context("mysql.username must be set in config.json")?;
        let database = non_empty(mysql.database)
            .context("mysql.database must be set in config.json")?;
        if database.contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-' && c != '$') {
            anyhow::bail!("Invalid character in mysql.database: {}", database);
        }

        let db = DbConnectionProfile {
            host: non_empty(mysql.host).unwrap_or_else(|| DEFAULT_MYSQL_HOST.to_string()),
            port: mysql.port.unwrap_or(DEFAULT_MYSQL_PORT),
            username,
            password: mysql.password.unwrap_or_default(),
            database,
        };

        let host_str = non_empty(rclone.host).unwrap_or_else(|| DEFAULT_RCLONE_HOST.to_string());
        let host = Url::parse(&host_str)
            .with_context(|| format!("Invalid rclone.host URL: {}", host_str))?;
        if !matches!(host.scheme(), "http" | "https") {
            anyhow::bail!("rclone.host must be an http(s) URL, got {}", host_str);
        }
        let fs = non_empty(rclone.fs).context("rclone.fs must be set in config.json")?;

        Ok(AppConfig {
            db,
            storage: StorageEndpoint {
                host,
                fs,
                remote: rclone.remote.unwrap_or_default(),
            },
            work_dir: raw.work_dir.unwrap_or_else(|| PathBuf::from(".")),
            keep_local_archives: raw.keep_local_archives.unwrap_or(false),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
