pub mod dependency_check;
pub(crate) mod process;
#[cfg(test)]
pub(crate) mod test_support;

use anyhow::{Context, Result};
use std::path::PathBuf;
use which::which;

/// Resolved locations of the MySQL client tools.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub mysql: PathBuf,
    pub mysqldump: PathBuf,
}

impl ToolPaths {
    pub fn discover() -> Result<Self> {
        Ok(ToolPaths {
            mysql: find_mysql_executable()?,
            mysqldump: find_mysqldump_executable()?,
        })
    }
}

/// Finds the mysql executable in the system PATH.
pub fn find_mysql_executable() -> Result<PathBuf> {
    which("mysql").context("mysql executable not found in PATH. Please ensure MySQL client tools are installed and in your PATH.")
}

/// Finds the mysqldump executable in the system PATH.
pub fn find_mysqldump_executable() -> Result<PathBuf> {
    which("mysqldump").context("mysqldump executable not found in PATH. Please ensure MySQL client tools are installed and in your PATH.")
}
