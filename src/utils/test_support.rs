// Helpers for tests that stand in for the MySQL client tools.
use std::path::{Path, PathBuf};

use crate::config::DbConnectionProfile;

pub(crate) fn profile() -> DbConnectionProfile {
    DbConnectionProfile {
        host: "127.0.0.1".to_string(),
        port: 3306,
        username: "tester".to_string(),
        password: "pw".to_string(),
        database: "shop".to_string(),
    }
}

/// Writes an executable `/bin/sh` script named `name` into `dir`.
#[cfg(unix)]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> std::io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}
