// ez-snapshot/src/backup/archive.rs
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{Builder, Header};

use crate::errors::{AppError, Result};

pub const ARCHIVE_EXTENSION: &str = "tar.gz";
pub const EXPORT_EXTENSION: &str = "sql";

/// Creates a GZipped TAR archive holding exactly one entry: the bytes of `source_file`
/// stored as `entry_name`.
///
/// The tar header must declare the entry size up front, so the source has to be a
/// finished file rather than a stream. A partially written archive is removed on error.
pub fn write_single_entry_archive(
    source_file: &Path,
    archive_dest_path: &Path,
    entry_name: &str,
) -> Result<PathBuf> {
    match build_archive(source_file, archive_dest_path, entry_name) {
        Ok(size) => {
            tracing::info!(
                archive = %archive_dest_path.display(),
                entry = entry_name,
                size,
                "✓ Tar.gz archive created"
            );
            Ok(archive_dest_path.to_path_buf())
        }
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(archive_dest_path) {
                if rm.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(
                        "Failed to remove partial archive {}: {}",
                        archive_dest_path.display(),
                        rm
                    );
                }
            }
            Err(e)
        }
    }
}

fn build_archive(source_file: &Path, archive_dest_path: &Path, entry_name: &str) -> Result<u64> {
    let source = File::open(source_file)
        .map_err(|e| AppError::stream(&format!("open {}", source_file.display()), e))?;
    let size = source
        .metadata()
        .map_err(|e| AppError::stream(&format!("stat {}", source_file.display()), e))?
        .len();

    let archive_file = File::create(archive_dest_path).map_err(|e| {
        AppError::stream(&format!("create archive {}", archive_dest_path.display()), e)
    })?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    let mut header = Header::new_gnu();
    header.set_size(size);
    header.set_mode(0o600);
    header.set_mtime(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    );
    tar_builder
        .append_data(&mut header, entry_name, source)
        .map_err(|e| AppError::stream(&format!("append {} to archive", entry_name), e))?;

    let encoder = tar_builder
        .into_inner()
        .map_err(|e| AppError::stream("finish tar stream", e))?;
    let mut archive_file = encoder
        .finish()
        .map_err(|e| AppError::stream("finish gzip stream", e))?;
    archive_file
        .flush()
        .map_err(|e| AppError::stream("flush archive", e))?;
    Ok(size)
}

/// Result of scanning an archive for the database export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEntry {
    Found { name: String, bytes: u64 },
    Missing,
}

/// Decodes a tar.gz stream entry by entry and copies the body of the first entry whose
/// name ends in `.{extension}` into `sink`. Scanning stops at that entry.
///
/// `sink` is flushed and dropped before returning, so a pipe behind it sees end-of-stream
/// whether or not an entry was found.
pub fn copy_export_entry<R: Read, W: Write>(
    source: R,
    mut sink: W,
    extension: &str,
) -> Result<ExportEntry> {
    let mut archive = tar::Archive::new(GzDecoder::new(source));
    let entries = archive
        .entries()
        .map_err(|e| AppError::stream("read archive", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| AppError::stream("decode archive entry", e))?;
        let name = entry
            .path()
            .map_err(|e| AppError::stream("read archive entry name", e))?
            .to_string_lossy()
            .to_string();

        if Path::new(&name).extension().and_then(|e| e.to_str()) != Some(extension) {
            tracing::debug!(entry = %name, "skipping archive entry");
            continue;
        }

        let bytes = io::copy(&mut entry, &mut sink)
            .map_err(|e| AppError::stream(&format!("copy {} from archive", name), e))?;
        sink.flush()
            .map_err(|e| AppError::stream(&format!("flush {}", name), e))?;
        return Ok(ExportEntry::Found { name, bytes });
    }

    Ok(ExportEntry::Missing)
}
