pub mod rclone;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;

/// A sequential, forward-only byte source. Dropping it closes the underlying stream.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Metadata of one remote backup object as reported by the control plane's `list` call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupObject {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub mod_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
}

/// Remote object operations used by the backup and restore flows.
///
/// Every call makes exactly one attempt; transport failures and non-2xx answers are
/// returned immediately.
#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// Streams `reader` to the store under `key` and returns the key.
    async fn upload(&self, cancel: &CancellationToken, key: &str, reader: ByteStream) -> Result<String>;

    /// Opens the object's content. The caller owns the returned stream.
    async fn download(&self, cancel: &CancellationToken, key: &str) -> Result<ByteStream>;

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<()>;

    /// Lists file objects under the default remote directory. Directories are never returned.
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<BackupObject>>;
}
