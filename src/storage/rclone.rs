// ez-snapshot/src/storage/rclone.rs
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{BackupObject, ByteStream, StorageRepository};
use crate::config::StorageEndpoint;
use crate::errors::{AppError, Result};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
// Chunks in flight between the reader task and the HTTP body.
const UPLOAD_CHANNEL_DEPTH: usize = 4;

#[derive(Debug, Deserialize)]
struct PublicLinkResponse {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    list: Vec<BackupObject>,
}

/// Storage backed by an rclone remote-control server (`rclone rcd`).
#[derive(Debug, Clone)]
pub struct RcloneStorage {
    endpoint: StorageEndpoint,
    client: Client,
}

impl RcloneStorage {
    pub fn new(endpoint: StorageEndpoint, client: Client) -> Self {
        Self { endpoint, client }
    }

    pub fn from_endpoint(endpoint: StorageEndpoint) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::new(endpoint, client))
    }

    fn operation_url(&self, operation: &str) -> Result<Url> {
        let mut url = self.endpoint.host.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AppError::Config(format!("rclone host is not a base URL: {}", self.endpoint.host))
            })?
            .pop_if_empty()
            .extend(["operations", operation]);
        Ok(url)
    }

    fn operation(&self, operation: &str, remote: &str) -> Result<RequestBuilder> {
        let url = self.operation_url(operation)?;
        Ok(self
            .client
            .post(url)
            .query(&[("fs", self.endpoint.fs.as_str()), ("remote", remote)]))
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        request: RequestBuilder,
        what: &str,
    ) -> Result<Response> {
        tokio::select! {
            response = request.send() => response
                .map_err(|e| AppError::Transport(format!("{} request failed: {}", what, e))),
            _ = cancel.cancelled() => Err(AppError::Cancelled(format!("{} request was cancelled", what))),
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Transport(format!("failed to read {} response: {}", what, e)))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Turns a non-2xx response into a transport error carrying the response body.
async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Transport(format!("{} failed ({}): {}", what, status, body.trim())))
}

/// Copies `reader` into a bounded channel on its own task and returns the receiving end
/// as a request body. A read error is forwarded into the body so the request fails
/// instead of completing with a truncated payload.
fn spawn_body_writer(
    reader: ByteStream,
) -> (Body, tokio::task::JoinHandle<Result<u64>>) {
    let (tx, mut rx) = mpsc::channel::<std::io::Result<Bytes>>(UPLOAD_CHANNEL_DEPTH);

    let writer = tokio::spawn(async move {
        let mut chunks = ReaderStream::with_capacity(reader, UPLOAD_CHUNK_SIZE);
        let mut written = 0u64;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    let len = bytes.len() as u64;
                    if tx.send(Ok(bytes)).await.is_err() {
                        // The request is gone; its own error explains why.
                        return Ok(written);
                    }
                    written += len;
                }
                Err(e) => {
                    let message = e.to_string();
                    let _ = tx.send(Err(e)).await;
                    return Err(AppError::stream("reading upload source", message));
                }
            }
        }
        Ok(written)
    });

    let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
    (Body::wrap_stream(stream), writer)
}

#[async_trait]
impl StorageRepository for RcloneStorage {
    async fn upload(&self, cancel: &CancellationToken, key: &str, reader: ByteStream) -> Result<String> {
        tracing::info!(key, fs = %self.endpoint.fs, remote = %self.endpoint.remote, "uploading backup");

        let (body, mut writer) = spawn_body_writer(reader);
        let part = Part::stream(body)
            .file_name(key.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file0", part);
        let request = self
            .operation("uploadfile", &self.endpoint.remote)?
            .multipart(form);

        let response = self.send(cancel, request, "upload").await;
        let joined = tokio::select! {
            joined = &mut writer => joined,
            _ = cancel.cancelled() => {
                writer.abort();
                return Err(AppError::Cancelled("upload request was cancelled".to_string()));
            }
        };
        let written = match joined {
            Ok(result) => result?,
            Err(e) => return Err(AppError::stream("upload body task", e)),
        };
        ensure_success(response?, "upload").await?;

        tracing::info!(key, bytes = written, "upload complete");
        Ok(key.to_string())
    }

    async fn download(&self, cancel: &CancellationToken, key: &str) -> Result<ByteStream> {
        tracing::info!(key, "requesting public link");
        let request = self.operation("publiclink", key)?;
        let response = self.send(cancel, request, "publiclink").await?;
        let response = ensure_success(response, "publiclink").await?;
        let link: PublicLinkResponse = Self::read_json(response, "publiclink").await?;

        if link.url.is_empty() {
            return Err(AppError::NotFound(format!(
                "publiclink returned empty url for {}",
                key
            )));
        }

        let request = self.client.get(&link.url);
        let response = self.send(cancel, request, "download").await?;
        let response = ensure_success(response, "download").await?;
        tracing::info!(key, content_length = ?response.content_length(), "download started");

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<()> {
        let request = self.operation("deletefile", key)?;
        let response = self.send(cancel, request, "delete").await?;
        ensure_success(response, "delete").await?;
        tracing::info!(key, "deleted remote object");
        Ok(())
    }

    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<BackupObject>> {
        let request = self.operation("list", &self.endpoint.remote)?;
        let response = self.send(cancel, request, "list").await?;
        let response = ensure_success(response, "list").await?;
        let listing: ListResponse = Self::read_json(response, "list").await?;

        let backups: Vec<BackupObject> = listing.list.into_iter().filter(|o| !o.is_dir).collect();
        tracing::debug!(count = backups.len(), "listed remote backups");
        Ok(backups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn storage_for(server: &MockServer) -> RcloneStorage {
        let endpoint = StorageEndpoint {
            host: Url::parse(&server.uri()).expect("mock server uri"),
            fs: "s3:bucket".to_string(),
            remote: "backups".to_string(),
        };
        RcloneStorage::new(endpoint, Client::new())
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "source vanished",
            )))
        }
    }

    #[tokio::test]
    async fn test_upload_empty_reader_returns_key() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/operations/uploadfile"))
            .and(query_param("fs", "s3:bucket"))
            .and(query_param("remote", "backups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let key = storage
            .upload(&CancellationToken::new(), "shop_20240101_000000.tar.gz", Box::new(tokio::io::empty()))
            .await?;

        assert_eq!(key, "shop_20240101_000000.tar.gz");
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_sends_multipart_file() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/operations/uploadfile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let content = b"archive-bytes-0123456789".to_vec();
        storage
            .upload(&CancellationToken::new(), "snap.tar.gz", Box::new(std::io::Cursor::new(content)))
            .await?;

        let requests = server.received_requests().await.expect("request recording enabled");
        assert_eq!(requests.len(), 1);
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("filename=\"snap.tar.gz\""), "body: {}", body);
        assert!(body.contains("archive-bytes-0123456789"));
        let content_type = requests[0]
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("multipart/form-data"));
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_error_carries_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/operations/uploadfile"))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk quota exceeded"))
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let err = storage
            .upload(&CancellationToken::new(), "a.tar.gz", Box::new(tokio::io::empty()))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Transport(_)));
        assert!(err.to_string().contains("disk quota exceeded"));
    }

    #[tokio::test]
    async fn test_upload_source_failure_is_stream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/operations/uploadfile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let err = storage
            .upload(&CancellationToken::new(), "a.tar.gz", Box::new(FailingReader))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Stream(_)), "unexpected: {:?}", err);
    }

    #[tokio::test]
    async fn test_download_empty_url_skips_second_hop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/operations/publiclink"))
            .and(query_param("remote", "backups/x.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": "" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let err = match storage.download(&CancellationToken::new(), "backups/x.tar.gz").await {
            Ok(_) => panic!("download should fail on an empty url"),
            Err(e) => e,
        };

        assert!(matches!(err, AppError::NotFound(_)));
        assert!(err.to_string().contains("empty url"));
    }

    #[tokio::test]
    async fn test_download_follows_signed_url() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/operations/publiclink"))
            .and(query_param("fs", "s3:bucket"))
            .and(query_param("remote", "backups/x.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": format!("{}/signed/x.tar.gz?sig=abc", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/signed/x.tar.gz"))
            .and(query_param("sig", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"snapshot-content".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let mut stream = storage.download(&CancellationToken::new(), "backups/x.tar.gz").await?;
        let mut content = Vec::new();
        stream.read_to_end(&mut content).await?;

        assert_eq!(content, b"snapshot-content");
        Ok(())
    }

    #[tokio::test]
    async fn test_download_failures_on_either_hop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/operations/publiclink"))
            .and(query_param("remote", "missing.tar.gz"))
            .respond_with(ResponseTemplate::new(404).set_body_string("object not found"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/operations/publiclink"))
            .and(query_param("remote", "expired.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": format!("{}/signed/expired", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/signed/expired"))
            .respond_with(ResponseTemplate::new(403).set_body_string("signature expired"))
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let cancel = CancellationToken::new();

        let first = storage.download(&cancel, "missing.tar.gz").await.err().expect("publiclink 404");
        assert!(matches!(first, AppError::Transport(_)));
        assert!(first.to_string().contains("object not found"));

        let second = storage.download(&cancel, "expired.tar.gz").await.err().expect("signed url 403");
        assert!(matches!(second, AppError::Transport(_)));
        assert!(second.to_string().contains("signature expired"));
    }

    #[tokio::test]
    async fn test_delete() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/operations/deletefile"))
            .and(query_param("remote", "backups/old.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/operations/deletefile"))
            .and(query_param("remote", "locked.tar.gz"))
            .respond_with(ResponseTemplate::new(500).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let cancel = CancellationToken::new();
        storage.delete(&cancel, "backups/old.tar.gz").await?;

        let err = storage.delete(&cancel, "locked.tar.gz").await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_filters_directories() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/operations/list"))
            .and(query_param("fs", "s3:bucket"))
            .and(query_param("remote", "backups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "list": [
                    {
                        "Path": "backups/archive", "Name": "archive", "Size": -1,
                        "MimeType": "inode/directory", "ModTime": "2024-05-01T10:00:00Z",
                        "IsDir": true
                    },
                    {
                        "Path": "backups/shop_20240501_100000.tar.gz",
                        "Name": "shop_20240501_100000.tar.gz", "Size": 2048,
                        "MimeType": "application/gzip",
                        "ModTime": "2024-05-01T10:00:00.123456789Z",
                        "IsDir": false, "Tier": "STANDARD"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let backups = storage.list(&CancellationToken::new()).await?;

        assert_eq!(backups.len(), 1);
        assert!(backups.iter().all(|b| !b.is_dir));
        assert_eq!(backups[0].path, "backups/shop_20240501_100000.tar.gz");
        assert_eq!(backups[0].size, 2048);
        assert_eq!(backups[0].tier.as_deref(), Some("STANDARD"));
        assert!(backups[0].mod_time.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/operations/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "list": [] }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let storage = storage_for(&server);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = storage.list(&cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_cancel_aborts_upload_mid_body() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        let storage = storage_for(&server);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        // An endless source never lets the request finish on its own.
        let endless: ByteStream = Box::new(tokio::io::repeat(0));
        let err = tokio::time::timeout(
            Duration::from_secs(10),
            storage.upload(&cancel, "endless.tar.gz", endless),
        )
        .await?
        .unwrap_err();

        assert!(matches!(err, AppError::Cancelled(_)), "unexpected: {:?}", err);
        Ok(())
    }
}
