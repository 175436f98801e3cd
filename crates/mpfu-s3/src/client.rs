//! Signed S3 requests with retry and backoff.

use crate::credentials::AwsCredentials;
use crate::error::S3Error;
use crate::signing::{object_url, SigV4Signer, EMPTY_PAYLOAD_HASH};
use bytes::Bytes;
use chrono::Utc;
use log::{debug, warn};
use mpfu_core::config::S3Settings;
use mpfu_core::progress::chunk_channel;
use mpfu_core::{FileProgress, UploadError, UploadResult};
use reqwest::{Body, Client, Method};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;

pub struct S3Client {
    http: Client,
    signer: SigV4Signer,
    endpoint: String,
    settings: S3Settings,
    chunk_size: usize,
}

/// Status and body of a completed request.
#[derive(Debug, Clone)]
pub struct S3Response {
    pub status: u16,
    pub body: String,
}

impl S3Client {
    pub fn new(
        credentials: &AwsCredentials,
        region: &str,
        endpoint: &str,
        settings: S3Settings,
        chunk_size: usize,
    ) -> UploadResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("mpfu/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::connect(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            signer: SigV4Signer::new(
                &credentials.access_key_id,
                &credentials.secret_access_key,
                credentials.session_token.as_deref(),
                region,
            ),
            endpoint: endpoint.to_string(),
            settings,
            chunk_size: chunk_size.max(1),
        })
    }

    /// Confirm the bucket exists and is listable.
    pub async fn check_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let mut url = object_url(&self.endpoint, bucket, "")?;
        url.query_pairs_mut()
            .append_pair("list-type", "2")
            .append_pair("max-keys", "1");

        let url = &url;
        let deadline = Duration::from_secs(self.settings.request_timeout_sec.max(1));
        self.with_retry("ListObjectsV2", move || async move {
            let resp = self
                .send(Method::GET, url, EMPTY_PAYLOAD_HASH, None, Some(deadline))
                .await?;
            check_status(resp)
        })
        .await
        .map(|_| ())
    }

    /// PUT `local` as `key`, streaming the body and reporting progress.
    ///
    /// Only connection setup is time-limited; a slow upload runs to the end.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        local: &Path,
        progress: &mut FileProgress<'_>,
    ) -> UploadResult<u64> {
        let url = object_url(&self.endpoint, bucket, key)?;
        let (payload_hash, size) = hash_file(local).await?;
        debug!("PUT {} ({} bytes, sha256 {})", url, size, payload_hash);

        let mut attempt = 0;
        loop {
            let (tx, mut rx) = chunk_channel();
            let body = file_body(local.to_path_buf(), self.chunk_size, tx).await?;
            let send = self.send(Method::PUT, &url, &payload_hash, Some((body, size)), None);
            tokio::pin!(send);

            let result = loop {
                tokio::select! {
                    res = &mut send => break res,
                    Some(chunk) = rx.recv() => progress.advance(chunk),
                }
            };
            while let Ok(chunk) = rx.try_recv() {
                progress.advance(chunk);
            }

            match result.and_then(check_status) {
                Ok(_) => {
                    progress.finish();
                    return Ok(size);
                }
                Err(e) if e.retryable && attempt + 1 < self.settings.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "PUT {} failed (attempt {}/{}): {} - retrying in {}ms",
                        key,
                        attempt + 1,
                        self.settings.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into_transfer_failure()),
            }
        }
    }

    async fn with_retry<F, Fut>(&self, operation: &str, mut call: F) -> Result<S3Response, S3Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<S3Response, S3Error>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.retryable && attempt + 1 < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "S3 {} failed (attempt {}/{}): {} - retrying in {}ms",
                        operation,
                        attempt + 1,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &url::Url,
        payload_hash: &str,
        body: Option<(Body, u64)>,
        deadline: Option<Duration>,
    ) -> Result<S3Response, S3Error> {
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host_header(url));
        let signed = self
            .signer
            .sign(method.as_str(), url, &headers, payload_hash, Utc::now())?;

        let mut req = self.http.request(method, url.clone());
        for (key, value) in &signed {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some((body, len)) = body {
            req = req.header(reqwest::header::CONTENT_LENGTH, len).body(body);
        }
        if let Some(deadline) = deadline {
            req = req.timeout(deadline);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(S3Response { status, body })
    }

    /// Exponential backoff capped at `max_delay_ms`.
    fn backoff(&self, attempt: u32) -> u64 {
        let exponential = self
            .settings
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        exponential.min(self.settings.max_delay_ms)
    }
}

fn check_status(resp: S3Response) -> Result<S3Response, S3Error> {
    if (200..300).contains(&resp.status) {
        Ok(resp)
    } else {
        Err(S3Error::parse_xml_error(resp.status, &resp.body))
    }
}

/// `host[:port]` as the signer must see it.
fn host_header(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// SHA-256 and length of a file, read in fixed blocks.
async fn hash_file(path: &Path) -> UploadResult<(String, u64)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| UploadError::transfer(format!("Cannot open {}: {}", path.display(), e)))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| UploadError::transfer(format!("Read of {} failed: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Streaming request body that reports each chunk as it is handed to the
/// connection.
async fn file_body(path: PathBuf, chunk_size: usize, tx: UnboundedSender<u64>) -> UploadResult<Body> {
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| UploadError::transfer(format!("Cannot open {}: {}", path.display(), e)))?;

    let stream = futures::stream::unfold((file, tx), move |(mut file, tx)| async move {
        let mut buf = vec![0u8; chunk_size];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                let _ = tx.send(n as u64);
                Some((Ok::<Bytes, std::io::Error>(Bytes::from(buf)), (file, tx)))
            }
            Err(e) => Some((Err(e), (file, tx))),
        }
    });
    Ok(Body::wrap_stream(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::sha256_hex;

    fn client(settings: S3Settings) -> S3Client {
        let creds = AwsCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        };
        S3Client::new(&creds, "us-east-1", "http://127.0.0.1:9", settings, 4).unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let c = client(S3Settings {
            base_delay_ms: 100,
            max_delay_ms: 350,
            ..Default::default()
        });
        assert_eq!(c.backoff(0), 100);
        assert_eq!(c.backoff(1), 200);
        assert_eq!(c.backoff(2), 350);
        assert_eq!(c.backoff(40), 350);
    }

    #[test]
    fn host_header_keeps_port() {
        let url = url::Url::parse("http://localhost:9000/b/k").unwrap();
        assert_eq!(host_header(&url), "localhost:9000");
        let url = url::Url::parse("https://s3.amazonaws.com/b/k").unwrap();
        assert_eq!(host_header(&url), "s3.amazonaws.com");
    }

    #[test]
    fn non_success_status_parses_error_body() {
        let err = check_status(S3Response {
            status: 404,
            body: "<Error><Code>NoSuchBucket</Code><Message>gone</Message></Error>".into(),
        })
        .unwrap_err();
        assert_eq!(err.code, "NoSuchBucket");
    }

    #[tokio::test]
    async fn hash_matches_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"test").unwrap();
        let (hash, len) = hash_file(&path).await.unwrap();
        assert_eq!(len, 4);
        assert_eq!(hash, sha256_hex(b"test"));
    }

    async fn one_shot_server(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<(String, usize)>) {
        slow_server(status, body, Duration::ZERO).await
    }

    /// Minimal HTTP/1.1 responder: reads one request and its body, waits
    /// `delay`, answers with `status` and `body`. Returns the request head and
    /// body length.
    async fn slow_server(
        status: &'static str,
        body: &'static str,
        delay: Duration,
    ) -> (String, tokio::task::JoinHandle<(String, usize)>) {
        use tokio::io::AsyncWriteExt;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut data = Vec::new();
            let mut buf = [0u8; 4096];
            let head_end = loop {
                let n = sock.read(&mut buf).await.unwrap();
                data.extend_from_slice(&buf[..n]);
                if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&data[..head_end]).to_string();
            let length: usize = head
                .lines()
                .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                .map(|v| v.parse().unwrap())
                .unwrap_or(0);
            while data.len() - head_end < length {
                let n = sock.read(&mut buf).await.unwrap();
                data.extend_from_slice(&buf[..n]);
            }
            tokio::time::sleep(delay).await;
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = sock.write_all(reply.as_bytes()).await;
            (head, data.len() - head_end)
        });
        (endpoint, handle)
    }

    fn local_client(endpoint: &str) -> S3Client {
        local_client_with(
            endpoint,
            S3Settings {
                max_attempts: 1,
                ..Default::default()
            },
        )
    }

    fn local_client_with(endpoint: &str, settings: S3Settings) -> S3Client {
        let creds = AwsCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        };
        S3Client::new(&creds, "us-east-1", endpoint, settings, 4).unwrap()
    }

    fn impatient() -> S3Settings {
        S3Settings {
            max_attempts: 1,
            request_timeout_sec: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn put_streams_file_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();

        let (endpoint, server) = one_shot_server("200 OK", "").await;
        let c = local_client(&endpoint);
        let sink = mpfu_core::SilentProgress;
        let mut progress = FileProgress::new(&sink, 8);

        let sent = c.put_object("reports", "in/report.csv", &path, &mut progress).await.unwrap();
        assert_eq!(sent, 8);
        assert_eq!(progress.transferred_bytes(), 8);

        let (head, body_len) = server.await.unwrap();
        assert!(head.starts_with("PUT /reports/in/report.csv HTTP/1.1"));
        assert!(head.to_ascii_lowercase().contains("authorization: aws4-hmac-sha256"));
        assert_eq!(body_len, 8);
    }

    #[tokio::test]
    async fn missing_bucket_is_protocol_error() {
        let (endpoint, server) = one_shot_server(
            "404 Not Found",
            "<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>",
        )
        .await;
        let err: UploadError = local_client(&endpoint)
            .check_bucket("missing")
            .await
            .unwrap_err()
            .into();
        assert_eq!(err.kind, mpfu_core::UploadErrorKind::Protocol);
        let (head, _) = server.await.unwrap();
        assert!(head.starts_with("GET /missing?"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connect_error() {
        let c = client(S3Settings {
            max_attempts: 1,
            ..Default::default()
        });
        let err: UploadError = c.check_bucket("bucket").await.unwrap_err().into();
        assert_eq!(err.kind, mpfu_core::UploadErrorKind::Connect);
    }

    #[tokio::test]
    async fn slow_put_is_not_cut_off_by_request_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let (endpoint, server) = slow_server("200 OK", "", Duration::from_secs(2)).await;
        let c = local_client_with(&endpoint, impatient());
        let sink = mpfu_core::SilentProgress;
        let mut progress = FileProgress::new(&sink, 10);

        let sent = c.put_object("b", "a.bin", &path, &mut progress).await.unwrap();
        assert_eq!(sent, 10);
        assert_eq!(server.await.unwrap().1, 10);
    }

    #[tokio::test]
    async fn stalled_bucket_check_times_out() {
        let (endpoint, _server) = slow_server("200 OK", "", Duration::from_secs(5)).await;
        let err: UploadError = local_client_with(&endpoint, impatient())
            .check_bucket("b")
            .await
            .unwrap_err()
            .into();
        assert_eq!(err.kind, mpfu_core::UploadErrorKind::Connect);
    }

    #[tokio::test]
    async fn dropped_upload_is_transfer_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, vec![7u8; 256 * 1024]).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
        });

        let c = local_client(&endpoint);
        let sink = mpfu_core::SilentProgress;
        let mut progress = FileProgress::new(&sink, 256 * 1024);
        let err = c.put_object("b", "a.bin", &path, &mut progress).await.unwrap_err();
        server.await.unwrap();
        assert_eq!(err.kind, mpfu_core::UploadErrorKind::Transfer);
    }
}
