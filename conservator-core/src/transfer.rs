use std::{
    io,
    path::{Path, PathBuf},
};

use futures_util::StreamExt;
use md5::Context;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("download integrity check failed: expected {expected_md5}, got {actual_md5}")]
    IntegrityMismatch {
        expected_md5: String,
        actual_md5: String,
    },
}

/// Moves bytes to and from signed object-storage URLs.
#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    base_url: Url,
}

impl TransferClient {
    pub fn new(base_url: Url) -> Self {
        Self::with_http(Client::new(), base_url)
    }

    pub fn with_http(http: Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// Some deployments hand out signed URLs relative to the service root.
    pub fn resolve(&self, href: &str) -> Result<Url, TransferError> {
        if href.starts_with('/') {
            Ok(self.base_url.join(href)?)
        } else {
            Ok(Url::parse(href)?)
        }
    }

    pub async fn download_to_path(&self, href: &str, target: &Path) -> Result<(), TransferError> {
        self.download_to_path_checked(href, target, None).await
    }

    pub async fn download_to_path_checked(
        &self,
        href: &str,
        target: &Path,
        expected_md5: Option<&str>,
    ) -> Result<(), TransferError> {
        // An interrupted earlier run may have left its partial file behind.
        let partial = partial_path(target);
        match tokio::fs::remove_file(&partial).await {
            Ok(()) => tracing::debug!(path = %partial.display(), "removed stale partial download"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        if let Some(expected) = expected_md5
            && file_md5(target).await?.as_deref() == Some(expected.to_ascii_lowercase().as_str())
        {
            tracing::debug!(path = %target.display(), "already downloaded, skipping");
            return Ok(());
        }

        let url = self.resolve(href)?;
        tracing::debug!(%url, path = %target.display(), "downloading");
        let response = self.http.get(url).send().await?.error_for_status()?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let result = write_stream(response, &partial, expected_md5).await;
        if let Err(err) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }

        tokio::fs::rename(partial, target).await?;
        Ok(())
    }

    pub async fn upload_from_path(
        &self,
        href: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<(), TransferError> {
        let url = self.resolve(href)?;
        tracing::debug!(source = %source.display(), content_type, "uploading");
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();
        let stream = ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);
        self.http
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

async fn write_stream(
    response: reqwest::Response,
    partial: &Path,
    expected_md5: Option<&str>,
) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut stream = response.bytes_stream();
    let mut md5 = Context::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        md5.consume(&chunk);
    }

    file.flush().await?;
    file.sync_all().await?;

    if let Some(expected_md5) = expected_md5 {
        let actual_md5 = format!("{:x}", md5.compute());
        if actual_md5 != expected_md5.to_ascii_lowercase() {
            return Err(TransferError::IntegrityMismatch {
                expected_md5: expected_md5.to_ascii_lowercase(),
                actual_md5,
            });
        }
    }
    Ok(())
}

async fn file_md5(path: &Path) -> Result<Option<String>, TransferError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut ctx = Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        ctx.consume(&buf[..read]);
    }
    Ok(Some(format!("{:x}", ctx.compute())))
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TransferClient {
        TransferClient::new(Url::parse(&server.uri()).unwrap())
    }

    #[tokio::test]
    async fn downloads_file_to_target_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("nested/out.txt");

        client_for(&server)
            .download_to_path(&format!("{}/file", server.uri()), &target)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn relative_urls_resolve_against_base() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/signed/notes.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a,b"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("notes.csv");
        client_for(&server)
            .download_to_path("/signed/notes.csv", &target)
            .await
            .unwrap();

        assert_eq!(std::fs::read(target).unwrap(), b"a,b");
    }

    #[tokio::test]
    async fn uploads_file_contents_with_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(header("content-type", "text/csv"))
            .and(body_bytes(b"payload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("in.csv");
        std::fs::write(&source, b"payload").unwrap();

        client_for(&server)
            .upload_from_path(&format!("{}/upload", server.uri()), &source, "text/csv")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fails_when_md5_does_not_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("bad.txt");

        let err = client_for(&server)
            .download_to_path_checked(&format!("{}/file", server.uri()), &target, Some("deadbeef"))
            .await
            .expect_err("expected md5 mismatch");

        assert!(matches!(err, TransferError::IntegrityMismatch { .. }));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn skips_download_when_local_md5_matches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"changed"))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("cached.txt");
        std::fs::write(&target, b"hello").unwrap();
        let hello_md5 = format!("{:x}", md5::compute(b"hello"));

        client_for(&server)
            .download_to_path_checked(&format!("{}/file", server.uri()), &target, Some(&hello_md5))
            .await
            .unwrap();

        assert_eq!(std::fs::read(target).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn stale_partial_file_is_removed_before_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("clip.mp4");
        std::fs::write(&target, b"hello").unwrap();
        std::fs::write(partial_path(&target), b"interrupt").unwrap();
        let hello_md5 = format!("{:x}", md5::compute(b"hello"));

        client_for(&server)
            .download_to_path_checked(&format!("{}/file", server.uri()), &target, Some(&hello_md5))
            .await
            .unwrap();

        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/expired"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let err = client_for(&server)
            .download_to_path(&format!("{}/expired", server.uri()), &dir.path().join("x"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Request(_)));
    }
}
