//! Resolving a transport file identifier into bytes on disk.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use contextqa_shared::{ContextQaError, DocumentRef, Result};
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

/// User-Agent string for document downloads.
const USER_AGENT: &str = concat!("ContextQA/", env!("CARGO_PKG_VERSION"));

/// Download timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Writes the document behind a [`DocumentRef`] to a local path.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, document: &DocumentRef, destination: &Path) -> Result<()>;
}

/// Default fetcher: `http(s)` identifiers are downloaded, anything else is
/// treated as a local file path and copied.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: Client,
}

impl SourceFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ContextQaError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn download(&self, url: Url, destination: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ContextQaError::Network(format!("download failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ContextQaError::Network(format!(
                "download returned HTTP {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ContextQaError::Network(format!("download interrupted: {e}")))?;

        tokio::fs::write(destination, &body)
            .await
            .map_err(|e| ContextQaError::io(destination, e))?;
        debug!(bytes = body.len(), "document downloaded");
        Ok(())
    }
}

#[async_trait]
impl DocumentFetcher for SourceFetcher {
    #[instrument(skip(self, destination), fields(file = %document.file_name))]
    async fn fetch(&self, document: &DocumentRef, destination: &Path) -> Result<()> {
        match Url::parse(&document.file_id) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                self.download(url, destination).await
            }
            _ => {
                let source = Path::new(&document.file_id);
                tokio::fs::copy(source, destination)
                    .await
                    .map_err(|e| ContextQaError::staging(format!("cannot read document: {e}")))?;
                debug!("document copied from local path");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(file_id: String) -> DocumentRef {
        DocumentRef {
            file_id,
            media_type: "text/plain".into(),
            file_name: "notes.txt".into(),
        }
    }

    #[tokio::test]
    async fn downloads_http_source() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/files/notes.txt"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("hello index"))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("notes.txt");
        let fetcher = SourceFetcher::new().unwrap();
        fetcher
            .fetch(&doc(format!("{}/files/notes.txt", server.uri())), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello index");
    }

    #[tokio::test]
    async fn http_error_status_is_network_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("notes.txt");
        let err = SourceFetcher::new()
            .unwrap()
            .fetch(&doc(format!("{}/missing", server.uri())), &dest)
            .await
            .unwrap_err();

        assert_eq!(err.reason_code(), "network_error");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn copies_local_path() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source.txt");
        std::fs::write(&source, "local body").unwrap();
        let dest = tmp.path().join("copy.txt");

        SourceFetcher::new()
            .unwrap()
            .fetch(&doc(source.to_string_lossy().into_owned()), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "local body");
    }

    #[tokio::test]
    async fn missing_local_path_is_staging_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = SourceFetcher::new()
            .unwrap()
            .fetch(
                &doc(tmp.path().join("nope.txt").to_string_lossy().into_owned()),
                &tmp.path().join("dest.txt"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "staging_error");
    }
}
