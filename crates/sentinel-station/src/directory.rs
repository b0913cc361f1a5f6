//! Identity directory backends: a JSON file or a JSON HTTP endpoint.
//!
//! Both accept either a bare array of candidates or `{"candidates": [...]}`.

use async_trait::async_trait;
use sentinel_core::{Candidate, DirectoryError, IdentityDirectory};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Bare(Vec<Candidate>),
    Wrapped { candidates: Vec<Candidate> },
}

impl Listing {
    fn into_candidates(self) -> Vec<Candidate> {
        match self {
            Listing::Bare(c) | Listing::Wrapped { candidates: c } => c,
        }
    }
}

fn parse_listing(bytes: &[u8]) -> Result<Vec<Candidate>, DirectoryError> {
    serde_json::from_slice::<Listing>(bytes)
        .map(Listing::into_candidates)
        .map_err(|e| DirectoryError::Malformed(e.to_string()))
}

pub struct FileDirectory {
    path: PathBuf,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl IdentityDirectory for FileDirectory {
    async fn candidates(&self) -> Result<Vec<Candidate>, DirectoryError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| DirectoryError::Unreachable(format!("{}: {e}", self.path.display())))?;
        let candidates = parse_listing(&bytes)?;
        tracing::debug!(path = %self.path.display(), count = candidates.len(), "loaded watch-list file");
        Ok(candidates)
    }
}

pub struct HttpDirectory {
    client: reqwest::Client,
    url: String,
}

impl HttpDirectory {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl IdentityDirectory for HttpDirectory {
    async fn candidates(&self) -> Result<Vec<Candidate>, DirectoryError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;
        let candidates = parse_listing(&body)?;
        tracing::debug!(url = %self.url, count = candidates.len(), "fetched watch-list");
        Ok(candidates)
    }
}

pub fn is_http(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Pick a backend for `source`: URLs go over HTTP, anything else is a file path.
pub fn open(source: &str, client: reqwest::Client) -> Arc<dyn IdentityDirectory> {
    if is_http(source) {
        Arc::new(HttpDirectory::new(client, source))
    } else {
        Arc::new(FileDirectory::new(source.strip_prefix("file://").unwrap_or(source)))
    }
}
