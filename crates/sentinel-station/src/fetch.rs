use async_trait::async_trait;
use image::DynamicImage;
use sentinel_core::source::decode_image;
use sentinel_core::{FetchError, ImageFetcher};
use std::path::{Path, PathBuf};

use crate::directory::is_http;

/// Fetches reference photos over HTTP(S) or from the local filesystem.
///
/// Relative paths are resolved against `base_dir`, normally the directory
/// holding the watch-list file.
pub struct ReferenceFetcher {
    client: reqwest::Client,
    base_dir: Option<PathBuf>,
}

impl ReferenceFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_dir: None,
        }
    }

    pub fn with_base_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.base_dir = dir;
        self
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference.strip_prefix("file://").unwrap_or(reference));
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    async fn download(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        let unavailable = |e: reqwest::Error| FetchError::Unavailable {
            reference: reference.to_string(),
            reason: e.to_string(),
        };
        let response = self
            .client
            .get(reference)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(unavailable)?;
        Ok(response.bytes().await.map_err(unavailable)?.to_vec())
    }
}

#[async_trait]
impl ImageFetcher for ReferenceFetcher {
    async fn fetch(&self, reference: &str) -> Result<DynamicImage, FetchError> {
        let bytes = if is_http(reference) {
            self.download(reference).await?
        } else {
            let path = self.resolve(reference);
            tokio::fs::read(&path).await.map_err(|e| FetchError::Unavailable {
                reference: reference.to_string(),
                reason: format!("{}: {e}", path.display()),
            })?
        };
        tracing::trace!(reference, bytes = bytes.len(), "reference image fetched");

        let owned = reference.to_string();
        tokio::task::spawn_blocking(move || decode_image(&owned, &bytes))
            .await
            .map_err(|e| FetchError::Unavailable {
                reference: reference.to_string(),
                reason: format!("decoder task failed: {e}"),
            })?
    }
}
