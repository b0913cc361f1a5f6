//! Seams to the outside world: where candidates and reference photos come from.

use crate::types::Candidate;
use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("reference image {reference} unavailable: {reason}")]
    Unavailable { reference: String, reason: String },
    #[error("reference image {reference} could not be decoded: {source}")]
    Decode {
        reference: String,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("identity directory unreachable: {0}")]
    Unreachable(String),
    #[error("identity directory returned malformed data: {0}")]
    Malformed(String),
}

/// Read-only source of watch-list candidates.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn candidates(&self) -> Result<Vec<Candidate>, DirectoryError>;
}

/// Resolves a reference image URL or path to a decoded image.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<DynamicImage, FetchError>;
}

/// Decode an in-memory image, guessing the format from its magic bytes.
pub fn decode_image(reference: &str, bytes: &[u8]) -> Result<DynamicImage, FetchError> {
    image::load_from_memory(bytes).map_err(|source| FetchError::Decode {
        reference: reference.to_string(),
        source,
    })
}
