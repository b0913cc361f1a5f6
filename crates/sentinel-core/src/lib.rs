//! sentinel-core: watch-list face matching engine.
//!
//! Builds a gallery of reference embeddings from an identity directory,
//! extracts probe embeddings (SCRFD detection + ArcFace recognition via
//! ONNX Runtime) and decides match/no-match by nearest Euclidean distance.

pub mod alert;
pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod recognizer;
pub mod session;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

pub use alert::{AlertRecord, AlertSink, AlertStatus, SinkError};
pub use detector::FaceDetector;
pub use extractor::{ExtractError, Extractor, OnnxExtractor};
pub use gallery::{BuildError, BuildReport, GalleryBuilder, SkipReason};
pub use matcher::{
    confidence_from_distance, DistanceMetric, Euclidean, MatchDecision, MatchError, Matcher,
    NearestMatcher, NoMatchReason, DEFAULT_MATCH_THRESHOLD,
};
pub use recognizer::FaceRecognizer;
pub use session::{ScanError, ScanOutcome, ScanSession};
pub use source::{DirectoryError, FetchError, IdentityDirectory, ImageFetcher};
pub use store::GalleryStore;
pub use types::{BoundingBox, Candidate, Embedding, Gallery, GalleryEntry, ProbeResult};

/// Default location of the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/sentinel/models")
}
