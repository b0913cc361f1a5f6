//! Probe extraction: image in, zero-or-one face embedding out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::ProbeResult;
use async_trait::async_trait;
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("extraction engine is not running")]
    EngineUnavailable,
}

impl ExtractError {
    /// Whether the failure affects every image, not just the one being processed.
    pub fn is_fatal(&self) -> bool {
        match self {
            ExtractError::EngineUnavailable => true,
            ExtractError::Detector(e) => matches!(
                e,
                DetectorError::ModelNotFound(_) | DetectorError::UnexpectedOutputs(_)
            ),
            ExtractError::Recognizer(e) => matches!(e, RecognizerError::ModelNotFound(_)),
        }
    }
}

/// Produces a probe from an image. "No face" is a result, not an error.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, image: DynamicImage) -> Result<ProbeResult, ExtractError>;
}

/// SCRFD + ArcFace pipeline. Sessions need `&mut`, so this is driven from a
/// single owner (see the station's engine thread).
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    pub fn load(detector_path: &Path, recognizer_path: &Path) -> Result<Self, ExtractError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            recognizer: FaceRecognizer::load(recognizer_path)?,
        })
    }

    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// Embed the most confident face in `image`, if any.
    pub fn extract(&mut self, image: &DynamicImage) -> Result<ProbeResult, ExtractError> {
        let rgb = image.to_rgb8();
        let faces = self.detector.detect(&rgb)?;

        let Some(face) = faces.first() else {
            tracing::debug!(width = rgb.width(), height = rgb.height(), "no face detected");
            return Ok(ProbeResult::NoFace);
        };
        if faces.len() > 1 {
            tracing::debug!(
                faces = faces.len(),
                confidence = face.confidence,
                "multiple faces; using the most confident"
            );
        }

        let embedding = self.recognizer.embed(&rgb, face)?;
        Ok(ProbeResult::Detected {
            embedding,
            face: face.clone(),
        })
    }
}
