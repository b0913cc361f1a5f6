//! In-memory fakes for the directory, fetcher, extractor and alert sink.
//!
//! Reference images are 1×1 pixels whose red channel drives the fake
//! extractor: 0 means no face, 255 means a per-image failure, anything else
//! embeds to `[red / 100.0]`.

use crate::alert::{AlertRecord, AlertSink, SinkError};
use crate::detector::DetectorError;
use crate::extractor::{ExtractError, Extractor};
use crate::source::{DirectoryError, FetchError, IdentityDirectory, ImageFetcher};
use crate::types::{BoundingBox, Candidate, Embedding, ProbeResult};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const NO_FACE: u8 = 0;
pub const BROKEN: u8 = 255;

pub fn pixel(red: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([red, 0, 0])))
}

pub fn candidate(id: &str, reference: Option<&str>) -> Candidate {
    Candidate {
        identity_id: id.into(),
        display_name: format!("Person {id}"),
        contact_email: format!("{id}@example.org"),
        reference_image_ref: reference.map(str::to_string),
    }
}

/// Serves `reference -> red` pixels; unknown references are unavailable.
#[derive(Default)]
pub struct FakeFetcher {
    pub images: HashMap<String, u8>,
    pub calls: AtomicUsize,
    /// When set, every fetch waits this long first.
    pub delay: Option<Duration>,
}

impl FakeFetcher {
    pub fn with(images: &[(&str, u8)]) -> Self {
        Self {
            images: images.iter().map(|(r, v)| (r.to_string(), *v)).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, reference: &str) -> Result<DynamicImage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.images
            .get(reference)
            .map(|&red| pixel(red))
            .ok_or_else(|| FetchError::Unavailable {
                reference: reference.to_string(),
                reason: "404 Not Found".into(),
            })
    }
}

#[derive(Default)]
pub struct FakeExtractor {
    pub calls: AtomicUsize,
    pub down: AtomicBool,
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, image: DynamicImage) -> Result<ProbeResult, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(ExtractError::EngineUnavailable);
        }
        let red = image.to_rgb8().get_pixel(0, 0)[0];
        match red {
            NO_FACE => Ok(ProbeResult::NoFace),
            BROKEN => Err(ExtractError::Detector(DetectorError::InferenceFailed(
                "corrupt tensor".into(),
            ))),
            v => Ok(ProbeResult::Detected {
                embedding: Embedding::new(vec![v as f32 / 100.0]),
                face: BoundingBox {
                    x: 0.0, y: 0.0, width: 1.0, height: 1.0,
                    confidence: 0.99, landmarks: None,
                },
            }),
        }
    }
}

pub struct FakeDirectory {
    pub candidates: Mutex<Result<Vec<Candidate>, String>>,
    pub calls: AtomicUsize,
}

impl FakeDirectory {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates: Mutex::new(Ok(candidates)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, candidates: Result<Vec<Candidate>, String>) {
        *self.candidates.lock().unwrap() = candidates;
    }
}

#[async_trait]
impl IdentityDirectory for FakeDirectory {
    async fn candidates(&self) -> Result<Vec<Candidate>, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.candidates
            .lock()
            .unwrap()
            .clone()
            .map_err(DirectoryError::Unreachable)
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub alerts: Mutex<Vec<AlertRecord>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl AlertSink for MemorySink {
    async fn record(&self, alert: &AlertRecord) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("sink offline".into()));
        }
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}
