use serde::{Deserialize, Serialize};
use std::collections::btree_map::{BTreeMap, Entry};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace w600k_r50).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// An embedding with no model version attached.
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// A watch-list identity as supplied by the identity directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub identity_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub contact_email: String,
    /// URL or path of the reference photo. Candidates without one are never matchable.
    #[serde(default)]
    pub reference_image_ref: Option<String>,
}

impl Candidate {
    /// The reference image, if present and non-blank.
    pub fn reference(&self) -> Option<&str> {
        self.reference_image_ref
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

/// An identity whose reference photo yielded an embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryEntry {
    pub identity_id: String,
    pub display_name: String,
    pub contact_email: String,
    pub reference_image_ref: String,
    pub embedding: Embedding,
}

/// Read-only snapshot of matchable identities, keyed by identity id.
///
/// Iteration is in ascending identity-id order, independent of the order
/// candidates were processed in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: BTreeMap<String, GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Returns `false` (and keeps the existing entry) if the id is taken.
    pub fn insert(&mut self, entry: GalleryEntry) -> bool {
        match self.entries.entry(entry.identity_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    pub fn get(&self, identity_id: &str) -> Option<&GalleryEntry> {
        self.entries.get(identity_id)
    }

    pub fn contains(&self, identity_id: &str) -> bool {
        self.entries.contains_key(identity_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GalleryEntry> {
        self.entries.values()
    }
}

impl FromIterator<GalleryEntry> for Gallery {
    /// Collect entries; on duplicate ids the first one wins.
    fn from_iter<I: IntoIterator<Item = GalleryEntry>>(iter: I) -> Self {
        let mut gallery = Gallery::new();
        for entry in iter {
            gallery.insert(entry);
        }
        gallery
    }
}

/// Outcome of running the extractor on one image.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeResult {
    /// The most prominent face and its embedding.
    Detected { embedding: Embedding, face: BoundingBox },
    /// No usable face in the image. Not an error.
    NoFace,
}

impl ProbeResult {
    pub fn detected(&self) -> bool {
        matches!(self, ProbeResult::Detected { .. })
    }

    pub fn embedding(&self) -> Option<&Embedding> {
        match self {
            ProbeResult::Detected { embedding, .. } => Some(embedding),
            ProbeResult::NoFace => None,
        }
    }

    pub fn into_embedding(self) -> Option<Embedding> {
        match self {
            ProbeResult::Detected { embedding, .. } => Some(embedding),
            ProbeResult::NoFace => None,
        }
    }
}
