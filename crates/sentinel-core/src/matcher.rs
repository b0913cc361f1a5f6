//! Nearest-neighbour watch-list matching.
//!
//! A probe is compared against every gallery entry; the closest entry is a
//! match only if its distance is strictly below the threshold.

use crate::types::{Gallery, GalleryEntry, ProbeResult};
use serde::Serialize;
use thiserror::Error;

/// Euclidean distance below which two embeddings are the same identity.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch for {identity_id}: probe has {probe}, gallery has {reference}")]
    DimensionMismatch {
        identity_id: String,
        probe: usize,
        reference: usize,
    },
    #[error("model version mismatch for {identity_id}: probe from {probe}, gallery from {reference}")]
    ModelMismatch {
        identity_id: String,
        probe: String,
        reference: String,
    },
    #[error("non-finite distance to {0}: embedding contains NaN or infinity")]
    InvalidEmbedding(String),
}

/// Why a scan did not produce a match.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoMatchReason {
    /// The probe had no face; the gallery was never consulted.
    NoFace,
    /// The gallery is empty or has not been built.
    NoReferenceData,
    /// The closest entry was at or beyond the threshold.
    AboveThreshold {
        nearest_identity_id: String,
        distance: f32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum MatchDecision {
    NoMatch {
        reason: NoMatchReason,
    },
    #[serde(rename_all = "camelCase")]
    Match {
        identity_id: String,
        display_name: String,
        contact_email: String,
        reference_image_ref: String,
        distance: f32,
        /// Display heuristic derived from distance, not a probability.
        confidence: u8,
    },
}

impl MatchDecision {
    pub fn no_match(reason: NoMatchReason) -> Self {
        MatchDecision::NoMatch { reason }
    }

    fn matched(entry: &GalleryEntry, distance: f32) -> Self {
        MatchDecision::Match {
            identity_id: entry.identity_id.clone(),
            display_name: entry.display_name.clone(),
            contact_email: entry.contact_email.clone(),
            reference_image_ref: entry.reference_image_ref.clone(),
            distance,
            confidence: confidence_from_distance(distance),
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchDecision::Match { .. })
    }

    pub fn no_match_reason(&self) -> Option<&NoMatchReason> {
        match self {
            MatchDecision::NoMatch { reason } => Some(reason),
            MatchDecision::Match { .. } => None,
        }
    }
}

/// Map a distance to a 0–100 score: `round((1 - d) * 100)`, clamped.
///
/// Display heuristic only. It is not a calibrated probability.
pub fn confidence_from_distance(distance: f32) -> u8 {
    ((1.0 - distance) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Distance between two equal-length embedding vectors. Lower = more similar.
pub trait DistanceMetric {
    fn distance(&self, probe: &[f32], reference: &[f32]) -> f32;
}

/// Straight-line (L2) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl DistanceMetric for Euclidean {
    fn distance(&self, probe: &[f32], reference: &[f32]) -> f32 {
        probe
            .iter()
            .zip(reference)
            .map(|(p, r)| (p - r).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Strategy for deciding whether a probe belongs to a gallery identity.
pub trait Matcher {
    fn decide(
        &self,
        probe: &ProbeResult,
        gallery: &Gallery,
        threshold: f32,
    ) -> Result<MatchDecision, MatchError>;
}

/// Linear-scan nearest-neighbour matcher.
///
/// Ties on the minimum distance go to the first entry in gallery order
/// (ascending identity id), so repeated calls always pick the same entry.
#[derive(Debug, Clone, Default)]
pub struct NearestMatcher<M = Euclidean> {
    metric: M,
}

impl NearestMatcher<Euclidean> {
    pub fn euclidean() -> Self {
        Self { metric: Euclidean }
    }
}

impl<M: DistanceMetric> NearestMatcher<M> {
    pub fn with_metric(metric: M) -> Self {
        Self { metric }
    }

    fn distance_to(
        &self,
        probe: &crate::types::Embedding,
        entry: &GalleryEntry,
    ) -> Result<f32, MatchError> {
        let reference = &entry.embedding;
        if probe.dim() != reference.dim() {
            return Err(MatchError::DimensionMismatch {
                identity_id: entry.identity_id.clone(),
                probe: probe.dim(),
                reference: reference.dim(),
            });
        }
        if let (Some(p), Some(r)) = (&probe.model_version, &reference.model_version) {
            if p != r {
                return Err(MatchError::ModelMismatch {
                    identity_id: entry.identity_id.clone(),
                    probe: p.clone(),
                    reference: r.clone(),
                });
            }
        }

        let distance = self.metric.distance(&probe.values, &reference.values);
        if !distance.is_finite() {
            return Err(MatchError::InvalidEmbedding(entry.identity_id.clone()));
        }
        Ok(distance)
    }
}

impl<M: DistanceMetric> Matcher for NearestMatcher<M> {
    fn decide(
        &self,
        probe: &ProbeResult,
        gallery: &Gallery,
        threshold: f32,
    ) -> Result<MatchDecision, MatchError> {
        let Some(embedding) = probe.embedding() else {
            return Ok(MatchDecision::no_match(NoMatchReason::NoFace));
        };
        if gallery.is_empty() {
            return Ok(MatchDecision::no_match(NoMatchReason::NoReferenceData));
        }

        let mut best: Option<(&GalleryEntry, f32)> = None;
        for entry in gallery.iter() {
            let distance = self.distance_to(embedding, entry)?;
            tracing::trace!(identity = %entry.identity_id, distance, "gallery distance");
            // Strict comparison keeps the first entry on ties.
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((entry, distance));
            }
        }

        let Some((entry, distance)) = best else {
            return Ok(MatchDecision::no_match(NoMatchReason::NoReferenceData));
        };

        let decision = if distance < threshold {
            MatchDecision::matched(entry, distance)
        } else {
            MatchDecision::no_match(NoMatchReason::AboveThreshold {
                nearest_identity_id: entry.identity_id.clone(),
                distance,
            })
        };

        tracing::debug!(
            nearest = %entry.identity_id,
            distance,
            threshold,
            matched = decision.is_match(),
            "match decision"
        );
        Ok(decision)
    }
}
