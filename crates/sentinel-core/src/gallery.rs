//! Gallery construction from watch-list candidates.
//!
//! Each candidate's reference photo is fetched and embedded. A candidate
//! whose photo is missing, unreachable, undecodable or faceless is left out
//! of the gallery and recorded in the [`BuildReport`]; only directory
//! failures, fatal extractor failures and cancellation abort the build.

use crate::extractor::{ExtractError, Extractor};
use crate::source::{DirectoryError, ImageFetcher};
use crate::types::{Candidate, Gallery, GalleryEntry, ProbeResult};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("identity directory: {0}")]
    Directory(#[from] DirectoryError),
    #[error("extractor unusable, gallery build aborted: {0}")]
    Extractor(#[source] ExtractError),
    #[error("gallery build cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// No reference image configured; nothing was fetched.
    MissingReference,
    /// Another candidate with the same identity id came first.
    Duplicate,
    /// The image could not be fetched or decoded.
    Unavailable { reason: String },
    /// The image was readable but contained no face.
    NoFace,
    /// Extraction failed for this image only.
    ExtractionFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Skipped {
    pub identity_id: String,
    pub reason: SkipReason,
}

/// What happened to each candidate during a build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    /// Candidates examined (after the `max_candidates` bound).
    pub considered: usize,
    pub enrolled: usize,
    pub skipped: Vec<Skipped>,
    /// Candidates beyond `max_candidates`; never matchable in this gallery.
    pub truncated: usize,
}

impl BuildReport {
    fn skip(&mut self, identity_id: &str, reason: SkipReason) {
        self.skipped.push(Skipped {
            identity_id: identity_id.to_string(),
            reason,
        });
    }
}

pub struct GalleryBuilder {
    fetcher: Arc<dyn ImageFetcher>,
    extractor: Arc<dyn Extractor>,
    max_candidates: Option<usize>,
}

impl GalleryBuilder {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            fetcher,
            extractor,
            max_candidates: None,
        }
    }

    /// Only the first `max` candidates (in directory order) are processed per build.
    pub fn with_max_candidates(mut self, max: Option<usize>) -> Self {
        self.max_candidates = max;
        self
    }

    pub fn max_candidates(&self) -> Option<usize> {
        self.max_candidates
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.extractor
    }

    /// Build a fresh gallery. Returns no gallery at all if cancelled.
    pub async fn build(
        &self,
        candidates: Vec<Candidate>,
        cancel: &CancellationToken,
    ) -> Result<(Gallery, BuildReport), BuildError> {
        let mut gallery = Gallery::new();
        let mut report = BuildReport::default();
        let mut seen = HashSet::new();

        let limit = self.max_candidates.unwrap_or(usize::MAX);
        report.truncated = candidates.len().saturating_sub(limit);
        if report.truncated > 0 {
            tracing::warn!(
                limit,
                truncated = report.truncated,
                "candidate list exceeds max_candidates; remainder will not be matchable"
            );
        }

        for candidate in candidates.into_iter().take(limit) {
            if cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            report.considered += 1;
            let id = candidate.identity_id.clone();

            if !seen.insert(id.clone()) {
                tracing::warn!(identity = %id, "duplicate identity id in directory; keeping the first");
                report.skip(&id, SkipReason::Duplicate);
                continue;
            }
            let Some(reference) = candidate.reference().map(str::to_string) else {
                tracing::debug!(identity = %id, "no reference image; skipping");
                report.skip(&id, SkipReason::MissingReference);
                continue;
            };

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BuildError::Cancelled),
                r = self.fetcher.fetch(&reference) => r,
            };
            let image = match fetched {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(identity = %id, error = %e, "reference image unavailable; skipping");
                    report.skip(&id, SkipReason::Unavailable { reason: e.to_string() });
                    continue;
                }
            };

            let extracted = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BuildError::Cancelled),
                r = self.extractor.extract(image) => r,
            };
            let embedding = match extracted {
                Ok(ProbeResult::Detected { embedding, .. }) => embedding,
                Ok(ProbeResult::NoFace) => {
                    tracing::warn!(identity = %id, reference = %reference, "no face in reference image; skipping");
                    report.skip(&id, SkipReason::NoFace);
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(BuildError::Extractor(e)),
                Err(e) => {
                    tracing::warn!(identity = %id, error = %e, "embedding extraction failed; skipping");
                    report.skip(&id, SkipReason::ExtractionFailed { reason: e.to_string() });
                    continue;
                }
            };

            gallery.insert(GalleryEntry {
                identity_id: id,
                display_name: candidate.display_name,
                contact_email: candidate.contact_email,
                reference_image_ref: reference,
                embedding,
            });
        }

        report.enrolled = gallery.len();
        tracing::info!(
            considered = report.considered,
            enrolled = report.enrolled,
            skipped = report.skipped.len(),
            truncated = report.truncated,
            "gallery built"
        );
        Ok((gallery, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, FakeExtractor, FakeFetcher, BROKEN, NO_FACE};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn builder(fetcher: FakeFetcher) -> (GalleryBuilder, Arc<FakeFetcher>, Arc<FakeExtractor>) {
        let fetcher = Arc::new(fetcher);
        let extractor = Arc::new(FakeExtractor::default());
        (GalleryBuilder::new(fetcher.clone(), extractor.clone()), fetcher, extractor)
    }

    fn five_candidates() -> Vec<Candidate> {
        vec![
            candidate("a", Some("img/a")),
            candidate("b", Some("img/b")),
            candidate("c", Some("img/c")),
            candidate("d", Some("img/d")),
            candidate("e", Some("img/e")),
        ]
    }

    #[tokio::test]
    async fn test_unfetchable_references_are_skipped() {
        // b and d are not served.
        let (builder, _, _) = builder(FakeFetcher::with(&[("img/a", 10), ("img/c", 30), ("img/e", 50)]));
        let (gallery, report) = builder
            .build(five_candidates(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(gallery.len(), 3);
        assert!(gallery.contains("a") && gallery.contains("c") && gallery.contains("e"));
        assert_eq!(report.considered, 5);
        assert_eq!(report.enrolled, 3);
        let skipped: Vec<_> = report.skipped.iter().map(|s| s.identity_id.as_str()).collect();
        assert_eq!(skipped, ["b", "d"]);
        assert!(report
            .skipped
            .iter()
            .all(|s| matches!(s.reason, SkipReason::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_entries_carry_candidate_details() {
        let (builder, _, _) = builder(FakeFetcher::with(&[("img/a", 42)]));
        let (gallery, _) = builder
            .build(vec![candidate("a", Some("img/a"))], &CancellationToken::new())
            .await
            .unwrap();
        let entry = gallery.get("a").unwrap();
        assert_eq!(entry.display_name, "Person a");
        assert_eq!(entry.contact_email, "a@example.org");
        assert_eq!(entry.reference_image_ref, "img/a");
        assert_eq!(entry.embedding.values, vec![0.42]);
    }

    #[tokio::test]
    async fn test_missing_reference_skipped_before_fetch() {
        let (builder, fetcher, extractor) = builder(FakeFetcher::with(&[("img/a", 10)]));
        let (gallery, report) = builder
            .build(
                vec![
                    candidate("none", None),
                    candidate("blank", Some("  ")),
                    candidate("a", Some("img/a")),
                ],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(gallery.len(), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::MissingReference);
        assert_eq!(report.skipped[1].reason, SkipReason::MissingReference);
    }

    #[tokio::test]
    async fn test_faceless_and_broken_images_are_skipped() {
        let (builder, _, _) = builder(FakeFetcher::with(&[
            ("img/a", NO_FACE),
            ("img/b", BROKEN),
            ("img/c", 30),
        ]));
        let (gallery, report) = builder
            .build(five_candidates()[..3].to_vec(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(gallery.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::NoFace);
        assert!(matches!(report.skipped[1].reason, SkipReason::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn test_no_usable_candidates_gives_empty_gallery() {
        let (builder, _, _) = builder(FakeFetcher::default());
        let (gallery, report) = builder
            .build(five_candidates(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(gallery.is_empty());
        assert_eq!(report.enrolled, 0);
        assert_eq!(report.skipped.len(), 5);

        let (empty, _) = builder.build(vec![], &CancellationToken::new()).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_ids_first_wins() {
        let (builder, _, _) = builder(FakeFetcher::with(&[("img/first", 10), ("img/second", 20)]));
        let (gallery, report) = builder
            .build(
                vec![candidate("x", Some("img/first")), candidate("x", Some("img/second"))],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.get("x").unwrap().reference_image_ref, "img/first");
        assert_eq!(report.skipped[0].reason, SkipReason::Duplicate);
    }

    #[tokio::test]
    async fn test_max_candidates_bounds_the_build() {
        let (builder, fetcher, _) = builder(FakeFetcher::with(&[
            ("img/a", 10), ("img/b", 20), ("img/c", 30), ("img/d", 40), ("img/e", 50),
        ]));
        let builder = builder.with_max_candidates(Some(2));
        let (gallery, report) = builder
            .build(five_candidates(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(gallery.len(), 2);
        assert!(!gallery.contains("c"));
        assert_eq!(report.considered, 2);
        assert_eq!(report.truncated, 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_candidate_order_does_not_change_contents() {
        let images = [("img/a", 10), ("img/b", 20), ("img/c", 30), ("img/e", 50)];
        let (builder, _, _) = builder(FakeFetcher::with(&images));
        let token = CancellationToken::new();

        let (forward, _) = builder.build(five_candidates(), &token).await.unwrap();
        let mut reversed = five_candidates();
        reversed.reverse();
        let (backward, _) = builder.build(reversed, &token).await.unwrap();
        assert_eq!(forward, backward);
    }

    #[tokio::test]
    async fn test_fatal_extractor_error_aborts() {
        let (builder, _, extractor) = builder(FakeFetcher::with(&[("img/a", 10)]));
        extractor.down.store(true, Ordering::SeqCst);
        let err = builder
            .build(vec![candidate("a", Some("img/a"))], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Extractor(ExtractError::EngineUnavailable)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (builder, fetcher, _) = builder(FakeFetcher::with(&[("img/a", 10)]));
        let token = CancellationToken::new();
        token.cancel();
        let err = builder.build(five_candidates(), &token).await.unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_during_fetch() {
        let fetcher = FakeFetcher {
            delay: Some(Duration::from_secs(30)),
            ..FakeFetcher::with(&[("img/a", 10)])
        };
        let (builder, _, extractor) = builder(fetcher);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = builder.build(five_candidates(), &token).await.unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }
}
