//! One scanning station: probe extraction, matching and alerting.

use crate::alert::{AlertRecord, AlertSink, SinkError};
use crate::extractor::{ExtractError, Extractor};
use crate::matcher::{
    MatchDecision, MatchError, Matcher, NearestMatcher, NoMatchReason, DEFAULT_MATCH_THRESHOLD,
};
use crate::store::GalleryStore;
use chrono::Utc;
use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("extraction: {0}")]
    Extract(#[from] ExtractError),
    #[error("matching: {0}")]
    Match(#[from] MatchError),
    /// The match stands but was not persisted.
    #[error("match for {} not recorded: {source}", .alert.identity_id)]
    AlertNotRecorded {
        alert: Box<AlertRecord>,
        #[source]
        source: SinkError,
    },
    #[error("scan cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanOutcome {
    pub decision: MatchDecision,
    pub alert: Option<AlertRecord>,
}

pub struct ScanSession<M = NearestMatcher> {
    store: Arc<GalleryStore>,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn AlertSink>,
    matcher: M,
    threshold: f32,
    station: String,
}

impl ScanSession<NearestMatcher> {
    pub fn new(
        store: Arc<GalleryStore>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn AlertSink>,
        station: impl Into<String>,
    ) -> Self {
        Self {
            store,
            extractor,
            sink,
            matcher: NearestMatcher::euclidean(),
            threshold: DEFAULT_MATCH_THRESHOLD,
            station: station.into(),
        }
    }
}

impl<M: Matcher + Send + Sync> ScanSession<M> {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_matcher<N: Matcher + Send + Sync>(self, matcher: N) -> ScanSession<N> {
        ScanSession {
            store: self.store,
            extractor: self.extractor,
            sink: self.sink,
            matcher,
            threshold: self.threshold,
            station: self.station,
        }
    }

    pub fn store(&self) -> &Arc<GalleryStore> {
        &self.store
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Scan one image against the current gallery snapshot.
    ///
    /// Without a gallery the result is `NoMatch(NoReferenceData)` and the
    /// image is not processed. A match is recorded with the alert sink
    /// before returning.
    pub async fn scan(
        &self,
        image: DynamicImage,
        operator: &str,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let Some(gallery) = self.store.snapshot() else {
            tracing::info!(operator, "scan without reference data; gallery not built");
            return Ok(ScanOutcome {
                decision: MatchDecision::no_match(NoMatchReason::NoReferenceData),
                alert: None,
            });
        };

        let probe = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            r = self.extractor.extract(image) => r?,
        };

        let decision = self.matcher.decide(&probe, &gallery, self.threshold)?;
        let Some(alert) = AlertRecord::from_decision(&decision, operator, &self.station, Utc::now())
        else {
            tracing::info!(operator, reason = ?decision.no_match_reason(), "scan: no match");
            return Ok(ScanOutcome { decision, alert: None });
        };

        tracing::info!(
            operator,
            identity = %alert.identity_id,
            confidence = alert.confidence,
            alert_id = %alert.id,
            "scan: watch-list match"
        );
        if let Err(source) = self.sink.record(&alert).await {
            tracing::error!(alert_id = %alert.id, error = %source, "failed to record alert");
            return Err(ScanError::AlertNotRecorded {
                alert: Box::new(alert),
                source,
            });
        }

        Ok(ScanOutcome {
            decision,
            alert: Some(alert),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryBuilder;
    use crate::testing::{candidate, pixel, FakeDirectory, FakeExtractor, FakeFetcher, MemorySink, NO_FACE};
    use crate::types::{Gallery, ProbeResult};
    use std::sync::atomic::Ordering;

    struct Station {
        session: ScanSession,
        extractor: Arc<FakeExtractor>,
        sink: Arc<MemorySink>,
    }

    /// Gallery: a → 0.10, b → 0.90.
    fn station(candidates: Vec<crate::types::Candidate>) -> Station {
        let extractor = Arc::new(FakeExtractor::default());
        let fetcher = Arc::new(FakeFetcher::with(&[("img/a", 10), ("img/b", 90)]));
        let builder = GalleryBuilder::new(fetcher, extractor.clone());
        let store = Arc::new(GalleryStore::new(Arc::new(FakeDirectory::new(candidates)), builder));
        let sink = Arc::new(MemorySink::default());
        let session = ScanSession::new(store, extractor.clone(), sink.clone(), "gate-1");
        Station { session, extractor, sink }
    }

    fn two_people() -> Vec<crate::types::Candidate> {
        vec![candidate("a", Some("img/a")), candidate("b", Some("img/b"))]
    }

    #[tokio::test]
    async fn test_scan_before_build_reports_no_reference_data() {
        let st = station(two_people());
        let outcome = st.session.scan(pixel(12), "op", &CancellationToken::new()).await.unwrap();
        assert_eq!(
            outcome.decision,
            MatchDecision::no_match(NoMatchReason::NoReferenceData)
        );
        assert_eq!(st.extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_gallery_reports_no_reference_data() {
        let st = station(vec![]);
        let token = CancellationToken::new();
        st.session.store().rebuild(false, &token).await.unwrap();
        let outcome = st.session.scan(pixel(12), "op", &token).await.unwrap();
        assert_eq!(outcome.decision.no_match_reason(), Some(&NoMatchReason::NoReferenceData));
    }

    #[tokio::test]
    async fn test_match_records_alert() {
        let st = station(two_people());
        let token = CancellationToken::new();
        st.session.store().rebuild(false, &token).await.unwrap();

        let outcome = st.session.scan(pixel(12), "officer-5", &token).await.unwrap();
        match &outcome.decision {
            MatchDecision::Match { identity_id, confidence, .. } => {
                assert_eq!(identity_id, "a");
                assert_eq!(*confidence, 98);
            }
            other => panic!("expected match, got {other:?}"),
        }
        let alert = outcome.alert.unwrap();
        assert_eq!(alert.scanned_by, "officer-5");
        assert_eq!(alert.station, "gate-1");

        let stored = st.sink.alerts.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, alert.id);
    }

    #[tokio::test]
    async fn test_no_face_and_no_match_do_not_alert() {
        let st = station(two_people());
        let token = CancellationToken::new();
        st.session.store().rebuild(false, &token).await.unwrap();

        let faceless = st.session.scan(pixel(NO_FACE), "op", &token).await.unwrap();
        assert_eq!(faceless.decision.no_match_reason(), Some(&NoMatchReason::NoFace));

        // 0.50 is 0.40 from both entries; tighten the threshold so neither matches.
        let strict = st.session.with_threshold(0.3);
        let far = strict.scan(pixel(50), "op", &token).await.unwrap();
        assert!(matches!(
            far.decision.no_match_reason(),
            Some(NoMatchReason::AboveThreshold { .. })
        ));
        assert!(st.sink.alerts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_the_decision() {
        let st = station(two_people());
        let token = CancellationToken::new();
        st.session.store().rebuild(false, &token).await.unwrap();
        st.sink.fail.store(true, Ordering::SeqCst);

        match st.session.scan(pixel(88), "op", &token).await {
            Err(ScanError::AlertNotRecorded { alert, .. }) => assert_eq!(alert.identity_id, "b"),
            other => panic!("expected AlertNotRecorded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extractor_failure_propagates() {
        let st = station(two_people());
        let token = CancellationToken::new();
        st.session.store().rebuild(false, &token).await.unwrap();
        st.extractor.down.store(true, Ordering::SeqCst);

        let err = st.session.scan(pixel(12), "op", &token).await.unwrap_err();
        assert!(matches!(err, ScanError::Extract(ExtractError::EngineUnavailable)));
    }

    #[tokio::test]
    async fn test_cancelled_scan() {
        let st = station(two_people());
        let token = CancellationToken::new();
        st.session.store().rebuild(false, &token).await.unwrap();
        token.cancel();
        let err = st.session.scan(pixel(12), "op", &token).await.unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
    }

    /// Refuses every probe; checks that the session honours a custom matcher.
    struct Never;

    impl Matcher for Never {
        fn decide(&self, _: &ProbeResult, _: &Gallery, _: f32) -> Result<MatchDecision, MatchError> {
            Ok(MatchDecision::no_match(NoMatchReason::NoFace))
        }
    }

    #[tokio::test]
    async fn test_custom_matcher() {
        let st = station(two_people());
        let token = CancellationToken::new();
        st.session.store().rebuild(false, &token).await.unwrap();
        let session = st.session.with_matcher(Never);
        let outcome = session.scan(pixel(10), "op", &token).await.unwrap();
        assert!(!outcome.decision.is_match());
    }
}
