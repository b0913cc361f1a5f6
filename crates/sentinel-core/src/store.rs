//! The session's current gallery snapshot and its rebuild policy.
//!
//! Readers clone an `Arc<Gallery>` and keep a consistent view for as long as
//! they hold it. Rebuilds are serialised and swap in a complete gallery only
//! after it has been fully built; a failed or cancelled rebuild leaves the
//! previous snapshot in place.

use crate::gallery::{BuildError, BuildReport, GalleryBuilder};
use crate::source::IdentityDirectory;
use crate::types::Gallery;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Result of [`GalleryStore::rebuild`].
#[derive(Debug, Clone)]
pub struct RebuildOutcome {
    pub gallery: Arc<Gallery>,
    /// `None` when the existing gallery was reused.
    pub report: Option<BuildReport>,
}

pub struct GalleryStore {
    directory: Arc<dyn IdentityDirectory>,
    builder: GalleryBuilder,
    current: RwLock<Option<Arc<Gallery>>>,
    rebuilding: Mutex<()>,
}

impl GalleryStore {
    pub fn new(directory: Arc<dyn IdentityDirectory>, builder: GalleryBuilder) -> Self {
        Self {
            directory,
            builder,
            current: RwLock::new(None),
            rebuilding: Mutex::new(()),
        }
    }

    pub fn builder(&self) -> &GalleryBuilder {
        &self.builder
    }

    /// The gallery scans currently run against, if one has been built.
    pub fn snapshot(&self) -> Option<Arc<Gallery>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.try_lock().is_err()
    }

    /// Build a gallery from the directory and make it current.
    ///
    /// With `force == false` an existing gallery is reused as-is. Concurrent
    /// calls queue behind the one in progress; a queued non-forced call then
    /// reuses the gallery the first one produced.
    pub async fn rebuild(
        &self,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<RebuildOutcome, BuildError> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BuildError::Cancelled),
            guard = self.rebuilding.lock() => guard,
        };

        if !force {
            if let Some(gallery) = self.snapshot() {
                tracing::debug!(entries = gallery.len(), "reusing current gallery");
                return Ok(RebuildOutcome { gallery, report: None });
            }
        }

        let candidates = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BuildError::Cancelled),
            r = self.directory.candidates() => r.inspect_err(|e| {
                tracing::warn!(error = %e, "identity directory failed; keeping previous gallery");
            })?,
        };
        tracing::info!(candidates = candidates.len(), force, "rebuilding gallery");

        let (gallery, report) = self.builder.build(candidates, cancel).await?;
        let gallery = Arc::new(gallery);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(gallery.clone());

        Ok(RebuildOutcome {
            gallery,
            report: Some(report),
        })
    }

    /// Drop the current gallery; scans report no reference data until the next rebuild.
    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
