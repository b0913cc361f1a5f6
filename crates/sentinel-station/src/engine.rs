use async_trait::async_trait;
use image::DynamicImage;
use sentinel_core::{ExtractError, Extractor, OnnxExtractor, ProbeResult};
use std::path::Path;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Load(#[from] ExtractError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Extract {
        image: DynamicImage,
        reply: oneshot::Sender<Result<ProbeResult, ExtractError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

#[async_trait]
impl Extractor for EngineHandle {
    /// Dropping the returned future before the engine picks the request up
    /// cancels it; the engine skips requests whose caller has gone.
    async fn extract(&self, image: DynamicImage) -> Result<ProbeResult, ExtractError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ExtractError::EngineUnavailable)?;
        reply_rx.await.map_err(|_| ExtractError::EngineUnavailable)?
    }
}

/// Load SCRFD and ArcFace, then serve extraction on a dedicated OS thread.
///
/// Fails fast if either model is unavailable.
pub fn spawn_onnx(scrfd_path: &Path, arcface_path: &Path) -> Result<EngineHandle, EngineError> {
    let mut extractor = OnnxExtractor::load(scrfd_path, arcface_path)?;
    tracing::info!(
        scrfd = %scrfd_path.display(),
        arcface = %arcface_path.display(),
        "face models loaded"
    );
    spawn(move |image| extractor.extract(image))
}

/// Run `extract` on the engine thread for every request, one at a time.
pub fn spawn<F>(mut extract: F) -> Result<EngineHandle, EngineError>
where
    F: FnMut(&DynamicImage) -> Result<ProbeResult, ExtractError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("sentinel-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image, reply } => {
                        if reply.is_closed() {
                            tracing::debug!("extraction request abandoned by caller; skipping");
                            continue;
                        }
                        let _ = reply.send(extract(&image));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
