//! Raster → encode → publish for a single rendered document.

use std::{sync::Arc, time::Duration, time::Instant};

use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    application::ports::{EncodeError, EncodeParams, Encoder, RasterError, Rasterizer},
    domain::{
        artifact::{Artifact, Viewport},
        slot::SlotKey,
    },
    infra::{
        slots::{SlotError, SlotStore},
        telemetry::{PIPELINE_MS, PIPELINE_TOTAL},
    },
};

const SOURCE: &str = "application::pipeline";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("rasterization failed: {0}")]
    Raster(#[from] RasterError),
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("pipeline exceeded deadline of {0:?}")]
    TimedOut(Duration),
    #[error("encoded image is {actual}, expected {expected}")]
    Dimensions { expected: Viewport, actual: String },
    #[error("publish failed: {0}")]
    Publish(#[from] SlotError),
    #[error("pipeline task did not complete")]
    Aborted,
}

impl PipelineError {
    fn result_label(&self) -> &'static str {
        match self {
            PipelineError::TimedOut(_) => "timed_out",
            _ => "failed",
        }
    }

    fn stage(&self) -> &'static str {
        match self {
            PipelineError::Raster(_) => "raster",
            PipelineError::Encode(_) => "encode",
            PipelineError::TimedOut(_) => "deadline",
            PipelineError::Dimensions { .. } => "verify",
            PipelineError::Publish(_) => "publish",
            PipelineError::Aborted => "task",
        }
    }
}

pub type PipelineOutcome = Result<Arc<Artifact>, PipelineError>;

/// Owns the collaborators for one pipeline run. Cheap to share behind an `Arc`.
pub struct PipelineRunner {
    rasterizer: Arc<dyn Rasterizer>,
    encoder: Arc<dyn Encoder>,
    store: Arc<SlotStore>,
    viewport: Viewport,
    encode: EncodeParams,
    deadline: Duration,
}

impl PipelineRunner {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        encoder: Arc<dyn Encoder>,
        store: Arc<SlotStore>,
        viewport: Viewport,
        encode: EncodeParams,
        deadline: Duration,
    ) -> Self {
        Self {
            rasterizer,
            encoder,
            store,
            viewport,
            encode,
            deadline,
        }
    }

    pub fn store(&self) -> &Arc<SlotStore> {
        &self.store
    }

    /// Run the pipeline, logging and counting the outcome. Failures leave the
    /// slot's previous artifact in place.
    pub async fn execute(&self, key: SlotKey, html: String) -> PipelineOutcome {
        let started_at = Instant::now();
        let outcome = self.run(&key, &html).await;
        let elapsed = started_at.elapsed();

        histogram!(PIPELINE_MS).record(elapsed.as_secs_f64() * 1000.0);
        match &outcome {
            Ok(artifact) => {
                counter!(PIPELINE_TOTAL, "result" => "published").increment(1);
                info!(
                    target = SOURCE,
                    op = "pipeline::execute",
                    result = "ok",
                    key = %key,
                    bytes = artifact.len(),
                    dimensions = %self.viewport,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Artifact rendered"
                );
            }
            Err(err) => {
                counter!(PIPELINE_TOTAL, "result" => err.result_label(), "stage" => err.stage())
                    .increment(1);
                warn!(
                    target = SOURCE,
                    op = "pipeline::execute",
                    result = "error",
                    stage = err.stage(),
                    key = %key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "Render pipeline failed; previous artifact retained"
                );
            }
        }

        outcome
    }

    async fn run(&self, key: &SlotKey, html: &str) -> PipelineOutcome {
        // Held until this function returns when the store runs with a global scope.
        let _guard = self.store.pipeline_guard().await;

        let encoded = tokio::time::timeout(self.deadline, self.produce(html))
            .await
            .map_err(|_| PipelineError::TimedOut(self.deadline))??;

        let artifact = self.store.publish(key, encoded).await?;
        Ok(artifact)
    }

    async fn produce(&self, html: &str) -> Result<bytes::Bytes, PipelineError> {
        let raw = self.rasterizer.rasterize(html, self.viewport).await?;
        let encoded = self.encoder.encode(raw, &self.encode).await?;
        self.verify_dimensions(&encoded)?;
        Ok(encoded)
    }

    fn verify_dimensions(&self, encoded: &[u8]) -> Result<(), PipelineError> {
        let expected = self.viewport;
        match imagesize::blob_size(encoded) {
            Ok(size)
                if size.width as u64 == u64::from(expected.width)
                    && size.height as u64 == u64::from(expected.height) =>
            {
                Ok(())
            }
            Ok(size) => Err(PipelineError::Dimensions {
                expected,
                actual: format!("{}x{}", size.width, size.height),
            }),
            Err(err) => Err(PipelineError::Dimensions {
                expected,
                actual: format!("unreadable ({err:?})"),
            }),
        }
    }
}
