//! Detached execution of pipeline runs.
//!
//! Each accepted request becomes one task on a [`TaskTracker`]. A semaphore
//! bounds how many runs hold the browser and encoder at the same time; excess
//! tasks queue in FIFO order. Shutdown closes the tracker and waits for the
//! queue to drain within a grace period.

use std::{sync::Arc, time::Duration};

use metrics::gauge;
use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::{
    application::pipeline::{PipelineError, PipelineOutcome, PipelineRunner},
    domain::slot::SlotKey,
    infra::telemetry::PIPELINE_INFLIGHT,
};

const SOURCE: &str = "application::dispatch";

#[derive(Clone)]
pub struct Dispatcher {
    runner: Arc<PipelineRunner>,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(runner: Arc<PipelineRunner>, max_concurrency: usize) -> Self {
        Self {
            runner,
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn runner(&self) -> &Arc<PipelineRunner> {
        &self.runner
    }

    /// Spawn a pipeline run. Dropping the returned handle detaches the task; it
    /// keeps running to completion either way.
    pub fn dispatch(&self, key: SlotKey, html: String) -> JoinHandle<PipelineOutcome> {
        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.permits);
        debug!(
            target = SOURCE,
            op = "dispatch::spawn",
            key = %key,
            queued = self.tracker.len(),
            "Dispatching render"
        );

        self.tracker.spawn(async move {
            let _inflight = InFlightGauge::enter();
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::Aborted)?;
            runner.execute(key, html).await
        })
    }

    /// Number of dispatched runs that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every run dispatched so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Close the tracker and wait up to `grace` for pending runs. Returns
    /// `true` when everything finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending == 0 {
            return true;
        }

        info!(
            target = SOURCE,
            op = "dispatch::drain",
            pending,
            grace_ms = grace.as_millis() as u64,
            "Waiting for in-flight renders"
        );
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!(target = SOURCE, op = "dispatch::drain", result = "ok", "Renders drained");
                true
            }
            Err(_) => {
                warn!(
                    target = SOURCE,
                    op = "dispatch::drain",
                    result = "timeout",
                    abandoned = self.tracker.len(),
                    "Grace period elapsed with renders still running"
                );
                false
            }
        }
    }
}

struct InFlightGauge;

impl InFlightGauge {
    fn enter() -> Self {
        gauge!(PIPELINE_INFLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InFlightGauge {
    fn drop(&mut self) {
        gauge!(PIPELINE_INFLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        application::{
            pipeline::test_support::{EchoRasterizer, SizedEncoder, png_with_size},
            ports::{EncodeError, EncodeParams, Encoder, RasterError, Rasterizer},
        },
        config::{LockScope, OutputSettings},
        domain::artifact::{ArtifactFormat, Viewport},
        infra::slots::SlotStore,
    };

    const VIEWPORT: Viewport = Viewport {
        width: 800,
        height: 480,
    };

    fn params() -> EncodeParams {
        EncodeParams {
            format: ArtifactFormat::Png,
            dither: "FloydSteinberg".to_string(),
            remap: "pattern:gray50".to_string(),
            depth: 1,
            colors: 2,
        }
    }

    async fn store(dir: &TempDir) -> Arc<SlotStore> {
        let output = OutputSettings {
            directory: dir.path().to_path_buf(),
            base_name: "output".to_string(),
        };
        Arc::new(
            SlotStore::open(&output, ArtifactFormat::Png, LockScope::PerKey)
                .await
                .expect("store opens"),
        )
    }

    /// Counts concurrent rasterizations and blocks until released.
    struct CountingRasterizer {
        active: AtomicUsize,
        peak: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl Rasterizer for CountingRasterizer {
        async fn rasterize(&self, html: &str, _viewport: Viewport) -> Result<Bytes, RasterError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.release.notified().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Bytes::copy_from_slice(html.as_bytes()))
        }
    }

    struct PassThrough;

    #[async_trait]
    impl Encoder for PassThrough {
        async fn encode(&self, raw: Bytes, _params: &EncodeParams) -> Result<Bytes, EncodeError> {
            Ok(png_with_size(800, 480, &raw))
        }
    }

    #[tokio::test]
    async fn detached_runs_complete_and_publish() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir).await;
        let runner = Arc::new(PipelineRunner::new(
            Arc::new(EchoRasterizer),
            Arc::new(SizedEncoder {
                width: 800,
                height: 480,
            }),
            Arc::clone(&store),
            VIEWPORT,
            params(),
            Duration::from_secs(5),
        ));
        let dispatcher = Dispatcher::new(runner, 2);

        drop(dispatcher.dispatch(SlotKey::Default, "<p>one</p>".to_string()));
        dispatcher.wait_idle().await;

        let artifact = store.read(&SlotKey::Default).await.expect("published");
        assert!(artifact.bytes.ends_with(b"<p>one</p>"));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_permits() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir).await;
        let rasterizer = Arc::new(CountingRasterizer {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let runner = Arc::new(PipelineRunner::new(
            rasterizer.clone(),
            Arc::new(PassThrough),
            store,
            VIEWPORT,
            params(),
            Duration::from_secs(5),
        ));
        let dispatcher = Dispatcher::new(runner, 2);

        let handles: Vec<_> = (0..5)
            .map(|index| {
                let key = SlotKey::named(&format!("k{index}")).expect("valid key");
                dispatcher.dispatch(key, format!("<p>{index}</p>"))
            })
            .collect();

        for _ in 0..50 {
            if rasterizer.active.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(rasterizer.active.load(Ordering::SeqCst), 2);

        for _ in 0..5 {
            while rasterizer.active.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            rasterizer.release.notify_one();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for handle in handles {
            handle.await.expect("task joined").expect("pipeline ok");
        }
        assert!(rasterizer.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn drain_reports_timeout_for_stuck_runs() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir).await;
        let rasterizer = Arc::new(CountingRasterizer {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let runner = Arc::new(PipelineRunner::new(
            rasterizer.clone(),
            Arc::new(PassThrough),
            store,
            VIEWPORT,
            params(),
            Duration::from_secs(5),
        ));
        let dispatcher = Dispatcher::new(runner, 1);

        drop(dispatcher.dispatch(SlotKey::Default, "<p>stuck</p>".to_string()));
        assert!(!dispatcher.drain(Duration::from_millis(30)).await);

        rasterizer.release.notify_one();
        assert!(dispatcher.drain(Duration::from_secs(2)).await);
    }
}
