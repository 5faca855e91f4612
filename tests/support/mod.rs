#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio::sync::Notify;
use tower::ServiceExt;

use rasterslot::{
    application::{
        dispatch::Dispatcher,
        ingest::IngestService,
        pipeline::PipelineRunner,
        ports::{EncodeError, EncodeParams, Encoder, RasterError, Rasterizer},
    },
    config::{LockScope, OutputSettings, TemplateSettings},
    domain::artifact::{ArtifactFormat, Viewport},
    infra::{
        http::{HttpState, build_router},
        slots::SlotStore,
        template::LiquidTemplateRenderer,
    },
};

pub const VIEWPORT: Viewport = Viewport {
    width: 800,
    height: 480,
};
pub const TEMPLATE: &str = "<p>{{ body }}</p>";
pub const FAIL_MARKER: &str = "FAIL";
pub const BODY_LIMIT: usize = 1024;

/// Rasterizer that echoes the HTML back and, when gated, blocks each document
/// until the test releases it.
pub struct GatedRasterizer {
    hold: bool,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    started: Mutex<Vec<String>>,
}

impl GatedRasterizer {
    pub fn open() -> Arc<Self> {
        Arc::new(Self::with_hold(false))
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self::with_hold(true))
    }

    fn with_hold(hold: bool) -> Self {
        Self {
            hold,
            gates: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
        }
    }

    fn gate(&self, html: &str) -> Arc<Notify> {
        let mut gates = self.gates.lock().expect("gates lock");
        Arc::clone(gates.entry(html.to_string()).or_default())
    }

    pub fn release(&self, html: &str) {
        self.gate(html).notify_one();
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().expect("started lock").clone()
    }

    pub fn has_started(&self, html: &str) -> bool {
        self.started().iter().any(|seen| seen == html)
    }

    pub async fn wait_started(&self, html: &str) {
        for _ in 0..1000 {
            if self.has_started(html) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("rasterization of `{html}` never started");
    }
}

#[async_trait]
impl Rasterizer for GatedRasterizer {
    async fn rasterize(&self, html: &str, _viewport: Viewport) -> Result<Bytes, RasterError> {
        self.started
            .lock()
            .expect("started lock")
            .push(html.to_string());
        if self.hold {
            self.gate(html).notified().await;
        }
        Ok(Bytes::copy_from_slice(html.as_bytes()))
    }
}

/// Wraps raw bytes in a PNG header matching the viewport; fails for input
/// containing [`FAIL_MARKER`].
pub struct MarkerEncoder;

#[async_trait]
impl Encoder for MarkerEncoder {
    async fn encode(&self, raw: Bytes, _params: &EncodeParams) -> Result<Bytes, EncodeError> {
        if raw
            .windows(FAIL_MARKER.len())
            .any(|window| window == FAIL_MARKER.as_bytes())
        {
            return Err(EncodeError::Cli {
                exit_code: Some(1),
                stderr: "simulated encoder failure".to_string(),
            });
        }
        Ok(png_with_size(VIEWPORT.width, VIEWPORT.height, &raw))
    }
}

pub fn png_with_size(width: u32, height: u32, tag: &[u8]) -> Bytes {
    let mut data = Vec::with_capacity(33 + tag.len());
    data.extend_from_slice(b"\x89PNG\r\n\x1a\n");
    data.extend_from_slice(&[0, 0, 0, 13]);
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&[1, 0, 0, 0, 0]);
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(tag);
    Bytes::from(data)
}

pub struct TestApp {
    pub router: Router,
    pub ingest: Arc<IngestService>,
    pub slots: Arc<SlotStore>,
    pub rasterizer: Arc<GatedRasterizer>,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn spawn(scope: LockScope, rasterizer: Arc<GatedRasterizer>) -> Self {
        Self::spawn_with_format(scope, rasterizer, ArtifactFormat::Png).await
    }

    pub async fn spawn_with_format(
        scope: LockScope,
        rasterizer: Arc<GatedRasterizer>,
        format: ArtifactFormat,
    ) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let template_path = dir.path().join("template.liquid");
        std::fs::write(&template_path, TEMPLATE).expect("write template");

        let output = OutputSettings {
            directory: dir.path().join("output"),
            base_name: "output".to_string(),
        };
        let slots = Arc::new(
            SlotStore::open(&output, format, scope)
                .await
                .expect("store opens"),
        );
        let runner = Arc::new(PipelineRunner::new(
            rasterizer.clone(),
            Arc::new(MarkerEncoder),
            Arc::clone(&slots),
            VIEWPORT,
            EncodeParams {
                format,
                dither: "FloydSteinberg".to_string(),
                remap: "pattern:gray50".to_string(),
                depth: 1,
                colors: 2,
            },
            Duration::from_secs(5),
        ));
        let ingest = Arc::new(IngestService::new(
            &TemplateSettings {
                path: template_path,
                allow_inline: true,
            },
            Arc::new(LiquidTemplateRenderer::new().expect("template engine")),
            Dispatcher::new(runner, 8),
        ));
        let router = build_router(
            HttpState {
                ingest: Arc::clone(&ingest),
                slots: Arc::clone(&slots),
            },
            BODY_LIMIT,
        );

        Self {
            router,
            ingest,
            slots,
            rasterizer,
            dir,
        }
    }

    pub fn template_path(&self) -> std::path::PathBuf {
        self.dir.path().join("template.liquid")
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds")
    }

    pub async fn post_render(&self, path: &str, body: impl Into<Body>) -> Response<Body> {
        self.send(
            Request::post(path)
                .header("content-type", "application/json")
                .body(body.into())
                .expect("request"),
        )
        .await
    }

    pub async fn get(&self, path: &str) -> Response<Body> {
        self.send(Request::get(path).body(Body::empty()).expect("request"))
            .await
    }

    pub async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.ingest.dispatcher().wait_idle())
            .await
            .expect("pipelines settle");
    }
}

pub fn render_body(body: &str) -> String {
    serde_json::json!({ "body": body }).to_string()
}

pub fn rendered_html(body: &str) -> String {
    format!("<p>{body}</p>")
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).expect("utf-8 body")
}
