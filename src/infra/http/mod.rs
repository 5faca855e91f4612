//! HTTP surface: write requests, artifact reads and liveness.

mod artifact;
mod middleware;
mod render;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

pub use middleware::REQUEST_ID_HEADER;

use crate::{
    application::ingest::IngestService, domain::artifact::ArtifactFormat, infra::slots::SlotStore,
};

use self::middleware::{log_responses, set_request_context};

pub const PRODUCED_AT_HEADER: &str = "x-produced-at";

#[derive(Clone)]
pub struct HttpState {
    pub ingest: Arc<IngestService>,
    pub slots: Arc<SlotStore>,
}

pub fn build_router(state: HttpState, max_body_bytes: usize) -> Router {
    let router = Router::new()
        .route("/render", post(render::submit_default))
        .route("/render/{key}", post(render::submit_keyed))
        .route("/artifact", get(artifact::read_default))
        .route("/artifact/{key}", get(artifact::read_keyed));

    // Legacy paths name the file extension, so only the configured one is served.
    let router = match state.slots.format() {
        ArtifactFormat::Png => router
            .route("/screenshot.png", get(artifact::read_default))
            .route("/screenshot.png/{key}", get(artifact::read_keyed)),
        ArtifactFormat::Bmp => router
            .route("/screenshot.bmp", get(artifact::read_default))
            .route("/screenshot.bmp/{key}", get(artifact::read_keyed)),
    };

    router
        .route("/health", get(artifact::health))
        .route("/up", get(artifact::health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .with_state(state)
}
