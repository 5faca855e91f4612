use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use time::format_description::well_known::Rfc3339;

use crate::{
    application::error::HttpError,
    domain::{artifact::Artifact, slot::SlotKey},
};

use super::{HttpState, PRODUCED_AT_HEADER};

const SOURCE: &str = "infra::http::artifact";

pub(super) async fn read_default(State(state): State<HttpState>) -> Response {
    read(state, None).await
}

pub(super) async fn read_keyed(
    State(state): State<HttpState>,
    Path(key): Path<String>,
) -> Response {
    read(state, Some(key)).await
}

pub(super) async fn health() -> &'static str {
    "OK"
}

async fn read(state: HttpState, key: Option<String>) -> Response {
    // A key that can never have been published reads the same as an empty slot.
    let key = match SlotKey::parse(key.as_deref()) {
        Ok(key) => key,
        Err(err) => {
            return HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, "Artifact not ready", &err)
                .into_response();
        }
    };

    match state.slots.read(&key).await {
        Some(artifact) => build_artifact_response(&artifact),
        None => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Artifact not ready",
            format!("slot {key} has no published artifact"),
        )
        .into_response(),
    }
}

fn build_artifact_response(artifact: &Artifact) -> Response {
    let mut response = Response::new(Body::from(artifact.bytes.clone()));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(artifact.content_type()),
    );
    if let Ok(value) = HeaderValue::from_str(&artifact.len().to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Ok(value) = artifact
        .produced_at
        .format(&Rfc3339)
        .map_err(|err| err.to_string())
        .and_then(|stamp| HeaderValue::from_str(&stamp).map_err(|err| err.to_string()))
    {
        headers.insert(PRODUCED_AT_HEADER, value);
    }

    response
}
