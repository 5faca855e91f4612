use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::application::{
    error::HttpError,
    ingest::{Accepted, RenderRequest},
};

use super::HttpState;

pub(super) async fn submit_default(State(state): State<HttpState>, body: Bytes) -> Response {
    submit(state, None, body).await
}

pub(super) async fn submit_keyed(
    State(state): State<HttpState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    submit(state, Some(key), body).await
}

async fn submit(state: HttpState, key: Option<String>, body: Bytes) -> Response {
    let accepted = match RenderRequest::parse(key.as_deref(), &body) {
        Ok(request) => state.ingest.submit(request).await,
        Err(err) => Err(err),
    };

    match accepted {
        Ok(Accepted { key, handle }) => {
            // The run continues detached; its outcome is observable only through reads.
            drop(handle);
            (
                StatusCode::ACCEPTED,
                format!(
                    "Rendering started. Visit {} to retrieve the result.",
                    key.artifact_path()
                ),
            )
                .into_response()
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}
