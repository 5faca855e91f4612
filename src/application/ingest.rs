//! Turns a render request into an HTML document and hands it to the dispatcher.
//!
//! Everything here runs on the request path: key validation, body parsing and
//! template rendering. Failures surface synchronously to the caller; nothing is
//! dispatched unless the document rendered.

use std::{path::PathBuf, sync::Arc};

use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    application::{
        dispatch::Dispatcher,
        pipeline::PipelineOutcome,
        ports::{TemplateData, TemplateError, TemplateRenderer},
    },
    config::TemplateSettings,
    domain::{error::DomainError, slot::SlotKey},
};

const SOURCE: &str = "application::ingest";

/// Data field that may carry a template overriding the configured file.
pub const INLINE_TEMPLATE_FIELD: &str = "template";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid slot key: {0}")]
    InvalidKey(#[from] DomainError),
    #[error("malformed request body: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub key: SlotKey,
    pub data: TemplateData,
}

impl RenderRequest {
    /// Validate the key and decode the body, which must be a JSON object.
    pub fn parse(key: Option<&str>, body: &[u8]) -> Result<Self, IngestError> {
        let key = SlotKey::parse(key)?;
        let data = match serde_json::from_slice::<Value>(body)? {
            Value::Object(map) => map,
            _ => return Err(IngestError::NotAnObject),
        };
        Ok(Self { key, data })
    }
}

/// Result of a successful submission: the document is rendering in the
/// background and will land at [`SlotKey::artifact_path`].
#[derive(Debug)]
pub struct Accepted {
    pub key: SlotKey,
    pub handle: JoinHandle<PipelineOutcome>,
}

#[derive(Clone)]
pub struct IngestService {
    template_path: PathBuf,
    allow_inline: bool,
    renderer: Arc<dyn TemplateRenderer>,
    dispatcher: Dispatcher,
}

impl IngestService {
    pub fn new(
        settings: &TemplateSettings,
        renderer: Arc<dyn TemplateRenderer>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            template_path: settings.path.clone(),
            allow_inline: settings.allow_inline,
            renderer,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Render the request's document and dispatch the pipeline for it.
    pub async fn submit(&self, request: RenderRequest) -> Result<Accepted, IngestError> {
        let html = self.render_html(&request.data).await?;
        debug!(
            target = SOURCE,
            op = "ingest::submit",
            key = %request.key,
            html_bytes = html.len(),
            "Template rendered"
        );

        let handle = self.dispatcher.dispatch(request.key.clone(), html);
        info!(
            target = SOURCE,
            op = "ingest::submit",
            result = "accepted",
            key = %request.key,
            "Render accepted"
        );

        Ok(Accepted {
            key: request.key,
            handle,
        })
    }

    /// The template file is read on every call so edits apply without a restart.
    pub async fn render_html(&self, data: &TemplateData) -> Result<String, IngestError> {
        let source = match self.inline_template(data) {
            Some(inline) => inline.to_string(),
            None => tokio::fs::read_to_string(&self.template_path)
                .await
                .map_err(|source| TemplateError::Read {
                    path: self.template_path.clone(),
                    source,
                })?,
        };

        let html = self.renderer.render(&source, data)?;
        Ok(html)
    }

    fn inline_template<'a>(&self, data: &'a TemplateData) -> Option<&'a str> {
        if !self.allow_inline {
            return None;
        }
        data.get(INLINE_TEMPLATE_FIELD)
            .and_then(Value::as_str)
            .filter(|template| !template.trim().is_empty())
    }
}
