//! Narrow interfaces to the three external collaborators.
//!
//! Production adapters live in `infra`; tests substitute deterministic fakes so
//! the pipeline and its concurrency can be exercised without a browser or
//! ImageMagick installed.

use std::{io, path::PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::{
    config::EncodeSettings,
    domain::artifact::{ArtifactFormat, Viewport},
};

/// JSON object merged into the template.
pub type TemplateData = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse template: {message}")]
    Parse { message: String },
    #[error("failed to render template: {message}")]
    Render { message: String },
}

/// Merges data into a text template, producing an HTML document.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, data: &TemplateData) -> Result<String, TemplateError>;
}

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("browser unavailable: {0}")]
    NotFound(io::Error),
    #[error("failed to prepare render document: {0}")]
    Io(io::Error),
    #[error("browser invocation failed (exit {exit_code:?}): {stderr}")]
    Browser {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("browser finished without producing a screenshot")]
    MissingOutput,
}

/// Turns an HTML document into raw image bytes at the given viewport.
///
/// Implementations must release every transient resource (temporary
/// documents, browser processes) when the returned future is dropped.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, html: &str, viewport: Viewport) -> Result<Bytes, RasterError>;
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encoder unavailable: {0}")]
    NotFound(io::Error),
    #[error("failed to stage encoder files: {0}")]
    Io(io::Error),
    #[error("encoder invocation failed (exit {exit_code:?}): {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
}

/// Colour reduction parameters handed to the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeParams {
    pub format: ArtifactFormat,
    pub dither: String,
    pub remap: String,
    pub depth: u32,
    pub colors: u32,
}

impl From<&EncodeSettings> for EncodeParams {
    fn from(settings: &EncodeSettings) -> Self {
        Self {
            format: settings.format,
            dither: settings.dither.clone(),
            remap: settings.remap.clone(),
            depth: settings.depth.get(),
            colors: settings.colors.get(),
        }
    }
}

/// Re-encodes raw image bytes for a constrained display.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, raw: Bytes, params: &EncodeParams) -> Result<Bytes, EncodeError>;
}
