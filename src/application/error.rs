use std::{borrow::Cow, error::Error as StdError};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{ingest::IngestError, pipeline::PipelineError},
    config::LoadError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: Cow<'static, str>,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: impl Into<Cow<'static, str>>,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message: public_message.into(),
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: impl Into<Cow<'static, str>>,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message: public_message.into(),
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message.into_owned()).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<IngestError> for HttpError {
    fn from(error: IngestError) -> Self {
        const SOURCE: &str = "infra::http::ingest_error_to_http_error";

        match &error {
            IngestError::InvalidKey(_) => {
                HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "Invalid key", &error)
            }
            IngestError::MalformedBody(err) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                format!("Invalid JSON: {err}"),
                &error,
            ),
            IngestError::NotAnObject => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid JSON: body must be an object",
                &error,
            ),
            // Template failures carry the diagnostic so authors can fix their template.
            IngestError::Template(template) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Template error: {template}"),
                &error,
            ),
        }
    }
}

/// Failures that end the process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("server error: {0}")]
    Server(std::io::Error),
}
