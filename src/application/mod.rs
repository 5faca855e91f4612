//! Request ingestion, pipeline orchestration and the collaborator seams.

pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod ports;
