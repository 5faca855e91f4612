//! Infrastructure adapters and runtime bootstrap.

pub mod chromium;
pub mod error;
pub mod http;
pub mod imagemagick;
pub mod slots;
pub mod telemetry;
pub mod template;
