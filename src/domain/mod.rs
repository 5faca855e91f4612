//! Domain layer types and invariants.

pub mod artifact;
pub mod error;
pub mod slot;
