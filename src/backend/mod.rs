//! Responses backend: client, failure type and model availability

pub mod client;
pub mod error;
pub mod health;

pub use client::{ChunkStream, HttpBackend, ResponsesBackend};
pub use error::BackendError;
pub use health::{ModelHealth, ModelStatus};
