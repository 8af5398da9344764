//! `recall-runtime` – model-server plumbing for Recall.
//!
//! Implements the two collaborator seams of `recall-memory` against any
//! OpenAI-compatible server, and owns process-wide tracing setup.
//!
//! # Modules
//!
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]: async
//!   `/v1/chat/completions` client; the store's
//!   [`TextGenerator`][recall_memory::TextGenerator] for merging facts.
//! - [`embedding`] – [`EmbeddingClient`][embedding::EmbeddingClient]: async
//!   `/v1/embeddings` client; the store's
//!   [`Embedder`][recall_memory::Embedder].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to enable export.

pub mod embedding;
pub mod llm_driver;
pub mod telemetry;

#[cfg(test)]
mod test_server;

pub use embedding::{DEFAULT_EMBEDDING_MODEL, EmbeddingClient};
pub use llm_driver::{ChatMessage, LlmDriver, LlmError, Role};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
