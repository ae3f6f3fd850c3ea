//! HTTP adapters for the language model and embedding providers.
//!
//! Both providers speak the OpenAI-compatible REST dialect. Callers depend on
//! the [`ChatModel`] and [`Embedder`] capability traits so pipelines can run
//! against deterministic stand-ins in tests.

mod chat;
mod embedding;
mod http;

pub use chat::{ChatClient, ChatModel};
pub use embedding::{Embedder, HttpEmbedder, cosine_similarity, normalize};
