//! Inference Client — OpenAI-compatible API client for vLLM-style servers.
//!
//! This module handles all communication with the model endpoint:
//! - Streaming and non-streaming chat / text completions
//! - Audio transcription uploads
//! - SSE stream parsing into reasoning / content channels
//! - Model listing and liveness checks
//! - Client configuration loading from YAML or the environment
//!
//! The client speaks the OpenAI Completions API, so the serving stack behind
//! it (vLLM, Ray Serve LLM, llama.cpp) is a config change, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::CompletionClient;
pub use config::{load_client_config, ClientConfig};
pub use errors::{ErrorCategory, InferenceError};
pub use streaming::collect_stream;
pub use types::{
    AudioSource, ChatMessage, CompletionChunk, CompletionRequest, CompletionResult, ModelInfo,
    Prompt, Role, SamplingParams, TranscriptionRequest, Usage,
};
