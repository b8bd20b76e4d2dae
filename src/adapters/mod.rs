//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for the text-generation backends
//! the article worker can call (Anthropic Messages API, Fabric CLI), plus
//! the local Whisper transcription engine.

pub mod anthropic;
pub mod fabric;
pub mod whisper;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

pub use anthropic::AnthropicAdapter;
pub use fabric::FabricAdapter;
pub use whisper::{WhisperEngine, WhisperSettings};

/// Output from an adapter execution
#[derive(Debug, Clone)]
pub struct AdapterOutput {
    /// The content returned by the adapter
    pub content: String,

    /// Tokens used (if available)
    pub tokens_used: Option<u64>,
}

impl AdapterOutput {
    /// Create a new adapter output with just content
    pub fn new(content: String) -> Self {
        Self {
            content,
            tokens_used: None,
        }
    }
}

/// Trait for text-generation adapters
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Execute an action with input.
    ///
    /// `action` is backend-specific: a model name for HTTP backends, a
    /// pattern name for Fabric.
    async fn execute(&self, action: &str, input: &str, timeout: Duration) -> Result<AdapterOutput>;

    /// Check the backend is reachable and configured
    async fn health_check(&self) -> Result<()>;
}

/// Typed failures adapters attach to their `anyhow` errors so callers can
/// decide whether to retry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("rate_limit: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("model overloaded")]
    Overloaded,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

impl GenerationError {
    /// Only rate limiting is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Find a typed generation error inside an `anyhow` chain
    pub fn find(error: &anyhow::Error) -> Option<&GenerationError> {
        error.chain().find_map(|e| e.downcast_ref::<GenerationError>())
    }
}
