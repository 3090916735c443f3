//! External collaborator interfaces.
//!
//! The kernel never talks to a sandbox or a generative model directly; it
//! goes through these object-safe traits. Implementations live outside the
//! core (see the quill-openai crate) and receive everything they need as
//! explicit parameters — including the asset-resolution context for code
//! execution — rather than reading shared process state.

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;

use crate::assets::AssetContext;
use crate::notebook::CostMeta;

/// Collaborator-side failures. Always branch-local: the evaluator folds
/// these into the failing branch's output record.
#[derive(Debug, Error)]
pub enum CollabError {
    /// No collaborator of the required kind is configured.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// Transport-level failure (network, non-success status).
    #[error("transport error: {0}")]
    Http(String),

    /// The reply could not be coerced into the expected shape.
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The service rejected the call for rate limiting.
    #[error("rate limited")]
    RateLimited,

    /// Structured-reply retries were exhausted.
    #[error("failed to generate")]
    Exhausted,

    /// Sandboxed code raised an error.
    #[error("execution failed: {0}")]
    Execution(String),
}

/// A text-completion request, fully interpolated.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub model: String,
    pub temperature: Option<f64>,
    /// Literal JSON Schema text; when present the collaborator coerces the
    /// reply into matching structured data.
    pub schema: Option<String>,
}

/// A successful completion with token/cost accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub result: serde_json::Value,
    pub cost: CostMeta,
}

/// An image-generation request, fully interpolated.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: String,
}

/// A generated image as a self-contained data URI.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub data_uri: String,
    pub cost: Option<CostMeta>,
}

/// Generative text-completion collaborator.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CollabError>;
}

/// Generative image collaborator, including the optional resize step.
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage, CollabError>;

    /// Exact-resize an image data URI to the given dimensions.
    async fn resize(
        &self,
        data_uri: &str,
        width: u32,
        height: u32,
    ) -> Result<String, CollabError>;
}

/// Sandboxed code-execution collaborator.
///
/// `source` defines a function named `run` taking the bound argument names
/// as parameters. The collaborator resolves `asset:` references during
/// composition through the provided context and hands back a plain JSON
/// value (promises and producer objects already settled).
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn execute(
        &self,
        arguments: IndexMap<String, serde_json::Value>,
        source: &str,
        assets: &AssetContext,
    ) -> Result<serde_json::Value, CollabError>;
}
