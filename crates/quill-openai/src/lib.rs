//! OpenAI-backed implementations of the Quill collaborator traits.
//!
//! [`ChatClient`] serves text completions (with optional function-call
//! schema coercion) and [`ImagesClient`] serves image generation and
//! resizing. Both fold transport and protocol failures into the core
//! [`CollabError`](quill_core::CollabError) taxonomy so a bad call is
//! always branch-local from the kernel's point of view.

pub mod chat;
pub mod image;

pub use chat::ChatClient;
pub use image::ImagesClient;

/// Default API endpoint; override per client for proxies and tests.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
