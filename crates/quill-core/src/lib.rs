//! Core engine for the Quill generative notebook kernel.
//!
//! This crate provides:
//! - The notebook document model and its JSON wire format
//! - Dependency resolution with for-each fan-out and positional alignment
//! - Cell evaluation against pluggable generative collaborators
//! - Run orchestration with batched concurrent fan-out
//! - Deduplicated binary-asset storage with mark-and-sweep collection

pub mod assets;
pub mod bindings;
pub mod collab;
pub mod error;
pub mod eval;
pub mod graph;
pub mod kernel;
pub mod notebook;
pub mod template;
pub mod value;

pub use assets::{ASSET_PREFIX, AssetContext, DATA_PREFIX};
pub use bindings::{BindingSet, Resolved, expand};
pub use collab::{
    CodeRunner, CollabError, Completion, CompletionRequest, GeneratedImage, ImageModel,
    ImageRequest, TextModel,
};
pub use error::{Error, Result};
pub use eval::Evaluator;
pub use graph::{ReferenceKind, check_cycles, fields_from_output_reference, references_above};
pub use kernel::{NotebookKernel, RUN_BATCH_SIZE};
pub use notebook::{
    AssetEntry, AssetKind, CellInput, CostMeta, DependencyRef, Notebook, NotebookCell,
    NotebookMetadata, OUTPUT_ID_SUFFIX, OutputDetails, OutputRecord, output_id,
};
pub use value::{Resize, Shape, Value, display_opt};
