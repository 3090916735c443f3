//! The notebook document model.
//!
//! A [`Notebook`] is the unit of persistence: an ordered cell sequence, the
//! shared binary-asset lookup table, and document metadata, all serialized as
//! one JSON document. Dependency maps preserve declaration order (axis order
//! for for-each expansion), so they are [`IndexMap`]s rather than hash maps.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Suffix appended to a cell's input id to form its output id.
pub const OUTPUT_ID_SUFFIX: &str = "Output";

/// Compose the synthesized output id for a cell input id.
pub fn output_id(input_id: &str) -> String {
    format!("{input_id}{OUTPUT_ID_SUFFIX}")
}

/// A notebook document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub cells: Vec<NotebookCell>,
    #[serde(default)]
    pub asset_lookup: Vec<AssetEntry>,
    pub metadata: NotebookMetadata,
}

/// Document metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookMetadata {
    pub title: String,
}

/// One cell: its input specification and, after at least one run, its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookCell {
    pub input: CellInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_details: Option<OutputDetails>,
}

/// A cell's input specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellInput {
    /// Stable identifier, assigned at creation.
    pub id: String,
    /// Named dependencies, in declaration order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependencies: IndexMap<String, DependencyRef>,
    /// The input content or prompt specification.
    pub input: Value,
}

/// A declared dependency on another cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DependencyRef {
    /// The referenced cell's processed output, or its literal input when the
    /// id addresses the cell's own raw identifier.
    CellReference {
        cell_id: String,
        #[serde(default)]
        for_each: bool,
    },
    /// One named field from the per-branch binding snapshot of a fanned
    /// upstream cell.
    OutputReference {
        cell_id: String,
        field: String,
        #[serde(default)]
        for_each: bool,
    },
}

impl DependencyRef {
    /// The referenced cell id.
    pub fn cell_id(&self) -> &str {
        match self {
            DependencyRef::CellReference { cell_id, .. }
            | DependencyRef::OutputReference { cell_id, .. } => cell_id,
        }
    }

    /// Whether this dependency fans out over a collection source.
    pub fn for_each(&self) -> bool {
        match self {
            DependencyRef::CellReference { for_each, .. }
            | DependencyRef::OutputReference { for_each, .. } => *for_each,
        }
    }
}

/// Token and cost accounting for a generative call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostMeta {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_in: f64,
    pub cost_out: f64,
}

impl CostMeta {
    /// Sum two accountings (for notebook-wide totals).
    pub fn add(&self, other: &CostMeta) -> CostMeta {
        CostMeta {
            tokens_in: self.tokens_in + other.tokens_in,
            tokens_out: self.tokens_out + other.tokens_out,
            cost_in: self.cost_in + other.cost_in,
            cost_out: self.cost_out + other.cost_out,
        }
    }
}

/// The result of evaluating one binding set against a cell input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    /// Deterministically `<input id>Output`.
    pub id: String,
    /// True once evaluation settled, whether it succeeded or errored.
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostMeta>,
    /// The resolved binding that produced this record. Always present, even
    /// for failed branches, so downstream output references stay valid.
    #[serde(default)]
    pub field_snapshot: IndexMap<String, Option<Value>>,
}

impl OutputRecord {
    /// An unprocessed placeholder carrying its binding snapshot.
    pub fn pending(id: String, field_snapshot: IndexMap<String, Option<Value>>) -> Self {
        Self {
            id,
            processed: false,
            value: None,
            error: None,
            cost: None,
            field_snapshot,
        }
    }
}

/// A cell's output: one record, or one per fan-out branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutputDetails {
    Single { output: OutputRecord },
    Fanned { outputs: Vec<OutputRecord> },
}

impl OutputDetails {
    /// All constituent records, in branch order.
    pub fn records(&self) -> &[OutputRecord] {
        match self {
            OutputDetails::Single { output } => std::slice::from_ref(output),
            OutputDetails::Fanned { outputs } => outputs,
        }
    }

    /// Mutable access to the constituent records.
    pub fn records_mut(&mut self) -> &mut [OutputRecord] {
        match self {
            OutputDetails::Single { output } => std::slice::from_mut(output),
            OutputDetails::Fanned { outputs } => outputs,
        }
    }

    /// Processed only when every constituent record is processed.
    pub fn is_processed(&self) -> bool {
        self.records().iter().all(|r| r.processed)
    }
}

impl Notebook {
    /// An empty untitled notebook.
    pub fn empty(title: impl Into<String>) -> Self {
        Self {
            cells: Vec::new(),
            asset_lookup: Vec::new(),
            metadata: NotebookMetadata {
                title: title.into(),
            },
        }
    }

    /// Find a cell by raw input id or synthesized output id.
    pub fn find_cell(&self, id: &str) -> Option<&NotebookCell> {
        self.cells
            .iter()
            .find(|c| c.input.id == id || output_id(&c.input.id) == id)
    }

    /// Position of a cell by raw input id or synthesized output id.
    pub fn find_cell_index(&self, id: &str) -> Option<usize> {
        self.cells
            .iter()
            .position(|c| c.input.id == id || output_id(&c.input.id) == id)
    }

    /// Notebook-wide generative cost totals across all processed records.
    pub fn total_cost(&self) -> CostMeta {
        self.cells
            .iter()
            .filter_map(|c| c.output_details.as_ref())
            .flat_map(|d| d.records())
            .filter_map(|r| r.cost.as_ref())
            .fold(CostMeta::default(), |acc, c| acc.add(c))
    }
}

/// Kind of deduplicated binary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetKind {
    Image,
    Video,
}

/// A deduplicated binary payload stored once per notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEntry {
    pub asset_id: String,
    pub kind: AssetKind,
    pub payload: String,
}
