//! Content-addressable extraction of binary payloads from output values.
//!
//! Generated media would otherwise bloat the notebook document: every image
//! or video payload is an inline data URI, often duplicated across fan-out
//! branches. [`sweep`] runs on every save — inline payloads are deduplicated
//! by exact equality into the notebook's asset table and replaced with
//! `asset:<id>` references, and entries no cell references anymore are
//! pruned (mark-and-sweep over the whole notebook).

use rustc_hash::{FxHashMap, FxHashSet};

use crate::notebook::{AssetEntry, AssetKind, Notebook};
use crate::value::Value;

/// Prefix of an asset reference payload.
pub const ASSET_PREFIX: &str = "asset:";

/// Prefix of an inline binary payload.
pub const DATA_PREFIX: &str = "data:";

/// Deduplicate inline payloads and garbage-collect unreferenced entries.
pub fn sweep(notebook: &mut Notebook) {
    let Notebook {
        cells,
        asset_lookup,
        ..
    } = notebook;

    let mut referenced: FxHashSet<String> = FxHashSet::default();
    for cell in cells.iter_mut() {
        let Some(details) = cell.output_details.as_mut() else {
            continue;
        };
        for record in details.records_mut() {
            if let Some(value) = record.value.as_mut() {
                rewrite(value, asset_lookup, &mut referenced);
            }
            // Binding snapshots carry upstream values; keep their
            // references live too.
            for snapshot_value in record.field_snapshot.values_mut().flatten() {
                rewrite(snapshot_value, asset_lookup, &mut referenced);
            }
        }
    }

    let before = asset_lookup.len();
    asset_lookup.retain(|entry| referenced.contains(&entry.asset_id));
    if asset_lookup.len() != before {
        tracing::debug!(
            pruned = before - asset_lookup.len(),
            retained = asset_lookup.len(),
            "pruned unreferenced assets"
        );
    }
}

/// Rewrite one value tree: intern inline payloads, mark live references.
fn rewrite(value: &mut Value, lookup: &mut Vec<AssetEntry>, referenced: &mut FxHashSet<String>) {
    match value {
        Value::Image { content } => intern(content, AssetKind::Image, lookup, referenced),
        Value::Video { content } => intern(content, AssetKind::Video, lookup, referenced),
        Value::Array { values } => {
            for element in values.iter_mut().flatten() {
                rewrite(element, lookup, referenced);
            }
        }
        _ => {}
    }
}

fn intern(
    content: &mut String,
    kind: AssetKind,
    lookup: &mut Vec<AssetEntry>,
    referenced: &mut FxHashSet<String>,
) {
    if let Some(id) = content.strip_prefix(ASSET_PREFIX) {
        referenced.insert(id.to_string());
        return;
    }
    if !content.starts_with(DATA_PREFIX) {
        return;
    }

    let id = match lookup.iter().find(|e| e.payload == *content) {
        Some(existing) => existing.asset_id.clone(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            lookup.push(AssetEntry {
                asset_id: id.clone(),
                kind,
                payload: std::mem::take(content),
            });
            id
        }
    };
    *content = format!("{ASSET_PREFIX}{id}");
    referenced.insert(id);
}

/// Resolve an `asset:<id>` reference to its payload.
///
/// Non-asset references (inline data URIs, plain URLs) pass through
/// unchanged; a dangling asset reference resolves to itself.
pub fn resolve<'a>(notebook: &'a Notebook, reference: &'a str) -> &'a str {
    let Some(id) = reference.strip_prefix(ASSET_PREFIX) else {
        return reference;
    };
    notebook
        .asset_lookup
        .iter()
        .find(|e| e.asset_id == id)
        .map(|e| e.payload.as_str())
        .unwrap_or(reference)
}

/// Immutable snapshot of the asset table, handed to code-execution
/// collaborators so composition helpers can resolve `asset:` references
/// without touching live notebook state.
#[derive(Debug, Clone, Default)]
pub struct AssetContext {
    payloads: FxHashMap<String, String>,
}

impl AssetContext {
    /// Snapshot the notebook's current asset table.
    pub fn snapshot(notebook: &Notebook) -> Self {
        Self {
            payloads: notebook
                .asset_lookup
                .iter()
                .map(|e| (e.asset_id.clone(), e.payload.clone()))
                .collect(),
        }
    }

    /// Resolve a reference against the snapshot; pass-through semantics
    /// match [`resolve`].
    pub fn resolve<'a>(&'a self, reference: &'a str) -> &'a str {
        let Some(id) = reference.strip_prefix(ASSET_PREFIX) else {
            return reference;
        };
        self.payloads.get(id).map(String::as_str).unwrap_or(reference)
    }
}
