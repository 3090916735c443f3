//! The cell reference graph.
//!
//! Built on demand from the dependency maps. Used for:
//! - cycle detection before recursive resolution (a cycle would otherwise
//!   recurse forever at run time),
//! - enumerating valid reference targets above a cell for editor surfaces.

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::notebook::{Notebook, output_id};

/// Which dependency kind a reference list is being built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `cellReference`: may address a cell's literal input or its output.
    Cell,
    /// `outputReference`: only addresses fanned outputs.
    Output,
}

/// Detect cyclic output references across the notebook.
///
/// Only output-id references create execution edges: a raw-id reference
/// reads the target's literal input and never triggers a run. A cell
/// referencing its own output is a self-cycle.
pub fn check_cycles(notebook: &Notebook) -> Result<()> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut nodes: FxHashMap<usize, NodeIndex> = FxHashMap::default();
    for (i, _) in notebook.cells.iter().enumerate() {
        nodes.insert(i, graph.add_node(i));
    }

    for (consumer, cell) in notebook.cells.iter().enumerate() {
        for dep in cell.input.dependencies.values() {
            let target = dep.cell_id();
            let Some(producer) = notebook.find_cell_index(target) else {
                // Dangling references surface as CellNotFound at run time.
                continue;
            };
            // Raw-id references (own input or another cell's literal input)
            // do not execute the producer.
            if notebook.cells[producer].input.id == target {
                continue;
            }
            if producer == consumer {
                return Err(Error::CyclicDependency(format!(
                    "cell '{}' references its own output",
                    cell.input.id
                )));
            }
            graph.add_edge(nodes[&producer], nodes[&consumer], ());
        }
    }

    for scc in petgraph::algo::kosaraju_scc(&graph) {
        if scc.len() > 1 {
            let names: Vec<&str> = scc
                .iter()
                .map(|&idx| notebook.cells[graph[idx]].input.id.as_str())
                .collect();
            return Err(Error::CyclicDependency(format!(
                "{} -> {}",
                names.join(" -> "),
                names[0]
            )));
        }
    }
    Ok(())
}

/// Candidate reference targets strictly above `cell_id` in the sequence.
///
/// Cell references may address either a cell's raw id (its literal input) or
/// its synthesized output id; output references only address outputs.
pub fn references_above(notebook: &Notebook, kind: ReferenceKind, cell_id: &str) -> Vec<String> {
    let limit = notebook
        .find_cell_index(cell_id)
        .unwrap_or(notebook.cells.len());

    let mut ids = Vec::new();
    for cell in &notebook.cells[..limit] {
        if kind == ReferenceKind::Cell {
            ids.push(cell.input.id.clone());
        }
        ids.push(output_id(&cell.input.id));
    }
    ids
}

/// Field names an `outputReference` can extract from a fanned upstream cell.
///
/// These are the binding-snapshot keys of the upstream's branches; empty when
/// the upstream has not fanned out yet.
pub fn fields_from_output_reference(notebook: &Notebook, upstream_id: &str) -> Vec<String> {
    notebook
        .find_cell(upstream_id)
        .and_then(|cell| cell.output_details.as_ref())
        .map(|details| match details {
            crate::notebook::OutputDetails::Fanned { outputs } => outputs
                .first()
                .map(|r| r.field_snapshot.keys().cloned().collect())
                .unwrap_or_default(),
            crate::notebook::OutputDetails::Single { .. } => Vec::new(),
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::{CellInput, DependencyRef, NotebookCell};
    use crate::value::Value;
    use indexmap::IndexMap;

    fn cell(id: &str, deps: &[(&str, &str)]) -> NotebookCell {
        let dependencies: IndexMap<String, DependencyRef> = deps
            .iter()
            .map(|(name, target)| {
                (
                    name.to_string(),
                    DependencyRef::CellReference {
                        cell_id: target.to_string(),
                        for_each: false,
                    },
                )
            })
            .collect();
        NotebookCell {
            input: CellInput {
                id: id.into(),
                dependencies,
                input: Value::Markdown {
                    content: String::new(),
                },
            },
            output_details: None,
        }
    }

    fn notebook(cells: Vec<NotebookCell>) -> Notebook {
        let mut nb = Notebook::empty("t");
        nb.cells = cells;
        nb
    }

    #[test]
    fn test_linear_chain_has_no_cycle() {
        let nb = notebook(vec![
            cell("a", &[]),
            cell("b", &[("x", "aOutput")]),
            cell("c", &[("y", "bOutput")]),
        ]);
        assert!(check_cycles(&nb).is_ok());
    }

    #[test]
    fn test_output_cycle_detected() {
        let nb = notebook(vec![
            cell("a", &[("x", "cOutput")]),
            cell("b", &[("x", "aOutput")]),
            cell("c", &[("x", "bOutput")]),
        ]);
        let err = check_cycles(&nb).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency(_)));
    }

    #[test]
    fn test_self_output_reference_is_cycle() {
        let nb = notebook(vec![cell("a", &[("me", "aOutput")])]);
        assert!(matches!(
            check_cycles(&nb).unwrap_err(),
            Error::CyclicDependency(_)
        ));
    }

    #[test]
    fn test_own_input_reference_is_not_cycle() {
        // Raw-id self reference reads the literal input; no execution edge.
        let nb = notebook(vec![cell("a", &[("me", "a")])]);
        assert!(check_cycles(&nb).is_ok());
    }

    #[test]
    fn test_fields_come_from_first_branch_snapshot() {
        use crate::notebook::{OutputDetails, OutputRecord};

        let mut nb = notebook(vec![cell("a", &[])]);
        assert!(fields_from_output_reference(&nb, "aOutput").is_empty());

        let mut snapshot = IndexMap::new();
        snapshot.insert("item".to_string(), None);
        snapshot.insert("extra".to_string(), None);
        nb.cells[0].output_details = Some(OutputDetails::Fanned {
            outputs: vec![OutputRecord::pending("aOutput".into(), snapshot)],
        });
        assert_eq!(
            fields_from_output_reference(&nb, "aOutput"),
            vec!["item", "extra"]
        );
    }

    #[test]
    fn test_references_above_kinds() {
        let nb = notebook(vec![cell("a", &[]), cell("b", &[]), cell("c", &[])]);
        let cells = references_above(&nb, ReferenceKind::Cell, "c");
        assert_eq!(cells, vec!["a", "aOutput", "b", "bOutput"]);
        let outputs = references_above(&nb, ReferenceKind::Output, "b");
        assert_eq!(outputs, vec!["aOutput"]);
    }
}
