//! The notebook kernel: dependency resolution and run orchestration.
//!
//! [`NotebookKernel`] owns a notebook document and an [`Evaluator`], and is
//! the only writer of output state. Every mutating operation takes
//! `&mut self`, so runs against one kernel are serialized by the borrow
//! checker and partial fan-out publication can never interleave with a
//! competing run of the same notebook.

use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, join_all};
use indexmap::IndexMap;

use crate::assets::{self, AssetContext};
use crate::bindings::{self, BindingSet, Resolved};
use crate::error::{Error, Result};
use crate::eval::Evaluator;
use crate::graph::check_cycles;
use crate::notebook::{
    CellInput, DependencyRef, Notebook, NotebookCell, OutputDetails, OutputRecord, output_id,
};
use crate::value::{Shape, Value};

/// How many fan-out branches are evaluated concurrently per batch.
pub const RUN_BATCH_SIZE: usize = 5;

type SaveHook = Box<dyn Fn(Notebook) + Send + Sync>;

/// Orchestrates cell runs over one notebook document.
pub struct NotebookKernel {
    notebook: Notebook,
    evaluator: Evaluator,
    path: Option<PathBuf>,
    batch_size: usize,
    on_save: Option<SaveHook>,
}

impl NotebookKernel {
    pub fn new(notebook: Notebook, evaluator: Evaluator) -> Self {
        Self {
            notebook,
            evaluator,
            path: None,
            batch_size: RUN_BATCH_SIZE,
            on_save: None,
        }
    }

    /// Load a notebook document from disk.
    pub fn load_book(path: impl AsRef<Path>, evaluator: Evaluator) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let notebook: Notebook = serde_json::from_str(&raw)?;
        let mut kernel = Self::new(notebook, evaluator);
        kernel.path = Some(path.as_ref().to_path_buf());
        Ok(kernel)
    }

    /// Where [`save_book`](Self::save_book) writes the document.
    pub fn set_save_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    /// Register a hook invoked with a snapshot after every write-back.
    pub fn on_save(&mut self, hook: impl Fn(Notebook) + Send + Sync + 'static) {
        self.on_save = Some(Box::new(hook));
    }

    pub fn set_batch_size(&mut self, size: usize) {
        self.batch_size = size.max(1);
    }

    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    pub fn into_notebook(self) -> Notebook {
        self.notebook
    }

    /// Sweep assets and persist the document, then fire the save hook.
    pub fn save_book(&mut self) -> Result<()> {
        assets::sweep(&mut self.notebook);
        if let Some(path) = &self.path {
            let raw = serde_json::to_string_pretty(&self.notebook)?;
            std::fs::write(path, raw)?;
        }
        if let Some(hook) = &self.on_save {
            hook(self.notebook.clone());
        }
        Ok(())
    }

    // ---- editing operations ----

    /// Insert a cell, at `position` or at the end.
    pub fn add_cell(&mut self, input: CellInput, position: Option<usize>) -> Result<()> {
        if self.notebook.find_cell(&input.id).is_some()
            || self.notebook.find_cell(&output_id(&input.id)).is_some()
        {
            return Err(Error::InvalidOperation(format!(
                "a cell with id '{}' already exists",
                input.id
            )));
        }
        let at = position.unwrap_or(self.notebook.cells.len());
        if at > self.notebook.cells.len() {
            return Err(Error::InvalidOperation(format!(
                "insert position {at} is past the end of the notebook"
            )));
        }
        self.notebook.cells.insert(
            at,
            NotebookCell {
                input,
                output_details: None,
            },
        );
        Ok(())
    }

    pub fn remove_cell(&mut self, id: &str) -> Result<()> {
        let index = self
            .notebook
            .find_cell_index(id)
            .ok_or_else(|| Error::CellNotFound(id.to_string()))?;
        self.notebook.cells.remove(index);
        Ok(())
    }

    pub fn move_cell(&mut self, id: &str, to: usize) -> Result<()> {
        let from = self
            .notebook
            .find_cell_index(id)
            .ok_or_else(|| Error::CellNotFound(id.to_string()))?;
        if to >= self.notebook.cells.len() {
            return Err(Error::InvalidOperation(format!(
                "move target {to} is past the end of the notebook"
            )));
        }
        let cell = self.notebook.cells.remove(from);
        self.notebook.cells.insert(to, cell);
        Ok(())
    }

    /// Replace a cell's input specification, discarding its outputs.
    pub fn update_cell(&mut self, input: CellInput) -> Result<()> {
        let index = self
            .notebook
            .find_cell_index(&input.id)
            .ok_or_else(|| Error::CellNotFound(input.id.clone()))?;
        self.notebook.cells[index] = NotebookCell {
            input,
            output_details: None,
        };
        Ok(())
    }

    /// Overwrite the text of a markdown cell without touching its outputs.
    pub fn set_cell_input(&mut self, id: &str, content: String) -> Result<()> {
        let index = self
            .notebook
            .find_cell_index(id)
            .ok_or_else(|| Error::CellNotFound(id.to_string()))?;
        match &mut self.notebook.cells[index].input.input {
            Value::Markdown { content: current } => {
                *current = content;
                Ok(())
            }
            _ => Err(Error::InvalidOperation(format!(
                "cell '{id}' is not a markdown cell"
            ))),
        }
    }

    pub fn clear_outputs(&mut self, id: &str) -> Result<()> {
        let index = self
            .notebook
            .find_cell_index(id)
            .ok_or_else(|| Error::CellNotFound(id.to_string()))?;
        self.notebook.cells[index].output_details = None;
        Ok(())
    }

    pub fn cell_has_output(&self, id: &str) -> bool {
        self.notebook
            .find_cell(id)
            .and_then(|c| c.output_details.as_ref())
            .is_some()
    }

    /// One cell's output records, in branch order; empty before the first
    /// run. Export surfaces serialize this directly.
    pub fn cell_outputs(&self, id: &str) -> Result<&[OutputRecord]> {
        let cell = self
            .notebook
            .find_cell(id)
            .ok_or_else(|| Error::CellNotFound(id.to_string()))?;
        Ok(cell
            .output_details
            .as_ref()
            .map(OutputDetails::records)
            .unwrap_or_default())
    }

    // ---- running ----

    /// Run one cell, resolving and running unprocessed upstreams first.
    ///
    /// A no-op when the cell is already fully processed and `force` is not
    /// set. A single resolved binding yields a [`OutputDetails::Single`]
    /// record; a for-each expansion yields [`OutputDetails::Fanned`],
    /// evaluated in concurrent fixed-size batches with the partial output
    /// published and saved after every batch.
    pub async fn run_cell(&mut self, id: &str, force: bool) -> Result<()> {
        check_cycles(&self.notebook)?;
        self.run_cell_boxed(id.to_string(), force).await
    }

    fn run_cell_boxed(&mut self, id: String, force: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let index = self
                .notebook
                .find_cell_index(&id)
                .ok_or_else(|| Error::CellNotFound(id.clone()))?;
            if !force
                && self.notebook.cells[index]
                    .output_details
                    .as_ref()
                    .is_some_and(OutputDetails::is_processed)
            {
                return Ok(());
            }

            let input = self.notebook.cells[index].input.clone();
            tracing::debug!(cell = %input.id, force, "running cell");

            let entries = self.resolve_dependencies(&input.dependencies, true).await?;
            let fanned = entries
                .iter()
                .any(|(_, r)| matches!(r, Resolved::Axis(_)));
            let sets = bindings::expand(entries)?;

            if !fanned {
                let binding = sets.into_iter().next().unwrap_or_default();
                let context = AssetContext::snapshot(&self.notebook);
                let record = self.evaluator.process(&input, &binding, &context).await;
                self.notebook.cells[index].output_details =
                    Some(OutputDetails::Single { output: record });
                return self.save_book();
            }

            // Publish pending placeholders first so partial progress is
            // visible (and rerunnable) from the first batch on.
            let placeholders = sets
                .iter()
                .map(|b| OutputRecord::pending(output_id(&input.id), b.clone()))
                .collect();
            self.notebook.cells[index].output_details =
                Some(OutputDetails::Fanned { outputs: placeholders });
            self.save_book()?;

            let mut start = 0;
            while start < sets.len() {
                let end = (start + self.batch_size).min(sets.len());
                let context = AssetContext::snapshot(&self.notebook);
                let batch = join_all(
                    sets[start..end]
                        .iter()
                        .map(|binding| self.evaluator.process(&input, binding, &context)),
                )
                .await;
                if let Some(OutputDetails::Fanned { outputs }) =
                    &mut self.notebook.cells[index].output_details
                {
                    for (offset, record) in batch.into_iter().enumerate() {
                        outputs[start + offset] = record;
                    }
                }
                self.save_book()?;
                start = end;
            }
            Ok(())
        })
    }

    /// Re-resolve and re-evaluate one branch of an existing fanned output.
    pub async fn rerun_cell_output(&mut self, id: &str, branch: usize, force: bool) -> Result<()> {
        check_cycles(&self.notebook)?;
        let index = self
            .notebook
            .find_cell_index(id)
            .ok_or_else(|| Error::CellNotFound(id.to_string()))?;
        match self.notebook.cells[index].output_details.as_ref() {
            Some(OutputDetails::Fanned { outputs }) => {
                if branch >= outputs.len() {
                    return Err(Error::InvalidOperation(format!(
                        "cell '{id}' has {} branches, no branch {branch}",
                        outputs.len()
                    )));
                }
                if !force && outputs[branch].processed {
                    return Ok(());
                }
            }
            _ => {
                return Err(Error::InvalidOperation(format!(
                    "cell '{id}' has no fanned output to rerun"
                )));
            }
        }

        let input = self.notebook.cells[index].input.clone();
        let entries = self.resolve_dependencies(&input.dependencies, true).await?;
        let sets = bindings::expand(entries)?;
        let binding = sets.into_iter().nth(branch).ok_or_else(|| {
            Error::InvalidOperation(format!(
                "branch {branch} of cell '{id}' no longer exists after resolution"
            ))
        })?;

        let context = AssetContext::snapshot(&self.notebook);
        let record = self.evaluator.process(&input, &binding, &context).await;
        if let Some(OutputDetails::Fanned { outputs }) =
            &mut self.notebook.cells[index].output_details
        {
            outputs[branch] = record;
        }
        self.save_book()
    }

    /// Resolve a dependency map into concrete binding sets.
    ///
    /// With `allow_recursive_run` unset, an unprocessed upstream is a
    /// [`Error::DependencyNotReady`] instead of being run first; previews
    /// use that mode.
    pub async fn fill_dependencies(
        &mut self,
        dependencies: &IndexMap<String, DependencyRef>,
        allow_recursive_run: bool,
    ) -> Result<Vec<BindingSet>> {
        let entries = self
            .resolve_dependencies(dependencies, allow_recursive_run)
            .await?;
        bindings::expand(entries)
    }

    /// Classify each dependency into its resolved source, in declaration
    /// order. The first for-each dependency is the expansion driver and
    /// always contributes an axis; any *other* output reference naming the
    /// driver's cell aligns positionally instead of contributing an axis.
    async fn resolve_dependencies(
        &mut self,
        dependencies: &IndexMap<String, DependencyRef>,
        allow_recursive_run: bool,
    ) -> Result<Vec<(String, Resolved)>> {
        let mut driver_cell = None;
        let mut driver_name = None;
        for (name, dep) in dependencies {
            if dep.for_each() {
                driver_cell = Some(
                    self.notebook
                        .find_cell_index(dep.cell_id())
                        .ok_or_else(|| Error::CellNotFound(dep.cell_id().to_string()))?,
                );
                driver_name = Some(name.as_str());
                break;
            }
        }

        let mut entries = Vec::with_capacity(dependencies.len());
        for (name, dep) in dependencies {
            let target = self
                .notebook
                .find_cell_index(dep.cell_id())
                .ok_or_else(|| Error::CellNotFound(dep.cell_id().to_string()))?;
            let raw_match = self.notebook.cells[target].input.id == dep.cell_id();

            let resolved = match dep {
                // A raw-id reference reads the cell's current input value,
                // which makes self-referential prompt cells expressible.
                DependencyRef::CellReference { for_each, .. } if raw_match => {
                    let value = self.notebook.cells[target].input.input.clone();
                    if *for_each {
                        match value.shape() {
                            Shape::Collection(elements) => Resolved::Axis(elements),
                            Shape::Scalar => Resolved::Axis(vec![Some(value)]),
                        }
                    } else {
                        Resolved::Scalar(Some(value))
                    }
                }

                DependencyRef::CellReference { for_each, .. } => {
                    self.ensure_processed(target, allow_recursive_run).await?;
                    match self.output_details(target, name)? {
                        OutputDetails::Single { output } => {
                            let value = output.value.clone();
                            if *for_each {
                                match value.as_ref().map(Value::shape) {
                                    Some(Shape::Collection(elements)) => Resolved::Axis(elements),
                                    _ => Resolved::Axis(vec![value]),
                                }
                            } else {
                                Resolved::Scalar(value)
                            }
                        }
                        OutputDetails::Fanned { outputs } => {
                            let values: Vec<Option<Value>> =
                                outputs.iter().map(|r| r.value.clone()).collect();
                            if *for_each {
                                Resolved::Axis(values)
                            } else {
                                Resolved::Scalar(Some(Value::Array { values }))
                            }
                        }
                    }
                }

                DependencyRef::OutputReference { field, for_each, .. } => {
                    if raw_match {
                        return Err(Error::InvalidOperation(format!(
                            "dependency '{name}' must reference an output id, not '{}'",
                            dep.cell_id()
                        )));
                    }
                    self.ensure_processed(target, allow_recursive_run).await?;
                    // The driver declaration itself is an axis regardless of
                    // its target; only other references to the driver's cell
                    // pair by index.
                    let is_driver = driver_name == Some(name.as_str());
                    let names_driver = !is_driver && driver_cell == Some(target);
                    match self.output_details(target, name)? {
                        OutputDetails::Fanned { outputs } => {
                            let values: Vec<Option<Value>> = outputs
                                .iter()
                                .map(|r| r.field_snapshot.get(field).cloned().flatten())
                                .collect();
                            if names_driver {
                                Resolved::Aligned(values)
                            } else if *for_each {
                                Resolved::Axis(values)
                            } else {
                                Resolved::Scalar(Some(Value::Array { values }))
                            }
                        }
                        OutputDetails::Single { output } => {
                            if names_driver {
                                return Err(Error::InvalidPositionalAlignment(format!(
                                    "dependency '{name}' aligns with '{}', but its output is not fanned",
                                    dep.cell_id()
                                )));
                            }
                            let value = output.field_snapshot.get(field).cloned().flatten();
                            if *for_each {
                                Resolved::Axis(vec![value])
                            } else {
                                Resolved::Scalar(value)
                            }
                        }
                    }
                }
            };
            entries.push((name.clone(), resolved));
        }
        Ok(entries)
    }

    /// Run the upstream cell when its output is missing or partial.
    async fn ensure_processed(&mut self, target: usize, allow_recursive_run: bool) -> Result<()> {
        let processed = self.notebook.cells[target]
            .output_details
            .as_ref()
            .is_some_and(OutputDetails::is_processed);
        if processed {
            return Ok(());
        }
        let id = self.notebook.cells[target].input.id.clone();
        if !allow_recursive_run {
            return Err(Error::DependencyNotReady(id));
        }
        self.run_cell_boxed(id, false).await
    }

    fn output_details(&self, target: usize, dependency: &str) -> Result<&OutputDetails> {
        self.notebook.cells[target]
            .output_details
            .as_ref()
            .ok_or_else(|| {
                Error::DependencyNotReady(format!(
                    "dependency '{dependency}' on cell '{}'",
                    self.notebook.cells[target].input.id
                ))
            })
    }
}
