//! New command: write a starter notebook document.

use std::path::Path;

use indexmap::IndexMap;
use quill_core::{CellInput, Notebook, NotebookCell, Value};

use crate::colors;

pub fn execute(path: &str, title: Option<&str>) -> anyhow::Result<()> {
    if Path::new(path).exists() {
        anyhow::bail!("'{path}' already exists");
    }

    let title = title.unwrap_or("Untitled notebook");
    let mut notebook = Notebook::empty(title);
    notebook.cells.push(NotebookCell {
        input: CellInput {
            id: "welcome".into(),
            dependencies: IndexMap::new(),
            input: Value::Markdown {
                content: format!("# {title}\n\nAdd cells and run with `quill run {path}`."),
            },
        },
        output_details: None,
    });

    std::fs::write(path, serde_json::to_string_pretty(&notebook)?)?;
    println!("{}Created{} {path}", colors::GREEN, colors::RESET);
    Ok(())
}
