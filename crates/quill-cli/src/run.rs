//! Run command implementation for the Quill CLI.
//!
//! Loads a notebook document, runs the requested cell (or every cell in
//! sequence order), and writes the document back after each run.

use std::sync::Arc;
use std::time::Instant;

use quill_core::template::has_placeholders;
use quill_core::{Evaluator, NotebookCell, NotebookKernel, OutputDetails, Value};
use quill_openai::{ChatClient, ImagesClient};

use crate::colors;

/// Run a notebook headlessly.
pub async fn execute(
    notebook_path: &str,
    cell_filter: Option<&str>,
    force: bool,
) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut kernel = NotebookKernel::load_book(notebook_path, build_evaluator())?;
    println!(
        "{}Running{} {} ({})",
        colors::BOLD,
        colors::RESET,
        kernel.notebook().metadata.title,
        notebook_path
    );

    let ids: Vec<String> = match cell_filter {
        Some(id) => vec![id.to_string()],
        None => kernel
            .notebook()
            .cells
            .iter()
            .map(|c| c.input.id.clone())
            .collect(),
    };

    if ids.is_empty() {
        println!(
            "\n{}No cells found in notebook.{}",
            colors::YELLOW,
            colors::RESET
        );
        return Ok(());
    }

    for id in &ids {
        kernel.run_cell(id, force).await?;
        if let Some(cell) = kernel.notebook().find_cell(id) {
            print_status(cell);
        }
    }

    let cost = kernel.notebook().total_cost();
    println!("\n{}", "─".repeat(50));
    println!(
        "{}Completed{} {} cells in {:.2}s",
        colors::GREEN,
        colors::RESET,
        ids.len(),
        start.elapsed().as_secs_f64(),
    );
    if cost.tokens_in > 0 || cost.tokens_out > 0 {
        println!(
            "Tokens: {} in / {} out (${:.4})",
            cost.tokens_in,
            cost.tokens_out,
            cost.cost_in + cost.cost_out,
        );
    }

    Ok(())
}

/// One status line per cell: branch counts and the first error, if any.
fn print_status(cell: &NotebookCell) {
    let Some(details) = &cell.output_details else {
        println!(
            "  {}-{} {} (no output)",
            colors::YELLOW,
            colors::RESET,
            cell.input.id
        );
        return;
    };

    let records = details.records();
    let failed = records.iter().filter(|r| r.error.is_some()).count();
    let label = match details {
        OutputDetails::Single { .. } => String::new(),
        OutputDetails::Fanned { .. } => format!(" [{} branches]", records.len()),
    };

    if failed == 0 {
        // An output that still shows {{…}} usually means a misnamed
        // dependency; worth surfacing even though the run succeeded.
        let unresolved = records
            .iter()
            .filter_map(|r| r.value.as_ref())
            .any(|v| matches!(v, Value::Markdown { content } if has_placeholders(content)));
        let note = if unresolved {
            " (unresolved placeholders)"
        } else {
            ""
        };
        println!(
            "  {}✓{} {}{label}{note}",
            colors::GREEN,
            colors::RESET,
            cell.input.id
        );
    } else {
        let first = records
            .iter()
            .find_map(|r| r.error.as_deref())
            .unwrap_or("unknown error");
        println!(
            "  {}✗{} {}{label} ({failed} failed: {first})",
            colors::RED,
            colors::RESET,
            cell.input.id
        );
    }
}

/// Wire up generative collaborators from the environment.
///
/// Without an API key the evaluator runs bare: literal and markdown cells
/// still work, generative cells settle as error records.
fn build_evaluator() -> Evaluator {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Evaluator::new()
            .with_text_model(Arc::new(ChatClient::new(key.clone())))
            .with_image_model(Arc::new(ImagesClient::new(key))),
        _ => {
            tracing::warn!("OPENAI_API_KEY is not set; generative cells will not run");
            Evaluator::new()
        }
    }
}
