//! End-to-end tests for the quill binary.
//!
//! These run entirely offline: without an API key the evaluator carries no
//! generative collaborators, and markdown notebooks still run to completion.

use assert_cmd::Command;
use predicates::prelude::*;

fn quill() -> Command {
    let mut cmd = Command::cargo_bin("quill").unwrap();
    cmd.env_remove("OPENAI_API_KEY");
    cmd
}

#[test]
fn test_new_creates_starter_notebook() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.json");

    quill()
        .args(["new", path.to_str().unwrap(), "--title", "Field notes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    let raw = std::fs::read_to_string(&path).unwrap();
    let notebook: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(notebook["metadata"]["title"], "Field notes");
    assert_eq!(notebook["cells"][0]["input"]["id"], "welcome");
}

#[test]
fn test_new_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.json");
    std::fs::write(&path, "{}").unwrap();

    quill()
        .args(["new", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_run_evaluates_markdown_cells_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.json");
    let document = serde_json::json!({
        "metadata": { "title": "chain" },
        "cells": [
            {
                "input": {
                    "id": "a",
                    "input": { "type": "markdown", "content": "hello" }
                }
            },
            {
                "input": {
                    "id": "b",
                    "dependencies": {
                        "x": { "type": "cellReference", "cellId": "aOutput" }
                    },
                    "input": { "type": "markdown", "content": "{{x}}!" }
                }
            }
        ]
    });
    std::fs::write(&path, document.to_string()).unwrap();

    quill()
        .args(["run", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed"));

    let raw = std::fs::read_to_string(&path).unwrap();
    let saved: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        saved["cells"][1]["outputDetails"]["output"]["value"]["content"],
        "hello!"
    );
}

#[test]
fn test_run_missing_cell_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.json");
    let document = serde_json::json!({
        "metadata": { "title": "t" },
        "cells": []
    });
    std::fs::write(&path, document.to_string()).unwrap();

    quill()
        .args(["run", path.to_str().unwrap(), "--cell", "ghost"])
        .assert()
        .failure();
}
