//! The tagged value model for cell inputs and outputs.
//!
//! Every piece of content a cell can hold or produce is a [`Value`]: plain
//! markdown, code, media payloads, structured JSON, heterogeneous arrays, or
//! generative-prompt specifications. Conversion helpers cover the three views
//! the engine needs: canonical display strings (for placeholder
//! interpolation), native JSON shapes (for code-argument binding), and the
//! scalar-vs-collection classification that drives for-each expansion.

use serde::{Deserialize, Serialize};

/// Target dimensions for the optional image-generation resize step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
}

/// Content value held by a cell input or output.
///
/// Array elements are `Option<Value>`: a `None` element marks a fan-out
/// branch that failed to produce a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Value {
    Markdown {
        content: String,
    },
    Code {
        content: String,
    },
    Number {
        value: f64,
    },
    Image {
        content: String,
    },
    Video {
        content: String,
    },
    Webpage {
        content: String,
    },
    Json {
        value: String,
    },
    Array {
        values: Vec<Option<Value>>,
    },
    Table {
        cells: Vec<Vec<String>>,
    },
    AiPrompt {
        prompt: String,
        model: String,
        system_prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        temperature: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
    },
    AiImagePrompt {
        prompt: String,
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        resize: Option<Resize>,
    },
}

/// Classification of a value as a for-each source.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// A single value; `forEach` wraps it as a singleton collection.
    Scalar,
    /// A collection; `forEach` expands one binding per element.
    Collection(Vec<Option<Value>>),
}

impl Value {
    /// Canonical string form, used for `{{placeholder}}` interpolation.
    pub fn display_string(&self) -> String {
        match self {
            Value::Markdown { content } | Value::Code { content } => content.clone(),
            Value::Number { value } => value.to_string(),
            Value::Image { content } => format!("![image]({content})"),
            Value::Video { content } => format!("[video]({content})"),
            Value::Webpage { content } => format!("[webpage]({content})"),
            Value::Json { value } => value.clone(),
            Value::Array { values } => values
                .iter()
                .map(|v| display_opt(v.as_ref()))
                .collect::<Vec<_>>()
                .join("\n"),
            // A compact two-row textual rendering of the leading rows.
            Value::Table { cells } => cells
                .iter()
                .take(2)
                .map(|row| format!("| {} |", row.join(" | ")))
                .collect::<Vec<_>>()
                .join("\n"),
            Value::AiPrompt { prompt, .. } | Value::AiImagePrompt { prompt, .. } => prompt.clone(),
        }
    }

    /// Native JSON shape, used for code-argument binding.
    ///
    /// Malformed embedded JSON degrades to its raw text rather than failing
    /// the whole binding; the collaborator sees the string it stored.
    pub fn to_native(&self) -> serde_json::Value {
        match self {
            Value::Markdown { content }
            | Value::Code { content }
            | Value::Image { content }
            | Value::Video { content }
            | Value::Webpage { content } => serde_json::Value::String(content.clone()),
            Value::Number { value } => serde_json::Value::from(*value),
            Value::Json { value } => serde_json::from_str(value).unwrap_or_else(|e| {
                tracing::warn!("json value does not parse ({e}); passing raw text");
                serde_json::Value::String(value.clone())
            }),
            Value::Array { values } => serde_json::Value::Array(
                values
                    .iter()
                    .map(|v| match v {
                        Some(v) => v.to_native(),
                        None => serde_json::Value::Null,
                    })
                    .collect(),
            ),
            Value::Table { cells } => serde_json::Value::Array(
                cells
                    .iter()
                    .map(|row| {
                        serde_json::Value::Array(
                            row.iter()
                                .map(|c| serde_json::Value::String(c.clone()))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
            Value::AiPrompt { prompt, .. } | Value::AiImagePrompt { prompt, .. } => {
                serde_json::Value::String(prompt.clone())
            }
        }
    }

    /// Classify this value as a for-each source.
    ///
    /// Arrays expand element-wise; tables expand row-wise, each row becoming
    /// an array of per-cell JSON text values. Everything else is scalar. A
    /// fanned upstream output is classified by the resolver, not here.
    pub fn shape(&self) -> Shape {
        match self {
            Value::Array { values } => Shape::Collection(values.clone()),
            Value::Table { cells } => Shape::Collection(
                cells
                    .iter()
                    .map(|row| {
                        Some(Value::Array {
                            values: row
                                .iter()
                                .map(|c| Some(Value::Json { value: c.clone() }))
                                .collect(),
                        })
                    })
                    .collect(),
            ),
            _ => Shape::Scalar,
        }
    }

    /// Infer an output value from the native shape of a collaborator result.
    ///
    /// Strings become markdown unless they are inline media data URIs;
    /// numbers stay numeric; arrays infer recursively; anything else is
    /// carried as serialized JSON.
    pub fn infer(native: serde_json::Value) -> Value {
        match native {
            serde_json::Value::String(s) => {
                if s.starts_with("data:image") {
                    Value::Image { content: s }
                } else if s.starts_with("data:video") {
                    Value::Video { content: s }
                } else {
                    Value::Markdown { content: s }
                }
            }
            serde_json::Value::Number(n) => Value::Number {
                value: n.as_f64().unwrap_or(0.0),
            },
            serde_json::Value::Array(items) => Value::Array {
                values: items.into_iter().map(|v| Some(Value::infer(v))).collect(),
            },
            other => Value::Json {
                value: other.to_string(),
            },
        }
    }
}

/// Display form of an optional value; absent values render as empty text.
pub fn display_opt(value: Option<&Value>) -> String {
    value.map(Value::display_string).unwrap_or_default()
}
