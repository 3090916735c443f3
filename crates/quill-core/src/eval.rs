//! Cell evaluation: one binding set in, one output record out.
//!
//! [`Evaluator::process`] is pure given its inputs apart from the external
//! collaborators it delegates to. It is infallible at the branch boundary:
//! every collaborator failure folds into the record's `error` field, so a
//! bad fan-out branch never aborts its siblings. The binding snapshot is
//! recorded on success and failure alike, keeping downstream output
//! references valid either way.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::assets::AssetContext;
use crate::bindings::BindingSet;
use crate::collab::{
    CodeRunner, CollabError, CompletionRequest, ImageModel, ImageRequest, TextModel,
};
use crate::notebook::{CellInput, CostMeta, OutputRecord, output_id};
use crate::template::interpolate;
use crate::value::Value;

/// Evaluates cell inputs against resolved bindings.
///
/// Collaborators are optional; a cell kind whose collaborator is missing
/// produces an error record rather than failing the run.
#[derive(Default, Clone)]
pub struct Evaluator {
    code: Option<Arc<dyn CodeRunner>>,
    text: Option<Arc<dyn TextModel>>,
    image: Option<Arc<dyn ImageModel>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code_runner(mut self, runner: Arc<dyn CodeRunner>) -> Self {
        self.code = Some(runner);
        self
    }

    pub fn with_text_model(mut self, model: Arc<dyn TextModel>) -> Self {
        self.text = Some(model);
        self
    }

    pub fn with_image_model(mut self, model: Arc<dyn ImageModel>) -> Self {
        self.image = Some(model);
        self
    }

    /// Evaluate one binding set against a cell input.
    pub async fn process(
        &self,
        input: &CellInput,
        binding: &BindingSet,
        assets: &AssetContext,
    ) -> OutputRecord {
        let id = output_id(&input.id);
        match self.dispatch(&input.input, binding, assets).await {
            Ok((value, cost)) => OutputRecord {
                id,
                processed: true,
                value: Some(value),
                error: None,
                cost,
                field_snapshot: binding.clone(),
            },
            Err(e) => {
                tracing::warn!(cell = %input.id, error = %e, "cell evaluation failed");
                OutputRecord {
                    id,
                    processed: true,
                    value: None,
                    error: Some(e.to_string()),
                    cost: None,
                    field_snapshot: binding.clone(),
                }
            }
        }
    }

    async fn dispatch(
        &self,
        spec: &Value,
        binding: &BindingSet,
        assets: &AssetContext,
    ) -> Result<(Value, Option<CostMeta>), CollabError> {
        match spec {
            // Literal kinds pass through unchanged.
            Value::Number { .. }
            | Value::Image { .. }
            | Value::Video { .. }
            | Value::Webpage { .. }
            | Value::Json { .. }
            | Value::Array { .. }
            | Value::Table { .. } => Ok((spec.clone(), None)),

            Value::Markdown { content } => Ok((
                Value::Markdown {
                    content: interpolate(content, binding),
                },
                None,
            )),

            Value::Code { content } => {
                let runner = self
                    .code
                    .as_ref()
                    .ok_or_else(|| CollabError::Unavailable("no code runner configured".into()))?;
                let arguments: IndexMap<String, serde_json::Value> = binding
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.clone(),
                            value
                                .as_ref()
                                .map(Value::to_native)
                                .unwrap_or(serde_json::Value::Null),
                        )
                    })
                    .collect();
                let result = runner.execute(arguments, content, assets).await?;
                Ok((Value::infer(result), None))
            }

            Value::AiPrompt {
                prompt,
                model,
                system_prompt,
                temperature,
                schema,
            } => {
                let text = self
                    .text
                    .as_ref()
                    .ok_or_else(|| CollabError::Unavailable("no text model configured".into()))?;
                let request = CompletionRequest {
                    prompt: interpolate(prompt, binding),
                    system_prompt: interpolate(system_prompt, binding),
                    model: model.clone(),
                    temperature: *temperature,
                    schema: schema.clone(),
                };
                let completion = text.complete(&request).await?;
                Ok((Value::infer(completion.result), Some(completion.cost)))
            }

            Value::AiImagePrompt {
                prompt,
                model,
                resize,
            } => {
                let image = self
                    .image
                    .as_ref()
                    .ok_or_else(|| CollabError::Unavailable("no image model configured".into()))?;
                let generated = image
                    .generate(&ImageRequest {
                        prompt: interpolate(prompt, binding),
                        model: model.clone(),
                    })
                    .await?;
                let content = match resize {
                    Some(target) => {
                        image
                            .resize(&generated.data_uri, target.width, target.height)
                            .await?
                    }
                    None => generated.data_uri,
                };
                Ok((Value::Image { content }, generated.cost))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{Completion, GeneratedImage};
    use crate::value::Resize;
    use async_trait::async_trait;

    struct EchoText;

    #[async_trait]
    impl TextModel for EchoText {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CollabError> {
            Ok(Completion {
                result: serde_json::json!(format!("echo: {}", request.prompt)),
                cost: CostMeta {
                    tokens_in: 5,
                    tokens_out: 7,
                    cost_in: 0.001,
                    cost_out: 0.002,
                },
            })
        }
    }

    struct StubImage;

    #[async_trait]
    impl ImageModel for StubImage {
        async fn generate(&self, _request: &ImageRequest) -> Result<GeneratedImage, CollabError> {
            Ok(GeneratedImage {
                data_uri: "data:image/png;base64,RAW".into(),
                cost: None,
            })
        }

        async fn resize(
            &self,
            data_uri: &str,
            width: u32,
            height: u32,
        ) -> Result<String, CollabError> {
            Ok(format!("{data_uri}#{width}x{height}"))
        }
    }

    struct NativeRunner;

    #[async_trait]
    impl CodeRunner for NativeRunner {
        async fn execute(
            &self,
            arguments: IndexMap<String, serde_json::Value>,
            _source: &str,
            _assets: &AssetContext,
        ) -> Result<serde_json::Value, CollabError> {
            Ok(serde_json::Value::Array(
                arguments.into_values().collect(),
            ))
        }
    }

    fn input(id: &str, spec: Value) -> CellInput {
        CellInput {
            id: id.into(),
            dependencies: IndexMap::new(),
            input: spec,
        }
    }

    fn binding(entries: &[(&str, Value)]) -> BindingSet {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.clone())))
            .collect()
    }

    #[tokio::test]
    async fn test_markdown_interpolates_binding() {
        let evaluator = Evaluator::new();
        let record = evaluator
            .process(
                &input("b", Value::Markdown { content: "{{x}}!".into() }),
                &binding(&[("x", Value::Markdown { content: "hello".into() })]),
                &AssetContext::default(),
            )
            .await;
        assert_eq!(record.id, "bOutput");
        assert!(record.processed);
        assert_eq!(
            record.value,
            Some(Value::Markdown { content: "hello!".into() })
        );
        assert!(record.field_snapshot.contains_key("x"));
    }

    #[tokio::test]
    async fn test_literal_passthrough() {
        let evaluator = Evaluator::new();
        let record = evaluator
            .process(
                &input("n", Value::Number { value: 4.25 }),
                &BindingSet::new(),
                &AssetContext::default(),
            )
            .await;
        assert_eq!(record.value, Some(Value::Number { value: 4.25 }));
    }

    #[tokio::test]
    async fn test_missing_collaborator_is_error_record() {
        let evaluator = Evaluator::new();
        let record = evaluator
            .process(
                &input(
                    "c",
                    Value::Code {
                        content: "function run() {}".into(),
                    },
                ),
                &BindingSet::new(),
                &AssetContext::default(),
            )
            .await;
        assert!(record.processed);
        assert!(record.value.is_none());
        assert!(record.error.as_deref().unwrap().contains("code runner"));
    }

    #[tokio::test]
    async fn test_ai_prompt_interpolated_and_costed() {
        let evaluator = Evaluator::new().with_text_model(Arc::new(EchoText));
        let record = evaluator
            .process(
                &input(
                    "p",
                    Value::AiPrompt {
                        prompt: "about {{topic}}".into(),
                        model: "gpt-4o".into(),
                        system_prompt: "sys".into(),
                        temperature: None,
                        schema: None,
                    },
                ),
                &binding(&[("topic", Value::Markdown { content: "utah".into() })]),
                &AssetContext::default(),
            )
            .await;
        assert_eq!(
            record.value,
            Some(Value::Markdown {
                content: "echo: about utah".into()
            })
        );
        assert_eq!(record.cost.unwrap().tokens_out, 7);
    }

    #[tokio::test]
    async fn test_image_prompt_with_resize() {
        let evaluator = Evaluator::new().with_image_model(Arc::new(StubImage));
        let record = evaluator
            .process(
                &input(
                    "img",
                    Value::AiImagePrompt {
                        prompt: "a mailman dinosaur".into(),
                        model: "dall-e-3".into(),
                        resize: Some(Resize {
                            width: 256,
                            height: 256,
                        }),
                    },
                ),
                &BindingSet::new(),
                &AssetContext::default(),
            )
            .await;
        assert_eq!(
            record.value,
            Some(Value::Image {
                content: "data:image/png;base64,RAW#256x256".into()
            })
        );
    }

    #[tokio::test]
    async fn test_code_arguments_bound_in_order() {
        let evaluator = Evaluator::new().with_code_runner(Arc::new(NativeRunner));
        let record = evaluator
            .process(
                &input(
                    "c",
                    Value::Code {
                        content: "function run(a, b) { return [a, b]; }".into(),
                    },
                ),
                &binding(&[
                    ("a", Value::Number { value: 1.0 }),
                    ("b", Value::Json { value: "{\"k\":2}".into() }),
                ]),
                &AssetContext::default(),
            )
            .await;
        match record.value.unwrap() {
            Value::Array { values } => {
                assert!(matches!(values[0], Some(Value::Number { .. })));
                assert!(matches!(values[1], Some(Value::Json { .. })));
            }
            other => panic!("expected inferred array, got {other:?}"),
        }
    }
}
