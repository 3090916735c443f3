//! Chat-completion text model.
//!
//! Plain prompts map to a single completion. When a request carries schema
//! text, the schema is presented as a forced function call so the model
//! must reply with arguments matching it; bare-array schemas are wrapped in
//! a `{items: …}` object first (the function-call protocol only accepts
//! object parameters) and unwrapped from the reply. Malformed structured
//! replies are retried a bounded number of times.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use quill_core::collab::{CollabError, Completion, CompletionRequest, TextModel};
use quill_core::notebook::CostMeta;

use crate::OPENAI_API_BASE;

/// Attempts at coercing a structured reply before giving up.
const MAX_SCHEMA_ATTEMPTS: u32 = 3;

/// Function name advertised to the model for schema-coerced replies.
const RESULT_FUNCTION: &str = "produce_result";

/// Text model backed by the chat completions endpoint.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn try_complete(
        &self,
        request: &CompletionRequest,
        schema: Option<&WrappedSchema>,
    ) -> Result<Completion, CollabError> {
        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: request.system_prompt.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        let body = ChatRequest {
            model: &request.model,
            messages,
            temperature: request.temperature,
            functions: schema.map(|s| {
                vec![FunctionSpec {
                    name: RESULT_FUNCTION,
                    parameters: s.schema.clone(),
                }]
            }),
            function_call: schema.map(|_| serde_json::json!({ "name": RESULT_FUNCTION })),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CollabError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CollabError::RateLimited);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CollabError::Http(format!("HTTP {status}: {detail}")));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| CollabError::Malformed(e.to_string()))?;

        let cost = reply
            .usage
            .map(|u| cost_for_model(&request.model, u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        let message = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CollabError::Malformed("reply carried no choices".into()))?
            .message;

        let result = match schema {
            None => {
                let content = message
                    .content
                    .ok_or_else(|| CollabError::Malformed("reply carried no content".into()))?;
                serde_json::Value::String(content)
            }
            Some(wrapped) => {
                let call = message.function_call.ok_or_else(|| {
                    CollabError::Malformed("expected a function call reply".into())
                })?;
                let arguments: serde_json::Value = serde_json::from_str(&call.arguments)
                    .map_err(|e| {
                        CollabError::Malformed(format!("function arguments do not parse: {e}"))
                    })?;
                wrapped.unwrap_reply(arguments)?
            }
        };

        Ok(Completion { result, cost })
    }
}

#[async_trait]
impl TextModel for ChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CollabError> {
        let schema = match request.schema.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(text) => Some(WrappedSchema::parse(text)?),
            None => None,
        };

        let attempts = if schema.is_some() {
            MAX_SCHEMA_ATTEMPTS
        } else {
            1
        };
        for attempt in 1..=attempts {
            match self.try_complete(request, schema.as_ref()).await {
                Ok(completion) => return Ok(completion),
                Err(CollabError::Malformed(reason)) if schema.is_some() => {
                    tracing::warn!(attempt, %reason, "structured reply rejected");
                }
                Err(e) => return Err(e),
            }
        }
        Err(CollabError::Exhausted)
    }
}

/// A parsed reply schema, with bare arrays lifted into an object wrapper.
struct WrappedSchema {
    schema: serde_json::Value,
    wrapped_array: bool,
}

impl WrappedSchema {
    fn parse(text: &str) -> Result<Self, CollabError> {
        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| CollabError::Malformed(format!("schema text does not parse: {e}")))?;
        let is_array = parsed.get("type").and_then(|t| t.as_str()) == Some("array");
        if is_array {
            Ok(Self {
                schema: serde_json::json!({
                    "type": "object",
                    "properties": { "items": parsed },
                    "required": ["items"],
                }),
                wrapped_array: true,
            })
        } else {
            Ok(Self {
                schema: parsed,
                wrapped_array: false,
            })
        }
    }

    /// Undo the array wrapper on the model's reply.
    fn unwrap_reply(&self, mut reply: serde_json::Value) -> Result<serde_json::Value, CollabError> {
        if !self.wrapped_array {
            return Ok(reply);
        }
        reply
            .as_object_mut()
            .and_then(|obj| obj.remove("items"))
            .ok_or_else(|| CollabError::Malformed("reply is missing the items wrapper".into()))
    }
}

/// Token pricing per model family, dollars per million tokens.
pub fn cost_for_model(model: &str, tokens_in: u64, tokens_out: u64) -> CostMeta {
    let (rate_in, rate_out) = if model.starts_with("gpt-4") {
        (30.0, 60.0)
    } else {
        (0.5, 1.5)
    };
    CostMeta {
        tokens_in,
        tokens_out,
        cost_in: tokens_in as f64 * rate_in / 1_000_000.0,
        cost_out: tokens_out as f64 * rate_out / 1_000_000.0,
    }
}

// ---- wire format ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    functions: Option<Vec<FunctionSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct FunctionSpec {
    name: &'static str,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    arguments: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_schema_passes_through() {
        let wrapped =
            WrappedSchema::parse(r#"{"type": "object", "properties": {"name": {"type": "string"}}}"#)
                .unwrap();
        assert!(!wrapped.wrapped_array);
        assert_eq!(wrapped.schema["type"], "object");

        let reply = serde_json::json!({"name": "ada"});
        assert_eq!(wrapped.unwrap_reply(reply.clone()).unwrap(), reply);
    }

    #[test]
    fn test_array_schema_is_wrapped_and_unwrapped() {
        let wrapped =
            WrappedSchema::parse(r#"{"type": "array", "items": {"type": "string"}}"#).unwrap();
        assert!(wrapped.wrapped_array);
        assert_eq!(wrapped.schema["properties"]["items"]["type"], "array");

        let reply = serde_json::json!({"items": ["a", "b"]});
        assert_eq!(
            wrapped.unwrap_reply(reply).unwrap(),
            serde_json::json!(["a", "b"])
        );

        // A reply without the wrapper key is malformed.
        assert!(matches!(
            wrapped.unwrap_reply(serde_json::json!({"other": 1})),
            Err(CollabError::Malformed(_))
        ));
    }

    #[test]
    fn test_unparseable_schema_is_malformed() {
        assert!(matches!(
            WrappedSchema::parse("not json"),
            Err(CollabError::Malformed(_))
        ));
    }

    #[test]
    fn test_cost_rates_per_model_family() {
        let gpt4 = cost_for_model("gpt-4o", 1_000_000, 500_000);
        assert_eq!(gpt4.cost_in, 30.0);
        assert_eq!(gpt4.cost_out, 30.0);

        let mini = cost_for_model("gpt-3.5-turbo", 1_000_000, 1_000_000);
        assert_eq!(mini.cost_in, 0.5);
        assert_eq!(mini.cost_out, 1.5);
        assert_eq!(mini.tokens_out, 1_000_000);
    }
}
