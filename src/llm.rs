//! Chat-completion client.
//!
//! The agent talks to the language model through the [`ChatModel`] trait,
//! so tests can drive it with a scripted model. [`OpenAiChat`] is the real
//! implementation, posting to an OpenAI-compatible `/chat/completions`
//! endpoint with function-calling tool definitions.
//!
//! A [`ChatBackend`] turns an API key into a `ChatModel`; the session holds
//! one backend and connects a fresh model whenever the key changes.
//!
//! Retry strategy (same as the embedding API clients):
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - HTTP 401 → [`LlmError::Authentication`], never retried
//! - other 4xx → fail immediately
//! - network error → retry; client timeout → [`LlmError::Timeout`]

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::AgentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One message in a chat transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by an assistant message.
    pub tool_calls: Vec<ToolCall>,
    /// For `Role::Tool` messages, the id of the call being answered.
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant turn that requested tools.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// The result of one tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    fn to_wire(&self) -> Value {
        let mut msg = json!({
            "role": self.role.as_str(),
            "content": self.content,
        });
        if !self.tool_calls.is_empty() {
            if self.content.is_empty() {
                msg["content"] = Value::Null;
            }
            msg["tool_calls"] = self
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments },
                    })
                })
                .collect();
        }
        if let Some(id) = &self.tool_call_id {
            msg["tool_call_id"] = json!(id);
        }
        msg
    }
}

/// A tool invocation requested by the model.
///
/// `arguments` is the raw JSON text the model produced; it may not parse.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A tool advertised to the model.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A model turn: either final text, or tool calls (possibly with text).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("chat API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("chat API request failed: {0}")]
    Transport(String),

    #[error("chat API request timed out")]
    Timeout,

    #[error("invalid chat API response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, LlmError::Authentication(_))
    }
}

/// A chat-completion model with tool calling.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete one turn of `messages`, offering `tools` to the model.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError>;
}

/// Factory from API key to [`ChatModel`].
pub trait ChatBackend: Send + Sync {
    /// Connect a model for answering questions.
    fn agent_model(&self, api_key: &str) -> Arc<dyn ChatModel>;

    /// Connect the cheap model used to probe whether a key is accepted.
    fn validation_model(&self, api_key: &str) -> Arc<dyn ChatModel>;
}

/// [`ChatBackend`] for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    config: AgentConfig,
}

impl OpenAiBackend {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

impl ChatBackend for OpenAiBackend {
    fn agent_model(&self, api_key: &str) -> Arc<dyn ChatModel> {
        Arc::new(OpenAiChat::new(&self.config, api_key, &self.config.model))
    }

    fn validation_model(&self, api_key: &str) -> Arc<dyn ChatModel> {
        Arc::new(OpenAiChat::new(
            &self.config,
            api_key,
            &self.config.validation_model,
        ))
    }
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
    backoff: Duration,
}

impl std::fmt::Debug for OpenAiChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChat")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiChat {
    pub fn new(config: &AgentConfig, api_key: &str, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            backoff: Duration::from_secs(1),
        }
    }

    /// Override the base retry delay (doubles per attempt).
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages.iter().map(ChatMessage::to_wire).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = tools.iter().map(ToolDefinition::to_wire).collect();
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages, tools);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let response = match resp {
                Ok(response) => response,
                Err(e) if e.is_timeout() => return Err(LlmError::Timeout),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "chat request failed");
                    last_err = Some(LlmError::Transport(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let text = response
                    .text()
                    .await
                    .map_err(|e| LlmError::Transport(e.to_string()))?;
                return parse_completion(&text);
            }

            let message = error_message(&response.text().await.unwrap_or_default());

            if status.as_u16() == 401 {
                return Err(LlmError::Authentication(message));
            }
            if status.as_u16() == 429 || status.is_server_error() {
                tracing::warn!(attempt, status = status.as_u16(), "chat API retryable error");
                last_err = Some(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
                continue;
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Err(last_err
            .unwrap_or_else(|| LlmError::Transport("chat request failed after retries".into())))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Parse a `/chat/completions` response body.
pub fn parse_completion(text: &str) -> Result<ChatResponse, LlmError> {
    let body: CompletionBody =
        serde_json::from_str(text).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("no completion choices returned".into()))?;

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls: choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect(),
    })
}

/// Pull `error.message` out of an API error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_completion() {
        let resp = parse_completion(
            r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.content, "Hello!");
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_tool_call_keeps_raw_arguments() {
        let resp = parse_completion(
            r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[
                {"id":"call_1","type":"function","function":{"name":"search_documents","arguments":"{\"query\": \"rent\"}"}}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "search_documents");
        assert_eq!(resp.tool_calls[0].arguments, "{\"query\": \"rent\"}");
    }

    #[test]
    fn test_parse_rejects_empty_choices() {
        let err = parse_completion(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
        assert!(matches!(
            parse_completion("not json").unwrap_err(),
            LlmError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_wire_format_for_tool_messages() {
        let call = ToolCall {
            id: "c1".into(),
            name: "search_documents".into(),
            arguments: "{}".into(),
        };
        let assistant = ChatMessage::assistant_tool_calls("", vec![call]).to_wire();
        assert_eq!(assistant["content"], Value::Null);
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "search_documents");
        assert_eq!(assistant["tool_calls"][0]["type"], "function");

        let result = ChatMessage::tool_result("c1", "No relevant documents found.").to_wire();
        assert_eq!(result["role"], "tool");
        assert_eq!(result["tool_call_id"], "c1");
    }

    #[test]
    fn test_request_body_includes_tools_only_when_present() {
        let chat = OpenAiChat::new(&AgentConfig::default(), "sk-test", "gpt-4o");
        let body = chat.request_body(&[ChatMessage::user("hi")], &[]);
        assert!(body.get("tools").is_none());
        assert_eq!(body["model"], "gpt-4o");

        let tools = [ToolDefinition {
            name: "search_documents".into(),
            description: "search".into(),
            parameters: json!({"type": "object"}),
        }];
        let body = chat.request_body(&[ChatMessage::user("hi")], &tools);
        assert_eq!(body["tools"][0]["function"]["name"], "search_documents");
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#),
            "Incorrect API key provided"
        );
        assert_eq!(error_message(" upstream down "), "upstream down");
    }
}
