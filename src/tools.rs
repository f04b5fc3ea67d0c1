//! Tools the agent can call.
//!
//! A [`Tool`] describes itself with a name, a one-line description, and an
//! OpenAI function-calling JSON Schema for its parameters. The agent
//! advertises every tool in its [`ToolRegistry`] to the chat model and
//! dispatches tool calls back by name.
//!
//! The only built-in tool is [`RetrievalTool`] (`search_documents`), which
//! queries the vector index built from the staged documents.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::index::VectorIndex;
use crate::llm::ToolDefinition;
use crate::models::RetrievedChunk;

/// Name under which the retrieval tool is advertised to the model.
pub const SEARCH_TOOL_NAME: &str = "search_documents";

/// Returned by the retrieval tool when the index has nothing for a query.
pub const NO_RESULTS: &str = "No relevant documents found.";

/// Separator placed between formatted chunks in a tool result.
pub const RESULT_SEPARATOR: &str = "\n\n---\n\n";

/// A tool the agent can discover and call.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use intelligent_library::tools::Tool;
///
/// pub struct EchoTool;
///
/// #[async_trait]
/// impl Tool for EchoTool {
///     fn name(&self) -> &str { "echo" }
///     fn description(&self) -> &str { "Repeat the input text" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({
///             "type": "object",
///             "properties": { "text": { "type": "string" } },
///             "required": ["text"]
///         })
///     }
///
///     async fn execute(&self, params: Value) -> Result<String> {
///         Ok(params["text"].as_str().unwrap_or_default().to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores (e.g. `"search_documents"`).
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call the tool.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters. Must be an object schema with
    /// `properties` and optionally `required`.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with arguments that passed [`check_arguments`].
    async fn execute(&self, params: Value) -> Result<String>;
}

/// Verify that `params` is a JSON object carrying every string field the
/// schema lists as `required`.
///
/// The returned error message is shown to the model so it can correct
/// its call.
pub fn check_arguments(schema: &Value, params: &Value) -> Result<()> {
    let Some(obj) = params.as_object() else {
        bail!("arguments must be a JSON object");
    };

    let required = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.as_slice())
        .unwrap_or_default();

    for field in required.iter().filter_map(|f| f.as_str()) {
        match obj.get(field) {
            None | Some(Value::Null) => bail!("missing required parameter '{}'", field),
            Some(value) => {
                let wants_string = schema["properties"][field]["type"] == "string";
                if wants_string && !value.is_string() {
                    bail!("parameter '{}' must be a string", field);
                }
            }
        }
    }
    Ok(())
}

/// Ordered collection of tools available to one agent.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. Lookups return the first tool registered under a name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Tool definitions in the shape the chat API expects.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Comma-separated tool names, for error messages shown to the model.
    pub fn names(&self) -> String {
        self.tools
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Semantic search over the loaded documents.
pub struct RetrievalTool {
    index: Arc<VectorIndex>,
    top_k: usize,
    score_threshold: Option<f32>,
}

impl RetrievalTool {
    pub fn new(index: Arc<VectorIndex>, config: &RetrievalConfig) -> Self {
        Self {
            index,
            top_k: config.top_k,
            score_threshold: config.score_threshold,
        }
    }
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the loaded PDF documents for passages relevant to a question. \
         Returns the matching passages with their source file and page."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for in the documents"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let query = params["query"].as_str().unwrap_or("");
        let mut hits = self.index.search(query, self.top_k).await?;
        if let Some(threshold) = self.score_threshold {
            hits.retain(|h| h.score >= threshold);
        }
        tracing::debug!(query, hits = hits.len(), "retrieval");
        Ok(format_results(&hits))
    }
}

/// Render retrieved chunks as the text handed back to the model.
pub fn format_results(hits: &[RetrievedChunk]) -> String {
    if hits.is_empty() {
        return NO_RESULTS.to_string();
    }

    hits.iter()
        .map(|c| format!("Source: {}, Page: {}\nContent: {}", c.source, c.page + 1, c.text))
        .collect::<Vec<_>>()
        .join(RESULT_SEPARATOR)
}
