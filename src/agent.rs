//! Tool-using question-answering agent.
//!
//! Each question runs a bounded loop: the model either answers or asks
//! for tools; tool results are appended to a per-question scratchpad and
//! the model is called again. The loop stops after `max_iterations`
//! tool-call rounds with [`ITERATION_LIMIT_ANSWER`].
//!
//! Malformed tool calls (unknown tool, arguments that are not JSON, or
//! missing parameters) are answered with an error message as the tool
//! result, so the model can correct itself within the same budget.
//!
//! Conversation memory holds only questions and final answers.

use serde_json::Value;
use std::sync::Arc;

use crate::error::LibraryError;
use crate::llm::{ChatMessage, ChatModel, LlmError, ToolCall};
use crate::tools::{self, ToolRegistry, SEARCH_TOOL_NAME};

/// Answer produced when the model keeps calling tools past the cap.
pub const ITERATION_LIMIT_ANSWER: &str = "Agent stopped due to iteration limit.";

/// The only answer the model may give when retrieval finds nothing relevant.
pub const REFUSAL_ANSWER: &str =
    "After searching the documents, I could not find a direct answer.";

/// Build the system instruction for an agent whose retrieval tool is `tool_name`.
pub fn system_prompt(tool_name: &str) -> String {
    format!(
        "You are a research assistant. Your job is to be helpful using EXCLUSIVELY \
         the documents provided. If the message is not about the documents (for \
         example a greeting), reply briefly and politely without using tools. For \
         questions about the content, use the `{tool_name}` tool. If the tool returns \
         nothing relevant, your only allowed answer is: '{REFUSAL_ANSWER}' Never use \
         general knowledge. At the end of your answer, list the sources you used."
    )
}

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    system_prompt: String,
    max_iterations: u32,
    memory: Vec<ChatMessage>,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolRegistry, max_iterations: u32) -> Self {
        Self {
            model,
            tools,
            system_prompt: system_prompt(SEARCH_TOOL_NAME),
            max_iterations,
            memory: Vec::new(),
        }
    }

    /// Prior user and assistant turns, oldest first.
    pub fn memory(&self) -> &[ChatMessage] {
        &self.memory
    }

    /// Answer one question, recording it and the answer in memory.
    pub async fn ask(&mut self, question: &str) -> Result<String, LibraryError> {
        let definitions = self.tools.definitions();
        let mut scratchpad: Vec<ChatMessage> = Vec::new();
        let mut rounds = 0u32;

        let answer = loop {
            let messages = self.transcript(question, &scratchpad);
            let response = self
                .model
                .complete(&messages, &definitions)
                .await
                .map_err(into_library_error)?;

            if response.tool_calls.is_empty() {
                break response.content;
            }
            rounds += 1;
            tracing::debug!(round = rounds, calls = response.tool_calls.len(), "tool round");

            scratchpad.push(ChatMessage::assistant_tool_calls(
                response.content,
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let result = self.run_tool(call).await?;
                scratchpad.push(ChatMessage::tool_result(&call.id, result));
            }

            // The budget counts model calls, so a full budget of tool rounds
            // ends here without another completion.
            if rounds >= self.max_iterations {
                tracing::warn!(rounds, "agent hit iteration limit");
                break ITERATION_LIMIT_ANSWER.to_string();
            }
        };

        tracing::info!(rounds, "question answered");

        self.memory.push(ChatMessage::user(question));
        self.memory.push(ChatMessage::assistant(answer.clone()));
        Ok(answer)
    }

    fn transcript(&self, question: &str, scratchpad: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.memory.len() + scratchpad.len() + 2);
        messages.push(ChatMessage::system(&self.system_prompt));
        messages.extend(self.memory.iter().cloned());
        messages.push(ChatMessage::user(question));
        messages.extend(scratchpad.iter().cloned());
        messages
    }

    /// Run one tool call. Malformed calls become an error message for the
    /// model; failures inside a well-formed call are real errors.
    async fn run_tool(&self, call: &ToolCall) -> Result<String, LibraryError> {
        let Some(tool) = self.tools.find(&call.name) else {
            tracing::warn!(tool = %call.name, "model requested unknown tool");
            return Ok(format!(
                "Error: '{}' is not a valid tool. Available tools: {}.",
                call.name,
                self.tools.names()
            ));
        };

        let params: Value = match serde_json::from_str(call.arguments.trim()) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "unparseable tool arguments");
                return Ok(format!(
                    "Error: could not parse the arguments for '{}' as JSON ({}). \
                     Call the tool again with valid JSON arguments.",
                    call.name, e
                ));
            }
        };

        if let Err(e) = tools::check_arguments(&tool.parameters_schema(), &params) {
            return Ok(format!("Error: invalid arguments for '{}': {}.", call.name, e));
        }

        tool.execute(params).await.map_err(LibraryError::Processing)
    }
}

fn into_library_error(err: LlmError) -> LibraryError {
    if err.is_authentication() {
        LibraryError::Authentication
    } else {
        LibraryError::Processing(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ToolDefinition};
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned responses and records every transcript it receives.
    struct Scripted {
        responses: Mutex<Vec<Result<ChatResponse, LlmError>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> Result<ChatResponse, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(text("(script exhausted)")))
        }
    }

    fn text(s: &str) -> ChatResponse {
        ChatResponse {
            content: s.to_string(),
            tool_calls: Vec::new(),
        }
    }

    fn call(name: &str, args: &str) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: name.into(),
                arguments: args.into(),
            }],
        }
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            SEARCH_TOOL_NAME
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })
        }
        async fn execute(&self, params: Value) -> anyhow::Result<String> {
            Ok(format!("Source: doc.pdf, Page: 1\nContent: {}", params["query"]))
        }
    }

    fn agent(model: Arc<Scripted>) -> Agent {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(Echo));
        Agent::new(model, tools, 5)
    }

    fn last_tool_result(model: &Scripted) -> String {
        let seen = model.seen.lock().unwrap();
        seen.last()
            .and_then(|m| m.iter().rev().find(|m| m.role == crate::llm::Role::Tool))
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_direct_answer_without_tools() {
        let model = Scripted::new(vec![Ok(text("Hello! How can I help?"))]);
        let mut agent = agent(model.clone());

        let answer = agent.ask("hi").await.unwrap();
        assert_eq!(answer, "Hello! How can I help?");
        assert_eq!(agent.memory().len(), 2);
        assert_eq!(model.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_feeds_result_back() {
        let model = Scripted::new(vec![
            Ok(call(SEARCH_TOOL_NAME, r#"{"query":"rent"}"#)),
            Ok(text("Rent is due monthly. Sources: doc.pdf")),
        ]);
        let mut agent = agent(model.clone());

        let answer = agent.ask("when is rent due?").await.unwrap();
        assert!(answer.contains("doc.pdf"));
        assert!(last_tool_result(&model).contains("\"rent\""));
    }

    #[tokio::test]
    async fn test_iteration_cap_stops_after_max_rounds() {
        let model = Scripted::new(
            (0..20)
                .map(|_| Ok(call(SEARCH_TOOL_NAME, r#"{"query":"again"}"#)))
                .collect(),
        );
        let mut agent = agent(model.clone());

        let answer = agent.ask("loop forever").await.unwrap();
        assert_eq!(answer, ITERATION_LIMIT_ANSWER);

        let seen = model.seen.lock().unwrap();
        let final_transcript = seen.last().unwrap();
        let tool_results = final_transcript
            .iter()
            .filter(|m| m.role == crate::llm::Role::Tool)
            .count();
        assert_eq!(tool_results, 4);
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_answer_after_full_budget_is_never_requested() {
        let mut script: Vec<_> = (0..5)
            .map(|_| Ok(call(SEARCH_TOOL_NAME, r#"{"query":"again"}"#)))
            .collect();
        script.push(Ok(text("answer after sixth completion")));
        let model = Scripted::new(script);
        let mut agent = agent(model.clone());

        assert_eq!(agent.ask("q").await.unwrap(), ITERATION_LIMIT_ANSWER);
        assert_eq!(model.seen.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_answer_within_budget_is_returned() {
        let mut script: Vec<_> = (0..4)
            .map(|_| Ok(call(SEARCH_TOOL_NAME, r#"{"query":"again"}"#)))
            .collect();
        script.push(Ok(text("found it")));
        let model = Scripted::new(script);
        let mut agent = agent(model.clone());

        assert_eq!(agent.ask("q").await.unwrap(), "found it");
        assert_eq!(model.seen.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_malformed_calls_are_reported_to_model() {
        let model = Scripted::new(vec![
            Ok(call("web_search", r#"{"query":"x"}"#)),
            Ok(call(SEARCH_TOOL_NAME, "{not json")),
            Ok(call(SEARCH_TOOL_NAME, r#"{"q":"x"}"#)),
            Ok(text("done")),
        ]);
        let mut agent = agent(model.clone());
        assert_eq!(agent.ask("q").await.unwrap(), "done");

        let seen = model.seen.lock().unwrap();
        let results: Vec<&str> = seen[3]
            .iter()
            .filter(|m| m.role == crate::llm::Role::Tool)
            .map(|m| m.content.as_str())
            .collect();
        assert!(results[0].contains("not a valid tool"));
        assert!(results[1].contains("could not parse"));
        assert!(results[2].contains("missing required parameter 'query'"));
    }

    #[tokio::test]
    async fn test_memory_carries_prior_turns_without_tool_traffic() {
        let model = Scripted::new(vec![
            Ok(call(SEARCH_TOOL_NAME, r#"{"query":"a"}"#)),
            Ok(text("first answer")),
            Ok(text("second answer")),
        ]);
        let mut agent = agent(model.clone());
        agent.ask("first").await.unwrap();
        agent.ask("second").await.unwrap();

        let seen = model.seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last[0].role, crate::llm::Role::System);
        assert_eq!(last[1].content, "first");
        assert_eq!(last[2].content, "first answer");
        assert_eq!(last[3].content, "second");
        assert_eq!(last.len(), 4);
    }

    #[tokio::test]
    async fn test_authentication_error_is_distinct() {
        let model = Scripted::new(vec![Err(LlmError::Authentication("bad key".into()))]);
        let mut agent = agent(model);
        let err = agent.ask("q").await.unwrap_err();
        assert!(matches!(err, LibraryError::Authentication));
        assert!(agent.memory().is_empty());
    }

    #[tokio::test]
    async fn test_other_errors_are_processing() {
        let model = Scripted::new(vec![Err(LlmError::Timeout)]);
        let err = agent(model).ask("q").await.unwrap_err();
        assert!(matches!(err, LibraryError::Processing(_)));
    }

    #[test]
    fn test_system_prompt_names_tool_and_refusal() {
        let prompt = system_prompt(SEARCH_TOOL_NAME);
        assert!(prompt.contains("`search_documents`"));
        assert!(prompt.contains(REFUSAL_ANSWER));
    }
}
