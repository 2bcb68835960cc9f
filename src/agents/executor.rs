//! Agent loop
//!
//! A two-state machine over the message history:
//!
//! ```text
//!            ┌──────────── tool calls ───────────┐
//!            │                                   ▼
//! user ──▶ AGENT ── no tool calls / no tools ──▶ END
//!            ▲                                   │
//!            └──────────── TOOLS ◀───────────────┘ (results appended)
//! ```
//!
//! AGENT calls the model once; TOOLS runs every requested tool and always
//! hands control back to AGENT. Model calls per turn are capped by
//! `max_iterations`, and the whole turn by `timeout_secs`.

use futures::channel::mpsc::UnboundedSender;
use futures::future::join_all;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::memory::ConversationMemory;
use super::prompts::{system_prompt, COULD_NOT_COMPLETE};
use crate::config::AgentConfig;
use crate::knowledge::SearchTools;
use crate::llm::ChatModel;
use crate::types::{AppError, AppResult, LLMMessage, MessageRole, StreamChunk};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Agent,
    Tools,
    End,
}

/// Transition taken after every AGENT state
pub fn route_after_agent(supports_tools: bool, last: &LLMMessage) -> AgentState {
    if !supports_tools {
        AgentState::End
    } else if last.role == MessageRole::Assistant && last.has_tool_calls() {
        AgentState::Tools
    } else {
        AgentState::End
    }
}

/// Incremental output of a streaming run
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Content(String),
    Status(String),
    Complete { thread_id: String },
    Error(String),
}

/// Wire shape of one server-sent event
#[derive(Debug, Serialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

impl AgentEvent {
    pub fn frame(&self) -> StreamFrame {
        let (kind, data, chat_id) = match self {
            AgentEvent::Content(text) => ("content", Some(text.clone()), None),
            AgentEvent::Status(text) => ("status", Some(text.clone()), None),
            AgentEvent::Complete { thread_id } => ("complete", None, Some(thread_id.clone())),
            AgentEvent::Error(text) => ("error", Some(text.clone()), None),
        };
        StreamFrame { kind, data, chat_id }
    }
}

#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub thread_id: String,
    pub answer: String,
    pub iterations: usize,
    pub tool_calls: usize,
    pub messages: Vec<LLMMessage>,
}

pub struct AgentLoop {
    tools: SearchTools,
    memory: Option<ConversationMemory>,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(tools: SearchTools, config: AgentConfig) -> Self {
        let memory = config
            .memory_enabled
            .then(|| ConversationMemory::new(config.memory_max_messages, config.memory_max_threads));
        Self { tools, memory, config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn memory(&self) -> Option<&ConversationMemory> {
        self.memory.as_ref()
    }

    /// Whether an in-process checkpoint exists; callers seed history otherwise
    pub async fn has_checkpoint(&self, thread_id: &str) -> bool {
        match &self.memory {
            Some(memory) => memory.contains(thread_id).await,
            None => false,
        }
    }

    /// Run one turn to completion and return the final answer.
    ///
    /// `prior_turns` seeds the history only when no checkpoint exists for
    /// `thread_id`.
    pub async fn invoke(
        &self,
        model: &ChatModel,
        thread_id: &str,
        message: &str,
        prior_turns: Vec<LLMMessage>,
    ) -> AppResult<AgentRunResult> {
        self.run(model, thread_id, message, prior_turns, None).await
    }

    /// Run one turn, forwarding content deltas and tool status notices to `sink`.
    ///
    /// The answer is the concatenation of all content deltas. A dropped
    /// receiver does not stop the run.
    pub async fn run_streaming(
        &self,
        model: &ChatModel,
        thread_id: &str,
        message: &str,
        prior_turns: Vec<LLMMessage>,
        sink: UnboundedSender<AgentEvent>,
    ) -> AppResult<AgentRunResult> {
        let result = self
            .run(model, thread_id, message, prior_turns, Some(&sink))
            .await?;
        let _ = sink.unbounded_send(AgentEvent::Complete {
            thread_id: thread_id.to_string(),
        });
        Ok(result)
    }

    async fn run(
        &self,
        model: &ChatModel,
        thread_id: &str,
        message: &str,
        prior_turns: Vec<LLMMessage>,
        sink: Option<&UnboundedSender<AgentEvent>>,
    ) -> AppResult<AgentRunResult> {
        let limit = self.config.timeout();
        match tokio::time::timeout(limit, self.run_turn(model, thread_id, message, prior_turns, sink)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(thread_id = %thread_id, timeout_secs = limit.as_secs(), "Agent turn timed out");
                Err(AppError::Timeout(format!(
                    "The assistant did not finish within {} seconds",
                    limit.as_secs()
                )))
            }
        }
    }

    async fn run_turn(
        &self,
        model: &ChatModel,
        thread_id: &str,
        message: &str,
        prior_turns: Vec<LLMMessage>,
        sink: Option<&UnboundedSender<AgentEvent>>,
    ) -> AppResult<AgentRunResult> {
        let mut messages = match &self.memory {
            Some(memory) => memory.history(thread_id).await.unwrap_or(prior_turns),
            None => prior_turns,
        };
        messages.push(LLMMessage::user(message));

        let system = system_prompt(self.config.answer_policy, model.supports_tools);
        let tools = if model.supports_tools {
            SearchTools::definitions()
        } else {
            Vec::new()
        };

        let mut state = AgentState::Agent;
        let mut iterations = 0;
        let mut tool_calls = 0;
        let mut streamed = String::new();

        info!(
            thread_id = %thread_id,
            provider = %model.provider,
            model = %model.model,
            supports_tools = model.supports_tools,
            "Starting agent turn"
        );

        loop {
            match state {
                AgentState::Agent => {
                    if iterations >= self.config.max_iterations {
                        warn!(thread_id = %thread_id, iterations, "Agent hit iteration cap, forcing an answer");
                        if let Some(sink) = sink {
                            let _ = sink.unbounded_send(AgentEvent::Content(COULD_NOT_COMPLETE.to_string()));
                        }
                        streamed.push_str(COULD_NOT_COMPLETE);
                        messages.push(LLMMessage::assistant(COULD_NOT_COMPLETE));
                        state = AgentState::End;
                        continue;
                    }
                    iterations += 1;
                    debug!(thread_id = %thread_id, iteration = iterations, "AGENT");

                    let request = model.request(&system, messages.clone(), tools.clone());
                    let reply = match sink {
                        Some(sink) => {
                            let reply = Self::stream_reply(model, &request, sink).await?;
                            streamed.push_str(&reply.content);
                            reply
                        }
                        None => model.adapter.create_chat_completion(&request).await?.into_message(),
                    };
                    state = route_after_agent(model.supports_tools, &reply);
                    messages.push(reply);
                }
                AgentState::Tools => {
                    let calls = messages
                        .last()
                        .map(|m| m.tool_calls.clone())
                        .unwrap_or_default();
                    debug!(thread_id = %thread_id, count = calls.len(), "TOOLS");

                    for call in &calls {
                        info!(thread_id = %thread_id, tool = %call.name, arguments = %call.arguments, "Running tool");
                        if let Some(sink) = sink {
                            let _ = sink.unbounded_send(AgentEvent::Status(format!("Searching {}...", call.name)));
                        }
                    }

                    let results = join_all(calls.iter().map(|call| self.tools.execute(call))).await;
                    for (call, result) in calls.iter().zip(results) {
                        messages.push(LLMMessage::tool_result(call, result));
                    }
                    tool_calls += calls.len();
                    state = AgentState::Agent;
                }
                AgentState::End => break,
            }
        }
        debug!(thread_id = %thread_id, iterations, tool_calls, "END");

        let answer = if sink.is_some() {
            streamed
        } else {
            messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default()
        };

        if let Some(memory) = &self.memory {
            memory.commit(thread_id, messages.clone()).await;
        }

        Ok(AgentRunResult {
            thread_id: thread_id.to_string(),
            answer,
            iterations,
            tool_calls,
            messages,
        })
    }

    async fn stream_reply(
        model: &ChatModel,
        request: &crate::types::LLMRequest,
        sink: &UnboundedSender<AgentEvent>,
    ) -> AppResult<LLMMessage> {
        let mut stream = model.adapter.create_chat_completion_stream(request).await?;
        let mut content = String::new();
        let mut calls = Vec::new();

        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Content(text) => {
                    let _ = sink.unbounded_send(AgentEvent::Content(text.clone()));
                    content.push_str(&text);
                }
                StreamChunk::ToolCall(call) => calls.push(call),
            }
        }
        Ok(LLMMessage::assistant_with_tools(content, calls))
    }
}

/// Shared handle used by the HTTP layer
pub type SharedAgent = Arc<AgentLoop>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agents::prompts::OUT_OF_SCOPE_REFUSAL;
    use crate::agents::AnswerPolicy;
    use crate::knowledge::tools::DATA_NOT_PRESENT;
    use crate::knowledge::DocumentStore;
    use crate::llm::{LLMAdapter, ProviderKind};
    use crate::types::{LLMRequest, LLMResponse, TokenUsage, ToolCall};
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    type Script = Box<dyn Fn(&LLMRequest) -> LLMResponse + Send + Sync>;

    /// Adapter answering from a closure and recording every request
    pub(crate) struct ScriptedAdapter {
        script: Script,
        pub requests: Mutex<Vec<LLMRequest>>,
        delay: Option<Duration>,
    }

    impl ScriptedAdapter {
        pub(crate) fn new(script: impl Fn(&LLMRequest) -> LLMResponse + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                requests: Mutex::new(Vec::new()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl LLMAdapter for ScriptedAdapter {
        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok((self.script)(request))
        }

        async fn check_connection(&self) -> AppResult<String> {
            Ok("ok".to_string())
        }
    }

    pub(crate) fn text(content: &str) -> LLMResponse {
        LLMResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: TokenUsage::default(),
        }
    }

    fn call(name: &str, args: serde_json::Value) -> LLMResponse {
        LLMResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_0".to_string(),
                name: name.to_string(),
                arguments: args,
            }],
            finish_reason: "tool_calls".to_string(),
            usage: TokenUsage::default(),
        }
    }

    fn last_tool_output(request: &LLMRequest) -> Option<&str> {
        request
            .messages
            .last()
            .filter(|m| m.role == MessageRole::Tool)
            .map(|m| m.content.as_str())
    }

    fn knowledge_base() -> (TempDir, SearchTools) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Academic")).unwrap();
        std::fs::write(
            dir.path().join("Academic/calendar.txt"),
            "Fall Semester\nAugust 26 - Classes begin\nSeptember 2 - Labor Day (No classes)\nOctober 28 - Advising week\nOctober 30 - Midterm grades due\nNovember 1 - Holiday (All Saints Day)\nDecember 6 - Last day of classes\nDecember 9 - Final exams begin\nSpring Semester\nJanuary 20 - Classes begin",
        )
        .unwrap();
        let tools = SearchTools::new(DocumentStore::new(dir.path()));
        (dir, tools)
    }

    fn agent(tools: SearchTools, config: AgentConfig) -> AgentLoop {
        AgentLoop::new(tools, config)
    }

    fn model(adapter: Arc<ScriptedAdapter>, supports_tools: bool) -> ChatModel {
        ChatModel::new(adapter, ProviderKind::OpenAI, "scripted-model", supports_tools)
    }

    /// Calls the holiday tool once, then answers from its output
    fn holiday_script() -> ScriptedAdapter {
        ScriptedAdapter::new(|request| match last_tool_output(request) {
            None => call("check_if_date_is_holiday", serde_json::json!({"date_str": "November 1"})),
            Some(output) if output.contains("November 1 - Holiday") => {
                text("Yes, November 1 is a holiday (All Saints Day).")
            }
            Some(_) => text("I could not confirm that."),
        })
    }

    #[test]
    fn test_route_after_agent() {
        let with_calls = call("search_university_info", serde_json::json!({})).into_message();
        let plain = LLMMessage::assistant("done");
        assert_eq!(route_after_agent(true, &with_calls), AgentState::Tools);
        assert_eq!(route_after_agent(true, &plain), AgentState::End);
        assert_eq!(route_after_agent(false, &with_calls), AgentState::End);
    }

    #[tokio::test]
    async fn test_toolless_provider_ends_after_first_turn() {
        let (_dir, tools) = knowledge_base();
        // even a tool request is ignored without tool support
        let adapter = Arc::new(ScriptedAdapter::new(|_| {
            call("check_if_date_is_holiday", serde_json::json!({"date_str": "November 1"}))
        }));
        let result = agent(tools, AgentConfig::default())
            .invoke(&model(adapter.clone(), false), "t1", "Is November 1 a holiday?", Vec::new())
            .await
            .unwrap();

        assert_eq!(result.iterations, 1);
        assert_eq!(result.tool_calls, 0);
        let requests = adapter.requests.lock().unwrap();
        assert!(requests[0].tools.is_empty());
        assert!(!requests[0].system_instruction.as_ref().unwrap().contains("CRITICAL RULES"));
    }

    #[tokio::test]
    async fn test_holiday_question_runs_tool_and_answers() {
        let (_dir, tools) = knowledge_base();
        let adapter = Arc::new(holiday_script());
        let result = agent(tools, AgentConfig::default())
            .invoke(&model(adapter.clone(), true), "t1", "Is November 1 a holiday?", Vec::new())
            .await
            .unwrap();

        assert_eq!(result.iterations, 2);
        assert_eq!(result.tool_calls, 1);
        assert!(result.answer.contains("November 1 is a holiday"));

        let requests = adapter.requests.lock().unwrap();
        let tool_output = last_tool_output(&requests[1]).unwrap();
        // two lines of context on each side of the match
        assert_eq!(
            tool_output,
            "October 28 - Advising week\nOctober 30 - Midterm grades due\nNovember 1 - Holiday (All Saints Day)\nDecember 6 - Last day of classes\nDecember 9 - Final exams begin"
        );
        assert_eq!(requests[0].tools.len(), 5);
    }

    #[tokio::test]
    async fn test_strict_policy_refuses_out_of_domain_questions() {
        let (_dir, tools) = knowledge_base();
        let adapter = Arc::new(ScriptedAdapter::new(|request| match last_tool_output(request) {
            None => call("search_educational_resources", serde_json::json!({"query": "president of France"})),
            Some(output) if output.ends_with(DATA_NOT_PRESENT) => {
                let system = request.system_instruction.clone().unwrap_or_default();
                // the model follows the refusal wording it was given
                let refusal = if system.contains(OUT_OF_SCOPE_REFUSAL) {
                    OUT_OF_SCOPE_REFUSAL.replace("[topic]", "the president of France")
                } else {
                    "The president of France is ...".to_string()
                };
                text(&refusal)
            }
            Some(_) => text("unexpected"),
        }));

        let config = AgentConfig {
            answer_policy: AnswerPolicy::Strict,
            ..AgentConfig::default()
        };
        let result = agent(tools, config)
            .invoke(&model(adapter, true), "t1", "Who is the president of France?", Vec::new())
            .await
            .unwrap();

        assert!(result
            .answer
            .contains("I can only answer questions about our university's academics, policies, schedules, and resources."));
    }

    #[tokio::test]
    async fn test_iteration_cap_forces_termination() {
        let (_dir, tools) = knowledge_base();
        let adapter = Arc::new(ScriptedAdapter::new(|_| {
            call("search_academic_calendar", serde_json::json!({"query": "finals"}))
        }));
        let config = AgentConfig {
            max_iterations: 3,
            ..AgentConfig::default()
        };
        let result = agent(tools, config)
            .invoke(&model(adapter.clone(), true), "t1", "loop forever", Vec::new())
            .await
            .unwrap();

        assert_eq!(result.iterations, 3);
        assert_eq!(result.answer, COULD_NOT_COMPLETE);
        assert_eq!(adapter.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_turn_timeout_is_reported_and_not_committed() {
        let (_dir, tools) = knowledge_base();
        let mut slow = ScriptedAdapter::new(|_| text("late"));
        slow.delay = Some(Duration::from_millis(200));
        let config = AgentConfig {
            timeout_secs: 0,
            ..AgentConfig::default()
        };
        let agent = agent(tools, config);
        let err = agent
            .invoke(&model(Arc::new(slow), true), "t1", "hello", Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Timeout(_)));
        assert!(!agent.has_checkpoint("t1").await);
    }

    #[tokio::test]
    async fn test_streaming_emits_status_content_and_complete() {
        let (_dir, tools) = knowledge_base();
        let adapter = Arc::new(holiday_script());
        let (tx, rx) = mpsc::unbounded();

        let result = agent(tools, AgentConfig::default())
            .run_streaming(&model(adapter, true), "chat-42", "Is November 1 a holiday?", Vec::new(), tx)
            .await
            .unwrap();

        let events: Vec<AgentEvent> = rx.collect().await;
        assert_eq!(
            events,
            vec![
                AgentEvent::Status("Searching check_if_date_is_holiday...".to_string()),
                AgentEvent::Content("Yes, November 1 is a holiday (All Saints Day).".to_string()),
                AgentEvent::Complete { thread_id: "chat-42".to_string() },
            ]
        );
        assert_eq!(result.answer, "Yes, November 1 is a holiday (All Saints Day).");

        let frame = serde_json::to_value(events[2].frame()).unwrap();
        assert_eq!(frame, serde_json::json!({"type": "complete", "chat_id": "chat-42"}));
    }

    #[tokio::test]
    async fn test_memory_carries_history_between_turns() {
        let (_dir, tools) = knowledge_base();
        let adapter = Arc::new(ScriptedAdapter::new(|request| {
            text(&format!("seen {} messages", request.messages.len()))
        }));
        let agent = agent(tools, AgentConfig::default());
        let chat_model = model(adapter, true);

        let seed = vec![LLMMessage::user("earlier"), LLMMessage::assistant("reply")];
        let first = agent.invoke(&chat_model, "t1", "one", seed.clone()).await.unwrap();
        assert_eq!(first.answer, "seen 3 messages");

        // the checkpoint wins over a seed once it exists
        let second = agent.invoke(&chat_model, "t1", "two", seed).await.unwrap();
        assert_eq!(second.answer, "seen 5 messages");
        assert!(agent.has_checkpoint("t1").await);
    }
}
