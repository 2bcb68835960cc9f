// OpenAI chat-completions adapter
// API Reference: https://platform.openai.com/docs/api-reference/chat

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::provider::{ChunkStream, HttpOptions, HttpTransport, LLMAdapter};
use super::stream::{decode_lines, LineDecoder};
use crate::types::{
    AppError, AppResult, LLMMessage, LLMRequest, LLMResponse, MessageRole, StreamChunk,
    TokenUsage, ToolCall, ToolDefinition,
};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAIAdapter {
    transport: HttpTransport,
    api_key: String,
    base_url: String,
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

fn function_type() -> String {
    "function".to_string()
}

// Response types
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// Streaming types
#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<DeltaToolCall>,
}

#[derive(Deserialize)]
struct DeltaToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<DeltaFunction>,
}

#[derive(Deserialize)]
struct DeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl OpenAIAdapter {
    pub fn new(api_key: &str, base_url: &str, http: &HttpOptions) -> AppResult<Self> {
        if api_key.trim().is_empty() {
            return Err(AppError::Configuration(
                "OpenAI API key is not configured".to_string(),
            ));
        }
        Ok(Self {
            transport: HttpTransport::new("OpenAI", http),
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn convert_message(msg: &LLMMessage) -> WireMessage {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        let content = if msg.role == MessageRole::Assistant && msg.content.is_empty() && msg.has_tool_calls() {
            None
        } else {
            Some(msg.content.clone())
        };

        WireMessage {
            role,
            content,
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: function_type(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn convert_tool(tool: &ToolDefinition) -> WireTool {
        WireTool {
            kind: "function",
            function: WireFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }

    fn build_request(request: &LLMRequest, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_instruction {
            messages.push(WireMessage {
                role: "system",
                content: Some(system.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        messages.extend(request.messages.iter().map(Self::convert_message));

        ChatRequest {
            model: request.model.clone(),
            messages,
            tools: request.tools.iter().map(Self::convert_tool).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Arguments arrive as a JSON string; keep unparseable text as a string value
pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[async_trait]
impl LLMAdapter for OpenAIAdapter {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let body = Self::build_request(request, false);
        let url = self.chat_url();

        let response = self
            .transport
            .send(|client| client.post(&url).bearer_auth(&self.api_key).json(&body))
            .await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMApi(format!("Failed to parse OpenAI response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMApi("OpenAI returned no choices".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: parse_arguments(&call.function.arguments),
                })
                .collect(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }

    async fn create_chat_completion_stream(&self, request: &LLMRequest) -> AppResult<ChunkStream> {
        let body = Self::build_request(request, true);
        let url = self.chat_url();

        let response = self
            .transport
            .send_stream(|client| client.post(&url).bearer_auth(&self.api_key).json(&body))
            .await?;

        Ok(decode_lines(response.bytes_stream(), SseDecoder::default()))
    }

    async fn check_connection(&self) -> AppResult<String> {
        let url = format!("{}/models", self.base_url);
        self.transport
            .send(|client| client.get(&url).bearer_auth(&self.api_key))
            .await?;
        Ok("OpenAI API key is valid".to_string())
    }
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Server-sent events from a streaming completion.
///
/// Tool calls arrive as fragments keyed by `index`; they are assembled and
/// emitted once the choice finishes.
#[derive(Default)]
struct SseDecoder {
    tool_calls: BTreeMap<usize, PartialToolCall>,
}

impl SseDecoder {
    fn flush_tool_calls(&mut self) -> Vec<StreamChunk> {
        std::mem::take(&mut self.tool_calls)
            .into_iter()
            .map(|(index, call)| {
                StreamChunk::ToolCall(ToolCall {
                    id: if call.id.is_empty() {
                        format!("call_{}", index)
                    } else {
                        call.id
                    },
                    name: call.name,
                    arguments: parse_arguments(&call.arguments),
                })
            })
            .collect()
    }
}

impl LineDecoder for SseDecoder {
    fn decode_line(&mut self, line: &str) -> AppResult<Vec<StreamChunk>> {
        let Some(data) = line.strip_prefix("data:") else {
            // event names, comments and retry hints
            return Ok(Vec::new());
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(self.flush_tool_calls());
        }

        let event: StreamEvent = serde_json::from_str(data)
            .map_err(|e| AppError::LLMApi(format!("Malformed OpenAI stream event: {}", e)))?;

        let mut chunks = Vec::new();
        for choice in event.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                chunks.push(StreamChunk::Content(content));
            }
            for fragment in choice.delta.tool_calls {
                let entry = self.tool_calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    entry.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                chunks.extend(self.flush_tool_calls());
            }
        }
        Ok(chunks)
    }

    fn finish(&mut self) -> AppResult<Vec<StreamChunk>> {
        Ok(self.flush_tool_calls())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    fn http() -> HttpOptions {
        HttpOptions::new(Duration::from_secs(5), 0).unwrap()
    }

    fn adapter(base_url: &str) -> OpenAIAdapter {
        OpenAIAdapter::new("sk-test", base_url, &http()).unwrap()
    }

    fn request() -> LLMRequest {
        LLMRequest {
            model: "gpt-4".to_string(),
            messages: vec![LLMMessage::user("Is November 1 a holiday?")],
            tools: vec![ToolDefinition {
                name: "check_if_date_is_holiday".to_string(),
                description: "Check a date".to_string(),
                parameters: json!({"type": "object"}),
            }],
            max_tokens: Some(100),
            temperature: Some(0.3),
            system_instruction: Some("Be brief".to_string()),
        }
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = OpenAIAdapter::new("  ", OPENAI_API_BASE, &http())
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_request_shape() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "check_if_date_is_holiday".to_string(),
            arguments: json!({"date_str": "November 1"}),
        };
        let mut req = request();
        req.messages.push(LLMMessage::assistant_with_tools("", vec![call.clone()]));
        req.messages.push(LLMMessage::tool_result(&call, "November 1 - Holiday"));

        let body = serde_json::to_value(OpenAIAdapter::build_request(&req, false)).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["content"], Value::Null);
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"date_str":"November 1"}"#
        );
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["stream"], false);
    }

    #[tokio::test]
    async fn test_completion_parses_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [{
                                "id": "call_abc",
                                "type": "function",
                                "function": {
                                    "name": "check_if_date_is_holiday",
                                    "arguments": "{\"date_str\":\"November 1\"}"
                                }
                            }]
                        },
                        "finish_reason": "tool_calls"
                    }],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = adapter(&server.url())
            .create_chat_completion(&request())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "");
        assert_eq!(response.finish_reason, "tool_calls");
        assert_eq!(response.tool_calls[0].id, "call_abc");
        assert_eq!(response.tool_calls[0].arguments["date_str"], "November 1");
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_stream_assembles_fragments() {
        let sse = [
            r#"data: {"choices":[{"delta":{"content":"Let me "}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"check."}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"search_academic_calendar","arguments":"{\"que"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ry\":\"finals\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]
        .join("\n\n");

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse)
            .create_async()
            .await;

        let chunks: Vec<StreamChunk> = adapter(&server.url())
            .create_chat_completion_stream(&request())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(
            chunks,
            vec![
                StreamChunk::Content("Let me ".to_string()),
                StreamChunk::Content("check.".to_string()),
                StreamChunk::ToolCall(ToolCall {
                    id: "call_9".to_string(),
                    name: "search_academic_calendar".to_string(),
                    arguments: json!({"query": "finals"}),
                }),
            ]
        );
    }

    #[test]
    fn test_parse_arguments_tolerates_bad_json() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("November 1"), json!("November 1"));
    }
}
