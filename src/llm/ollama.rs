// Ollama adapter for locally served models
// API Reference: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::provider::{ChunkStream, HttpOptions, HttpTransport, LLMAdapter};
use super::stream::{decode_lines, LineDecoder};
use crate::types::{
    AppError, AppResult, LLMMessage, LLMRequest, LLMResponse, MessageRole, StreamChunk,
    TokenUsage, ToolCall,
};

pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

pub struct OllamaAdapter {
    transport: HttpTransport,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    options: Options,
}

#[derive(Serialize)]
struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

impl OllamaAdapter {
    pub fn new(base_url: &str, http: &HttpOptions) -> Self {
        let base_url = if base_url.trim().is_empty() {
            OLLAMA_DEFAULT_URL
        } else {
            base_url.trim()
        };
        Self {
            transport: HttpTransport::new("Ollama", http),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn convert_message(msg: &LLMMessage) -> WireMessage {
        WireMessage {
            role: match msg.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::Tool => "tool",
            },
            content: msg.content.clone(),
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    function: WireFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
            tool_name: msg.name.clone().filter(|_| msg.role == MessageRole::Tool),
        }
    }

    fn build_request(request: &LLMRequest, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_instruction {
            messages.push(Self::convert_message(&LLMMessage::system(system.clone())));
        }
        messages.extend(request.messages.iter().map(Self::convert_message));

        ChatRequest {
            model: request.model.clone(),
            messages,
            tools: request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect(),
            stream,
            options: Options {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

/// Ollama does not return call ids; number calls in order of appearance
fn tool_call(function: WireFunction, ordinal: usize) -> ToolCall {
    let arguments = match function.arguments {
        Value::String(raw) => super::openai::parse_arguments(&raw),
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    ToolCall {
        id: format!("call_{}", ordinal),
        name: function.name,
        arguments,
    }
}

#[async_trait]
impl LLMAdapter for OllamaAdapter {
    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let body = Self::build_request(request, false);
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .transport
            .send(|client| client.post(&url).json(&body))
            .await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMApi(format!("Failed to parse Ollama response: {}", e)))?;
        if let Some(error) = parsed.error {
            return Err(AppError::LLMApi(format!("Ollama error: {}", error)));
        }

        let message = parsed.message.ok_or_else(|| {
            AppError::LLMApi("Ollama response did not include a message".to_string())
        })?;

        Ok(LLMResponse {
            content: message.content,
            tool_calls: message
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(i, call)| tool_call(call.function, i))
                .collect(),
            finish_reason: parsed.done_reason.unwrap_or_else(|| "stop".to_string()),
            usage: TokenUsage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
                total_tokens: parsed.prompt_eval_count + parsed.eval_count,
            },
        })
    }

    async fn create_chat_completion_stream(&self, request: &LLMRequest) -> AppResult<ChunkStream> {
        let body = Self::build_request(request, true);
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .transport
            .send_stream(|client| client.post(&url).json(&body))
            .await?;

        Ok(decode_lines(response.bytes_stream(), NdjsonDecoder::default()))
    }

    async fn check_connection(&self) -> AppResult<String> {
        let url = format!("{}/api/tags", self.base_url);
        self.transport.send(|client| client.get(&url)).await?;
        Ok(format!("Ollama is reachable at {}", self.base_url))
    }
}

/// One JSON object per line; tool calls usually arrive whole in a single line
#[derive(Default)]
struct NdjsonDecoder {
    calls_seen: usize,
}

impl LineDecoder for NdjsonDecoder {
    fn decode_line(&mut self, line: &str) -> AppResult<Vec<StreamChunk>> {
        let event: ChatResponse = serde_json::from_str(line)
            .map_err(|e| AppError::LLMApi(format!("Malformed Ollama stream line: {}", e)))?;
        if let Some(error) = event.error {
            return Err(AppError::LLMApi(format!("Ollama error: {}", error)));
        }

        let mut chunks = Vec::new();
        if let Some(message) = event.message {
            if !message.content.is_empty() {
                chunks.push(StreamChunk::Content(message.content));
            }
            for call in message.tool_calls {
                chunks.push(StreamChunk::ToolCall(tool_call(call.function, self.calls_seen)));
                self.calls_seen += 1;
            }
        }
        Ok(chunks)
    }
}
