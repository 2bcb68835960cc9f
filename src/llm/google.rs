// Google Gemini adapter (generateContent)
// API Reference: https://ai.google.dev/api/generate-content

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::provider::{HttpOptions, HttpTransport, LLMAdapter};
use crate::types::{
    AppError, AppResult, LLMMessage, LLMRequest, LLMResponse, MessageRole, TokenUsage, ToolCall,
};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleAdapter {
    transport: HttpTransport,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSet>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolSet {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl GoogleAdapter {
    pub fn new(api_key: &str, base_url: &str, http: &HttpOptions) -> AppResult<Self> {
        if api_key.trim().is_empty() {
            return Err(AppError::Configuration(
                "Google API key is not configured".to_string(),
            ));
        }
        Ok(Self {
            transport: HttpTransport::new("Gemini", http),
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn text_part(text: &str) -> Part {
        Part {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    /// Map the conversation onto Gemini turns.
    ///
    /// Gemini has only `user` and `model` roles: tool results travel as
    /// `functionResponse` parts of a user turn, and consecutive turns with the
    /// same role are merged into one.
    fn build_contents(messages: &[LLMMessage]) -> (Vec<Content>, Vec<String>) {
        let mut contents: Vec<Content> = Vec::new();
        let mut system = Vec::new();

        for msg in messages {
            let (role, parts) = match msg.role {
                MessageRole::System => {
                    system.push(msg.content.clone());
                    continue;
                }
                MessageRole::User => ("user", vec![Self::text_part(&msg.content)]),
                MessageRole::Assistant => {
                    let mut parts = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(Self::text_part(&msg.content));
                    }
                    parts.extend(msg.tool_calls.iter().map(|call| Part {
                        function_call: Some(FunctionCall {
                            name: call.name.clone(),
                            args: call.arguments.clone(),
                        }),
                        ..Default::default()
                    }));
                    ("model", parts)
                }
                MessageRole::Tool => (
                    "user",
                    vec![Part {
                        function_response: Some(FunctionResponse {
                            name: msg.name.clone().unwrap_or_default(),
                            response: json!({ "content": msg.content }),
                        }),
                        ..Default::default()
                    }],
                ),
            };

            if parts.is_empty() {
                continue;
            }
            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
                _ => contents.push(Content {
                    role: Some(role.to_string()),
                    parts,
                }),
            }
        }

        (contents, system)
    }

    fn build_request(request: &LLMRequest) -> GenerateRequest {
        let (contents, mut system) = Self::build_contents(&request.messages);
        if let Some(instruction) = &request.system_instruction {
            system.insert(0, instruction.clone());
        }

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolSet {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|t| FunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    })
                    .collect(),
            }]
        };

        GenerateRequest {
            system_instruction: (!system.is_empty()).then(|| Content {
                role: None,
                parts: vec![Self::text_part(&system.join("\n\n"))],
            }),
            contents,
            tools,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        }
    }
}

#[async_trait]
impl LLMAdapter for GoogleAdapter {
    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let body = Self::build_request(request);
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);

        let response = self
            .transport
            .send(|client| {
                client
                    .post(&url)
                    .header("x-goog-api-key", &self.api_key)
                    .json(&body)
            })
            .await?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMApi(format!("Failed to parse Gemini response: {}", e)))?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMApi("Gemini returned no candidates".to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                content.push_str(&text);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: format!("call_{}", tool_calls.len()),
                    name: call.name,
                    arguments: call.args,
                });
            }
        }

        let usage = parsed.usage_metadata.unwrap_or_default();
        Ok(LLMResponse {
            content,
            tool_calls,
            finish_reason: candidate.finish_reason.unwrap_or_else(|| "STOP".to_string()),
            usage: TokenUsage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            },
        })
    }

    async fn check_connection(&self) -> AppResult<String> {
        let url = format!("{}/models", self.base_url);
        self.transport
            .send(|client| client.get(&url).header("x-goog-api-key", &self.api_key))
            .await?;
        Ok("Google AI API key is valid".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holiday_call(id: &str, date: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "check_if_date_is_holiday".to_string(),
            arguments: json!({ "date_str": date }),
        }
    }

    #[test]
    fn test_consecutive_tool_results_share_one_turn() {
        let a = holiday_call("call_0", "November 1");
        let b = holiday_call("call_1", "November 2");
        let messages = vec![
            LLMMessage::user("Are Nov 1 and Nov 2 holidays?"),
            LLMMessage::assistant_with_tools("", vec![a.clone(), b.clone()]),
            LLMMessage::tool_result(&a, "November 1 - Holiday"),
            LLMMessage::tool_result(&b, "No holiday information found"),
        ];

        let (contents, system) = GoogleAdapter::build_contents(&messages);
        assert!(system.is_empty());
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].role.as_deref(), Some("model"));
        assert_eq!(contents[1].parts.len(), 2);
        assert_eq!(contents[2].role.as_deref(), Some("user"));
        assert_eq!(contents[2].parts.len(), 2);
        let response = contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "check_if_date_is_holiday");
        assert_eq!(response.response["content"], "November 1 - Holiday");
    }

    #[test]
    fn test_request_uses_camel_case_fields() {
        let request = LLMRequest {
            model: "gemini-2.0-flash-exp".to_string(),
            messages: vec![LLMMessage::user("hi")],
            tools: Vec::new(),
            max_tokens: Some(256),
            temperature: Some(0.3),
            system_instruction: Some("Only use tools".to_string()),
        };
        let body = serde_json::to_value(GoogleAdapter::build_request(&request)).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Only use tools");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_function_calls_get_synthesized_ids() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.0-flash-exp:generateContent")
            .match_header("x-goog-api-key", "g-key")
            .with_status(200)
            .with_body(
                json!({
                    "candidates": [{
                        "content": {
                            "role": "model",
                            "parts": [{"functionCall": {"name": "check_if_date_is_holiday", "args": {"date_str": "November 1"}}}]
                        },
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let adapter = GoogleAdapter::new(
            "g-key",
            &server.url(),
            &HttpOptions::new(std::time::Duration::from_secs(5), 0).unwrap(),
        )
        .unwrap();
        let request = LLMRequest {
            model: "gemini-2.0-flash-exp".to_string(),
            messages: vec![LLMMessage::user("Is November 1 a holiday?")],
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
            system_instruction: None,
        };
        let response = adapter.create_chat_completion(&request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.tool_calls, vec![holiday_call("call_0", "November 1")]);
        assert_eq!(response.usage.total_tokens, 5);
    }
}
