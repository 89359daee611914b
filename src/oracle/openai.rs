use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::OracleConfig;
use crate::error::{Result, TxgraphError};
use crate::oracle::prompts::{decide_prompt, select_prompt};
use crate::oracle::{
    ActionInvocation, ActionSpec, Decision, DecideContext, ReasoningOracle, SelectContext,
    TranscriptEntry,
};

/// Chat completions request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ToolCall {
    id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    kind: String,
    function: FunctionCall,
}

fn default_tool_type() -> String {
    "function".to_string()
}

/// Function name plus JSON-encoded arguments, as the API transports them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ToolDefinition {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionDefinition,
}

#[derive(Debug, Serialize)]
struct FunctionDefinition {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

/// Structured answer of the selection call
#[derive(Debug, Deserialize)]
struct PickedConsiderations {
    considerations: Vec<String>,
}

/// OpenAI chat-completions oracle
///
/// Action selection uses function calling; set selection uses a strict JSON
/// schema response. Rate limits and server errors are retried with
/// exponential backoff inside this client only.
pub struct OpenAIOracle {
    client: Client,
    api_key: String,
    base_url: String,
    decide_model: String,
    decide_temperature: f32,
    select_model: String,
    select_temperature: f32,
    max_retries: usize,
}

impl OpenAIOracle {
    pub fn new(api_key: String, config: &OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TxgraphError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            decide_model: config.decide_model.clone(),
            decide_temperature: config.decide_temperature,
            select_model: config.select_model.clone(),
            select_temperature: config.select_temperature,
            max_retries: config.max_retries,
        })
    }

    /// Build from config, reading the API key from the configured env var
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            TxgraphError::Config(format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                config.api_key_env
            ))
        })?;
        Self::new(api_key, config)
    }

    async fn complete_once(&self, request: &ChatRequest<'_>) -> std::result::Result<ChatResponse, (TxgraphError, bool)> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let retryable = e.is_timeout() || e.is_connect();
                (TxgraphError::Oracle(format!("Network error: {}", e)), retryable)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            return Err((
                TxgraphError::Oracle(format!("OpenAI API error {}: {}", status, body)),
                retryable,
            ));
        }

        response.json::<ChatResponse>().await.map_err(|e| {
            (
                TxgraphError::OracleProtocol(format!("Failed to parse response: {}", e)),
                false,
            )
        })
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ResponseMessage> {
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.complete_once(request).await {
                Ok(response) => {
                    log::debug!(
                        "Oracle call to {} took {:?} (attempt {})",
                        request.model,
                        start.elapsed(),
                        attempt + 1
                    );
                    return response
                        .choices
                        .into_iter()
                        .next()
                        .map(|choice| choice.message)
                        .ok_or_else(|| {
                            TxgraphError::OracleProtocol("Response contained no choices".to_string())
                        });
                }
                Err((e, true)) if attempt < self.max_retries => {
                    log::warn!("Retry {}/{} after error: {}", attempt + 1, self.max_retries, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err((e, _)) => return Err(e),
            }
        }
    }
}

/// Replay the session transcript as chat messages.
fn transcript_messages(history: &[TranscriptEntry]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|entry| match entry {
            TranscriptEntry::User { content } => ChatMessage::text("user", content.clone()),
            TranscriptEntry::Assistant { content, calls } => ChatMessage {
                role: "assistant",
                content: content.clone(),
                tool_calls: calls
                    .iter()
                    .map(|call| ToolCall {
                        id: call.id.clone(),
                        kind: default_tool_type(),
                        function: FunctionCall {
                            name: call.action.clone(),
                            arguments: call.args.to_string(),
                        },
                    })
                    .collect(),
                tool_call_id: None,
            },
            TranscriptEntry::ActionResult { call_id, content } => ChatMessage {
                role: "tool",
                content: Some(content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: Some(call_id.clone()),
            },
        })
        .collect()
}

fn tool_definitions(actions: &[ActionSpec]) -> Vec<ToolDefinition> {
    actions
        .iter()
        .map(|action| ToolDefinition {
            kind: "function",
            function: FunctionDefinition {
                name: action.name.clone(),
                description: action.description.clone(),
                parameters: action.parameters.clone(),
            },
        })
        .collect()
}

/// Turn an assistant message into a decision. Argument strings must be JSON.
fn parse_decision(message: ResponseMessage) -> Result<Decision> {
    let calls = message.tool_calls.unwrap_or_default();
    if calls.is_empty() {
        return Ok(Decision::Terminal {
            message: message.content,
        });
    }

    let calls = calls
        .into_iter()
        .map(|call| {
            let args: Value = serde_json::from_str(&call.function.arguments).map_err(|e| {
                TxgraphError::OracleProtocol(format!(
                    "Arguments for {} are not valid JSON: {}",
                    call.function.name, e
                ))
            })?;
            Ok(ActionInvocation {
                id: call.id,
                action: call.function.name,
                args,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Decision::Invoke {
        message: message.content,
        calls,
    })
}

fn parse_selection(message: ResponseMessage) -> Result<Vec<String>> {
    let content = message.content.ok_or_else(|| {
        TxgraphError::OracleProtocol("Selection response had no content".to_string())
    })?;
    let picked: PickedConsiderations = serde_json::from_str(&content).map_err(|e| {
        TxgraphError::OracleProtocol(format!("Selection is not the expected JSON object: {}", e))
    })?;
    Ok(picked.considerations)
}

fn selection_schema() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "picked_considerations",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "considerations": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "The list of relevant considerations. Do not include categories."
                    }
                },
                "required": ["considerations"],
                "additionalProperties": false
            }
        }
    })
}

#[async_trait]
impl ReasoningOracle for OpenAIOracle {
    async fn decide(&self, context: DecideContext<'_>, actions: &[ActionSpec]) -> Result<Decision> {
        let mut messages = transcript_messages(context.history);
        messages.push(ChatMessage::text(
            "system",
            decide_prompt(context.goal, context.picked, context.menu),
        ));

        let request = ChatRequest {
            model: &self.decide_model,
            temperature: self.decide_temperature,
            messages,
            tools: tool_definitions(actions),
            response_format: None,
        };
        parse_decision(self.complete(&request).await?)
    }

    async fn select(&self, context: SelectContext<'_>) -> Result<Vec<String>> {
        let request = ChatRequest {
            model: &self.select_model,
            temperature: self.select_temperature,
            messages: vec![ChatMessage::text(
                "system",
                select_prompt(context.goal, context.grouped),
            )],
            tools: Vec::new(),
            response_format: Some(selection_schema()),
        };
        parse_selection(self.complete(&request).await?)
    }
}
