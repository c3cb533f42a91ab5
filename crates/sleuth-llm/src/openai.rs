use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sleuth_core::agent::Agent;
use sleuth_core::errors::AgentError;
use sleuth_core::ids::ToolCallId;
use sleuth_core::messages::{Message, Role, ToolCall};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection details for an OpenAI-compatible chat completions endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: SecretString,
    pub request_timeout: Duration,
    pub temperature: Option<f64>,
}

/// Collaborator agent speaking the `/chat/completions` protocol. Tool calls
/// and tool responses are passed through untouched.
pub struct OpenAiAgent {
    client: Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
    temperature: Option<f64>,
    request_timeout: Duration,
}

impl OpenAiAgent {
    pub fn new(config: OpenAiConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model,
            api_key: config.api_key,
            temperature: config.temperature,
            request_timeout: config.request_timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Agent for OpenAiAgent {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, messages), fields(model = %self.model, messages = messages.len()))]
    async fn generate(&self, messages: &[Message]) -> Result<Message, AgentError> {
        let body = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature: self.temperature,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.request_timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(match AgentError::from_status(status.as_u16(), body) {
                AgentError::RateLimited { .. } => AgentError::RateLimited { retry_after },
                other => other,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::MalformedResponse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion usage"
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.into_message())
            .ok_or_else(|| AgentError::MalformedResponse("response has no choices".into()))
    }
}

fn classify_transport(e: reqwest::Error, timeout: Duration) -> AgentError {
    if e.is_timeout() {
        AgentError::Timeout(timeout)
    } else {
        AgentError::Network(e.to_string())
    }
}

/// Seconds-form `Retry-After` header.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// --- Wire types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        // Assistant turns that only call tools send null content.
        let content = if msg.role == Role::Assistant && msg.content.is_empty() && msg.has_tool_calls() {
            None
        } else {
            Some(msg.content.clone())
        };
        Self {
            role: msg.role.as_str().to_string(),
            content,
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|tc| WireToolCall {
                    id: tc.id.as_str().to_string(),
                    kind: function_type(),
                    function: WireFunction {
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    },
                })
                .collect(),
            tool_call_id: msg.tool_call_id.as_ref().map(|id| id.as_str().to_string()),
            name: msg.name.clone(),
        }
    }
}

impl WireMessage {
    fn into_message(self) -> Message {
        let role = match self.role.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "tool" => Role::Tool,
            _ => Role::Assistant,
        };
        Message {
            role,
            content: self.content.unwrap_or_default(),
            tool_calls: self
                .tool_calls
                .into_iter()
                .map(|tc| ToolCall {
                    id: ToolCallId::from_raw(tc.id),
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect(),
            tool_call_id: self.tool_call_id.map(ToolCallId::from_raw),
            name: self.name,
            extras: Default::default(),
        }
    }
}
