//! [`OpenAiCompatService`] – OpenAI-compatible chat-completions backend.
//!
//! Works against any server exposing `/v1/chat/completions` with vision
//! input, such as [Ollama](https://ollama.com) (`http://localhost:11434`) or
//! the hosted OpenAI API.  The [`DecisionResponse`][rover_types::DecisionResponse]
//! JSON Schema is injected via `response_format` to force typed output.
//!
//! # Example
//!
//! ```rust,no_run
//! use rover_runtime::openai::OpenAiCompatService;
//!
//! let service = OpenAiCompatService::new("http://localhost:11434", "llava");
//! let hosted = OpenAiCompatService::new("https://api.openai.com", "gpt-4o-mini")
//!     .with_api_key("sk-...");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decision::{DecisionError, DecisionPayload, DecisionService};
use crate::gemini::truncate_body;

// ─────────────────────────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

/// `response_format` field that enforces structured JSON Schema output.
#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: NamedSchema<'a>,
}

#[derive(Serialize)]
struct NamedSchema<'a> {
    name: &'static str,
    schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

fn request_body<'a>(model: &'a str, payload: &'a DecisionPayload) -> ChatRequest<'a> {
    let mut content = vec![ContentPart::Text {
        text: &payload.prompt,
    }];
    if let Some(image) = &payload.image {
        content.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image.data_uri(),
            },
        });
    }
    ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content,
        }],
        stream: false,
        response_format: ResponseFormat {
            kind: "json_schema",
            json_schema: NamedSchema {
                name: "decision_response",
                schema: &payload.schema,
            },
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAiCompatService
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatService {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatService {
    /// Create a service pointing at `base_url` (e.g. `"http://localhost:11434"`)
    /// and using `model` (e.g. `"llava"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into()).filter(|k| !k.is_empty());
        self
    }
}

#[async_trait]
impl DecisionService for OpenAiCompatService {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, payload: &DecisionPayload) -> Result<String, DecisionError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "calling chat completions");

        let mut request = self.client.post(&url).json(&request_body(&self.model, payload));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecisionError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| DecisionError::BadResponse("empty choices array".into()))
    }
}
