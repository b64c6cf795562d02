//! [`GeminiService`] – Google Gemini `generateContent` backend.
//!
//! Sends the prompt and photo as one user turn and asks for
//! `application/json` output constrained by `responseJsonSchema`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decision::{DecisionError, DecisionPayload, DecisionService};

/// Public Gemini API endpoint.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Longest error body kept in [`DecisionError::Status`].
const MAX_ERROR_BODY: usize = 512;

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'static str,
    response_json_schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn request_body(payload: &DecisionPayload) -> GenerateContentRequest<'_> {
    let mut parts = vec![RequestPart::Text {
        text: &payload.prompt,
    }];
    if let Some(image) = &payload.image {
        parts.push(RequestPart::Inline {
            inline_data: InlineData {
                mime_type: image.mime_type,
                data: &image.base64,
            },
        });
    }
    GenerateContentRequest {
        contents: vec![RequestContent { role: "user", parts }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            response_json_schema: &payload.schema,
        },
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, DecisionError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".to_string());
        return Err(DecisionError::BadResponse(format!("empty candidates: {reason}")));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(DecisionError::BadResponse(format!(
            "candidate has no text (finish reason {reason})"
        )));
    }
    Ok(text)
}

pub(crate) fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}

// ─────────────────────────────────────────────────────────────────────────────
// GeminiService
// ─────────────────────────────────────────────────────────────────────────────

/// Async client for the Gemini `generateContent` endpoint.
pub struct GeminiService {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiService {
    /// Point at the public endpoint with `api_key` and `model`
    /// (e.g. `"gemini-2.5-flash"`).
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Use a different endpoint, e.g. a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl DecisionService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, payload: &DecisionPayload) -> Result<String, DecisionError> {
        let url = self.endpoint();
        debug!(url = %url, model = %self.model, "calling gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(payload))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecisionError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        extract_text(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::InlineImage;
    use crate::test_http::serve_once;
    use serde_json::json;

    fn payload(with_image: bool) -> DecisionPayload {
        DecisionPayload {
            prompt: "look around".into(),
            image: with_image.then(|| InlineImage::from_bytes("image/png", b"png")),
            schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn body_carries_text_image_and_schema() {
        let body = serde_json::to_value(request_body(&payload(true))).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"text": "look around"},
                        {"inlineData": {"mimeType": "image/png", "data": "cG5n"}}
                    ]
                }],
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseJsonSchema": {"type": "object"}
                }
            })
        );
    }

    #[test]
    fn body_without_image_has_only_text() {
        let body = serde_json::to_value(request_body(&payload(false))).unwrap();
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn text_parts_are_concatenated() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]}}]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn blocked_prompt_is_a_bad_response() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        let err = extract_text(response).unwrap_err();
        assert!(matches!(err, DecisionError::BadResponse(m) if m.contains("SAFETY")));
    }

    #[test]
    fn candidate_without_text_is_a_bad_response() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "MAX_TOKENS"}]
        }))
        .unwrap();
        let err = extract_text(response).unwrap_err();
        assert!(matches!(err, DecisionError::BadResponse(m) if m.contains("MAX_TOKENS")));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = truncate_body("x".repeat(2000));
        assert!(body.len() < 600);
        assert!(body.ends_with('…'));
    }

    #[tokio::test]
    async fn posts_to_generate_content_with_api_key() {
        let reply = json!({"candidates": [{"content": {"parts": [{"text": "{}"}]}}]});
        let (base, server) = serve_once(200, &reply.to_string()).await;
        let service = GeminiService::new("secret", "gemini-test").with_base_url(base);

        let text = service.generate(&payload(true)).await.unwrap();
        let captured = server.await.unwrap();

        assert_eq!(text, "{}");
        assert_eq!(
            captured.request_line,
            "POST /v1beta/models/gemini-test:generateContent HTTP/1.1"
        );
        assert_eq!(captured.header("x-goog-api-key"), Some("secret"));
        assert_eq!(captured.body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let (base, server) = serve_once(429, r#"{"error": "quota"}"#).await;
        let service = GeminiService::new("secret", "gemini-test").with_base_url(base);

        let err = service.generate(&payload(false)).await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, DecisionError::Status { status: 429, body } if body.contains("quota")));
    }
}
