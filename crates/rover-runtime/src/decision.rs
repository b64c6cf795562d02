//! [`DecisionClient`] – turns a photo plus journey context into a validated
//! plan of actions.
//!
//! The client owns the prompt, the response schema and the retry policy.  The
//! wire protocol lives behind [`DecisionService`] so the same loop can talk to
//! Gemini ([`GeminiService`][crate::gemini::GeminiService]), any
//! OpenAI-compatible server
//! ([`OpenAiCompatService`][crate::openai::OpenAiCompatService]), or a
//! scripted double in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use rover_runtime::decision::DecisionClient;
//! use rover_runtime::gemini::GeminiService;
//! use rover_types::DecisionRequest;
//!
//! # async fn demo() -> Result<(), rover_runtime::decision::DecisionError> {
//! let client = DecisionClient::new(Box::new(GeminiService::new("key", "gemini-2.5-flash")))?;
//! let request = DecisionRequest {
//!     image_path: Some("logs/images/1_small.png".into()),
//!     ..Default::default()
//! };
//! let response = client.invoke(&request).await?;
//! println!("{}", response.current_journey_note);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rover_hal::mime_type_for;
use rover_types::{DecisionRequest, DecisionResponse};
use schemars::r#gen::SchemaSettings;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Prompt
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed instructions sent at the top of every prompt.
pub const SYSTEM_PROMPT: &str = "\
You are the pilot of a small two-wheeled robot cart exploring an unknown place. \
Each turn you receive one photo from its front camera and must answer with a single JSON object \
that matches the provided response schema.

Tools:
- move_forward(duration): drive straight ahead for `duration` whole seconds
- go_backward(duration): reverse for `duration` whole seconds
- turn_left(): rotate left on the spot by a short fixed step
- turn_right(): rotate right on the spot by a short fixed step

Facts about the robot:
- One second of forward motion covers roughly 20 cm.
- The camera faces forward with a horizontal field of view of about 62.2 degrees.
- Plan between 1 and 3 actions per turn.  They run in order, then a new photo is taken.

Put what you see and intend into current_journey_note; earlier notes come back to you as journey notes. \
With no journey notes and no last actions the journey is just starting: look around for something worth visiting. \
Answer with JSON only.";

/// Render the text part of a request.
///
/// Sections are separated by a blank line.  The goal, journey notes and last
/// actions sections are omitted entirely when empty.
pub fn build_prompt(request: &DecisionRequest) -> String {
    let mut sections = vec![SYSTEM_PROMPT.to_string()];

    if let Some(goal) = request.goal.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        sections.push(format!("Goal: {goal}"));
    }

    if !request.journey_notes.is_empty() {
        let notes: Vec<String> = request
            .journey_notes
            .iter()
            .map(|n| format!("- {n}"))
            .collect();
        sections.push(format!("Journey notes:\n{}", notes.join("\n")));
    }

    if !request.last_actions.is_empty() {
        let names: Vec<&str> = request.last_actions.iter().map(|a| a.tool.as_str()).collect();
        sections.push(format!("Last actions: {}", names.join(", ")));
    }

    sections.join("\n\n")
}

/// JSON Schema of [`DecisionResponse`], with every sub-schema inlined so that
/// providers without `$ref` support accept it.
///
/// # Errors
///
/// Returns the [`serde_json::Error`] if the generated schema cannot be
/// converted to a JSON value.
pub fn response_schema() -> Result<serde_json::Value, serde_json::Error> {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
        s.meta_schema = None;
    });
    let schema = settings.into_generator().into_root_schema_for::<DecisionResponse>();
    serde_json::to_value(schema)
}

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while obtaining a decision.
#[derive(Error, Debug)]
pub enum DecisionError {
    /// The HTTP request to the provider failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The reply envelope had no usable text.
    #[error("unexpected response format: {0}")]
    BadResponse(String),

    /// The reply text did not decode into a [`DecisionResponse`].
    #[error("response does not match the schema: {0}")]
    Schema(#[from] serde_json::Error),

    /// The photo could not be read for upload.
    #[error("cannot read image {path}: {source}")]
    Image {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every attempt failed; carries the last failure.
    #[error("no valid decision after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<DecisionError>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Service seam
// ─────────────────────────────────────────────────────────────────────────────

/// A base64-encoded image attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: &'static str,
    pub base64: String,
}

impl InlineImage {
    pub fn from_bytes(mime_type: &'static str, bytes: &[u8]) -> Self {
        Self {
            mime_type,
            base64: STANDARD.encode(bytes),
        }
    }

    /// `data:` URI form, as used by OpenAI-style `image_url` parts.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// One fully prepared request.  Built once per [`DecisionClient::invoke`]
/// and reused across retries.
#[derive(Debug, Clone)]
pub struct DecisionPayload {
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub schema: serde_json::Value,
}

/// Transport to a structured-output model.
///
/// Implementations make exactly one request per call and return the raw JSON
/// text of the reply.  Retrying is the caller's business.
#[async_trait]
pub trait DecisionService: Send + Sync {
    /// Short provider name for logs, e.g. `"gemini"`.
    fn name(&self) -> &str;

    async fn generate(&self, payload: &DecisionPayload) -> Result<String, DecisionError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry policy
// ─────────────────────────────────────────────────────────────────────────────

/// Attempts per [`DecisionClient::invoke`] call.
pub const MAX_ATTEMPTS: u32 = 10;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 8_000;

/// Delay after failed attempt `attempt` (1-based): 0.5 s doubling per
/// attempt, capped at 8 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let ms = BACKOFF_BASE_MS.saturating_mul(1u64 << exponent);
    Duration::from_millis(ms.min(BACKOFF_MAX_MS))
}

/// Parse reply text, tolerating a Markdown code fence around the JSON.
pub fn parse_response(text: &str) -> Result<DecisionResponse, DecisionError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    Ok(serde_json::from_str(body.trim())?)
}

// ─────────────────────────────────────────────────────────────────────────────
// DecisionClient
// ─────────────────────────────────────────────────────────────────────────────

/// Prompt construction plus bounded retry around a [`DecisionService`].
///
/// Construct once and reuse across cycles.
pub struct DecisionClient {
    service: Box<dyn DecisionService>,
    schema: serde_json::Value,
    max_attempts: u32,
}

impl DecisionClient {
    /// Wrap `service`, generating the response schema once up front.
    ///
    /// # Errors
    ///
    /// [`DecisionError::Schema`] if the schema cannot be built.
    pub fn new(service: Box<dyn DecisionService>) -> Result<Self, DecisionError> {
        Ok(Self {
            service,
            schema: response_schema()?,
            max_attempts: MAX_ATTEMPTS,
        })
    }

    /// The schema sent with every request.
    pub fn schema(&self) -> &serde_json::Value {
        &self.schema
    }

    /// Override the attempt budget.  Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Build the payload for `request`: prompt text plus the inlined photo.
    ///
    /// # Errors
    ///
    /// [`DecisionError::Image`] if the photo cannot be read.
    pub async fn prepare(&self, request: &DecisionRequest) -> Result<DecisionPayload, DecisionError> {
        let image = match &request.image_path {
            Some(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|source| DecisionError::Image {
                        path: path.clone(),
                        source,
                    })?;
                Some(InlineImage::from_bytes(mime_type_for(path), &bytes))
            }
            None => None,
        };
        Ok(DecisionPayload {
            prompt: build_prompt(request),
            image,
            schema: self.schema.clone(),
        })
    }

    /// Obtain one schema-valid [`DecisionResponse`].
    ///
    /// Transport failures, bad envelopes and schema mismatches are retried
    /// with [`backoff_delay`] between attempts.  The returned response has
    /// not been checked with
    /// [`DecisionResponse::validate`]; that is the caller's job.
    ///
    /// # Errors
    ///
    /// [`DecisionError::Image`] immediately if the photo is unreadable, or
    /// [`DecisionError::RetriesExhausted`] once every attempt has failed.
    #[instrument(skip_all, fields(service = self.service.name()))]
    pub async fn invoke(&self, request: &DecisionRequest) -> Result<DecisionResponse, DecisionError> {
        let payload = self.prepare(request).await?;
        debug!(prompt_len = payload.prompt.len(), has_image = payload.image.is_some(), "decision payload ready");

        let mut attempt = 1;
        loop {
            let outcome = match self.service.generate(&payload).await {
                Ok(text) => {
                    debug!(attempt, raw = %text, "raw decision reply");
                    parse_response(&text)
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(response) => {
                    info!(attempt, actions = response.next_actions.len(), "decision received");
                    return Ok(response);
                }
                Err(e) if attempt >= self.max_attempts => {
                    error!(attempt, error = %e, "giving up on decision");
                    return Err(DecisionError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "decision attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Replays a fixed list of replies, one per call, and records every
    /// payload it was sent.  Once the script runs out, the last reply repeats.
    #[derive(Clone)]
    pub struct ScriptedService {
        replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
        last: Arc<Mutex<Option<Result<String, String>>>>,
        pub calls: Arc<Mutex<Vec<DecisionPayload>>>,
    }

    impl ScriptedService {
        pub fn new(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into())),
                last: Arc::new(Mutex::new(None)),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DecisionService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, payload: &DecisionPayload) -> Result<String, DecisionError> {
            self.calls.lock().unwrap().push(payload.clone());
            let next = self.replies.lock().unwrap().pop_front();
            let reply = match next {
                Some(r) => {
                    *self.last.lock().unwrap() = Some(r.clone());
                    r
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Err("script is empty".to_string())),
            };
            reply.map_err(DecisionError::BadResponse)
        }
    }
}
