//! `rover-runtime` – the exploration brain.
//!
//! Runs the perceive/decide/act cycle: photograph the scene, ask a
//! vision model what to do next, check the answer, and drive.
//!
//! # Modules
//!
//! - [`decision`] – [`DecisionClient`][decision::DecisionClient]: builds the
//!   prompt from journey context, attaches the photo, requests JSON matching
//!   the [`DecisionResponse`][rover_types::DecisionResponse] schema, and
//!   retries up to ten times with capped exponential backoff.
//! - [`gemini`] – [`GeminiService`][gemini::GeminiService]: the Gemini
//!   `generateContent` backend.
//! - [`openai`] – [`OpenAiCompatService`][openai::OpenAiCompatService]: an
//!   OpenAI-compatible `/v1/chat/completions` backend for local models such
//!   as [Ollama](https://ollama.com) or the hosted API.
//! - [`explorer`] – [`Explorer`][explorer::Explorer]: one cycle at a time,
//!   with journey notes and the previous plan carried between cycles.
//! - [`journal`] – [`JourneyJournal`][journal::JourneyJournal]: the
//!   append-only `journey.ndjson` record of completed cycles.
//! - [`manual`] – [`ManualController`][manual::ManualController]: live
//!   preview plus operator-held drive intents.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with optional OTLP span export.
//!
//! # Safety of motion
//!
//! No action reaches the drive base until the whole response has passed
//! [`DecisionResponse::validate`][rover_types::DecisionResponse::validate],
//! and every timed action runs inside a
//! [`MotionSpan`][rover_hal::MotionSpan] that returns the wheels to neutral
//! even if the cycle is cancelled.

pub mod decision;
pub mod explorer;
pub mod gemini;
pub mod journal;
pub mod manual;
pub mod openai;
pub mod telemetry;

#[cfg(test)]
mod test_http;

pub use decision::{DecisionClient, DecisionError, DecisionService, MAX_ATTEMPTS, build_prompt};
pub use explorer::{CycleError, CycleReport, Explorer, ExplorerConfig, JourneyState};
pub use gemini::GeminiService;
pub use journal::{JournalEntry, JourneyJournal};
pub use manual::{Control, FrameSink, IntentSource, ManualController};
pub use openai::OpenAiCompatService;
pub use telemetry::{TracerProviderGuard, init_tracing};
