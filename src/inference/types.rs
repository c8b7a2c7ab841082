//! Shared types for the completion client.
//!
//! Request types are built by the caller and serialized into the OpenAI
//! Completions / Chat Completions body. Wire response types mirror what
//! vLLM and other OpenAI-compatible servers return.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ─── Request Types ───────────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What the model is asked to continue.
///
/// `Messages` goes to `/chat/completions`, `Text` to `/completions`.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Messages(Vec<ChatMessage>),
    Text(String),
}

/// Sampling configuration.
///
/// Unset fields are omitted from the body so the server's defaults apply.
/// `extra` is flattened into the top level of the request body and carries
/// provider extensions such as `chat_template_kwargs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// vLLM extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// vLLM extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// vLLM extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SamplingParams {
    /// Qwen3's recommended sampling for chat, with thinking toggled.
    pub fn qwen3_thinking(enable_thinking: bool) -> Self {
        Self {
            temperature: Some(0.6),
            top_p: Some(0.95),
            top_k: Some(20),
            presence_penalty: Some(1.5),
            max_tokens: Some(32768),
            ..Self::default()
        }
        .with_thinking(enable_thinking)
    }

    /// Set `chat_template_kwargs.enable_thinking`, keeping other template kwargs.
    pub fn with_thinking(mut self, enable: bool) -> Self {
        let kwargs = self
            .extra
            .entry("chat_template_kwargs")
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        match kwargs {
            serde_json::Value::Object(map) => {
                map.insert("enable_thinking".into(), serde_json::Value::Bool(enable));
            }
            other => {
                *other = serde_json::json!({ "enable_thinking": enable });
            }
        }
        self
    }

    /// Add an arbitrary provider-specific field to the request body.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// One completion call: model, prompt, and sampling.
///
/// Whether the call streams is decided by the client method used to send it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub input: Prompt,
    pub sampling: SamplingParams,
}

impl CompletionRequest {
    /// A chat request with default sampling.
    pub fn chat(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            input: Prompt::Messages(messages),
            sampling: SamplingParams::default(),
        }
    }

    /// A raw-prompt completion request with default sampling.
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: Prompt::Text(prompt.into()),
            sampling: SamplingParams::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// API path relative to the `/v1` base.
    pub fn path(&self) -> &'static str {
        match self.input {
            Prompt::Messages(_) => "chat/completions",
            Prompt::Text(_) => "completions",
        }
    }

    /// Borrowing view of this request as a wire body.
    pub(crate) fn body(&self, stream: bool) -> CompletionBody<'_> {
        let (messages, prompt) = match &self.input {
            Prompt::Messages(m) => (Some(m.as_slice()), None),
            Prompt::Text(t) => (None, Some(t.as_str())),
        };
        CompletionBody {
            model: &self.model,
            messages,
            prompt,
            sampling: &self.sampling,
            stream,
        }
    }
}

/// Request body for `POST /v1/chat/completions` and `POST /v1/completions`.
#[derive(Debug, Serialize)]
pub(crate) struct CompletionBody<'a> {
    pub model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<&'a [ChatMessage]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<&'a str>,
    #[serde(flatten)]
    pub sampling: &'a SamplingParams,
    pub stream: bool,
}

/// Where the audio for a transcription comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    File(PathBuf),
    Bytes { file_name: String, data: Vec<u8> },
}

/// Request for `POST /v1/audio/transcriptions` (multipart upload).
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    pub model: String,
    pub audio: AudioSource,
    pub language: Option<String>,
    /// `json` unless overridden.
    pub response_format: String,
    pub temperature: Option<f32>,
    /// Extra sampling form fields, e.g. `seed`, `repetition_penalty`, `top_p`.
    pub extra: Vec<(String, String)>,
}

impl TranscriptionRequest {
    pub fn new(model: impl Into<String>, audio: AudioSource) -> Self {
        Self {
            model: model.into(),
            audio,
            language: None,
            response_format: "json".to_string(),
            temperature: None,
            extra: Vec::new(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.extra.push((name.into(), value.to_string()));
        self
    }
}

// ─── Client Output Types ─────────────────────────────────────────────────────

/// One incremental piece of a streamed response, tagged by channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionChunk {
    /// Model-internal deliberation text.
    Reasoning(String),
    /// User-facing answer text.
    Content(String),
    /// The server's finish reason. Always the last chunk when present.
    Finish(String),
}

impl CompletionChunk {
    /// The text carried by a `Reasoning` or `Content` chunk.
    pub fn text(&self) -> Option<&str> {
        match self {
            CompletionChunk::Reasoning(t) | CompletionChunk::Content(t) => Some(t),
            CompletionChunk::Finish(_) => None,
        }
    }
}

/// Token accounting reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Final result of a non-streaming call (or a collected stream).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResult {
    /// Answer-channel text.
    pub text: String,
    /// Reasoning-channel text, when the server separated it.
    pub reasoning: Option<String>,
    /// `"stop"`, `"length"`, … or `None` if the server did not say.
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// An entry from `GET /v1/models`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
    #[serde(default)]
    pub created: Option<u64>,
    /// vLLM extension.
    #[serde(default)]
    pub max_model_len: Option<u64>,
}

// ─── Wire Response Types ─────────────────────────────────────────────────────

/// Raw SSE chunk from the OpenAI API.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    pub choices: Vec<ChunkChoice>,
}

/// A single choice within a streaming chunk.
///
/// Chat streams carry `delta`; `/completions` streams carry `text`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The delta (incremental update) within a chunk choice.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    /// Ollama and newer vLLM releases name the field `reasoning`; some send both.
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Anything else the server put in the delta (`tool_calls`, ...).
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl ChunkDelta {
    /// The first non-empty reasoning field.
    pub fn reasoning_text(&self) -> Option<&str> {
        non_empty(&self.reasoning_content).or_else(|| non_empty(&self.reasoning))
    }

    pub fn content_text(&self) -> Option<&str> {
        non_empty(&self.content)
    }

    /// Whether the delta carries a field this client cannot turn into a chunk.
    /// Null and empty values don't count.
    pub fn has_unrecognised_fields(&self) -> bool {
        self.other.values().any(|v| match v {
            serde_json::Value::Null => false,
            serde_json::Value::Array(a) => !a.is_empty(),
            serde_json::Value::Object(o) => !o.is_empty(),
            serde_json::Value::String(s) => !s.is_empty(),
            _ => true,
        })
    }
}

/// Non-streaming `/chat/completions` or `/completions` response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CompletionResponse {
    pub choices: Vec<ResponseChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResponseChoice {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ResponseMessage {
    pub fn reasoning_text(&self) -> Option<&str> {
        non_empty(&self.reasoning_content).or_else(|| non_empty(&self.reasoning))
    }
}

/// Empty strings and missing fields mean the same thing on the wire.
pub(crate) fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

/// Non-streaming `/audio/transcriptions` response (`response_format=json`).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TranscriptionResponse {
    pub text: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// `GET /v1/models` response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ModelList {
    pub data: Vec<ModelInfo>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_body_shape() {
        let req = CompletionRequest::chat("demo", vec![ChatMessage::user("hi")]);
        let json = serde_json::to_value(req.body(true)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "demo",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true
            })
        );
    }

    #[test]
    fn test_text_body_uses_prompt() {
        let req = CompletionRequest::text("facebook/opt-125m", "San Francisco is a");
        let json = serde_json::to_value(req.body(false)).unwrap();
        assert_eq!(json["prompt"], "San Francisco is a");
        assert!(json.get("messages").is_none());
        assert_eq!(json["stream"], false);
        assert_eq!(req.path(), "completions");
    }

    #[test]
    fn test_unset_sampling_fields_omitted() {
        let sampling = SamplingParams {
            temperature: Some(0.6),
            max_tokens: Some(1024),
            ..SamplingParams::default()
        };
        let json = serde_json::to_string(&sampling).unwrap();
        assert!(json.contains("\"temperature\":0.6"));
        assert!(json.contains("\"max_tokens\":1024"));
        assert!(!json.contains("top_p"), "top_p should be omitted when None");
        assert!(!json.contains("top_k"));
    }

    #[test]
    fn test_qwen3_preset_flattens_extensions() {
        let req = CompletionRequest::chat("Qwen/Qwen3-8B", vec![ChatMessage::user("hi")])
            .with_sampling(SamplingParams::qwen3_thinking(false));
        let json = serde_json::to_value(req.body(true)).unwrap();
        assert_eq!(json["top_k"], 20);
        assert_eq!(json["max_tokens"], 32768);
        assert_eq!(json["chat_template_kwargs"]["enable_thinking"], false);
    }

    #[test]
    fn test_with_thinking_keeps_other_template_kwargs() {
        let sampling = SamplingParams::default()
            .with_extra("chat_template_kwargs", serde_json::json!({"custom": 1}))
            .with_thinking(true);
        let kwargs = &sampling.extra["chat_template_kwargs"];
        assert_eq!(kwargs["custom"], 1);
        assert_eq!(kwargs["enable_thinking"], true);
    }

    #[test]
    fn test_delta_collects_unrecognised_fields() {
        let delta: ChunkDelta =
            serde_json::from_str(r#"{"role": "assistant", "content": "", "tool_calls": null}"#)
                .unwrap();
        assert_eq!(delta.role.as_deref(), Some("assistant"));
        assert!(!delta.has_unrecognised_fields());

        let delta: ChunkDelta =
            serde_json::from_str(r#"{"tool_calls": [{"id": "call_1", "type": "function"}]}"#)
                .unwrap();
        assert!(delta.has_unrecognised_fields());
    }

    #[test]
    fn test_delta_reads_either_reasoning_field() {
        let delta: ChunkDelta = serde_json::from_str(r#"{"reasoning": "hmm"}"#).unwrap();
        assert_eq!(delta.reasoning_text(), Some("hmm"));
        assert!(delta.content_text().is_none());

        let delta: ChunkDelta =
            serde_json::from_str(r#"{"reasoning_content": "a", "reasoning": "a", "content": ""}"#)
                .unwrap();
        assert_eq!(delta.reasoning_text(), Some("a"));
        assert!(delta.content_text().is_none(), "empty content counts as absent");
    }

    #[test]
    fn test_chunk_text() {
        assert_eq!(CompletionChunk::Content("a".into()).text(), Some("a"));
        assert_eq!(CompletionChunk::Finish("stop".into()).text(), None);
    }

    #[test]
    fn test_transcription_builder() {
        let req = TranscriptionRequest::new(
            "openai/whisper-large-v3",
            AudioSource::File(PathBuf::from("/tmp/a.wav")),
        )
        .with_language("en")
        .with_temperature(0.0)
        .with_field("seed", 4419);
        assert_eq!(req.response_format, "json");
        assert_eq!(req.extra, vec![("seed".to_string(), "4419".to_string())]);
    }
}
