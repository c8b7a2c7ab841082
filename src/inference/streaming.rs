//! SSE streaming response parser for OpenAI-compatible endpoints.
//!
//! Reads a response body as a byte stream, splits it on SSE boundaries
//! (`data: …\n\n`), parses each frame as JSON, and turns the delta into
//! channel-tagged [`CompletionChunk`]s.
//!
//! Per call the stream moves `Streaming -> {Completed | Failed}`; dropping it
//! early is the `Cancelled` exit. On every exit the underlying byte stream
//! (and with it the HTTP connection) is dropped.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;

use super::errors::{snippet, InferenceError};
use super::types::{
    non_empty, ChatCompletionChunk, CompletionChunk, CompletionResponse, CompletionResult,
};

/// Boxed body stream, already mapped into [`InferenceError`]s.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, InferenceError>> + Send>>;

// ─── Frame decoder ───────────────────────────────────────────────────────────

/// Splits raw body bytes into SSE events.
///
/// Works on bytes rather than `str` so multi-byte characters split across
/// network reads are reassembled before decoding. Line endings are normalised
/// to `\n` on the way in (`\r\n`, `\n` and a lone `\r` are all valid SSE).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a boundary.
    scanned: usize,
    /// Last byte pushed was `\r`; a following `\n` belongs to it.
    after_cr: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the transport.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.reserve(bytes.len());
        for &b in bytes {
            if std::mem::take(&mut self.after_cr) && b == b'\n' {
                continue;
            }
            if b == b'\r' {
                self.after_cr = true;
                self.buffer.push(b'\n');
            } else {
                self.buffer.push(b);
            }
        }
    }

    /// Pop the next complete event, if the buffer holds one.
    pub fn next_frame(&mut self) -> Option<Result<String, InferenceError>> {
        // Back up one byte: the boundary may straddle the previous read.
        let start = self.scanned.saturating_sub(1);
        let Some(pos) = self.buffer[start..].windows(2).position(|w| w == b"\n\n") else {
            self.scanned = self.buffer.len();
            return None;
        };
        let end = start + pos;
        let mut frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
        frame.truncate(end);
        self.scanned = 0;
        Some(decode_utf8(frame))
    }

    /// Take whatever is left once the transport has closed.
    pub fn finish(&mut self) -> Option<Result<String, InferenceError>> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(decode_utf8(rest))
    }
}

fn decode_utf8(frame: Vec<u8>) -> Result<String, InferenceError> {
    String::from_utf8(frame).map_err(|e| InferenceError::MalformedFrame {
        reason: format!("frame is not valid UTF-8: {}", e.utf8_error()),
        frame: snippet(&String::from_utf8_lossy(e.as_bytes())),
    })
}

// ─── Frame classification ────────────────────────────────────────────────────

/// What a single SSE event means for the consumer.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// Text (and possibly a finish reason). `terminal` ends the stream.
    Chunks {
        chunks: Vec<CompletionChunk>,
        terminal: bool,
    },
    /// Keep-alive, comment, role-only delta, or usage-only frame.
    Control,
    /// `data: [DONE]`.
    Done,
}

/// Classify one SSE event (which may contain several `data:` lines).
fn parse_event(event: &str) -> Result<Frame, InferenceError> {
    let mut data = String::new();

    for line in event.lines() {
        let Some(payload) = line.strip_prefix("data:") else {
            // `event:`, `id:`, `retry:` and `: comment` lines carry nothing we need
            continue;
        };
        let payload = payload.strip_prefix(' ').unwrap_or(payload);
        if payload.trim() == "[DONE]" {
            return Ok(Frame::Done);
        }
        if !data.is_empty() {
            data.push('\n');
        }
        data.push_str(payload);
    }

    if data.trim().is_empty() {
        return Ok(Frame::Control);
    }

    let value: serde_json::Value =
        serde_json::from_str(&data).map_err(|e| InferenceError::MalformedFrame {
            reason: format!("failed to parse SSE frame: {e}"),
            frame: snippet(&data),
        })?;

    parse_payload(value, &data)
}

/// Turn a decoded JSON payload into chunks.
fn parse_payload(value: serde_json::Value, raw: &str) -> Result<Frame, InferenceError> {
    // vLLM reports failures that happen after the 200 as an error frame
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let status = error
            .get("code")
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(500);
        return Err(InferenceError::HttpError {
            status,
            body: snippet(raw),
        });
    }

    let chunk: ChatCompletionChunk =
        serde_json::from_value(value).map_err(|e| InferenceError::UnexpectedSchema {
            reason: format!("not a completion chunk: {e}"),
            payload: snippet(raw),
        })?;

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(Frame::Control);
    };

    if choice.delta.is_none() && choice.text.is_none() && choice.finish_reason.is_none() {
        return Err(InferenceError::UnexpectedSchema {
            reason: "choice has neither delta, text, nor finish_reason".into(),
            payload: snippet(raw),
        });
    }

    let mut chunks = Vec::new();
    if let Some(delta) = &choice.delta {
        if let Some(reasoning) = delta.reasoning_text() {
            chunks.push(CompletionChunk::Reasoning(reasoning.to_string()));
        }
        if let Some(content) = delta.content_text() {
            chunks.push(CompletionChunk::Content(content.to_string()));
        }
    }
    if let Some(text) = non_empty(&choice.text) {
        chunks.push(CompletionChunk::Content(text.to_string()));
    }

    let terminal = match choice.finish_reason {
        Some(reason) => {
            chunks.push(CompletionChunk::Finish(reason));
            true
        }
        None => false,
    };

    if chunks.is_empty() {
        // Role-only and empty-text deltas are keep-alives; anything else we
        // can't classify must not vanish silently.
        if let Some(delta) = choice.delta.as_ref().filter(|d| d.has_unrecognised_fields()) {
            let fields: Vec<&str> = delta.other.keys().map(String::as_str).collect();
            return Err(InferenceError::UnexpectedSchema {
                reason: format!("delta has no text, only {}", fields.join(", ")),
                payload: snippet(raw),
            });
        }
        Ok(Frame::Control)
    } else {
        Ok(Frame::Chunks { chunks, terminal })
    }
}

// ─── Stream State ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Completed,
    Failed,
}

/// Mutable state threaded through `stream::unfold`.
struct StreamState {
    /// `None` once the stream has completed or failed.
    bytes: Option<ByteStream>,
    decoder: FrameDecoder,
    /// Chunks from one frame not yet handed to the caller.
    pending: VecDeque<CompletionChunk>,
    phase: Phase,
    endpoint: String,
    idle_timeout: Duration,
    frames_seen: usize,
}

impl StreamState {
    fn complete(&mut self, why: &'static str) {
        self.phase = Phase::Completed;
        self.bytes = None;
        tracing::debug!(
            endpoint = %self.endpoint,
            frames = self.frames_seen,
            reason = why,
            "stream completed"
        );
    }

    fn fail(&mut self, err: &InferenceError) {
        self.phase = Phase::Failed;
        self.bytes = None;
        self.pending.clear();
        tracing::warn!(
            endpoint = %self.endpoint,
            frames = self.frames_seen,
            error = %err,
            "stream failed"
        );
    }

    /// Apply one decoded event. Returns the error to surface, if any.
    fn apply(&mut self, event: Result<String, InferenceError>) -> Option<InferenceError> {
        self.frames_seen += 1;
        let outcome = event.and_then(|e| parse_event(&e));
        tracing::trace!(endpoint = %self.endpoint, frame = self.frames_seen, outcome = ?outcome, "sse frame");

        match outcome {
            Ok(Frame::Chunks { chunks, terminal }) => {
                self.pending.extend(chunks);
                if terminal {
                    self.complete("finish_reason");
                }
                None
            }
            Ok(Frame::Control) => None,
            Ok(Frame::Done) => {
                self.complete("[DONE]");
                None
            }
            Err(e) => {
                self.fail(&e);
                Some(e)
            }
        }
    }
}

// ─── SSE stream parser ───────────────────────────────────────────────────────

/// Parse a body byte stream into channel-tagged chunks.
///
/// This is the main entry point for streaming:
/// 1. Waits for bytes, at most `idle_timeout` between reads
/// 2. Splits them into SSE events
/// 3. Emits one chunk per non-empty text field, in arrival order
/// 4. Ends after `[DONE]`, a finish reason, or a clean close
///
/// The first error is yielded once, then the stream ends.
pub fn parse_sse_stream<S>(
    byte_stream: S,
    endpoint: String,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<CompletionChunk, InferenceError>> + Send
where
    S: Stream<Item = Result<Bytes, InferenceError>> + Send + 'static,
{
    let state = StreamState {
        bytes: Some(Box::pin(byte_stream)),
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        phase: Phase::Streaming,
        endpoint,
        idle_timeout,
        frames_seen: 0,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.phase != Phase::Streaming {
                return None;
            }

            // Drain complete events already buffered
            if let Some(event) = state.decoder.next_frame() {
                if let Some(e) = state.apply(event) {
                    return Some((Err(e), state));
                }
                continue;
            }

            // Need more data from the transport
            let idle_timeout = state.idle_timeout;
            let Some(bytes) = state.bytes.as_mut() else {
                state.complete("closed");
                continue;
            };

            let read = tokio::time::timeout(idle_timeout, bytes.next()).await;
            match read {
                Ok(Some(Ok(data))) => state.decoder.push(&data),
                Ok(Some(Err(e))) => {
                    state.fail(&e);
                    return Some((Err(e), state));
                }
                Ok(None) => {
                    state.bytes = None;
                    if let Some(event) = state.decoder.finish() {
                        if let Some(e) = state.apply(event) {
                            return Some((Err(e), state));
                        }
                    }
                    if state.phase == Phase::Streaming {
                        state.complete("connection closed");
                    }
                }
                Err(_) => {
                    let e = InferenceError::Timeout {
                        endpoint: state.endpoint.clone(),
                        duration_secs: idle_timeout.as_secs(),
                    };
                    state.fail(&e);
                    return Some((Err(e), state));
                }
            }
        }
    })
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Drain a chunk stream into per-channel text.
///
/// Stops at, and returns, the first error.
pub async fn collect_stream<S>(stream: S) -> Result<CompletionResult, InferenceError>
where
    S: Stream<Item = Result<CompletionChunk, InferenceError>>,
{
    futures::pin_mut!(stream);

    let mut result = CompletionResult::default();
    let mut reasoning = String::new();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            CompletionChunk::Reasoning(text) => reasoning.push_str(&text),
            CompletionChunk::Content(text) => result.text.push_str(&text),
            CompletionChunk::Finish(reason) => result.finish_reason = Some(reason),
        }
    }

    if !reasoning.is_empty() {
        result.reasoning = Some(reasoning);
    }
    Ok(result)
}

/// Decode a whole (non-streamed) JSON body into `T`.
///
/// Invalid JSON is a `MalformedFrame`; valid JSON of the wrong shape is an
/// `UnexpectedSchema`.
pub fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, InferenceError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedFrame {
            reason: format!("failed to parse response body: {e}"),
            frame: snippet(body),
        })?;
    serde_json::from_value(value).map_err(|e| InferenceError::UnexpectedSchema {
        reason: e.to_string(),
        payload: snippet(body),
    })
}

/// Parse a non-streaming `/chat/completions` or `/completions` body.
///
/// The answer text is `choices[0].message.content` (chat) or
/// `choices[0].text` (completions), copied verbatim.
pub fn parse_completion_response(body: &str) -> Result<CompletionResult, InferenceError> {
    let resp: CompletionResponse = decode_json(body)?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::UnexpectedSchema {
            reason: "empty choices array".into(),
            payload: snippet(body),
        })?;

    let (text, reasoning) = match (&choice.message, &choice.text) {
        (Some(message), _) => (
            message.content.clone().unwrap_or_default(),
            message.reasoning_text().map(str::to_string),
        ),
        (None, Some(text)) => (text.clone(), None),
        (None, None) => {
            return Err(InferenceError::UnexpectedSchema {
                reason: "choice has neither message nor text".into(),
                payload: snippet(body),
            })
        }
    };

    Ok(CompletionResult {
        text,
        reasoning,
        finish_reason: choice.finish_reason,
        usage: resp.usage,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
