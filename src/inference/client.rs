//! OpenAI-compatible completion client.
//!
//! Sends chat, completion and transcription requests to a vLLM (or any
//! OpenAI-compatible) endpoint, and either waits for the whole answer or
//! streams it back as channel-tagged chunks. Single attempt per call: the
//! client never retries, so callers can layer their own backoff.

use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use uuid::Uuid;

use super::config::ClientConfig;
use super::errors::{snippet, InferenceError};
use super::streaming::{decode_json, parse_completion_response, parse_sse_stream};
use super::types::{
    AudioSource, CompletionChunk, CompletionRequest, CompletionResult, ModelInfo, ModelList,
    Prompt, TranscriptionRequest, TranscriptionResponse,
};

// ─── CompletionClient ────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible inference endpoint.
///
/// Cheap to clone and safe to share: it holds only the immutable config and a
/// pooled `reqwest::Client`. Every call opens its own request.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: HttpClient,
    config: ClientConfig,
}

impl CompletionClient {
    /// Create a client. Does NOT check connectivity; see [`Self::health_check`].
    pub fn new(config: ClientConfig) -> Result<Self, InferenceError> {
        config.validate()?;

        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectFailed {
                endpoint: config.api_base(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Attach the bearer token, if one is configured.
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    // ─── Completion (non-streaming) ──────────────────────────────────────

    /// Send a request with `stream=false` and wait for the full answer.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, InferenceError> {
        let url = self.config.endpoint(request.path());
        let request_id = Uuid::new_v4();
        log_request(&request_id, &url, request, false);

        let builder = self
            .authorized(self.http.post(&url))
            .timeout(self.timeout())
            .json(&request.body(false));
        let body = self.send_for_text(builder, &url).await?;

        let result = parse_completion_response(&body).inspect_err(|e| {
            tracing::warn!(request_id = %request_id, url = %url, error = %e, "unparsable completion");
        })?;

        tracing::info!(
            request_id = %request_id,
            finish_reason = ?result.finish_reason,
            completion_tokens = ?result.usage.map(|u| u.completion_tokens),
            "completion finished"
        );
        Ok(result)
    }

    // ─── Completion (streaming) ──────────────────────────────────────────

    /// Send a request with `stream=true`.
    ///
    /// Resolves once the response headers have arrived: a connect failure or
    /// non-2xx status is returned here, before any chunk. The returned stream
    /// is lazy, finite, and not restartable; dropping it closes the connection.
    pub async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<impl Stream<Item = Result<CompletionChunk, InferenceError>> + Send, InferenceError>
    {
        let url = self.config.endpoint(request.path());
        let request_id = Uuid::new_v4();
        log_request(&request_id, &url, request, true);

        let builder = self.http.post(&url).json(&request.body(true));
        self.open_stream(builder, url).await
    }

    /// Shared connect + status check + SSE hookup for streaming calls.
    async fn open_stream(
        &self,
        builder: RequestBuilder,
        url: String,
    ) -> Result<impl Stream<Item = Result<CompletionChunk, InferenceError>> + Send, InferenceError>
    {
        let timeout = self.timeout();
        let timeout_secs = self.config.timeout_secs;

        let send = self
            .authorized(builder)
            .header(ACCEPT, "text/event-stream")
            .send();

        // No whole-request timeout here: a healthy stream can run for minutes.
        // Waiting for headers and each read are bounded instead.
        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| InferenceError::Timeout {
                endpoint: url.clone(),
                duration_secs: timeout_secs,
            })?
            .map_err(|e| {
                InferenceError::from_send(&e, &url, timeout_secs, self.config.connect_timeout_secs)
            })?;

        let response = ensure_success(response, &url, timeout).await?;

        let endpoint = url.clone();
        let bytes = response
            .bytes_stream()
            .map(move |r| r.map_err(|e| InferenceError::from_body(&e, &endpoint, timeout_secs)));

        Ok(parse_sse_stream(bytes, url, timeout))
    }

    // ─── Transcription ───────────────────────────────────────────────────

    /// Upload audio to `/audio/transcriptions` and wait for the text.
    pub async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<CompletionResult, InferenceError> {
        let url = self.config.endpoint("audio/transcriptions");
        let request_id = Uuid::new_v4();
        tracing::info!(
            request_id = %request_id,
            url = %url,
            model = %request.model,
            stream = false,
            "transcription request"
        );

        let form = transcription_form(request, false).await?;
        let builder = self
            .authorized(self.http.post(&url))
            .timeout(self.timeout())
            .multipart(form);
        let body = self.send_for_text(builder, &url).await?;

        if request.response_format == "text" {
            return Ok(CompletionResult {
                text: body,
                ..CompletionResult::default()
            });
        }

        let parsed: TranscriptionResponse = decode_json(&body)?;
        Ok(CompletionResult {
            text: parsed.text,
            reasoning: None,
            finish_reason: None,
            usage: parsed.usage,
        })
    }

    /// Upload audio with `stream=true`; text arrives as `Content` chunks.
    pub async fn transcribe_streaming(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<impl Stream<Item = Result<CompletionChunk, InferenceError>> + Send, InferenceError>
    {
        let url = self.config.endpoint("audio/transcriptions");
        let request_id = Uuid::new_v4();
        tracing::info!(
            request_id = %request_id,
            url = %url,
            model = %request.model,
            stream = true,
            "transcription request"
        );

        let form = transcription_form(request, true).await?;
        let builder = self.http.post(&url).multipart(form);
        self.open_stream(builder, url).await
    }

    // ─── Models & Health ─────────────────────────────────────────────────

    /// List the models served at this endpoint (`GET /v1/models`).
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, InferenceError> {
        let url = self.config.endpoint("models");
        let builder = self.authorized(self.http.get(&url)).timeout(self.timeout());
        let body = self.send_for_text(builder, &url).await?;
        let list: ModelList = decode_json(&body)?;
        tracing::debug!(url = %url, count = list.data.len(), "listed models");
        Ok(list.data)
    }

    /// Liveness check against `GET {server_root}/ping`.
    ///
    /// `Ok(false)` for any non-2xx answer; `Err` if the server is unreachable.
    pub async fn health_check(&self) -> Result<bool, InferenceError> {
        let url = format!("{}/ping", self.config.server_root());
        let connect_secs = self.config.connect_timeout_secs;

        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(connect_secs))
            .send()
            .await
            .map_err(|e| InferenceError::from_send(&e, &url, connect_secs, connect_secs))?;

        let healthy = response.status().is_success();
        if !healthy {
            tracing::warn!(url = %url, status = response.status().as_u16(), "health check failed");
        }
        Ok(healthy)
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    /// Send, require 2xx, and read the whole body as text.
    async fn send_for_text(
        &self,
        builder: RequestBuilder,
        url: &str,
    ) -> Result<String, InferenceError> {
        let timeout_secs = self.config.timeout_secs;
        let response = builder
            .send()
            .await
            .map_err(|e| {
                InferenceError::from_send(&e, url, timeout_secs, self.config.connect_timeout_secs)
            })?;

        let response = ensure_success(response, url, self.timeout()).await?;

        response
            .text()
            .await
            .map_err(|e| InferenceError::from_body(&e, url, timeout_secs))
    }
}

/// Turn any non-2xx response into `HttpError`, keeping a snippet of the body.
///
/// The body read is bounded by `timeout`: a server that sends an error status
/// and then stalls still fails the call, with whatever body had arrived.
async fn ensure_success(
    response: Response,
    url: &str,
    timeout: Duration,
) -> Result<Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body_text = read_error_body(response, url, timeout).await;
    tracing::warn!(url = %url, status = status.as_u16(), "endpoint returned error status");
    Err(InferenceError::HttpError {
        status: status.as_u16(),
        body: snippet(&body_text),
    })
}

async fn read_error_body(mut response: Response, url: &str, timeout: Duration) -> String {
    let mut body = Vec::new();
    let read = tokio::time::timeout(timeout, async {
        while let Ok(Some(chunk)) = response.chunk().await {
            body.extend_from_slice(&chunk);
        }
    })
    .await;
    if read.is_err() {
        tracing::warn!(url = %url, bytes = body.len(), "error body read timed out");
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Log the request metadata (not the full body, prompts can be huge).
fn log_request(request_id: &Uuid, url: &str, request: &CompletionRequest, stream: bool) {
    let message_count = match &request.input {
        Prompt::Messages(m) => m.len(),
        Prompt::Text(_) => 1,
    };
    tracing::info!(
        request_id = %request_id,
        url = %url,
        model = %request.model,
        message_count,
        max_tokens = ?request.sampling.max_tokens,
        stream,
        "completion request"
    );
}

/// Build the multipart body for `/audio/transcriptions`.
async fn transcription_form(
    request: &TranscriptionRequest,
    stream: bool,
) -> Result<Form, InferenceError> {
    let (file_name, data) = match &request.audio {
        AudioSource::File(path) => {
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| InferenceError::AudioFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "audio".to_string());
            (name, data)
        }
        AudioSource::Bytes { file_name, data } => (file_name.clone(), data.clone()),
    };

    let mut form = Form::new()
        .part("file", Part::bytes(data).file_name(file_name))
        .text("model", request.model.clone())
        .text("response_format", request.response_format.clone());

    if let Some(language) = &request.language {
        form = form.text("language", language.clone());
    }
    if let Some(temperature) = request.temperature {
        form = form.text("temperature", temperature.to_string());
    }
    for (name, value) in &request.extra {
        form = form.text(name.clone(), value.clone());
    }
    if stream {
        form = form.text("stream", "true");
    }

    Ok(form)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
