pub mod inference;

pub use inference::{
    collect_stream, ChatMessage, ClientConfig, CompletionChunk, CompletionClient,
    CompletionRequest, CompletionResult, InferenceError, SamplingParams, TranscriptionRequest,
};

/// Initialize the tracing subscriber on stderr.
///
/// Filter comes from `RUST_LOG`, falling back to info for this crate and its
/// binary, warn for everything else.
/// `json` switches to one JSON object per line for log shippers. Stdout is
/// left alone so streamed model output stays clean.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vllm_stream_client=info,vllm_client=info,warn"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "=== vllm-stream-client starting ==="
    );
}
