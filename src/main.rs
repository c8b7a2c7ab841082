//! `vllm-client`: command-line front end for the completion client.
//!
//! Mirrors the usual smoke tests run against a fresh vLLM deployment: ping
//! the server, list what it serves, then chat (streamed, with reasoning shown
//! separately), complete a raw prompt, or transcribe an audio file.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::{Stream, StreamExt};

use vllm_stream_client::inference::{load_client_config, AudioSource};
use vllm_stream_client::{
    ChatMessage, ClientConfig, CompletionChunk, CompletionClient, CompletionRequest,
    CompletionResult, InferenceError, SamplingParams, TranscriptionRequest,
};

#[derive(Debug, Parser)]
#[command(name = "vllm-client", version, about = "Talk to an OpenAI-compatible inference server")]
struct Cli {
    /// YAML client config; defaults to VLLM_BASE_URL / VLLM_API_KEY from the environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the API base, e.g. http://localhost:8000/v1.
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Model id, or `auto` to use the first model the server lists.
    #[arg(long, global = true, env = "VLLM_MODEL", default_value = "auto")]
    model: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Liveness check against /ping.
    Ping,
    /// List served models.
    Models,
    /// Chat completion; streamed unless --no-stream.
    Chat {
        prompt: String,
        #[arg(long)]
        system: Option<String>,
        #[arg(long)]
        no_stream: bool,
        /// Ask the chat template to enable thinking.
        #[arg(long)]
        thinking: bool,
        #[arg(long)]
        max_tokens: Option<u32>,
    },
    /// Raw-prompt completion against /completions.
    Complete {
        prompt: String,
        #[arg(long, default_value_t = 0.6)]
        temperature: f32,
        #[arg(long, default_value_t = 1024)]
        max_tokens: u32,
    },
    /// Transcribe an audio file.
    Transcribe {
        file: PathBuf,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    vllm_stream_client::init_tracing(cli.log_json);

    let client = CompletionClient::new(resolve_config(&cli)?)
        .context("invalid client configuration")?;

    match &cli.command {
        Command::Ping => {
            let healthy = client.health_check().await.context("server unreachable")?;
            if !healthy {
                bail!("health check failed for {}", client.config().server_root());
            }
            println!("Health check passed");
        }
        Command::Models => {
            let models = client.list_models().await.context("failed to list models")?;
            for model in models {
                match model.max_model_len {
                    Some(len) => println!("{}\t(max_model_len={len})", model.id),
                    None => println!("{}", model.id),
                }
            }
        }
        Command::Chat {
            prompt,
            system,
            no_stream,
            thinking,
            max_tokens,
        } => {
            let model = resolve_model(&client, &cli.model).await?;
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system.clone()));
            }
            messages.push(ChatMessage::user(prompt.clone()));

            let mut sampling = SamplingParams::qwen3_thinking(*thinking);
            if max_tokens.is_some() {
                sampling.max_tokens = *max_tokens;
            }
            let request = CompletionRequest::chat(model, messages).with_sampling(sampling);

            if *no_stream {
                let result = client.complete(&request).await.context("chat failed")?;
                print_result(&result);
            } else {
                let stream = client
                    .complete_streaming(&request)
                    .await
                    .context("chat failed")?;
                print_stream(stream).await?;
            }
        }
        Command::Complete {
            prompt,
            temperature,
            max_tokens,
        } => {
            let model = resolve_model(&client, &cli.model).await?;
            let request = CompletionRequest::text(model, prompt.clone()).with_sampling(
                SamplingParams {
                    temperature: Some(*temperature),
                    max_tokens: Some(*max_tokens),
                    ..SamplingParams::default()
                },
            );
            let result = client.complete(&request).await.context("completion failed")?;
            print_result(&result);
        }
        Command::Transcribe {
            file,
            language,
            stream,
        } => {
            let model = resolve_model(&client, &cli.model).await?;
            let request = TranscriptionRequest::new(model, AudioSource::File(file.clone()))
                .with_language(language.clone())
                .with_temperature(0.0);

            if *stream {
                let chunks = client
                    .transcribe_streaming(&request)
                    .await
                    .context("transcription failed")?;
                print_stream(chunks).await?;
            } else {
                let result = client
                    .transcribe(&request)
                    .await
                    .context("transcription failed")?;
                println!("transcription result: {}", result.text);
            }
        }
    }

    Ok(())
}

/// Config file (or environment), then command-line overrides.
fn resolve_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => load_client_config(path)?,
        None => ClientConfig::from_env()?,
    };
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    if let Some(key) = &cli.api_key {
        config.api_key = Some(key.clone());
    }
    config.validate()?;
    Ok(config)
}

/// `auto` picks the first model the server reports.
async fn resolve_model(client: &CompletionClient, model: &str) -> anyhow::Result<String> {
    if model != "auto" {
        return Ok(model.to_string());
    }
    let models = client.list_models().await.context("failed to list models")?;
    let first = models
        .into_iter()
        .next()
        .context("server lists no models; pass --model")?;
    tracing::info!(model = %first.id, "using first served model");
    Ok(first.id)
}

fn print_result(result: &CompletionResult) {
    if let Some(reasoning) = &result.reasoning {
        println!("reasoning_content: {reasoning}");
    }
    println!("content: {}", result.text);
    if let Some(usage) = result.usage {
        tracing::info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "usage"
        );
    }
}

/// Print chunks as they arrive until the stream ends or Ctrl-C.
///
/// Ctrl-C drops the stream, which closes the connection to the server.
async fn print_stream<S>(stream: S) -> anyhow::Result<()>
where
    S: Stream<Item = Result<CompletionChunk, InferenceError>>,
{
    futures::pin_mut!(stream);
    let mut printer = ChannelPrinter::default();
    let stdout = std::io::stdout();

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted, cancelling stream");
                break;
            }
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.context("stream failed")?;
        printer.print(&chunk, &mut stdout.lock())?;
    }

    println!();
    Ok(())
}

/// Writes chunks with a header the first time each channel appears.
#[derive(Debug, Default)]
struct ChannelPrinter {
    printed_reasoning: bool,
    printed_content: bool,
}

impl ChannelPrinter {
    fn print(&mut self, chunk: &CompletionChunk, out: &mut impl Write) -> std::io::Result<()> {
        match chunk {
            CompletionChunk::Reasoning(text) => {
                if !self.printed_reasoning {
                    self.printed_reasoning = true;
                    write!(out, "reasoning_content:")?;
                }
                write!(out, "{text}")?;
            }
            CompletionChunk::Content(text) => {
                if !self.printed_content {
                    self.printed_content = true;
                    write!(out, "\ncontent:")?;
                }
                write!(out, "{text}")?;
            }
            CompletionChunk::Finish(reason) => {
                tracing::debug!(finish_reason = %reason, "stream finished");
            }
        }
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(chunks: &[CompletionChunk]) -> String {
        let mut printer = ChannelPrinter::default();
        let mut out = Vec::new();
        for chunk in chunks {
            printer.print(chunk, &mut out).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_channel_headers_printed_once() {
        let out = render(&[
            CompletionChunk::Reasoning("think ".into()),
            CompletionChunk::Reasoning("more".into()),
            CompletionChunk::Content("Hello".into()),
            CompletionChunk::Content(" there".into()),
            CompletionChunk::Finish("stop".into()),
        ]);
        assert_eq!(out, "reasoning_content:think more\ncontent:Hello there");
    }

    #[test]
    fn test_content_only_stream() {
        let out = render(&[CompletionChunk::Content("hi".into())]);
        assert_eq!(out, "\ncontent:hi");
    }

    #[test]
    fn test_cli_parses_chat() {
        let cli = Cli::try_parse_from([
            "vllm-client",
            "--model",
            "Qwen/Qwen3-8B",
            "chat",
            "Give me a short introduction to large language models.",
            "--thinking",
        ])
        .unwrap();
        assert_eq!(cli.model, "Qwen/Qwen3-8B");
        assert!(matches!(cli.command, Command::Chat { thinking: true, no_stream: false, .. }));
    }

    #[test]
    fn test_resolve_config_overrides() {
        let cli = Cli::try_parse_from([
            "vllm-client",
            "--base-url",
            "http://gpu-box:8000",
            "--api-key",
            "token-abc123",
            "ping",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.api_base(), "http://gpu-box:8000/v1");
        assert_eq!(config.api_key.as_deref(), Some("token-abc123"));
    }
}
