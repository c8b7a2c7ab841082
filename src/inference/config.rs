//! Client configuration loading and validation.
//!
//! A `ClientConfig` is built once (from YAML, from the environment, or by
//! hand) and reused for every request. YAML values may reference environment
//! variables as `${VAR}` or `${VAR:-default}`.

use std::path::Path;

use serde::Deserialize;

use super::errors::InferenceError;

// ─── Defaults ────────────────────────────────────────────────────────────────

/// vLLM's default OpenAI-compatible API base.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/v1";

/// Whole-request timeout, and the streaming inactivity timeout between frames.
///
/// Reasoning models can think for a long time before the first content token,
/// so this is generous.
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// TCP connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

// ─── ClientConfig ────────────────────────────────────────────────────────────

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// API base, e.g. `http://localhost:8000/v1`. A missing `/v1` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as `Authorization: Bearer …` when set.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Config pointing at `base_url` with default timeouts and no key.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Build from `VLLM_BASE_URL` / `OPENAI_BASE_URL`, `VLLM_API_KEY` /
    /// `OPENAI_API_KEY`, and `VLLM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, InferenceError> {
        let mut config = Self::default();

        if let Some(url) = first_env(&["VLLM_BASE_URL", "OPENAI_BASE_URL"]) {
            config.base_url = url;
        }
        config.api_key = first_env(&["VLLM_API_KEY", "OPENAI_API_KEY"]);

        if let Some(raw) = first_env(&["VLLM_TIMEOUT_SECS"]) {
            config.timeout_secs = raw.trim().parse().map_err(|e| InferenceError::ConfigError {
                reason: format!("VLLM_TIMEOUT_SECS={raw:?} is not a number: {e}"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configs that cannot produce a working client.
    pub fn validate(&self) -> Result<(), InferenceError> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "base_url is empty".into(),
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(InferenceError::ConfigError {
                reason: format!("base_url '{url}' must start with http:// or https://"),
            });
        }
        if self.timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(InferenceError::ConfigError {
                reason: "timeouts must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// The API base with exactly one trailing `/v1` and no trailing slash.
    pub fn api_base(&self) -> String {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        if trimmed.ends_with("/v1") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/v1")
        }
    }

    /// The server root (API base without `/v1`), where `/ping` lives.
    pub fn server_root(&self) -> String {
        let base = self.api_base();
        base.strip_suffix("/v1").unwrap_or(&base).to_string()
    }

    /// Full URL for an API path such as `chat/completions`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base(), path.trim_start_matches('/'))
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load and validate a client configuration file.
///
/// Performs environment-variable interpolation on the raw text before parsing.
pub fn load_client_config(path: &Path) -> Result<ClientConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let interpolated = interpolate_env_vars(&raw);

    let config: ClientConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?;

    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset variables without a default become "".
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_api_base_appends_v1() {
        let config = ClientConfig::new("http://localhost:8000");
        assert_eq!(config.api_base(), "http://localhost:8000/v1");
        let config = ClientConfig::new("http://localhost:8000/");
        assert_eq!(config.api_base(), "http://localhost:8000/v1");
    }

    #[test]
    fn test_api_base_keeps_existing_v1() {
        let config = ClientConfig::new("http://10.0.0.2:8000/v1/");
        assert_eq!(config.api_base(), "http://10.0.0.2:8000/v1");
        assert_eq!(config.server_root(), "http://10.0.0.2:8000");
    }

    #[test]
    fn test_endpoint_joins_path() {
        let config = ClientConfig::default();
        assert_eq!(
            config.endpoint("/chat/completions"),
            "http://localhost:8000/v1/chat/completions"
        );
        assert_eq!(
            config.endpoint("audio/transcriptions"),
            "http://localhost:8000/v1/audio/transcriptions"
        );
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let err = ClientConfig::new("localhost:8000").validate().unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ClientConfig::default().with_timeout_secs(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__TEST_VLLM_NONEXISTENT__");
        let result = interpolate_env_vars("${__TEST_VLLM_NONEXISTENT__:-http://fallback:8000}");
        assert_eq!(result, "http://fallback:8000");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__TEST_VLLM_KEY__", "token-abc123");
        let result = interpolate_env_vars("api_key: ${__TEST_VLLM_KEY__}");
        assert_eq!(result, "api_key: token-abc123");
        std::env::remove_var("__TEST_VLLM_KEY__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with no variables";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/models");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/models"));
    }

    #[test]
    fn test_load_client_config_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url: \"http://gpu-box:8000/v1\"").unwrap();

        let config = load_client_config(file.path()).unwrap();
        assert_eq!(config.base_url, "http://gpu-box:8000/v1");
        assert!(config.api_key.is_none());
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.connect_timeout_secs, DEFAULT_CONNECT_TIMEOUT_SECS);
    }

    #[test]
    fn test_load_client_config_interpolates() {
        std::env::set_var("__TEST_VLLM_CFG_KEY__", "secret");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url: http://localhost:9000").unwrap();
        writeln!(file, "api_key: ${{__TEST_VLLM_CFG_KEY__}}").unwrap();
        writeln!(file, "timeout_secs: 30").unwrap();

        let config = load_client_config(file.path()).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.timeout_secs, 30);
        std::env::remove_var("__TEST_VLLM_CFG_KEY__");
    }

    #[test]
    fn test_load_client_config_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = load_client_config(&dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(InferenceError::ConfigError { .. })));
    }

    #[test]
    fn test_load_client_config_invalid_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_secs: [not, a, number]").unwrap();
        assert!(load_client_config(file.path()).is_err());
    }
}
