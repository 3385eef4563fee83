//! Application configuration settings
//!
//! Defines all configuration structures and loading logic

use crate::models::chat::{GenerationOptions, GenerationOverrides, HistoryWindow};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Server configuration
    pub server: ServerConfig,
    /// Gemini API configuration
    pub gemini: GeminiConfig,
    /// Upstream retry policy
    pub retry: RetryConfig,
    /// Chat behaviour
    pub chat: ChatConfig,
    /// Credit consumption
    pub entitlement: EntitlementConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Seed file for the in-memory account stores
    #[serde(default)]
    pub accounts_file: Option<PathBuf>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Gemini API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key
    pub api_key: String,
    /// API base URL
    pub base_url: String,
    /// Primary model
    pub model: String,
    /// Lighter model tried once the primary model's attempts are exhausted
    pub fallback_model: Option<String>,
    /// Per-read timeout in seconds
    pub read_timeout: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            fallback_model: Some("gemini-2.5-flash-lite".to_string()),
            read_timeout: 30,
        }
    }
}

impl GeminiConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per model
    pub max_attempts: u32,
    /// Base delay time (milliseconds)
    pub base_delay_ms: u64,
    /// Upper bound of the random jitter added to each delay (milliseconds)
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 800,
            jitter_ms: 200,
        }
    }
}

/// Chat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Membership feature that grants chat access
    pub feature: String,
    /// History forwarded on the buffered path
    pub buffered_history: HistoryWindow,
    /// History forwarded on the streaming path
    pub stream_history: HistoryWindow,
    /// Slice size used when replaying a buffered fallback as chunks
    pub fallback_slice_chars: usize,
    /// Process-wide generation defaults
    pub generation: GenerationOptions,
    /// maxOutputTokens used by the streaming path
    pub stream_max_output_tokens: u32,
    /// maxOutputTokens used by the buffered fallback of the streaming path
    pub fallback_max_output_tokens: u32,
    /// Threshold applied to every harm category
    pub safety_threshold: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            feature: "chat".to_string(),
            buffered_history: HistoryWindow::Last(4),
            stream_history: HistoryWindow::Full,
            fallback_slice_chars: 30,
            generation: GenerationOptions::default(),
            stream_max_output_tokens: 400,
            fallback_max_output_tokens: 350,
            safety_threshold: "BLOCK_MEDIUM_AND_ABOVE".to_string(),
        }
    }
}

impl ChatConfig {
    /// Overrides applied to the streaming call
    pub fn stream_profile(&self) -> GenerationOverrides {
        GenerationOverrides {
            temperature: Some(self.generation.temperature),
            max_output_tokens: Some(self.stream_max_output_tokens),
            ..Default::default()
        }
    }

    /// Overrides applied to the buffered fallback of the streaming path
    pub fn fallback_profile(&self) -> GenerationOverrides {
        GenerationOverrides {
            temperature: Some(self.generation.temperature),
            max_output_tokens: Some(self.fallback_max_output_tokens),
            ..Default::default()
        }
    }
}

/// Credit consumption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementConfig {
    /// Lifetime of an idempotency record in seconds
    pub dedup_ttl_secs: u64,
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self { dedup_ttl_secs: 300 }
    }
}

impl EntitlementConfig {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Allowed origins for CORS
    pub allowed_origins: Vec<String>,
    /// Whether CORS is enabled
    pub cors_enabled: bool,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            cors_enabled: true,
            max_request_size: 1024 * 1024,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (text/json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Settings {
    /// Create a new configuration instance
    pub fn new() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let defaults = ChatConfig::default();
        let generation = GenerationOptions {
            temperature: parse_env("GEN_TEMPERATURE", defaults.generation.temperature)?,
            top_k: parse_env("GEN_TOP_K", defaults.generation.top_k)?,
            top_p: parse_env("GEN_TOP_P", defaults.generation.top_p)?,
            max_output_tokens: parse_env("GEN_MAX_OUTPUT_TOKENS", defaults.generation.max_output_tokens)?,
        };

        let fallback_model = get_env_or_default("GEMINI_FALLBACK_MODEL", "gemini-2.5-flash-lite");

        let settings = Self {
            server: ServerConfig {
                host: get_env_or_default("SERVER_HOST", "0.0.0.0"),
                port: get_env_or_default("SERVER_PORT", "8080")
                    .parse()
                    .context("Invalid port number")?,
            },
            gemini: GeminiConfig {
                api_key: std::env::var("GEMINI_API_KEY")
                    .context("GEMINI_API_KEY environment variable not set")?,
                base_url: get_env_or_default("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com/v1beta"),
                model: get_env_or_default("GEMINI_MODEL", "gemini-2.5-flash").trim().to_string(),
                fallback_model: Some(fallback_model.trim().to_string()).filter(|m| !m.is_empty()),
                read_timeout: get_env_or_default("UPSTREAM_READ_TIMEOUT", "30")
                    .parse()
                    .context("Invalid upstream read timeout")?,
            },
            retry: RetryConfig {
                max_attempts: parse_env("RETRY_MAX_ATTEMPTS", 3)?,
                base_delay_ms: parse_env("RETRY_BASE_DELAY_MS", 800)?,
                jitter_ms: parse_env("RETRY_JITTER_MS", 200)?,
            },
            chat: ChatConfig {
                feature: get_env_or_default("CHAT_FEATURE", &defaults.feature),
                buffered_history: get_env_or_default("BUFFERED_HISTORY_TURNS", "4")
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("Invalid BUFFERED_HISTORY_TURNS")?,
                stream_history: get_env_or_default("STREAM_HISTORY_TURNS", "all")
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("Invalid STREAM_HISTORY_TURNS")?,
                fallback_slice_chars: parse_env("FALLBACK_SLICE_CHARS", defaults.fallback_slice_chars)?,
                generation,
                stream_max_output_tokens: parse_env("STREAM_MAX_OUTPUT_TOKENS", defaults.stream_max_output_tokens)?,
                fallback_max_output_tokens: parse_env("FALLBACK_MAX_OUTPUT_TOKENS", defaults.fallback_max_output_tokens)?,
                safety_threshold: get_env_or_default("SAFETY_THRESHOLD", &defaults.safety_threshold),
            },
            entitlement: EntitlementConfig {
                dedup_ttl_secs: parse_env("IDEMPOTENCY_TTL_SECS", 300)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env_or_default("ALLOWED_ORIGINS", "*")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                cors_enabled: get_env_or_default("CORS_ENABLED", "true")
                    .parse()
                    .context("Invalid CORS enabled flag")?,
                max_request_size: get_env_or_default("MAX_REQUEST_SIZE", "1048576")
                    .parse()
                    .context("Invalid max request size")?,
            },
            logging: LoggingConfig {
                level: get_env_or_default("RUST_LOG", "info"),
                format: get_env_or_default("LOG_FORMAT", "text"),
            },
            accounts_file: std::env::var("ACCOUNTS_FILE")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };

        // Validate configuration
        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration validity
    pub fn validate(&self) -> Result<()> {
        // Validate port range
        if self.server.port == 0 {
            anyhow::bail!("Port number cannot be 0");
        }

        if self.gemini.api_key.is_empty() {
            anyhow::bail!("Gemini API key cannot be empty");
        }

        if self.gemini.api_key.contains(char::is_whitespace) {
            anyhow::bail!("Gemini API key cannot contain whitespace characters");
        }

        // Validate URL format
        if !self.gemini.base_url.starts_with("http") {
            anyhow::bail!("Invalid Gemini base URL format, should start with 'http'");
        }

        if self.gemini.model.is_empty() {
            anyhow::bail!("Gemini model cannot be empty");
        }

        if self.gemini.read_timeout == 0 {
            anyhow::bail!("Timeout values cannot be 0");
        }

        if self.security.max_request_size == 0 {
            anyhow::bail!("Max request size cannot be 0");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("Retry attempts cannot be 0");
        }

        if self.chat.fallback_slice_chars == 0 {
            anyhow::bail!("Fallback slice size cannot be 0");
        }

        for window in [self.chat.buffered_history, self.chat.stream_history] {
            if window == HistoryWindow::Last(0) {
                anyhow::bail!("History window cannot be 0 turns");
            }
        }

        let generation = &self.chat.generation;
        if !(0.0..=2.0).contains(&generation.temperature) {
            anyhow::bail!("temperature must be between 0.0 and 2.0");
        }
        if !(0.0..=1.0).contains(&generation.top_p) {
            anyhow::bail!("top_p must be between 0.0 and 1.0");
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        // Validate log format
        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        Ok(())
    }

    /// Fallback model, if it differs from the primary one
    pub fn effective_fallback_model(&self) -> Option<&str> {
        self.gemini
            .fallback_model
            .as_deref()
            .filter(|fallback| *fallback != self.gemini.model)
    }
}

/// Get environment variable or default value
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse environment variable, falling back to a typed default when unset
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> Settings {
        let mut settings = Settings::default();
        settings.gemini.api_key = "test-gemini-key".to_string();
        settings
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = valid_settings();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.chat.buffered_history, HistoryWindow::Last(4));
        assert_eq!(settings.chat.stream_history, HistoryWindow::Full);
        assert_eq!(settings.entitlement.dedup_ttl(), Duration::from_secs(300));
        assert_eq!(settings.gemini.read_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validation_failures() {
        let mut settings = valid_settings();
        settings.gemini.api_key = "has space".to_string();
        assert!(settings.validate().is_err());

        let mut settings = valid_settings();
        settings.retry.max_attempts = 0;
        assert!(settings.validate().is_err());

        let mut settings = valid_settings();
        settings.chat.buffered_history = HistoryWindow::Last(0);
        assert!(settings.validate().is_err());

        let mut settings = valid_settings();
        settings.chat.generation.top_p = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_effective_fallback_model() {
        let mut settings = valid_settings();
        assert_eq!(settings.effective_fallback_model(), Some("gemini-2.5-flash-lite"));

        settings.gemini.model = "gemini-2.5-flash-lite".to_string();
        assert_eq!(settings.effective_fallback_model(), None);

        settings.gemini.fallback_model = None;
        assert_eq!(settings.effective_fallback_model(), None);
    }

    #[test]
    fn test_path_profiles() {
        let chat = ChatConfig::default();
        assert_eq!(chat.stream_profile().max_output_tokens, Some(400));
        assert_eq!(chat.fallback_profile().max_output_tokens, Some(350));
        assert_eq!(chat.stream_profile().top_k, None);
    }
}
