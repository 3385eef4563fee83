//! Conversation data models
//!
//! Turns as received from clients, the normalized turns sent upstream,
//! generation options and the JSON bodies of the chat endpoints

use super::gemini::{Content, GenerateContentRequest, GenerationConfig, Part, SafetySetting};
use super::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Lenient role normalization: "model"/"assistant" map to `Model`,
    /// anything else (including a missing role) maps to `User`
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("model") | Some("assistant") => Role::Model,
            _ => Role::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One normalized message of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self { role: Role::Model, content: content.into() }
    }
}

/// A turn exactly as the client sent it
///
/// Accepts both `{role, content}` and `{author, text}` field names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTurn {
    #[serde(default, alias = "author", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl RawTurn {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            content: Some(content.to_string()),
        }
    }

    /// Normalize into a [`Turn`]; missing content becomes empty text
    pub fn normalize(&self) -> Turn {
        Turn {
            role: Role::normalize(self.role.as_deref()),
            content: self.content.clone().unwrap_or_default(),
        }
    }
}

/// Fully resolved generation options sent upstream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            top_k: 30,
            top_p: 0.9,
            max_output_tokens: 500,
        }
    }
}

impl GenerationOptions {
    /// Shallow merge: only keys present in `overrides` replace the current values
    pub fn merged(&self, overrides: &GenerationOverrides) -> Self {
        Self {
            temperature: overrides.temperature.unwrap_or(self.temperature),
            top_k: overrides.top_k.unwrap_or(self.top_k),
            top_p: overrides.top_p.unwrap_or(self.top_p),
            max_output_tokens: overrides.max_output_tokens.unwrap_or(self.max_output_tokens),
        }
    }
}

/// Partial generation options supplied per call
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl GenerationOverrides {
    /// Layer `other` on top of `self`; keys set in `other` win
    pub fn overlay(&self, other: Option<&GenerationOverrides>) -> Self {
        let Some(other) = other else {
            return *self;
        };
        Self {
            temperature: other.temperature.or(self.temperature),
            top_k: other.top_k.or(self.top_k),
            top_p: other.top_p.or(self.top_p),
            max_output_tokens: other.max_output_tokens.or(self.max_output_tokens),
        }
    }
}

/// How much of the conversation history is forwarded upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryWindow {
    /// Only the last N turns
    Last(usize),
    /// The whole conversation
    Full,
}

impl HistoryWindow {
    /// Apply the window, keeping conversation order
    pub fn apply<'a, T>(&self, turns: &'a [T]) -> &'a [T] {
        match self {
            HistoryWindow::Full => turns,
            HistoryWindow::Last(n) => &turns[turns.len().saturating_sub(*n)..],
        }
    }
}

impl FromStr for HistoryWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") || s.eq_ignore_ascii_case("full") {
            return Ok(HistoryWindow::Full);
        }
        s.parse::<usize>()
            .map(HistoryWindow::Last)
            .map_err(|_| format!("invalid history window '{}', expected a turn count or 'all'", s))
    }
}

impl fmt::Display for HistoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryWindow::Full => write!(f, "all"),
            HistoryWindow::Last(n) => write!(f, "last {}", n),
        }
    }
}

/// Provider-ready request produced by the composer
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub preamble: Vec<Turn>,
    pub turns: Vec<Turn>,
    pub options: GenerationOptions,
    pub safety_settings: Vec<SafetySetting>,
}

impl ProviderRequest {
    /// Build the `generateContent` body; preamble first, then the windowed turns
    pub fn to_wire(&self) -> GenerateContentRequest {
        let contents = self
            .preamble
            .iter()
            .chain(self.turns.iter())
            .map(|turn| Content {
                role: turn.role.as_str().to_string(),
                parts: vec![Part { text: turn.content.clone() }],
            })
            .collect();

        GenerateContentRequest {
            contents,
            generation_config: GenerationConfig::from(self.options),
            safety_settings: self.safety_settings.clone(),
        }
    }
}

/// Body of `POST /api/v1/chat/start`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartChatRequest {
    #[serde(default, alias = "userId")]
    pub user_id: Option<UserId>,
    #[serde(default, alias = "idempotencyKey")]
    pub idempotency_key: Option<String>,
}

/// Response of `POST /api/v1/chat/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartChatResponse {
    pub message: String,
    pub remaining_chat_coupons: u32,
}

/// Body of the message endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessageRequest {
    #[serde(default, alias = "userId")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub messages: Vec<RawTurn>,
    #[serde(default, rename = "generationConfig", alias = "generation_config")]
    pub generation_config: Option<GenerationOverrides>,
}

/// Response of `POST /api/v1/chat/message`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageResponse {
    pub response: String,
    pub remaining_chat_coupons: u32,
}

/// Response of `GET /api/v1/chat/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub feature: String,
    pub remaining_chat_coupons: u32,
}
