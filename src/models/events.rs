//! Outward relay events
//!
//! Each event is written as one `data: <json>` line followed by a blank line

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayEvent {
    Start,
    Chunk {
        content: String,
    },
    Done {
        remaining_chat_coupons: u32,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl RelayEvent {
    pub fn chunk(content: impl Into<String>) -> Self {
        RelayEvent::Chunk { content: content.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::Done { .. } | RelayEvent::Error { .. })
    }
}
