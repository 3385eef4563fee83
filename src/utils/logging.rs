//! Logging utilities
//!
//! Helpers that keep prompt and response text out of the logs except as short previews

use crate::models::chat::ProviderRequest;

/// Set to true to include full turn contents in debug logs
/// Default is false to reduce log verbosity
pub const VERBOSE_REQUEST_LOGGING: bool = false;

/// Truncate a string with a note about original length
pub fn truncate_content(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    if total > max_chars {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}... ({} chars truncated)", head, total - max_chars)
    } else {
        s.to_string()
    }
}

/// Create a filtered summary of a provider request for logging
pub fn create_provider_request_log_summary(request: &ProviderRequest) -> serde_json::Value {
    let turns: Vec<serde_json::Value> = request
        .turns
        .iter()
        .map(|turn| {
            let content = if VERBOSE_REQUEST_LOGGING {
                turn.content.clone()
            } else {
                truncate_content(&turn.content, 80)
            };
            serde_json::json!({ "role": turn.role.as_str(), "content": content })
        })
        .collect();

    serde_json::json!({
        "preamble_turns": request.preamble.len(),
        "turns": turns,
        "generation_config": request.options,
        "safety_settings": request.safety_settings.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{GenerationOptions, Turn};

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short", 10), "short");
        assert_eq!(truncate_content("abcdef", 3), "abc... (3 chars truncated)");
        // multi-byte characters are counted, not split
        assert_eq!(truncate_content("안녕하세요", 2), "안녕... (3 chars truncated)");
    }

    #[test]
    fn test_request_summary() {
        let request = ProviderRequest {
            preamble: vec![Turn::user("persona")],
            turns: vec![Turn::user("x".repeat(200))],
            options: GenerationOptions::default(),
            safety_settings: vec![],
        };
        let summary = create_provider_request_log_summary(&request);
        assert_eq!(summary["preamble_turns"], 1);
        let content = summary["turns"][0]["content"].as_str().unwrap();
        assert!(content.contains("chars truncated"));
    }
}
