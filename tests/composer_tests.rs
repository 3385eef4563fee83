//! Message composer tests

use chatrelay::config::Settings;
use chatrelay::models::chat::{ChatMessageRequest, GenerationOverrides, HistoryWindow, RawTurn, Role};
use chatrelay::services::MessageComposer;
use serde_json::json;

fn composer() -> MessageComposer {
    MessageComposer::from_settings(&Settings::default())
}

fn conversation(n: usize) -> Vec<RawTurn> {
    (1..=n)
        .map(|i| RawTurn::new(if i % 2 == 1 { "user" } else { "model" }, &format!("turn {}", i)))
        .collect()
}

#[test]
fn test_both_field_conventions_are_accepted() {
    let body: ChatMessageRequest = serde_json::from_value(json!({
        "messages": [
            { "role": "user", "content": "Hi there" },
            { "author": "assistant", "text": "Hello! How are you?" },
            { "role": "user" }
        ]
    }))
    .unwrap();

    let request = composer().compose(&body.messages, HistoryWindow::Full, None);
    assert_eq!(request.turns.len(), 3);
    assert_eq!(request.turns[0].role, Role::User);
    assert_eq!(request.turns[1].role, Role::Model);
    assert_eq!(request.turns[1].content, "Hello! How are you?");
    assert_eq!(request.turns[2].content, "");
}

#[test]
fn test_buffered_and_stream_windows() {
    let settings = Settings::default();
    let raw = conversation(9);

    let buffered = composer().compose(&raw, settings.chat.buffered_history, None);
    assert_eq!(buffered.turns.len(), 4);
    assert_eq!(buffered.turns[0].content, "turn 6");
    assert_eq!(buffered.turns[3].content, "turn 9");

    let streamed = composer().compose(&raw, settings.chat.stream_history, None);
    assert_eq!(streamed.turns.len(), 9);
    assert_eq!(streamed.turns[0].content, "turn 1");
}

#[test]
fn test_window_shorter_than_history_keeps_everything() {
    let raw = conversation(2);
    let request = composer().compose(&raw, HistoryWindow::Last(4), None);
    assert_eq!(request.turns.len(), 2);
}

#[test]
fn test_wire_body_shape() {
    let overrides: GenerationOverrides = serde_json::from_value(json!({ "temperature": 0.9 })).unwrap();
    let request = composer().compose(&conversation(1), HistoryWindow::Full, Some(&overrides));

    let wire = serde_json::to_value(request.to_wire()).unwrap();
    let contents = wire["contents"].as_array().unwrap();

    // persona pair first, then the conversation
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[0]["role"], "user");
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[2]["parts"][0]["text"], "turn 1");

    let config = &wire["generationConfig"];
    assert!((config["temperature"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    assert_eq!(config["topK"], 30);
    assert_eq!(config["maxOutputTokens"], 500);

    let safety = wire["safetySettings"].as_array().unwrap();
    assert_eq!(safety.len(), 4);
    assert!(safety.iter().all(|s| s["threshold"] == "BLOCK_MEDIUM_AND_ABOVE"));
}

#[test]
fn test_path_profiles_layer_under_caller_overrides() {
    let settings = Settings::default();
    let caller = GenerationOverrides {
        top_p: Some(0.5),
        ..Default::default()
    };

    let stream = settings.chat.stream_profile().overlay(Some(&caller));
    let request = composer().compose(&conversation(1), HistoryWindow::Full, Some(&stream));
    assert_eq!(request.options.max_output_tokens, 400);
    assert_eq!(request.options.top_p, 0.5);
    assert_eq!(request.options.top_k, 30);

    let fallback = settings.chat.fallback_profile().overlay(None);
    let request = composer().compose(&conversation(1), HistoryWindow::Full, Some(&fallback));
    assert_eq!(request.options.max_output_tokens, 350);
}

#[test]
fn test_compose_is_pure() {
    let raw = conversation(5);
    let first = composer().compose(&raw, HistoryWindow::Last(4), None);
    let second = composer().compose(&raw, HistoryWindow::Last(4), None);
    assert_eq!(first, second);
    assert_eq!(raw.len(), 5);
}
