//! Message composer
//!
//! Turns raw client turns into a provider-ready request: normalizes roles,
//! applies the history window, prepends the tutoring preamble and resolves
//! generation options

use crate::config::Settings;
use crate::models::chat::{
    GenerationOptions, GenerationOverrides, HistoryWindow, ProviderRequest, RawTurn, Turn,
};
use crate::models::gemini::SafetySetting;
use once_cell::sync::Lazy;

/// Fixed persona sent before every conversation
static TUTOR_PREAMBLE: Lazy<Vec<Turn>> = Lazy::new(|| {
    vec![
        Turn::user(
            "You are a friendly and patient conversation tutor. Reply in short, natural \
             sentences, gently correct mistakes in the learner's last message, and end \
             with a question that keeps the conversation going.",
        ),
        Turn::model("Understood. I'll keep my replies short, correct mistakes kindly, and keep the conversation going."),
    ]
});

/// Builds provider requests; holds only immutable configuration
#[derive(Debug, Clone)]
pub struct MessageComposer {
    defaults: GenerationOptions,
    safety_settings: Vec<SafetySetting>,
    preamble: Vec<Turn>,
}

impl MessageComposer {
    pub fn new(defaults: GenerationOptions, safety_threshold: &str) -> Self {
        Self {
            defaults,
            safety_settings: SafetySetting::uniform(safety_threshold),
            preamble: TUTOR_PREAMBLE.clone(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.chat.generation, &settings.chat.safety_threshold)
    }

    /// Compose a request from raw turns
    ///
    /// The window is applied before normalization so that conversation order
    /// is kept; options start from the defaults and take only keys present in
    /// `overrides`.
    pub fn compose(
        &self,
        raw_turns: &[RawTurn],
        window: HistoryWindow,
        overrides: Option<&GenerationOverrides>,
    ) -> ProviderRequest {
        let turns = window.apply(raw_turns).iter().map(RawTurn::normalize).collect();

        let options = match overrides {
            Some(overrides) => self.defaults.merged(overrides),
            None => self.defaults,
        };

        ProviderRequest {
            preamble: self.preamble.clone(),
            turns,
            options,
            safety_settings: self.safety_settings.clone(),
        }
    }
}
