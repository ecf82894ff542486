//! Wake word detection
//!
//! Checks finalized utterances for the configured wake phrase. The match is
//! a plain case-insensitive substring test, so "apollo" also fires inside
//! "apollonian"; tighten [`WakeWordGate::matches`] if that proves noisy.

use super::recognizer::UtteranceResult;
use crate::{Error, Result};

/// Gate between idle listening and command capture
#[derive(Debug, Clone)]
pub struct WakeWordGate {
    phrase: String,
}

impl WakeWordGate {
    /// Create a gate for a wake phrase
    ///
    /// # Errors
    ///
    /// Returns error if the phrase is blank
    pub fn new(phrase: &str) -> Result<Self> {
        let phrase = phrase.trim().to_lowercase();
        if phrase.is_empty() {
            return Err(Error::Config("wake phrase must not be empty".to_string()));
        }

        tracing::debug!(wake_phrase = %phrase, "wake word gate initialized");
        Ok(Self { phrase })
    }

    /// Check if an utterance contains the wake phrase
    #[must_use]
    pub fn matches(&self, result: &UtteranceResult) -> bool {
        if !result.has_speech() {
            return false;
        }

        let normalized = result.text().to_lowercase();
        let matched = normalized.trim().contains(&self.phrase);
        if matched {
            tracing::info!(wake_phrase = %self.phrase, transcript = result.text(), "wake word detected");
        }
        matched
    }

    /// The normalized wake phrase
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }
}
