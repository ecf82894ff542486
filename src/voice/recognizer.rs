//! Streaming speech recognition sessions
//!
//! A session owns all recognizer state for one listening phase. Nothing
//! carries over between sessions, so a wake phrase heard in one phase can
//! never resurface as the text of the next.

use std::sync::Arc;

use async_trait::async_trait;

use super::capture::{AudioFrame, samples_to_wav};
use super::endpoint::{Endpoint, EndpointConfig, Endpointer};
use super::stt::Transcriber;
use crate::{Error, Result};

/// A finalized utterance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtteranceResult {
    text: String,
    has_speech: bool,
}

impl UtteranceResult {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let has_speech = !text.trim().is_empty();
        Self { text, has_speech }
    }

    /// An utterance in which nothing was recognized
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Raw recognizer text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True when the text holds more than whitespace
    #[must_use]
    pub const fn has_speech(&self) -> bool {
        self.has_speech
    }
}

/// Factory for recognition sessions bound to one sample rate
pub trait SpeechRecognizer: Send + Sync {
    /// Sample rate the recognizer expects
    fn sample_rate(&self) -> u32;

    /// Create a session with fresh state
    ///
    /// # Errors
    ///
    /// Returns error if the underlying engine cannot allocate a recognizer
    fn begin_session(&self) -> Result<Box<dyn RecognitionSession>>;
}

/// One listening phase worth of recognizer state
#[async_trait]
pub trait RecognitionSession: Send {
    /// Push a frame; returns `Some` when the engine finalizes an utterance
    ///
    /// # Errors
    ///
    /// Returns error if recognition fails or the session has ended
    async fn feed(&mut self, frame: &AudioFrame) -> Result<Option<UtteranceResult>>;

    /// Discard all state. Idempotent.
    fn end(&mut self);
}

/// Energy endpointing in front of a batch transcriber
pub struct EndpointingRecognizer {
    transcriber: Arc<dyn Transcriber>,
    config: EndpointConfig,
    sample_rate: u32,
}

impl EndpointingRecognizer {
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, sample_rate: u32) -> Self {
        Self::with_config(
            transcriber,
            sample_rate,
            EndpointConfig::for_sample_rate(sample_rate),
        )
    }

    #[must_use]
    pub fn with_config(
        transcriber: Arc<dyn Transcriber>,
        sample_rate: u32,
        config: EndpointConfig,
    ) -> Self {
        Self {
            transcriber,
            config,
            sample_rate,
        }
    }
}

impl SpeechRecognizer for EndpointingRecognizer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn begin_session(&self) -> Result<Box<dyn RecognitionSession>> {
        Ok(Box::new(EndpointingSession {
            endpointer: Endpointer::new(self.config),
            transcriber: Arc::clone(&self.transcriber),
            sample_rate: self.sample_rate,
            ended: false,
        }))
    }
}

struct EndpointingSession {
    endpointer: Endpointer,
    transcriber: Arc<dyn Transcriber>,
    sample_rate: u32,
    ended: bool,
}

#[async_trait]
impl RecognitionSession for EndpointingSession {
    async fn feed(&mut self, frame: &AudioFrame) -> Result<Option<UtteranceResult>> {
        if self.ended {
            return Err(Error::Recognition("session already ended".to_string()));
        }

        match self.endpointer.push(frame) {
            None => Ok(None),
            Some(Endpoint::NoSpeech) => Ok(Some(UtteranceResult::empty())),
            Some(Endpoint::Utterance(samples)) => {
                let wav = samples_to_wav(&samples, self.sample_rate)?;
                let text = self.transcriber.transcribe(wav).await?;
                Ok(Some(UtteranceResult::new(text)))
            }
        }
    }

    fn end(&mut self) {
        self.endpointer.reset();
        self.ended = true;
    }
}
