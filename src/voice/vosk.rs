//! Offline recognition with Vosk (Kaldi)

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use vosk::{DecodingState, LogLevel, Model, Recognizer};

use super::capture::AudioFrame;
use super::recognizer::{RecognitionSession, SpeechRecognizer, UtteranceResult};
use crate::{Error, Result};

/// Shared Vosk model; each session gets its own `Recognizer`
pub struct VoskRecognizer {
    model: Arc<Model>,
    sample_rate: u32,
}

impl VoskRecognizer {
    /// Load a model directory
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be loaded
    pub fn load(model_path: &Path, sample_rate: u32) -> Result<Self> {
        vosk::set_log_level(LogLevel::Error);

        let model = Model::new(model_path.to_string_lossy()).ok_or_else(|| {
            Error::Config(format!(
                "failed to load Vosk model from {}",
                model_path.display()
            ))
        })?;

        tracing::info!(path = %model_path.display(), sample_rate, "vosk model loaded");

        Ok(Self {
            model: Arc::new(model),
            sample_rate,
        })
    }
}

impl SpeechRecognizer for VoskRecognizer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[allow(clippy::cast_precision_loss)]
    fn begin_session(&self) -> Result<Box<dyn RecognitionSession>> {
        let recognizer = Recognizer::new(&self.model, self.sample_rate as f32)
            .ok_or_else(|| Error::Recognition("failed to create Vosk recognizer".to_string()))?;

        Ok(Box::new(VoskSession {
            recognizer: Some(recognizer),
        }))
    }
}

struct VoskSession {
    recognizer: Option<Recognizer>,
}

#[async_trait]
impl RecognitionSession for VoskSession {
    async fn feed(&mut self, frame: &AudioFrame) -> Result<Option<UtteranceResult>> {
        let recognizer = self
            .recognizer
            .as_mut()
            .ok_or_else(|| Error::Recognition("session already ended".to_string()))?;

        match recognizer.accept_waveform(frame.samples()) {
            Ok(DecodingState::Finalized) => {
                let text = recognizer
                    .result()
                    .single()
                    .map(|r| r.text.to_string())
                    .unwrap_or_default();
                Ok(Some(UtteranceResult::new(text)))
            }
            Ok(_) => Ok(None),
            Err(e) => Err(Error::Recognition(format!("{e:?}"))),
        }
    }

    fn end(&mut self) {
        self.recognizer = None;
    }
}
