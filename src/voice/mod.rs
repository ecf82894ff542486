//! Voice processing module
//!
//! Handles audio capture, streaming recognition, wake word gating,
//! speech synthesis and playback.

mod capture;
mod endpoint;
mod recognizer;
mod speaker;
mod stt;
mod tts;
#[cfg(feature = "vosk")]
mod vosk;
mod wake_word;

pub use capture::{
    AudioFrame, AudioInput, AudioSource, DEFAULT_FRAME_SIZE, DeviceLease, DeviceLock,
    FrameAssembler, MicrophoneSource, SAMPLE_RATE, samples_to_wav,
};
pub use endpoint::{Endpoint, EndpointConfig, EndpointState, Endpointer};
pub use recognizer::{
    EndpointingRecognizer, RecognitionSession, SpeechRecognizer, UtteranceResult,
};
pub use speaker::{PlaybackPipe, PlaybackReport, PlayerCommand, Speaker, StreamingSpeaker};
pub use stt::{DEFAULT_STT_MODEL, Transcriber, WhisperTranscriber};
pub use tts::{
    ElevenLabsSpeech, OpenAiSpeech, SpeechSynthesizer, SynthesisChunk, SynthesisStream,
    create_synthesizer, elevenlabs_stream_url,
};
#[cfg(feature = "vosk")]
pub use vosk::VoskRecognizer;
pub use wake_word::WakeWordGate;

use std::sync::Arc;

use crate::config::{RecognizerBackend, RecognizerConfig};
use crate::Result;

/// Build the configured recognizer
///
/// # Errors
///
/// Returns error if the backend's credentials or model are missing, or the
/// backend was not compiled in
pub fn create_recognizer(
    config: &RecognizerConfig,
    sample_rate: u32,
) -> Result<Arc<dyn SpeechRecognizer>> {
    match config.backend {
        RecognizerBackend::Whisper => {
            let transcriber = WhisperTranscriber::new(
                config.base_url.clone(),
                config.api_key.clone().unwrap_or_default(),
                config.model.clone(),
            )?;
            Ok(Arc::new(EndpointingRecognizer::new(
                Arc::new(transcriber),
                sample_rate,
            )))
        }
        #[cfg(feature = "vosk")]
        RecognizerBackend::Vosk => Ok(Arc::new(VoskRecognizer::load(
            &config.model_path,
            sample_rate,
        )?)),
        #[cfg(not(feature = "vosk"))]
        RecognizerBackend::Vosk => Err(crate::Error::Config(
            "vosk backend requested but apollo was built without the `vosk` feature".to_string(),
        )),
    }
}
