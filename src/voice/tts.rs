//! Text-to-speech (TTS) processing
//!
//! Backends return a lazy, finite, non-restartable stream of chunks. Audio
//! chunks are encoded audio (MP3) in arrival order; metadata chunks carry
//! alignment information and are never played.

use std::collections::VecDeque;
use std::fmt::Display;

use async_trait::async_trait;
use base64::Engine;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Deserialize;

use crate::config::{TtsConfig, TtsProvider};
use crate::{Error, Result};

/// One item of a synthesis stream
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisChunk {
    /// Encoded audio bytes
    Audio(Vec<u8>),
    /// Non-audio side information (e.g. character alignment)
    Metadata(serde_json::Value),
}

/// Stream of synthesis chunks
pub type SynthesisStream = BoxStream<'static, Result<SynthesisChunk>>;

/// Streams synthesized speech for a piece of text
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesis
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the request
    async fn synthesize(&self, text: &str) -> Result<SynthesisStream>;
}

/// Build the configured synthesizer
///
/// # Errors
///
/// Returns error if the provider's API key is missing
pub fn create_synthesizer(config: &TtsConfig) -> Result<Box<dyn SpeechSynthesizer>> {
    let api_key = config.api_key.clone().unwrap_or_default();

    match config.provider {
        TtsProvider::OpenAi => Ok(Box::new(OpenAiSpeech::new(
            config.base_url.clone(),
            api_key,
            config.model.clone(),
            config.voice.clone(),
            config.speed,
        )?)),
        TtsProvider::ElevenLabs => Ok(Box::new(ElevenLabsSpeech::new(
            api_key,
            config.voice.clone(),
            config.model.clone(),
        )?)),
    }
}

/// OpenAI-compatible `/audio/speech`, streamed MP3 body
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    speed: f32,
}

impl OpenAiSpeech {
    /// Create a new `OpenAI` TTS backend
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        voice: String,
        speed: f32,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            voice,
            speed,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<SynthesisStream> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        tracing::debug!(voice = %self.voice, text_len = text.len(), "starting OpenAI TTS stream");

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| SynthesisChunk::Audio(bytes.to_vec()))
                    .map_err(|e| Error::Synthesis(format!("TTS stream error: {e}")))
            })
            .boxed())
    }
}

/// `ElevenLabs` streaming with character timestamps
pub struct ElevenLabsSpeech {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model: String,
}

impl ElevenLabsSpeech {
    /// Create a new `ElevenLabs` TTS backend
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, voice_id: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id,
            model,
        })
    }
}

/// Build the `ElevenLabs` timestamped streaming URL for a voice
#[must_use]
pub fn elevenlabs_stream_url(voice_id: &str) -> String {
    format!("https://api.elevenlabs.io/v1/text-to-speech/{voice_id}/stream/with-timestamps")
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSpeech {
    async fn synthesize(&self, text: &str) -> Result<SynthesisStream> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        tracing::debug!(voice = %self.voice_id, text_len = text.len(), "starting ElevenLabs TTS stream");

        let response = self
            .client
            .post(elevenlabs_stream_url(&self.voice_id))
            .query(&[("output_format", "mp3_44100_128")])
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "ElevenLabs TTS error {status}: {body}"
            )));
        }

        Ok(timestamped_chunks(response.bytes_stream()))
    }
}

/// One line of the timestamped stream
#[derive(Debug, Deserialize)]
struct TimestampedLine {
    #[serde(default)]
    audio_base64: Option<String>,
    #[serde(default)]
    alignment: Option<serde_json::Value>,
}

/// Reassembles newline-delimited records from arbitrary byte chunks
#[derive(Debug, Default)]
struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let rest = String::from_utf8_lossy(&rest).into_owned();
        (!rest.trim().is_empty()).then_some(rest)
    }
}

fn parse_line(line: &str) -> Vec<Result<SynthesisChunk>> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let record: TimestampedLine = match serde_json::from_str(line) {
        Ok(record) => record,
        Err(e) => {
            return vec![Err(Error::Synthesis(format!(
                "malformed TTS stream record: {e}"
            )))];
        }
    };

    let mut out = Vec::new();

    if let Some(encoded) = record.audio_base64.filter(|a| !a.is_empty()) {
        out.push(
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map(SynthesisChunk::Audio)
                .map_err(|e| Error::Synthesis(format!("invalid audio payload: {e}"))),
        );
    }

    if let Some(alignment) = record.alignment.filter(|a| !a.is_null()) {
        out.push(Ok(SynthesisChunk::Metadata(alignment)));
    }

    out
}

/// Decode a newline-delimited timestamped byte stream into chunks
fn timestamped_chunks<S, B, E>(bytes: S) -> SynthesisStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (
        bytes.boxed(),
        LineSplitter::default(),
        VecDeque::<Result<SynthesisChunk>>::new(),
        false,
    );

    futures::stream::unfold(state, |(mut bytes, mut lines, mut pending, mut done)| async move {
        loop {
            if let Some(item) = pending.pop_front() {
                return Some((item, (bytes, lines, pending, done)));
            }
            if done {
                return None;
            }

            match bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in lines.push(chunk.as_ref()) {
                        pending.extend(parse_line(&line));
                    }
                }
                Some(Err(e)) => {
                    pending.push_back(Err(Error::Synthesis(format!("TTS stream error: {e}"))));
                    done = true;
                }
                None => {
                    if let Some(line) = lines.finish() {
                        pending.extend(parse_line(&line));
                    }
                    done = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn test_line_splitter_handles_split_records() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"{\"a\":").is_empty());
        assert_eq!(splitter.push(b"1}\n{\"b\":2}\n{\"c\""), vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(splitter.finish(), Some("{\"c\"".to_string()));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_parse_line_audio_and_alignment() {
        let line = format!(
            r#"{{"audio_base64":"{}","alignment":{{"characters":["h","i"]}}}}"#,
            encode(b"mp3")
        );
        let chunks: Vec<_> = parse_line(&line).into_iter().map(|c| c.unwrap()).collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], SynthesisChunk::Audio(b"mp3".to_vec()));
        assert!(matches!(chunks[1], SynthesisChunk::Metadata(_)));
    }

    #[test]
    fn test_parse_line_skips_null_alignment_and_blank() {
        assert!(parse_line("   ").is_empty());
        let chunks = parse_line(r#"{"audio_base64":"","alignment":null}"#);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_parse_line_reports_garbage() {
        let chunks = parse_line("not json");
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], Err(Error::Synthesis(_))));
    }

    #[tokio::test]
    async fn test_timestamped_stream_preserves_order() {
        let body = format!(
            "{{\"audio_base64\":\"{}\"}}\n{{\"audio_base64\":\"{}\",\"alignment\":{{\"x\":1}}}}\n{{\"audio_base64\":\"{}\"}}",
            encode(b"A"),
            encode(b"B"),
            encode(b"C")
        );
        // Split mid-record to exercise reassembly
        let (head, tail) = body.split_at(17);
        let parts: Vec<std::result::Result<Vec<u8>, String>> =
            vec![Ok(head.as_bytes().to_vec()), Ok(tail.as_bytes().to_vec())];

        let chunks: Vec<_> = timestamped_chunks(futures::stream::iter(parts))
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(
            chunks,
            vec![
                SynthesisChunk::Audio(b"A".to_vec()),
                SynthesisChunk::Audio(b"B".to_vec()),
                SynthesisChunk::Metadata(serde_json::json!({"x": 1})),
                SynthesisChunk::Audio(b"C".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_timestamped_stream_surfaces_transport_error() {
        let parts: Vec<std::result::Result<Vec<u8>, String>> = vec![
            Ok(format!("{{\"audio_base64\":\"{}\"}}\n", encode(b"A")).into_bytes()),
            Err("connection reset".to_string()),
            Ok(b"ignored".to_vec()),
        ];

        let items: Vec<_> = timestamped_chunks(futures::stream::iter(parts)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(Error::Synthesis(_))));
    }

    #[test]
    fn test_stream_url() {
        let url = elevenlabs_stream_url("Rachel");
        assert!(url.contains("Rachel"));
        assert!(url.ends_with("/stream/with-timestamps"));
    }
}
