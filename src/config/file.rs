//! TOML configuration file loading
//!
//! Supports `~/.config/apollo/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{RecognizerBackend, TtsProvider};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ApolloConfigFile {
    /// Wake phrase (e.g. "apollo")
    #[serde(default)]
    pub wake_phrase: Option<String>,

    /// Capture configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Speech recognition configuration
    #[serde(default)]
    pub recognizer: RecognizerFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Text-to-speech configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Decoder/player process
    #[serde(default)]
    pub player: PlayerFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_size: Option<usize>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognizerFileConfig {
    /// "whisper" or "vosk"
    pub backend: Option<RecognizerBackend>,

    /// OpenAI-compatible base URL for Whisper
    pub base_url: Option<String>,

    /// Whisper model (e.g. "whisper-large-v3-turbo")
    pub model: Option<String>,

    /// Vosk model directory
    pub model_path: Option<PathBuf>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// Model identifier (e.g. "llama-3.1-8b-instant")
    pub model: Option<String>,

    /// Optional system prompt
    pub system_prompt: Option<String>,

    /// Completion token cap
    pub max_tokens: Option<u32>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "elevenlabs"
    pub provider: Option<TtsProvider>,

    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// TTS model
    pub model: Option<String>,

    /// Voice identifier
    pub voice: Option<String>,

    /// Speed multiplier
    pub speed: Option<f32>,
}

/// Player process configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlayerFileConfig {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub groq: Option<String>,
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load a TOML config file
///
/// Returns `ApolloConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: &Path) -> ApolloConfigFile {
    if !path.exists() {
        return ApolloConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ApolloConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ApolloConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/apollo/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("apollo").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_parse_partial_file() {
        let parsed: ApolloConfigFile = toml::from_str(
            r#"
            wake_phrase = "jarvis"

            [recognizer]
            backend = "vosk"
            model_path = "/opt/vosk/en"

            [tts]
            provider = "elevenlabs"
            voice = "Rachel"

            [player]
            program = "ffplay"
            args = ["-nodisp", "-autoexit", "-"]
            "#,
        )
        .unwrap();

        assert_eq!(parsed.wake_phrase.as_deref(), Some("jarvis"));
        assert_eq!(parsed.recognizer.backend, Some(RecognizerBackend::Vosk));
        assert_eq!(parsed.tts.provider, Some(TtsProvider::ElevenLabs));
        assert_eq!(parsed.player.args.unwrap().len(), 3);
        assert!(parsed.llm.model.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = load_config_file(&dir.path().join("absent.toml"));
        assert!(parsed.wake_phrase.is_none());
    }

    #[test]
    fn test_broken_file_yields_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "wake_phrase = [not toml").unwrap();

        let parsed = load_config_file(file.path());
        assert!(parsed.wake_phrase.is_none());
    }

    #[test]
    fn test_config_path_location() {
        if let Some(path) = config_file_path() {
            assert!(path.ends_with("apollo/config.toml"));
        }
    }
}
