//! Configuration management for the Apollo voice loop
//!
//! Sources, lowest precedence first: built-in defaults, the TOML file,
//! environment variables, then command-line overrides.

pub mod file;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::voice::{DEFAULT_FRAME_SIZE, PlayerCommand, SAMPLE_RATE};
use crate::{Error, Result};

pub use file::{ApolloConfigFile, config_file_path, load_config_file};

/// Default wake phrase
pub const DEFAULT_WAKE_PHRASE: &str = "apollo";

/// Groq's OpenAI-compatible endpoint
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// `OpenAI` endpoint
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default generation model
pub const DEFAULT_LLM_MODEL: &str = "llama-3.1-8b-instant";

/// Default Vosk model directory
pub const DEFAULT_VOSK_MODEL_PATH: &str = "models/vosk-model-small-en-us-0.15";

/// Smallest and largest accepted capture frame, in samples
const FRAME_SIZE_RANGE: std::ops::RangeInclusive<usize> = 256..=16384;

/// Apollo configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Capture and wake word settings
    pub voice: VoiceConfig,

    /// Speech recognition backend
    pub recognizer: RecognizerConfig,

    /// Reply generation
    pub llm: LlmConfig,

    /// Speech synthesis
    pub tts: TtsConfig,

    /// Decoder/player process
    pub player: PlayerCommand,
}

/// Capture and wake word settings
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Phrase that starts a turn
    pub wake_phrase: String,

    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Samples per capture frame
    pub frame_size: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wake_phrase: DEFAULT_WAKE_PHRASE.to_string(),
            sample_rate: SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }
}

/// Recognizer backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognizerBackend {
    /// Energy endpointing + Whisper transcription
    #[default]
    Whisper,
    /// Offline Vosk (needs the `vosk` feature)
    Vosk,
}

/// Speech recognition configuration
#[derive(Clone)]
pub struct RecognizerConfig {
    pub backend: RecognizerBackend,

    /// OpenAI-compatible base URL for Whisper
    pub base_url: String,

    /// API key for Whisper
    pub api_key: Option<String>,

    /// Whisper model
    pub model: String,

    /// Vosk model directory
    pub model_path: PathBuf,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            backend: RecognizerBackend::default(),
            base_url: GROQ_BASE_URL.to_string(),
            api_key: None,
            model: crate::voice::DEFAULT_STT_MODEL.to_string(),
            model_path: PathBuf::from(DEFAULT_VOSK_MODEL_PATH),
        }
    }
}

/// Reply generation configuration
#[derive(Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    pub base_url: String,

    /// API key
    pub api_key: Option<String>,

    /// Model identifier
    pub model: String,

    /// Optional system prompt
    pub system_prompt: Option<String>,

    /// Completion token cap
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: GROQ_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
            system_prompt: None,
            max_tokens: None,
        }
    }
}

/// TTS provider backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    #[default]
    OpenAi,
    ElevenLabs,
}

impl TtsProvider {
    const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "tts-1",
            Self::ElevenLabs => "eleven_flash_v2_5",
        }
    }

    const fn default_voice(self) -> &'static str {
        match self {
            Self::OpenAi => "onyx",
            Self::ElevenLabs => "21m00Tcm4TlvDq8ikWAM",
        }
    }
}

/// Speech synthesis configuration
#[derive(Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,

    /// OpenAI-compatible base URL (ignored by `ElevenLabs`)
    pub base_url: String,

    /// API key for the selected provider
    pub api_key: Option<String>,

    /// TTS model
    pub model: String,

    /// Voice identifier
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        let provider = TtsProvider::default();
        Self {
            provider,
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: None,
            model: provider.default_model().to_string(),
            voice: provider.default_voice().to_string(),
            speed: 1.0,
        }
    }
}

/// Command-line overrides, highest precedence
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub wake_phrase: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
}

impl Config {
    /// Load configuration from file, process environment and overrides
    ///
    /// With `path = None` the standard config location is used if present.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config path doesn't exist or the result is invalid
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let file = match path {
            Some(p) if !p.exists() => {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            Some(p) => load_config_file(p),
            None => config_file_path()
                .map(|p| load_config_file(&p))
                .unwrap_or_default(),
        };

        Self::resolve(file, |key| std::env::var(key).ok(), overrides)
    }

    /// Merge a parsed file, an environment lookup and overrides
    ///
    /// # Errors
    ///
    /// Returns error if the merged configuration is invalid
    #[allow(clippy::too_many_lines)]
    pub fn resolve<F>(file: ApolloConfigFile, env: F, overrides: &Overrides) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let groq_key = env("GROQ_API_KEY").or(file.api_keys.groq);
        let openai_key = env("OPENAI_API_KEY").or(file.api_keys.openai);
        let elevenlabs_key = env("ELEVENLABS_API_KEY").or(file.api_keys.elevenlabs);

        let voice = VoiceConfig {
            wake_phrase: overrides
                .wake_phrase
                .clone()
                .or_else(|| env("APOLLO_WAKE_PHRASE"))
                .or(file.wake_phrase)
                .unwrap_or_else(|| DEFAULT_WAKE_PHRASE.to_string()),
            sample_rate: file.audio.sample_rate.unwrap_or(SAMPLE_RATE),
            frame_size: file.audio.frame_size.unwrap_or(DEFAULT_FRAME_SIZE),
        };

        let recognizer_base = file
            .recognizer
            .base_url
            .unwrap_or_else(|| GROQ_BASE_URL.to_string());
        let recognizer = RecognizerConfig {
            backend: file.recognizer.backend.unwrap_or_default(),
            api_key: key_for_base_url(&recognizer_base, groq_key.as_ref(), openai_key.as_ref()),
            base_url: recognizer_base,
            model: file
                .recognizer
                .model
                .unwrap_or_else(|| crate::voice::DEFAULT_STT_MODEL.to_string()),
            model_path: env("APOLLO_VOSK_MODEL")
                .map(PathBuf::from)
                .or(file.recognizer.model_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VOSK_MODEL_PATH)),
        };

        let llm_base = file
            .llm
            .base_url
            .unwrap_or_else(|| GROQ_BASE_URL.to_string());
        let llm = LlmConfig {
            api_key: key_for_base_url(&llm_base, groq_key.as_ref(), openai_key.as_ref()),
            base_url: llm_base,
            model: overrides
                .model
                .clone()
                .or_else(|| env("APOLLO_MODEL"))
                .or(file.llm.model)
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            system_prompt: file.llm.system_prompt,
            max_tokens: file.llm.max_tokens,
        };

        let provider = file.tts.provider.unwrap_or_default();
        let tts = TtsConfig {
            provider,
            base_url: file
                .tts
                .base_url
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key: match provider {
                TtsProvider::OpenAi => openai_key,
                TtsProvider::ElevenLabs => elevenlabs_key,
            },
            model: file
                .tts
                .model
                .unwrap_or_else(|| provider.default_model().to_string()),
            voice: overrides
                .voice
                .clone()
                .or_else(|| env("APOLLO_VOICE"))
                .or(file.tts.voice)
                .unwrap_or_else(|| provider.default_voice().to_string()),
            speed: file.tts.speed.unwrap_or(1.0),
        };

        let player = match file.player.program {
            Some(program) => PlayerCommand::new(program, file.player.args.unwrap_or_default()),
            None => PlayerCommand::default(),
        };

        let config = Self {
            voice,
            recognizer,
            llm,
            tts,
            player,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.voice.wake_phrase.trim().is_empty() {
            return Err(Error::Config("wake phrase must not be empty".to_string()));
        }

        if self.voice.sample_rate != SAMPLE_RATE {
            return Err(Error::Config(format!(
                "sample rate must be {SAMPLE_RATE} Hz, got {}",
                self.voice.sample_rate
            )));
        }

        if !FRAME_SIZE_RANGE.contains(&self.voice.frame_size) {
            return Err(Error::Config(format!(
                "frame size must be between {} and {} samples, got {}",
                FRAME_SIZE_RANGE.start(),
                FRAME_SIZE_RANGE.end(),
                self.voice.frame_size
            )));
        }

        if !(0.25..=4.0).contains(&self.tts.speed) {
            return Err(Error::Config(format!(
                "tts speed must be between 0.25 and 4.0, got {}",
                self.tts.speed
            )));
        }

        if self.player.program().is_empty() {
            return Err(Error::Config("player program must not be empty".to_string()));
        }

        Ok(())
    }

    /// Locate the player program on `PATH`
    ///
    /// # Errors
    ///
    /// Returns error if the program cannot be found
    pub fn check_player(&self) -> Result<PathBuf> {
        which::which(self.player.program()).map_err(|e| {
            Error::Config(format!(
                "player '{}' not found ({e}); install it or set [player] in the config file",
                self.player.program()
            ))
        })
    }
}

/// Pick the key matching the service a base URL points at
fn key_for_base_url(
    base_url: &str,
    groq: Option<&String>,
    openai: Option<&String>,
) -> Option<String> {
    if base_url.contains("api.openai.com") {
        openai.or(groq).cloned()
    } else {
        groq.or(openai).cloned()
    }
}

fn redact(key: Option<&String>) -> &'static str {
    if key.is_some_and(|k| !k.is_empty()) {
        "set"
    } else {
        "missing"
    }
}

impl fmt::Debug for RecognizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognizerConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(self.api_key.as_ref()))
            .field("model", &self.model)
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(self.api_key.as_ref()))
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(self.api_key.as_ref()))
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("speed", &self.speed)
            .finish()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "wake phrase:  {}", self.voice.wake_phrase)?;
        writeln!(
            f,
            "audio:        {} Hz, {} samples/frame",
            self.voice.sample_rate, self.voice.frame_size
        )?;
        writeln!(
            f,
            "recognizer:   {:?} ({} @ {}, key {})",
            self.recognizer.backend,
            self.recognizer.model,
            self.recognizer.base_url,
            redact(self.recognizer.api_key.as_ref())
        )?;
        writeln!(
            f,
            "llm:          {} @ {} (key {})",
            self.llm.model,
            self.llm.base_url,
            redact(self.llm.api_key.as_ref())
        )?;
        writeln!(
            f,
            "tts:          {:?} {} voice {} (key {})",
            self.tts.provider,
            self.tts.model,
            self.tts.voice,
            redact(self.tts.api_key.as_ref())
        )?;
        write!(
            f,
            "player:       {} {}",
            self.player.program(),
            self.player.args().join(" ")
        )
    }
}
