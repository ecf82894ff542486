//! Energy-based utterance endpointing
//!
//! Splits a live frame stream into utterances: speech starts when a frame's
//! RMS energy crosses the threshold and ends after enough trailing silence.

use super::capture::AudioFrame;

/// Minimum frame RMS energy considered speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of voiced audio for a valid utterance
const MIN_SPEECH_MS: u64 = 300;

/// Trailing silence that ends an utterance
const TRAILING_SILENCE_MS: u64 = 500;

/// Silence after which an empty utterance is reported
const NO_SPEECH_MS: u64 = 8_000;

/// Hard cap on a single utterance
const MAX_UTTERANCE_MS: u64 = 30_000;

/// Endpointing thresholds, expressed in samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointConfig {
    pub energy_threshold: f32,
    pub min_speech_samples: usize,
    pub trailing_silence_samples: usize,
    pub no_speech_samples: usize,
    pub max_utterance_samples: usize,
}

impl EndpointConfig {
    /// Default thresholds for a given sample rate
    #[must_use]
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        Self {
            energy_threshold: ENERGY_THRESHOLD,
            min_speech_samples: ms_to_samples(sample_rate, MIN_SPEECH_MS),
            trailing_silence_samples: ms_to_samples(sample_rate, TRAILING_SILENCE_MS),
            no_speech_samples: ms_to_samples(sample_rate, NO_SPEECH_MS),
            max_utterance_samples: ms_to_samples(sample_rate, MAX_UTTERANCE_MS),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn ms_to_samples(sample_rate: u32, ms: u64) -> usize {
    (sample_rate as u64 * ms / 1000) as usize
}

/// What the endpointer decided after a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A complete utterance, including its onset frame and trailing silence
    Utterance(Vec<i16>),
    /// Nothing was said for the whole no-speech window
    NoSpeech,
}

/// Endpointer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Waiting for speech
    Idle,
    /// Accumulating an utterance
    Speaking,
}

/// Streaming utterance detector
#[derive(Debug)]
pub struct Endpointer {
    config: EndpointConfig,
    state: EndpointState,
    preroll: Vec<i16>,
    buffer: Vec<i16>,
    voiced: usize,
    silence: usize,
    idle: usize,
}

impl Endpointer {
    #[must_use]
    pub const fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            state: EndpointState::Idle,
            preroll: Vec::new(),
            buffer: Vec::new(),
            voiced: 0,
            silence: 0,
            idle: 0,
        }
    }

    /// Feed one frame
    ///
    /// Returns `Some` exactly when an utterance boundary is reached.
    pub fn push(&mut self, frame: &AudioFrame) -> Option<Endpoint> {
        let energy = frame.rms();
        let is_speech = energy > self.config.energy_threshold;

        match self.state {
            EndpointState::Idle => {
                if is_speech {
                    self.state = EndpointState::Speaking;
                    self.buffer = std::mem::take(&mut self.preroll);
                    self.buffer.extend_from_slice(frame.samples());
                    self.voiced = frame.len();
                    self.silence = 0;
                    tracing::trace!(energy, "speech onset");
                    return None;
                }

                self.preroll.clear();
                self.preroll.extend_from_slice(frame.samples());
                self.idle += frame.len();

                if self.idle >= self.config.no_speech_samples {
                    tracing::trace!(idle = self.idle, "no speech window elapsed");
                    self.reset();
                    return Some(Endpoint::NoSpeech);
                }

                None
            }
            EndpointState::Speaking => {
                self.buffer.extend_from_slice(frame.samples());

                if is_speech {
                    self.voiced += frame.len();
                    self.silence = 0;
                } else {
                    self.silence += frame.len();
                }

                if self.buffer.len() >= self.config.max_utterance_samples {
                    tracing::debug!(samples = self.buffer.len(), "utterance hit length cap");
                    return Some(self.finish());
                }

                if self.silence >= self.config.trailing_silence_samples {
                    if self.voiced >= self.config.min_speech_samples {
                        tracing::debug!(
                            samples = self.buffer.len(),
                            voiced = self.voiced,
                            "utterance complete"
                        );
                        return Some(self.finish());
                    }

                    tracing::trace!(voiced = self.voiced, "discarding short noise burst");
                    self.reset();
                }

                None
            }
        }
    }

    /// Drop all accumulated audio and return to idle
    pub fn reset(&mut self) {
        self.state = EndpointState::Idle;
        self.preroll.clear();
        self.buffer.clear();
        self.voiced = 0;
        self.silence = 0;
        self.idle = 0;
    }

    #[must_use]
    pub const fn state(&self) -> EndpointState {
        self.state
    }

    fn finish(&mut self) -> Endpoint {
        let samples = std::mem::take(&mut self.buffer);
        self.reset();
        Endpoint::Utterance(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 2048;

    fn speech() -> AudioFrame {
        AudioFrame::new(vec![8000; FRAME])
    }

    fn silence() -> AudioFrame {
        AudioFrame::silence(FRAME)
    }

    fn endpointer() -> Endpointer {
        Endpointer::new(EndpointConfig::for_sample_rate(16000))
    }

    #[test]
    fn test_config_for_16khz() {
        let config = EndpointConfig::for_sample_rate(16000);
        assert_eq!(config.min_speech_samples, 4800);
        assert_eq!(config.trailing_silence_samples, 8000);
        assert_eq!(config.no_speech_samples, 128_000);
    }

    #[test]
    fn test_utterance_after_trailing_silence() {
        let mut ep = endpointer();

        assert_eq!(ep.push(&silence()), None);
        for _ in 0..3 {
            assert_eq!(ep.push(&speech()), None);
        }
        assert_eq!(ep.state(), EndpointState::Speaking);

        // 3 silent frames = 6144 samples, below the 8000 sample tail
        for _ in 0..3 {
            assert_eq!(ep.push(&silence()), None);
        }

        match ep.push(&silence()) {
            Some(Endpoint::Utterance(samples)) => {
                // preroll + 3 speech + 4 silence
                assert_eq!(samples.len(), FRAME * 8);
            }
            other => panic!("expected utterance, got {other:?}"),
        }
        assert_eq!(ep.state(), EndpointState::Idle);
    }

    #[test]
    fn test_short_burst_is_discarded() {
        let mut ep = endpointer();

        ep.push(&speech());
        ep.push(&speech());
        for _ in 0..4 {
            assert_eq!(ep.push(&silence()), None);
        }
        assert_eq!(ep.state(), EndpointState::Idle);
    }

    #[test]
    fn test_no_speech_reports_empty() {
        let mut ep = endpointer();
        let frames_needed = 128_000_usize.div_ceil(FRAME);

        for _ in 0..frames_needed - 1 {
            assert_eq!(ep.push(&silence()), None);
        }
        assert_eq!(ep.push(&silence()), Some(Endpoint::NoSpeech));
    }

    #[test]
    fn test_reset_drops_partial_utterance() {
        let mut ep = endpointer();
        ep.push(&speech());
        ep.push(&speech());
        ep.reset();

        for _ in 0..6 {
            assert_eq!(ep.push(&silence()), None);
        }
        assert_eq!(ep.state(), EndpointState::Idle);
    }

    #[test]
    fn test_length_cap_forces_endpoint() {
        let mut config = EndpointConfig::for_sample_rate(16000);
        config.max_utterance_samples = FRAME * 4;
        let mut ep = Endpointer::new(config);

        for _ in 0..3 {
            assert_eq!(ep.push(&speech()), None);
        }
        assert!(matches!(ep.push(&speech()), Some(Endpoint::Utterance(_))));
    }
}
