//! Shared test utilities
//!
//! Scripted stand-ins for the microphone, recognizer, reply backend, speaker
//! and synthesizer, so the turn loop runs without hardware or network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use apollo_voice::voice::{
    AudioFrame, AudioInput, AudioSource, DeviceLease, DeviceLock, RecognitionSession, Speaker,
    SpeechRecognizer, SpeechSynthesizer, SynthesisChunk, SynthesisStream, UtteranceResult,
};
use apollo_voice::{Error, ReplySource, Result};

/// Samples per scripted frame
pub const FRAME_LEN: usize = 320;

/// Words the scripted recognizer understands; a frame whose samples all
/// equal `i + 1` is heard as `WORDS[i]`
pub const WORDS: [&str; 8] = ["hey", "apollo", "what", "time", "is", "it", "hello", "world"];

/// One step of microphone input
#[derive(Debug, Clone)]
pub enum Step {
    Frame(AudioFrame),
    Fault,
}

/// A frame the scripted recognizer hears as `word`
#[must_use]
pub fn word(word: &str) -> Step {
    let index = WORDS
        .iter()
        .position(|w| *w == word)
        .expect("word not in test vocabulary");
    let value = i16::try_from(index + 1).expect("small index");
    Step::Frame(AudioFrame::new(vec![value; FRAME_LEN]))
}

/// Several words followed by the pause that finalizes them
#[must_use]
pub fn utterance(text: &str) -> Vec<Step> {
    let mut steps: Vec<Step> = text.split_whitespace().map(word).collect();
    steps.push(silence());
    steps
}

/// A silent frame
#[must_use]
pub fn silence() -> Step {
    Step::Frame(AudioFrame::silence(FRAME_LEN))
}

/// A loud frame, for energy-based endpointing
#[must_use]
pub fn loud() -> Step {
    Step::Frame(AudioFrame::new(vec![8000; FRAME_LEN]))
}

/// A device fault
#[must_use]
pub fn fault() -> Step {
    Step::Fault
}

/// Microphone that replays a script across every open handle
///
/// When the script runs dry it cancels `exhausted` and blocks, which lets
/// the turn loop shut down cleanly after the last scripted turn.
pub struct ScriptedAudio {
    script: Arc<Mutex<VecDeque<Step>>>,
    lock: DeviceLock,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    exhausted: CancellationToken,
}

impl ScriptedAudio {
    #[must_use]
    pub fn new(steps: Vec<Step>, exhausted: CancellationToken) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into())),
            lock: DeviceLock::new(),
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            exhausted,
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    /// Handle on the device lock, to observe or hold it from a test
    pub fn lock(&self) -> DeviceLock {
        self.lock.clone()
    }
}

#[async_trait]
impl AudioSource for ScriptedAudio {
    async fn open(&self) -> Result<Box<dyn AudioInput>> {
        let lease = self.lock.acquire()?;
        self.opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedInput {
            script: Arc::clone(&self.script),
            lease: Some(lease),
            closes: Arc::clone(&self.closes),
            exhausted: self.exhausted.clone(),
        }))
    }
}

struct ScriptedInput {
    script: Arc<Mutex<VecDeque<Step>>>,
    lease: Option<DeviceLease>,
    closes: Arc<AtomicUsize>,
    exhausted: CancellationToken,
}

#[async_trait]
impl AudioInput for ScriptedInput {
    async fn read(&mut self) -> Result<AudioFrame> {
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Frame(frame)) => Ok(frame),
            Some(Step::Fault) => Err(Error::Device("scripted device fault".to_string())),
            None => {
                self.exhausted.cancel();
                std::future::pending().await
            }
        }
    }

    async fn close(&mut self) {
        if self.lease.take().is_some() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Recognizer that decodes [`word`] frames
///
/// Words accumulate until a silent frame finalizes them. Two silent frames
/// with nothing heard finalize an empty utterance.
#[derive(Default)]
pub struct ScriptedRecognizer {
    begun: AtomicUsize,
    ended: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    pub fn sessions_begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn sessions_ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn sample_rate(&self) -> u32 {
        apollo_voice::voice::SAMPLE_RATE
    }

    fn begin_session(&self) -> Result<Box<dyn RecognitionSession>> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            words: Vec::new(),
            quiet_frames: 0,
            ended: Arc::clone(&self.ended),
            done: false,
        }))
    }
}

struct ScriptedSession {
    words: Vec<&'static str>,
    quiet_frames: usize,
    ended: Arc<AtomicUsize>,
    done: bool,
}

#[async_trait]
impl RecognitionSession for ScriptedSession {
    async fn feed(&mut self, frame: &AudioFrame) -> Result<Option<UtteranceResult>> {
        assert!(!self.done, "frame fed to an ended session");

        let value = frame.samples().first().copied().unwrap_or(0);
        if value > 0 {
            let index = usize::try_from(value - 1).unwrap();
            self.words.push(WORDS[index]);
            self.quiet_frames = 0;
            return Ok(None);
        }

        if !self.words.is_empty() {
            let text = std::mem::take(&mut self.words).join(" ");
            return Ok(Some(UtteranceResult::new(text)));
        }

        self.quiet_frames += 1;
        if self.quiet_frames >= 2 {
            self.quiet_frames = 0;
            return Ok(Some(UtteranceResult::empty()));
        }

        Ok(None)
    }

    fn end(&mut self) {
        if !self.done {
            self.done = true;
            self.ended.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Reply backend that counts calls
pub struct CountingReply {
    reply: std::result::Result<String, String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl CountingReply {
    #[must_use]
    pub fn answering(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplySource for CountingReply {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().map_err(Error::Reply)
    }
}

/// Speaker that records what it was asked to say
#[derive(Default)]
pub struct RecordingSpeaker {
    spoken: Mutex<Vec<String>>,
    fail_first: AtomicUsize,
    device: Option<DeviceLock>,
    overlaps: AtomicUsize,
}

impl RecordingSpeaker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` calls with a synthesis error
    #[must_use]
    pub fn failing_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Count calls made while `lock` is held
    #[must_use]
    pub fn watching(mut self, lock: DeviceLock) -> Self {
        self.device = Some(lock);
        self
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        if self.device.as_ref().is_some_and(DeviceLock::is_held) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        self.spoken.lock().unwrap().push(text.to_string());

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Synthesis("scripted playback failure".to_string()));
        }
        Ok(())
    }
}

/// One item a [`FakeSynthesizer`] yields
#[derive(Debug, Clone)]
pub enum FakeChunk {
    Audio(&'static [u8]),
    Metadata,
    Fail,
}

/// Synthesizer that yields a fixed chunk sequence for any text
pub struct FakeSynthesizer {
    chunks: Vec<FakeChunk>,
    calls: Arc<AtomicUsize>,
}

impl FakeSynthesizer {
    #[must_use]
    pub fn new(chunks: Vec<FakeChunk>) -> Self {
        Self {
            chunks,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<SynthesisStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let items: Vec<Result<SynthesisChunk>> = self
            .chunks
            .iter()
            .map(|chunk| match chunk {
                FakeChunk::Audio(bytes) => Ok(SynthesisChunk::Audio(bytes.to_vec())),
                FakeChunk::Metadata => Ok(SynthesisChunk::Metadata(
                    serde_json::json!({"characters": ["x"]}),
                )),
                FakeChunk::Fail => Err(Error::Synthesis("stream dropped".to_string())),
            })
            .collect();

        Ok(futures::stream::iter(items).boxed())
    }
}
