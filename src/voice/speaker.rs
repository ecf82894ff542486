//! Streaming speech playback through an external decoder
//!
//! Audio chunks are written to the decoder's stdin in the order the
//! synthesizer yields them. The next chunk is only requested once the
//! previous write completed, so the pipe provides backpressure.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

use super::tts::{SpeechSynthesizer, SynthesisChunk};
use crate::{Error, Result};

/// Speaks text aloud
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Speak `text`, returning once playback has finished
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synthesis`] if synthesis or playback fails
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Decoder/player process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCommand {
    program: String,
    args: Vec<String>,
}

impl PlayerCommand {
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// `mpg123 -q -`: quiet, read MP3 from stdin
    #[must_use]
    pub fn mpg123() -> Self {
        Self::new("mpg123".to_string(), vec!["-q".to_string(), "-".to_string()])
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Default for PlayerCommand {
    fn default() -> Self {
        Self::mpg123()
    }
}

/// One-shot byte pipe into a running player process
///
/// Consumed by [`PlaybackPipe::finish`] or [`PlaybackPipe::abort`]; either
/// way the process is reaped. If the pipe is dropped without either (task
/// cancelled), the child is killed by `kill_on_drop`.
#[derive(Debug)]
pub struct PlaybackPipe {
    child: Child,
    stdin: Option<ChildStdin>,
    program: String,
}

impl PlaybackPipe {
    /// Start the player
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot be spawned
    pub fn spawn(command: &PlayerCommand) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Synthesis(format!("failed to start {}: {e}", command.program))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Synthesis("player stdin unavailable".to_string()))?;

        tracing::debug!(program = %command.program, pid = ?child.id(), "player started");

        Ok(Self {
            child,
            stdin: Some(stdin),
            program: command.program.clone(),
        })
    }

    /// Process id, while the child is running
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Write one chunk of encoded audio
    ///
    /// # Errors
    ///
    /// Returns error if the player closed its input
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Synthesis("playback pipe already closed".to_string()))?;

        stdin
            .write_all(bytes)
            .await
            .map_err(|e| Error::Synthesis(format!("write to {} failed: {e}", self.program)))
    }

    /// Close the write end and wait for the player to drain and exit
    ///
    /// # Errors
    ///
    /// Returns error if flushing or waiting fails, or the player exits non-zero
    pub async fn finish(mut self) -> Result<ExitStatus> {
        let flushed = match self.stdin.take() {
            Some(mut stdin) => stdin.flush().await,
            None => Ok(()),
        };

        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::Synthesis(format!("waiting for {} failed: {e}", self.program)))?;

        flushed.map_err(|e| Error::Synthesis(format!("flush to {} failed: {e}", self.program)))?;

        if !status.success() {
            return Err(Error::Synthesis(format!(
                "{} exited with {status}",
                self.program
            )));
        }

        tracing::debug!(program = %self.program, "player finished");
        Ok(status)
    }

    /// Tear the player down after a failure
    pub async fn abort(mut self) {
        drop(self.stdin.take());

        if let Err(e) = self.child.kill().await {
            tracing::debug!(program = %self.program, error = %e, "player already gone");
        }
    }
}

/// Counters for one finished utterance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub audio_chunks: usize,
    pub metadata_chunks: usize,
    pub bytes_written: usize,
}

/// Synthesizes text and streams it into a player process
pub struct StreamingSpeaker {
    synthesizer: Box<dyn SpeechSynthesizer>,
    player: PlayerCommand,
}

impl StreamingSpeaker {
    #[must_use]
    pub fn new(synthesizer: Box<dyn SpeechSynthesizer>, player: PlayerCommand) -> Self {
        Self {
            synthesizer,
            player,
        }
    }

    /// Speak `text` and report what was written
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synthesis`] on any synthesis, pipe or player failure.
    /// The player process is reaped before this returns, on every path.
    pub async fn play(&self, text: &str) -> Result<PlaybackReport> {
        if text.trim().is_empty() {
            tracing::debug!("nothing to speak");
            return Ok(PlaybackReport::default());
        }

        let mut pipe = PlaybackPipe::spawn(&self.player)?;

        match self.stream_into(text, &mut pipe).await {
            Ok(report) => {
                pipe.finish().await?;
                tracing::debug!(
                    audio_chunks = report.audio_chunks,
                    metadata_chunks = report.metadata_chunks,
                    bytes = report.bytes_written,
                    "playback complete"
                );
                Ok(report)
            }
            Err(e) => {
                pipe.abort().await;
                Err(into_synthesis(e))
            }
        }
    }

    async fn stream_into(&self, text: &str, pipe: &mut PlaybackPipe) -> Result<PlaybackReport> {
        let mut stream = self.synthesizer.synthesize(text).await?;
        let mut report = PlaybackReport::default();

        while let Some(chunk) = stream.next().await {
            match chunk? {
                SynthesisChunk::Audio(bytes) => {
                    pipe.write(&bytes).await?;
                    report.audio_chunks += 1;
                    report.bytes_written += bytes.len();
                }
                SynthesisChunk::Metadata(_) => {
                    report.metadata_chunks += 1;
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl Speaker for StreamingSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        self.play(text).await.map(|_| ())
    }
}

fn into_synthesis(err: Error) -> Error {
    match err {
        Error::Synthesis(_) => err,
        other => Error::Synthesis(other.to_string()),
    }
}
