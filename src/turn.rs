//! Turn-taking state machine
//!
//! `WaitWake -> ListenCommand -> Dispatch -> Speak -> WaitWake`, forever.
//! Listening and speaking never overlap: the capture handle is closed at the
//! end of each listening phase, before any reply is requested or played.
//!
//! Only device faults leave the loop. A recognition session that fails to
//! start sends the loop back to `WaitWake`. Reply and synthesis failures are
//! absorbed so the assistant stays responsive, and every turn that reaches
//! `Dispatch` ends with something audible.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::markup::strip_markup;
use crate::reply::ReplySource;
use crate::voice::{
    AudioInput, AudioSource, RecognitionSession, Speaker, SpeechRecognizer, UtteranceResult,
    WakeWordGate,
};
use crate::Result;

/// Fixed spoken notices
pub mod notices {
    /// Spoken when the command phase captured nothing
    pub const NO_INPUT: &str = "No input detected.";

    /// Spoken when no usable reply could be produced
    pub const TROUBLE_RESPONDING: &str = "I'm having trouble responding right now.";
}

/// Pause before listening again after a recognition session failed to start
const SESSION_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    WaitWake,
    ListenCommand,
    Dispatch,
    Speak,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WaitWake => "WAIT_WAKE",
            Self::ListenCommand => "LISTEN_COMMAND",
            Self::Dispatch => "DISPATCH",
            Self::Speak => "SPEAK",
        };
        f.write_str(name)
    }
}

/// How the reply for a turn was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOrigin {
    /// Generated by the reply source
    Generated,
    /// Command was empty; the reply source was not consulted
    NoInput,
    /// Reply source failed or returned nothing speakable
    Fallback,
}

/// One completed interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Utterance that carried the wake phrase
    pub wake: UtteranceResult,
    /// Raw command text, possibly empty
    pub command: String,
    /// Text handed to the speaker
    pub reply: String,
    pub origin: ReplyOrigin,
    /// False if synthesis or playback failed
    pub spoken: bool,
}

/// Drives the assistant loop
///
/// All collaborators are injected; the controller owns no global state.
pub struct TurnController {
    audio: Arc<dyn AudioSource>,
    recognizer: Arc<dyn SpeechRecognizer>,
    gate: WakeWordGate,
    reply: Arc<dyn ReplySource>,
    speaker: Arc<dyn Speaker>,
    cancel: CancellationToken,
    state: TurnState,
}

impl TurnController {
    #[must_use]
    pub fn new(
        audio: Arc<dyn AudioSource>,
        recognizer: Arc<dyn SpeechRecognizer>,
        gate: WakeWordGate,
        reply: Arc<dyn ReplySource>,
        speaker: Arc<dyn Speaker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            audio,
            recognizer,
            gate,
            reply,
            speaker,
            cancel,
            state: TurnState::WaitWake,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Run turns until cancelled
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Device`] or [`crate::Error::DeviceBusy`] when
    /// the capture device fails. Everything else is handled inside the turn.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(wake_phrase = %self.gate.phrase(), "listening for wake phrase");

        while !self.cancel.is_cancelled() {
            if let Some(turn) = self.run_turn().await? {
                tracing::debug!(origin = ?turn.origin, spoken = turn.spoken, "turn complete");
            }
        }

        self.transition(TurnState::WaitWake);
        tracing::info!("turn loop stopped");
        Ok(())
    }

    /// Run a single turn
    ///
    /// Returns `Ok(None)` if cancelled before the turn reached `Speak`, or if
    /// a recognition session could not be started. In the latter case the
    /// next turn starts over at `WaitWake` after a short pause.
    ///
    /// # Errors
    ///
    /// Same as [`TurnController::run`]
    pub async fn run_turn(&mut self) -> Result<Option<Turn>> {
        self.transition(TurnState::WaitWake);
        let Some(wake) = self.wait_for_wake().await? else {
            return Ok(None);
        };

        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        self.transition(TurnState::ListenCommand);
        let Some(command) = self.listen_for_command().await? else {
            return Ok(None);
        };

        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        self.transition(TurnState::Dispatch);
        let command = command.text().trim().to_string();
        let (reply, origin) = self.dispatch(&command).await;

        self.transition(TurnState::Speak);
        let spoken = self.speak(&reply).await;

        self.transition(TurnState::WaitWake);
        Ok(Some(Turn {
            wake,
            command,
            reply,
            origin,
            spoken,
        }))
    }

    async fn wait_for_wake(&self) -> Result<Option<UtteranceResult>> {
        let gate = &self.gate;
        self.listen(|result| gate.matches(result)).await
    }

    async fn listen_for_command(&self) -> Result<Option<UtteranceResult>> {
        let command = self.listen(|_| true).await?;
        if let Some(result) = &command {
            tracing::info!(command = %result.text(), "command captured");
        }
        Ok(command)
    }

    /// One listening phase: open, fresh session, read until accepted, close
    ///
    /// The session and the capture handle are released on every path.
    async fn listen<P>(&self, accept: P) -> Result<Option<UtteranceResult>>
    where
        P: Fn(&UtteranceResult) -> bool + Send + Sync,
    {
        let mut input = self.audio.open().await?;

        let mut session = match self.recognizer.begin_session() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    state = %self.state,
                    error = %e,
                    "could not start recognition session"
                );
                input.close().await;
                self.back_off().await;
                return Ok(None);
            }
        };

        let outcome = self.feed_until(input.as_mut(), session.as_mut(), &accept).await;
        session.end();
        input.close().await;
        outcome
    }

    async fn back_off(&self) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(SESSION_RETRY_DELAY) => {}
        }
    }

    async fn feed_until<P>(
        &self,
        input: &mut dyn AudioInput,
        session: &mut dyn RecognitionSession,
        accept: &P,
    ) -> Result<Option<UtteranceResult>>
    where
        P: Fn(&UtteranceResult) -> bool + Send + Sync,
    {
        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::debug!(state = %self.state, "listening cancelled");
                    return Ok(None);
                }
                frame = input.read() => frame?,
            };

            let result = match session.feed(&frame).await {
                Ok(Some(result)) => result,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(state = %self.state, error = %e, "recognition failed");
                    UtteranceResult::empty()
                }
            };

            tracing::debug!(state = %self.state, text = %result.text(), "utterance finalized");

            if accept(&result) {
                return Ok(Some(result));
            }
        }
    }

    async fn dispatch(&self, command: &str) -> (String, ReplyOrigin) {
        if command.is_empty() {
            tracing::info!("empty command, skipping reply");
            return (notices::NO_INPUT.to_string(), ReplyOrigin::NoInput);
        }

        match self.reply.complete(command).await {
            Ok(text) => {
                let cleaned = strip_markup(&text);
                if cleaned.is_empty() {
                    tracing::warn!("reply was empty after cleanup");
                    (notices::TROUBLE_RESPONDING.to_string(), ReplyOrigin::Fallback)
                } else {
                    tracing::info!(reply = %cleaned, "reply received");
                    (cleaned, ReplyOrigin::Generated)
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "reply generation failed");
                (notices::TROUBLE_RESPONDING.to_string(), ReplyOrigin::Fallback)
            }
        }
    }

    async fn speak(&self, reply: &str) -> bool {
        match self.speaker.speak(reply).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "speech failed");
                false
            }
        }
    }

    fn transition(&mut self, next: TurnState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "state transition");
            self.state = next;
        }
    }
}
