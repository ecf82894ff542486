//! Apollo - a wake-word voice assistant loop
//!
//! Listens for a wake phrase, captures one spoken command, asks a text
//! generation service for a reply and speaks it back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   TurnController                      │
//! │  WAIT_WAKE → LISTEN_COMMAND → DISPATCH → SPEAK → ...  │
//! └───────┬──────────────────────┬───────────────┬───────┘
//!         │                      │               │
//! ┌───────▼────────┐   ┌─────────▼──────┐  ┌─────▼──────────┐
//! │  AudioSource   │   │  ReplySource   │  │ StreamingSpeaker│
//! │  Recognizer    │   │  strip_markup  │  │  TTS → mpg123   │
//! │  WakeWordGate  │   └────────────────┘  └────────────────┘
//! └────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod markup;
pub mod reply;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use markup::strip_markup;
pub use reply::{ChatClient, ReplySource};
pub use turn::{ReplyOrigin, Turn, TurnController, TurnState, notices};
