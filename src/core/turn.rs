//! Turn and interruption tracking.
//!
//! One [`TurnStateMachine`] per session accumulates incremental transcripts
//! for both speakers, finalizes them into a [`Turn`] when the model signals
//! the end of a turn, and reconciles state after a remote interruption:
//! the partial model transcript is discarded and the completion that follows
//! the interruption is suppressed.
//!
//! Events arriving after [`TurnStateMachine::close`] are rejected with
//! [`TurnError::Closed`] so late upstream traffic cannot mutate a torn-down
//! session.

use std::fmt;

use thiserror::Error;
use tracing::trace;

/// Phase of the conversation as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    UserSpeaking,
    ModelSpeaking,
    Closed,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnPhase::Idle => write!(f, "idle"),
            TurnPhase::UserSpeaking => write!(f, "user_speaking"),
            TurnPhase::ModelSpeaking => write!(f, "model_speaking"),
            TurnPhase::Closed => write!(f, "closed"),
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// Incremental transcription of user speech.
    InputTranscription(String),
    /// Incremental transcription of model speech.
    OutputTranscription(String),
    /// A chunk of model audio arrived.
    ModelAudio,
    TurnComplete,
    Interrupted,
    /// Local playback finished every scheduled segment.
    PlaybackDrained,
}

/// A finalized exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Turn {
    pub user_text: String,
    pub model_text: String,
}

/// Effect of an event, for the owner to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutput {
    /// Accumulated user transcript so far.
    UserTranscript(String),
    /// Accumulated model transcript so far.
    ModelTranscript(String),
    TurnComplete(Turn),
    /// Playback must be flushed and the partial model transcript discarded.
    Interrupted,
    /// Model audio finished playing out.
    SpeakingEnded,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("session closed, dropping {0:?}")]
    Closed(TurnEvent),
}

/// Per-session turn tracker.
#[derive(Debug, Default)]
pub struct TurnStateMachine {
    phase: TurnPhase,
    user_text: String,
    model_text: String,
    interrupted: bool,
}

impl TurnStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_model_speaking(&self) -> bool {
        self.phase == TurnPhase::ModelSpeaking
    }

    /// Whether an interruption has been seen since the last turn completion.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn user_text(&self) -> &str {
        &self.user_text
    }

    pub fn model_text(&self) -> &str {
        &self.model_text
    }

    /// Apply one event.
    pub fn handle(&mut self, event: TurnEvent) -> Result<Vec<TurnOutput>, TurnError> {
        if self.phase == TurnPhase::Closed {
            return Err(TurnError::Closed(event));
        }

        let before = self.phase;
        let outputs = match event {
            TurnEvent::InputTranscription(delta) => {
                self.user_text.push_str(&delta);
                if self.phase == TurnPhase::Idle {
                    self.phase = TurnPhase::UserSpeaking;
                }
                vec![TurnOutput::UserTranscript(self.user_text.clone())]
            }
            TurnEvent::OutputTranscription(delta) => {
                self.model_text.push_str(&delta);
                self.phase = TurnPhase::ModelSpeaking;
                vec![TurnOutput::ModelTranscript(self.model_text.clone())]
            }
            TurnEvent::ModelAudio => {
                self.phase = TurnPhase::ModelSpeaking;
                Vec::new()
            }
            TurnEvent::TurnComplete => {
                let turn = Turn {
                    user_text: std::mem::take(&mut self.user_text),
                    model_text: std::mem::take(&mut self.model_text),
                };
                self.phase = TurnPhase::Idle;
                if std::mem::replace(&mut self.interrupted, false) {
                    Vec::new()
                } else {
                    vec![TurnOutput::TurnComplete(turn)]
                }
            }
            TurnEvent::Interrupted => {
                self.model_text.clear();
                self.interrupted = true;
                self.phase = TurnPhase::Idle;
                vec![TurnOutput::Interrupted]
            }
            TurnEvent::PlaybackDrained => {
                if self.phase == TurnPhase::ModelSpeaking {
                    self.phase = TurnPhase::Idle;
                    vec![TurnOutput::SpeakingEnded]
                } else {
                    Vec::new()
                }
            }
        };

        if before != self.phase {
            trace!(from = %before, to = %self.phase, "Turn phase changed");
        }
        Ok(outputs)
    }

    /// Move to the terminal phase, discarding any buffered transcript.
    pub fn close(&mut self) {
        self.user_text.clear();
        self.model_text.clear();
        self.interrupted = false;
        self.phase = TurnPhase::Closed;
    }
}
