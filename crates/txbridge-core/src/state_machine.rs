use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Per-session coordinator state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for the backend to invoke the attempt callback.
    AwaitingAttempt,
    /// The attempt value was encoded and emitted to the caller.
    AttemptPublished,
    /// The worker is blocked in the handshake.
    AwaitingVerdict,
    /// The worker returned a verdict (or abort/timeout) to the backend.
    Resolving,
    /// The backend retry loop finished; no further transitions.
    Done,
}

/// Tracks one session across attempts.
///
/// The owning worker is the only writer. A conflict retry moves the session
/// from `Resolving` back to `AwaitingAttempt`.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
    attempts: u32,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: SessionState::AwaitingAttempt,
            attempts: 0,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of attempts the backend has started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    /// The backend invoked the attempt callback.
    pub fn on_attempt_started(&mut self) -> Result<u32, BridgeError> {
        self.transition_from_any_of(
            &[SessionState::AwaitingAttempt, SessionState::Resolving],
            SessionState::AwaitingAttempt,
            "start_attempt",
        )?;
        self.attempts = self.attempts.saturating_add(1);
        Ok(self.attempts)
    }

    pub fn on_published(&mut self) -> Result<(), BridgeError> {
        self.transition_from_state(
            SessionState::AwaitingAttempt,
            SessionState::AttemptPublished,
            "publish",
        )
    }

    pub fn on_awaiting_verdict(&mut self) -> Result<(), BridgeError> {
        self.transition_from_state(
            SessionState::AttemptPublished,
            SessionState::AwaitingVerdict,
            "await_verdict",
        )
    }

    pub fn on_verdict_resolved(&mut self) -> Result<(), BridgeError> {
        self.transition_from_state(
            SessionState::AwaitingVerdict,
            SessionState::Resolving,
            "resolve_verdict",
        )
    }

    /// The backend retry loop returned. Allowed from every live state because
    /// the backend may fail before or between attempts.
    pub fn on_finished(&mut self) -> Result<(), BridgeError> {
        if self.state == SessionState::Done {
            return Err(BridgeError::invalid_state(self.state, "finish"));
        }
        self.state = SessionState::Done;
        Ok(())
    }

    fn transition_from_state(
        &mut self,
        expected: SessionState,
        next: SessionState,
        action: &str,
    ) -> Result<(), BridgeError> {
        if self.state != expected {
            return Err(BridgeError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(())
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[SessionState],
        next: SessionState,
        action: &str,
    ) -> Result<(), BridgeError> {
        if !expected.contains(&self.state) {
            return Err(BridgeError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(())
    }
}
