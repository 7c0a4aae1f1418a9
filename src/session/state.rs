//! Session lifecycle states and the status reported to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Encoding,
    Discovered,
    Casting,
    Playing,
    Stopped,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// The forward path is `Idle -> Encoding -> Discovered -> Casting ->
    /// Playing -> Stopped`. A caller stop may end any live state early, and
    /// any live state may fail into `Error`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Idle, Encoding)
                | (Encoding, Discovered)
                | (Discovered, Casting)
                | (Casting, Playing)
                | (_, Stopped)
                | (_, Error)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Encoding => "encoding",
            SessionState::Discovered => "discovered",
            SessionState::Casting => "casting",
            SessionState::Playing => "playing",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// The error a session ended with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for SessionError {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub id: Uuid,
    pub state: SessionState,
    pub last_error: Option<SessionError>,
    /// URL handed to the renderer.
    pub stream_url: Option<String>,
    /// Where the segment server is bound.
    pub server_addr: Option<SocketAddr>,
    /// Friendly name of the target renderer.
    pub renderer: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl SessionStatus {
    pub fn new(id: Uuid, renderer: Option<String>) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            last_error: None,
            stream_url: None,
            server_addr: None,
            renderer,
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::{Casting, Discovered, Encoding, Error, Idle, Playing, Stopped};

    #[test]
    fn forward_path_is_allowed() {
        let path = [Idle, Encoding, Discovered, Casting, Playing, Stopped];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_ahead_is_rejected() {
        assert!(!Encoding.can_transition_to(Playing));
        assert!(!Discovered.can_transition_to(Playing));
        assert!(!Idle.can_transition_to(Casting));
        assert!(!Playing.can_transition_to(Casting));
    }

    #[test]
    fn error_reachable_from_live_states_only() {
        for state in [Idle, Encoding, Discovered, Casting, Playing] {
            assert!(state.can_transition_to(Error));
        }
        assert!(!Stopped.can_transition_to(Error));
        assert!(!Error.can_transition_to(Stopped));
    }

    #[test]
    fn session_error_keeps_kind() {
        let err = SessionError::from(&crate::Error::EncoderCrashed { code: Some(1) });
        assert_eq!(err.kind, ErrorKind::EncoderCrashed);
        assert_eq!(err.to_string(), "encoder_crashed: Encoder crashed (exit code 1)");
    }
}
