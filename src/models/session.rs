use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use uuid::Uuid;

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Capturing,
}

const IDLE: u8 = 0;
const CAPTURING: u8 = 1;

/// Compare-and-set authority over the session state.
///
/// Only the controller transitions it; the worker and API read it.
#[derive(Debug)]
pub struct SessionFlag(AtomicU8);

impl SessionFlag {
    pub fn new() -> Self {
        Self(AtomicU8::new(IDLE))
    }

    pub fn current(&self) -> SessionState {
        match self.0.load(Ordering::SeqCst) {
            CAPTURING => SessionState::Capturing,
            _ => SessionState::Idle,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.current() == SessionState::Capturing
    }

    /// Idle -> Capturing; false if another caller already won
    pub fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(IDLE, CAPTURING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Capturing -> Idle; false if already idle
    pub fn try_end(&self) -> bool {
        self.0
            .compare_exchange(CAPTURING, IDLE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for SessionFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Notifications published by the controller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum SessionEvent {
    #[serde(rename = "started")]
    Started { session_id: Uuid, interface: String },

    #[serde(rename = "stopped")]
    Stopped { session_id: Option<Uuid> },

    #[serde(rename = "open_failed")]
    OpenFailed { interface: String, reason: String },
}
