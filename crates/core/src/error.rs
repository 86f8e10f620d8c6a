//! Error types for the session engine.
//!
//! [`CoreError`] is what the instruction core hands back when `execute` stops for
//! a reason other than a suspend request. [`SessionError`] covers everything an
//! engine operation can fail with.

use std::io;

use thiserror::Error;

use crate::ResetType;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Control-flow results of the instruction core.
///
/// These never travel past the stepper loop or `execute_incremental`; both
/// dispatch them in one place.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// The firmware (or a dialog answered with "Reset") asked for a reset.
    #[error("reset requested: {message}")]
    Reset { kind: ResetType, message: String },

    /// Stop and hand control to the debugger.
    #[error("entering debugger")]
    EnterDebugger,

    /// Anything else. Treated as a broken invariant and swallowed at the top level.
    #[error("processor fault: {0}")]
    Fault(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("session encoding failed: {0}")]
    Encode(#[from] bincode::Error),

    #[error("invalid session file (bad magic)")]
    InvalidMagic,

    #[error("unsupported session file version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("session file truncated")]
    Truncated,

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("another session is already active")]
    AlreadyActive,

    #[error("session has not been initialized")]
    NotInitialized,

    #[error("session has already been initialized")]
    AlreadyInitialized,

    #[error("{subsystem}: {message}")]
    Subsystem {
        subsystem: &'static str,
        message: String,
    },

    #[error("deferred action failed: {0}")]
    Action(String),

    #[error("fuzz controller: {0}")]
    Fuzz(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SessionError {
    pub fn subsystem(subsystem: &'static str, message: impl Into<String>) -> Self {
        SessionError::Subsystem {
            subsystem,
            message: message.into(),
        }
    }
}
