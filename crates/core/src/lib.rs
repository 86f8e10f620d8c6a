//! # handheld-core
//!
//! Execution and session engine for a handheld device emulator.
//!
//! The engine owns the emulated processor's run/suspend lifecycle. A
//! controller (UI or host) thread and a stepper thread that drives the
//! instruction core coordinate through one lock and condition variable;
//! suspend requests, nested calls into the processor, synthetic input,
//! deferred side effects and session persistence all go through it.
//!
//! ## Architecture
//!
//! - [`Session`] - The single active session; owns the stepper thread
//! - [`SessionContext`] - Shared engine state handed to every collaborator
//! - [`suspend`] - The six-reason suspend aggregate
//! - [`events`] - Bounded button, key and pen queues with pacing and dedup
//! - [`deferred`] - One-shot actions run at the next checkpoint
//! - [`breaks`] - Instruction and data break handler registry
//! - [`session_file`] - Compressed session file format
//! - [`collaborators`] - Traits for the instruction core, sub-systems, HAL and fuzzing tools
//!
//! ## Threading
//!
//! With [`ThreadingModel::Threaded`] a dedicated thread runs the core and the
//! controller talks to it through `suspend_thread` / `resume_thread`. With
//! [`ThreadingModel::Cooperative`] there is no stepper thread; the controller
//! calls `execute_incremental` itself. Session state moves through the same
//! values in both models.

pub mod breaks;
pub mod collaborators;
pub mod config;
pub mod deferred;
pub mod error;
pub mod events;
pub mod session;
pub mod session_file;
pub mod suspend;

#[cfg(test)]
mod testing;

pub use collaborators::{
    Collaborators, Device, DialogItem, DialogRunner, EventReplay, FuzzController, Hal,
    InstructionCore, MemorySubsystem, Minimizer, Subsystem,
};
pub use config::{Configuration, EngineOptions, FirmwareSource, ThreadingModel};
pub use deferred::DeferredAction;
pub use error::{CoreError, Result, SessionError};
pub use events::{Button, ButtonEvent, KeyEvent, PenEvent};
pub use session::{DialogRequest, Session, SessionContext, SessionState, SessionStopper, StopHow};
pub use suspend::{SuspendReason, SuspendState};

/// Kind of reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetKind {
    /// Warm reset issued by the firmware itself. Input queues survive it.
    System,
    Soft,
    /// Power held down during boot
    Hard,
    /// Page-down held down during boot
    Debug,
}

/// A reset kind plus the "no extensions" modifier (page-up held down).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResetType {
    pub kind: ResetKind,
    pub no_extensions: bool,
}

impl ResetType {
    pub fn new(kind: ResetKind) -> Self {
        ResetType { kind, no_extensions: false }
    }

    pub fn without_extensions(kind: ResetKind) -> Self {
        ResetType { kind, no_extensions: true }
    }

    /// Everything except a system reset resets the hardware too.
    pub fn is_hardware(&self) -> bool {
        self.kind != ResetKind::System
    }
}

impl From<ResetKind> for ResetType {
    fn from(kind: ResetKind) -> Self {
        ResetType::new(kind)
    }
}
