//! Interfaces of the components the engine drives but does not implement.
//!
//! The instruction core, the memory map, the device sub-systems, the HAL and
//! the fuzzing tools all live outside this crate. The engine only needs the
//! narrow control-flow surface described here.

use std::sync::Arc;

use crate::config::Configuration;
use crate::error::{CoreError, Result};
use crate::events::Button;
use crate::session::SessionContext;
use crate::session_file::{SessionReader, SessionWriter};

/// The instruction decode/execute core.
///
/// Methods take `&self`: the core is shared between the stepper and the
/// controller and must be re-entrant, since `execute` can reach back into the
/// engine (`execute_subroutine`, `block_on_dialog`) which in turn calls
/// `execute` again.
pub trait InstructionCore: Send + Sync {
    /// Run until [`SessionContext::check_for_break`] returns true or an error occurs.
    fn execute(&self, session: &SessionContext) -> std::result::Result<(), CoreError>;

    /// A suspend or scheduled flag changed; re-evaluate break conditions soon.
    fn check_after_cycle(&self) {}

    /// Reload registers from the reset vector. `hardware` is false for a
    /// system (warm) reset.
    fn reset(&self, hardware: bool);

    fn save(&self, _writer: &mut SessionWriter) -> Result<()> {
        Ok(())
    }

    fn load(&self, _reader: &mut SessionReader) -> Result<()> {
        Ok(())
    }
}

/// Factory for the instruction core of a device type.
pub trait Device: Send + Sync {
    fn create_core(&self, config: &Configuration) -> Result<Arc<dyn InstructionCore>>;
}

/// A device sub-system with the standard lifecycle.
pub trait Subsystem: Send {
    /// Record name used in session files.
    fn name(&self) -> &'static str;

    fn initialize(&mut self, _config: &Configuration) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self, _hardware: bool) -> Result<()> {
        Ok(())
    }

    fn save(&mut self, _writer: &mut SessionWriter) -> Result<()> {
        Ok(())
    }

    /// Restore state. Call `reader.set_can_reload(false)` when the record
    /// cannot be fully reconstituted.
    fn load(&mut self, _reader: &mut SessionReader) -> Result<()> {
        Ok(())
    }

    fn dispose(&mut self) {}
}

/// The memory map. Reset strictly before the instruction core.
pub trait MemorySubsystem: Subsystem {
    fn load_firmware(&mut self, rom: Vec<u8>, ram_size_kb: u32) -> Result<()>;

    /// Rebuild the bank dispatch table.
    fn reset_bank_handlers(&mut self);
}

/// Hardware abstraction used for synthesized button presses.
pub trait Hal: Send + Sync {
    fn button_event(&self, button: Button, pressed: bool);
}

/// The fuzzing ("gremlins") controller.
///
/// Every state transfer is requested through a `schedule_*` call on the
/// session and performed here from the checkpoint, outside the coordination
/// lock, so implementations may call [`SessionContext::save_image`] and
/// friends.
pub trait FuzzController: Send + Sync {
    fn is_on(&self) -> bool;

    /// Persist the pending input stream before a reset throws it away.
    fn save_events(&self) -> Result<()>;

    fn auto_save_state(&self, session: &SessionContext) -> Result<()>;
    fn save_root_state(&self, session: &SessionContext) -> Result<()>;
    fn save_suspended_state(&self, session: &SessionContext) -> Result<()>;

    /// Returns false when there is no root state to load.
    fn load_root_state(&self, session: &SessionContext) -> Result<bool>;
    /// Returns false when there is no suspended state to load.
    fn load_suspended_state(&self, session: &SessionContext) -> Result<bool>;

    fn start_gremlin_from_loaded_root_state(&self) -> Result<()>;
    fn start_gremlin_from_loaded_suspended_state(&self) -> Result<()>;

    fn turn_off(&self);
}

/// Event-log minimizer.
pub trait Minimizer: Send + Sync {
    fn is_on(&self) -> bool;
    fn load_initial_state(&self, session: &SessionContext) -> Result<()>;
}

/// Recorded-input playback.
pub trait EventReplay: Send + Sync {
    fn is_replaying(&self) -> bool;
}

/// Button pressed to dismiss a modal dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogItem {
    /// No selection (the session stopped before the dialog was answered).
    None,
    Ok,
    Cancel,
    Continue,
    Debug,
    Reset,
    Other(u16),
}

/// A modal dialog and its parameters, run on the controller side.
pub trait DialogRunner: Send {
    fn run(self: Box<Self>) -> DialogItem;
}

impl<F> DialogRunner for F
where
    F: FnOnce() -> DialogItem + Send,
{
    fn run(self: Box<Self>) -> DialogItem {
        (*self)()
    }
}

/// Everything a session is built from.
pub struct Collaborators {
    pub device: Box<dyn Device>,
    pub memory: Box<dyn MemorySubsystem>,
    pub platform: Box<dyn Subsystem>,
    pub debugger: Box<dyn Subsystem>,
    pub host: Box<dyn Subsystem>,
    pub screen: Box<dyn Subsystem>,
    pub errors: Box<dyn Subsystem>,
    pub hal: Arc<dyn Hal>,
    pub fuzz: Option<Arc<dyn FuzzController>>,
    pub minimizer: Option<Arc<dyn Minimizer>>,
    pub replay: Option<Arc<dyn EventReplay>>,
}
