//! The emulation session.
//!
//! A [`Session`] owns the stepper thread and derefs to the [`SessionContext`]
//! every collaborator is handed. All mutable engine bookkeeping lives in
//! [`Shared`], guarded by one coordination lock and condition variable. A
//! second, independent lock/condition pair exists only so the controller can
//! wake a stepper that went to sleep waiting for a hardware timer.
//!
//! Submodules:
//!
//! - [`coordinator`]: `suspend_thread` / `resume_thread`, the run loop, sleep and wake
//! - [`execute`]: `execute_incremental`, `execute_subroutine`, core error dispatch
//! - [`dialog`]: the modal dialog bridge
//! - [`checkpoint`]: `execute_special` and the one-shot schedulers
//! - [`lifecycle`]: initialize, reset, save, load, dispose
//! - [`input`]: button, key and pen queues

pub mod checkpoint;
pub mod coordinator;
pub mod dialog;
pub mod execute;
pub mod input;
pub mod lifecycle;

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{JoinHandle, ThreadId};

use tracing::debug;

use crate::breaks::BreakRegistry;
use crate::collaborators::{
    Collaborators, Device, DialogItem, EventReplay, FuzzController, Hal, InstructionCore,
    MemorySubsystem, Minimizer, Subsystem,
};
use crate::config::{Configuration, EngineOptions};
use crate::deferred::DeferredQueue;
use crate::error::{Result, SessionError};
use crate::events::{ButtonEvent, ButtonPacer, EventQueue, KeyEvent, PenQueue};
use crate::suspend::SuspendState;
use crate::ResetType;

pub use coordinator::{SessionStopper, StopHow};
pub use dialog::DialogRequest;

/// Set while a session is alive. At most one exists per process.
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// What the stepper is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Suspended,
    Running,
    BlockedOnUi,
}

/// Scheduled one-shot work, consumed by the checkpoint.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Scheduled {
    pub reset: Option<ResetType>,
    pub reset_banks: bool,
    pub auto_save_state: bool,
    pub save_root_state: bool,
    pub save_suspended_state: bool,
    pub load_root_state: bool,
    pub next_gremlin_from_root: bool,
    pub next_gremlin_from_suspended: bool,
    pub minimize_load_state: bool,
}

/// Bookkeeping guarded by the coordination lock.
pub(crate) struct Shared {
    pub suspend: SuspendState,
    pub state: SessionState,
    pub stop: bool,
    pub break_on_sys_call: bool,
    pub nest_level: u32,
    pub scheduled: Scheduled,
    pub deferred: DeferredQueue,
    /// Set while the checkpoint drains `deferred`
    pub draining: bool,
    pub buttons: EventQueue<ButtonEvent>,
    pub keys: EventQueue<KeyEvent>,
    pub pens: PenQueue,
    pub pacer: ButtonPacer,
    /// Button mask held down by the last reset
    pub boot_keys: u16,
    pub need_post_load: bool,
    pub disposed: bool,
    pub dialog_next_id: u64,
    pub dialog_result: Option<(u64, DialogItem)>,
    pub stepper: Option<ThreadId>,
}

impl Shared {
    fn new(options: &EngineOptions) -> Self {
        Shared {
            suspend: SuspendState::new(),
            state: SessionState::Stopped,
            stop: false,
            break_on_sys_call: false,
            nest_level: 0,
            scheduled: Scheduled::default(),
            deferred: DeferredQueue::new(),
            draining: false,
            buttons: EventQueue::new(options.queue_capacity),
            keys: EventQueue::new(options.queue_capacity),
            pens: PenQueue::new(options.queue_capacity),
            pacer: ButtonPacer::new(options.button_spacing),
            boot_keys: 0,
            need_post_load: false,
            disposed: false,
            dialog_next_id: 1,
            dialog_result: None,
            stepper: None,
        }
    }
}

/// The coordination lock and its condition.
pub(crate) struct Coordination {
    shared: Mutex<Shared>,
    cond: Condvar,
}

impl Coordination {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, Shared>) -> MutexGuard<'a, Shared> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self) {
        self.cond.notify_all();
    }
}

/// Sub-systems in initialization order.
pub(crate) struct Subsystems {
    pub memory: Box<dyn MemorySubsystem>,
    pub platform: Box<dyn Subsystem>,
    pub debugger: Box<dyn Subsystem>,
    pub host: Box<dyn Subsystem>,
    pub screen: Box<dyn Subsystem>,
    pub errors: Box<dyn Subsystem>,
}

impl Subsystems {
    /// Everything after memory, in initialization order.
    pub fn rest(&mut self) -> [&mut Box<dyn Subsystem>; 5] {
        [
            &mut self.platform,
            &mut self.debugger,
            &mut self.host,
            &mut self.screen,
            &mut self.errors,
        ]
    }
}

/// State shared between the controller, the stepper and the collaborators.
pub struct SessionContext {
    coord: Arc<Coordination>,
    /// Pending-wake flag for the sleeping stepper
    sleep_lock: Mutex<bool>,
    sleep_cond: Condvar,
    core: OnceLock<Arc<dyn InstructionCore>>,
    configuration: OnceLock<Configuration>,
    subsystems: Mutex<Subsystems>,
    device: Box<dyn Device>,
    hal: Arc<dyn Hal>,
    fuzz: Option<Arc<dyn FuzzController>>,
    minimizer: Option<Arc<dyn Minimizer>>,
    replay: Option<Arc<dyn EventReplay>>,
    breaks: Mutex<BreakRegistry>,
    dialogs: Mutex<Option<Sender<DialogRequest>>>,
    dialog_rx: Mutex<Option<Receiver<DialogRequest>>>,
    file: Mutex<Option<PathBuf>>,
    options: EngineOptions,
}

impl SessionContext {
    fn new(options: EngineOptions, parts: Collaborators) -> Self {
        let (tx, rx) = mpsc::channel();
        SessionContext {
            coord: Arc::new(Coordination {
                shared: Mutex::new(Shared::new(&options)),
                cond: Condvar::new(),
            }),
            sleep_lock: Mutex::new(false),
            sleep_cond: Condvar::new(),
            core: OnceLock::new(),
            configuration: OnceLock::new(),
            subsystems: Mutex::new(Subsystems {
                memory: parts.memory,
                platform: parts.platform,
                debugger: parts.debugger,
                host: parts.host,
                screen: parts.screen,
                errors: parts.errors,
            }),
            device: parts.device,
            hal: parts.hal,
            fuzz: parts.fuzz,
            minimizer: parts.minimizer,
            replay: parts.replay,
            breaks: Mutex::new(BreakRegistry::new()),
            dialogs: Mutex::new(Some(tx)),
            dialog_rx: Mutex::new(Some(rx)),
            file: Mutex::new(None),
            options,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.coord.lock()
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, Shared>) -> MutexGuard<'a, Shared> {
        self.coord.wait(guard)
    }

    pub(crate) fn notify(&self) {
        self.coord.notify();
    }

    pub(crate) fn subsystems(&self) -> MutexGuard<'_, Subsystems> {
        self.subsystems.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn breaks(&self) -> MutexGuard<'_, BreakRegistry> {
        self.breaks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The instruction core, once `initialize` has built it.
    pub fn core(&self) -> Result<Arc<dyn InstructionCore>> {
        self.core.get().cloned().ok_or(SessionError::NotInitialized)
    }

    /// Hint the core that a suspend or scheduled flag changed.
    pub(crate) fn hint_core(&self) {
        if let Some(core) = self.core.get() {
            core.check_after_cycle();
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.configuration.get()
    }

    /// File this session was created from or last saved to.
    pub fn file(&self) -> Option<PathBuf> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_file(&self, path: Option<PathBuf>) {
        *self.file.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn suspend_state(&self) -> SuspendState {
        self.lock().suspend
    }

    /// Overwrite the whole suspend aggregate.
    pub fn set_suspend_state(&self, suspend: SuspendState) {
        self.lock().suspend = suspend;
        self.notify();
    }

    /// Whether the core should stop at the next system-call boundary.
    pub fn break_on_sys_call(&self) -> bool {
        self.lock().break_on_sys_call
    }

    pub fn is_nested(&self) -> bool {
        self.lock().nest_level > 0
    }

    /// True on the stepper thread.
    pub fn in_cpu_thread(&self) -> bool {
        self.lock().stepper == Some(std::thread::current().id())
    }

    pub fn need_post_load(&self) -> bool {
        self.lock().need_post_load
    }

    pub fn set_need_post_load(&self, need: bool) {
        self.lock().need_post_load = need;
    }

    /// Input is only accepted while no automated input source is driving the device.
    pub(crate) fn can_bother_cpu(&self) -> bool {
        if self.fuzz.as_ref().is_some_and(|f| f.is_on()) {
            return false;
        }
        if self.replay.as_ref().is_some_and(|r| r.is_replaying()) {
            return false;
        }
        if self.minimizer.as_ref().is_some_and(|m| m.is_on()) {
            return false;
        }
        true
    }
}

/// The single active session.
pub struct Session {
    ctx: Arc<SessionContext>,
    thread: Option<JoinHandle<()>>,
}

impl Session {
    /// Build a session around its collaborators. Fails if one is already active.
    pub fn new(options: EngineOptions, collaborators: Collaborators) -> Result<Session> {
        if ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::AlreadyActive);
        }
        debug!(threading = ?options.threading, "session created");
        Ok(Session {
            ctx: Arc::new(SessionContext::new(options, collaborators)),
            thread: None,
        })
    }

    /// Shared context handed to collaborators.
    pub fn context(&self) -> Arc<SessionContext> {
        self.ctx.clone()
    }

    /// Receiving end of the dialog channel. The controller must drain it
    /// while a threaded session runs; only the first call returns it.
    pub fn take_dialog_receiver(&self) -> Option<Receiver<DialogRequest>> {
        self.ctx
            .dialog_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Deref for Session {
    type Target = SessionContext;

    fn deref(&self) -> &SessionContext {
        &self.ctx
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy_thread();
        self.ctx.dispose();
        ACTIVE.store(false, Ordering::Release);
        debug!("session destroyed");
    }
}
