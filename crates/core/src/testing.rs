//! Test doubles for the engine's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::breaks::{DataAccess, DataBreakHandlers, InstructionBreakHandlers};
use crate::collaborators::{
    Collaborators, Device, FuzzController, Hal, InstructionCore, MemorySubsystem, Subsystem,
};
use crate::config::{Configuration, EngineOptions, FirmwareSource, ThreadingModel};
use crate::error::{CoreError, Result, SessionError};
use crate::events::Button;
use crate::session::{Session, SessionContext};
use crate::session_file::{SessionReader, SessionWriter};

/// Sessions are process-wide singletons; tests that build one take this first.
pub(crate) fn serial() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn config() -> Configuration {
    Configuration {
        device: "test-device".into(),
        ram_size_kb: 16,
        firmware: FirmwareSource::Embedded(vec![0x4E, 0x71, 0x4E, 0x75]),
    }
}

/// Shared, ordered record of collaborator calls.
#[derive(Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == entry)
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// One scripted action of [`ScriptedCore`].
pub(crate) enum Step {
    /// Stop here if the engine is waiting for a system call.
    SysCall,
    /// Finish the current synthetic subroutine call.
    Return,
    /// Leave `execute` with an error.
    Fail(CoreError),
    Run(Box<dyn FnOnce(&SessionContext) + Send>),
}

impl Step {
    pub fn run(f: impl FnOnce(&SessionContext) + Send + 'static) -> Step {
        Step::Run(Box::new(f))
    }
}

#[derive(Clone, Default)]
pub(crate) struct Script(Arc<Mutex<VecDeque<Step>>>);

impl Script {
    pub fn push(&self, step: Step) {
        self.0.lock().unwrap().push_back(step);
    }

    fn pop(&self) -> Option<Step> {
        self.0.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Instruction core that plays back a [`Script`].
///
/// With nothing scripted it idles: sleeping in a threaded session, raising
/// the timeout reason in a cooperative one so `execute` returns.
pub(crate) struct ScriptedCore {
    script: Script,
    log: Log,
    pc: AtomicU32,
    pub veto_load: AtomicBool,
}

impl InstructionCore for ScriptedCore {
    fn execute(&self, session: &SessionContext) -> std::result::Result<(), CoreError> {
        loop {
            if session.check_for_break() {
                return Ok(());
            }
            match self.script.pop() {
                Some(Step::SysCall) => {
                    if session.break_on_sys_call() {
                        session.schedule_suspend_sys_call();
                    }
                }
                Some(Step::Return) => session.schedule_suspend_subroutine_return(),
                Some(Step::Fail(err)) => return Err(err),
                Some(Step::Run(f)) => f(session),
                None => match session.options().threading {
                    ThreadingModel::Threaded => session.sleep(Duration::from_millis(1)),
                    ThreadingModel::Cooperative => session.schedule_suspend_timeout(),
                },
            }
            self.pc.fetch_add(2, Ordering::Relaxed);
        }
    }

    fn reset(&self, hardware: bool) {
        self.pc.store(0, Ordering::Relaxed);
        self.log.push(format!("core.reset({})", hardware));
    }

    fn save(&self, writer: &mut SessionWriter) -> Result<()> {
        writer.write("cpu", &self.pc.load(Ordering::Relaxed))?;
        Ok(())
    }

    fn load(&self, reader: &mut SessionReader) -> Result<()> {
        if let Some(pc) = reader.read::<u32>("cpu")? {
            self.pc.store(pc, Ordering::Relaxed);
        }
        if self.veto_load.load(Ordering::SeqCst) {
            reader.set_can_reload(false);
        }
        self.log.push("core.load");
        Ok(())
    }
}

struct TestDevice {
    core: Arc<ScriptedCore>,
}

impl Device for TestDevice {
    fn create_core(&self, _config: &Configuration) -> Result<Arc<dyn InstructionCore>> {
        Ok(self.core.clone())
    }
}

/// Sub-system that logs every lifecycle call.
pub(crate) struct Recorder {
    name: &'static str,
    log: Log,
}

impl Subsystem for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn initialize(&mut self, _config: &Configuration) -> Result<()> {
        self.log.push(format!("{}.initialize", self.name));
        Ok(())
    }

    fn reset(&mut self, hardware: bool) -> Result<()> {
        self.log.push(format!("{}.reset({})", self.name, hardware));
        Ok(())
    }

    fn save(&mut self, writer: &mut SessionWriter) -> Result<()> {
        writer.write(self.name, &self.name.to_string())
    }

    fn load(&mut self, _reader: &mut SessionReader) -> Result<()> {
        self.log.push(format!("{}.load", self.name));
        Ok(())
    }

    fn dispose(&mut self) {
        self.log.push(format!("{}.dispose", self.name));
    }
}

pub(crate) struct RecordingMemory {
    log: Log,
    rom: Vec<u8>,
    fail_reset: Arc<AtomicBool>,
}

impl Subsystem for RecordingMemory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn initialize(&mut self, _config: &Configuration) -> Result<()> {
        self.log.push("memory.initialize");
        Ok(())
    }

    fn reset(&mut self, hardware: bool) -> Result<()> {
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err(SessionError::subsystem("memory", "bank table corrupt"));
        }
        self.log.push(format!("memory.reset({})", hardware));
        Ok(())
    }

    fn save(&mut self, writer: &mut SessionWriter) -> Result<()> {
        writer.write("memory", &self.rom)
    }

    fn load(&mut self, reader: &mut SessionReader) -> Result<()> {
        if let Some(rom) = reader.read::<Vec<u8>>("memory")? {
            self.rom = rom;
        }
        self.log.push("memory.load");
        Ok(())
    }

    fn dispose(&mut self) {
        self.log.push("memory.dispose");
    }
}

impl MemorySubsystem for RecordingMemory {
    fn load_firmware(&mut self, rom: Vec<u8>, _ram_size_kb: u32) -> Result<()> {
        self.rom = rom;
        self.log.push("memory.load_firmware");
        Ok(())
    }

    fn reset_bank_handlers(&mut self) {
        self.log.push("memory.reset_bank_handlers");
    }
}

#[derive(Default)]
pub(crate) struct HalRecorder {
    events: Mutex<Vec<(Button, bool)>>,
}

impl HalRecorder {
    pub fn events(&self) -> Vec<(Button, bool)> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Hal for HalRecorder {
    fn button_event(&self, button: Button, pressed: bool) {
        self.events.lock().unwrap().push((button, pressed));
    }
}

#[derive(Default)]
pub(crate) struct FuzzRecorder {
    pub on: AtomicBool,
    pub root_available: AtomicBool,
    pub fail_auto_save: AtomicBool,
    pub log: Log,
}

impl FuzzController for FuzzRecorder {
    fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    fn save_events(&self) -> Result<()> {
        self.log.push("save_events");
        Ok(())
    }

    fn auto_save_state(&self, _session: &SessionContext) -> Result<()> {
        self.log.push("auto_save_state");
        if self.fail_auto_save.load(Ordering::SeqCst) {
            return Err(SessionError::Fuzz("disk full".into()));
        }
        Ok(())
    }

    fn save_root_state(&self, session: &SessionContext) -> Result<()> {
        session.save_image()?;
        self.log.push("save_root_state");
        Ok(())
    }

    fn save_suspended_state(&self, _session: &SessionContext) -> Result<()> {
        self.log.push("save_suspended_state");
        Ok(())
    }

    fn load_root_state(&self, _session: &SessionContext) -> Result<bool> {
        self.log.push("load_root_state");
        Ok(self.root_available.load(Ordering::SeqCst))
    }

    fn load_suspended_state(&self, _session: &SessionContext) -> Result<bool> {
        self.log.push("load_suspended_state");
        Ok(false)
    }

    fn start_gremlin_from_loaded_root_state(&self) -> Result<()> {
        self.log.push("start_gremlin_from_loaded_root_state");
        Ok(())
    }

    fn start_gremlin_from_loaded_suspended_state(&self) -> Result<()> {
        self.log.push("start_gremlin_from_loaded_suspended_state");
        Ok(())
    }

    fn turn_off(&self) {
        self.on.store(false, Ordering::SeqCst);
        self.log.push("turn_off");
    }
}

/// Break handler set that logs install, remove and hits.
#[derive(Default)]
pub(crate) struct BreakRecorder {
    pub log: Log,
}

impl InstructionBreakHandlers for BreakRecorder {
    fn install(&self) {
        self.log.push("install");
    }

    fn remove(&self) {
        self.log.push("remove");
    }

    fn reached(&self) {
        self.log.push("reached");
    }
}

impl DataBreakHandlers for BreakRecorder {
    fn install(&self) {
        self.log.push("data-install");
    }

    fn remove(&self) {
        self.log.push("data-remove");
    }

    fn reached(&self, _access: DataAccess) {
        self.log.push("data");
    }
}

/// Collaborators plus handles the test keeps after handing them over.
pub(crate) struct Parts {
    pub collaborators: Collaborators,
    pub script: Script,
    pub log: Log,
    pub core: Arc<ScriptedCore>,
    pub hal: Arc<HalRecorder>,
    pub fuzz: Arc<FuzzRecorder>,
    /// Makes the memory sub-system's reset fail
    pub memory_fails: Arc<AtomicBool>,
}

impl Parts {
    pub fn new() -> Self {
        let script = Script::default();
        let log = Log::default();
        let core = Arc::new(ScriptedCore {
            script: script.clone(),
            log: log.clone(),
            pc: AtomicU32::new(0),
            veto_load: AtomicBool::new(false),
        });
        let hal = Arc::new(HalRecorder::default());
        let fuzz = Arc::new(FuzzRecorder::default());
        let memory_fails = Arc::new(AtomicBool::new(false));
        let recorder = |name: &'static str| -> Box<dyn Subsystem> {
            Box::new(Recorder { name, log: log.clone() })
        };

        let collaborators = Collaborators {
            device: Box::new(TestDevice { core: core.clone() }),
            memory: Box::new(RecordingMemory {
                log: log.clone(),
                rom: Vec::new(),
                fail_reset: memory_fails.clone(),
            }),
            platform: recorder("platform"),
            debugger: recorder("debugger"),
            host: recorder("host"),
            screen: recorder("screen"),
            errors: recorder("errors"),
            hal: hal.clone(),
            fuzz: Some(fuzz.clone()),
            minimizer: None,
            replay: None,
        };

        Parts { collaborators, script, log, core, hal, fuzz, memory_fails }
    }
}

pub(crate) fn initialized_session_with(options: EngineOptions, parts: Parts) -> Session {
    let session = Session::new(options, parts.collaborators).unwrap();
    session.create_new(config()).unwrap();
    session
}

pub(crate) fn initialized_session(options: EngineOptions) -> Session {
    initialized_session_with(options, Parts::new())
}

pub(crate) fn running_session_with(options: EngineOptions, parts: Parts) -> Session {
    let mut session = initialized_session_with(options, parts);
    session.create_thread(false).unwrap();
    session
}

pub(crate) fn running_session(options: EngineOptions) -> Session {
    running_session_with(options, Parts::new())
}
