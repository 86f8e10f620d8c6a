//! Create, reset, save, load and dispose.
//!
//! Sub-systems are always visited in initialization order: memory, the
//! instruction core, then platform, debugger, host control, screen and error
//! reporting. Memory comes before the core on reset and load because the
//! core reads its reset vector (and sanity-checks its PC) through memory.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::SessionContext;
use crate::breaks::{DataAccess, DataBreakHandlers, InstructionBreakHandlers};
use crate::config::{Configuration, FirmwareSource};
use crate::error::{Result, SessionError};
use crate::events::Button;
use crate::session_file::{self, SessionImage, SessionReader, SessionWriter};
use crate::suspend::SuspendReason;
use crate::{ResetKind, ResetType};

/// Buttons that can be held down across a reset.
const BOOT_KEYS: [Button; 3] = [Button::Power, Button::PageDown, Button::PageUp];

impl SessionContext {
    /// Build the core and bring every sub-system up for `config`.
    pub fn initialize(&self, config: Configuration) -> Result<()> {
        if self.configuration.get().is_some() {
            return Err(SessionError::AlreadyInitialized);
        }
        info!(device = %config.device, ram_size_kb = config.ram_size_kb, "initializing session");

        let core = self.device.create_core(&config)?;
        let rom = config.firmware.read()?;

        {
            let mut subs = self.subsystems();
            subs.memory.initialize(&config)?;
            subs.memory.load_firmware(rom, config.ram_size_kb)?;
            for subsystem in subs.rest() {
                subsystem.initialize(&config)?;
                debug!(subsystem = subsystem.name(), "initialized");
            }
        }

        self.core.set(core).map_err(|_| SessionError::AlreadyInitialized)?;
        self.configuration.set(config).map_err(|_| SessionError::AlreadyInitialized)?;
        Ok(())
    }

    /// Start a fresh session from `config`.
    pub fn create_new(&self, config: Configuration) -> Result<()> {
        self.initialize(config)?;
        self.reset(ResetKind::Soft)
    }

    /// Start a session for an emulator bound to one device, with the ROM
    /// embedded in `config`. An attached image is resumed, otherwise the
    /// device boots fresh.
    pub fn create_bound(&self, config: Configuration, image: Option<SessionImage>) -> Result<()> {
        debug_assert!(matches!(config.firmware, FirmwareSource::Embedded(_)));
        self.initialize(config)?;
        match image {
            Some(image) => self.load_image(image),
            None => self.reset(ResetKind::Soft),
        }
    }

    /// Resume the session saved in `path`.
    pub fn create_old(&self, path: &Path) -> Result<()> {
        let image = session_file::load_from_file(path)?;
        self.initialize(image.configuration.clone())?;
        self.load_image(image)?;
        self.set_file(Some(path.to_path_buf()));
        Ok(())
    }

    /// Reset every sub-system. Must not be called while nested.
    ///
    /// A `System` reset keeps the input queues: it can happen in the middle
    /// of a boot sequence that still has to see a pending button-up.
    pub fn reset(&self, reset_type: impl Into<ResetType>) -> Result<()> {
        let reset_type = reset_type.into();
        debug_assert_eq!(self.lock().nest_level, 0);
        info!(kind = ?reset_type.kind, no_extensions = reset_type.no_extensions, "resetting session");

        if let Some(fuzz) = &self.fuzz {
            if fuzz.is_on() {
                fuzz.save_events()?;
            }
        }

        let hardware = reset_type.is_hardware();
        let core = self.core()?;
        {
            let mut subs = self.subsystems();
            subs.memory.reset(hardware)?;
            core.reset(hardware);
            for subsystem in subs.rest() {
                subsystem.reset(hardware)?;
            }
        }

        let mut boot_keys = 0u16;
        match reset_type.kind {
            ResetKind::Hard => boot_keys |= Button::Power.mask(),
            ResetKind::Debug => boot_keys |= Button::PageDown.mask(),
            ResetKind::System | ResetKind::Soft => {}
        }
        if reset_type.no_extensions {
            boot_keys |= Button::PageUp.mask();
        }

        {
            let mut shared = self.lock();
            shared.suspend.clear(SuspendReason::Debugger);
            shared.suspend.clear(SuspendReason::External);
            shared.suspend.clear(SuspendReason::SysCall);
            shared.suspend.clear(SuspendReason::SubroutineReturn);
            shared.break_on_sys_call = false;
            shared.nest_level = 0;
            shared.scheduled = Default::default();
            shared.deferred.clear();

            if hardware {
                shared.buttons.clear();
                shared.keys.clear();
                shared.pens.clear();
            }
            shared.pens.forget_last();
            shared.boot_keys = boot_keys;
        }
        self.notify();

        // Reset wipes break metadata out of memory.
        let breaks = self.breaks().clone();
        breaks.install_instruction_breaks();
        breaks.install_data_breaks();

        for button in BOOT_KEYS {
            if boot_keys & button.mask() != 0 {
                self.hal.button_event(button, true);
            }
        }
        Ok(())
    }

    /// Release the buttons the last reset held down.
    pub fn release_boot_keys(&self) {
        let boot_keys = std::mem::take(&mut self.lock().boot_keys);
        for button in BOOT_KEYS {
            if boot_keys & button.mask() != 0 {
                self.hal.button_event(button, false);
            }
        }
    }

    /// Capture the whole session in memory.
    pub fn save_image(&self) -> Result<SessionImage> {
        let config = self.configuration().cloned().ok_or(SessionError::NotInitialized)?;
        let core = self.core()?;

        let mut writer = SessionWriter::new(config);
        core.save(&mut writer)?;
        let mut subs = self.subsystems();
        subs.memory.save(&mut writer)?;
        for subsystem in subs.rest() {
            subsystem.save(&mut writer)?;
        }
        Ok(writer.finish())
    }

    /// Restore from an image. If any part vetoes the reload the session is
    /// soft-reset instead.
    pub fn load_image(&self, image: SessionImage) -> Result<()> {
        let core = self.core()?;
        let mut reader = SessionReader::new(image);
        {
            let mut subs = self.subsystems();
            subs.memory.load(&mut reader)?;
            core.load(&mut reader)?;
            for subsystem in subs.rest() {
                subsystem.load(&mut reader)?;
            }
        }

        if reader.can_reload() {
            self.set_need_post_load(true);
        } else {
            info!("saved session cannot be resumed, performing a soft reset");
            self.reset(ResetKind::Soft)?;
            self.set_need_post_load(false);
        }
        Ok(())
    }

    /// Save to `path`. With `update_file` the session remembers it.
    pub fn save(&self, path: &Path, update_file: bool) -> Result<()> {
        let image = self.save_image()?;
        session_file::save_to_file(&image, path)?;
        if update_file {
            self.set_file(Some(path.to_path_buf()));
        }
        info!(path = %path.display(), "session saved");
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        let image = session_file::load_from_file(path)?;
        self.load_image(image)?;
        info!(path = %path.display(), "session loaded");
        Ok(())
    }

    /// Tear down sub-systems in reverse initialization order. Idempotent.
    pub fn dispose(&self) {
        {
            let mut shared = self.lock();
            if shared.disposed {
                return;
            }
            shared.disposed = true;
            shared.deferred.clear();
        }

        self.breaks().clear();

        let mut subs = self.subsystems();
        for subsystem in subs.rest().into_iter().rev() {
            subsystem.dispose();
        }
        subs.memory.dispose();
        debug!("session disposed");
    }

    pub fn add_instruction_break_handlers(&self, handlers: Arc<dyn InstructionBreakHandlers>) {
        self.breaks().add_instruction(handlers);
    }

    pub fn add_data_break_handlers(&self, handlers: Arc<dyn DataBreakHandlers>) {
        self.breaks().add_data(handlers);
    }

    pub fn install_instruction_breaks(&self) {
        let breaks = self.breaks().clone();
        breaks.install_instruction_breaks();
    }

    pub fn remove_instruction_breaks(&self) {
        let breaks = self.breaks().clone();
        breaks.remove_instruction_breaks();
    }

    /// Called by the core when it hits an instruction break.
    pub fn handle_instruction_break(&self) {
        let breaks = self.breaks().clone();
        breaks.handle_instruction_break();
    }

    pub fn install_data_breaks(&self) {
        let breaks = self.breaks().clone();
        breaks.install_data_breaks();
    }

    pub fn remove_data_breaks(&self) {
        let breaks = self.breaks().clone();
        breaks.remove_data_breaks();
    }

    /// Called by the core when it hits a data break.
    pub fn handle_data_break(&self, access: DataAccess) {
        let breaks = self.breaks().clone();
        breaks.handle_data_break(access);
    }
}
