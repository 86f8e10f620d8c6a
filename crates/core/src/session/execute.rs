//! Calling into the instruction core.

use std::sync::{Arc, MutexGuard};

use tracing::{debug, error, warn};

use super::{SessionContext, SessionState, Shared};
use crate::collaborators::InstructionCore;
use crate::error::{CoreError, Result};
use crate::suspend::{SuspendReason, SuspendState};

impl SessionContext {
    /// Run the core once with the state set to `Running`, the lock released.
    pub(crate) fn call_cpu<'a>(
        &'a self,
        core: &Arc<dyn InstructionCore>,
        mut shared: MutexGuard<'a, Shared>,
    ) -> (MutexGuard<'a, Shared>, std::result::Result<(), CoreError>) {
        let old_state = std::mem::replace(&mut shared.state, SessionState::Running);
        drop(shared);

        let result = core.execute(self);

        let mut shared = self.lock();
        shared.state = old_state;
        (shared, result)
    }

    /// Top-level handling of a core error. Nothing gets past this point.
    pub(crate) fn dispatch_core_error(&self, err: CoreError) {
        match err {
            CoreError::Reset { kind, message } => {
                warn!(?kind, %message, "reset requested by the processor");
                if let Err(err) = self.reset(kind) {
                    error!(%err, "requested reset failed");
                }
            }
            CoreError::EnterDebugger => {
                debug!("processor entered the debugger");
                self.schedule_suspend_exception();
            }
            CoreError::Fault(message) => {
                error!(%message, "unhandled processor fault");
            }
        }
    }

    /// One slice of execution when there is no stepper thread.
    ///
    /// Does nothing while blocked on a dialog or while any suspend reason is
    /// raised. Never returns an error: requested resets are performed here.
    pub fn execute_incremental(&self) {
        let core = match self.core() {
            Ok(core) => core,
            Err(err) => {
                error!(%err, "execute_incremental without an instruction core");
                return;
            }
        };

        {
            let mut shared = self.lock();
            shared.suspend.clear(SuspendReason::Timeout);
            debug_assert_eq!(shared.nest_level, 0);
            if shared.state != SessionState::Suspended || shared.suspend.is_suspended() {
                return;
            }
        }

        if let Err(err) = self.execute_special(false) {
            warn!(%err, "checkpoint failed");
        }

        let shared = self.lock();
        if shared.suspend.is_suspended() {
            return;
        }
        let (shared, result) = self.call_cpu(&core, shared);
        debug_assert!(!shared.suspend.is_raised(SuspendReason::SubroutineReturn));
        drop(shared);

        if let Err(err) = result {
            self.dispatch_core_error(err);
        }
    }

    /// Run the core until the synthetic call returns.
    ///
    /// Suspend requests raised while nested (controller, external, timeout)
    /// are carried back to the outer aggregate so their owners still see them
    /// pending. The loop ends on a subroutine return or a debugger request.
    pub fn execute_subroutine(&self) -> Result<()> {
        debug_assert!(
            self.in_cpu_thread() || self.state() != SessionState::Running,
            "nested call while the stepper is running"
        );
        let core = self.core()?;

        let mut shared = self.lock();
        let mut outer = shared.suspend.snapshot();
        shared.suspend = SuspendState::new();

        while !shared.suspend.is_suspended() && !shared.stop {
            shared.nest_level += 1;
            self.notify();

            let (guard, result) = self.call_cpu(&core, shared);
            shared = guard;
            shared.nest_level -= 1;

            shared.suspend.fold_into(&mut outer);

            if let Err(err) = result {
                shared.suspend.restore(outer);
                shared.suspend.clamp_external();
                self.notify();
                return Err(err.into());
            }
        }

        shared.suspend.restore(outer);
        shared.suspend.clamp_external();
        self.notify();
        Ok(())
    }
}
