//! Suspend/resume coordination between the controller and the stepper.

use std::sync::PoisonError;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::{Session, SessionContext, SessionState};
use crate::config::ThreadingModel;
use crate::error::Result;
use crate::suspend::{SuspendReason, SuspendState};

/// How `suspend_thread` should bring the stepper to a halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopHow {
    /// Do nothing.
    None,
    /// Stop as soon as possible. Blocked on a dialog counts as stopped.
    Now,
    /// Stop between two instructions. Blocked on a dialog does not count.
    OnNextCycle,
    /// Stop at the next system-call boundary.
    OnSysCall,
}

impl SessionContext {
    /// Halt the stepper.
    ///
    /// Returns true if the stepper is now held and the caller owes a
    /// matching [`resume_thread`](Self::resume_thread).
    pub fn suspend_thread(&self, how: StopHow) -> bool {
        if how == StopHow::None {
            return false;
        }

        let mut shared = self.lock();
        let desired_break_on_sys_call = how == StopHow::OnSysCall;
        if how != StopHow::OnSysCall {
            shared.suspend.raise(SuspendReason::Controller);
        }
        trace!(?how, state = ?shared.state, "suspend_thread");

        match self.options().threading {
            ThreadingModel::Threaded => {
                if shared.state == SessionState::Running {
                    self.wake();
                    while shared.state == SessionState::Running {
                        // Re-established every pass: a reset on the stepper clears it.
                        shared.break_on_sys_call = desired_break_on_sys_call;
                        self.notify();
                        shared = self.wait(shared);
                    }
                }
            }
            ThreadingModel::Cooperative => {
                shared.break_on_sys_call = desired_break_on_sys_call;
                shared.suspend.clear(SuspendReason::Timeout);
                while shared.state == SessionState::Suspended && !shared.suspend.is_suspended() {
                    drop(shared);
                    self.execute_incremental();
                    shared = self.lock();
                    shared.suspend.clear(SuspendReason::Timeout);
                }
            }
        }

        let stopped = match how {
            StopHow::None => false,
            StopHow::Now => matches!(
                shared.state,
                SessionState::Suspended | SessionState::BlockedOnUi
            ),
            StopHow::OnNextCycle => shared.state == SessionState::Suspended,
            StopHow::OnSysCall => {
                shared.state == SessionState::Suspended
                    && shared.suspend.is_raised(SuspendReason::SysCall)
            }
        };

        if how == StopHow::OnSysCall {
            if stopped {
                shared.suspend.raise(SuspendReason::Controller);
            }
        } else if !stopped {
            shared.suspend.lower(SuspendReason::Controller);
        }
        shared.break_on_sys_call = false;

        debug!(?how, stopped, state = ?shared.state, "stepper suspend request finished");
        stopped
    }

    /// Release one controller hold.
    pub fn resume_thread(&self) {
        let mut shared = self.lock();
        if shared.suspend.value(SuspendReason::Controller) > 0 {
            shared.suspend.lower(SuspendReason::Controller);

            if self.options().threading == ThreadingModel::Threaded
                && !shared.suspend.is_suspended()
                && shared.state == SessionState::Suspended
            {
                shared.state = SessionState::Running;
            }
            trace!(state = ?shared.state, "resume_thread");
            self.notify();
        }
    }

    /// Polled by the instruction core after each unit of work.
    ///
    /// While nested, the external count is ignored: a host-control call is
    /// busy changing it and has to be allowed to finish.
    pub fn check_for_break(&self) -> bool {
        let shared = self.lock();
        if shared.stop {
            return true;
        }
        if shared.nest_level > 0 {
            shared.suspend.is_suspended_ignoring(SuspendReason::External)
        } else {
            shared.suspend.is_suspended()
        }
    }

    /// Put the stepper to sleep until `wake` or the timeout.
    pub fn sleep(&self, duration: Duration) {
        let mut woken = self.sleep_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !*woken {
            let (guard, _) = self
                .sleep_cond
                .wait_timeout(woken, duration)
                .unwrap_or_else(PoisonError::into_inner);
            woken = guard;
        }
        *woken = false;
    }

    /// Wake a sleeping stepper. A wake with nobody asleep makes the next
    /// `sleep` return at once.
    pub fn wake(&self) {
        let mut woken = self.sleep_lock.lock().unwrap_or_else(PoisonError::into_inner);
        *woken = true;
        self.sleep_cond.notify_all();
    }

    fn raise_and_hint(&self, reasons: &[SuspendReason]) {
        {
            let mut shared = self.lock();
            for &reason in reasons {
                shared.suspend.raise(reason);
            }
        }
        self.notify();
        self.hint_core();
    }

    /// An exception wants the debugger.
    pub fn schedule_suspend_exception(&self) {
        self.raise_and_hint(&[SuspendReason::Debugger]);
    }

    /// An error wants the debugger.
    pub fn schedule_suspend_error(&self) {
        self.raise_and_hint(&[SuspendReason::Debugger]);
    }

    /// Host control asked for a stop. Lands on a system-call boundary.
    pub fn schedule_suspend_external(&self) {
        self.raise_and_hint(&[SuspendReason::External, SuspendReason::SysCall]);
    }

    /// Host control asked to resume. The count may go negative when this
    /// overtakes the matching suspend.
    pub fn schedule_resume_external(&self) {
        self.lock().suspend.lower(SuspendReason::External);
        self.notify();
    }

    pub fn schedule_suspend_timeout(&self) {
        self.raise_and_hint(&[SuspendReason::Timeout]);
    }

    pub fn schedule_suspend_sys_call(&self) {
        self.raise_and_hint(&[SuspendReason::SysCall]);
    }

    pub fn schedule_suspend_subroutine_return(&self) {
        self.raise_and_hint(&[SuspendReason::SubroutineReturn]);
    }

    /// The stepper role.
    pub(crate) fn run_loop(&self) {
        let core = match self.core() {
            Ok(core) => core,
            Err(err) => {
                error!(%err, "cpu thread started without an instruction core");
                self.lock().state = SessionState::Stopped;
                self.notify();
                return;
            }
        };

        let mut shared = self.lock();
        shared.stepper = Some(thread::current().id());

        while !shared.stop {
            shared.suspend.clear(SuspendReason::Timeout);

            // While the controller runs a nested call the aggregate is
            // zeroed, so the nest level has to hold us back as well.
            if shared.suspend.is_suspended() || shared.nest_level > 0 {
                while shared.nest_level > 0 || (shared.suspend.is_suspended() && !shared.stop) {
                    if shared.nest_level == 0 {
                        shared.state = SessionState::Suspended;
                    }
                    self.notify();
                    shared = self.wait(shared);
                }
                if shared.stop {
                    continue;
                }
            }

            shared.state = SessionState::Running;
            self.notify();
            drop(shared);

            if let Err(err) = self.execute_special(false) {
                warn!(%err, "checkpoint failed");
            }

            shared = self.lock();
            if shared.stop || shared.suspend.is_suspended() {
                continue;
            }

            let (guard, result) = self.call_cpu(&core, shared);
            shared = guard;
            if let Err(err) = result {
                drop(shared);
                self.dispatch_core_error(err);
                shared = self.lock();
            }
        }

        shared.state = SessionState::Stopped;
        shared.stepper = None;
        self.notify();
    }
}

impl Session {
    /// Start the stepper. With `suspended`, it starts held by one controller
    /// count and needs a `resume_thread` to run.
    pub fn create_thread(&mut self, suspended: bool) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.ctx.core()?;

        let threaded = self.ctx.options().threading == ThreadingModel::Threaded;
        {
            let mut shared = self.ctx.lock();
            shared.stop = false;
            shared.suspend = SuspendState::new();
            if suspended {
                shared.suspend.raise(SuspendReason::Controller);
            }
            shared.state = if threaded && !suspended {
                SessionState::Running
            } else {
                SessionState::Suspended
            };
        }

        if threaded {
            let ctx = self.ctx.clone();
            let handle = thread::Builder::new()
                .name("session-cpu".into())
                .spawn(move || ctx.run_loop())?;
            self.thread = Some(handle);
        }

        info!(suspended, threaded, "cpu thread created");
        Ok(())
    }

    /// Stop the stepper and wait for it to exit.
    pub fn destroy_thread(&mut self) {
        let Some(handle) = self.thread.take() else {
            let mut shared = self.ctx.lock();
            if shared.state != SessionState::Stopped {
                shared.stop = true;
                shared.state = SessionState::Stopped;
                self.ctx.notify();
            }
            return;
        };

        {
            let mut shared = self.ctx.lock();
            shared.stop = true;
            shared.suspend.raise(SuspendReason::Controller);
            self.ctx.notify();
        }
        self.ctx.wake();

        if handle.join().is_err() {
            error!("cpu thread panicked");
        }
        info!("cpu thread destroyed");
    }
}

/// Holds the stepper for the lifetime of the guard.
pub struct SessionStopper<'a> {
    session: &'a SessionContext,
    how: StopHow,
    stopped: bool,
}

impl<'a> SessionStopper<'a> {
    pub fn new(session: &'a SessionContext, how: StopHow) -> Self {
        let stopped = session.suspend_thread(how);
        SessionStopper { session, how, stopped }
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// True if the stepper is parked on a system call, where calling into
    /// the firmware is safe.
    pub fn can_call(&self) -> bool {
        self.stopped && self.how == StopHow::OnSysCall
    }
}

impl Drop for SessionStopper<'_> {
    fn drop(&mut self) {
        if self.stopped {
            self.session.resume_thread();
        }
    }
}
