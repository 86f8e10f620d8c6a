//! The suspend aggregate.
//!
//! Six independently owned reasons for the stepper to leave the instruction
//! core. Three are counts, three are flags:
//!
//! | Reason             | Kind  | Raised by                                  |
//! |--------------------|-------|--------------------------------------------|
//! | `Controller`       | count | `suspend_thread` from the UI/host side      |
//! | `Debugger`         | count | exceptions, errors, debugger requests       |
//! | `External`         | count | host-control calls; may dip below zero      |
//! | `Timeout`          | flag  | cooperative yield timer                     |
//! | `SysCall`          | flag  | the core reaching a system-call boundary    |
//! | `SubroutineReturn` | flag  | a synthetic call returning to its caller    |
//!
//! The aggregate is suspended iff any reason is non-zero, with `External`
//! clamped to zero before it is considered.

/// One reason for suspending the stepper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspendReason {
    Controller,
    Debugger,
    External,
    Timeout,
    SysCall,
    SubroutineReturn,
}

impl SuspendReason {
    pub const ALL: [SuspendReason; 6] = [
        SuspendReason::Controller,
        SuspendReason::Debugger,
        SuspendReason::External,
        SuspendReason::Timeout,
        SuspendReason::SysCall,
        SuspendReason::SubroutineReturn,
    ];

    /// True for the three flag-valued reasons.
    pub fn is_flag(self) -> bool {
        matches!(
            self,
            SuspendReason::Timeout | SuspendReason::SysCall | SuspendReason::SubroutineReturn
        )
    }
}

/// The aggregate itself. `Copy`, so a snapshot is just a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuspendState {
    controller: u32,
    debugger: u32,
    external: i32,
    timeout: bool,
    sys_call: bool,
    subroutine_return: bool,
}

impl SuspendState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value of a reason. Counts report their count (`External` may be
    /// negative), flags report 0 or 1.
    pub fn value(&self, reason: SuspendReason) -> i64 {
        match reason {
            SuspendReason::Controller => self.controller as i64,
            SuspendReason::Debugger => self.debugger as i64,
            SuspendReason::External => self.external as i64,
            SuspendReason::Timeout => self.timeout as i64,
            SuspendReason::SysCall => self.sys_call as i64,
            SuspendReason::SubroutineReturn => self.subroutine_return as i64,
        }
    }

    /// Whether a reason contributes to the aggregate.
    pub fn is_raised(&self, reason: SuspendReason) -> bool {
        self.value(reason) > 0
    }

    /// Increment a count (saturating) or set a flag.
    pub fn raise(&mut self, reason: SuspendReason) {
        match reason {
            SuspendReason::Controller => self.controller = self.controller.saturating_add(1),
            SuspendReason::Debugger => self.debugger = self.debugger.saturating_add(1),
            SuspendReason::External => self.external = self.external.saturating_add(1),
            SuspendReason::Timeout => self.timeout = true,
            SuspendReason::SysCall => self.sys_call = true,
            SuspendReason::SubroutineReturn => self.subroutine_return = true,
        }
    }

    /// Decrement a count or clear a flag.
    ///
    /// `Controller` and `Debugger` stop at zero; `External` is allowed to go
    /// negative, since a resume can overtake its matching suspend.
    pub fn lower(&mut self, reason: SuspendReason) {
        match reason {
            SuspendReason::Controller => {
                self.controller = self.controller.saturating_sub(1);
                self.drop_stale_sys_call();
            }
            SuspendReason::Debugger => self.debugger = self.debugger.saturating_sub(1),
            SuspendReason::External => self.external = self.external.saturating_sub(1),
            _ => self.clear(reason),
        }
    }

    /// Zero a reason outright.
    pub fn clear(&mut self, reason: SuspendReason) {
        match reason {
            SuspendReason::Controller => {
                self.controller = 0;
                self.drop_stale_sys_call();
            }
            SuspendReason::Debugger => self.debugger = 0,
            SuspendReason::External => self.external = 0,
            SuspendReason::Timeout => self.timeout = false,
            SuspendReason::SysCall => self.sys_call = false,
            SuspendReason::SubroutineReturn => self.subroutine_return = false,
        }
    }

    // A system-call stop only matters while somebody is waiting on it.
    fn drop_stale_sys_call(&mut self) {
        if self.controller == 0 && self.external == 0 {
            self.sys_call = false;
        }
    }

    /// OR of all six reasons, `External` clamped to zero.
    pub fn is_suspended(&self) -> bool {
        self.controller > 0
            || self.debugger > 0
            || self.external > 0
            || self.timeout
            || self.sys_call
            || self.subroutine_return
    }

    /// Same as [`is_suspended`](Self::is_suspended) with one reason masked out.
    pub fn is_suspended_ignoring(&self, reason: SuspendReason) -> bool {
        let mut masked = *self;
        match reason {
            SuspendReason::Controller => masked.controller = 0,
            SuspendReason::Debugger => masked.debugger = 0,
            SuspendReason::External => masked.external = 0,
            SuspendReason::Timeout => masked.timeout = false,
            SuspendReason::SysCall => masked.sys_call = false,
            SuspendReason::SubroutineReturn => masked.subroutine_return = false,
        }
        masked.is_suspended()
    }

    pub fn snapshot(&self) -> SuspendState {
        *self
    }

    pub fn restore(&mut self, snapshot: SuspendState) {
        *self = snapshot;
    }

    /// Move whatever a nested call raised into the outer snapshot.
    ///
    /// Controller, external and timeout are carried to `outer` and cleared here
    /// so the nested loop keeps running. The system-call flag is dropped. The
    /// debugger count is carried but left live, and the subroutine-return flag
    /// is left live: either one ends the nested loop.
    pub fn fold_into(&mut self, outer: &mut SuspendState) {
        outer.controller = outer.controller.saturating_add(self.controller);
        self.controller = 0;

        outer.debugger = outer.debugger.saturating_add(self.debugger);

        outer.external = outer.external.saturating_add(self.external);
        self.external = 0;

        self.sys_call = false;

        outer.timeout |= self.timeout;
        self.timeout = false;
    }

    /// Clamp a negative `External` count to zero.
    pub fn clamp_external(&mut self) {
        if self.external < 0 {
            self.external = 0;
        }
    }
}
