//! Work scheduled for the next safe point between instructions.
//!
//! `execute_special` runs, in order: a scheduled reset, a scheduled bank
//! reset, the deferred action queue, then (unless only resets were asked
//! for) the fuzz controller and minimizer requests.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{Scheduled, SessionContext};
use crate::collaborators::{FuzzController, Minimizer};
use crate::deferred::DeferredAction;
use crate::error::{Result, SessionError};
use crate::ResetType;

impl SessionContext {
    /// Run scheduled work. Called only between instructions.
    ///
    /// A failing deferred action discards the rest of the queue and its error
    /// is returned to the caller.
    pub fn execute_special(&self, check_for_reset_only: bool) -> Result<()> {
        let reset = self.lock().scheduled.reset.take();
        if let Some(reset_type) = reset {
            self.reset(reset_type)?;
            // A reset rebuilt the bank handlers already.
            self.lock().scheduled.reset_banks = false;
        }

        if self.take_flag(|s| &mut s.reset_banks) {
            self.subsystems().memory.reset_bank_handlers();
        }

        self.drain_deferred()?;

        if check_for_reset_only {
            return Ok(());
        }

        // At most one state transfer is scheduled at a time.
        let pending = self.lock().scheduled;
        debug_assert!(
            [
                pending.save_root_state,
                pending.save_suspended_state,
                pending.load_root_state,
                pending.next_gremlin_from_root,
                pending.next_gremlin_from_suspended,
            ]
            .iter()
            .filter(|&&f| f)
            .count()
                <= 1
        );

        if self.take_flag(|s| &mut s.auto_save_state) {
            self.fuzz_controller()?.auto_save_state(self)?;
        }

        if self.take_flag(|s| &mut s.save_root_state) {
            self.fuzz_controller()?.save_root_state(self)?;
        }

        if self.take_flag(|s| &mut s.save_suspended_state) {
            self.fuzz_controller()?.save_suspended_state(self)?;
        }

        if self.take_flag(|s| &mut s.load_root_state) {
            self.fuzz_controller()?.load_root_state(self)?;
        }

        if self.take_flag(|s| &mut s.next_gremlin_from_root) {
            let fuzz = self.fuzz_controller()?;
            match fuzz.load_root_state(self) {
                Ok(true) => fuzz.start_gremlin_from_loaded_root_state()?,
                Ok(false) => fuzz.turn_off(),
                Err(err) => {
                    warn!(%err, "root state did not load, stopping gremlins");
                    fuzz.turn_off();
                }
            }
        }

        if self.take_flag(|s| &mut s.next_gremlin_from_suspended) {
            let fuzz = self.fuzz_controller()?;
            match fuzz.load_suspended_state(self) {
                Ok(true) => fuzz.start_gremlin_from_loaded_suspended_state()?,
                Ok(false) => fuzz.turn_off(),
                Err(err) => {
                    warn!(%err, "suspended state did not load, stopping gremlins");
                    fuzz.turn_off();
                }
            }
        }

        if self.take_flag(|s| &mut s.minimize_load_state) {
            self.minimizer()?.load_initial_state(self)?;
        }

        Ok(())
    }

    /// Clear one scheduled flag, returning whether it was set.
    fn take_flag(&self, flag: fn(&mut Scheduled) -> &mut bool) -> bool {
        std::mem::take(flag(&mut self.lock().scheduled))
    }

    fn drain_deferred(&self) -> Result<()> {
        {
            let mut shared = self.lock();
            assert!(!shared.draining, "deferred actions drained re-entrantly");
            if shared.deferred.is_empty() {
                return Ok(());
            }
            shared.draining = true;
        }

        let mut outcome = Ok(());
        'drain: loop {
            let batch = self.lock().deferred.take_all();
            if batch.is_empty() {
                break;
            }
            for action in batch {
                if let Err(err) = action.perform(self) {
                    warn!(%err, "deferred action failed, discarding the rest");
                    outcome = Err(err);
                    break 'drain;
                }
            }
        }

        let mut shared = self.lock();
        shared.draining = false;
        shared.deferred.clear();
        outcome
    }

    fn fuzz_controller(&self) -> Result<&Arc<dyn FuzzController>> {
        self.fuzz
            .as_ref()
            .ok_or_else(|| SessionError::Fuzz("no fuzz controller attached".into()))
    }

    fn minimizer(&self) -> Result<&Arc<dyn Minimizer>> {
        self.minimizer
            .as_ref()
            .ok_or_else(|| SessionError::Fuzz("no minimizer attached".into()))
    }

    fn schedule(&self, what: &'static str, set: impl FnOnce(&mut Scheduled)) {
        set(&mut self.lock().scheduled);
        debug!(what, "scheduled");
        self.hint_core();
    }

    pub fn schedule_reset(&self, reset_type: impl Into<ResetType>) {
        let reset_type = reset_type.into();
        self.schedule("reset", |s| s.reset = Some(reset_type));
    }

    pub fn schedule_reset_banks(&self) {
        self.schedule("bank reset", |s| s.reset_banks = true);
    }

    pub fn schedule_auto_save_state(&self) {
        self.schedule("auto save", |s| s.auto_save_state = true);
    }

    pub fn schedule_save_root_state(&self) {
        self.schedule("save root state", |s| s.save_root_state = true);
    }

    pub fn schedule_save_suspended_state(&self) {
        self.schedule("save suspended state", |s| s.save_suspended_state = true);
    }

    pub fn schedule_load_root_state(&self) {
        self.schedule("load root state", |s| s.load_root_state = true);
    }

    pub fn schedule_next_gremlin_from_root_state(&self) {
        self.schedule("next gremlin from root", |s| s.next_gremlin_from_root = true);
    }

    pub fn schedule_next_gremlin_from_suspended_state(&self) {
        self.schedule("next gremlin from suspended", |s| {
            s.next_gremlin_from_suspended = true
        });
    }

    pub fn schedule_minimize_load_state(&self) {
        self.schedule("minimize load", |s| s.minimize_load_state = true);
    }

    /// Queue an action for the next checkpoint.
    pub fn schedule_deferred(&self, action: impl DeferredAction + 'static) {
        self.lock().deferred.push(Box::new(action));
        self.hint_core();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::testing;
    use crate::ResetKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_deferred_failure_discards_the_rest() {
        let _guard = testing::serial();
        let session = testing::initialized_session(EngineOptions::cooperative());
        let ran = Arc::new(Mutex::new(Vec::new()));

        let r = ran.clone();
        session.schedule_deferred(move |_: &SessionContext| -> Result<()> {
            r.lock().unwrap().push(1);
            Ok(())
        });
        let r = ran.clone();
        session.schedule_deferred(move |_: &SessionContext| -> Result<()> {
            r.lock().unwrap().push(2);
            Err(SessionError::Action("dialog answered Debug".into()))
        });
        let third = Arc::new(AtomicBool::new(false));
        let t = third.clone();
        session.schedule_deferred(move |_: &SessionContext| -> Result<()> {
            t.store(true, Ordering::SeqCst);
            Ok(())
        });

        let err = session.execute_special(false).unwrap_err();
        assert!(matches!(err, SessionError::Action(_)));
        assert_eq!(*ran.lock().unwrap(), vec![1, 2]);
        assert!(!third.load(Ordering::SeqCst));

        // The discarded action is gone for good.
        session.execute_special(false).unwrap();
        assert!(!third.load(Ordering::SeqCst));
    }

    #[test]
    fn test_actions_queued_while_draining_run_too() {
        let _guard = testing::serial();
        let session = testing::initialized_session(EngineOptions::cooperative());
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        session.schedule_deferred(move |s: &SessionContext| -> Result<()> {
            s.schedule_deferred(move |_: &SessionContext| -> Result<()> {
                r.store(true, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });
        session.execute_special(true).unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "re-entrantly")]
    fn test_reentrant_drain_is_fatal() {
        let _guard = testing::serial();
        let session = testing::initialized_session(EngineOptions::cooperative());
        session.schedule_deferred(|s: &SessionContext| -> Result<()> { s.execute_special(false) });
        let _ = session.execute_special(false);
    }

    #[test]
    fn test_reset_subsumes_bank_reset() {
        let _guard = testing::serial();
        let parts = testing::Parts::new();
        let log = parts.log.clone();
        let session = testing::initialized_session_with(EngineOptions::cooperative(), parts);
        log.clear();

        session.schedule_reset_banks();
        session.execute_special(true).unwrap();
        assert_eq!(log.entries(), vec!["memory.reset_bank_handlers"]);

        log.clear();
        session.schedule_reset_banks();
        session.schedule_reset(ResetKind::System);
        session.execute_special(true).unwrap();
        assert!(log.contains("memory.reset(false)"));
        assert!(!log.contains("memory.reset_bank_handlers"));
    }

    #[test]
    fn test_reset_only_pass_leaves_fuzz_requests() {
        let _guard = testing::serial();
        let parts = testing::Parts::new();
        let fuzz = parts.fuzz.clone();
        let session = testing::initialized_session_with(EngineOptions::cooperative(), parts);

        session.schedule_auto_save_state();
        session.execute_special(true).unwrap();
        assert!(fuzz.log.entries().is_empty());

        session.execute_special(false).unwrap();
        assert_eq!(fuzz.log.entries(), vec!["auto_save_state"]);
    }

    #[test]
    fn test_next_gremlin_without_root_turns_fuzzing_off() {
        let _guard = testing::serial();
        let parts = testing::Parts::new();
        let fuzz = parts.fuzz.clone();
        let session = testing::initialized_session_with(EngineOptions::cooperative(), parts);

        session.schedule_next_gremlin_from_root_state();
        session.execute_special(false).unwrap();
        assert_eq!(fuzz.log.entries(), vec!["load_root_state", "turn_off"]);

        fuzz.log.clear();
        fuzz.root_available.store(true, Ordering::SeqCst);
        session.schedule_next_gremlin_from_root_state();
        session.execute_special(false).unwrap();
        assert_eq!(
            fuzz.log.entries(),
            vec!["load_root_state", "start_gremlin_from_loaded_root_state"]
        );
    }

    #[test]
    fn test_fuzz_saves_in_order() {
        let _guard = testing::serial();
        let parts = testing::Parts::new();
        let fuzz = parts.fuzz.clone();
        let session = testing::initialized_session_with(EngineOptions::cooperative(), parts);

        session.schedule_save_root_state();
        session.schedule_auto_save_state();
        session.execute_special(false).unwrap();
        assert_eq!(fuzz.log.entries(), vec!["auto_save_state", "save_root_state"]);
    }

    #[test]
    fn test_failed_request_keeps_later_ones() {
        let _guard = testing::serial();
        let parts = testing::Parts::new();
        let fuzz = parts.fuzz.clone();
        let session = testing::initialized_session_with(EngineOptions::cooperative(), parts);

        fuzz.fail_auto_save.store(true, Ordering::SeqCst);
        session.schedule_auto_save_state();
        session.schedule_save_root_state();
        assert!(matches!(session.execute_special(false), Err(SessionError::Fuzz(_))));
        assert_eq!(fuzz.log.entries(), vec!["auto_save_state"]);

        session.execute_special(false).unwrap();
        assert_eq!(fuzz.log.entries(), vec!["auto_save_state", "save_root_state"]);
    }

    #[test]
    fn test_failed_reset_keeps_bank_reset() {
        let _guard = testing::serial();
        let parts = testing::Parts::new();
        let log = parts.log.clone();
        let memory_fails = parts.memory_fails.clone();
        let session = testing::initialized_session_with(EngineOptions::cooperative(), parts);
        log.clear();

        memory_fails.store(true, Ordering::SeqCst);
        session.schedule_reset_banks();
        session.schedule_reset(ResetKind::Soft);
        assert!(matches!(
            session.execute_special(true),
            Err(SessionError::Subsystem { subsystem: "memory", .. })
        ));

        memory_fails.store(false, Ordering::SeqCst);
        session.execute_special(true).unwrap();
        assert_eq!(log.entries(), vec!["memory.reset_bank_handlers"]);
    }

    #[test]
    fn test_minimize_without_minimizer_fails() {
        let _guard = testing::serial();
        let session = testing::initialized_session(EngineOptions::cooperative());
        session.schedule_minimize_load_state();
        assert!(matches!(session.execute_special(false), Err(SessionError::Fuzz(_))));
        session.execute_special(false).unwrap();
    }
}
