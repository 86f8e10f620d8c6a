//! Modal dialogs requested by the stepper.
//!
//! In a threaded session the stepper cannot draw UI itself. It wraps the
//! dialog in a [`DialogRequest`], sends it down the session's dialog channel
//! and parks in `BlockedOnUi` until the controller answers or the session
//! stops. Without a stepper thread the dialog runs in place.

use std::sync::{Arc, PoisonError};

use tracing::{debug, trace};

use super::{Coordination, SessionContext, SessionState, SessionStopper, StopHow};
use crate::collaborators::{DialogItem, DialogRunner};
use crate::config::ThreadingModel;

/// A dialog waiting to be shown by the controller.
///
/// Dropping an unanswered request answers it with [`DialogItem::None`].
pub struct DialogRequest {
    id: u64,
    runner: Option<Box<dyn DialogRunner>>,
    coord: Arc<Coordination>,
    answered: bool,
}

impl DialogRequest {
    fn new(id: u64, runner: Box<dyn DialogRunner>, coord: Arc<Coordination>) -> Self {
        DialogRequest { id, runner: Some(runner), coord, answered: false }
    }

    /// Show the dialog on the calling thread and hand the answer back.
    pub fn run(mut self) -> DialogItem {
        let item = match self.runner.take() {
            Some(runner) => runner.run(),
            None => DialogItem::None,
        };
        self.answer(item);
        item
    }

    /// Answer without running the dialog.
    pub fn complete(mut self, item: DialogItem) {
        self.answer(item);
    }

    fn answer(&mut self, item: DialogItem) {
        if self.answered {
            return;
        }
        self.answered = true;
        self.coord.lock().dialog_result = Some((self.id, item));
        self.coord.notify();
    }
}

impl Drop for DialogRequest {
    fn drop(&mut self) {
        self.answer(DialogItem::None);
    }
}

impl SessionContext {
    /// Show a modal dialog from the stepper and wait for the answer.
    ///
    /// Returns [`DialogItem::None`] if the session stops first or nobody is
    /// listening on the dialog channel.
    pub fn block_on_dialog(&self, runner: impl DialogRunner + 'static) -> DialogItem {
        let runner: Box<dyn DialogRunner> = Box::new(runner);

        if self.options().threading == ThreadingModel::Cooperative {
            // Held for the dialog's lifetime so nothing steps the core under it.
            let _stopper = SessionStopper::new(self, StopHow::Now);
            let old_state = {
                let mut shared = self.lock();
                std::mem::replace(&mut shared.state, SessionState::BlockedOnUi)
            };
            self.notify();

            let item = runner.run();

            self.lock().state = old_state;
            self.notify();
            return item;
        }

        debug_assert!(self.in_cpu_thread());

        let (id, old_state) = {
            let mut shared = self.lock();
            let id = shared.dialog_next_id;
            shared.dialog_next_id += 1;
            let old_state = std::mem::replace(&mut shared.state, SessionState::BlockedOnUi);
            (id, old_state)
        };
        self.notify();
        trace!(id, "dialog scheduled");

        // A failed send drops the request, which answers it with None.
        {
            let request = DialogRequest::new(id, runner, self.coord.clone());
            let sender = self.dialogs.lock().unwrap_or_else(PoisonError::into_inner);
            match sender.as_ref() {
                Some(tx) => {
                    if tx.send(request).is_err() {
                        debug!(id, "no dialog listener");
                    }
                }
                None => drop(request),
            }
        }

        let mut shared = self.lock();
        let item = loop {
            if let Some((answered, item)) = shared.dialog_result {
                if answered == id {
                    shared.dialog_result = None;
                    break item;
                }
            }
            if shared.stop {
                break DialogItem::None;
            }
            shared = self.wait(shared);
        };

        shared.state = old_state;
        drop(shared);
        self.notify();
        trace!(id, ?item, "dialog answered");
        item
    }

    /// Re-broadcast the coordination condition after a dialog answer.
    pub fn unblock_dialog(&self) {
        self.notify();
    }
}
