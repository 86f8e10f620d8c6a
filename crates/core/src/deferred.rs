//! One-shot actions queued for the next checkpoint.
//!
//! Anything that must not run in the middle of an instruction (error dialogs,
//! state transfers requested from inside a register handler) is wrapped in a
//! [`DeferredAction`] and run by the checkpoint in FIFO order.

use std::collections::VecDeque;

use crate::error::Result;
use crate::session::SessionContext;

/// An opaque unit of work, consumed when performed.
pub trait DeferredAction: Send {
    fn perform(self: Box<Self>, session: &SessionContext) -> Result<()>;
}

impl<F> DeferredAction for F
where
    F: FnOnce(&SessionContext) -> Result<()> + Send,
{
    fn perform(self: Box<Self>, session: &SessionContext) -> Result<()> {
        (*self)(session)
    }
}

/// FIFO of pending actions. Owns every action until it is performed or cleared.
#[derive(Default)]
pub struct DeferredQueue {
    actions: VecDeque<Box<dyn DeferredAction>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Box<dyn DeferredAction>) {
        self.actions.push_back(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Take every queued action, leaving the queue empty.
    pub fn take_all(&mut self) -> VecDeque<Box<dyn DeferredAction>> {
        std::mem::take(&mut self.actions)
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_all_preserves_order() {
        let mut q = DeferredQueue::new();
        for _ in 0..3 {
            q.push(Box::new(|_: &SessionContext| -> Result<()> { Ok(()) }));
        }
        assert_eq!(q.len(), 3);
        let taken = q.take_all();
        assert_eq!(taken.len(), 3);
        assert!(q.is_empty());
    }

    #[test]
    fn test_clear_drops_actions() {
        let mut q = DeferredQueue::new();
        q.push(Box::new(|_: &SessionContext| -> Result<()> { Ok(()) }));
        q.clear();
        assert!(q.is_empty());
    }
}
