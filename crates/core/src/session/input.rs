//! Input queues feeding the firmware.
//!
//! The UI posts, the firmware-input pump polls with `has_*` / `peek_*` /
//! `get_*`. Posts are ignored while an automated input source (gremlins,
//! event replay, minimizer) drives the device.

use std::time::Instant;

use tracing::debug;

use super::SessionContext;
use crate::events::{ButtonEvent, KeyEvent, PenEvent};

impl SessionContext {
    /// Queue a button transition. `post_now` lets it through the pacer at once.
    pub fn post_button_event(&self, event: ButtonEvent, post_now: bool) {
        if !self.can_bother_cpu() {
            return;
        }
        let mut shared = self.lock();
        if !shared.buttons.put(event) {
            debug!(?event, "button queue full, event dropped");
        }
        if post_now {
            shared.pacer.release();
        }
    }

    /// False until the spacing since the last delivered button event elapsed.
    pub fn has_button_event(&self) -> bool {
        let shared = self.lock();
        shared.pacer.ready(Instant::now()) && !shared.buttons.is_empty()
    }

    pub fn peek_button_event(&self) -> Option<ButtonEvent> {
        self.lock().buttons.peek().copied()
    }

    pub fn get_button_event(&self) -> Option<ButtonEvent> {
        let mut shared = self.lock();
        let event = shared.buttons.get();
        if event.is_some() {
            shared.pacer.delivered(Instant::now());
        }
        event
    }

    pub fn post_key_event(&self, event: KeyEvent) {
        if !self.can_bother_cpu() {
            return;
        }
        if !self.lock().keys.put(event) {
            debug!(?event, "key queue full, event dropped");
            return;
        }
        self.wake();
    }

    pub fn has_key_event(&self) -> bool {
        !self.lock().keys.is_empty()
    }

    pub fn peek_key_event(&self) -> Option<KeyEvent> {
        self.lock().keys.peek().copied()
    }

    pub fn get_key_event(&self) -> Option<KeyEvent> {
        self.lock().keys.get()
    }

    /// Queue a pen sample. A pen-down equal to the previous one is ignored.
    pub fn post_pen_event(&self, event: PenEvent) {
        if !self.can_bother_cpu() {
            return;
        }
        if !self.lock().pens.put(event) {
            debug!(?event, "pen event not queued");
            return;
        }
        self.wake();
    }

    pub fn has_pen_event(&self) -> bool {
        !self.lock().pens.is_empty()
    }

    pub fn peek_pen_event(&self) -> Option<PenEvent> {
        self.lock().pens.peek().copied()
    }

    pub fn get_pen_event(&self) -> Option<PenEvent> {
        self.lock().pens.get()
    }
}
