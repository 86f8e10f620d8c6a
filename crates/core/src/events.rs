//! Synthetic input for the firmware.
//!
//! Button, key and pen events are posted by the UI side and pulled by the
//! firmware-input pump. Each kind has its own bounded FIFO ([`EventQueue`]);
//! pen-down events are deduplicated against the previous one and button
//! events are paced by [`ButtonPacer`] so the firmware has time to sample
//! each register change.

use std::time::{Duration, Instant};

/// Hardware buttons of the handheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Power,
    PageUp,
    PageDown,
    App1,
    App2,
    App3,
    App4,
    Cradle,
    Antenna,
    Contrast,
}

impl Button {
    /// Bit used for this button in a button mask.
    pub fn mask(self) -> u16 {
        1 << (self as u16)
    }
}

/// A button transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: Button,
    pub pressed: bool,
}

impl ButtonEvent {
    pub fn new(button: Button, pressed: bool) -> Self {
        ButtonEvent { button, pressed }
    }
}

/// A character from the host keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: u16,
    pub modifiers: u16,
}

impl KeyEvent {
    pub fn new(key: u16) -> Self {
        KeyEvent { key, modifiers: 0 }
    }
}

/// A pen sample in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenEvent {
    pub x: i16,
    pub y: i16,
    pub pen_down: bool,
}

impl PenEvent {
    pub fn down(x: i16, y: i16) -> Self {
        PenEvent { x, y, pen_down: true }
    }

    pub fn up() -> Self {
        PenEvent { x: -1, y: -1, pen_down: false }
    }
}

/// Bounded FIFO ring buffer.
pub struct EventQueue<T> {
    buf: Vec<Option<T>>,
    /// Next slot to read
    read_pos: usize,
    /// Number of queued items
    count: usize,
}

impl<T> EventQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        EventQueue { buf, read_pos: 0, count: 0 }
    }

    /// Append an item. Returns false (and drops the item) when full.
    pub fn put(&mut self, item: T) -> bool {
        if self.count == self.buf.len() {
            return false;
        }
        let write_pos = (self.read_pos + self.count) % self.buf.len();
        self.buf[write_pos] = Some(item);
        self.count += 1;
        true
    }

    /// Remove and return the oldest item.
    pub fn get(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.buf[self.read_pos].take();
        self.read_pos = (self.read_pos + 1) % self.buf.len();
        self.count -= 1;
        item
    }

    /// Look at the oldest item without consuming it.
    pub fn peek(&self) -> Option<&T> {
        if self.count == 0 {
            return None;
        }
        self.buf[self.read_pos].as_ref()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        for slot in self.buf.iter_mut() {
            *slot = None;
        }
        self.read_pos = 0;
        self.count = 0;
    }
}

/// Pen queue that swallows a pen-down identical to the previous pen-down.
pub struct PenQueue {
    queue: EventQueue<PenEvent>,
    last: Option<PenEvent>,
}

impl PenQueue {
    pub fn new(capacity: usize) -> Self {
        PenQueue { queue: EventQueue::new(capacity), last: None }
    }

    /// Queue a pen event. Returns false if it was a duplicate or the queue is full.
    pub fn put(&mut self, event: PenEvent) -> bool {
        if event.pen_down && self.last == Some(event) {
            return false;
        }
        if !self.queue.put(event) {
            return false;
        }
        self.last = Some(event);
        true
    }

    pub fn get(&mut self) -> Option<PenEvent> {
        self.queue.get()
    }

    pub fn peek(&self) -> Option<&PenEvent> {
        self.queue.peek()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Forget the dedup reference without touching queued events.
    pub fn forget_last(&mut self) {
        self.last = None;
    }
}

/// Enforces a minimum spacing between delivered button events.
pub struct ButtonPacer {
    spacing: Duration,
    last_delivery: Option<Instant>,
}

impl ButtonPacer {
    pub fn new(spacing: Duration) -> Self {
        ButtonPacer { spacing, last_delivery: None }
    }

    /// True once `spacing` has elapsed since the last delivery.
    pub fn ready(&self, now: Instant) -> bool {
        match self.last_delivery {
            Some(last) => now.saturating_duration_since(last) >= self.spacing,
            None => true,
        }
    }

    /// Record a delivery at `now`.
    pub fn delivered(&mut self, now: Instant) {
        self.last_delivery = Some(now);
    }

    /// Make the next event deliverable immediately.
    pub fn release(&mut self) {
        self.last_delivery = None;
    }
}
