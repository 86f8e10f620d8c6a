//! Instruction and data break handlers.
//!
//! Debugger-side features (breakpoints, watchpoints, trap patches) register a
//! handler set here. The engine calls `install` after every reset, since a
//! reset wipes the memory metadata the breaks live in, and forwards hits from
//! the instruction core to every registered `reached` hook.

use std::sync::Arc;

/// Data access that triggered a data break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAccess {
    pub address: u32,
    pub size: u8,
    pub for_read: bool,
}

/// Handler set for instruction breaks.
pub trait InstructionBreakHandlers: Send + Sync {
    fn install(&self);
    fn remove(&self);
    fn reached(&self);
}

/// Handler set for data breaks.
pub trait DataBreakHandlers: Send + Sync {
    fn install(&self);
    fn remove(&self);
    fn reached(&self, access: DataAccess);
}

/// Registered handler sets, in registration order.
#[derive(Default, Clone)]
pub struct BreakRegistry {
    instruction: Vec<Arc<dyn InstructionBreakHandlers>>,
    data: Vec<Arc<dyn DataBreakHandlers>>,
}

impl BreakRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instruction(&mut self, handlers: Arc<dyn InstructionBreakHandlers>) {
        self.instruction.push(handlers);
    }

    pub fn add_data(&mut self, handlers: Arc<dyn DataBreakHandlers>) {
        self.data.push(handlers);
    }

    pub fn instruction_count(&self) -> usize {
        self.instruction.len()
    }

    pub fn data_count(&self) -> usize {
        self.data.len()
    }

    pub fn install_instruction_breaks(&self) {
        for h in &self.instruction {
            h.install();
        }
    }

    pub fn remove_instruction_breaks(&self) {
        for h in &self.instruction {
            h.remove();
        }
    }

    pub fn handle_instruction_break(&self) {
        for h in &self.instruction {
            h.reached();
        }
    }

    pub fn install_data_breaks(&self) {
        for h in &self.data {
            h.install();
        }
    }

    pub fn remove_data_breaks(&self) {
        for h in &self.data {
            h.remove();
        }
    }

    pub fn handle_data_break(&self, access: DataAccess) {
        for h in &self.data {
            h.reached(access);
        }
    }

    /// Drop every registered handler set.
    pub fn clear(&mut self) {
        self.instruction.clear();
        self.data.clear();
    }
}
