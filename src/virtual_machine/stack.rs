//! Bounded cell stacks.
//!
//! The machine owns two independent instances: the data stack for working
//! values and the address stack for return addresses and values parked there
//! with `PUSH`/`POP`. Every failing operation leaves the stack untouched.

use crate::virtual_machine::Cell;
use crate::virtual_machine::errors::VMError;
use std::fmt::{self, Display};

/// Default depth of the data stack, in cells.
pub const DATA_STACK_DEPTH: usize = 1024;
/// Default depth of the address stack, in cells.
pub const ADDRESS_STACK_DEPTH: usize = 1024;
/// Deepest stack the driver accepts, in cells.
pub const MAX_STACK_DEPTH: usize = 1 << 20;

/// Identifies which of the two stacks an error refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StackKind {
    Data,
    Address,
}

impl Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackKind::Data => write!(f, "data"),
            StackKind::Address => write!(f, "address"),
        }
    }
}

/// Fixed-capacity LIFO stack of cells.
#[derive(Clone, Debug)]
pub struct Stack {
    kind: StackKind,
    cells: Vec<Cell>,
    capacity: usize,
}

impl Stack {
    /// Creates an empty stack holding at most `capacity` cells.
    ///
    /// Storage grows on demand; `capacity` is only a limit.
    pub fn new(kind: StackKind, capacity: usize) -> Self {
        Self {
            kind,
            cells: Vec::new(),
            capacity,
        }
    }

    /// Pushes `value`, failing with [`VMError::StackOverflow`] when full.
    #[inline]
    pub fn push(&mut self, value: Cell) -> Result<(), VMError> {
        self.ensure_room(1)?;
        self.cells.push(value);
        Ok(())
    }

    /// Removes and returns the top value.
    #[inline]
    pub fn pop(&mut self) -> Result<Cell, VMError> {
        self.cells.pop().ok_or(VMError::StackUnderflow { stack: self.kind })
    }

    /// Returns the top value without removing it.
    #[inline]
    pub fn top(&self) -> Result<Cell, VMError> {
        self.nth(0)
    }

    /// Returns the value `depth` slots below the top (`0` is the top).
    #[inline]
    pub fn nth(&self, depth: usize) -> Result<Cell, VMError> {
        self.cells
            .len()
            .checked_sub(depth + 1)
            .map(|idx| self.cells[idx])
            .ok_or(VMError::StackUnderflow { stack: self.kind })
    }

    /// Fails with [`VMError::StackUnderflow`] unless at least `count` values are present.
    #[inline]
    pub fn ensure(&self, count: usize) -> Result<(), VMError> {
        if self.cells.len() < count {
            return Err(VMError::StackUnderflow { stack: self.kind });
        }
        Ok(())
    }

    /// Fails with [`VMError::StackOverflow`] unless `count` more values fit.
    #[inline]
    pub fn ensure_room(&self, count: usize) -> Result<(), VMError> {
        if self.capacity - self.cells.len() < count {
            return Err(VMError::StackOverflow {
                stack: self.kind,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Number of values currently held.
    pub fn depth(&self) -> usize {
        self.cells.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Contents from bottom to top.
    pub fn as_slice(&self) -> &[Cell] {
        &self.cells
    }
}
