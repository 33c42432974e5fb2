//! # Chain Stack
//!
//! Bounded LIFO of certificate ids. A chain is pushed leaf first, so pops
//! return it root first.

use heapless::Vec;

use crate::CertId;

/// Fixed-capacity stack of certificate ids
#[derive(Debug, Clone, Default)]
pub struct ChainStack<const DEPTH: usize> {
    entries: Vec<CertId, DEPTH>,
}

impl<const DEPTH: usize> ChainStack<DEPTH> {
    /// Create an empty stack
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Push an id, handing it back when the stack is full
    pub fn push(&mut self, id: CertId) -> Result<(), CertId> {
        self.entries.push(id)
    }

    /// Pop the top id
    pub fn pop(&mut self) -> Option<CertId> {
        self.entries.pop()
    }

    /// Top id without removing it
    pub fn peek(&self) -> Option<CertId> {
        self.entries.last().copied()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stack is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from bottom to top
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = CertId> + '_ {
        self.entries.iter().copied()
    }

    /// Whether `id` is on the stack
    pub fn contains(&self, id: CertId) -> bool {
        self.entries.contains(&id)
    }
}
