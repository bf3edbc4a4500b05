//! Single-owner event queue
//!
//! Events wait in FIFO order until the caller pops them. A popped event moves
//! into the checked-out slot, where it stays until the next pop releases it.
//! Handing out a borrow of that slot lets the borrow checker enforce the
//! "valid until the next pop" rule.

use crate::error::Result;
use std::collections::VecDeque;

#[derive(Debug)]
pub(crate) struct EventQueue<T> {
    pending: VecDeque<T>,
    current: Option<T>,
}

impl<T> EventQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
        }
    }

    /// Append an event. Fails only when the queue cannot grow.
    pub(crate) fn push(&mut self, event: T) -> Result<()> {
        self.pending.try_reserve(1)?;
        self.pending.push_back(event);
        Ok(())
    }

    /// Release the checked-out event and check out the head, if any.
    pub(crate) fn pop(&mut self) -> Option<&T> {
        self.current = self.pending.pop_front();
        self.current.as_ref()
    }

    /// Number of events not yet popped
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every pending event and the checked-out one.
    pub(crate) fn clear(&mut self) {
        self.current = None;
        self.pending.clear();
    }
}
