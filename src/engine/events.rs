// src/engine/events.rs

use std::collections::VecDeque;

use super::StateEvent;

/// FIFO of pending events of one instance.
///
/// An event leaves the queue only once its handler accepted it; a deferred
/// event stays at the head.
#[derive(Debug, Default)]
pub struct EventQueue {
    inner: VecDeque<StateEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: StateEvent) {
        self.inner.push_back(event);
    }

    pub fn front(&self) -> Option<&StateEvent> {
        self.inner.front()
    }

    /// Drop the head after its handler accepted it.
    pub fn pop(&mut self) -> Option<StateEvent> {
        self.inner.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
