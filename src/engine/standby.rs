// src/engine/standby.rs

//! Priority-ordered holding area for eligible but undispatched tasks.

use std::cmp::{Ordering, Reverse};

use crate::model::{TaskCode, TaskInstance};
use crate::types::TaskExecutionStatus;

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    task: TaskInstance,
}

/// Standby queue of one execution context.
///
/// Iteration order: workflow priority (high first), workflow instance id,
/// task priority (high first), task instance id (rows without an id last),
/// then insertion order.
#[derive(Debug, Default)]
pub struct StandbyQueue {
    entries: Vec<Entry>,
    next_seq: u64,
}

fn compare(a: &Entry, b: &Entry) -> Ordering {
    let key = |e: &Entry| {
        (
            Reverse(e.task.workflow_priority),
            e.task.workflow_instance_id,
            Reverse(e.task.definition.priority),
            e.task.id.is_none(),
            e.task.id,
            e.seq,
        )
    };
    key(a).cmp(&key(b))
}

impl StandbyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task; returns its queue sequence number.
    pub fn push(&mut self, task: TaskInstance) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.push(Entry { seq, task });
        seq
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains_code(&self, code: TaskCode) -> bool {
        self.entries.iter().any(|e| e.task.task_code() == code)
    }

    /// Sequence numbers in dispatch order.
    pub fn ordered(&self) -> Vec<u64> {
        let mut sorted: Vec<&Entry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| compare(a, b));
        sorted.into_iter().map(|e| e.seq).collect()
    }

    /// Tasks in dispatch order.
    pub fn tasks(&self) -> Vec<&TaskInstance> {
        let mut sorted: Vec<&Entry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| compare(a, b));
        sorted.into_iter().map(|e| &e.task).collect()
    }

    pub fn get(&self, seq: u64) -> Option<&TaskInstance> {
        self.entries.iter().find(|e| e.seq == seq).map(|e| &e.task)
    }

    pub fn get_mut(&mut self, seq: u64) -> Option<&mut TaskInstance> {
        self.entries
            .iter_mut()
            .find(|e| e.seq == seq)
            .map(|e| &mut e.task)
    }

    pub fn remove(&mut self, seq: u64) -> Option<TaskInstance> {
        let pos = self.entries.iter().position(|e| e.seq == seq)?;
        Some(self.entries.remove(pos).task)
    }

    /// A failed task waiting here for its retry.
    pub fn has_retry_task(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.task.state == TaskExecutionStatus::Failure)
    }
}
