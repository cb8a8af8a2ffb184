//! Ready queue: FIFO within each of [`PRIORITY_LEVELS`] priority lanes.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use spin::Mutex;

use super::task::{Task, PRIORITY_LEVELS};

pub struct ReadyQueue {
    lanes: Mutex<[VecDeque<Arc<Task>>; PRIORITY_LEVELS]>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        const EMPTY: VecDeque<Arc<Task>> = VecDeque::new();
        Self {
            lanes: Mutex::new([EMPTY; PRIORITY_LEVELS]),
        }
    }

    pub fn push(&self, task: Arc<Task>) {
        let lane = (task.priority as usize).min(PRIORITY_LEVELS - 1);
        self.lanes.lock()[lane].push_back(task);
    }

    /// Highest-priority-first, FIFO within a lane.
    pub fn pop(&self) -> Option<Arc<Task>> {
        let mut lanes = self.lanes.lock();
        for lane in lanes.iter_mut() {
            if let Some(task) = lane.pop_front() {
                return Some(task);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.lock().iter().all(VecDeque::is_empty)
    }
}
