use crate::types::{Task, TaskStatus};
use chrono::Utc;
use quorum_core::Payload;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use uuid::Uuid;

/// Task store plus a ready queue ordered by `(priority rank, task id)`.
pub struct TaskQueue {
    tasks: HashMap<Uuid, Task>,
    ready: BinaryHeap<Reverse<(u8, Uuid)>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            ready: BinaryHeap::new(),
        }
    }

    /// Store a task and put it on the ready queue.
    pub fn add(&mut self, task: Task) -> Uuid {
        let id = task.id;
        self.ready.push(Reverse(task.queue_key()));
        self.tasks.insert(id, task);
        id
    }

    /// Put a non-terminal task back on the ready queue. A task parked in
    /// WaitingDependency returns to Pending.
    pub fn requeue(&mut self, id: Uuid) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if !task.status.is_terminal() => {
                if task.status == TaskStatus::WaitingDependency {
                    task.status = TaskStatus::Pending;
                }
                self.ready.push(Reverse(task.queue_key()));
                true
            }
            _ => false,
        }
    }

    /// Pop the most urgent queued task that can still be dispatched.
    /// Entries for tasks that moved on since they were queued are discarded.
    pub fn pop_ready(&mut self) -> Option<Uuid> {
        while let Some(Reverse((_, id))) = self.ready.pop() {
            let dispatchable = self.tasks.get(&id).is_some_and(|t| {
                matches!(
                    t.status,
                    TaskStatus::Pending | TaskStatus::WaitingDependency
                )
            });
            if dispatchable {
                return Some(id);
            }
        }
        None
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.tasks.contains_key(&id)
    }

    /// A task that can still change state. Terminal tasks are left alone.
    fn live_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.get_mut(&id).filter(|t| !t.status.is_terminal())
    }

    fn set_status(&mut self, id: Uuid, status: TaskStatus) -> bool {
        match self.live_mut(id) {
            Some(task) => {
                task.status = status;
                true
            }
            None => false,
        }
    }

    pub fn mark_assigned(&mut self, id: Uuid, agents: Vec<String>) -> bool {
        match self.live_mut(id) {
            Some(task) => {
                task.assigned_agents = agents;
                task.status = TaskStatus::Assigned;
                true
            }
            None => false,
        }
    }

    pub fn mark_in_progress(&mut self, id: Uuid) -> bool {
        match self.live_mut(id) {
            Some(task) => {
                task.status = TaskStatus::InProgress;
                task.started_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn mark_waiting(&mut self, id: Uuid) -> bool {
        self.set_status(id, TaskStatus::WaitingDependency)
    }

    pub fn mark_validation(&mut self, id: Uuid) -> bool {
        self.set_status(id, TaskStatus::Validation)
    }

    /// Cancellation is final: a Cancelled task is never completed or failed.
    fn not_cancelled_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks
            .get_mut(&id)
            .filter(|t| t.status != TaskStatus::Cancelled)
    }

    pub fn mark_completed(&mut self, id: Uuid, output: Payload) -> bool {
        match self.not_cancelled_mut(id) {
            Some(task) => {
                task.status = TaskStatus::Completed;
                task.output = output;
                task.error = None;
                task.completed_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn mark_failed(&mut self, id: Uuid, reason: String, output: Payload) -> bool {
        match self.not_cancelled_mut(id) {
            Some(task) => {
                task.status = TaskStatus::Failed;
                task.output = output;
                task.error = Some(reason);
                task.completed_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Cancel a task that has not reached a terminal state.
    pub fn mark_cancelled(&mut self, id: Uuid) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if !task.status.is_terminal() => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Ids of tasks parked in WaitingDependency.
    pub fn waiting(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::WaitingDependency)
            .map(|t| t.id)
            .collect();
        ids.sort();
        ids
    }

    /// List all tasks, oldest first.
    pub fn all_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn status_counts(&self) -> BTreeMap<TaskStatus, usize> {
        let mut counts = BTreeMap::new();
        for task in self.tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
