use crate::task_queue::TaskQueue;
use crate::types::{Task, TaskStatus};
use uuid::Uuid;

/// Where a task stands with respect to its prerequisites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyState {
    /// Every dependency is Completed.
    Satisfied,
    /// Some dependencies are still running or queued.
    Waiting(Vec<Uuid>),
    /// A dependency ended Failed or Cancelled and can never complete.
    Blocked { dependency: Uuid, status: TaskStatus },
}

/// True iff every dependency currently maps to a Completed task.
pub fn check_dependencies(task: &Task, queue: &TaskQueue) -> bool {
    task.dependencies.iter().all(|dep| {
        queue
            .get(*dep)
            .is_some_and(|d| d.status == TaskStatus::Completed)
    })
}

/// Classify a task's dependencies. Waiting lists every dependency that is not
/// yet Completed; the first Failed or Cancelled one makes the task Blocked.
pub fn dependency_state(task: &Task, queue: &TaskQueue) -> DependencyState {
    if check_dependencies(task, queue) {
        return DependencyState::Satisfied;
    }
    let mut waiting = Vec::new();
    for dep in &task.dependencies {
        match queue.get(*dep).map(|d| d.status) {
            Some(TaskStatus::Completed) => {}
            Some(status @ (TaskStatus::Failed | TaskStatus::Cancelled)) => {
                return DependencyState::Blocked {
                    dependency: *dep,
                    status,
                }
            }
            _ => waiting.push(*dep),
        }
    }
    if waiting.is_empty() {
        DependencyState::Satisfied
    } else {
        DependencyState::Waiting(waiting)
    }
}
