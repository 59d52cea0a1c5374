//! Shipwright-Conductor: Task Board
//!
//! One task per unit of work handed to a worker. The board mirrors the
//! `tasks` table: status, timestamps, worker binding. The coordinator opens
//! a task per phase execution; story-loop style phases open one per story.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::phase::Phase;

/// Task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Blocked,
}

/// One unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub run_id: String,
    pub phase: Phase,
    pub status: TaskStatus,
    /// Worker the task is assigned to, once running
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Task counts by status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
}

/// In-memory task tracker.
pub struct TaskBoard {
    tasks: Mutex<HashMap<String, Task>>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Open a pending task. Returns its id.
    pub fn open(&self, run_id: &str, phase: Phase) -> String {
        let task = Task {
            id: format!("task-{}", Uuid::new_v4()),
            run_id: run_id.to_string(),
            phase,
            status: TaskStatus::Pending,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let id = task.id.clone();
        self.tasks.lock().insert(id.clone(), task);
        id
    }

    /// Pending -> running, optionally bound to a worker.
    pub fn start(&self, task_id: &str, worker_id: Option<&str>) {
        if let Some(task) = self.tasks.lock().get_mut(task_id) {
            task.status = TaskStatus::Running;
            task.worker_id = worker_id.map(str::to_string);
            task.started_at = Some(Utc::now());
        }
    }

    /// Running -> succeeded.
    pub fn succeed(&self, task_id: &str) {
        self.finish(task_id, TaskStatus::Succeeded);
    }

    /// Running -> failed.
    pub fn fail(&self, task_id: &str) {
        self.finish(task_id, TaskStatus::Failed);
    }

    /// Mark a task blocked on an external dependency.
    pub fn block(&self, task_id: &str) {
        if let Some(task) = self.tasks.lock().get_mut(task_id) {
            task.status = TaskStatus::Blocked;
        }
    }

    fn finish(&self, task_id: &str, status: TaskStatus) {
        if let Some(task) = self.tasks.lock().get_mut(task_id) {
            task.status = status;
            task.completed_at = Some(Utc::now());
        }
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().get(task_id).cloned()
    }

    /// Tasks for one run, oldest first.
    pub fn tasks_for_run(&self, run_id: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn stats(&self) -> TaskStats {
        let tasks = self.tasks.lock();
        let mut stats = TaskStats::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Succeeded => stats.succeeded += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Blocked => stats.blocked += 1,
            }
        }
        stats
    }
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let board = TaskBoard::new();
        let id = board.open("run-1", Phase::Build);
        assert_eq!(board.get(&id).unwrap().status, TaskStatus::Pending);

        board.start(&id, Some("worker-9"));
        let task = board.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.worker_id.as_deref(), Some("worker-9"));
        assert!(task.started_at.is_some());

        board.succeed(&id);
        let task = board.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_per_run_listing_and_stats() {
        let board = TaskBoard::new();
        let a = board.open("run-1", Phase::Build);
        let _b = board.open("run-2", Phase::Qa);
        let c = board.open("run-1", Phase::Qa);

        board.start(&a, None);
        board.fail(&a);
        board.block(&c);

        let tasks = board.tasks_for_run("run-1");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, a);

        let stats = board.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.pending, 1);
    }
}
