//! Shipwright-Scaler: Worker Pool
//!
//! Workers are ephemeral executors bound to (shard, phase, resource-class).
//! The pool is mutated only by the autoscaler; everyone else reads metrics.
//!
//! Lifecycle: initializing -> idle -> busy -> draining -> terminated.
//! Draining workers finish their current task, then terminate; idle workers
//! chosen for drain terminate immediately.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::PoolMetrics;
use crate::policy::ResourceClass;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Initializing,
    Idle,
    Busy,
    Draining,
    Terminated,
}

/// One worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub shard_id: String,
    pub phase: String,
    pub resource_class: ResourceClass,
    pub state: WorkerState,
    pub started_at: DateTime<Utc>,
    pub last_task_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Worker counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounts {
    pub initializing: u32,
    pub idle: u32,
    pub busy: u32,
    pub draining: u32,
    pub terminated: u32,
}

impl WorkerCounts {
    /// Workers that count against the pool bounds.
    pub fn active(&self) -> u32 {
        self.initializing + self.idle + self.busy + self.draining
    }
}

#[derive(Default)]
struct PoolInner {
    workers: HashMap<String, Worker>,
    queue_depth: u32,
    cpu_utilization: f64,
    memory_utilization: f64,
    latency_samples_ms: VecDeque<u64>,
    completions: VecDeque<DateTime<Utc>>,
}

/// The worker pool for one (shard, phase, resource-class).
pub struct WorkerPool {
    shard_id: String,
    phase: String,
    resource_class: ResourceClass,
    inner: Mutex<PoolInner>,
}

impl WorkerPool {
    pub fn new(
        shard_id: impl Into<String>,
        phase: impl Into<String>,
        resource_class: ResourceClass,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            phase: phase.into(),
            resource_class,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Create `count` workers in `initializing`. Returns their ids.
    pub fn spawn_workers(&self, count: u32) -> Vec<String> {
        let mut inner = self.inner.lock();
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let worker_id = format!("worker-{}", Uuid::new_v4());
            inner.workers.insert(
                worker_id.clone(),
                Worker {
                    worker_id: worker_id.clone(),
                    shard_id: self.shard_id.clone(),
                    phase: self.phase.clone(),
                    resource_class: self.resource_class,
                    state: WorkerState::Initializing,
                    started_at: Utc::now(),
                    last_task_at: None,
                    terminated_at: None,
                    metadata: serde_json::Value::Null,
                },
            );
            tracing::debug!(worker_id = %worker_id, phase = %self.phase, "Worker spawned");
            ids.push(worker_id);
        }
        ids
    }

    /// Readiness: initializing -> idle.
    pub fn mark_ready(&self, worker_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.workers.get_mut(worker_id) {
            Some(worker) if worker.state == WorkerState::Initializing => {
                worker.state = WorkerState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Hand the next queued task to an idle worker. Returns the worker id.
    pub fn assign_task(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        if inner.queue_depth == 0 {
            return None;
        }
        let worker_id = inner
            .workers
            .values()
            .find(|w| w.state == WorkerState::Idle)
            .map(|w| w.worker_id.clone())?;
        inner.queue_depth -= 1;
        let worker = inner.workers.get_mut(&worker_id).expect("worker exists");
        worker.state = WorkerState::Busy;
        worker.last_task_at = Some(Utc::now());
        Some(worker_id)
    }

    /// Task finished on a worker. Busy workers return to idle; draining
    /// workers terminate now that their task is done.
    pub fn complete_task(&self, worker_id: &str, latency_ms: u64) {
        let mut inner = self.inner.lock();
        inner.latency_samples_ms.push_back(latency_ms);
        if inner.latency_samples_ms.len() > 256 {
            inner.latency_samples_ms.pop_front();
        }
        let now = Utc::now();
        inner.completions.push_back(now);
        let cutoff = now - ChronoDuration::seconds(60);
        while inner.completions.front().is_some_and(|t| *t < cutoff) {
            inner.completions.pop_front();
        }

        if let Some(worker) = inner.workers.get_mut(worker_id) {
            worker.last_task_at = Some(now);
            match worker.state {
                WorkerState::Busy => worker.state = WorkerState::Idle,
                WorkerState::Draining => {
                    worker.state = WorkerState::Terminated;
                    worker.terminated_at = Some(now);
                    tracing::debug!(worker_id = %worker_id, "Drained worker terminated");
                }
                _ => {}
            }
        }
    }

    /// Begin draining a worker. Idle and initializing workers terminate
    /// immediately; busy workers finish their task first. Returns true when
    /// the worker is already gone.
    pub fn begin_drain(&self, worker_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(worker) = inner.workers.get_mut(worker_id) else {
            return false;
        };
        match worker.state {
            WorkerState::Idle | WorkerState::Initializing => {
                worker.state = WorkerState::Terminated;
                worker.terminated_at = Some(Utc::now());
                true
            }
            WorkerState::Busy => {
                worker.state = WorkerState::Draining;
                false
            }
            WorkerState::Draining => false,
            WorkerState::Terminated => true,
        }
    }

    /// Terminate a worker immediately, draining or not.
    pub fn terminate(&self, worker_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(worker) = inner.workers.get_mut(worker_id) {
            if worker.state != WorkerState::Terminated {
                worker.state = WorkerState::Terminated;
                worker.terminated_at = Some(Utc::now());
            }
        }
    }

    /// Scale-down victims: longest-idle first. Falls back to busy workers if
    /// there are not enough idle ones.
    pub fn drain_candidates(&self, count: u32) -> Vec<String> {
        let inner = self.inner.lock();
        let mut idle: Vec<&Worker> = inner
            .workers
            .values()
            .filter(|w| w.state == WorkerState::Idle)
            .collect();
        // Oldest activity first; never-used workers are oldest of all
        idle.sort_by_key(|w| w.last_task_at.unwrap_or(w.started_at));

        let mut victims: Vec<String> = idle
            .iter()
            .take(count as usize)
            .map(|w| w.worker_id.clone())
            .collect();

        if victims.len() < count as usize {
            let mut busy: Vec<&Worker> = inner
                .workers
                .values()
                .filter(|w| w.state == WorkerState::Busy)
                .collect();
            busy.sort_by_key(|w| w.last_task_at.unwrap_or(w.started_at));
            victims.extend(
                busy.iter()
                    .take(count as usize - victims.len())
                    .map(|w| w.worker_id.clone()),
            );
        }
        victims
    }

    /// Externally-fed queue depth (tasks waiting for a worker).
    pub fn set_queue_depth(&self, depth: u32) {
        self.inner.lock().queue_depth = depth;
    }

    pub fn enqueue_tasks(&self, count: u32) {
        self.inner.lock().queue_depth += count;
    }

    /// Externally-fed utilization readings.
    pub fn set_utilization(&self, cpu: f64, memory: f64) {
        let mut inner = self.inner.lock();
        inner.cpu_utilization = cpu.clamp(0.0, 1.0);
        inner.memory_utilization = memory.clamp(0.0, 1.0);
    }

    pub fn counts(&self) -> WorkerCounts {
        let inner = self.inner.lock();
        let mut counts = WorkerCounts::default();
        for worker in inner.workers.values() {
            match worker.state {
                WorkerState::Initializing => counts.initializing += 1,
                WorkerState::Idle => counts.idle += 1,
                WorkerState::Busy => counts.busy += 1,
                WorkerState::Draining => counts.draining += 1,
                WorkerState::Terminated => counts.terminated += 1,
            }
        }
        counts
    }

    pub fn worker(&self, worker_id: &str) -> Option<Worker> {
        self.inner.lock().workers.get(worker_id).cloned()
    }

    /// Point-in-time metrics sample.
    pub fn metrics(&self) -> PoolMetrics {
        let counts = self.counts();
        let inner = self.inner.lock();
        let avg_latency = if inner.latency_samples_ms.is_empty() {
            0.0
        } else {
            inner.latency_samples_ms.iter().sum::<u64>() as f64
                / inner.latency_samples_ms.len() as f64
        };
        PoolMetrics {
            current_workers: counts.active(),
            idle_workers: counts.idle,
            busy_workers: counts.busy,
            queue_depth: inner.queue_depth,
            cpu_utilization: inner.cpu_utilization,
            memory_utilization: inner.memory_utilization,
            avg_task_latency_ms: avg_latency,
            tasks_per_minute: inner.completions.len() as f64,
            sampled_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> WorkerPool {
        WorkerPool::new("shard-a", "BUILD", ResourceClass::Cpu)
    }

    #[test]
    fn test_spawn_and_ready() {
        let pool = pool();
        let ids = pool.spawn_workers(2);
        assert_eq!(pool.counts().initializing, 2);

        for id in &ids {
            assert!(pool.mark_ready(id));
        }
        let counts = pool.counts();
        assert_eq!(counts.idle, 2);
        assert_eq!(counts.active(), 2);
    }

    #[test]
    fn test_task_assignment_consumes_queue() {
        let pool = pool();
        let ids = pool.spawn_workers(1);
        pool.mark_ready(&ids[0]);
        pool.enqueue_tasks(2);

        let assigned = pool.assign_task().unwrap();
        assert_eq!(assigned, ids[0]);
        assert_eq!(pool.metrics().queue_depth, 1);
        assert_eq!(pool.counts().busy, 1);

        // No idle worker left
        assert!(pool.assign_task().is_none());

        pool.complete_task(&assigned, 120);
        assert_eq!(pool.counts().idle, 1);
        let metrics = pool.metrics();
        assert!((metrics.avg_task_latency_ms - 120.0).abs() < 1e-9);
        assert!((metrics.tasks_per_minute - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_drain_terminates_immediately() {
        let pool = pool();
        let ids = pool.spawn_workers(1);
        pool.mark_ready(&ids[0]);

        assert!(pool.begin_drain(&ids[0]));
        assert_eq!(pool.counts().terminated, 1);
        assert_eq!(pool.counts().active(), 0);
    }

    #[test]
    fn test_busy_drain_waits_for_completion() {
        let pool = pool();
        let ids = pool.spawn_workers(1);
        pool.mark_ready(&ids[0]);
        pool.enqueue_tasks(1);
        let worker = pool.assign_task().unwrap();

        assert!(!pool.begin_drain(&worker));
        assert_eq!(pool.counts().draining, 1);

        pool.complete_task(&worker, 50);
        assert_eq!(pool.counts().terminated, 1);
        assert_eq!(pool.counts().draining, 0);
    }

    #[test]
    fn test_drain_candidates_longest_idle_first() {
        let pool = pool();
        let ids = pool.spawn_workers(3);
        for id in &ids {
            pool.mark_ready(id);
        }
        // Give the second and third workers recent activity
        pool.enqueue_tasks(2);
        let first_busy = pool.assign_task().unwrap();
        pool.complete_task(&first_busy, 10);
        let second_busy = pool.assign_task().unwrap();
        pool.complete_task(&second_busy, 10);

        let victims = pool.drain_candidates(1);
        assert_eq!(victims.len(), 1);
        // The never-used worker is the longest idle
        assert!(!victims.contains(&first_busy) && !victims.contains(&second_busy));
    }
}
