//! Shipwright-Scaler: Pool Metrics & History
//!
//! Point-in-time pool metrics plus the bounded history buffer used for
//! predictive scaling.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One metrics sample of a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub current_workers: u32,
    pub idle_workers: u32,
    pub busy_workers: u32,
    pub queue_depth: u32,
    /// Fraction in [0, 1]
    pub cpu_utilization: f64,
    /// Fraction in [0, 1]
    pub memory_utilization: f64,
    pub avg_task_latency_ms: f64,
    pub tasks_per_minute: f64,
    pub sampled_at: DateTime<Utc>,
}

impl PoolMetrics {
    /// Fraction of workers currently idle.
    pub fn idle_fraction(&self) -> f64 {
        if self.current_workers == 0 {
            0.0
        } else {
            f64::from(self.idle_workers) / f64::from(self.current_workers)
        }
    }

    /// Load figure used for trend analysis: queued plus in-flight work.
    pub fn load(&self) -> f64 {
        f64::from(self.queue_depth) + f64::from(self.busy_workers)
    }
}

/// Bounded metrics buffer (default capacity 1000 samples).
#[derive(Debug)]
pub struct MetricsHistory {
    buffer: VecDeque<PoolMetrics>,
    capacity: usize,
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, metrics: PoolMetrics) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(metrics);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Load trend over the last `window` samples: average load of the recent
    /// half divided by the average of the half before it. `None` until the
    /// window is full. A prior-half average of zero with recent load reads
    /// as a strong rise.
    pub fn load_trend(&self, window: usize) -> Option<f64> {
        if window < 2 || self.buffer.len() < window {
            return None;
        }
        let samples: Vec<f64> = self
            .buffer
            .iter()
            .skip(self.buffer.len() - window)
            .map(PoolMetrics::load)
            .collect();
        let half = window / 2;
        let prior_avg: f64 = samples[..half].iter().sum::<f64>() / half as f64;
        let recent_avg: f64 =
            samples[half..].iter().sum::<f64>() / (window - half) as f64;

        if prior_avg <= f64::EPSILON {
            return Some(if recent_avg > f64::EPSILON { f64::MAX } else { 1.0 });
        }
        Some(recent_avg / prior_avg)
    }
}

impl Default for MetricsHistory {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(queue_depth: u32, busy: u32) -> PoolMetrics {
        PoolMetrics {
            current_workers: busy + 1,
            idle_workers: 1,
            busy_workers: busy,
            queue_depth,
            cpu_utilization: 0.5,
            memory_utilization: 0.5,
            avg_task_latency_ms: 100.0,
            tasks_per_minute: 10.0,
            sampled_at: Utc::now(),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = MetricsHistory::new(5);
        for i in 0..10 {
            history.push(sample(i, 0));
        }
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn test_trend_requires_full_window() {
        let mut history = MetricsHistory::default();
        for i in 0..9 {
            history.push(sample(i, 0));
        }
        assert!(history.load_trend(10).is_none());
        history.push(sample(9, 0));
        assert!(history.load_trend(10).is_some());
    }

    #[test]
    fn test_rising_trend() {
        let mut history = MetricsHistory::default();
        for depth in [2, 2, 2, 2, 2, 10, 10, 10, 10, 10] {
            history.push(sample(depth, 0));
        }
        let trend = history.load_trend(10).unwrap();
        assert!(trend > 1.5, "trend was {trend}");
    }

    #[test]
    fn test_flat_trend() {
        let mut history = MetricsHistory::default();
        for _ in 0..10 {
            history.push(sample(5, 1));
        }
        let trend = history.load_trend(10).unwrap();
        assert!((trend - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_fraction() {
        let metrics = PoolMetrics {
            current_workers: 4,
            idle_workers: 3,
            busy_workers: 1,
            queue_depth: 0,
            cpu_utilization: 0.1,
            memory_utilization: 0.1,
            avg_task_latency_ms: 0.0,
            tasks_per_minute: 0.0,
            sampled_at: Utc::now(),
        };
        assert!((metrics.idle_fraction() - 0.75).abs() < 1e-9);
    }
}
