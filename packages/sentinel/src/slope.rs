//! Shipwright-Sentinel: Progress-Slope Monitor
//!
//! Buffers (timestamp, percent) samples per task and flags a plateau when the
//! average of the most recent window stops improving on the window before it.
//! A plateaued task is still running; it just is not getting anywhere, which
//! heartbeats alone cannot see.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Plateau detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlopeConfig {
    /// Samples per comparison window
    pub window: usize,
    /// Minimum improvement (percent points) between windows to count as progress
    pub epsilon: f64,
}

impl Default for SlopeConfig {
    fn default() -> Self {
        Self {
            window: 5,
            epsilon: 0.5,
        }
    }
}

/// Verdict for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlateauStatus {
    /// Not enough samples for two full windows yet
    InsufficientData,
    /// Recent window improved on the prior one
    Progressing,
    /// Improvement below epsilon
    Plateaued { recent_avg: f64, prior_avg: f64 },
}

/// Per-task progress sample buffers.
pub struct ProgressMonitor {
    config: SlopeConfig,
    samples: Mutex<HashMap<String, VecDeque<(DateTime<Utc>, f64)>>>,
}

impl ProgressMonitor {
    pub fn new(config: SlopeConfig) -> Self {
        Self {
            config,
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Record a progress sample for a task. Percent is clamped to [0, 100].
    /// The buffer holds exactly two windows; older samples fall off.
    pub fn record(&self, task_id: &str, percent: f64) {
        let mut samples = self.samples.lock();
        let buffer = samples.entry(task_id.to_string()).or_default();
        buffer.push_back((Utc::now(), percent.clamp(0.0, 100.0)));
        while buffer.len() > self.config.window * 2 {
            buffer.pop_front();
        }
    }

    /// Evaluate one task's slope.
    pub fn check(&self, task_id: &str) -> PlateauStatus {
        let samples = self.samples.lock();
        let Some(buffer) = samples.get(task_id) else {
            return PlateauStatus::InsufficientData;
        };
        if buffer.len() < self.config.window * 2 {
            return PlateauStatus::InsufficientData;
        }

        let values: Vec<f64> = buffer.iter().map(|(_, p)| *p).collect();
        let (prior, recent) = values.split_at(values.len() - self.config.window);
        let prior = &prior[prior.len() - self.config.window..];

        let prior_avg = prior.iter().sum::<f64>() / prior.len() as f64;
        let recent_avg = recent.iter().sum::<f64>() / recent.len() as f64;

        if recent_avg - prior_avg < self.config.epsilon {
            PlateauStatus::Plateaued {
                recent_avg,
                prior_avg,
            }
        } else {
            PlateauStatus::Progressing
        }
    }

    /// Evaluate every tracked task; returns the plateaued ones.
    pub fn plateaued_tasks(&self) -> Vec<String> {
        let ids: Vec<String> = self.samples.lock().keys().cloned().collect();
        ids.into_iter()
            .filter(|id| matches!(self.check(id), PlateauStatus::Plateaued { .. }))
            .collect()
    }

    /// Drop a task's buffer.
    pub fn forget(&self, task_id: &str) {
        self.samples.lock().remove(task_id);
    }

    pub fn tracked_count(&self) -> usize {
        self.samples.lock().len()
    }
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new(SlopeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(window: usize, epsilon: f64) -> ProgressMonitor {
        ProgressMonitor::new(SlopeConfig { window, epsilon })
    }

    #[test]
    fn test_insufficient_data_before_two_windows() {
        let m = monitor(3, 0.5);
        for p in [10.0, 20.0, 30.0, 40.0, 50.0] {
            m.record("t", p);
        }
        assert_eq!(m.check("t"), PlateauStatus::InsufficientData);
    }

    #[test]
    fn test_progressing_task() {
        let m = monitor(3, 0.5);
        for p in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0] {
            m.record("t", p);
        }
        assert_eq!(m.check("t"), PlateauStatus::Progressing);
    }

    #[test]
    fn test_plateau_detected() {
        let m = monitor(3, 0.5);
        for p in [42.0, 42.0, 42.1, 42.1, 42.2, 42.2] {
            m.record("t", p);
        }
        match m.check("t") {
            PlateauStatus::Plateaued { recent_avg, prior_avg } => {
                assert!(recent_avg - prior_avg < 0.5);
            }
            other => panic!("expected plateau, got {other:?}"),
        }
        assert_eq!(m.plateaued_tasks(), vec!["t".to_string()]);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let m = monitor(3, 0.5);
        for i in 0..100 {
            m.record("t", i as f64);
        }
        // Only the last 6 samples remain: [94..100) vs [97..100)
        assert_eq!(m.check("t"), PlateauStatus::Progressing);
        let samples = m.samples.lock();
        assert_eq!(samples.get("t").unwrap().len(), 6);
    }

    #[test]
    fn test_unknown_task() {
        let m = monitor(3, 0.5);
        assert_eq!(m.check("nope"), PlateauStatus::InsufficientData);
    }
}
