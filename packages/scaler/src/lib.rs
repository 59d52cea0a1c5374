//! Shipwright-Scaler: Autoscaling & Worker Pools
//!
//! Per (shard, phase, resource-class) worker pools scaled on queue depth and
//! utilization:
//! - Scaling policies with bounds, thresholds, step sizes, and per-direction
//!   cooldowns
//! - Worker lifecycle: initializing -> idle -> busy -> draining -> terminated
//! - Bounded metrics history feeding predictive scale-up boosts
//! - Graceful drain that picks the longest-idle workers first
//!
//! The autoscaler exclusively owns workers and policies; everything else
//! observes pools read-only through their metrics.

pub mod autoscaler;
pub mod decision;
pub mod metrics;
pub mod policy;
pub mod worker;

pub use autoscaler::{Autoscaler, AutoscalerConfig};
pub use decision::{DecisionStatus, ScalingAction, ScalingDecision};
pub use metrics::{MetricsHistory, PoolMetrics};
pub use policy::{ResourceClass, ScalerError, ScalingPolicy};
pub use worker::{Worker, WorkerCounts, WorkerPool, WorkerState};
