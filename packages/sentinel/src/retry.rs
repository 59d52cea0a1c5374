//! Shipwright-Sentinel: Retry Policy Engine
//!
//! Maps an error class to a retry policy: attempt cap, backoff family, delay
//! bounds, jitter, and what to do when retries are exhausted.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::class::ErrorClass;

/// Backoff family. `f(k)` over the 0-indexed attempt `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base * 2^k`
    Exponential,
    /// `base * (k + 1)`
    Linear,
    /// `base`
    Constant,
}

/// What to do when a policy's retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    /// Hand off to a repair agent
    FixSynth,
    /// Defer to the fallback ladder
    AlternateTool,
    /// Surface the failure
    Fail,
}

/// Retry policy for one error class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter fraction in [0, 1]; the jitter span is `jitter * delay / 2`
    pub jitter: f64,
    pub escalation: Escalation,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            backoff,
            base_delay_ms,
            max_delay_ms,
            jitter: 0.2,
            escalation: Escalation::Fail,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = escalation;
        self
    }

    /// Deterministic delay for attempt `k` (0-indexed): `min(max, base * f(k))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor: u64 = match self.backoff {
            Backoff::Exponential => 1u64.checked_shl(attempt).unwrap_or(u64::MAX),
            Backoff::Linear => u64::from(attempt) + 1,
            Backoff::Constant => 1,
        };
        let raw = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(raw.min(self.max_delay_ms))
    }

    /// Delay for attempt `k` with jitter applied. The jitter span has
    /// magnitude `jitter * delay / 2` and only ever shaves time off, so the
    /// jittered delay never exceeds [`Self::delay_for`] and total sleep
    /// across a retry loop stays bounded by the sum of deterministic delays.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let span = delay.as_millis() as f64 * self.jitter / 2.0;
        let shave = rand::rng().random_range(0.0..=span);
        Duration::from_millis((delay.as_millis() as f64 - shave).max(0.0) as u64)
    }
}

/// Per-class policy table, config-overridable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyTable {
    policies: HashMap<ErrorClass, RetryPolicy>,
}

impl RetryPolicyTable {
    /// Table with one entry per class and no gaps.
    pub fn standard() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            ErrorClass::Transient,
            RetryPolicy::new(3, Backoff::Exponential, 200, 5_000),
        );
        policies.insert(
            ErrorClass::Schema,
            RetryPolicy::new(0, Backoff::Constant, 0, 0).with_escalation(Escalation::FixSynth),
        );
        policies.insert(
            ErrorClass::ToolInfra,
            RetryPolicy::new(2, Backoff::Exponential, 500, 10_000)
                .with_escalation(Escalation::AlternateTool),
        );
        policies.insert(
            ErrorClass::Hallucination,
            RetryPolicy::new(0, Backoff::Constant, 0, 0).with_escalation(Escalation::FixSynth),
        );
        // Aggressive: throttling clears on its own, given enough patience
        policies.insert(
            ErrorClass::RateLimit,
            RetryPolicy::new(5, Backoff::Exponential, 1_000, 60_000),
        );
        policies.insert(
            ErrorClass::Unknown,
            RetryPolicy::new(2, Backoff::Exponential, 300, 5_000),
        );
        Self { policies }
    }

    /// Replace the policy for one class.
    pub fn with_policy(mut self, class: ErrorClass, policy: RetryPolicy) -> Self {
        self.policies.insert(class, policy);
        self
    }

    /// Policy for a class. The standard table covers every class; a pruned
    /// table falls back to the Unknown policy.
    pub fn policy_for(&self, class: ErrorClass) -> RetryPolicy {
        self.policies
            .get(&class)
            .or_else(|| self.policies.get(&ErrorClass::Unknown))
            .cloned()
            .unwrap_or_else(|| RetryPolicy::new(2, Backoff::Exponential, 300, 5_000))
    }
}

impl Default for RetryPolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays_capped() {
        let policy = RetryPolicy::new(5, Backoff::Exponential, 200, 1_000);
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for(2), Duration::from_millis(800));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_linear_and_constant_delays() {
        let linear = RetryPolicy::new(3, Backoff::Linear, 100, 10_000);
        assert_eq!(linear.delay_for(0), Duration::from_millis(100));
        assert_eq!(linear.delay_for(2), Duration::from_millis(300));

        let constant = RetryPolicy::new(3, Backoff::Constant, 250, 10_000);
        assert_eq!(constant.delay_for(0), Duration::from_millis(250));
        assert_eq!(constant.delay_for(5), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_never_exceeds_deterministic_delay() {
        let policy = RetryPolicy::new(3, Backoff::Exponential, 200, 5_000).with_jitter(0.5);
        for attempt in 0..4 {
            let cap = policy.delay_for(attempt);
            for _ in 0..50 {
                assert!(policy.jittered_delay(attempt) <= cap);
            }
        }
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::new(100, Backoff::Exponential, 200, 30_000);
        assert_eq!(policy.delay_for(63), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(64), Duration::from_millis(30_000));
    }

    #[test]
    fn test_standard_table_covers_all_classes() {
        let table = RetryPolicyTable::standard();
        assert_eq!(table.policy_for(ErrorClass::Schema).max_retries, 0);
        assert_eq!(
            table.policy_for(ErrorClass::Schema).escalation,
            Escalation::FixSynth
        );
        assert_eq!(
            table.policy_for(ErrorClass::ToolInfra).escalation,
            Escalation::AlternateTool
        );
        assert_eq!(table.policy_for(ErrorClass::RateLimit).max_delay_ms, 60_000);
    }
}
