//! Shipwright-Conductor: Budget Ledger
//!
//! Tracks USD and token spend per (run, phase) against the phase's cap. The
//! analyzer draws its remaining-budget snapshot from here, and the
//! coordinator refuses to start a phase whose cap is already gone.
//! Enforcement can be disabled to track without blocking (dry runs).

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use shipwright_toolkit::BudgetSnapshot;

use crate::error::ConductorError;
use crate::phase::{Phase, PhaseBudget};

#[derive(Debug, Clone, Copy, Default)]
struct Spend {
    usd: f64,
    tokens: u64,
}

/// Spend so far for one (run, phase).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpendSnapshot {
    pub spent_usd: f64,
    pub spent_tokens: u64,
}

/// Per-(run, phase) spend ledger.
pub struct BudgetLedger {
    entries: Mutex<HashMap<(String, Phase), Spend>>,
    enforce: bool,
}

impl BudgetLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            enforce: true,
        }
    }

    /// Track spend without ever blocking.
    pub fn tracking_only() -> Self {
        Self {
            enforce: false,
            ..Self::new()
        }
    }

    /// Charge spend against a phase cap. The charge always lands in the
    /// ledger; when enforcement is on and the cap is crossed, the caller
    /// gets the exhaustion error to act on.
    pub fn charge(
        &self,
        run_id: &str,
        phase: Phase,
        cap: &PhaseBudget,
        usd: f64,
        tokens: u64,
    ) -> Result<(), ConductorError> {
        let mut entries = self.entries.lock();
        let spend = entries.entry((run_id.to_string(), phase)).or_default();
        spend.usd += usd;
        spend.tokens += tokens;

        if self.enforce && (spend.usd > cap.usd || spend.tokens > cap.tokens) {
            tracing::warn!(
                run_id = %run_id,
                phase = %phase,
                spent_usd = spend.usd,
                cap_usd = cap.usd,
                "Phase budget exhausted"
            );
            return Err(ConductorError::BudgetExhausted {
                run_id: run_id.to_string(),
                phase: phase.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Is the cap already crossed?
    pub fn is_exhausted(&self, run_id: &str, phase: Phase, cap: &PhaseBudget) -> bool {
        if !self.enforce {
            return false;
        }
        let entries = self.entries.lock();
        entries
            .get(&(run_id.to_string(), phase))
            .is_some_and(|s| s.usd >= cap.usd || s.tokens >= cap.tokens)
    }

    /// Remaining budget, as the analyzer consumes it.
    pub fn remaining(&self, run_id: &str, phase: Phase, cap: &PhaseBudget) -> BudgetSnapshot {
        let entries = self.entries.lock();
        let spend = entries
            .get(&(run_id.to_string(), phase))
            .copied()
            .unwrap_or_default();
        BudgetSnapshot {
            remaining_usd: (cap.usd - spend.usd).max(0.0),
            remaining_tokens: cap.tokens.saturating_sub(spend.tokens),
        }
    }

    /// Spend so far.
    pub fn spent(&self, run_id: &str, phase: Phase) -> SpendSnapshot {
        let entries = self.entries.lock();
        let spend = entries
            .get(&(run_id.to_string(), phase))
            .copied()
            .unwrap_or_default();
        SpendSnapshot {
            spent_usd: spend.usd,
            spent_tokens: spend.tokens,
        }
    }
}

impl Default for BudgetLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: PhaseBudget = PhaseBudget {
        usd: 10.0,
        tokens: 1_000,
    };

    #[test]
    fn test_charge_and_remaining() {
        let ledger = BudgetLedger::new();
        ledger.charge("run-1", Phase::Build, &CAP, 3.0, 400).unwrap();

        let remaining = ledger.remaining("run-1", Phase::Build, &CAP);
        assert!((remaining.remaining_usd - 7.0).abs() < 1e-9);
        assert_eq!(remaining.remaining_tokens, 600);
        assert!(!ledger.is_exhausted("run-1", Phase::Build, &CAP));
    }

    #[test]
    fn test_crossing_cap_errors_but_records() {
        let ledger = BudgetLedger::new();
        ledger.charge("run-1", Phase::Build, &CAP, 8.0, 100).unwrap();
        let result = ledger.charge("run-1", Phase::Build, &CAP, 5.0, 100);
        assert!(matches!(result, Err(ConductorError::BudgetExhausted { .. })));

        // The spend landed regardless
        let spent = ledger.spent("run-1", Phase::Build);
        assert!((spent.spent_usd - 13.0).abs() < 1e-9);
        assert!(ledger.is_exhausted("run-1", Phase::Build, &CAP));
        assert!((ledger.remaining("run-1", Phase::Build, &CAP).remaining_usd).abs() < 1e-9);
    }

    #[test]
    fn test_token_cap_counts_too() {
        let ledger = BudgetLedger::new();
        let result = ledger.charge("run-1", Phase::Qa, &CAP, 0.1, 2_000);
        assert!(result.is_err());
    }

    #[test]
    fn test_phases_are_isolated() {
        let ledger = BudgetLedger::new();
        ledger.charge("run-1", Phase::Build, &CAP, 9.0, 900).unwrap();
        assert!(!ledger.is_exhausted("run-1", Phase::Qa, &CAP));
    }

    #[test]
    fn test_tracking_only_never_blocks() {
        let ledger = BudgetLedger::tracking_only();
        ledger.charge("run-1", Phase::Build, &CAP, 100.0, 1).unwrap();
        assert!(!ledger.is_exhausted("run-1", Phase::Build, &CAP));
    }
}
