//! Shipwright-Sentinel: Fallback Ladder
//!
//! When a tool fails terminally, try functionally-similar tools in a fixed
//! order: the primary, then allowlisted tools in the same category, then the
//! rest of the allowlist. Each tool is tried at most once; the first success
//! wins.
//!
//! Category is the second segment of a dotted tool id:
//! `tool.intake.normalizer` -> `intake`.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a dotted tool id, if it has one.
pub fn category_of(tool_id: &str) -> Option<&str> {
    tool_id.split('.').nth(1)
}

/// One failed rung of the ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderAttempt {
    pub tool_id: String,
    pub error: String,
}

/// Success plus the failures that preceded it.
#[derive(Debug, Clone)]
pub struct LadderSuccess<T> {
    pub tool_id: String,
    pub value: T,
    pub failed_attempts: Vec<LadderAttempt>,
}

/// Every rung failed.
#[derive(Debug, Error)]
#[error("all {} tools in the fallback ladder failed (primary '{primary}')", .attempts.len())]
pub struct LadderError {
    pub primary: String,
    pub attempts: Vec<LadderAttempt>,
}

/// Ordered fallback execution over tool ids.
pub struct FallbackLadder;

impl FallbackLadder {
    /// Build the try-order: primary, same-category allowlist entries, then
    /// remaining allowlist entries. Duplicates are dropped; every allowed
    /// tool appears at most once.
    pub fn build_order(primary: &str, allowlist: &[String]) -> Vec<String> {
        let mut order = vec![primary.to_string()];
        let primary_category = category_of(primary);

        for tool in allowlist {
            if tool != primary
                && category_of(tool) == primary_category
                && !order.contains(tool)
            {
                order.push(tool.clone());
            }
        }
        for tool in allowlist {
            if !order.contains(tool) {
                order.push(tool.clone());
            }
        }
        order
    }

    /// Execute `invoke` along the ladder. Returns the first success or the
    /// aggregate of every failure.
    pub async fn execute<T, F, Fut>(
        primary: &str,
        allowlist: &[String],
        mut invoke: F,
    ) -> Result<LadderSuccess<T>, LadderError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let order = Self::build_order(primary, allowlist);
        let mut attempts = Vec::new();

        for tool_id in order {
            match invoke(tool_id.clone()).await {
                Ok(value) => {
                    if !attempts.is_empty() {
                        tracing::info!(
                            tool_id = %tool_id,
                            failed_before = attempts.len(),
                            "Fallback ladder recovered"
                        );
                    }
                    return Ok(LadderSuccess {
                        tool_id,
                        value,
                        failed_attempts: attempts,
                    });
                }
                Err(error) => {
                    tracing::warn!(tool_id = %tool_id, error = %error, "Ladder rung failed");
                    attempts.push(LadderAttempt { tool_id, error });
                }
            }
        }

        Err(LadderError {
            primary: primary.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_category_extraction() {
        assert_eq!(category_of("tool.intake.normalizer"), Some("intake"));
        assert_eq!(category_of("tool.qa.e2e"), Some("qa"));
        assert_eq!(category_of("flat"), None);
    }

    #[test]
    fn test_order_prefers_same_category() {
        let order = FallbackLadder::build_order(
            "tool.qa.e2e",
            &ids(&["tool.intake.normalizer", "tool.qa.unit", "tool.qa.e2e"]),
        );
        assert_eq!(
            order,
            ids(&["tool.qa.e2e", "tool.qa.unit", "tool.intake.normalizer"])
        );
    }

    #[test]
    fn test_order_has_no_duplicates() {
        let order = FallbackLadder::build_order(
            "tool.qa.e2e",
            &ids(&["tool.qa.e2e", "tool.qa.unit", "tool.qa.unit"]),
        );
        assert_eq!(order, ids(&["tool.qa.e2e", "tool.qa.unit"]));
    }

    #[tokio::test]
    async fn test_first_success_stops_the_ladder() {
        let tried = Mutex::new(Vec::new());
        let result = FallbackLadder::execute(
            "tool.qa.e2e",
            &ids(&["tool.qa.unit", "tool.build.scaffold"]),
            |tool| {
                tried.lock().push(tool.clone());
                async move {
                    if tool == "tool.qa.unit" {
                        Ok("report")
                    } else {
                        Err(format!("{tool} unavailable"))
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result.tool_id, "tool.qa.unit");
        assert_eq!(result.failed_attempts.len(), 1);
        // build.scaffold never tried
        assert_eq!(tried.lock().as_slice(), &ids(&["tool.qa.e2e", "tool.qa.unit"]));
    }

    #[tokio::test]
    async fn test_every_tool_tried_once_then_aggregate_error() {
        let tried = Mutex::new(Vec::new());
        let err = FallbackLadder::execute(
            "tool.qa.e2e",
            &ids(&["tool.qa.unit", "tool.build.scaffold"]),
            |tool| {
                tried.lock().push(tool.clone());
                async move { Err::<(), _>(format!("{tool} down")) }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.attempts.len(), 3);
        assert_eq!(tried.lock().len(), 3);
        assert_eq!(err.primary, "tool.qa.e2e");
    }
}
