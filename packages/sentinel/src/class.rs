//! Shipwright-Sentinel: Error Taxonomy
//!
//! Closed set of error classes the retry engine keys on. Classification is a
//! text heuristic used when the caller does not supply a class explicitly.

use serde::{Deserialize, Serialize};

/// The closed error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network blips, DB deadlocks, timeouts
    Transient,
    /// Output failed schema validation
    Schema,
    /// The tool itself broke (crash, bad exit, internal error)
    ToolInfra,
    /// Fabricated or guard-violating agent output
    Hallucination,
    /// Throttled by an upstream service
    RateLimit,
    /// Anything we cannot classify
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Schema => "schema",
            Self::ToolInfra => "tool_infra",
            Self::Hallucination => "hallucination",
            Self::RateLimit => "rate_limit",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the same call may be retried as-is. Schema and hallucination
    /// failures will fail the same way again; they route to escalation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient | Self::ToolInfra | Self::RateLimit | Self::Unknown
        )
    }

    /// Heuristic classification from error text. Callers may override by
    /// attaching an explicit class to the error.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();

        // Rate limiting first: "429 too many requests" also mentions "request"
        if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("429")
            || lower.contains("throttl")
        {
            return Self::RateLimit;
        }
        if lower.contains("hallucinat")
            || lower.contains("fabricat")
            || lower.contains("grounding violation")
            || lower.contains("guard violation")
        {
            return Self::Hallucination;
        }
        if lower.contains("schema")
            || lower.contains("validation failed")
            || lower.contains("invalid json")
            || lower.contains("parse error")
            || lower.contains("missing required field")
        {
            return Self::Schema;
        }
        if lower.contains("tool crashed")
            || lower.contains("tool error")
            || lower.contains("exit code")
            || lower.contains("internal tool")
        {
            return Self::ToolInfra;
        }
        if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("connection")
            || lower.contains("deadlock")
            || lower.contains("unavailable")
            || lower.contains("reset by peer")
            || lower.contains("network")
        {
            return Self::Transient;
        }
        Self::Unknown
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
