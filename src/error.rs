//! Typed error taxonomy for the open-job pipeline.
//!
//! Most of the codebase threads `anyhow::Result` through for convenience (the
//! teacher's house style), but the boundaries the spec calls out as needing
//! typed recovery - broker validation, guardrails, DB uniqueness - get their
//! own variants here so callers can match on them instead of grepping strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("environment validation failed: {0}")]
    EnvValidation(String),

    #[error("transport error calling {url}: {status} {status_text}")]
    Transport {
        url: String,
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("broker rejected order: {message}")]
    BrokerValidation {
        message: String,
        violations: Vec<String>,
    },

    #[error("broker reports insufficient buying power: {message}")]
    BrokerInsufficientFunds { message: String },

    #[error("guardrail blocked: {guard} - {message}")]
    GuardrailBlocked {
        guard: String,
        message: String,
        context: Option<serde_json::Value>,
    },

    #[error("unique constraint violated on {columns:?}")]
    DbUniqueConstraint { columns: Vec<String> },

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl WorkerError {
    /// Exit code per spec.md §6: 0 success, 1 FAILED job-run, 2 invalid environment.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerError::EnvValidation(_) => 2,
            _ => 1,
        }
    }

    /// Does this broker validation failure match the fractional/notional fallback
    /// trigger regex from spec.md §4.7 step 5?
    pub fn is_fallback_trigger(&self) -> bool {
        match self {
            WorkerError::BrokerValidation {
                message,
                violations,
            } => {
                let re_hit = |s: &str| {
                    let lower = s.to_lowercase();
                    lower.contains("notional") || lower.contains("fraction")
                };
                re_hit(message) || violations.iter().any(|v| re_hit(v))
            }
            _ => false,
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
