//! Error taxonomy for the swarm orchestration core.
//!
//! Every public operation returns a [`SwarmError`] on failure. Capacity and
//! validation problems are reported to the caller immediately; timeouts are
//! surfaced as a distinct condition so callers can distinguish a slow
//! collaborator from a rejected request.

use thiserror::Error;

/// Errors produced by the orchestration core.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// No agent or worker slot is available, or a pool is at its maximum.
    /// Not retried automatically except through the queue-drain mechanism.
    #[error("capacity error: {0}")]
    Capacity(String),

    /// Malformed input: unknown reference, missing required field, or a
    /// value outside its documented range. Rejected before any state change.
    #[error("validation error: {0}")]
    Validation(String),

    /// An outbound call or a boomerang turnaround exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A referenced agent, task, pool, workflow, or memory entry does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `"agent"` or `"task"`.
        kind: &'static str,
        /// The identifier that failed to resolve.
        id: String,
    },

    /// The durable storage backend reported a failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    /// A downstream collaborator returned an error payload.
    #[error("integration error: {0}")]
    Integration(String),
}

impl SwarmError {
    /// Short machine-readable code for the error category, used in the
    /// caller-facing error payload.
    pub fn code(&self) -> &'static str {
        match self {
            SwarmError::Capacity(_) => "capacity",
            SwarmError::Validation(_) => "validation",
            SwarmError::Timeout(_) => "timeout",
            SwarmError::NotFound { .. } => "not_found",
            SwarmError::Persistence(_) => "persistence",
            SwarmError::Integration(_) => "integration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SwarmError::Capacity("full".into()).code(), "capacity");
        assert_eq!(
            SwarmError::NotFound { kind: "agent", id: "a-1".into() }.code(),
            "not_found"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = SwarmError::NotFound { kind: "task", id: "t-9".into() };
        assert_eq!(err.to_string(), "task not found: t-9");
    }
}
