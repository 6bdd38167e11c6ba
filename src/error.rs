use thiserror::Error;

/// Convenience type alias for Results produced by the kernel and its components.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Error kinds surfaced to callers of the kernel.
///
/// Propagation policy: `PermissionDenied`, `RateLimitExceeded`,
/// `ValidationFailed`, `NotFound` and `Duplicate` are synchronous failures
/// raised at the call site. `Timeout`, `Cancelled` and `ExecutionError` are
/// task-level outcomes captured by the orchestrator rather than bubbled as
/// an `Err` out of `execute_task`; see [`KernelError::is_task_outcome`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        KernelError::Serialization(e.to_string())
    }
}

impl KernelError {
    pub fn agent_not_found(id: impl std::fmt::Display) -> Self {
        KernelError::NotFound(format!("agent '{id}' not found"))
    }

    /// True for the task-level outcomes the orchestrator captures in a
    /// task result rather than treating as a synchronous call failure.
    pub fn is_task_outcome(&self) -> bool {
        matches!(
            self,
            KernelError::Timeout(_) | KernelError::Cancelled(_) | KernelError::ExecutionError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_outcome_classification() {
        assert!(KernelError::Timeout("x".into()).is_task_outcome());
        assert!(KernelError::Cancelled("x".into()).is_task_outcome());
        assert!(KernelError::ExecutionError("x".into()).is_task_outcome());
        assert!(!KernelError::PermissionDenied("x".into()).is_task_outcome());
        assert!(!KernelError::NotFound("x".into()).is_task_outcome());
    }

    #[test]
    fn display_messages_carry_context() {
        let err = KernelError::RateLimitExceeded("agent a1 over quota".into());
        assert_eq!(err.to_string(), "rate limit exceeded: agent a1 over quota");
    }
}
