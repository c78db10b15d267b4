//! Error taxonomy for vbatch.
//!
//! Job-level failures never surface here: they become [`JobStatus`] values on
//! a [`JobResult`]. These errors cover setup, persistence and delivery.
//!
//! [`JobStatus`]: crate::domain::JobStatus
//! [`JobResult`]: crate::domain::JobResult

/// vbatch errors.
#[derive(Debug, thiserror::Error)]
pub enum VbatchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),

    #[error("duplicate job id in catalog: {0}")]
    DuplicateJobId(String),

    #[error("invalid discovery pattern {pattern}: {reason}")]
    Discovery { pattern: String, reason: String },

    #[error("tool command for {kind} is empty")]
    EmptyCommand { kind: String },

    #[error("notification via {channel} failed: {reason}")]
    Notification { channel: String, reason: String },

    #[error("report source {source_name} unreadable: {reason}")]
    Source { source_name: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] vbatch_state::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VbatchError {
    /// Setup errors map to the dedicated CLI exit code.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            VbatchError::Config(_)
                | VbatchError::ConfigNotFound(_)
                | VbatchError::DuplicateJobId(_)
                | VbatchError::Discovery { .. }
                | VbatchError::EmptyCommand { .. }
        )
    }
}

/// Result type for vbatch operations.
pub type Result<T> = std::result::Result<T, VbatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VbatchError::DuplicateJobId("model:Paxos".to_string());
        assert!(err.to_string().contains("model:Paxos"));

        let err = VbatchError::Notification {
            channel: "email".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("email"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_setup_error_classification() {
        assert!(VbatchError::Config("max_parallel must be > 0".into()).is_setup_error());
        assert!(VbatchError::ConfigNotFound("vbatch.json".into()).is_setup_error());
        let io = VbatchError::Io(std::io::Error::other("disk"));
        assert!(!io.is_setup_error());
    }
}
