use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schedule definition cannot be turned into a trigger (unknown kind,
    /// bad or missing cron expression). Surfaced to the caller; never armed.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No schedule with the given ID exists in the store.
    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    /// A persisted JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// `initialize()` was called more than once for the same process.
    #[error("Orchestrator already initialized")]
    AlreadyInitialized,
}

impl SchedulerError {
    /// True for errors the user can fix by editing the schedule.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SchedulerError::InvalidSchedule(_))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Why a pipeline run failed. The `Display` text is what gets stored in
/// `last_error` and `error_message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineFailure {
    #[error("no content found")]
    NoContent,

    #[error("content extraction timed out after {secs}s")]
    ExtractTimeout { secs: u64 },

    #[error("failed to generate QA pairs")]
    NoQaPairs,

    #[error("QA generation timed out after {secs}s")]
    GenerateTimeout { secs: u64 },

    #[error("failed to serialize artifact: {0}")]
    Serialize(String),

    #[error("artifact storage failed: {0}")]
    Storage(String),

    #[error("artifact upload timed out after {secs}s")]
    StoreTimeout { secs: u64 },

    #[error("pipeline run panicked")]
    Panicked,
}

impl PipelineFailure {
    /// Pipeline stage the failure belongs to, for structured logs.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineFailure::NoContent | PipelineFailure::ExtractTimeout { .. } => "extract",
            PipelineFailure::NoQaPairs | PipelineFailure::GenerateTimeout { .. } => "generate",
            PipelineFailure::Serialize(_)
            | PipelineFailure::Storage(_)
            | PipelineFailure::StoreTimeout { .. } => "store",
            PipelineFailure::Panicked => "dispatch",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PipelineFailure::ExtractTimeout { .. }
                | PipelineFailure::GenerateTimeout { .. }
                | PipelineFailure::StoreTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_stage_failures_read_as_recorded() {
        let serialize = PipelineFailure::Serialize("key must be a string".into());
        assert_eq!(
            serialize.to_string(),
            "failed to serialize artifact: key must be a string"
        );
        assert_eq!(serialize.stage(), "store");
        assert!(!serialize.is_timeout());

        let timeout = PipelineFailure::StoreTimeout { secs: 120 };
        assert_eq!(timeout.to_string(), "artifact upload timed out after 120s");
        assert_eq!(timeout.stage(), "store");
        assert!(timeout.is_timeout());
    }
}
