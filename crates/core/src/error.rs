use std::time::Duration;

/// Failure taxonomy for the generation pipeline.
///
/// Everything here is terminal for the task that hit it: the lifecycle
/// manager converts the error into a FAILED record and nothing is retried
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or missing request fields, caught before any backend call.
    #[error("{0}")]
    Validation(String),

    /// The backend rejected the workflow at submission time or was
    /// unreachable. Carries the backend's own message where available.
    #[error("backend rejected submission: {0}")]
    Submission(String),

    /// The backend reported an execution error over the push channel or in
    /// the job history record.
    #[error("generation failed: {0}")]
    ExecutionFailed(String),

    /// The job completed but none of the known output shapes contained an
    /// artifact reference.
    #[error("no video artifact found in job outputs")]
    NoArtifactFound,

    /// The polling budget ran out before an artifact appeared.
    #[error("polling timed out after {attempts} attempts")]
    PollTimeout { attempts: u32 },

    /// The absolute per-job ceiling elapsed without a resolution.
    #[error("job did not complete within {0:?}")]
    OverallTimeout(Duration),

    /// Transport-level failure talking to the backend outside of the
    /// submission call (history fetch, artifact download).
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl EngineError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            EngineError::PollTimeout { .. } | EngineError::OverallTimeout(_)
        )
    }
}
