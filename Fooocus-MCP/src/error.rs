use fooocus_rs::FooocusError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to tool callers.
///
/// Every variant is reported as a normal tool response with an error flag;
/// none of them terminates the server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// The request was malformed. Not retryable as-is.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Admission rejected because the concurrency ceiling was reached.
    #[error("Too many concurrent jobs ({active}/{limit} running)")]
    Capacity { active: usize, limit: usize },

    /// Health probe or backend start failed.
    #[error("Fooocus backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend refused the job.
    #[error("Fooocus rejected the job: {0}")]
    SubmissionFailed(String),

    /// A single status poll failed in transit.
    #[error("Status poll failed: {0}")]
    PollFailure(String),

    /// The backend reported the job as failed.
    #[error("Generation failed: {0}")]
    JobError(String),

    /// The job exceeded the configured wall-clock limit.
    #[error("Job {job_id} timed out after {}s", .elapsed.as_secs())]
    Timeout { job_id: String, elapsed: Duration },

    /// Writing to the output directory failed.
    #[error("Output storage error: {0}")]
    Storage(String),

    #[error("Server is shutting down, no new jobs are accepted")]
    ShuttingDown,
}

impl GenerationError {
    /// Stable snake_case label for logs and tool output.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Validation(_) => "validation_error",
            GenerationError::Capacity { .. } => "capacity_error",
            GenerationError::BackendUnavailable(_) => "backend_unavailable",
            GenerationError::SubmissionFailed(_) => "submission_failed",
            GenerationError::PollFailure(_) => "poll_failure",
            GenerationError::JobError(_) => "job_error",
            GenerationError::Timeout { .. } => "timeout",
            GenerationError::Storage(_) => "storage_error",
            GenerationError::ShuttingDown => "shutting_down",
        }
    }

    /// Whether the same call may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Capacity { .. }
                | GenerationError::BackendUnavailable(_)
                | GenerationError::PollFailure(_)
                | GenerationError::Timeout { .. }
        )
    }

    /// Troubleshooting hint shown under the error message.
    pub fn hint(&self) -> &'static str {
        match self {
            GenerationError::Validation(_) => {
                "Check the arguments: the prompt must not be empty and aspect ratios look like \"896*1152\" or a preset name."
            }
            GenerationError::Capacity { .. } => {
                "Wait for a running job to finish and try again, or raise FOOOCUS_MAX_CONCURRENT_JOBS."
            }
            GenerationError::BackendUnavailable(_) => {
                "Make sure Fooocus-API is running at FOOOCUS_API_URL, or set FOOOCUS_PATH so it can be started automatically (manage_backend start)."
            }
            GenerationError::SubmissionFailed(_) => {
                "Check the style names with list_styles and the backend log for the rejected field."
            }
            GenerationError::PollFailure(_) => {
                "The backend stopped answering status requests; check that it is still running."
            }
            GenerationError::JobError(_) => {
                "See the Fooocus-API log for details. Out-of-memory errors usually go away with fewer images or the Speed preset."
            }
            GenerationError::Timeout { .. } => {
                "The job may still finish in the backend; raise FOOOCUS_JOB_TIMEOUT_SECS for slow hardware."
            }
            GenerationError::Storage(_) => {
                "Check that FOOOCUS_OUTPUT_DIR exists and is writable."
            }
            GenerationError::ShuttingDown => "Restart the server to submit new jobs.",
        }
    }
}

impl From<FooocusError> for GenerationError {
    fn from(err: FooocusError) -> Self {
        if err.is_unavailable() {
            GenerationError::BackendUnavailable(err.to_string())
        } else {
            GenerationError::SubmissionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for GenerationError {
    fn from(err: std::io::Error) -> Self {
        GenerationError::Storage(err.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, GenerationError>;
