// ABOUTME: Error taxonomy for the backup pipeline
// ABOUTME: Maps each failure class to a distinct process exit code

use thiserror::Error;

/// Failure classes of a pipeline run.
///
/// Every variant carries the diagnostic text captured from the failing
/// component. None of these are retried automatically; transient-vs-permanent
/// cannot be distinguished generically across the external tools, so retries
/// belong to an outer caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("required tool '{tool}' could not be resolved: {reason}")]
    ToolNotFound { tool: String, reason: String },

    #[error("'{tool}' did not finish within {seconds}s and was killed")]
    ToolTimedOut { tool: String, seconds: u64 },

    #[error("dump failed ({status}): {stderr}")]
    DumpFailed { status: String, stderr: String },

    #[error("restore failed ({status}): {diagnostics}")]
    RestoreFailed { status: String, diagnostics: String },

    #[error("export failed for table '{table}': {reason}")]
    ExportFailed { table: String, reason: String },

    #[error("invalid dump archive: {0}")]
    InvalidArchive(String),
}

impl PipelineError {
    /// Exit code reported by the binary for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Configuration(_) => 2,
            PipelineError::ToolNotFound { .. } => 3,
            PipelineError::DumpFailed { .. } => 4,
            PipelineError::RestoreFailed { .. } => 5,
            PipelineError::ExportFailed { .. } | PipelineError::InvalidArchive(_) => 6,
            PipelineError::ToolTimedOut { .. } => 7,
        }
    }
}
