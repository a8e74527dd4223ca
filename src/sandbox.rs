mod pipeline;
mod runner;
mod toolchain;
mod workspace;

pub use pipeline::{COMPILE_TIME_LIMIT, Pipeline, RUN_TIME_LIMIT, StageLimits};
pub use runner::{DEFAULT_MAX_OUTPUT_BYTES, ProcessOutput, ProcessRunner, RunFault, TRUNCATION_SENTINEL};
pub use toolchain::{CommandTemplate, Registry, ResolvedCommand, SourceNaming, ToolchainDescriptor};
pub use workspace::{Workspace, prepare_root};

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

/// One accepted execution request. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub caller: String,
    pub language: String,
    pub code: String,
    pub input: Option<String>,
}

/// Every way a request can fail. The `Display` text is what the caller sees in `error`.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Failed to prepare workspace: {0}")]
    Allocation(#[from] std::io::Error),

    #[error("Compilation error:\n{0}")]
    CompileFailed(String),

    #[error("{message}")]
    RuntimeFailed { stdout: String, message: String },

    #[error("Time limit exceeded: execution took longer than {} seconds", .0.as_secs())]
    TimedOut(Duration),

    #[error("Toolchain not available: `{0}` could not be started on this host")]
    SpawnFailed(String),
}

impl ExecError {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::UnsupportedLanguage(_) => OutcomeKind::UnsupportedLanguage,
            Self::Allocation(_) => OutcomeKind::AllocationFault,
            Self::CompileFailed(_) => OutcomeKind::CompileFailed,
            Self::RuntimeFailed { .. } => OutcomeKind::RuntimeFailed,
            Self::TimedOut(_) => OutcomeKind::TimedOut,
            Self::SpawnFailed(_) => OutcomeKind::SpawnFailed,
        }
    }
}

/// Terminal state reached by a pipeline run
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Succeeded,
    UnsupportedLanguage,
    AllocationFault,
    CompileFailed,
    RuntimeFailed,
    TimedOut,
    SpawnFailed,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::UnsupportedLanguage => "unsupported_language",
            Self::AllocationFault => "allocation_fault",
            Self::CompileFailed => "compile_failed",
            Self::RuntimeFailed => "runtime_failed",
            Self::TimedOut => "timed_out",
            Self::SpawnFailed => "spawn_failed",
        }
    }
}

/// Normalized result of one request
///
/// `output` holds the raw captured stdout; display placeholders are applied by the
/// reporter, never here. `error` is `Some` exactly when `success` is false.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub output: String,
    pub error: Option<String>,
    pub elapsed: Duration,
    pub success: bool,
    pub language: String,
    pub kind: OutcomeKind,
    /// Identifier of the workspace that backed the run, if one was allocated
    pub workspace_id: Option<Uuid>,
}

impl ExecutionOutcome {
    pub(crate) fn succeeded(
        language: String,
        output: String,
        elapsed: Duration,
        workspace_id: Uuid,
    ) -> Self {
        Self {
            output,
            error: None,
            elapsed,
            success: true,
            language,
            kind: OutcomeKind::Succeeded,
            workspace_id: Some(workspace_id),
        }
    }

    pub(crate) fn failed(
        language: String,
        error: ExecError,
        elapsed: Duration,
        workspace_id: Option<Uuid>,
    ) -> Self {
        let kind = error.kind();
        let message = error.to_string();
        let output = match error {
            ExecError::RuntimeFailed { stdout, .. } => stdout,
            _ => String::new(),
        };

        Self {
            output,
            error: Some(message),
            elapsed,
            success: false,
            language,
            kind,
            workspace_id,
        }
    }
}
