use thiserror::Error;

use crate::jobs::JobIdentity;
use crate::pulse::PulseStatus;
use crate::state_machine::Stage;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    #[error("An auto-apply run is already active. Stop it before starting another.")]
    AlreadyRunning,

    #[error("Auto-apply run aborted: {0}")]
    RunAborted(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Pulse(#[from] PulseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Already applied to {0}")]
    Duplicate(JobIdentity),

    #[error("Application id {0} is already in the ledger")]
    DuplicateId(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Malformed job data: {0}")]
    MalformedJob(String),

    #[error("{stage} produced no output: {reason}")]
    Tailor { stage: Stage, reason: String },

    #[error("Cannot {action} while {stage}")]
    InvalidAction { action: &'static str, stage: Stage },

    #[error("Pipeline cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PulseError {
    #[error("Illegal pulse transition: {from} -> {to}")]
    IllegalTransition { from: PulseStatus, to: PulseStatus },

    #[error("Health must be within 0..=100, got {0}")]
    HealthOutOfRange(u8),
}

/// Why a single candidate did not reach the ledger during a run.
///
/// Both kinds are recovered locally; neither ends the run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// The ledger already holds this identity (written outside the run).
    Duplicate,
    /// A pipeline stage failed to produce its output.
    Pipeline(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Duplicate => write!(f, "Duplicate candidate"),
            FailureKind::Pipeline(msg) => write!(f, "Pipeline failure: {msg}"),
        }
    }
}

impl From<&LedgerError> for FailureKind {
    fn from(_: &LedgerError) -> Self {
        FailureKind::Duplicate
    }
}

impl From<&PipelineError> for FailureKind {
    fn from(err: &PipelineError) -> Self {
        FailureKind::Pipeline(err.to_string())
    }
}
