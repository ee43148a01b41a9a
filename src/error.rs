use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Which bootstrap step an install failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallPhase {
    PackageManager,
    Tool,
}

impl std::fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallPhase::PackageManager => f.write_str("package manager"),
            InstallPhase::Tool => f.write_str("tool"),
        }
    }
}

/// Flat discriminant of [`EngineError`], stable enough to serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotInstalled,
    BootstrapBusy,
    InstallFailed,
    VerificationFailed,
    SpawnFailed,
    ExecutionFailed,
    OutputDir,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pdf2zh is not installed or not found")]
    NotInstalled,

    #[error("environment setup is already in progress")]
    BootstrapBusy,

    #[error("{phase} installation failed: {reason}")]
    InstallFailed { phase: InstallPhase, reason: String },

    #[error("installation finished but the tool could not be verified")]
    VerificationFailed,

    #[error("failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("translation failed with exit code {}", exit_code_label(*code))]
    ExecutionFailed {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("cannot create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled by user")]
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotInstalled => ErrorKind::NotInstalled,
            EngineError::BootstrapBusy => ErrorKind::BootstrapBusy,
            EngineError::InstallFailed { .. } => ErrorKind::InstallFailed,
            EngineError::VerificationFailed => ErrorKind::VerificationFailed,
            EngineError::SpawnFailed { .. } => ErrorKind::SpawnFailed,
            EngineError::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            EngineError::OutputDir { .. } => ErrorKind::OutputDir,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Sentence suitable for showing to the person who asked for the work.
    /// `Cancelled` is informational, everything else is actionable.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::NotInstalled => {
                "pdf2zh is not installed. Run `pdf-translate setup` to install it.".to_string()
            }
            EngineError::BootstrapBusy => {
                "Environment setup is already in progress.".to_string()
            }
            EngineError::InstallFailed {
                phase: InstallPhase::PackageManager,
                ..
            } => format!(
                "{self}. Install uv manually: https://docs.astral.sh/uv/getting-started/installation/"
            ),
            EngineError::VerificationFailed => {
                "Setup completed but pdf2zh could not be verified. Open a new shell and try again."
                    .to_string()
            }
            EngineError::ExecutionFailed { .. } => {
                format!("{self}. See the log transcript for details.")
            }
            EngineError::Cancelled => "Cancelled.".to_string(),
            other => other.to_string(),
        }
    }
}

fn exit_code_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "<signal>".into())
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
