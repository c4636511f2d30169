use crate::config::ConfigError;
use crate::jobs::JobStoreError;
use crate::orchestrator::control::ControlError;
use crate::provider::{FallbackFailure, ProviderKind};
use crate::security::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{provider} CLI `{binary}` is not available: {reason}")]
    CliUnavailable {
        provider: ProviderKind,
        binary: String,
        reason: String,
        install_hint: String,
    },
    #[error(transparent)]
    Execution(#[from] FallbackFailure),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to allocate job id: {0}")]
    JobId(String),
}

impl OrchestratorError {
    pub fn token(&self) -> &'static str {
        match self {
            Self::Validation(err) => err.token(),
            Self::Config(err) => err.token(),
            Self::CliUnavailable { .. } => "CLI_NOT_FOUND",
            Self::Execution(failure) => failure.last_error.token(),
            Self::Store(err) => err.token(),
            Self::Control(err) => err.token(),
            Self::Io { .. } => "IO_ERROR",
            Self::JobId(_) => "JOB_ID_ERROR",
        }
    }

    pub fn remediation(&self) -> String {
        match self {
            Self::Validation(err) => err.remediation(),
            Self::Config(err) => err.remediation(),
            Self::CliUnavailable { install_hint, .. } => install_hint.clone(),
            Self::Execution(failure) => {
                let base = failure.last_error.remediation();
                if failure.pinned {
                    format!("{base}; or omit `model` to let the fallback chain choose")
                } else {
                    base
                }
            }
            Self::Store(err) => err.remediation(),
            Self::Control(err) => err.remediation(),
            Self::Io { path, .. } => format!("check that `{path}` is writable"),
            Self::JobId(_) => "retry the request".to_string(),
        }
    }
}

pub(crate) fn io_error(path: &std::path::Path, source: std::io::Error) -> OrchestratorError {
    OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    }
}
