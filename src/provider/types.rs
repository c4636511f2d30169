use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Codex,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Codex, ProviderKind::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!(
                "unknown provider `{other}`; expected one of: codex, gemini"
            )),
        }
    }

    pub fn default_binary(self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    pub fn install_hint(self) -> &'static str {
        match self {
            Self::Codex => "install the Codex CLI with `npm install -g @openai/codex`, then run `codex login`",
            Self::Gemini => "install the Gemini CLI with `npm install -g @google/gemini-cli`, then run `gemini` once to authenticate",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Codex => "gpt-5.3-codex",
            Self::Gemini => "gemini-3-pro-preview",
        }
    }

    pub fn default_fallback_chain(self) -> Vec<String> {
        let chain: &[&str] = match self {
            Self::Codex => &["gpt-5.3-codex", "gpt-5.3", "gpt-5.2-codex", "gpt-5.2"],
            Self::Gemini => &[
                "gemini-3-pro-preview",
                "gemini-3-flash-preview",
                "gemini-2.5-pro",
                "gemini-2.5-flash",
            ],
        };
        chain.iter().map(|model| model.to_string()).collect()
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single provider attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("{provider} CLI `{binary}` could not be started: {reason}")]
    Spawn {
        provider: ProviderKind,
        binary: String,
        reason: String,
        install_hint: String,
    },
    #[error("{provider} model `{model}` timed out after {timeout_ms}ms")]
    Timeout {
        provider: ProviderKind,
        model: String,
        timeout_ms: u64,
    },
    #[error("{provider} does not accept model `{model}`: {message}")]
    Model {
        provider: ProviderKind,
        model: String,
        message: String,
    },
    #[error("{provider} rate limited model `{model}`: {message}")]
    RateLimit {
        provider: ProviderKind,
        model: String,
        message: String,
    },
    #[error("{provider} process failed for model `{model}`{}: {message}", exit_suffix(.exit_code))]
    Process {
        provider: ProviderKind,
        model: String,
        exit_code: Option<i32>,
        message: String,
    },
}

fn exit_suffix(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(" (exit code {code})"),
        None => String::new(),
    }
}

impl ExecError {
    /// Errors for which a different model may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Model { .. } | Self::RateLimit { .. } | Self::Timeout { .. }
        )
    }

    pub fn token(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "SPAWN_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Model { .. } => "MODEL_ERROR",
            Self::RateLimit { .. } => "RATE_LIMIT",
            Self::Process { .. } => "PROCESS_ERROR",
        }
    }

    pub fn remediation(&self) -> String {
        match self {
            Self::Spawn { install_hint, .. } => install_hint.clone(),
            Self::Timeout { .. } => {
                "split the prompt into smaller tasks or raise the provider timeout (max 1h)"
                    .to_string()
            }
            Self::Model { .. } => {
                "pin a model the provider supports, or omit `model` to use the fallback chain"
                    .to_string()
            }
            Self::RateLimit { .. } => {
                "wait for the quota window to reset, or pin a different model".to_string()
            }
            Self::Process { .. } => {
                "inspect the provider CLI output and authentication state; this failure is not retried"
                    .to_string()
            }
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Spawn { .. } => None,
            Self::Timeout { model, .. }
            | Self::Model { model, .. }
            | Self::RateLimit { model, .. }
            | Self::Process { model, .. } => Some(model),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSpec {
    pub binary: String,
    pub args: Vec<String>,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliAvailability {
    pub available: bool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
    pub error: Option<String>,
    pub install_hint: String,
}
