pub mod paths;
pub mod roles;
pub mod workspace;

pub use paths::{normalize_absolute_path, PathKind, PathPolicy, PathValidator};
pub use roles::{validate_agent_role, AgentRole, KNOWN_ROLES};
pub use workspace::{resolve_workspace_root, workspace_fingerprint};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required argument `{name}`")]
    MissingArgument { name: String },
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error(
        "{kind} `{requested}` resolves to `{resolved}`, outside workspace `{workspace_root}` (policy: {policy})"
    )]
    PathOutsideWorkspace {
        kind: PathKind,
        requested: String,
        resolved: String,
        workspace_root: String,
        policy: PathPolicy,
    },
    #[error("{kind} `{requested}` is unusable: {reason}")]
    PathUnavailable {
        kind: PathKind,
        requested: String,
        reason: String,
    },
    #[error("invalid agent role `{role}`: {reason}")]
    InvalidRole { role: String, reason: String },
}

impl ValidationError {
    pub fn token(&self) -> &'static str {
        match self {
            Self::MissingArgument { .. } => "MISSING_ARGUMENT",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::PathOutsideWorkspace { .. } => "PATH_OUTSIDE_WORKSPACE",
            Self::PathUnavailable { .. } => "PATH_UNAVAILABLE",
            Self::InvalidRole { .. } => "INVALID_AGENT_ROLE",
        }
    }

    pub fn remediation(&self) -> String {
        match self {
            Self::MissingArgument { name } => format!("provide `{name}` and retry"),
            Self::InvalidArgument { name, .. } => format!("correct `{name}` and retry"),
            Self::PathOutsideWorkspace { kind, .. } => match kind {
                PathKind::WorkingDirectory => {
                    "choose a working directory inside the workspace, or enable JOBRELAY_ALLOW_EXTERNAL_WORKDIR"
                        .to_string()
                }
                _ => "place the file inside the working directory, or widen the working directory to a common ancestor"
                    .to_string(),
            },
            Self::PathUnavailable { kind, .. } => {
                format!("check that the {kind} exists and is readable")
            }
            Self::InvalidRole { .. } => format!(
                "use one of: {}, or a lowercase name of letters, digits, '-' or '_'",
                KNOWN_ROLES.join(", ")
            ),
        }
    }
}
