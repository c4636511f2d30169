#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid environment override {name}={value}: {reason}")]
    Env {
        name: String,
        value: String,
        reason: String,
    },
    #[error("settings validation failed: {0}")]
    Settings(String),
}

impl ConfigError {
    pub fn token(&self) -> &'static str {
        "CONFIG_ERROR"
    }

    pub fn remediation(&self) -> String {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => {
                format!("fix or remove {path}")
            }
            Self::Env { name, .. } => format!("unset or correct {name}"),
            Self::Settings(_) => "correct the settings file".to_string(),
        }
    }
}
