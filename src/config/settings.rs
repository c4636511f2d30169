use super::ConfigError;
use crate::provider::{ProviderKind, DEFAULT_OUTPUT_CAP_BYTES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const MIN_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_FALLBACK_BUDGET: Duration = Duration::from_secs(2 * 60 * 60);

pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.clamp(MIN_PROVIDER_TIMEOUT, MAX_PROVIDER_TIMEOUT)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub binary: String,
    pub default_model: String,
    pub fallback_chain: Vec<String>,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn defaults_for(provider: ProviderKind) -> Self {
        Self {
            binary: provider.default_binary().to_string(),
            default_model: provider.default_model().to_string(),
            fallback_chain: provider.default_fallback_chain(),
            timeout: MAX_PROVIDER_TIMEOUT,
        }
    }
}

/// On-disk shape. Every field is optional and overlays the defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SettingsFile {
    pub providers: BTreeMap<String, ProviderOverrides>,
    pub output_cap_bytes: Option<usize>,
    pub retention_hours: Option<u64>,
    pub fallback_budget_ms: Option<u64>,
    pub allow_external_working_directory: Option<bool>,
    pub allow_external_prompt_files: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderOverrides {
    pub binary: Option<String>,
    pub default_model: Option<String>,
    pub fallback_chain: Option<Vec<String>>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub codex: ProviderSettings,
    pub gemini: ProviderSettings,
    pub output_cap_bytes: usize,
    pub retention: Duration,
    pub fallback_budget: Duration,
    pub allow_external_working_directory: bool,
    pub allow_external_prompt_files: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            codex: ProviderSettings::defaults_for(ProviderKind::Codex),
            gemini: ProviderSettings::defaults_for(ProviderKind::Gemini),
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            retention: DEFAULT_RETENTION,
            fallback_budget: DEFAULT_FALLBACK_BUDGET,
            allow_external_working_directory: false,
            allow_external_prompt_files: false,
        }
    }
}

impl Settings {
    /// A missing file yields the defaults.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Self::from_yaml_str(&raw, &path.display().to_string())
    }

    pub fn from_yaml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: SettingsFile =
            serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
                path: origin.to_string(),
                source,
            })?;
        Self::from_file(file)
    }

    pub fn from_file(file: SettingsFile) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        for (name, overrides) in file.providers {
            let provider = ProviderKind::parse(&name).map_err(ConfigError::Settings)?;
            let target = settings.provider_mut(provider);
            if let Some(binary) = overrides.binary {
                target.binary = binary;
            }
            if let Some(model) = overrides.default_model {
                target.default_model = model;
            }
            if let Some(chain) = overrides.fallback_chain {
                target.fallback_chain = chain;
            }
            if let Some(timeout_ms) = overrides.timeout_ms {
                target.timeout = clamp_timeout(Duration::from_millis(timeout_ms));
            }
        }
        if let Some(cap) = file.output_cap_bytes {
            settings.output_cap_bytes = cap;
        }
        if let Some(hours) = file.retention_hours {
            settings.retention = Duration::from_secs(hours.saturating_mul(60 * 60));
        }
        if let Some(budget_ms) = file.fallback_budget_ms {
            settings.fallback_budget = Duration::from_millis(budget_ms);
        }
        if let Some(allow) = file.allow_external_working_directory {
            settings.allow_external_working_directory = allow;
        }
        if let Some(allow) = file.allow_external_prompt_files {
            settings.allow_external_prompt_files = allow;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn provider(&self, provider: ProviderKind) -> &ProviderSettings {
        match provider {
            ProviderKind::Codex => &self.codex,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    pub fn provider_mut(&mut self, provider: ProviderKind) -> &mut ProviderSettings {
        match provider {
            ProviderKind::Codex => &mut self.codex,
            ProviderKind::Gemini => &mut self.gemini,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for provider in ProviderKind::ALL {
            let entry = self.provider(provider);
            if entry.binary.trim().is_empty() {
                return Err(ConfigError::Settings(format!(
                    "providers.{provider}.binary must be non-empty"
                )));
            }
            if entry.default_model.trim().is_empty() {
                return Err(ConfigError::Settings(format!(
                    "providers.{provider}.default_model must be non-empty"
                )));
            }
            if entry.fallback_chain.is_empty() {
                return Err(ConfigError::Settings(format!(
                    "providers.{provider}.fallback_chain must list at least one model"
                )));
            }
            if entry.fallback_chain.iter().any(|m| m.trim().is_empty()) {
                return Err(ConfigError::Settings(format!(
                    "providers.{provider}.fallback_chain contains an empty model"
                )));
            }
        }
        if self.output_cap_bytes == 0 {
            return Err(ConfigError::Settings(
                "output_cap_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Emits the warnings owed whenever a workspace-escape toggle is on.
    pub fn warn_on_escape_toggles(&self) {
        if self.allow_external_working_directory {
            tracing::warn!(
                "working directories outside the workspace boundary are ALLOWED; path containment is disabled for working_directory"
            );
        }
        if self.allow_external_prompt_files {
            tracing::warn!(
                "prompt and context files outside the workspace boundary are ALLOWED; path containment is disabled for prompt inputs"
            );
        }
    }
}
