use crate::provider::ProviderKind;
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".jobrelay";
pub const PROMPTS_DIR_NAME: &str = "prompts";
pub const DATABASE_FILE_NAME: &str = "jobs.db";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Prompt,
    Response,
    Status,
}

impl ArtifactKind {
    fn label(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Response => "response",
            Self::Status => "status",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Prompt | Self::Response => "md",
            Self::Status => "json",
        }
    }
}

/// Per-workspace state layout under `<root>/.jobrelay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    root: PathBuf,
}

impl JobPaths {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            root: workspace_root.join(STATE_DIR_NAME),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.root
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.root.join(PROMPTS_DIR_NAME)
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE_NAME)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Deterministic from `(provider, slug, job_id)`, so the response path is
    /// known before the job finishes.
    pub fn artifact(
        &self,
        kind: ArtifactKind,
        provider: ProviderKind,
        slug: &str,
        job_id: &str,
    ) -> PathBuf {
        self.prompts_dir().join(format!(
            "{provider}-{}-{slug}-{job_id}.{}",
            kind.label(),
            kind.extension()
        ))
    }

    pub fn prompt_file(&self, provider: ProviderKind, slug: &str, job_id: &str) -> PathBuf {
        self.artifact(ArtifactKind::Prompt, provider, slug, job_id)
    }

    pub fn response_file(&self, provider: ProviderKind, slug: &str, job_id: &str) -> PathBuf {
        self.artifact(ArtifactKind::Response, provider, slug, job_id)
    }

    pub fn status_file(&self, provider: ProviderKind, slug: &str, job_id: &str) -> PathBuf {
        self.artifact(ArtifactKind::Status, provider, slug, job_id)
    }
}

/// Splits a status file name back into `(provider, slug, job_id)`.
pub fn parse_status_file_name(name: &str) -> Option<(ProviderKind, String, String)> {
    let stem = name.strip_suffix(".json")?;
    ProviderKind::ALL.into_iter().find_map(|provider| {
        let rest = stem.strip_prefix(&format!("{provider}-status-"))?;
        let (slug, job_id) = rest.rsplit_once('-')?;
        if slug.is_empty() || job_id.is_empty() {
            return None;
        }
        Some((provider, slug.to_string(), job_id.to_string()))
    })
}
