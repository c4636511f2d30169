use crate::security::ValidationError;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    PromptFile,
    ContextFile,
    OutputFile,
    WorkingDirectory,
}

impl PathKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PromptFile => "prompt file",
            Self::ContextFile => "context file",
            Self::OutputFile => "output file",
            Self::WorkingDirectory => "working directory",
        }
    }
}

impl std::fmt::Display for PathKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathPolicy {
    #[default]
    WorkspaceOnly,
    AllowExternal,
}

impl PathPolicy {
    pub fn from_allow_external(allow: bool) -> Self {
        if allow {
            Self::AllowExternal
        } else {
            Self::WorkspaceOnly
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkspaceOnly => "workspace-only",
            Self::AllowExternal => "allow-external",
        }
    }
}

impl std::fmt::Display for PathPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds paths to a workspace root after resolving symlinks.
#[derive(Debug, Clone)]
pub struct PathValidator {
    workspace_root: PathBuf,
    policy: PathPolicy,
}

impl PathValidator {
    /// `workspace_root` is canonicalized so containment compares real paths.
    pub fn new(workspace_root: &Path, policy: PathPolicy) -> Result<Self, ValidationError> {
        let workspace_root =
            fs::canonicalize(workspace_root).map_err(|err| ValidationError::PathUnavailable {
                kind: PathKind::WorkingDirectory,
                requested: workspace_root.display().to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            workspace_root,
            policy,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn policy(&self) -> PathPolicy {
        self.policy
    }

    /// Resolves `requested` (relative paths against `base`), follows symlinks,
    /// and checks the real target against the workspace root.
    pub fn validate(
        &self,
        kind: PathKind,
        requested: &Path,
        base: &Path,
    ) -> Result<PathBuf, ValidationError> {
        let unavailable = |reason: String| ValidationError::PathUnavailable {
            kind,
            requested: requested.display().to_string(),
            reason,
        };

        if requested.as_os_str().is_empty() {
            return Err(unavailable("path is empty".to_string()));
        }
        let absolute = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            base.join(requested)
        };
        let lexical = normalize_absolute_path(&absolute).map_err(unavailable)?;
        let resolved = resolve_real_path(&lexical).map_err(|err| unavailable(err.to_string()))?;

        if self.policy == PathPolicy::AllowExternal {
            if !resolved.starts_with(&self.workspace_root) {
                tracing::warn!(
                    kind = %kind,
                    requested = %requested.display(),
                    resolved = %resolved.display(),
                    workspace_root = %self.workspace_root.display(),
                    "accepting path outside workspace because the external-path override is enabled"
                );
            }
            return Ok(resolved);
        }

        if !resolved.starts_with(&self.workspace_root) {
            return Err(ValidationError::PathOutsideWorkspace {
                kind,
                requested: requested.display().to_string(),
                resolved: resolved.display().to_string(),
                workspace_root: self.workspace_root.display().to_string(),
                policy: self.policy,
            });
        }
        Ok(resolved)
    }

    /// Like [`validate`](Self::validate) but also requires an existing regular file.
    pub fn validate_existing_file(
        &self,
        kind: PathKind,
        requested: &Path,
        base: &Path,
    ) -> Result<PathBuf, ValidationError> {
        let resolved = self.validate(kind, requested, base)?;
        if !resolved.is_file() {
            return Err(ValidationError::PathUnavailable {
                kind,
                requested: requested.display().to_string(),
                reason: format!("`{}` is not an existing file", resolved.display()),
            });
        }
        Ok(resolved)
    }

    pub fn validate_existing_dir(
        &self,
        kind: PathKind,
        requested: &Path,
        base: &Path,
    ) -> Result<PathBuf, ValidationError> {
        let resolved = self.validate(kind, requested, base)?;
        if !resolved.is_dir() {
            return Err(ValidationError::PathUnavailable {
                kind,
                requested: requested.display().to_string(),
                reason: format!("`{}` is not an existing directory", resolved.display()),
            });
        }
        Ok(resolved)
    }
}

/// Canonicalizes the longest existing prefix and re-attaches the missing
/// tail, so not-yet-created outputs still get their symlinked parents resolved.
fn resolve_real_path(path: &Path) -> std::io::Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(canonical) => return Ok(canonical),
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err),
        Err(_) => {}
    }

    let mut missing = Vec::new();
    let mut cursor = path.to_path_buf();
    loop {
        let Some(name) = cursor.file_name().map(|name| name.to_os_string()) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no existing ancestor",
            ));
        };
        missing.push(name);
        if !cursor.pop() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no existing ancestor",
            ));
        }
        match fs::canonicalize(&cursor) {
            Ok(mut canonical) => {
                for part in missing.iter().rev() {
                    canonical.push(part);
                }
                return Ok(canonical);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        }
    }
}

pub fn normalize_absolute_path(path: &Path) -> Result<PathBuf, String> {
    if !path.is_absolute() {
        return Err("path must be absolute".to_string());
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::Normal(v) => normalized.push(v),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err("path escapes filesystem root".to_string());
                }
            }
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
        }
    }
    Ok(normalized)
}
