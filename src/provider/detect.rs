use crate::provider::{CliAvailability, ProviderKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Caches availability per `(provider, binary)` for the lifetime of the
/// detector unless a refresh is requested.
#[derive(Debug, Default)]
pub struct CliDetector {
    cache: Mutex<HashMap<(ProviderKind, String), CliAvailability>>,
}

impl CliDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detect(&self, provider: ProviderKind, binary: &str, refresh: bool) -> CliAvailability {
        let key = (provider, binary.to_string());
        if !refresh {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&key) {
                return hit.clone();
            }
        }

        let result = probe(provider, binary);
        if result.available {
            tracing::debug!(provider = %provider, binary, path = ?result.path, "provider cli located");
        } else {
            tracing::warn!(
                provider = %provider,
                binary,
                error = result.error.as_deref().unwrap_or_default(),
                "provider cli unavailable"
            );
        }
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, result.clone());
        result
    }
}

fn probe(provider: ProviderKind, binary: &str) -> CliAvailability {
    let install_hint = provider.install_hint().to_string();
    match locate_executable(binary) {
        Ok(path) => CliAvailability {
            available: true,
            version: probe_version(&path),
            path: Some(path),
            error: None,
            install_hint,
        },
        Err(error) => CliAvailability {
            available: false,
            path: None,
            version: None,
            error: Some(error),
            install_hint,
        },
    }
}

/// Explicit paths are checked directly; bare names go through the platform's
/// search-path lookup (`which` / `where`).
pub fn locate_executable(binary: &str) -> Result<PathBuf, String> {
    if binary.trim().is_empty() {
        return Err("provider binary name is empty".to_string());
    }
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return if is_executable_file(candidate) {
            Ok(candidate.to_path_buf())
        } else {
            Err(format!("`{binary}` is not an executable file"))
        };
    }

    let locator = if cfg!(windows) { "where" } else { "which" };
    let output = Command::new(locator)
        .arg(binary)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|err| format!("failed to run `{locator}`: {err}"))?;
    if !output.status.success() {
        return Err(format!("`{binary}` was not found on PATH"));
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| format!("`{binary}` was not found on PATH"))
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

fn probe_version(path: &Path) -> Option<String> {
    let mut child = Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if start.elapsed() < VERSION_PROBE_TIMEOUT => {
                thread::sleep(Duration::from_millis(20));
            }
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }
    let output = child.wait_with_output().ok()?;
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
