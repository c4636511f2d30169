use crate::provider::classify::classify_outcome;
use crate::provider::invocation::build_invocation;
use crate::provider::process::{
    spawn_process, ChildProcess, ProcessHandle, SignalSender, SpawnRequest,
};
use crate::provider::{ExecError, ProviderKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Everything needed to start one attempt except the model.
#[derive(Debug, Clone)]
pub struct AttemptConfig {
    pub provider: ProviderKind,
    pub binary: String,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub output_cap_bytes: usize,
}

/// Per-attempt timeout bounded by what is left of the fallback budget.
pub fn effective_timeout(timeout: Duration, budget_left: Duration) -> Duration {
    if budget_left.is_zero() {
        timeout
    } else {
        timeout.min(budget_left)
    }
}

pub fn spawn_attempt(
    config: &AttemptConfig,
    model: &str,
    prompt: &str,
    budget_left: Duration,
    signaler: Arc<dyn SignalSender>,
) -> Result<ChildProcess, ExecError> {
    let spec = build_invocation(config.provider, &config.binary, model);
    let request = SpawnRequest {
        binary: spec.binary,
        args: spec.args,
        cwd: config.cwd.clone(),
        stdin_payload: prompt.to_string(),
        timeout: effective_timeout(config.timeout, budget_left),
        output_cap_bytes: config.output_cap_bytes,
    };

    spawn_process(&request, signaler).map_err(|err| {
        let reason = if err.kind() == std::io::ErrorKind::NotFound {
            format!("`{}` was not found", request.binary)
        } else {
            err.to_string()
        };
        ExecError::Spawn {
            provider: config.provider,
            binary: request.binary.clone(),
            reason,
            install_hint: config.provider.install_hint().to_string(),
        }
    })
}

/// Foreground attempt: blocks until the process exits or times out.
pub fn run_attempt(
    config: &AttemptConfig,
    model: &str,
    prompt: &str,
    budget_left: Duration,
    signaler: Arc<dyn SignalSender>,
) -> Result<String, ExecError> {
    let child = spawn_attempt(config, model, prompt, budget_left, signaler)?;
    tracing::debug!(
        provider = %config.provider,
        model,
        pid = child.pid(),
        "provider attempt started"
    );
    classify_outcome(config.provider, model, child.wait())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::provider::process::SystemSignaler;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(path: &Path, body: &str) {
        fs::write(path, body).expect("write script");
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }

    fn config(binary: &Path, cwd: &Path) -> AttemptConfig {
        AttemptConfig {
            provider: ProviderKind::Codex,
            binary: binary.display().to_string(),
            cwd: cwd.to_path_buf(),
            timeout: Duration::from_secs(5),
            output_cap_bytes: 1024 * 1024,
        }
    }

    #[test]
    fn budget_caps_attempt_timeout() {
        assert_eq!(
            effective_timeout(Duration::from_secs(60), Duration::from_secs(5)),
            Duration::from_secs(5)
        );
        assert_eq!(
            effective_timeout(Duration::from_secs(60), Duration::ZERO),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn run_attempt_reads_prompt_from_stdin_and_parses_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bin = dir.path().join("codex-mock");
        write_script(
            &bin,
            "#!/bin/sh\nbody=$(cat)\necho 'starting up'\nprintf '{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"echo: %s\"}}\\n' \"$body\"\n",
        );

        let response = run_attempt(
            &config(&bin, dir.path()),
            "m1",
            "ping",
            Duration::from_secs(60),
            Arc::new(SystemSignaler),
        )
        .expect("response");
        assert_eq!(response, "echo: ping");
    }

    #[test]
    fn missing_binary_is_a_spawn_error_with_hint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = run_attempt(
            &config(&dir.path().join("nope"), dir.path()),
            "m1",
            "ping",
            Duration::from_secs(60),
            Arc::new(SystemSignaler),
        )
        .expect_err("spawn error");
        match err {
            ExecError::Spawn { install_hint, .. } => assert!(install_hint.contains("codex")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
