use crate::provider::output_parse::parse_event_stream;
use crate::provider::process::ProcessOutcome;
use crate::provider::{ExecError, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverableKind {
    UnsupportedModel,
    RateLimited,
}

const MODEL_SIGNATURES: &[&str] = &[
    "model_not_found",
    "model not found",
    "unknown model",
    "unsupported model",
    "invalid model",
    "model is not supported",
    "model not supported",
    "is not supported when using",
    "does not exist or you do not have access",
    "no such model",
];

const RATE_LIMIT_SIGNATURES: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "quota",
    "resource_exhausted",
    "resource exhausted",
];

const STDERR_EXCERPT_CHARS: usize = 500;

/// Case-insensitive match against the two recoverable signatures. Model
/// signatures are checked first so the two classes stay disjoint.
pub fn match_signature(text: &str) -> Option<RecoverableKind> {
    let lowered = text.to_ascii_lowercase();
    if MODEL_SIGNATURES.iter().any(|sig| lowered.contains(sig)) {
        return Some(RecoverableKind::UnsupportedModel);
    }
    if RATE_LIMIT_SIGNATURES.iter().any(|sig| lowered.contains(sig)) || has_status_429(&lowered) {
        return Some(RecoverableKind::RateLimited);
    }
    None
}

/// `429` standing alone as a status code, not inside a number, id or path.
fn has_status_429(text: &str) -> bool {
    let is_word = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/');
    text.match_indices("429").any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + 3..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

fn recoverable_error(
    provider: ProviderKind,
    model: &str,
    kind: RecoverableKind,
    message: &str,
) -> ExecError {
    let message = message.trim().to_string();
    match kind {
        RecoverableKind::UnsupportedModel => ExecError::Model {
            provider,
            model: model.to_string(),
            message,
        },
        RecoverableKind::RateLimited => ExecError::RateLimit {
            provider,
            model: model.to_string(),
            message,
        },
    }
}

/// Structured error payloads first, then every raw line of each source.
fn scan_for_recoverable<'a>(
    structured: &'a [String],
    raw_sources: &[&'a str],
) -> Option<(RecoverableKind, &'a str)> {
    for message in structured {
        if let Some(kind) = match_signature(message) {
            return Some((kind, message.as_str()));
        }
    }
    for source in raw_sources {
        for line in source.lines() {
            if let Some(kind) = match_signature(line) {
                return Some((kind, line));
            }
        }
    }
    None
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= STDERR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(STDERR_EXCERPT_CHARS).collect();
    format!("{cut}...")
}

/// Turns a finished attempt into response text or a classified error.
pub fn classify_outcome(
    provider: ProviderKind,
    model: &str,
    outcome: ProcessOutcome,
) -> Result<String, ExecError> {
    match outcome {
        ProcessOutcome::TimedOut { timeout, .. } => Err(ExecError::Timeout {
            provider,
            model: model.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
        ProcessOutcome::WaitFailed(reason) => Err(ExecError::Process {
            provider,
            model: model.to_string(),
            exit_code: None,
            message: format!("failed to wait for provider process: {reason}"),
        }),
        ProcessOutcome::Exited {
            exit_code,
            success,
            stdout,
            stderr,
        } => {
            let events = parse_event_stream(&stdout.text);
            if success {
                if let Some(text) = events.response_text() {
                    return Ok(text);
                }
                if let Some((kind, message)) =
                    scan_for_recoverable(&events.errors, &[stdout.text.as_str()])
                {
                    return Err(recoverable_error(provider, model, kind, message));
                }
                let message = match events.errors.first() {
                    Some(error) => format!("provider reported an error: {error}"),
                    None => "provider exited successfully but produced no response".to_string(),
                };
                return Err(ExecError::Process {
                    provider,
                    model: model.to_string(),
                    exit_code,
                    message,
                });
            }

            let raw_sources = [stdout.text.as_str(), stderr.text.as_str()];
            if let Some((kind, message)) = scan_for_recoverable(&events.errors, &raw_sources) {
                return Err(recoverable_error(provider, model, kind, message));
            }
            let detail = if stderr.text.trim().is_empty() {
                events
                    .errors
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "no error output".to_string())
            } else {
                excerpt(&stderr.text)
            };
            Err(ExecError::Process {
                provider,
                model: model.to_string(),
                exit_code,
                message: detail,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::process::CapturedOutput;
    use std::time::Duration;

    fn exited(success: bool, code: i32, stdout: &str, stderr: &str) -> ProcessOutcome {
        ProcessOutcome::Exited {
            exit_code: Some(code),
            success,
            stdout: CapturedOutput {
                text: stdout.to_string(),
                truncated: false,
            },
            stderr: CapturedOutput {
                text: stderr.to_string(),
                truncated: false,
            },
        }
    }

    #[test]
    fn signatures_are_case_insensitive_and_disjoint() {
        assert_eq!(
            match_signature("Error: MODEL_NOT_FOUND for gpt-x"),
            Some(RecoverableKind::UnsupportedModel)
        );
        assert_eq!(
            match_signature("HTTP 429 Too Many Requests"),
            Some(RecoverableKind::RateLimited)
        );
        assert_eq!(
            match_signature("RESOURCE_EXHAUSTED: Quota exceeded"),
            Some(RecoverableKind::RateLimited)
        );
        assert_eq!(match_signature("permission denied"), None);
        assert_eq!(
            match_signature("{\"error\":{\"code\":429}}"),
            Some(RecoverableKind::RateLimited)
        );
        assert_eq!(match_signature("processed 14290 tokens"), None);
        assert_eq!(match_signature("wrote /tmp/run-429/out.json"), None);
        assert_eq!(match_signature("request id a429f1 failed"), None);
    }

    #[test]
    fn structured_model_error_on_clean_exit_is_recoverable() {
        let outcome = exited(
            true,
            0,
            "{\"type\":\"error\",\"message\":\"model_not_found: m1\"}\n",
            "",
        );
        let err = classify_outcome(ProviderKind::Codex, "m1", outcome).expect_err("model error");
        assert!(matches!(err, ExecError::Model { ref model, .. } if model == "m1"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn rate_limit_in_stderr_on_failure_is_recoverable() {
        let outcome = exited(false, 1, "", "error: Rate limit reached, retry later\n");
        let err = classify_outcome(ProviderKind::Gemini, "g1", outcome).expect_err("rate limit");
        assert_eq!(err.token(), "RATE_LIMIT");
    }

    #[test]
    fn other_failures_are_fatal() {
        let outcome = exited(false, 2, "", "authentication required\n");
        let err = classify_outcome(ProviderKind::Codex, "m1", outcome).expect_err("fatal");
        assert!(matches!(err, ExecError::Process { exit_code: Some(2), .. }));
        assert!(!err.is_recoverable());

        let empty = exited(true, 0, "", "");
        let err = classify_outcome(ProviderKind::Codex, "m1", empty).expect_err("no output");
        assert_eq!(err.token(), "PROCESS_ERROR");
    }

    #[test]
    fn timeout_maps_to_recoverable_timeout() {
        let outcome = ProcessOutcome::TimedOut {
            timeout: Duration::from_secs(5),
            stdout: CapturedOutput::default(),
        };
        let err = classify_outcome(ProviderKind::Codex, "m1", outcome).expect_err("timeout");
        assert!(matches!(err, ExecError::Timeout { timeout_ms: 5000, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn response_text_wins_on_clean_exit() {
        let outcome = exited(
            true,
            0,
            "{\"type\":\"agent_message\",\"text\":\"hello\"}\n",
            "",
        );
        assert_eq!(
            classify_outcome(ProviderKind::Codex, "m2", outcome).expect("ok"),
            "hello"
        );
    }
}
