use crate::provider::{InvocationSpec, ProviderKind};

/// Both CLIs read the prompt from stdin and stream JSON lines on stdout.
pub fn build_invocation(provider: ProviderKind, binary: &str, model: &str) -> InvocationSpec {
    let args = match provider {
        ProviderKind::Codex => vec![
            "exec".to_string(),
            "--json".to_string(),
            "--model".to_string(),
            model.to_string(),
            "--skip-git-repo-check".to_string(),
            "-".to_string(),
        ],
        ProviderKind::Gemini => vec![
            "--model".to_string(),
            model.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
        ],
    };
    InvocationSpec {
        binary: binary.to_string(),
        args,
        model: model.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codex_reads_prompt_from_stdin_with_json_events() {
        let spec = build_invocation(ProviderKind::Codex, "codex", "gpt-5.2");
        assert_eq!(spec.binary, "codex");
        assert_eq!(spec.args[0], "exec");
        assert!(spec.args.contains(&"--json".to_string()));
        assert_eq!(spec.args.last().map(String::as_str), Some("-"));
        assert_eq!(spec.model, "gpt-5.2");
    }

    #[test]
    fn gemini_requests_stream_json() {
        let spec = build_invocation(ProviderKind::Gemini, "/opt/gemini", "gemini-2.5-pro");
        assert_eq!(spec.binary, "/opt/gemini");
        assert!(spec
            .args
            .windows(2)
            .any(|pair| pair[0] == "--output-format" && pair[1] == "stream-json"));
        assert!(spec
            .args
            .windows(2)
            .any(|pair| pair[0] == "--model" && pair[1] == "gemini-2.5-pro"));
    }
}
