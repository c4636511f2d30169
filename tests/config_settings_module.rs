use jobrelay::config::{Settings, ALLOW_EXTERNAL_PROMPTS_ENV, MAX_PROVIDER_TIMEOUT};
use jobrelay::orchestrator::{AskOutcome, AskRequest, JobOrchestrator};
use jobrelay::provider::ProviderKind;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;

fn workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join(".git")).expect("git marker");
    let root = fs::canonicalize(dir.path()).expect("canonical");
    (dir, root)
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn workspace_config_then_environment_overrides() {
    let (_dir, root) = workspace();
    let nested = root.join("crates/core");
    fs::create_dir_all(&nested).expect("nested");
    fs::create_dir_all(root.join(".jobrelay")).expect("state dir");
    fs::write(
        root.join(".jobrelay/config.yaml"),
        r#"
providers:
  gemini:
    default_model: gemini-2.5-pro
    fallback_chain: [gemini-2.5-pro, gemini-2.5-flash]
    timeout_ms: 90000
retention_hours: 6
"#,
    )
    .expect("config");

    let orchestrator = JobOrchestrator::load(
        &nested,
        vars(&[
            ("JOBRELAY_GEMINI_MODEL", "gemini-2.5-flash"),
            ("JOBRELAY_CODEX_TIMEOUT_MS", "999999999"),
            ("UNRELATED", "ignored"),
        ]),
    )
    .expect("load");

    let settings = orchestrator.settings();
    assert_eq!(orchestrator.workspace_root(), root.as_path());
    assert_eq!(settings.gemini.default_model, "gemini-2.5-flash");
    assert_eq!(settings.gemini.fallback_chain.len(), 2);
    assert_eq!(settings.gemini.timeout, Duration::from_secs(90));
    assert_eq!(settings.codex.timeout, MAX_PROVIDER_TIMEOUT);
    assert_eq!(settings.retention, Duration::from_secs(6 * 60 * 60));
    assert_eq!(settings.codex.default_model, Settings::default().codex.default_model);
}

#[test]
fn malformed_config_and_env_report_config_error() {
    let (_dir, root) = workspace();
    fs::create_dir_all(root.join(".jobrelay")).expect("state dir");
    fs::write(root.join(".jobrelay/config.yaml"), "providers: [not, a, map]\n").expect("config");
    let err = match JobOrchestrator::load(&root, Vec::new()) {
        Ok(_) => panic!("malformed config accepted"),
        Err(err) => err,
    };
    assert_eq!(err.token(), "CONFIG_ERROR");

    fs::remove_file(root.join(".jobrelay/config.yaml")).expect("remove");
    let err = match JobOrchestrator::load(&root, vars(&[(ALLOW_EXTERNAL_PROMPTS_ENV, "maybe")])) {
        Ok(_) => panic!("bad flag accepted"),
        Err(err) => err,
    };
    assert_eq!(err.token(), "CONFIG_ERROR");
    assert!(err.to_string().contains(ALLOW_EXTERNAL_PROMPTS_ENV));
}

#[test]
fn external_prompt_toggle_admits_outside_prompt_but_not_outside_output() {
    let (_dir, root) = workspace();
    let outside = tempdir().expect("outside");
    let prompt = outside.path().join("shared-prompt.md");
    fs::write(&prompt, "Summarize the release notes").expect("prompt");
    let bin = root.join("codex-mock");
    write_script(
        &bin,
        "#!/bin/sh\n[ \"$1\" = \"--version\" ] && exit 0\ncat > /dev/null\necho '{\"type\":\"agent_message\",\"text\":\"summary\"}'\n",
    );

    let mut settings = Settings::default();
    settings.codex.binary = bin.display().to_string();
    settings.allow_external_prompt_files = true;
    let orchestrator = JobOrchestrator::open(settings, &root).expect("orchestrator");

    let request = AskRequest {
        agent_role: "writer".to_string(),
        prompt_file: prompt.display().to_string(),
        output_file: "summary.md".to_string(),
        ..AskRequest::default()
    };
    let outcome = orchestrator
        .ask(ProviderKind::Codex, &request)
        .expect("external prompt allowed");
    assert!(matches!(outcome, AskOutcome::Completed(_)));
    assert_eq!(
        fs::read_to_string(root.join("summary.md")).expect("output"),
        "summary"
    );

    let escaping = AskRequest {
        output_file: outside.path().join("leak.md").display().to_string(),
        ..request
    };
    let err = orchestrator
        .ask(ProviderKind::Codex, &escaping)
        .expect_err("output stays in workspace");
    assert_eq!(err.token(), "PATH_OUTSIDE_WORKSPACE");
}
