use jobrelay::config::Settings;
use jobrelay::jobs::{JobRecord, JobStatus};
use jobrelay::orchestrator::{
    AskOutcome, AskRequest, JobOrchestrator, KillOutcome, PollSchedule, ReassertPolicy,
    StatusFilter, WaitOutcome,
};
use jobrelay::provider::{ProviderKind, Signal, SignalSender, SystemSignaler};
use jobrelay::shared::time::now_utc;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

const SLOW_SCRIPT: &str = r#"#!/bin/sh
[ "$1" = "--version" ] && { echo "codex-mock 1.0"; exit 0; }
cat > /dev/null
sleep 30
echo '{"type":"agent_message","message":"too late"}'
"#;

#[derive(Default)]
struct CountingSignaler {
    calls: AtomicUsize,
}

impl SignalSender for CountingSignaler {
    fn signal_group(&self, pgid: u32, signal: Signal) -> std::io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        SystemSignaler.signal_group(pgid, signal)
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join(".git")).expect("git marker");
    let root = fs::canonicalize(dir.path()).expect("canonical");
    fs::write(root.join("prompt.md"), "Review the migration plan").expect("prompt");
    (dir, root)
}

fn orchestrator(root: &Path, signaler: Arc<CountingSignaler>) -> JobOrchestrator {
    let bin = root.join("codex-slow");
    write_script(&bin, SLOW_SCRIPT);
    let mut settings = Settings::default();
    settings.codex.binary = bin.display().to_string();
    settings.codex.default_model = "m1".to_string();
    settings.codex.fallback_chain = vec!["m1".to_string()];
    settings.codex.timeout = Duration::from_secs(60);
    JobOrchestrator::open(settings, root)
        .expect("orchestrator")
        .with_signaler(signaler)
        .with_control(|control| {
            control
                .with_poll_schedule(PollSchedule {
                    initial: Duration::from_millis(20),
                    factor: 1.5,
                    max: Duration::from_millis(50),
                })
                .with_reassert_policy(ReassertPolicy {
                    attempts: 2,
                    delay: Duration::from_millis(20),
                })
        })
}

fn spawn_background(orchestrator: &JobOrchestrator) -> String {
    let request = AskRequest {
        agent_role: "reviewer".to_string(),
        prompt_file: "prompt.md".to_string(),
        output_file: "review.md".to_string(),
        background: true,
        ..AskRequest::default()
    };
    match orchestrator.ask(ProviderKind::Codex, &request).expect("ask") {
        AskOutcome::Spawned(ticket) => ticket.job_id,
        AskOutcome::Completed(_) => panic!("expected background ticket"),
    }
}

fn wait_until_running(orchestrator: &JobOrchestrator, job_id: &str) -> JobRecord {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = orchestrator
            .control()
            .check_job_status(ProviderKind::Codex, job_id)
            .expect("status");
        if snapshot.record.status == JobStatus::Running && snapshot.record.pid.is_some() {
            return snapshot.record;
        }
        assert!(Instant::now() < deadline, "job never reached running");
        thread::sleep(Duration::from_millis(20));
    }
}

fn foreign_record(status: JobStatus, pid: Option<u32>) -> JobRecord {
    JobRecord {
        provider: ProviderKind::Codex,
        job_id: "feedf00d".to_string(),
        slug: "foreign".to_string(),
        status,
        pid,
        prompt_file: PathBuf::from("/dev/null"),
        response_file: PathBuf::from("/dev/null"),
        model: "m1".to_string(),
        agent_role: "reviewer".to_string(),
        spawned_at: now_utc(),
        completed_at: status.is_terminal().then(now_utc),
        error: None,
        used_fallback: false,
        fallback_model: None,
        killed_by_user: false,
    }
}

#[test]
fn kill_refuses_pid_this_process_did_not_spawn() {
    let (_dir, root) = workspace();
    let signaler = Arc::new(CountingSignaler::default());
    let orchestrator = orchestrator(&root, Arc::clone(&signaler));
    orchestrator
        .store()
        .write(&foreign_record(JobStatus::Running, Some(std::process::id())))
        .expect("seed");

    let err = orchestrator
        .control()
        .kill_job(ProviderKind::Codex, "feedf00d", None)
        .expect_err("refused");
    assert_eq!(err.token(), "KILL_REFUSED");
    assert_eq!(signaler.calls.load(Ordering::SeqCst), 0);
    let record = orchestrator
        .store()
        .read(ProviderKind::Codex, "feedf00d")
        .expect("read")
        .expect("record");
    assert_eq!(record.status, JobStatus::Running);
    assert!(!record.killed_by_user);
}

#[test]
fn kill_refuses_terminal_and_pidless_jobs_and_bad_signals() {
    let (_dir, root) = workspace();
    let signaler = Arc::new(CountingSignaler::default());
    let orchestrator = orchestrator(&root, Arc::clone(&signaler));
    let control = orchestrator.control();

    orchestrator
        .store()
        .write(&foreign_record(JobStatus::Spawned, None))
        .expect("seed");
    assert_eq!(
        control
            .kill_job(ProviderKind::Codex, "feedf00d", None)
            .expect_err("no pid")
            .token(),
        "KILL_REFUSED"
    );
    assert_eq!(
        control
            .kill_job(ProviderKind::Codex, "feedf00d", Some("SIGKILL"))
            .expect_err("signal")
            .token(),
        "INVALID_SIGNAL"
    );
    assert_eq!(
        control
            .kill_job(ProviderKind::Codex, "not-hex!", None)
            .expect_err("id")
            .token(),
        "INVALID_ARGUMENT"
    );
    assert_eq!(
        control
            .kill_job(ProviderKind::Gemini, "feedf00d", None)
            .expect_err("other provider")
            .token(),
        "JOB_NOT_FOUND"
    );
    assert_eq!(signaler.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn second_kill_reports_already_killed_without_signalling() {
    let (_dir, root) = workspace();
    let signaler = Arc::new(CountingSignaler::default());
    let orchestrator = orchestrator(&root, Arc::clone(&signaler));
    let job_id = spawn_background(&orchestrator);
    let running = wait_until_running(&orchestrator, &job_id);
    assert!(orchestrator
        .registry()
        .contains(running.pid.expect("pid")));

    let first = orchestrator
        .control()
        .kill_job(ProviderKind::Codex, &job_id, None)
        .expect("kill");
    match first {
        KillOutcome::Killed {
            record,
            signal,
            delivered,
        } => {
            assert_eq!(signal, Signal::Terminate);
            assert!(delivered);
            assert!(record.killed_by_user);
            assert_eq!(record.status, JobStatus::Failed);
        }
        other => panic!("unexpected kill outcome: {other:?}"),
    }

    let second = orchestrator
        .control()
        .kill_job(ProviderKind::Codex, &job_id, Some("SIGINT"))
        .expect("second kill");
    assert!(matches!(second, KillOutcome::AlreadyKilled(_)));
    assert_eq!(signaler.calls.load(Ordering::SeqCst), 1);

    // The child's exit handler must not overwrite the killed state.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !orchestrator.registry().is_empty() {
        assert!(Instant::now() < deadline, "child never exited");
        thread::sleep(Duration::from_millis(20));
    }
    let outcome = orchestrator
        .control()
        .wait_for_job(ProviderKind::Codex, &job_id, Duration::from_secs(1))
        .expect("wait");
    let WaitOutcome::Finished(snapshot) = outcome else {
        panic!("killed job should be terminal");
    };
    assert!(snapshot.record.killed_by_user);
    assert_eq!(snapshot.record.status, JobStatus::Failed);
    assert!(snapshot
        .record
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("SIGTERM"));
    assert!(snapshot.response_preview.is_none());
    assert!(!root.join("review.md").exists());
}

#[test]
fn wait_for_job_times_out_with_current_snapshot() {
    let (_dir, root) = workspace();
    let signaler = Arc::new(CountingSignaler::default());
    let orchestrator = orchestrator(&root, Arc::clone(&signaler));
    let job_id = spawn_background(&orchestrator);
    wait_until_running(&orchestrator, &job_id);

    let started = Instant::now();
    let outcome = orchestrator
        .control()
        .wait_for_job(ProviderKind::Codex, &job_id, Duration::from_millis(200))
        .expect("wait");
    let elapsed = started.elapsed();
    let WaitOutcome::TimedOut(snapshot) = outcome else {
        panic!("slow job should still be running");
    };
    assert_eq!(snapshot.record.status, JobStatus::Running);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));

    orchestrator
        .control()
        .kill_job(ProviderKind::Codex, &job_id, None)
        .expect("cleanup kill");
}

#[test]
fn list_jobs_filters_by_status_and_provider() {
    let (_dir, root) = workspace();
    let signaler = Arc::new(CountingSignaler::default());
    let orchestrator = orchestrator(&root, Arc::clone(&signaler));
    let job_id = spawn_background(&orchestrator);
    wait_until_running(&orchestrator, &job_id);

    let mut finished = foreign_record(JobStatus::Completed, None);
    finished.job_id = "0badc0de".to_string();
    orchestrator.store().write(&finished).expect("seed");

    let control = orchestrator.control();
    let active = control
        .list_jobs(Some(ProviderKind::Codex), StatusFilter::Active, None)
        .expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].job_id, job_id);

    let completed = control
        .list_jobs(Some(ProviderKind::Codex), StatusFilter::Completed, None)
        .expect("completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].job_id, "0badc0de");

    let all = control
        .list_jobs(Some(ProviderKind::Codex), StatusFilter::All, Some(1))
        .expect("all");
    assert_eq!(all.len(), 1);
    assert!(control
        .list_jobs(Some(ProviderKind::Gemini), StatusFilter::All, None)
        .expect("gemini")
        .is_empty());

    control
        .kill_job(ProviderKind::Codex, &job_id, None)
        .expect("cleanup kill");
}
