use chrono::Duration as ChronoDuration;
use jobrelay::jobs::{
    JobBackend, JobPaths, JobRecord, JobStatus, JobStore, SqliteJobStore, WriteOutcome,
};
use jobrelay::provider::ProviderKind;
use jobrelay::security::workspace_fingerprint;
use jobrelay::shared::time::now_utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;

fn workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join(".git")).expect("git marker");
    let root = fs::canonicalize(dir.path()).expect("canonical");
    (dir, root)
}

fn record(root: &Path, provider: ProviderKind, job_id: &str, status: JobStatus) -> JobRecord {
    let paths = JobPaths::new(root);
    JobRecord {
        provider,
        job_id: job_id.to_string(),
        slug: "refactor-parser".to_string(),
        status,
        pid: (!status.is_terminal()).then_some(4242),
        prompt_file: paths.prompt_file(provider, "refactor-parser", job_id),
        response_file: paths.response_file(provider, "refactor-parser", job_id),
        model: "m1".to_string(),
        agent_role: "implementer".to_string(),
        spawned_at: now_utc(),
        completed_at: status.is_terminal().then(now_utc),
        error: None,
        used_fallback: false,
        fallback_model: None,
        killed_by_user: false,
    }
}

#[test]
fn write_then_read_matches_in_both_backends() {
    let (_dir, root) = workspace();
    let store = JobStore::open(&root).expect("store");
    assert!(store.has_database());

    let mut running = record(&root, ProviderKind::Codex, "a1b2c3d4", JobStatus::Running);
    running.fallback_model = Some("m2".to_string());
    assert_eq!(store.write(&running).expect("write"), WriteOutcome::Written);

    assert_eq!(
        store.read(ProviderKind::Codex, "a1b2c3d4").expect("read"),
        Some(running.clone())
    );
    let status_file = store
        .paths()
        .status_file(ProviderKind::Codex, "refactor-parser", "a1b2c3d4");
    let on_disk: JobRecord =
        serde_json::from_str(&fs::read_to_string(&status_file).expect("status file"))
            .expect("decode");
    assert_eq!(on_disk, running);
    let raw = fs::read_to_string(&status_file).expect("status file");
    assert!(raw.contains("\"jobId\": \"a1b2c3d4\""));
    assert!(raw.contains("\"status\": \"running\""));

    assert!(store.read(ProviderKind::Gemini, "a1b2c3d4").expect("read").is_none());
}

#[test]
fn terminal_records_are_not_revived_and_kill_wins() {
    let (_dir, root) = workspace();
    let store = JobStore::open(&root).expect("store");
    let running = record(&root, ProviderKind::Gemini, "0a0b0c0d", JobStatus::Running);
    store.write(&running).expect("running");

    let completed = running.complete("m1", false, now_utc());
    assert!(store.write(&completed).expect("complete").is_written());
    match store.write(&running).expect("revive") {
        WriteOutcome::Rejected(rejected) => assert_eq!(rejected.reason, "job already terminal"),
        other => panic!("terminal record was replaced: {other:?}"),
    }

    // A kill landing after completion still records the user's intent.
    let killed = completed.kill("SIGTERM", now_utc());
    assert!(store.write(&killed).expect("kill").is_written());
    let late = running.complete("m1", false, now_utc());
    assert!(matches!(
        store.write(&late).expect("late completion"),
        WriteOutcome::Rejected(_)
    ));

    let current = store
        .read(ProviderKind::Gemini, "0a0b0c0d")
        .expect("read")
        .expect("record");
    assert!(current.killed_by_user);
    assert_eq!(current.status, JobStatus::Failed);
    assert_eq!(current.error.as_deref(), Some("killed by user (SIGTERM)"));
}

#[test]
fn same_job_id_under_two_providers_in_two_workspaces_stays_isolated() {
    let (_a, root_a) = workspace();
    let (_b, root_b) = workspace();
    let store_a = JobStore::open(&root_a).expect("store a");
    let store_b = JobStore::open(&root_b).expect("store b");

    store_a
        .write(&record(&root_a, ProviderKind::Codex, "deadbeef", JobStatus::Running))
        .expect("a");
    store_b
        .write(&record(&root_b, ProviderKind::Gemini, "deadbeef", JobStatus::Completed))
        .expect("b");

    assert!(store_a.read(ProviderKind::Gemini, "deadbeef").expect("read").is_none());
    assert!(store_b.read(ProviderKind::Codex, "deadbeef").expect("read").is_none());
    let listed_a = store_a.list(&Default::default()).expect("list a");
    assert_eq!(listed_a.len(), 1);
    assert_eq!(listed_a[0].provider, ProviderKind::Codex);
    assert_eq!(store_b.list_active(None).expect("active b").len(), 0);
}

#[test]
fn shared_database_file_is_partitioned_by_workspace_key() {
    let (_a, root_a) = workspace();
    let (_b, root_b) = workspace();
    let shared = tempdir().expect("shared");
    let db_path = shared.path().join("jobs.db");
    let db_a = SqliteJobStore::open(&db_path, &workspace_fingerprint(&root_a)).expect("db a");
    let db_b = SqliteJobStore::open(&db_path, &workspace_fingerprint(&root_b)).expect("db b");

    db_a.put(&record(&root_a, ProviderKind::Codex, "cafe0001", JobStatus::Running))
        .expect("put a");
    db_b.put(&record(&root_b, ProviderKind::Codex, "cafe0001", JobStatus::Failed))
        .expect("put b");

    let from_a = db_a
        .get(ProviderKind::Codex, "cafe0001")
        .expect("get a")
        .expect("row a");
    assert_eq!(from_a.status, JobStatus::Running);
    assert_eq!(db_b.count().expect("count b"), 1);
}

#[test]
fn unusable_database_degrades_to_status_files() {
    let (_dir, root) = workspace();
    // A directory where the database file belongs cannot be opened as SQLite.
    fs::create_dir_all(JobPaths::new(&root).database_path()).expect("blocker");
    let store = JobStore::open(&root).expect("store");
    assert!(!store.has_database());

    let running = record(&root, ProviderKind::Codex, "b0b0b0b0", JobStatus::Running);
    store.write(&running).expect("write");
    assert_eq!(
        store.read(ProviderKind::Codex, "b0b0b0b0").expect("read"),
        Some(running)
    );
    assert_eq!(store.list_active(Some(ProviderKind::Codex)).expect("list").len(), 1);
    assert!(!store.migrate_from_files().errors.is_empty());
}

#[test]
fn opening_a_database_imports_existing_status_files() {
    let (_dir, root) = workspace();
    let files = JobStore::file_only(&root).expect("file store");
    files
        .write(&record(&root, ProviderKind::Codex, "11112222", JobStatus::Completed))
        .expect("one");
    files
        .write(&record(&root, ProviderKind::Gemini, "33334444", JobStatus::Running))
        .expect("two");
    fs::write(
        files
            .paths()
            .status_file(ProviderKind::Codex, "broken", "55556666"),
        "{not json",
    )
    .expect("corrupt");

    let store = JobStore::open(&root).expect("store");
    assert!(store.has_database());
    let db = SqliteJobStore::open(
        &store.paths().database_path(),
        &workspace_fingerprint(&root),
    )
    .expect("db");
    assert_eq!(db.count().expect("count"), 2);

    let report = store.migrate_from_files();
    assert_eq!(report.imported, 2);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("55556666"));
}

#[test]
fn listing_is_newest_first_with_limit() {
    let (_dir, root) = workspace();
    let store = JobStore::open(&root).expect("store");
    let base = now_utc();
    for (offset, id) in ["00000001", "00000002", "00000003"].iter().enumerate() {
        let mut row = record(&root, ProviderKind::Codex, id, JobStatus::Running);
        row.spawned_at = base + ChronoDuration::seconds(offset as i64);
        store.write(&row).expect("write");
    }
    let rows = store
        .list_by_status(Some(ProviderKind::Codex), &[JobStatus::Running], Some(2))
        .expect("list");
    let ids: Vec<&str> = rows.iter().map(|row| row.job_id.as_str()).collect();
    assert_eq!(ids, vec!["00000003", "00000002"]);
}

#[test]
fn cleanup_removes_old_terminal_records_and_keeps_artifacts() {
    let (_dir, root) = workspace();
    let store = JobStore::open(&root).expect("store");
    let long_ago = now_utc() - ChronoDuration::hours(48);

    let mut old_done = record(&root, ProviderKind::Codex, "0dd0dd00", JobStatus::Completed);
    old_done.spawned_at = long_ago;
    old_done.completed_at = Some(long_ago);
    fs::write(&old_done.response_file, "---\n---\n\nkept\n").expect("artifact");
    store.write(&old_done).expect("old");

    let mut old_running = record(&root, ProviderKind::Codex, "0dd0dd01", JobStatus::Running);
    old_running.spawned_at = long_ago;
    store.write(&old_running).expect("running");

    let fresh = record(&root, ProviderKind::Gemini, "0dd0dd02", JobStatus::Failed);
    store.write(&fresh).expect("fresh");

    let removed = store
        .cleanup_older_than(Duration::from_secs(24 * 60 * 60))
        .expect("cleanup");
    assert_eq!(removed, 1);
    assert!(store.read(ProviderKind::Codex, "0dd0dd00").expect("read").is_none());
    assert!(store.read(ProviderKind::Codex, "0dd0dd01").expect("read").is_some());
    assert!(store.read(ProviderKind::Gemini, "0dd0dd02").expect("read").is_some());
    assert!(old_done.response_file.exists());
}

#[test]
fn delete_reports_whether_anything_was_removed() {
    let (_dir, root) = workspace();
    let store = JobStore::open(&root).expect("store");
    store
        .write(&record(&root, ProviderKind::Codex, "abcdef01", JobStatus::Timeout))
        .expect("write");
    assert!(store.delete(ProviderKind::Codex, "abcdef01").expect("delete"));
    assert!(!store.delete(ProviderKind::Codex, "abcdef01").expect("again"));
    assert!(!store.contains_job_id("abcdef01").expect("contains"));
}

#[test]
fn listing_includes_status_files_the_database_never_saw() {
    let (_dir, root) = workspace();
    let indexed = JobStore::open(&root).expect("store");
    indexed
        .write(&record(&root, ProviderKind::Codex, "aaaaaaaa", JobStatus::Running))
        .expect("indexed write");
    // A sibling writer running without the database.
    JobStore::file_only(&root)
        .expect("file store")
        .write(&record(&root, ProviderKind::Codex, "bbbbbbbb", JobStatus::Running))
        .expect("file-only write");

    let reopened = JobStore::open(&root).expect("reopen");
    assert!(reopened.has_database());
    let mut ids: Vec<String> = reopened
        .list_active(Some(ProviderKind::Codex))
        .expect("active")
        .into_iter()
        .map(|row| row.job_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["aaaaaaaa", "bbbbbbbb"]);

    // The missing row was indexed while listing.
    let db = SqliteJobStore::open(
        &reopened.paths().database_path(),
        &workspace_fingerprint(&root),
    )
    .expect("db");
    assert_eq!(db.count().expect("count"), 2);
}

#[test]
fn status_filter_and_limit_follow_the_status_file_not_a_stale_row() {
    let (_dir, root) = workspace();
    let store = JobStore::open(&root).expect("store");
    let base = now_utc();
    let mut rows = Vec::new();
    for (offset, id) in ["c0000001", "c0000002", "c0000003"].iter().enumerate() {
        let mut row = record(&root, ProviderKind::Gemini, id, JobStatus::Running);
        row.spawned_at = base + ChronoDuration::seconds(offset as i64);
        store.write(&row).expect("write");
        rows.push(row);
    }

    // The newest job completes through a writer that cannot reach the database.
    let files = JobStore::file_only(&root).expect("file store");
    let done = rows[2].complete("m1", false, now_utc());
    assert!(files.write(&done).expect("complete").is_written());

    let running = store
        .list_by_status(Some(ProviderKind::Gemini), &[JobStatus::Running], Some(2))
        .expect("running");
    let ids: Vec<&str> = running.iter().map(|row| row.job_id.as_str()).collect();
    assert_eq!(ids, vec!["c0000002", "c0000001"]);

    let completed = store
        .list_by_status(Some(ProviderKind::Gemini), &[JobStatus::Completed], None)
        .expect("completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].job_id, "c0000003");
}
