use crate::provider::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Spawned,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Spawned, JobStatus::Running];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout
        )
    }

    /// Same-state writes of a non-terminal status are allowed so `running`
    /// can be refreshed with a new pid between fallback attempts.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (JobStatus::Spawned, JobStatus::Spawned)
                | (JobStatus::Spawned, JobStatus::Running)
                | (JobStatus::Spawned, JobStatus::Completed)
                | (JobStatus::Spawned, JobStatus::Failed)
                | (JobStatus::Spawned, JobStatus::Timeout)
                | (JobStatus::Running, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Timeout)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Spawned => "spawned",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "spawned" => Ok(JobStatus::Spawned),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "timeout" => Ok(JobStatus::Timeout),
            other => Err(format!("unknown job status `{other}`")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub provider: ProviderKind,
    pub job_id: String,
    pub slug: String,
    pub status: JobStatus,
    #[serde(default)]
    pub pid: Option<u32>,
    pub prompt_file: PathBuf,
    pub response_file: PathBuf,
    pub model: String,
    pub agent_role: String,
    pub spawned_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub used_fallback: bool,
    #[serde(default)]
    pub fallback_model: Option<String>,
    #[serde(default)]
    pub killed_by_user: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {provider}/{job_id}: refusing {from} -> {to} ({reason})")]
pub struct TransitionRejected {
    pub provider: ProviderKind,
    pub job_id: String,
    pub from: JobStatus,
    pub to: JobStatus,
    pub reason: &'static str,
}

/// Guard applied by the store before any write replaces `current`.
///
/// A kill always wins. Once a record is killed only other kill writes may
/// follow, and a terminal record accepts nothing but an identical rewrite.
pub fn check_successor(current: &JobRecord, candidate: &JobRecord) -> Result<(), TransitionRejected> {
    let rejected = |reason: &'static str| TransitionRejected {
        provider: current.provider,
        job_id: current.job_id.clone(),
        from: current.status,
        to: candidate.status,
        reason,
    };

    if current.killed_by_user && !candidate.killed_by_user {
        return Err(rejected("job was killed by user"));
    }
    if candidate.killed_by_user {
        return Ok(());
    }
    if current == candidate {
        return Ok(());
    }
    if current.status.is_terminal() {
        return Err(rejected("job already terminal"));
    }
    if !current.status.can_transition_to(candidate.status) {
        return Err(rejected("status may not move backwards"));
    }
    Ok(())
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_running(&self, pid: u32, model: &str) -> Self {
        Self {
            status: JobStatus::Running,
            pid: Some(pid),
            model: model.to_string(),
            ..self.clone()
        }
    }

    pub fn complete(
        &self,
        actual_model: &str,
        used_fallback: bool,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: JobStatus::Completed,
            model: actual_model.to_string(),
            completed_at: Some(completed_at),
            error: None,
            used_fallback,
            fallback_model: used_fallback.then(|| actual_model.to_string()),
            ..self.clone()
        }
    }

    /// `status` must be `Failed` or `Timeout`.
    pub fn fail(&self, status: JobStatus, error: &str, completed_at: DateTime<Utc>) -> Self {
        Self {
            status,
            completed_at: Some(completed_at),
            error: Some(error.to_string()),
            ..self.clone()
        }
    }

    pub fn kill(&self, signal_name: &str, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Failed,
            completed_at: Some(completed_at),
            error: Some(format!("killed by user ({signal_name})")),
            killed_by_user: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(status: JobStatus) -> JobRecord {
        JobRecord {
            provider: ProviderKind::Codex,
            job_id: "deadbeef".to_string(),
            slug: "hello".to_string(),
            status,
            pid: Some(4242),
            prompt_file: PathBuf::from("/ws/.jobrelay/prompts/p.md"),
            response_file: PathBuf::from("/ws/.jobrelay/prompts/r.md"),
            model: "m1".to_string(),
            agent_role: "architect".to_string(),
            spawned_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("ts"),
            completed_at: None,
            error: None,
            used_fallback: false,
            fallback_model: None,
            killed_by_user: false,
        }
    }

    #[test]
    fn terminal_statuses_are_final() {
        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Timeout] {
            assert!(status.is_terminal());
            for next in [
                JobStatus::Spawned,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Timeout,
            ] {
                assert!(!status.can_transition_to(next));
            }
        }
        assert!(JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Spawned));
    }

    #[test]
    fn completion_after_kill_is_rejected() {
        let now = Utc::now();
        let running = record(JobStatus::Running);
        let killed = running.kill("SIGTERM", now);
        let completed = running.complete("m1", false, now);

        let err = check_successor(&killed, &completed).expect_err("stale completion");
        assert_eq!(err.reason, "job was killed by user");
        assert!(check_successor(&killed, &killed).is_ok());
    }

    #[test]
    fn kill_wins_over_terminal_record() {
        let now = Utc::now();
        let completed = record(JobStatus::Running).complete("m2", true, now);
        let killed = completed.kill("SIGINT", now);
        assert!(check_successor(&completed, &killed).is_ok());
        assert_eq!(killed.status, JobStatus::Failed);
        assert!(killed.killed_by_user);
        assert_eq!(killed.error.as_deref(), Some("killed by user (SIGINT)"));
    }

    #[test]
    fn terminal_record_rejects_changes() {
        let now = Utc::now();
        let failed = record(JobStatus::Running).fail(JobStatus::Failed, "boom", now);
        assert!(check_successor(&failed, &failed.clone()).is_ok());
        let completed = record(JobStatus::Running).complete("m1", false, now);
        assert!(check_successor(&failed, &completed).is_err());
    }

    #[test]
    fn complete_records_fallback_model() {
        let done = record(JobStatus::Running).complete("m2", true, Utc::now());
        assert_eq!(done.fallback_model.as_deref(), Some("m2"));
        assert_eq!(done.model, "m2");
        let direct = record(JobStatus::Running).complete("m1", false, Utc::now());
        assert!(direct.fallback_model.is_none());
    }

    #[test]
    fn serializes_camel_case_fields() {
        let value = serde_json::to_value(record(JobStatus::Spawned)).expect("json");
        assert_eq!(value["jobId"], "deadbeef");
        assert_eq!(value["status"], "spawned");
        assert_eq!(value["killedByUser"], false);
        assert_eq!(value["provider"], "codex");
    }
}
