use crate::jobs::{
    read_artifact_body, JobQuery, JobRecord, JobStatus, JobStore, JobStoreError,
    SpawnedPidRegistry, WriteOutcome,
};
use crate::provider::{ProviderKind, Signal, SignalSender};
use crate::shared::ids::validate_job_id;
use crate::shared::time::now_utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const RESPONSE_PREVIEW_CHARS: usize = 500;
pub const DEFAULT_LIST_LIMIT: usize = 50;
/// Linux's ceiling for `kernel.pid_max`; used when the live value is unreadable.
const FALLBACK_PID_MAX: u64 = 4_194_304;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("no {provider} job `{job_id}` in this workspace")]
    NotFound {
        provider: ProviderKind,
        job_id: String,
    },
    #[error("invalid job id `{job_id}`: {reason}")]
    InvalidJobId { job_id: String, reason: String },
    #[error("invalid signal: {0}")]
    InvalidSignal(String),
    #[error("invalid status filter `{0}`; expected active, completed, failed, timeout, or all")]
    InvalidFilter(String),
    #[error("refusing to kill job `{job_id}`: {reason}")]
    KillRefused { job_id: String, reason: String },
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

impl ControlError {
    pub fn token(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "JOB_NOT_FOUND",
            Self::InvalidJobId { .. } | Self::InvalidFilter(_) => "INVALID_ARGUMENT",
            Self::InvalidSignal(_) => "INVALID_SIGNAL",
            Self::KillRefused { .. } => "KILL_REFUSED",
            Self::Store(err) => err.token(),
        }
    }

    pub fn remediation(&self) -> String {
        match self {
            Self::NotFound { .. } => {
                "call list_jobs with status_filter `all` to see the job ids in this workspace"
                    .to_string()
            }
            Self::InvalidJobId { .. } => "pass the hexadecimal job_id returned at spawn".to_string(),
            Self::InvalidSignal(_) => "use SIGTERM (default) or SIGINT".to_string(),
            Self::InvalidFilter(_) => {
                "use one of: active, completed, failed, timeout, all".to_string()
            }
            Self::KillRefused { .. } => {
                "only running jobs started by this orchestrator process can be killed; check_job_status shows the current state"
                    .to_string()
            }
            Self::Store(err) => err.remediation(),
        }
    }
}

/// Exponential backoff for `wait_for_job`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSchedule {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            factor: 1.5,
            max: Duration::from_millis(2000),
        }
    }
}

impl PollSchedule {
    pub fn next(&self, current: Duration) -> Duration {
        current.mul_f64(self.factor).min(self.max)
    }
}

/// How the killed state is re-asserted after signalling, since the job's
/// own completion handler races the kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassertPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReassertPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    Active,
    Completed,
    Failed,
    Timeout,
    All,
}

impl StatusFilter {
    pub fn parse(raw: &str) -> Result<Self, ControlError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            "all" => Ok(Self::All),
            other => Err(ControlError::InvalidFilter(other.to_string())),
        }
    }

    fn statuses(self) -> Option<Vec<JobStatus>> {
        match self {
            Self::Active => Some(JobStatus::ACTIVE.to_vec()),
            Self::Completed => Some(vec![JobStatus::Completed]),
            Self::Failed => Some(vec![JobStatus::Failed]),
            Self::Timeout => Some(vec![JobStatus::Timeout]),
            Self::All => None,
        }
    }
}

/// A record plus the first characters of its response, when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub record: JobRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Finished(JobSnapshot),
    TimedOut(JobSnapshot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    Killed {
        record: JobRecord,
        signal: Signal,
        delivered: bool,
    },
    AlreadyKilled(JobRecord),
}

/// Poll, inspect, cancel and list jobs in one workspace store.
pub struct JobControl {
    store: Arc<JobStore>,
    registry: Arc<SpawnedPidRegistry>,
    signaler: Arc<dyn SignalSender>,
    schedule: PollSchedule,
    reassert: ReassertPolicy,
    kill_lock: Mutex<()>,
}

impl JobControl {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<SpawnedPidRegistry>,
        signaler: Arc<dyn SignalSender>,
    ) -> Self {
        Self {
            store,
            registry,
            signaler,
            schedule: PollSchedule::default(),
            reassert: ReassertPolicy::default(),
            kill_lock: Mutex::new(()),
        }
    }

    pub fn with_poll_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_reassert_policy(mut self, reassert: ReassertPolicy) -> Self {
        self.reassert = reassert;
        self
    }

    fn load(&self, provider: ProviderKind, job_id: &str) -> Result<JobRecord, ControlError> {
        validate_job_id(job_id).map_err(|reason| ControlError::InvalidJobId {
            job_id: job_id.to_string(),
            reason,
        })?;
        self.store
            .read(provider, job_id)?
            .ok_or_else(|| ControlError::NotFound {
                provider,
                job_id: job_id.to_string(),
            })
    }

    /// Blocks until the job is terminal or `timeout` elapses.
    pub fn wait_for_job(
        &self,
        provider: ProviderKind,
        job_id: &str,
        timeout: Duration,
    ) -> Result<WaitOutcome, ControlError> {
        let started = Instant::now();
        let mut interval = self.schedule.initial;
        loop {
            let record = self.load(provider, job_id)?;
            if record.is_terminal() {
                return Ok(WaitOutcome::Finished(snapshot(record)));
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(WaitOutcome::TimedOut(snapshot(record)));
            }
            thread::sleep(interval.min(timeout - elapsed));
            interval = self.schedule.next(interval);
        }
    }

    /// Single read; never sleeps.
    pub fn check_job_status(
        &self,
        provider: ProviderKind,
        job_id: &str,
    ) -> Result<JobSnapshot, ControlError> {
        Ok(snapshot(self.load(provider, job_id)?))
    }

    pub fn kill_job(
        &self,
        provider: ProviderKind,
        job_id: &str,
        signal: Option<&str>,
    ) -> Result<KillOutcome, ControlError> {
        let signal = match signal.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Signal::parse(raw).map_err(ControlError::InvalidSignal)?,
            None => Signal::Terminate,
        };
        let _guard = self
            .kill_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let record = self.load(provider, job_id)?;
        let refuse = |reason: String| ControlError::KillRefused {
            job_id: job_id.to_string(),
            reason,
        };
        if record.killed_by_user {
            return Ok(KillOutcome::AlreadyKilled(record));
        }
        if record.is_terminal() {
            return Err(refuse(format!("job is already {}", record.status)));
        }
        let Some(pid) = record.pid else {
            return Err(refuse("job has no recorded pid yet".to_string()));
        };
        if !pid_is_plausible(pid) {
            return Err(refuse(format!("recorded pid {pid} is out of range")));
        }
        if !self.registry.contains(pid) {
            return Err(refuse(format!(
                "pid {pid} was not spawned by this orchestrator process"
            )));
        }

        // Killed and terminal before the signal goes out.
        let killed = record.kill(signal.name(), now_utc());
        if let WriteOutcome::Rejected(_) = self.store.write(&killed)? {
            // A sibling process got its kill in first.
            return Ok(KillOutcome::AlreadyKilled(self.load(provider, job_id)?));
        }

        // The pid is re-checked under the registry lock so an exit racing this
        // kill cannot hand the signal to a recycled process group.
        let sent = self
            .registry
            .with_registered(pid, || self.signaler.signal_group(pid, signal));
        let delivered = match sent {
            Some(Ok(())) => true,
            Some(Err(err)) => {
                tracing::warn!(job_id, pid, error = %err, "signal delivery failed; job is marked killed");
                false
            }
            None => {
                tracing::info!(job_id, pid, "process exited before the signal was sent");
                false
            }
        };
        tracing::info!(provider = %provider, job_id, pid, signal = %signal, "job killed by user");

        self.reassert_killed(provider, job_id, &killed);
        Ok(KillOutcome::Killed {
            record: killed,
            signal,
            delivered,
        })
    }

    fn reassert_killed(&self, provider: ProviderKind, job_id: &str, killed: &JobRecord) {
        for _ in 0..self.reassert.attempts {
            thread::sleep(self.reassert.delay);
            match self.store.read(provider, job_id) {
                Ok(Some(current)) if current.killed_by_user => {}
                Ok(_) => {
                    tracing::warn!(job_id, "killed state was overwritten; re-asserting");
                    if let Err(err) = self.store.write(killed) {
                        tracing::warn!(job_id, error = %err, "failed to re-assert killed state");
                    }
                }
                Err(err) => tracing::warn!(job_id, error = %err, "failed to re-read killed job"),
            }
        }
    }

    pub fn list_jobs(
        &self,
        provider: Option<ProviderKind>,
        filter: StatusFilter,
        limit: Option<usize>,
    ) -> Result<Vec<JobRecord>, ControlError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let records = match filter.statuses() {
            Some(statuses) => self.store.list_by_status(provider, &statuses, Some(limit))?,
            None => self.store.list(&JobQuery {
                provider,
                statuses: None,
                limit: Some(limit),
            })?,
        };
        Ok(records)
    }
}

fn snapshot(record: JobRecord) -> JobSnapshot {
    let response_preview = if record.status == JobStatus::Completed {
        match read_artifact_body(&record.response_file) {
            Ok(body) => Some(body.chars().take(RESPONSE_PREVIEW_CHARS).collect()),
            Err(err) => {
                tracing::debug!(job_id = %record.job_id, error = %err, "response artifact unreadable");
                None
            }
        }
    } else {
        None
    };
    JobSnapshot {
        record,
        response_preview,
    }
}

pub fn pid_is_plausible(pid: u32) -> bool {
    pid > 1 && u64::from(pid) <= pid_max()
}

fn pid_max() -> u64 {
    std::fs::read_to_string("/proc/sys/kernel/pid_max")
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(FALLBACK_PID_MAX)
}
