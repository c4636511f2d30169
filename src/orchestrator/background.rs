use crate::jobs::{
    write_audit_artifact, AuditHeader, AuditKind, JobRecord, JobStatus, JobStore,
    SpawnedPidRegistry, WriteOutcome,
};
use crate::provider::{
    classify_outcome, spawn_attempt, AttemptConfig, ExecError, FallbackCursor, FallbackFailure,
    FallbackSuccess, ProcessHandle, ProcessOutcome, Signal, SignalSender,
};
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::time::now_utc;
use std::path::PathBuf;
use std::sync::Arc;

/// State carried through the completion-callback chain of one background job.
pub(crate) struct BackgroundJob {
    pub store: Arc<JobStore>,
    pub registry: Arc<SpawnedPidRegistry>,
    pub signaler: Arc<dyn SignalSender>,
    pub config: AttemptConfig,
    pub prompt: String,
    pub spawned: JobRecord,
    pub output_file: PathBuf,
}

impl BackgroundJob {
    /// Latest stored record, or the spawn-time record if the store is unreadable.
    fn current(&self) -> JobRecord {
        match self.store.read(self.spawned.provider, &self.spawned.job_id) {
            Ok(Some(record)) => record,
            Ok(None) => self.spawned.clone(),
            Err(err) => {
                tracing::warn!(job_id = %self.spawned.job_id, error = %err, "job status read failed");
                self.spawned.clone()
            }
        }
    }

    fn killed(&self, record: &JobRecord) -> bool {
        if record.killed_by_user {
            tracing::warn!(
                provider = %record.provider,
                job_id = %record.job_id,
                "job was killed by user; dropping attempt outcome"
            );
        }
        record.killed_by_user
    }

    fn write(&self, record: &JobRecord) -> bool {
        match self.store.write(record) {
            Ok(WriteOutcome::Written) => true,
            Ok(WriteOutcome::Rejected(rejected)) => {
                tracing::warn!(job_id = %record.job_id, error = %rejected, "job status write rejected");
                false
            }
            Err(err) => {
                tracing::warn!(job_id = %record.job_id, error = %err, "job status write failed");
                false
            }
        }
    }
}

/// Starts the next attempt in the fallback walk. Each attempt's exit
/// callback either finishes the job or calls back in here, so attempts stay
/// strictly sequential.
pub(crate) fn launch(job: Arc<BackgroundJob>, mut cursor: FallbackCursor) {
    loop {
        if job.killed(&job.current()) {
            return;
        }
        let Some((model, remaining)) = cursor.next_attempt() else {
            finish_failure(&job, cursor.failure());
            return;
        };

        let child = match spawn_attempt(
            &job.config,
            &model,
            &job.prompt,
            remaining,
            Arc::clone(&job.signaler),
        ) {
            Ok(child) => child,
            Err(err) => {
                if cursor.record_failure(err) {
                    continue;
                }
                finish_failure(&job, cursor.failure());
                return;
            }
        };

        let pid = child.pid();
        job.registry.register(pid);
        let running = job.current().mark_running(pid, &model);
        if !job.write(&running) && job.current().killed_by_user {
            // Killed between spawn and this write; the killer never saw this pid.
            let _ = child.signal_group(Signal::Terminate);
        }
        tracing::info!(
            provider = %job.config.provider,
            job_id = %job.spawned.job_id,
            model = %model,
            pid,
            "background attempt running"
        );

        let next = Arc::clone(&job);
        Box::new(child).on_exit(Box::new(move |outcome| {
            next.registry.release(pid);
            on_attempt_exit(next, cursor, model, outcome);
        }));
        return;
    }
}

fn on_attempt_exit(
    job: Arc<BackgroundJob>,
    mut cursor: FallbackCursor,
    model: String,
    outcome: ProcessOutcome,
) {
    match classify_outcome(job.config.provider, &model, outcome) {
        Ok(response) => finish_success(&job, cursor.success(response)),
        Err(err) => {
            let recoverable = err.is_recoverable();
            if cursor.record_failure(err) {
                tracing::warn!(
                    job_id = %job.spawned.job_id,
                    model = %model,
                    recoverable,
                    "background attempt failed; trying next model"
                );
                launch(job, cursor);
            } else {
                finish_failure(&job, cursor.failure());
            }
        }
    }
}

fn finish_success(job: &BackgroundJob, success: FallbackSuccess) {
    let current = job.current();
    if job.killed(&current) {
        return;
    }
    let now = now_utc();
    let header = AuditHeader {
        kind: AuditKind::Response,
        provider: current.provider,
        agent_role: current.agent_role.clone(),
        model: success.actual_model.clone(),
        job_id: current.job_id.clone(),
        timestamp: now,
        used_fallback: success.used_fallback,
        fallback_model: success.used_fallback.then(|| success.actual_model.clone()),
    };
    if let Err(err) = write_audit_artifact(&current.response_file, &header, &success.response) {
        let failed = current.fail(
            JobStatus::Failed,
            &format!(
                "failed to write response artifact {}: {err}",
                current.response_file.display()
            ),
            now,
        );
        job.write(&failed);
        return;
    }
    if let Err(err) = atomic_write_file(&job.output_file, success.response.as_bytes()) {
        let failed = current.fail(
            JobStatus::Failed,
            &format!(
                "failed to write output file {}: {err}",
                job.output_file.display()
            ),
            now,
        );
        job.write(&failed);
        return;
    }

    let completed = current.complete(&success.actual_model, success.used_fallback, now);
    if job.write(&completed) {
        tracing::info!(
            provider = %completed.provider,
            job_id = %completed.job_id,
            model = %completed.model,
            used_fallback = completed.used_fallback,
            "background job completed"
        );
    }
}

fn finish_failure(job: &BackgroundJob, failure: FallbackFailure) {
    let current = job.current();
    if job.killed(&current) {
        return;
    }
    let status = match failure.last_error {
        ExecError::Timeout { .. } => JobStatus::Timeout,
        _ => JobStatus::Failed,
    };
    let message = format!("[{}] {failure}", failure.last_error.token());
    let mut failed = current.fail(status, &message, now_utc());
    if let Some(model) = failure.attempted_models.last() {
        failed.model = model.clone();
        failed.used_fallback = failure.attempted_models.len() > 1;
    }
    if job.write(&failed) {
        tracing::warn!(
            provider = %failed.provider,
            job_id = %failed.job_id,
            status = %status,
            error = %message,
            "background job failed"
        );
    }
}
