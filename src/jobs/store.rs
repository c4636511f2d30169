use super::file_store::FileJobStore;
use super::paths::JobPaths;
use super::record::{check_successor, JobRecord, JobStatus, TransitionRejected};
use super::sqlite_store::SqliteJobStore;
use super::{sort_newest_first, JobBackend, JobQuery, JobStoreError};
use crate::provider::ProviderKind;
use crate::security::workspace_fingerprint;
use crate::shared::time::now_utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Rejected(TransitionRejected),
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub imported: usize,
    pub errors: Vec<String>,
}

/// Façade over the status files and the optional database.
///
/// Status files are always written and always win on read. Database failures
/// are logged and the call continues against the files.
#[derive(Debug)]
pub struct JobStore {
    workspace_root: PathBuf,
    files: FileJobStore,
    database: Option<SqliteJobStore>,
    write_lock: Mutex<()>,
}

impl JobStore {
    pub fn open(workspace_root: &Path) -> Result<Self, JobStoreError> {
        let paths = JobPaths::new(workspace_root);
        let database = match SqliteJobStore::open(
            &paths.database_path(),
            &workspace_fingerprint(workspace_root),
        ) {
            Ok(database) => Some(database),
            Err(err) => {
                tracing::warn!(
                    workspace = %workspace_root.display(),
                    error = %err,
                    "job database unavailable; continuing with status files only"
                );
                None
            }
        };
        let store = Self::with_backends(workspace_root, paths, database)?;
        store.migrate_if_empty();
        Ok(store)
    }

    pub fn file_only(workspace_root: &Path) -> Result<Self, JobStoreError> {
        Self::with_backends(workspace_root, JobPaths::new(workspace_root), None)
    }

    fn with_backends(
        workspace_root: &Path,
        paths: JobPaths,
        database: Option<SqliteJobStore>,
    ) -> Result<Self, JobStoreError> {
        let files = FileJobStore::new(paths);
        files.ensure_dirs()?;
        Ok(Self {
            workspace_root: workspace_root.to_path_buf(),
            files,
            database,
            write_lock: Mutex::new(()),
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn paths(&self) -> &JobPaths {
        self.files.paths()
    }

    pub fn has_database(&self) -> bool {
        self.database.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn migrate_if_empty(&self) {
        let Some(database) = &self.database else {
            return;
        };
        match database.count() {
            Ok(0) => {
                let report = self.migrate_from_files();
                if report.imported > 0 || !report.errors.is_empty() {
                    tracing::info!(
                        imported = report.imported,
                        errors = report.errors.len(),
                        "imported existing status files into job database"
                    );
                }
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "job database count failed"),
        }
    }

    /// Writes `record` unless the guard refuses to replace the current one.
    pub fn write(&self, record: &JobRecord) -> Result<WriteOutcome, JobStoreError> {
        let _guard = self.lock();
        if let Some(current) = self.files.get_at(record.provider, &record.slug, &record.job_id)? {
            if let Err(rejected) = check_successor(&current, record) {
                tracing::info!(
                    provider = %record.provider,
                    job_id = %record.job_id,
                    reason = rejected.reason,
                    "job status write rejected"
                );
                return Ok(WriteOutcome::Rejected(rejected));
            }
        }
        self.files.put(record)?;
        if let Some(database) = &self.database {
            if let Err(err) = database.put(record) {
                tracing::warn!(
                    job_id = %record.job_id,
                    error = %err,
                    "job database write failed; status file is current"
                );
            }
        }
        Ok(WriteOutcome::Written)
    }

    pub fn read(
        &self,
        provider: ProviderKind,
        job_id: &str,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        if let Some(database) = &self.database {
            match database.get(provider, job_id) {
                Ok(Some(indexed)) => {
                    if let Some(record) = self.files.get_at(provider, &indexed.slug, job_id)? {
                        return Ok(Some(record));
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    job_id,
                    error = %err,
                    "job database read failed; scanning status files"
                ),
            }
        }
        self.files.get(provider, job_id)
    }

    pub fn contains_job_id(&self, job_id: &str) -> Result<bool, JobStoreError> {
        self.files.contains_job_id(job_id)
    }

    pub fn list(&self, query: &JobQuery) -> Result<Vec<JobRecord>, JobStoreError> {
        if let Some(database) = &self.database {
            // Status and limit are applied after the files are consulted, so a
            // stale row can neither hide a job nor use up the limit.
            let unfiltered = JobQuery {
                provider: query.provider,
                statuses: None,
                limit: None,
            };
            match database.list(&unfiltered) {
                Ok(indexed) => return self.reconcile_with_files(database, indexed, query),
                Err(err) => tracing::warn!(
                    error = %err,
                    "job database list failed; scanning status files"
                ),
            }
        }
        self.files.list(query)
    }

    /// Builds the listing from status files. Indexed rows are re-read from
    /// their files, and files with no row (a failed database write, or a
    /// writer running without the database) are indexed on the way.
    fn reconcile_with_files(
        &self,
        database: &SqliteJobStore,
        indexed: Vec<JobRecord>,
        query: &JobQuery,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        let mut known = BTreeSet::new();
        let mut out = Vec::with_capacity(indexed.len());
        for row in indexed {
            known.insert((row.provider, row.job_id.clone()));
            match self.files.get_at(row.provider, &row.slug, &row.job_id) {
                Ok(Some(record)) => {
                    if record != row {
                        self.reindex(database, &record);
                    }
                    if query.matches(&record) {
                        out.push(record);
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    job_id = %row.job_id,
                    error = %err,
                    "skipping unreadable job status file"
                ),
            }
        }

        for (provider, slug, job_id, _) in self.files.status_files()? {
            if query.provider.is_some_and(|wanted| wanted != provider)
                || known.contains(&(provider, job_id.clone()))
            {
                continue;
            }
            match self.files.get_at(provider, &slug, &job_id) {
                Ok(Some(record)) => {
                    self.reindex(database, &record);
                    if query.matches(&record) {
                        out.push(record);
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    job_id = %job_id,
                    error = %err,
                    "skipping unreadable job status file"
                ),
            }
        }

        sort_newest_first(&mut out);
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Brings the database row in line with the status file.
    fn reindex(&self, database: &SqliteJobStore, seen: &JobRecord) {
        let _guard = self.lock();
        // Re-read under the lock so a concurrent write is not rolled back.
        let current = match self.files.get_at(seen.provider, &seen.slug, &seen.job_id) {
            Ok(Some(current)) => current,
            Ok(None) | Err(_) => return,
        };
        if let Err(err) = database.put(&current) {
            tracing::warn!(
                job_id = %current.job_id,
                error = %err,
                "job database reindex failed; status file is current"
            );
        }
    }

    pub fn list_active(&self, provider: Option<ProviderKind>) -> Result<Vec<JobRecord>, JobStoreError> {
        self.list(&JobQuery::active(provider))
    }

    pub fn list_by_status(
        &self,
        provider: Option<ProviderKind>,
        statuses: &[JobStatus],
        limit: Option<usize>,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        self.list(&JobQuery {
            provider,
            statuses: Some(statuses.to_vec()),
            limit,
        })
    }

    pub fn delete(&self, provider: ProviderKind, job_id: &str) -> Result<bool, JobStoreError> {
        let _guard = self.lock();
        let removed = self.files.remove(provider, job_id)?;
        let indexed = match &self.database {
            Some(database) => database.remove(provider, job_id).unwrap_or_else(|err| {
                tracing::warn!(job_id, error = %err, "job database delete failed");
                false
            }),
            None => false,
        };
        Ok(removed || indexed)
    }

    /// Upserts every status file into the database.
    pub fn migrate_from_files(&self) -> MigrationReport {
        let mut report = MigrationReport::default();
        let Some(database) = &self.database else {
            report
                .errors
                .push("job database is unavailable; nothing to migrate into".to_string());
            return report;
        };
        let (records, errors) = match self.files.load_all() {
            Ok(loaded) => loaded,
            Err(err) => {
                report.errors.push(err.to_string());
                return report;
            }
        };
        report.errors.extend(errors.iter().map(ToString::to_string));
        for record in records {
            match database.put(&record) {
                Ok(()) => report.imported += 1,
                Err(err) => report
                    .errors
                    .push(format!("{}/{}: {err}", record.provider, record.job_id)),
            }
        }
        report
    }

    /// Deletes terminal jobs finished more than `max_age` ago. Prompt and
    /// response artifacts are left in place.
    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<usize, JobStoreError> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = now_utc()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let expired = |record: &JobRecord| {
            record.is_terminal() && record.completed_at.unwrap_or(record.spawned_at) < cutoff
        };

        let mut candidates = BTreeSet::new();
        for record in self.files.list(&JobQuery::default())? {
            if expired(&record) {
                candidates.insert((record.provider, record.job_id));
            }
        }
        if let Some(database) = &self.database {
            match database.list(&JobQuery::default()) {
                Ok(rows) => {
                    for row in &rows {
                        // Rows whose status file still exists follow the file.
                        if expired(row)
                            && self.files.get_at(row.provider, &row.slug, &row.job_id)?.is_none()
                        {
                            candidates.insert((row.provider, row.job_id.clone()));
                        }
                    }
                }
                Err(err) => tracing::warn!(error = %err, "job database cleanup scan failed"),
            }
        }

        let mut deleted = 0;
        for (provider, job_id) in candidates {
            if self.delete(provider, &job_id)? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            tracing::info!(deleted, "removed expired job records");
        }
        Ok(deleted)
    }
}
