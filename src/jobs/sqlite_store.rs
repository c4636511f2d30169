use super::{JobBackend, JobQuery, JobRecord, JobStoreError};
use crate::provider::ProviderKind;
use crate::shared::time::to_rfc3339;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Query accelerator over the status files. Rows are scoped by a workspace
/// key so a database reached from two roots never mixes their jobs.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    db_path: PathBuf,
    workspace_key: String,
}

impl SqliteJobStore {
    pub fn open(db_path: &Path, workspace_key: &str) -> Result<Self, JobStoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| JobStoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
            workspace_key: workspace_key.to_string(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_schema(&self) -> Result<(), JobStoreError> {
        let connection = self.connect()?;
        connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS jobs (
                    workspace_key TEXT NOT NULL,
                    provider TEXT NOT NULL,
                    job_id TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    status TEXT NOT NULL,
                    pid INTEGER,
                    model TEXT NOT NULL,
                    agent_role TEXT NOT NULL,
                    spawned_at TEXT NOT NULL,
                    completed_at TEXT,
                    killed_by_user INTEGER NOT NULL DEFAULT 0,
                    payload TEXT NOT NULL,
                    PRIMARY KEY (workspace_key, provider, job_id)
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_status_spawned
                    ON jobs(workspace_key, status, spawned_at DESC);
                ",
            )
            .map_err(|source| JobStoreError::Sql { source })
    }

    pub fn count(&self) -> Result<u64, JobStoreError> {
        let connection = self.connect()?;
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE workspace_key = ?1",
                params![self.workspace_key],
                |row| row.get(0),
            )
            .map_err(|source| JobStoreError::Sql { source })?;
        Ok(count as u64)
    }

    fn connect(&self) -> Result<Connection, JobStoreError> {
        let connection = Connection::open(&self.db_path).map_err(|source| JobStoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })?;
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(|source| JobStoreError::Sql { source })?;
        connection
            .execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|source| JobStoreError::Sql { source })?;
        Ok(connection)
    }
}

fn decode_payload(payload: &str) -> Result<JobRecord, JobStoreError> {
    serde_json::from_str(payload).map_err(|source| JobStoreError::Decode {
        path: "jobs.payload".to_string(),
        source,
    })
}

impl JobBackend for SqliteJobStore {
    fn put(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let payload = serde_json::to_string(record).map_err(|source| JobStoreError::Encode {
            job_id: record.job_id.clone(),
            source,
        })?;
        let connection = self.connect()?;
        connection
            .execute(
                "
                INSERT INTO jobs (
                    workspace_key, provider, job_id, slug, status, pid, model,
                    agent_role, spawned_at, completed_at, killed_by_user, payload
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(workspace_key, provider, job_id) DO UPDATE SET
                    slug = excluded.slug,
                    status = excluded.status,
                    pid = excluded.pid,
                    model = excluded.model,
                    agent_role = excluded.agent_role,
                    spawned_at = excluded.spawned_at,
                    completed_at = excluded.completed_at,
                    killed_by_user = excluded.killed_by_user,
                    payload = excluded.payload
                ",
                params![
                    self.workspace_key,
                    record.provider.as_str(),
                    record.job_id,
                    record.slug,
                    record.status.as_str(),
                    record.pid,
                    record.model,
                    record.agent_role,
                    to_rfc3339(&record.spawned_at),
                    record.completed_at.as_ref().map(to_rfc3339),
                    record.killed_by_user,
                    payload,
                ],
            )
            .map_err(|source| JobStoreError::Sql { source })?;
        Ok(())
    }

    fn get(&self, provider: ProviderKind, job_id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        let connection = self.connect()?;
        let payload = connection
            .query_row(
                "
                SELECT payload FROM jobs
                WHERE workspace_key = ?1 AND provider = ?2 AND job_id = ?3
                ",
                params![self.workspace_key, provider.as_str(), job_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|source| JobStoreError::Sql { source })?;
        payload.as_deref().map(decode_payload).transpose()
    }

    fn list(&self, query: &JobQuery) -> Result<Vec<JobRecord>, JobStoreError> {
        let mut sql = String::from("SELECT payload FROM jobs WHERE workspace_key = ?");
        let mut values = vec![self.workspace_key.clone()];
        if let Some(provider) = query.provider {
            sql.push_str(" AND provider = ?");
            values.push(provider.as_str().to_string());
        }
        if let Some(statuses) = &query.statuses {
            if statuses.is_empty() {
                return Ok(Vec::new());
            }
            let marks = vec!["?"; statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({marks})"));
            values.extend(statuses.iter().map(|s| s.as_str().to_string()));
        }
        sql.push_str(" ORDER BY spawned_at DESC, job_id DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let connection = self.connect()?;
        let mut statement = connection
            .prepare(&sql)
            .map_err(|source| JobStoreError::Sql { source })?;
        let rows = statement
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))
            .map_err(|source| JobStoreError::Sql { source })?;

        let mut out = Vec::new();
        for row in rows {
            let payload = row.map_err(|source| JobStoreError::Sql { source })?;
            out.push(decode_payload(&payload)?);
        }
        Ok(out)
    }

    fn remove(&self, provider: ProviderKind, job_id: &str) -> Result<bool, JobStoreError> {
        let connection = self.connect()?;
        let changed = connection
            .execute(
                "DELETE FROM jobs WHERE workspace_key = ?1 AND provider = ?2 AND job_id = ?3",
                params![self.workspace_key, provider.as_str(), job_id],
            )
            .map_err(|source| JobStoreError::Sql { source })?;
        Ok(changed > 0)
    }
}
