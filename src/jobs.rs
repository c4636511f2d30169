pub mod audit;
pub mod file_store;
pub mod paths;
pub mod record;
pub mod registry;
pub mod sqlite_store;
pub mod store;

pub use audit::{read_artifact_body, write_audit_artifact, AuditHeader, AuditKind};
pub use file_store::FileJobStore;
pub use paths::{parse_status_file_name, ArtifactKind, JobPaths};
pub use record::{check_successor, JobRecord, JobStatus, TransitionRejected};
pub use registry::SpawnedPidRegistry;
pub use sqlite_store::SqliteJobStore;
pub use store::{JobStore, MigrationReport, WriteOutcome};

use crate::provider::ProviderKind;

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("failed to create job state directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode job record {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to encode job record {job_id}: {source}")]
    Encode {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl JobStoreError {
    pub fn token(&self) -> &'static str {
        "STORE_ERROR"
    }

    pub fn remediation(&self) -> String {
        match self {
            Self::CreateDir { path, .. } | Self::Io { path, .. } => {
                format!("check permissions on `{path}`")
            }
            Self::Decode { path, .. } => {
                format!("inspect or remove the corrupt status file `{path}`")
            }
            Self::Open { .. } | Self::Sql { .. } | Self::Encode { .. } => {
                "retry; job state is kept in per-job status files".to_string()
            }
        }
    }
}

/// Selection shared by both backends. Results are newest-spawned first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    pub provider: Option<ProviderKind>,
    pub statuses: Option<Vec<JobStatus>>,
    pub limit: Option<usize>,
}

impl JobQuery {
    pub fn active(provider: Option<ProviderKind>) -> Self {
        Self {
            provider,
            statuses: Some(JobStatus::ACTIVE.to_vec()),
            limit: None,
        }
    }

    pub fn matches(&self, record: &JobRecord) -> bool {
        if self.provider.is_some_and(|provider| provider != record.provider) {
            return false;
        }
        match &self.statuses {
            Some(statuses) => statuses.contains(&record.status),
            None => true,
        }
    }
}

/// One persistence backend for job records.
pub trait JobBackend {
    fn put(&self, record: &JobRecord) -> Result<(), JobStoreError>;
    fn get(&self, provider: ProviderKind, job_id: &str) -> Result<Option<JobRecord>, JobStoreError>;
    fn list(&self, query: &JobQuery) -> Result<Vec<JobRecord>, JobStoreError>;
    fn remove(&self, provider: ProviderKind, job_id: &str) -> Result<bool, JobStoreError>;
}

pub(crate) fn sort_newest_first(records: &mut [JobRecord]) {
    records.sort_by(|a, b| {
        b.spawned_at
            .cmp(&a.spawned_at)
            .then_with(|| b.job_id.cmp(&a.job_id))
    });
}
