use super::paths::{parse_status_file_name, JobPaths};
use super::{sort_newest_first, JobBackend, JobQuery, JobRecord, JobStoreError};
use crate::provider::ProviderKind;
use crate::shared::fs_atomic::atomic_write_json;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Authoritative backend: one JSON status file per job.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    paths: JobPaths,
}

impl FileJobStore {
    pub fn new(paths: JobPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }

    pub fn ensure_dirs(&self) -> Result<(), JobStoreError> {
        let dir = self.paths.prompts_dir();
        fs::create_dir_all(&dir).map_err(|source| JobStoreError::CreateDir {
            path: dir.display().to_string(),
            source,
        })
    }

    /// Direct read when the slug is already known.
    pub fn get_at(
        &self,
        provider: ProviderKind,
        slug: &str,
        job_id: &str,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        read_record(&self.paths.status_file(provider, slug, job_id))
    }

    /// Every decodable record plus one error per unreadable status file.
    pub fn load_all(&self) -> Result<(Vec<JobRecord>, Vec<JobStoreError>), JobStoreError> {
        let mut records = Vec::new();
        let mut errors = Vec::new();
        for (_, _, _, path) in self.status_files()? {
            match read_record(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => errors.push(err),
            }
        }
        Ok((records, errors))
    }

    pub fn contains_job_id(&self, job_id: &str) -> Result<bool, JobStoreError> {
        Ok(self
            .status_files()?
            .iter()
            .any(|(_, _, id, _)| id == job_id))
    }

    /// `(provider, slug, job_id, path)` for every status file on disk.
    pub fn status_files(
        &self,
    ) -> Result<Vec<(ProviderKind, String, String, PathBuf)>, JobStoreError> {
        let dir = self.paths.prompts_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(JobStoreError::Io {
                    path: dir.display().to_string(),
                    source,
                })
            }
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| JobStoreError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some((provider, slug, job_id)) = parse_status_file_name(name) {
                out.push((provider, slug, job_id, entry.path()));
            }
        }
        Ok(out)
    }

    fn find(&self, provider: ProviderKind, job_id: &str) -> Result<Option<PathBuf>, JobStoreError> {
        Ok(self
            .status_files()?
            .into_iter()
            .find(|(p, _, id, _)| *p == provider && id == job_id)
            .map(|(_, _, _, path)| path))
    }
}

fn read_record(path: &Path) -> Result<Option<JobRecord>, JobStoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(JobStoreError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| JobStoreError::Decode {
            path: path.display().to_string(),
            source,
        })
}

impl JobBackend for FileJobStore {
    fn put(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let path = self
            .paths
            .status_file(record.provider, &record.slug, &record.job_id);
        atomic_write_json(&path, record).map_err(|source| JobStoreError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn get(&self, provider: ProviderKind, job_id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        match self.find(provider, job_id)? {
            Some(path) => read_record(&path),
            None => Ok(None),
        }
    }

    fn list(&self, query: &JobQuery) -> Result<Vec<JobRecord>, JobStoreError> {
        let (records, errors) = self.load_all()?;
        for err in errors {
            tracing::warn!(error = %err, "skipping unreadable job status file");
        }
        let mut records: Vec<JobRecord> =
            records.into_iter().filter(|r| query.matches(r)).collect();
        sort_newest_first(&mut records);
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    fn remove(&self, provider: ProviderKind, job_id: &str) -> Result<bool, JobStoreError> {
        let Some(path) = self.find(provider, job_id)? else {
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(JobStoreError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}
