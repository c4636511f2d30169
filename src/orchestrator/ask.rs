use super::background::{launch, BackgroundJob};
use super::error::io_error;
use super::prompt::{assemble_prompt, load_context_file, read_prompt_file};
use super::{JobOrchestrator, OrchestratorError};
use crate::jobs::{write_audit_artifact, AuditHeader, AuditKind, JobRecord, JobStatus};
use crate::provider::{
    execute_with_fallback, plan_models, run_attempt, AttemptConfig, FallbackCursor, ProviderKind,
};
use crate::security::{
    resolve_workspace_root, validate_agent_role, PathKind, PathPolicy, PathValidator,
    ValidationError,
};
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::ids::{allocate_job_id_with_retry, slugify};
use crate::shared::time::now_utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const JOB_ID_ATTEMPTS: usize = 16;

/// Arguments of `ask_<provider>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AskRequest {
    pub agent_role: String,
    pub prompt_file: String,
    pub output_file: String,
    pub context_files: Vec<String>,
    pub model: Option<String>,
    pub background: bool,
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundResult {
    pub provider: ProviderKind,
    pub job_id: String,
    pub agent_role: String,
    pub model: String,
    pub used_fallback: bool,
    pub attempted_models: Vec<String>,
    pub prompt_file: PathBuf,
    pub response_file: PathBuf,
    pub output_file: PathBuf,
    pub response_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundTicket {
    pub provider: ProviderKind,
    pub job_id: String,
    pub agent_role: String,
    pub status: JobStatus,
    pub model: String,
    pub prompt_file: PathBuf,
    pub response_file: PathBuf,
    pub status_file: PathBuf,
    pub output_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    Completed(ForegroundResult),
    Spawned(BackgroundTicket),
}

struct ResolvedPaths {
    working_directory: PathBuf,
    prompt_file: PathBuf,
    context_files: Vec<PathBuf>,
    output_file: PathBuf,
}

fn required<'a>(name: &str, value: &'a str) -> Result<&'a str, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::MissingArgument {
            name: name.to_string(),
        });
    }
    Ok(value)
}

impl JobOrchestrator {
    fn resolve_paths(&self, request: &AskRequest) -> Result<ResolvedPaths, ValidationError> {
        let prompt_file = required("prompt_file", &request.prompt_file)?;
        let output_file = required("output_file", &request.output_file)?;

        let workdir_validator = PathValidator::new(
            self.workspace_root(),
            PathPolicy::from_allow_external(self.settings().allow_external_working_directory),
        )?;
        let working_directory = match request
            .working_directory
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
        {
            Some(dir) => workdir_validator.validate_existing_dir(
                PathKind::WorkingDirectory,
                Path::new(dir),
                self.base_dir(),
            )?,
            None => self.base_dir().to_path_buf(),
        };

        let prompt_validator = PathValidator::new(
            &working_directory,
            PathPolicy::from_allow_external(self.settings().allow_external_prompt_files),
        )?;
        let prompt_file = prompt_validator.validate_existing_file(
            PathKind::PromptFile,
            Path::new(prompt_file),
            &working_directory,
        )?;
        let context_files = request
            .context_files
            .iter()
            .map(|path| {
                prompt_validator.validate_existing_file(
                    PathKind::ContextFile,
                    Path::new(required("context_files[]", path)?),
                    &working_directory,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Outputs never leave the workspace, whatever the escape toggles say.
        let output_root = resolve_workspace_root(&working_directory).map_err(|err| {
            ValidationError::PathUnavailable {
                kind: PathKind::WorkingDirectory,
                requested: working_directory.display().to_string(),
                reason: err.to_string(),
            }
        })?;
        let output_validator = PathValidator::new(&output_root, PathPolicy::WorkspaceOnly)?;
        let output_file =
            output_validator.validate(PathKind::OutputFile, Path::new(output_file), &working_directory)?;
        if output_file.is_dir() {
            return Err(ValidationError::PathUnavailable {
                kind: PathKind::OutputFile,
                requested: request.output_file.clone(),
                reason: "output path is a directory".to_string(),
            });
        }

        Ok(ResolvedPaths {
            working_directory,
            prompt_file,
            context_files,
            output_file,
        })
    }

    /// Runs `ask_<provider>`: validates everything up front, writes the
    /// prompt artifact, then either blocks on the fallback walk or hands the
    /// job to the background callback chain.
    pub fn ask(
        &self,
        provider: ProviderKind,
        request: &AskRequest,
    ) -> Result<AskOutcome, OrchestratorError> {
        let role = validate_agent_role(&request.agent_role)?;
        let paths = self.resolve_paths(request)?;
        let user_prompt = read_prompt_file(&paths.prompt_file)?;
        let context_files = paths
            .context_files
            .iter()
            .map(|path| load_context_file(path))
            .collect::<Result<Vec<_>, _>>()?;

        let provider_settings = self.settings().provider(provider);
        let availability = self
            .detector
            .detect(provider, &provider_settings.binary, false);
        if !availability.available {
            return Err(OrchestratorError::CliUnavailable {
                provider,
                binary: provider_settings.binary.clone(),
                reason: availability
                    .error
                    .unwrap_or_else(|| "executable not found".to_string()),
                install_hint: availability.install_hint,
            });
        }

        let full_prompt = assemble_prompt(&role, &context_files, &user_prompt);
        let slug = slugify(&user_prompt);
        let job_paths = self.store().paths().clone();
        let job_id = allocate_job_id_with_retry(JOB_ID_ATTEMPTS, |candidate| {
            job_paths.prompt_file(provider, &slug, candidate).exists()
                || matches!(self.store().contains_job_id(candidate), Ok(true))
        })
        .map_err(OrchestratorError::JobId)?;

        let plan = plan_models(
            provider,
            request.model.as_deref(),
            &provider_settings.default_model,
            &provider_settings.fallback_chain,
        );
        let requested_model = plan.models.first().cloned().unwrap_or_default();

        let prompt_artifact = job_paths.prompt_file(provider, &slug, &job_id);
        let response_artifact = job_paths.response_file(provider, &slug, &job_id);
        let prompt_header = AuditHeader {
            kind: AuditKind::Prompt,
            provider,
            agent_role: role.name.clone(),
            model: requested_model.clone(),
            job_id: job_id.clone(),
            timestamp: now_utc(),
            used_fallback: false,
            fallback_model: None,
        };
        write_audit_artifact(&prompt_artifact, &prompt_header, &full_prompt)
            .map_err(|source| io_error(&prompt_artifact, source))?;

        let config = AttemptConfig {
            provider,
            binary: provider_settings.binary.clone(),
            cwd: paths.working_directory.clone(),
            timeout: provider_settings.timeout,
            output_cap_bytes: self.settings().output_cap_bytes,
        };

        if request.background {
            let spawned = JobRecord {
                provider,
                job_id: job_id.clone(),
                slug: slug.clone(),
                status: JobStatus::Spawned,
                pid: None,
                prompt_file: prompt_artifact.clone(),
                response_file: response_artifact.clone(),
                model: requested_model.clone(),
                agent_role: role.name.clone(),
                spawned_at: now_utc(),
                completed_at: None,
                error: None,
                used_fallback: false,
                fallback_model: None,
                killed_by_user: false,
            };
            self.store().write(&spawned)?;
            tracing::info!(
                provider = %provider,
                job_id = %job_id,
                model = %requested_model,
                "background job spawned"
            );

            let job = Arc::new(BackgroundJob {
                store: Arc::clone(self.store()),
                registry: Arc::clone(self.registry()),
                signaler: Arc::clone(&self.signaler),
                config,
                prompt: full_prompt,
                spawned: spawned.clone(),
                output_file: paths.output_file.clone(),
            });
            launch(job, FallbackCursor::new(plan, self.settings().fallback_budget));

            let status = self
                .store()
                .read(provider, &job_id)
                .ok()
                .flatten()
                .map_or(JobStatus::Spawned, |record| record.status);
            return Ok(AskOutcome::Spawned(BackgroundTicket {
                provider,
                job_id: job_id.clone(),
                agent_role: role.name,
                status,
                model: requested_model,
                prompt_file: prompt_artifact,
                response_file: response_artifact,
                status_file: job_paths.status_file(provider, &slug, &job_id),
                output_file: paths.output_file,
            }));
        }

        let signaler = Arc::clone(&self.signaler);
        let success = execute_with_fallback(plan, self.settings().fallback_budget, |model, remaining| {
            run_attempt(&config, model, &full_prompt, remaining, Arc::clone(&signaler))
        })?;

        let response_header = AuditHeader {
            kind: AuditKind::Response,
            provider,
            agent_role: role.name.clone(),
            model: success.actual_model.clone(),
            job_id: job_id.clone(),
            timestamp: now_utc(),
            used_fallback: success.used_fallback,
            fallback_model: success
                .used_fallback
                .then(|| success.actual_model.clone()),
        };
        write_audit_artifact(&response_artifact, &response_header, &success.response)
            .map_err(|source| io_error(&response_artifact, source))?;
        atomic_write_file(&paths.output_file, success.response.as_bytes())
            .map_err(|source| io_error(&paths.output_file, source))?;
        tracing::info!(
            provider = %provider,
            job_id = %job_id,
            model = %success.actual_model,
            used_fallback = success.used_fallback,
            "foreground ask completed"
        );

        Ok(AskOutcome::Completed(ForegroundResult {
            provider,
            job_id,
            agent_role: role.name,
            model: success.actual_model,
            used_fallback: success.used_fallback,
            attempted_models: success.attempted_models,
            prompt_file: prompt_artifact,
            response_file: response_artifact,
            output_file: paths.output_file,
            response_bytes: success.response.len(),
        }))
    }
}
