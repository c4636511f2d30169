pub mod ask;
pub(crate) mod background;
pub mod control;
pub mod error;
pub mod prompt;

pub use ask::{AskOutcome, AskRequest, BackgroundTicket, ForegroundResult};
pub use control::{
    ControlError, JobControl, JobSnapshot, KillOutcome, PollSchedule, ReassertPolicy,
    StatusFilter, WaitOutcome,
};
pub use error::OrchestratorError;
pub use prompt::{assemble_prompt, load_context_file, ContextFile, MAX_CONTEXT_FILE_BYTES};

use crate::config::{apply_env_overrides, Settings};
use crate::jobs::{JobPaths, JobStore, SpawnedPidRegistry};
use crate::provider::{CliDetector, SignalSender, SystemSignaler};
use crate::security::resolve_workspace_root;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One orchestrator instance bound to the workspace enclosing `base_dir`.
///
/// The PID registry and CLI cache live here rather than in globals, so two
/// instances in one process never see each other's children.
pub struct JobOrchestrator {
    settings: Settings,
    base_dir: PathBuf,
    workspace_root: PathBuf,
    store: Arc<JobStore>,
    registry: Arc<SpawnedPidRegistry>,
    detector: CliDetector,
    signaler: Arc<dyn SignalSender>,
    control: JobControl,
}

impl JobOrchestrator {
    pub fn open(settings: Settings, base_dir: &Path) -> Result<Self, OrchestratorError> {
        settings.validate()?;
        let base_dir = std::fs::canonicalize(base_dir)
            .map_err(|source| error::io_error(base_dir, source))?;
        let workspace_root =
            resolve_workspace_root(&base_dir).map_err(|source| error::io_error(&base_dir, source))?;
        let store = Arc::new(JobStore::open(&workspace_root)?);
        let registry = Arc::new(SpawnedPidRegistry::new());
        let signaler: Arc<dyn SignalSender> = Arc::new(SystemSignaler);
        let control = JobControl::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&signaler),
        );
        settings.warn_on_escape_toggles();
        tracing::info!(
            workspace = %workspace_root.display(),
            database = store.has_database(),
            "job orchestrator ready"
        );
        Ok(Self {
            settings,
            base_dir,
            workspace_root,
            store,
            registry,
            detector: CliDetector::new(),
            signaler,
            control,
        })
    }

    /// Reads `<workspace>/.jobrelay/config.yaml` and applies `JOBRELAY_*`
    /// overrides from `vars` before opening.
    pub fn load<I>(base_dir: &Path, vars: I) -> Result<Self, OrchestratorError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let workspace_root =
            resolve_workspace_root(base_dir).map_err(|source| error::io_error(base_dir, source))?;
        let mut settings = Settings::from_path(&JobPaths::new(&workspace_root).config_path())?;
        apply_env_overrides(&mut settings, vars)?;
        Self::open(settings, base_dir)
    }

    /// Swaps the signal primitive; the control API is rebuilt around it.
    pub fn with_signaler(mut self, signaler: Arc<dyn SignalSender>) -> Self {
        self.control = JobControl::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&signaler),
        );
        self.signaler = signaler;
        self
    }

    pub fn with_control(mut self, configure: impl FnOnce(JobControl) -> JobControl) -> Self {
        let control = JobControl::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.signaler),
        );
        self.control = configure(control);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SpawnedPidRegistry> {
        &self.registry
    }

    pub fn control(&self) -> &JobControl {
        &self.control
    }

    /// Removes terminal jobs older than the configured retention window.
    pub fn cleanup_expired(&self) -> Result<usize, OrchestratorError> {
        Ok(self.store.cleanup_older_than(self.settings.retention)?)
    }
}
