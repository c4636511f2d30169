use crate::orchestrator::{
    AskOutcome, AskRequest, JobOrchestrator, KillOutcome, OrchestratorError, StatusFilter,
    WaitOutcome,
};
use crate::provider::ProviderKind;
use crate::security::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30 * 60 * 1000;
pub const JOB_TOOLS: [&str; 4] = ["wait_for_job", "check_job_status", "kill_job", "list_jobs"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(rename = "isError")]
    pub is_error: bool,
    pub text: String,
}

impl ToolResponse {
    pub fn ok(text: String) -> Self {
        Self {
            is_error: false,
            text,
        }
    }

    pub fn error(token: &str, message: &str, remediation: &str) -> Self {
        Self {
            is_error: true,
            text: format!("[{token}] {message}\nremediation: {remediation}"),
        }
    }

    fn json(value: &impl Serialize) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(text) => Self::ok(text),
            Err(err) => Self::error("INTERNAL_ERROR", &err.to_string(), "retry the call"),
        }
    }
}

impl From<OrchestratorError> for ToolResponse {
    fn from(err: OrchestratorError) -> Self {
        Self::error(err.token(), &err.to_string(), &err.remediation())
    }
}

#[derive(Debug, Deserialize)]
struct JobIdArgs {
    #[serde(default)]
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct WaitArgs {
    #[serde(default)]
    job_id: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct KillArgs {
    #[serde(default)]
    job_id: String,
    #[serde(default)]
    signal: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListArgs {
    status_filter: Option<String>,
    limit: Option<usize>,
}

/// Provider-scoped tool surface: `ask_<provider>` plus the four job tools.
pub struct ToolServer {
    provider: ProviderKind,
    orchestrator: JobOrchestrator,
}

impl ToolServer {
    pub fn new(provider: ProviderKind, orchestrator: JobOrchestrator) -> Self {
        Self {
            provider,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    pub fn ask_tool_name(&self) -> String {
        format!("ask_{}", self.provider)
    }

    pub fn tool_names(&self) -> Vec<String> {
        std::iter::once(self.ask_tool_name())
            .chain(JOB_TOOLS.iter().map(|name| name.to_string()))
            .collect()
    }

    pub fn call(&self, tool: &str, arguments: Value) -> ToolResponse {
        let result = if tool == self.ask_tool_name() {
            self.ask(arguments)
        } else {
            match tool {
                "wait_for_job" => self.wait_for_job(arguments),
                "check_job_status" => self.check_job_status(arguments),
                "kill_job" => self.kill_job(arguments),
                "list_jobs" => self.list_jobs(arguments),
                other => {
                    return ToolResponse::error(
                        "UNKNOWN_TOOL",
                        &format!("unknown tool `{other}`"),
                        &format!("use one of: {}", self.tool_names().join(", ")),
                    )
                }
            }
        };
        result.unwrap_or_else(ToolResponse::from)
    }

    fn ask(&self, arguments: Value) -> Result<ToolResponse, OrchestratorError> {
        let request: AskRequest = parse_args(arguments)?;
        let response = match self.orchestrator.ask(self.provider, &request)? {
            AskOutcome::Completed(result) => ToolResponse::json(&json!({
                "status": "completed",
                "message": format!("response written to {}", result.output_file.display()),
                "result": result,
            })),
            AskOutcome::Spawned(ticket) => ToolResponse::json(&json!({
                "status": "spawned",
                "message": format!(
                    "job {} running in background; poll with wait_for_job or check_job_status",
                    ticket.job_id
                ),
                "job": ticket,
            })),
        };
        Ok(response)
    }

    fn wait_for_job(&self, arguments: Value) -> Result<ToolResponse, OrchestratorError> {
        let args: WaitArgs = parse_args(arguments)?;
        let timeout = Duration::from_millis(args.timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS));
        let outcome = self
            .orchestrator
            .control()
            .wait_for_job(self.provider, args.job_id.trim(), timeout)?;
        Ok(match outcome {
            WaitOutcome::Finished(snapshot) => ToolResponse::json(&json!({
                "waitResult": "finished",
                "job": snapshot,
            })),
            WaitOutcome::TimedOut(snapshot) => ToolResponse::json(&json!({
                "waitResult": "timeout",
                "message": format!(
                    "job is still {} after {}ms; call wait_for_job again or check_job_status later",
                    snapshot.record.status,
                    timeout.as_millis()
                ),
                "job": snapshot,
            })),
        })
    }

    fn check_job_status(&self, arguments: Value) -> Result<ToolResponse, OrchestratorError> {
        let args: JobIdArgs = parse_args(arguments)?;
        let snapshot = self
            .orchestrator
            .control()
            .check_job_status(self.provider, args.job_id.trim())?;
        Ok(ToolResponse::json(&snapshot))
    }

    fn kill_job(&self, arguments: Value) -> Result<ToolResponse, OrchestratorError> {
        let args: KillArgs = parse_args(arguments)?;
        let outcome = self.orchestrator.control().kill_job(
            self.provider,
            args.job_id.trim(),
            args.signal.as_deref(),
        )?;
        Ok(match outcome {
            KillOutcome::Killed {
                record,
                signal,
                delivered,
            } => ToolResponse::json(&json!({
                "killResult": "killed",
                "signal": signal,
                "signalDelivered": delivered,
                "job": record,
            })),
            KillOutcome::AlreadyKilled(record) => ToolResponse::json(&json!({
                "killResult": "already_killed",
                "message": "job was already killed; no signal sent",
                "job": record,
            })),
        })
    }

    fn list_jobs(&self, arguments: Value) -> Result<ToolResponse, OrchestratorError> {
        let args: ListArgs = parse_args(arguments)?;
        let filter = StatusFilter::parse(args.status_filter.as_deref().unwrap_or_default())?;
        let jobs = self
            .orchestrator
            .control()
            .list_jobs(Some(self.provider), filter, args.limit)?;
        Ok(ToolResponse::json(&json!({
            "count": jobs.len(),
            "jobs": jobs,
        })))
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ValidationError> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|err| ValidationError::InvalidArgument {
        name: "arguments".to_string(),
        reason: err.to_string(),
    })
}
