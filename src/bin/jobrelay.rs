use jobrelay::orchestrator::JobOrchestrator;
use jobrelay::provider::ProviderKind;
use jobrelay::shared::logging::init_tracing;
use jobrelay::tools::{ToolResponse, ToolServer};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};

#[derive(Debug, Deserialize)]
struct ToolCall {
    #[serde(default)]
    id: Value,
    tool: String,
    #[serde(default)]
    arguments: Value,
}

fn usage() -> String {
    format!(
        "usage: jobrelay <{}>\nreads one JSON tool call per stdin line: {{\"id\": 1, \"tool\": \"list_jobs\", \"arguments\": {{}}}}",
        ProviderKind::ALL.map(|provider| provider.as_str()).join("|")
    )
}

fn run() -> Result<(), String> {
    init_tracing();
    let mut args = std::env::args().skip(1);
    let provider = match args.next() {
        Some(raw) => ProviderKind::parse(&raw)?,
        None => return Err(usage()),
    };
    let cwd = std::env::current_dir().map_err(|err| format!("failed to read current dir: {err}"))?;
    let orchestrator = JobOrchestrator::load(&cwd, std::env::vars())
        .map_err(|err| format!("[{}] {err}\nremediation: {}", err.token(), err.remediation()))?;
    match orchestrator.cleanup_expired() {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, "expired jobs cleaned up"),
        Err(err) => tracing::warn!(error = %err, "expired job cleanup failed"),
    }
    let server = ToolServer::new(provider, orchestrator);
    tracing::info!(tools = ?server.tool_names(), "jobrelay serving on stdin");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| format!("failed to read stdin: {err}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<ToolCall>(&line) {
            Ok(call) => {
                let response = server.call(&call.tool, call.arguments);
                json!({ "id": call.id, "isError": response.is_error, "text": response.text })
            }
            Err(err) => {
                let response = ToolResponse::error(
                    "INVALID_REQUEST",
                    &format!("malformed tool call: {err}"),
                    "send one JSON object per line with `tool` and `arguments`",
                );
                json!({ "id": Value::Null, "isError": response.is_error, "text": response.text })
            }
        };
        writeln!(stdout, "{reply}").map_err(|err| format!("failed to write stdout: {err}"))?;
        stdout
            .flush()
            .map_err(|err| format!("failed to flush stdout: {err}"))?;
    }
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
