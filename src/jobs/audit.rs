use crate::provider::ProviderKind;
use crate::shared::fs_atomic::write_new_file;
use crate::shared::time::to_rfc3339;
use chrono::{DateTime, Utc};
use std::path::Path;

const HEADER_FENCE: &str = "---";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Prompt,
    Response,
}

impl AuditKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Response => "response",
        }
    }
}

/// Metadata written above every prompt and response artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditHeader {
    pub kind: AuditKind,
    pub provider: ProviderKind,
    pub agent_role: String,
    pub model: String,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub used_fallback: bool,
    pub fallback_model: Option<String>,
}

impl AuditHeader {
    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("kind", self.kind.as_str().to_string()),
            ("provider", self.provider.as_str().to_string()),
            ("agent_role", self.agent_role.clone()),
            ("model", self.model.clone()),
            ("job_id", self.job_id.clone()),
            ("timestamp", to_rfc3339(&self.timestamp)),
        ];
        if self.kind == AuditKind::Response {
            fields.push(("used_fallback", self.used_fallback.to_string()));
            if let Some(model) = &self.fallback_model {
                fields.push(("fallback_model", model.clone()));
            }
        }
        fields
    }

    pub fn render(&self) -> String {
        let mut out = String::from(HEADER_FENCE);
        out.push('\n');
        for (key, value) in self.fields() {
            // JSON string quoting keeps values with colons or newlines on one line.
            let quoted = serde_json::Value::String(value).to_string();
            out.push_str(&format!("{key}: {quoted}\n"));
        }
        out.push_str(HEADER_FENCE);
        out.push_str("\n\n");
        out
    }
}

/// Writes header plus body to `path`. Refuses to overwrite an existing
/// artifact.
pub fn write_audit_artifact(path: &Path, header: &AuditHeader, body: &str) -> std::io::Result<()> {
    let mut content = header.render();
    content.push_str(body);
    if !body.ends_with('\n') {
        content.push('\n');
    }
    write_new_file(path, content.as_bytes())
}

/// Returns the artifact body without its metadata header.
pub fn read_artifact_body(path: &Path) -> std::io::Result<String> {
    let raw = std::fs::read_to_string(path)?;
    Ok(strip_header(&raw).to_string())
}

pub fn strip_header(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("---\n") else {
        return raw;
    };
    match rest.find("\n---\n") {
        Some(end) => rest[end + 5..].trim_start_matches('\n'),
        None => raw,
    }
}
