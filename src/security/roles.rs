use crate::security::ValidationError;

pub const KNOWN_ROLES: &[&str] = &[
    "architect",
    "planner",
    "critic",
    "analyst",
    "code-reviewer",
    "security-reviewer",
    "designer",
    "writer",
    "debugger",
    "test-engineer",
    "researcher",
    "vision",
];

const MAX_ROLE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRole {
    pub name: String,
    pub known: bool,
}

impl AgentRole {
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Perspective line placed ahead of the caller's prompt.
    pub fn preamble(&self) -> String {
        let focus = match self.name.as_str() {
            "architect" => "system design, module boundaries, and long-term maintainability",
            "planner" => "sequencing work into concrete, verifiable steps",
            "critic" => "finding gaps, risks, and unstated assumptions",
            "analyst" => "clarifying requirements and surfacing hidden constraints",
            "code-reviewer" => "correctness, readability, and regressions in code changes",
            "security-reviewer" => "vulnerabilities, trust boundaries, and unsafe input handling",
            "designer" => "user experience and interface consistency",
            "writer" => "clear, accurate technical documentation",
            "debugger" => "root-causing failures from evidence",
            "test-engineer" => "test strategy, coverage gaps, and flaky behavior",
            "researcher" => "gathering and comparing external facts",
            "vision" => "interpreting images and visual material",
            _ => "the task as described",
        };
        format!(
            "You are acting as the `{}` perspective. Focus on {focus}.",
            self.name
        )
    }
}

pub fn validate_agent_role(raw: &str) -> Result<AgentRole, ValidationError> {
    let name = raw.trim();
    let invalid = |reason: &str| ValidationError::InvalidRole {
        role: raw.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("role must be non-empty"));
    }
    if KNOWN_ROLES.contains(&name) {
        return Ok(AgentRole {
            name: name.to_string(),
            known: true,
        });
    }
    if name.len() > MAX_ROLE_LEN {
        return Err(invalid("role must be at most 64 characters"));
    }
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|ch| ch.is_ascii_lowercase());
    let rest_valid =
        chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_');
    if !starts_with_letter || !rest_valid {
        return Err(invalid(
            "role must start with a lowercase letter and use only lowercase letters, digits, '-' or '_'",
        ));
    }
    Ok(AgentRole {
        name: name.to_string(),
        known: false,
    })
}
