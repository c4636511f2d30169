use crate::provider::{ExecError, ProviderKind};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPlan {
    pub provider: ProviderKind,
    pub models: Vec<String>,
    pub pinned: bool,
}

/// Rotates `chain` so it starts at `start`, keeping relative order. A chain
/// without `start` gets it prepended.
pub fn rotate_chain(chain: &[String], start: &str) -> Vec<String> {
    match chain.iter().position(|model| model == start) {
        Some(index) => chain[index..]
            .iter()
            .chain(chain[..index].iter())
            .cloned()
            .collect(),
        None => std::iter::once(start.to_string())
            .chain(chain.iter().cloned())
            .collect(),
    }
}

pub fn plan_models(
    provider: ProviderKind,
    requested: Option<&str>,
    default_model: &str,
    chain: &[String],
) -> FallbackPlan {
    if let Some(model) = requested.map(str::trim).filter(|model| !model.is_empty()) {
        return FallbackPlan {
            provider,
            models: vec![model.to_string()],
            pinned: true,
        };
    }
    let mut models = Vec::new();
    for model in rotate_chain(chain, default_model) {
        if !models.contains(&model) {
            models.push(model);
        }
    }
    FallbackPlan {
        provider,
        models,
        pinned: false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackSuccess {
    pub response: String,
    pub used_fallback: bool,
    pub actual_model: String,
    pub attempted_models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} after trying {}: {last_error}", summary(.pinned), .attempted_models.join(", "))]
pub struct FallbackFailure {
    pub attempted_models: Vec<String>,
    pub pinned: bool,
    pub last_error: ExecError,
}

fn summary(pinned: &bool) -> &'static str {
    if *pinned {
        "pinned model failed"
    } else {
        "fallback chain exhausted"
    }
}

/// Walk state shared by the blocking loop and the callback-driven
/// background path. Attempts are strictly sequential.
#[derive(Debug, Clone)]
pub struct FallbackCursor {
    plan: FallbackPlan,
    next_index: usize,
    deadline: Instant,
    attempted: Vec<String>,
    last_error: Option<ExecError>,
}

impl FallbackCursor {
    pub fn new(plan: FallbackPlan, budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            plan,
            next_index: 0,
            deadline: now.checked_add(budget).unwrap_or(now),
            attempted: Vec::new(),
            last_error: None,
        }
    }

    /// Next model with the wall-clock budget left for it, or `None` once the
    /// chain or the budget is spent.
    pub fn next_attempt(&mut self) -> Option<(String, Duration)> {
        let model = self.plan.models.get(self.next_index)?.clone();
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() && !self.attempted.is_empty() {
            return None;
        }
        self.next_index += 1;
        self.attempted.push(model.clone());
        Some((model, remaining))
    }

    /// Records a failed attempt. Returns whether the walk should go on.
    pub fn record_failure(&mut self, error: ExecError) -> bool {
        let proceed = !self.plan.pinned
            && error.is_recoverable()
            && self.next_index < self.plan.models.len()
            && !self.budget_exhausted();
        self.last_error = Some(error);
        proceed
    }

    pub fn budget_exhausted(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn current_model(&self) -> Option<&str> {
        self.attempted.last().map(String::as_str)
    }

    pub fn requested_model(&self) -> Option<&str> {
        self.plan.models.first().map(String::as_str)
    }

    pub fn used_fallback(&self) -> bool {
        self.attempted.len() > 1
    }

    pub fn attempted_models(&self) -> &[String] {
        &self.attempted
    }

    pub fn is_pinned(&self) -> bool {
        self.plan.pinned
    }

    pub fn success(&self, response: String) -> FallbackSuccess {
        FallbackSuccess {
            response,
            used_fallback: self.used_fallback(),
            actual_model: self.current_model().unwrap_or_default().to_string(),
            attempted_models: self.attempted.clone(),
        }
    }

    pub fn failure(&self) -> FallbackFailure {
        let last_error = self.last_error.clone().unwrap_or_else(|| ExecError::Process {
            provider: self.plan.provider,
            model: String::new(),
            exit_code: None,
            message: "no models configured for this provider".to_string(),
        });
        FallbackFailure {
            attempted_models: self.attempted.clone(),
            pinned: self.plan.pinned,
            last_error,
        }
    }
}

/// Blocking walk. `attempt` receives the model and the wall-clock budget
/// remaining for the whole walk.
pub fn execute_with_fallback<F>(
    plan: FallbackPlan,
    budget: Duration,
    mut attempt: F,
) -> Result<FallbackSuccess, FallbackFailure>
where
    F: FnMut(&str, Duration) -> Result<String, ExecError>,
{
    let mut cursor = FallbackCursor::new(plan, budget);
    while let Some((model, remaining)) = cursor.next_attempt() {
        match attempt(&model, remaining) {
            Ok(response) => return Ok(cursor.success(response)),
            Err(err) => {
                let recoverable = err.is_recoverable();
                if !cursor.record_failure(err) {
                    break;
                }
                tracing::warn!(
                    model = %model,
                    recoverable,
                    "provider attempt failed; trying next model"
                );
            }
        }
    }
    Err(cursor.failure())
}
