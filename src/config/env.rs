use super::settings::clamp_timeout;
use super::{ConfigError, Settings};
use crate::provider::ProviderKind;
use std::time::Duration;

pub const ENV_PREFIX: &str = "JOBRELAY_";
pub const ALLOW_EXTERNAL_WORKDIR_ENV: &str = "JOBRELAY_ALLOW_EXTERNAL_WORKDIR";
pub const ALLOW_EXTERNAL_PROMPTS_ENV: &str = "JOBRELAY_ALLOW_EXTERNAL_PROMPTS";

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn model_var(provider: ProviderKind) -> String {
    format!("{ENV_PREFIX}{}_MODEL", provider.as_str().to_ascii_uppercase())
}

fn timeout_var(provider: ProviderKind) -> String {
    format!(
        "{ENV_PREFIX}{}_TIMEOUT_MS",
        provider.as_str().to_ascii_uppercase()
    )
}

/// Applies `JOBRELAY_*` overrides from `vars`. Callers pass
/// `std::env::vars()` in production and a fixed list in tests.
pub fn apply_env_overrides<I>(settings: &mut Settings, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, value) in vars {
        if !name.starts_with(ENV_PREFIX) {
            continue;
        }
        let invalid = |reason: &str| ConfigError::Env {
            name: name.clone(),
            value: value.clone(),
            reason: reason.to_string(),
        };

        if name == ALLOW_EXTERNAL_WORKDIR_ENV {
            settings.allow_external_working_directory =
                parse_bool_flag(&value).ok_or_else(|| invalid("expected a boolean flag"))?;
            continue;
        }
        if name == ALLOW_EXTERNAL_PROMPTS_ENV {
            settings.allow_external_prompt_files =
                parse_bool_flag(&value).ok_or_else(|| invalid("expected a boolean flag"))?;
            continue;
        }

        for provider in ProviderKind::ALL {
            if name == model_var(provider) {
                let model = value.trim();
                if model.is_empty() {
                    return Err(invalid("model must be non-empty"));
                }
                settings.provider_mut(provider).default_model = model.to_string();
            } else if name == timeout_var(provider) {
                let millis: u64 = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("expected a number of milliseconds"))?;
                settings.provider_mut(provider).timeout =
                    clamp_timeout(Duration::from_millis(millis));
            }
        }
    }
    Ok(())
}
