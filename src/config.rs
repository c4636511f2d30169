pub mod env;
pub mod error;
pub mod settings;

pub use env::{
    apply_env_overrides, parse_bool_flag, ALLOW_EXTERNAL_PROMPTS_ENV, ALLOW_EXTERNAL_WORKDIR_ENV,
    ENV_PREFIX,
};
pub use error::ConfigError;
pub use settings::{
    clamp_timeout, ProviderSettings, Settings, SettingsFile, DEFAULT_FALLBACK_BUDGET,
    DEFAULT_RETENTION, MAX_PROVIDER_TIMEOUT, MIN_PROVIDER_TIMEOUT,
};
