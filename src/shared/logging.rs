use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "JOBRELAY_LOG";

/// Installs the stderr subscriber. Stdout carries the tool protocol, so
/// diagnostics must never go there.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
