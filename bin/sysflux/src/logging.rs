use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer as _,
};

const LOG_LEVEL_ENV_VAR: &str = "SYSFLUX_LOG_LEVEL";
const LOG_FORMAT_JSON_ENV_VAR: &str = "SYSFLUX_LOG_FORMAT_JSON";

/// Initializes the logging subsystem for `tracing`.
///
/// This function reads the `SYSFLUX_LOG_LEVEL` environment variable to determine the log level to use. If the
/// environment variable is not set, the default log level is `INFO`. Additionally, it reads the
/// `SYSFLUX_LOG_FORMAT_JSON` environment variable to determine which output format to use. If it is set to `true` or
/// `1`, the logs will be formatted as JSON. Otherwise, the logs default to a compact, human-readable format.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging() -> Result<(), anyhow::Error> {
    let is_json = std::env::var(LOG_FORMAT_JSON_ENV_VAR)
        .map(|s| s.trim().to_lowercase())
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false);

    let level_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_LEVEL_ENV_VAR)
        .from_env_lossy();

    let fmt_layer = if is_json {
        tracing_subscriber::fmt::Layer::new()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::Layer::new()
            .compact()
            .with_ansi(true)
            .with_target(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(level_filter))
        .try_init()?;

    Ok(())
}
