use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a stderr subscriber. `RUST_LOG` takes precedence over `level`;
/// an empty `level` means `info`.
///
/// Returns false when a global subscriber was already set.
pub fn init_logging(level: &str) -> bool {
    let level = if level.trim().is_empty() { "info" } else { level.trim() };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .is_ok()
}
