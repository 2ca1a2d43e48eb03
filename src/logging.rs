use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,leadboard_sync=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize tracing with a compact, human-readable stdout layer.
///
/// - Default level: INFO (DEBUG for this crate), override via RUST_LOG env
/// - Safe to call more than once; returns `false` if a global subscriber
///   was already installed by the host application.
pub fn init() -> bool {
    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Tracing initialized");
    }
    installed
}

/// Initialize tracing with newline-delimited JSON output, for hosts that ship
/// logs to a collector instead of a dev console.
pub fn init_json() -> bool {
    let json_layer = fmt::layer()
        .json()
        .with_current_span(false)
        .with_target(true);

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Tracing initialized (json)");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        // Whichever runs first wins; the other must not panic.
        let first = init();
        let second = init_json();
        assert!(!(first && second));
    }
}
