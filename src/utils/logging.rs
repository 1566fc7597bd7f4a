//! Tracing initialization shared by the binary and the tests.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the application.
///
/// `RUST_LOG` wins over `default_level` when it is set. Uses `try_init` so
/// tests and libraries can call this multiple times without panicking.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(default_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn normalize_level(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_init_accepts_levels() {
        init("info");
        init("debug");
        init("warn");
    }

    #[test]
    fn test_unknown_levels_fall_back_to_info() {
        assert_eq!(normalize_level("WARNING"), "warn");
        assert_eq!(normalize_level("verbose"), "info");
    }
}
