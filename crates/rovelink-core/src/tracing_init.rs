//! Shared tracing/logging initialization.
//!
//! The console and any embedding application use the same pattern for
//! setting up `tracing_subscriber` with an env-filter and optional JSON output.
//! Log lines always go to stderr so stdout stays free for operator output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"rovelink=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Build the default filter directive for a crate at a given level.
///
/// Covers the crate itself plus the shared rovelink libraries so that
/// `--log-level debug` also surfaces session state transitions.
pub fn default_filter(crate_name: &str, level: &str) -> String {
    format!("{crate_name}={level},rovelink_session={level},rovelink_core={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_shared_crates() {
        let filter = default_filter("rovelink_cli", "debug");
        assert_eq!(
            filter,
            "rovelink_cli=debug,rovelink_session=debug,rovelink_core=debug"
        );
    }
}
