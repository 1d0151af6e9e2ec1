//! Logging setup for the `ooda` binary
//!
//! One global `tracing` subscriber serves the main thread and every worker.
//! The per-task console summary lines are printed by the runner, not logged,
//! so they stay readable when the log output is JSON.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used when `RUST_LOG` is unset: the agent's own crates
/// log at `log_level`, HTTP internals only at warn.
pub fn default_directive(log_level: &str) -> String {
    format!("warn,ooda_engine={level},ooda={level}", level = log_level)
}

/// Install the subscriber. `RUST_LOG` overrides the configured level.
///
/// Debug builds log pretty text with thread names (workers are named
/// `ooda-worker-N`); release builds log JSON lines with the current span.
/// Calling it twice is harmless.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    #[cfg(debug_assertions)]
    let output = fmt::layer()
        .pretty()
        .with_target(false)
        .with_thread_names(true);

    #[cfg(not(debug_assertions))]
    let output = fmt::layer().json().with_current_span(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(output)
        .try_init()
        .ok();
}
