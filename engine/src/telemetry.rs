//! Tracing subscriber setup
//!
//! The engine only emits `tracing` events; installing a subscriber is left to
//! the embedding application. These helpers cover the common cases.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter_for(log_level: &str) -> EnvFilter {
    let default_filter = format!("{},relay_engine={}", log_level, log_level);
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install a global subscriber at `log_level`.
///
/// `RUST_LOG` wins over `log_level`. Debug builds print pretty terminal
/// output; release builds emit JSON lines with the current span attached.
/// Calling this more than once is a no-op.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = filter_for(log_level);

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

/// Install a global subscriber at `info`.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}

/// Subscriber routed through the test harness's captured output
pub fn init_test_telemetry() {
    tracing_subscriber::registry()
        .with(filter_for("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test_telemetry();
        init_telemetry();
        init_telemetry_with_level("warn");
        tracing::info!(target: "relay_engine", "still logging");
    }
}
