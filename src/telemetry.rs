//! Telemetry initialization.
//!
//! Braid emits structured `tracing` events throughout the merge engine; the
//! embedding host decides whether and how they are rendered. This module
//! offers the two bootstrap flavors hosts actually use:
//!
//! - [`init`] — human-readable output to stderr, filtered by `BRAID_LOG`
//!   (falling back to `RUST_LOG`, then `"info"`).
//! - [`init_json`] — JSON events to stderr for log-shipping hosts.
//!
//! Both are idempotent-by-convention: call once from the host's entry point.
//! Library code never installs a subscriber on its own.

use tracing_subscriber::EnvFilter;

/// Build the env filter from `BRAID_LOG`, then `RUST_LOG`, then `"info"`.
fn env_filter() -> EnvFilter {
    std::env::var("BRAID_LOG").map_or_else(
        |_| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        EnvFilter::new,
    )
}

/// Initialize human-readable tracing output to stderr.
///
/// Returns `false` if a global subscriber was already installed (the call is
/// then a no-op), `true` otherwise.
pub fn init() -> bool {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// Initialize JSON tracing output to stderr.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_json() -> bool {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_safe_to_call_twice() {
        // Whichever call wins the race to install, the second must not panic.
        let _ = init();
        assert!(!init_json() || !init());
    }
}
