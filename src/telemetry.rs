//! Logging setup: tracing with env-filter, stderr output.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. `SWARM_LOG` overrides the level
/// (defaults to `info`). Safe to call once at process start.
pub fn init() {
    let filter = EnvFilter::try_from_env("SWARM_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
