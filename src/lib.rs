pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod server;
pub mod service;
pub mod signals;
pub mod store;
pub mod telemetry;

use telemetry::Telemetry;

/// Crates whose debug output is transport noise
const QUIET_TARGETS: &[&str] = &[
    "hyper",
    "hyper_util",
    "h2",
    "reqwest",
    "tower",
    "tower_http",
    "opentelemetry_sdk",
    "opentelemetry_otlp",
];

/// Build `EnvFilter` directives from `LOG_LEVEL`.
///
/// A bare level applies to everything except the transport crates, which are
/// capped at `info`. Anything containing `=` or `,` is taken verbatim.
pub fn log_directives(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }

    let level = if level.is_empty() { "debug" } else { level };
    let mut directives = level.to_string();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{target}=info"));
    }
    directives
}

/// Initialize tracing/logging with the provider's correlated JSON layer
///
/// Note: This function can only be called once per process.
pub fn init_tracing(telemetry: &Telemetry, level: &str) {
    if let Err(e) = telemetry.install_logger(&log_directives(level)) {
        eprintln!("Warning: Failed to install JSON logger: {}", e);
    }
}
