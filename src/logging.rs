//! Tracing subscriber setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LogSection;

/// Pick the filter directive: `RUST_LOG` when it parses, else the configured one.
pub fn build_filter(rust_log: Option<&str>, fallback: &str) -> EnvFilter {
    rust_log
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .or_else(|| EnvFilter::try_new(fallback).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global subscriber, writing to stderr so command output on
/// stdout stays clean. Later calls are ignored.
pub fn init(log: &LogSection) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(rust_log.as_deref(), &log.filter);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if log.json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
