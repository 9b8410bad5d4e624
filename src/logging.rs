//! Tracing setup.
//!
//! - CLI commands log to stderr, compact, filtered by `SHIPYARD_LOG` (then
//!   `RUST_LOG`), default `warn`.
//! - Workers run detached, so they also log to `logs/<run_id>.log` through a
//!   non-blocking appender, default `info`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn filter(default: &str) -> EnvFilter {
    std::env::var("SHIPYARD_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

pub fn init_cli() {
    let _ = tracing_subscriber::registry()
        .with(filter("warn"))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

/// Keep the returned guard alive for the life of the worker; dropping it
/// flushes the file.
pub fn init_worker(log_dir: &Path, run_id: &str) -> WorkerGuard {
    let appender = tracing_appender::rolling::never(log_dir, format!("{}.log", run_id));
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::registry()
        .with(filter("info"))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let f = filter("info");
        assert!(!f.to_string().is_empty());
    }
}
