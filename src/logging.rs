//! Subscriber setup for the ledger binary
//!
//! File output always goes through a non-blocking rolling appender. Text mode
//! also mirrors to stdout; JSON mode writes the file only.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Crates whose per-statement output drowns the ledger's own events
const QUIET_TARGETS: &[&str] = &["sqlx=warn"];

/// Directive string used when `RUST_LOG` is unset
fn filter_directives(level: &str) -> String {
    std::iter::once(level)
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    let (dir, file) = (&config.log_dir, &config.log_file);
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(dir, file),
        "daily" => tracing_appender::rolling::daily(dir, file),
        _ => tracing_appender::rolling::never(dir, file),
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(file_appender(config));
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.log_level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(writer).with_ansi(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(writer).with_ansi(false))
            .with(fmt::layer().with_target(false))
            .init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_keep_sqlx_quiet() {
        assert_eq!(filter_directives("info"), "info,sqlx=warn");
        assert_eq!(
            filter_directives("neobank_ledger=debug"),
            "neobank_ledger=debug,sqlx=warn"
        );
        assert!(EnvFilter::try_new(filter_directives("debug")).is_ok());
    }
}
