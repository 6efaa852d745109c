//! Stderr logger behind the `log` facade.
//!
//! The configured level is the baseline; `RUST_LOG` directives override it, e.g.
//! `RUST_LOG=seltrans_lib::llm_client=trace`.

use crate::settings::LogLevel;
use chrono::Local;
use log::{Log, Metadata, Record};
use std::io::Write;
use std::sync::OnceLock;

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

struct StderrLogger {
    filter: env_filter::Filter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.filter.matches(record) {
            return;
        }
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{}] {:<5} {}: {}",
            ts,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn build_filter(level: LogLevel, overrides: Option<&str>) -> env_filter::Filter {
    let mut builder = env_filter::Builder::new();
    builder.filter_level(level.into());
    if let Some(spec) = overrides.filter(|s| !s.trim().is_empty()) {
        builder.parse(spec);
    }
    builder.build()
}

/// Installs the logger. Calling it again is a no-op.
pub fn init(level: LogLevel) {
    let overrides = std::env::var("RUST_LOG").ok();
    let logger = LOGGER.get_or_init(|| StderrLogger {
        filter: build_filter(level, overrides.as_deref()),
    });
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.filter.filter());
    }
}
