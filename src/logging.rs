use crate::config;

use flexi_logger::{DeferredNow, FlexiLoggerError, LogSpecification, Logger, LoggerHandle};

/// Only webtics' own modules log at the configured level, dependencies only report warnings
fn log_specification(level: log::LevelFilter) -> LogSpecification {
    let mut spec = LogSpecification::builder();
    spec.default(log::LevelFilter::Warn);
    spec.module("webtics", level);
    spec.build()
}

/// Starts logging to stdout
/// The returned handle must be kept alive for as long as the process logs
pub fn init_logger(log_config: &config::Logging) -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::with(log_specification(log_config.level))
        .log_to_stdout()
        .format(record_formatter)
        .start()
}

/// Applies the logging block of a freshly loaded configuration to a running logger
pub fn reconfigure_logger(handle: &LoggerHandle, log_config: &config::Logging) {
    handle.set_new_spec(log_specification(log_config.level));
}

fn record_formatter(
    writer: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &log::Record) -> Result<(), std::io::Error> {
    writeln!(
        writer,
        "{} {} [{}] {}",
        now.format_rfc3339(),
        record.level(),
        record.module_path().unwrap_or("webtics::<unknown>"),
        record.args(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_stay_quiet() {
        let spec = log_specification(log::LevelFilter::Debug);
        assert!(spec.enabled(log::Level::Debug, "webtics::routes"));
        assert!(!spec.enabled(log::Level::Info, "sqlx::query"));
        assert!(spec.enabled(log::Level::Warn, "sqlx::query"));
    }

    #[test]
    fn records_carry_level_and_module() {
        let mut output: Vec<u8> = vec!();
        let mut now = DeferredNow::new();
        let record = log::Record::builder()
            .args(format_args!("[stats] total events=3"))
            .level(log::Level::Info)
            .module_path(Some("webtics::reporter"))
            .build();

        record_formatter(&mut output, &mut now, &record).unwrap();

        let line = String::from_utf8(output).unwrap();
        assert!(line.ends_with("INFO [webtics::reporter] [stats] total events=3\n"));
    }
}
