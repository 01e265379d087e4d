use anyhow::Result;
use chrono::{DateTime, Local};
use log::{LevelFilter, Record};
use std::fs::OpenOptions;
use std::io::Write;

// Logging for the chatterline binary. Store, socket and HTTP activity goes to
// a log file because the terminal belongs to the chat UI while it runs.

pub struct FileLogger {
    log_file: Option<std::fs::File>,
}

impl FileLogger {
    pub fn new(log_file_path: Option<&str>) -> Result<Self> {
        let log_file = if let Some(path) = log_file_path {
            Some(OpenOptions::new().create(true).append(true).open(path)?)
        } else {
            None
        };

        Ok(FileLogger { log_file })
    }
}

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_message = format_line(Local::now(), record);

            if let Some(file) = &self.log_file {
                if let Ok(mut file) = file.try_clone() {
                    let _ = file.write_all(log_message.as_bytes());
                }
            } else {
                eprint!("{}", log_message);
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.log_file {
            if let Ok(mut file) = file.try_clone() {
                let _ = file.flush();
            }
        } else {
            let _ = std::io::stderr().flush();
        }
    }
}

/// One log line: local time, level, module target and source location
fn format_line(now: DateTime<Local>, record: &Record) -> String {
    format!(
        "[{}] {:<5} {} ({}:{}) {}\n",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.target(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.args()
    )
}

/// Read a line of input from stdin, trimming whitespace
pub fn read_line() -> Result<String> {
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

pub fn setup_logging(log_file: Option<&str>, level: LevelFilter) -> Result<()> {
    let logger = FileLogger::new(log_file)?;
    log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;

    log::info!("{} {} logging at {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use log::Level;

    #[test]
    fn test_format_line_names_module_and_location() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let line = format_line(
            now,
            &Record::builder()
                .args(format_args!("Loaded {} contacts", 3))
                .level(Level::Info)
                .target("chatterline::store")
                .file(Some("src/store.rs"))
                .line(Some(42))
                .build(),
        );
        assert_eq!(
            line,
            "[2024-05-01 10:00:00.000] INFO  chatterline::store (src/store.rs:42) Loaded 3 contacts\n"
        );
    }

    #[test]
    fn test_logger_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatterline.log");
        let logger = FileLogger::new(path.to_str()).unwrap();

        log::set_max_level(LevelFilter::Debug);
        log::Log::log(
            &logger,
            &Record::builder()
                .args(format_args!("socket joined"))
                .level(Level::Warn)
                .target("chatterline::socket")
                .build(),
        );
        log::Log::flush(&logger);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("WARN  chatterline::socket (unknown:0) socket joined"));
    }
}
