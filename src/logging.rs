//! Structured JSON-lines logging behind the `log` facade.
//!
//! Library code logs through `log::` macros; binaries call
//! `init_file_logging` once to route everything into a size-rotated
//! JSON-lines file under the data directory.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use log::{LevelFilter, Log, Metadata, Record};

use crate::defaults::MAX_LOG_BYTES;
use crate::error::{Error, Result};

const LOG_FILE_NAME: &str = "satlift.log";

struct JsonLineLogger {
    path: PathBuf,
    file: Mutex<File>,
    level: LevelFilter,
}

impl JsonLineLogger {
    fn rotate_if_needed(&self, file: &mut File) {
        let oversized = file
            .metadata()
            .map(|meta| meta.len() > MAX_LOG_BYTES)
            .unwrap_or(false);
        if !oversized {
            return;
        }
        let rotated = self.path.with_extension("log.1");
        let _ = std::fs::rename(&self.path, &rotated);
        if let Ok(fresh) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            *file = fresh;
        }
    }
}

impl Log for JsonLineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let payload = serde_json::json!({
            "ts": Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "level": record.level().to_string(),
            "component": record.target(),
            "message": record.args().to_string(),
        });
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = writeln!(file, "{payload}");
        self.rotate_if_needed(&mut file);
    }

    fn flush(&self) {
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = file.flush();
    }
}

/// Install the JSON-lines file logger as the global logger.
pub fn init_file_logging(log_dir: &Path, level: LevelFilter) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let logger = JsonLineLogger {
        path,
        file: Mutex::new(file),
        level,
    };
    log::set_boxed_logger(Box::new(logger))
        .map_err(|err| Error::Execution(format!("logger already installed: {err}")))?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_lines_are_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        let logger = JsonLineLogger {
            path: path.clone(),
            file: Mutex::new(file),
            level: LevelFilter::Info,
        };

        logger.log(
            &Record::builder()
                .args(format_args!("job started"))
                .level(log::Level::Info)
                .target("satlift::job")
                .build(),
        );
        logger.flush();

        let raw = std::fs::read_to_string(&path).unwrap();
        let line = raw.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["message"], "job started");
        assert_eq!(value["component"], "satlift::job");
    }
}
