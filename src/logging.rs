//! # Logging Module
//!
//! Process-wide diagnostics through the `log` facade, plus the per-run
//! audit file that records every emitted fix in its text form.
//!
//! Components log with an explicit `target:` naming themselves
//! (`"relay"`, `"queue"`, ...); the formatter prints it as the component tag.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use env_logger::{Builder, Target};
use log::{error, info};

use crate::codec::render_fix;
use crate::model::Fix;

const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const BANNER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const AUDIT_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Writes every record to stderr and to a log file.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Install the global logger. `RUST_LOG`, when set, overrides `level`.
///
/// Calling it a second time leaves the first logger in place.
pub fn init_logging(level: &str, file: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::new();
    builder.parse_filters(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - [{}] {}",
            Local::now().format(LOG_TIME_FORMAT),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(path) = file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(TeeWriter { file })));
    }

    // Already initialised (tests, embedding): keep the existing logger.
    let _ = builder.try_init();
    Ok(())
}

/// Per-run text file holding the rendered form of every emitted fix,
/// framed by start and end banners.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl AuditLog {
    /// Create `gps_data_<started>.txt` in `dir` and write the start banner.
    pub fn create(dir: &Path, started: DateTime<Local>) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("gps_data_{}.txt", started.format(AUDIT_NAME_FORMAT)));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(
            file,
            "\n=== Application Started at: {} ===\n",
            started.format(BANNER_TIME_FORMAT)
        )?;
        info!(target: "runtime", "Audit log at {}", path.display());
        Ok(AuditLog {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, text: &str) {
        let mut guard = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(file) = guard.as_mut() else {
            return;
        };
        if let Err(e) = file.write_all(text.as_bytes()).and_then(|_| file.flush()) {
            error!(target: "runtime", "Failed to write audit log {}: {}", self.path.display(), e);
        }
    }

    /// Append the text rendering of `fix`. Failures are logged only.
    pub fn record(&self, fix: &Fix) {
        self.write(&render_fix(fix));
    }

    /// Write the end banner and stop accepting records.
    pub fn close(&self) {
        let banner = format!(
            "\n=== Application Ended at: {} ===\n",
            Local::now().format(BANNER_TIME_FORMAT)
        );
        self.write(&banner);
        let mut guard = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SourceSnapshot, SourceTag};
    use chrono::TimeZone;

    fn fix() -> Fix {
        let snap = |gps| SourceSnapshot {
            gps,
            latitude: Some(12.5),
            longitude: Some(-3.25),
            altitude: Some(10.0),
            speed: Some(1.8),
            satellites: Some(9),
            satellite_prns: vec!["4".into(), "9".into()],
        };
        Fix {
            timestamp: "2024-05-01 12:00:00.000000".into(),
            ship_id: "SHIP456".into(),
            device_id: "dev".into(),
            heading: Some(45.0),
            gps_data: vec![snap(SourceTag::Top), snap(SourceTag::Bottom)],
        }
    }

    #[test]
    fn test_audit_log_banners_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let audit = AuditLog::create(dir.path(), started).unwrap();
        assert_eq!(
            audit.path().file_name().unwrap().to_str().unwrap(),
            "gps_data_2024-05-01_12-00-00.txt"
        );

        audit.record(&fix());
        audit.close();
        // Ignored once closed.
        audit.record(&fix());

        let text = fs::read_to_string(audit.path()).unwrap();
        assert!(text.contains("=== Application Started at: 2024-05-01 12:00:00 ==="));
        assert!(text.contains("Ship ID: SHIP456"));
        assert!(text.contains("=== Application Ended at: "));
        assert_eq!(text.matches("Ship ID:").count(), 1);
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        init_logging("debug", Some(&dir.path().join("logs/run.log"))).unwrap();
        init_logging("info", None).unwrap();
        assert!(dir.path().join("logs/run.log").exists());
    }
}
