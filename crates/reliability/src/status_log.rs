use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::debug;
use vcloud_core::VcResult;

/// Append-only availability samples, one `0`/`1` per line.
pub struct StatusLog<W: Write> {
    writer: W,
    lines: u64,
    path: Option<PathBuf>,
}

impl StatusLog<LineWriter<File>> {
    /// Opens `<dir>/<kind>_<id>_<YYYYmmdd_HHMMSS>.csv` in append mode,
    /// creating `dir` when needed.
    pub fn create(dir: &Path, kind: &str, id: &str, started_at: DateTime<Local>) -> VcResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(kind, id, started_at));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Status log opened at {}", path.display());
        Ok(Self {
            writer: LineWriter::new(file),
            lines: 0,
            path: Some(path),
        })
    }

    pub fn file_name(kind: &str, id: &str, started_at: DateTime<Local>) -> String {
        format!("{kind}_{id}_{}.csv", started_at.format("%Y%m%d_%H%M%S"))
    }
}

impl<W: Write> StatusLog<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            lines: 0,
            path: None,
        }
    }

    pub fn append(&mut self, up: bool) -> io::Result<()> {
        self.writer.write_all(if up { b"1\n" } else { b"0\n" })?;
        self.lines += 1;
        Ok(())
    }

    /// Samples written so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_in_memory_log() {
        let mut log = StatusLog::new(Vec::new());
        log.append(true).unwrap();
        log.append(false).unwrap();
        log.append(true).unwrap();
        assert_eq!(log.lines(), 3);
        assert_eq!(log.into_inner(), b"1\n0\n1\n");
    }

    #[test]
    fn test_file_name_format() {
        let started = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(
            StatusLog::file_name("vehicle", "veh3", started),
            "vehicle_veh3_20240305_140709.csv"
        );
    }

    #[test]
    fn test_create_writes_lines_through() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("runs");
        let mut log = StatusLog::create(&nested, "broker", "broker", Local::now()).unwrap();
        log.append(true).unwrap();
        log.append(false).unwrap();

        // line buffering: readable without an explicit flush
        let path = log.path().unwrap().to_path_buf();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n0\n");
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("broker_broker_"));
    }
}
