//! Append-only JSONL files, one per instance per day.
//!
//! ```text
//! <logs_dir>/
//! └── raw/
//!     ├── 2026-10-16_primary.jsonl
//!     └── 2026-10-16_cli.jsonl
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use parking_lot::Mutex;

use super::entry::LogRecord;

/// Appends [`LogRecord`]s to `<logs_dir>/raw/<date>_<instance>.jsonl`
pub struct JsonlWriter {
    instance: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlWriter {
    /// Open (or create) today's file for `instance`.
    pub fn open(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        Self::open_for(logs_dir, instance, chrono::Local::now().date_naive())
    }

    /// Open (or create) the file for `instance` on `date`.
    pub fn open_for(
        logs_dir: impl AsRef<Path>,
        instance: impl Into<String>,
        date: NaiveDate,
    ) -> std::io::Result<Self> {
        let instance = instance.into();
        let path = file_path(logs_dir.as_ref(), &instance, date);
        if let Some(raw_dir) = path.parent() {
            fs::create_dir_all(raw_dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            instance,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it.
    pub fn append(&self, record: &LogRecord) -> std::io::Result<()> {
        let line = record
            .to_json_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")?;
        writer.flush()
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Location of the file for `instance` on `date`
pub fn file_path(logs_dir: &Path, instance: &str, date: NaiveDate) -> PathBuf {
    logs_dir
        .join("raw")
        .join(format!("{}_{}.jsonl", date.format("%Y-%m-%d"), instance))
}

/// Read every record under `<logs_dir>/raw`, sorted by timestamp.
///
/// Unparseable lines are skipped; the count of skipped lines is returned
/// alongside the records.
pub fn read_records(logs_dir: impl AsRef<Path>) -> std::io::Result<(Vec<LogRecord>, usize)> {
    read_matching(logs_dir.as_ref(), |_| true)
}

/// Like [`read_records`], restricted to files written on `date`.
pub fn read_records_for(
    logs_dir: impl AsRef<Path>,
    date: NaiveDate,
) -> std::io::Result<(Vec<LogRecord>, usize)> {
    let prefix = format!("{}_", date.format("%Y-%m-%d"));
    read_matching(logs_dir.as_ref(), |name| name.starts_with(&prefix))
}

fn read_matching(
    logs_dir: &Path,
    keep: impl Fn(&str) -> bool,
) -> std::io::Result<(Vec<LogRecord>, usize)> {
    let raw_dir = logs_dir.join("raw");
    if !raw_dir.exists() {
        return Ok((Vec::new(), 0));
    }

    let mut records = Vec::new();
    let mut skipped = 0;
    for entry in fs::read_dir(&raw_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".jsonl") || !keep(name) {
            continue;
        }
        for line in fs::read_to_string(&path)?.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match LogRecord::from_json_line(line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }
    }
    records.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok((records, skipped))
}
