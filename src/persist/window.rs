//! Time-bounded rotating log files.
//!
//! Records are appended to an open window's staging file; once the wall
//! clock passes `start_time + interval` the window is flushed, closed, and
//! atomically renamed into place. At most one window is open at a time.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::FixedOffset;
use serde_json::{Map, Value};

use crate::annotation;
use crate::persist::{format_stamp, staging_name, PersistError};

/// Serialization mode for annotation records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    JsonLines,
    /// One row per record, restricted to this fixed field list.
    Csv { fields: Vec<String> },
}

impl LogFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            LogFormat::JsonLines => ".jsonl",
            LogFormat::Csv { .. } => ".csv",
        }
    }
}

struct OpenWindow {
    start_time: f64,
    staging_path: PathBuf,
    final_path: PathBuf,
    file: BufWriter<File>,
}

/// Groups consecutive records into time-bounded, atomically-published files.
pub struct RotatingLog {
    dir: PathBuf,
    /// Window length in seconds (`log_dump_interval`).
    interval: f64,
    format: LogFormat,
    /// Apply the dotted-key flatten transform before serialization.
    flatten: bool,
    utc_offset: Option<FixedOffset>,
    open: Option<OpenWindow>,
}

impl RotatingLog {
    pub fn new(
        dir: impl Into<PathBuf>,
        interval_secs: f64,
        format: LogFormat,
        flatten: bool,
        utc_offset: Option<FixedOffset>,
    ) -> Self {
        Self {
            dir: dir.into(),
            interval: interval_secs,
            format,
            flatten,
            utc_offset,
            open: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Append one record, opening a window at `frame_time` if none is open.
    /// Reserved keys must already be merged by the caller.
    pub fn append(
        &mut self,
        record: &Map<String, Value>,
        frame_time: f64,
    ) -> Result<(), PersistError> {
        let flattened;
        let record = if self.flatten {
            flattened = annotation::flatten(record);
            &flattened
        } else {
            record
        };
        let line = match &self.format {
            LogFormat::JsonLines => annotation::to_json_line(record)
                .map_err(|e| PersistError::WriteFailed(e.to_string()))?,
            LogFormat::Csv { fields } => annotation::to_csv_row(record, fields),
        };
        let window = match self.open.take() {
            Some(window) => window,
            None => self.open_window(frame_time)?,
        };
        let window = self.open.insert(window);
        if let Err(e) = writeln!(window.file, "{}", line) {
            let reason = format!("{}: {}", window.staging_path.display(), e);
            // The staging content is in an unknown state; a partial line
            // must not end up inside a published file.
            self.abandon_window();
            return Err(PersistError::WriteFailed(reason));
        }
        Ok(())
    }

    /// Close and publish the open window once its deadline has passed.
    /// Checked on every poll cycle, not just on record arrival.
    pub fn maybe_rotate(&mut self, now: f64) -> Result<Option<PathBuf>, PersistError> {
        match &self.open {
            Some(window) if now > window.start_time + self.interval => self.close(),
            _ => Ok(None),
        }
    }

    /// Force-close the open window (shutdown path). Returns the published
    /// path, or `None` when no window was open.
    pub fn close(&mut self) -> Result<Option<PathBuf>, PersistError> {
        let Some(window) = self.open.take() else {
            return Ok(None);
        };
        let OpenWindow {
            staging_path,
            final_path,
            file,
            ..
        } = window;

        let inner = match file.into_inner() {
            Ok(inner) => inner,
            Err(e) => {
                discard(&staging_path);
                return Err(PersistError::WriteFailed(format!(
                    "{}: {}",
                    staging_path.display(),
                    e
                )));
            }
        };
        if let Err(e) = inner.sync_all() {
            discard(&staging_path);
            return Err(PersistError::WriteFailed(format!(
                "{}: {}",
                staging_path.display(),
                e
            )));
        }
        if let Err(e) = fs::rename(&staging_path, &final_path) {
            // Non-fatal: lose this window, keep the subscriber running.
            discard(&staging_path);
            return Err(PersistError::RenameFailed(format!(
                "{}: {}",
                final_path.display(),
                e
            )));
        }
        Ok(Some(final_path))
    }

    /// Drop the open window and delete its staging file. Records already
    /// buffered in the window are lost rather than published corrupt.
    fn abandon_window(&mut self) {
        if let Some(window) = self.open.take() {
            discard(&window.staging_path);
        }
    }

    fn open_window(&self, start_time: f64) -> Result<OpenWindow, PersistError> {
        let name = format!(
            "{}{}",
            format_stamp(start_time, self.utc_offset),
            self.format.extension()
        );
        let final_path = self.dir.join(&name);
        let staging_path = self.dir.join(staging_name(&name));
        let file = File::create(&staging_path).map_err(|e| {
            PersistError::WriteFailed(format!("{}: {}", staging_path.display(), e))
        })?;
        let mut file = BufWriter::new(file);
        if let LogFormat::Csv { fields } = &self.format {
            writeln!(file, "{}", annotation::csv_header(fields)).map_err(|e| {
                PersistError::WriteFailed(format!("{}: {}", staging_path.display(), e))
            })?;
        }
        Ok(OpenWindow {
            start_time,
            staging_path,
            final_path,
            file,
        })
    }
}

impl Drop for RotatingLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("closing log window on drop: {}", e);
        }
    }
}

fn discard(path: &std::path::Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::debug!("could not remove staging file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn list_names(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn abandoned_window_loses_its_records_and_reopens_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RotatingLog::new(dir.path(), 5.0, LogFormat::JsonLines, false, None);

        log.append(&record(json!({"n": 1})), 0.0).unwrap();
        log.abandon_window();
        assert!(!log.is_open());
        assert!(list_names(dir.path()).is_empty());

        // The next record opens a fresh window; nothing from the abandoned
        // one leaks into the published file.
        log.append(&record(json!({"n": 2})), 1.0).unwrap();
        let published = log.close().unwrap().expect("window published");
        let text = fs::read_to_string(published).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert_eq!(
            serde_json::from_str::<Value>(text.trim()).unwrap(),
            json!({"n": 2})
        );
    }

    #[test]
    fn window_rotates_after_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RotatingLog::new(dir.path(), 5.0, LogFormat::JsonLines, false, None);

        log.append(&record(json!({"n": 1})), 0.0).unwrap();
        assert!(log.is_open());
        assert!(log.maybe_rotate(4.9).unwrap().is_none());

        let published = log.maybe_rotate(6.0).unwrap().expect("window published");
        assert!(!log.is_open());
        assert!(published.exists());
        assert!(!published
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("transferring."));

        // A record after closure opens a fresh window.
        log.append(&record(json!({"n": 2})), 6.1).unwrap();
        assert!(log.is_open());
        let second = log.close().unwrap().expect("second window published");
        assert_ne!(published, second);
        assert_eq!(list_names(dir.path()).len(), 2);
    }

    #[test]
    fn json_lines_hold_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RotatingLog::new(dir.path(), 5.0, LogFormat::JsonLines, false, None);
        log.append(&record(json!({"a": 1})), 0.0).unwrap();
        log.append(&record(json!({"b": 2})), 1.0).unwrap();
        let path = log.close().unwrap().unwrap();

        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<Value>(lines[0]).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn csv_mode_writes_header_and_restricted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let format = LogFormat::Csv {
            fields: vec!["label".to_string(), "score".to_string()],
        };
        let mut log = RotatingLog::new(dir.path(), 5.0, format, false, None);
        log.append(&record(json!({"label": "cat", "score": 0.7, "extra": true})), 0.0)
            .unwrap();
        log.append(&record(json!({"label": "dog"})), 1.0).unwrap();
        let path = log.close().unwrap().unwrap();
        assert!(path.to_string_lossy().ends_with(".csv"));

        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["label,score", "cat,0.7", "dog,"]);
    }

    #[test]
    fn flatten_applies_before_serialization() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RotatingLog::new(dir.path(), 5.0, LogFormat::JsonLines, true, None);
        log.append(&record(json!({"a": 1, "c": {"x": 2}})), 0.0)
            .unwrap();
        let path = log.close().unwrap().unwrap();

        let text = fs::read_to_string(path).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(text.trim()).unwrap(),
            json!({"a": 1, "c.x": 2})
        );
    }

    #[test]
    fn close_without_open_window_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RotatingLog::new(dir.path(), 5.0, LogFormat::JsonLines, false, None);
        assert!(log.close().unwrap().is_none());
        assert!(log.maybe_rotate(100.0).unwrap().is_none());
    }
}
