//! Incremental log tailing with a persisted byte offset.

#![allow(missing_docs)]

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::core::errors::{PervigilError, Result};
use crate::monitor::state::write_json_atomic;

const READ_CHUNK: usize = 64 * 1024;
const SOURCE: &str = "log file";

/// Source of newly appended log lines.
pub trait LogReader: Send + Sync {
    /// Trimmed, non-empty lines appended since the previous call, oldest first.
    fn read_new_lines(&self) -> Result<Vec<String>>;
}

/// Tails a file, remembering the offset just past the last consumed line.
///
/// A shrunken file (rotation or truncation) restarts from offset 0. A final
/// line without its newline is left for the next read.
#[derive(Debug, Clone)]
pub struct FileLogReader {
    log_path: PathBuf,
    position_path: PathBuf,
    max_lines: usize,
}

impl FileLogReader {
    #[must_use]
    pub fn new(log_path: impl Into<PathBuf>, position_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            position_path: position_path.into(),
            max_lines: 100,
        }
    }

    #[must_use]
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }

    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Stored offset; anything missing or unparseable means the start of the file.
    #[must_use]
    pub fn position(&self) -> u64 {
        fs::read_to_string(&self.position_path)
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }

    fn read_failed(&self, err: &std::io::Error) -> PervigilError {
        PervigilError::FetchFailed {
            source_name: SOURCE,
            details: format!("{}: {err}", self.log_path.display()),
        }
    }
}

impl LogReader for FileLogReader {
    fn read_new_lines(&self) -> Result<Vec<String>> {
        let mut file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.log_path.display(), "log file absent");
                return Ok(Vec::new());
            }
            Err(err) => return Err(self.read_failed(&err)),
        };

        let size = file.metadata().map_err(|e| self.read_failed(&e))?.len();
        let mut offset = self.position();
        if size < offset {
            tracing::info!(path = %self.log_path.display(), offset, size, "log shrank, rereading from start");
            offset = 0;
        }
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| self.read_failed(&e))?;

        let mut reader = file.take(size - offset);
        let mut lines = Vec::new();
        let mut consumed = offset;
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        'read: loop {
            let n = reader.read(&mut chunk).map_err(|e| self.read_failed(&e))?;
            if n == 0 {
                break;
            }
            pending.extend_from_slice(&chunk[..n]);

            let mut start = 0;
            for newline in memchr::memchr_iter(b'\n', &pending) {
                let line = String::from_utf8_lossy(&pending[start..newline]);
                consumed += (newline + 1 - start) as u64;
                start = newline + 1;

                let line = line.trim();
                if !line.is_empty() {
                    lines.push(line.to_string());
                    if lines.len() >= self.max_lines {
                        break 'read;
                    }
                }
            }
            pending.drain(..start);
        }

        write_json_atomic(&self.position_path, &consumed)?;
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn setup(content: &str) -> (tempfile::TempDir, PathBuf, FileLogReader) {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("syslog");
        fs::write(&log, content).unwrap();
        let reader = FileLogReader::new(&log, dir.path().join("pos"));
        (dir, log, reader)
    }

    fn append(path: &Path, content: &str) {
        let mut f = fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn reads_trimmed_non_empty_lines_then_nothing() {
        let (_dir, _log, reader) = setup("  one  \n\n\ttwo\n");
        assert_eq!(reader.read_new_lines().unwrap(), vec!["one", "two"]);
        assert_eq!(reader.position(), 14);
        assert!(reader.read_new_lines().unwrap().is_empty());
    }

    #[test]
    fn only_new_lines_after_append() {
        let (_dir, log, reader) = setup("old\n");
        reader.read_new_lines().unwrap();
        append(&log, "new 1\nnew 2\n");
        assert_eq!(reader.read_new_lines().unwrap(), vec!["new 1", "new 2"]);
    }

    #[test]
    fn partial_line_waits_for_newline() {
        let (_dir, log, reader) = setup("done\nhalf");
        assert_eq!(reader.read_new_lines().unwrap(), vec!["done"]);
        assert_eq!(reader.position(), 5);
        append(&log, " line\n");
        assert_eq!(reader.read_new_lines().unwrap(), vec!["half line"]);
    }

    #[test]
    fn batch_is_bounded_and_resumes() {
        let content: String = (0..250).map(|i| format!("line {i}\n")).collect();
        let (_dir, _log, reader) = setup(&content);
        let first = reader.read_new_lines().unwrap();
        assert_eq!(first.len(), 100);
        assert_eq!(first[99], "line 99");
        let second = reader.read_new_lines().unwrap();
        assert_eq!(second[0], "line 100");
        assert_eq!(reader.read_new_lines().unwrap().len(), 50);
    }

    #[test]
    fn custom_bound() {
        let (_dir, _log, reader) = setup("a\nb\nc\n");
        let reader = reader.with_max_lines(2);
        assert_eq!(reader.read_new_lines().unwrap(), vec!["a", "b"]);
        assert_eq!(reader.read_new_lines().unwrap(), vec!["c"]);
    }

    #[test]
    fn truncation_restarts_from_zero() {
        let (_dir, log, reader) = setup("first line is long\nsecond line\n");
        reader.read_new_lines().unwrap();
        fs::write(&log, "rotated\n").unwrap();
        assert_eq!(reader.read_new_lines().unwrap(), vec!["rotated"]);
    }

    #[test]
    fn garbled_position_means_start() {
        let (dir, _log, reader) = setup("x\n");
        fs::write(dir.path().join("pos"), "not a number").unwrap();
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_new_lines().unwrap(), vec!["x"]);
    }

    #[test]
    fn missing_log_is_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FileLogReader::new(dir.path().join("absent"), dir.path().join("pos"));
        assert!(reader.read_new_lines().unwrap().is_empty());
        assert!(!dir.path().join("pos").exists());
    }

    #[test]
    fn lines_spanning_chunks_are_joined() {
        let long = "y".repeat(READ_CHUNK + 10);
        let (_dir, _log, reader) = setup(&format!("{long}\nshort\n"));
        let lines = reader.read_new_lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), READ_CHUNK + 10);
        assert_eq!(lines[1], "short");
    }
}
