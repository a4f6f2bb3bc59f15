//! Date-partitioned, append-only line logs for daemon jobs.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use regex::Regex;
use tasknode_cron::calendar;

use crate::error::{ExecError, Result};

/// Appends lines to `<root>/<YYYY-MM-DD>/<file_name>`.
///
/// The date is taken (in the agent's civil zone) on every write, and the
/// file is reopened when it changes.
#[derive(Debug)]
pub struct DayLog {
    root: PathBuf,
    file_name: String,
    open: Option<(String, File)>,
}

impl DayLog {
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
            open: None,
        }
    }

    pub fn path_for(root: &Path, date: &str, file_name: &str) -> PathBuf {
        root.join(date).join(file_name)
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let date = calendar::log_date(&calendar::now());
        self.write_line_on(&date, line)
    }

    /// Append `line` to the file for `date`.
    pub fn write_line_on(&mut self, date: &str, line: &str) -> std::io::Result<()> {
        let stale = self.open.as_ref().map_or(true, |(open_date, _)| open_date != date);
        if stale {
            let path = Self::path_for(&self.root, date, &self.file_name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.open = Some((date.to_string(), file));
        }
        match self.open.as_mut() {
            Some((_, file)) => writeln!(file, "{line}"),
            None => Ok(()),
        }
    }

    /// File currently being appended to, if any.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.open
            .as_ref()
            .map(|(date, _)| Self::path_for(&self.root, date, &self.file_name))
    }
}

/// A window of log lines and the byte offset to resume from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogChunk {
    pub offset: u64,
    pub lines: Vec<String>,
}

/// Read complete lines from `path` starting at byte `offset`.
///
/// Lines not matching `keyword` are skipped but still advance the offset.
/// Reading stops after `max_lines` matches or at the last complete line, so
/// a line still being written is returned by a later call.
pub fn read_chunk(
    path: &Path,
    offset: u64,
    max_lines: usize,
    keyword: Option<&Regex>,
) -> Result<LogChunk> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExecError::LogNotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(offset))?;

    let mut chunk = LogChunk {
        offset,
        lines: Vec::new(),
    };
    let mut buf = Vec::new();
    while chunk.lines.len() < max_lines {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 || buf.last() != Some(&b'\n') {
            break;
        }
        chunk.offset += n as u64;
        let line = String::from_utf8_lossy(&buf[..n - 1]);
        if keyword.map_or(true, |re| re.is_match(&line)) {
            chunk.lines.push(line.into_owned());
        }
    }
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolls_over_on_date_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = DayLog::new(dir.path(), "7.log");
        log.write_line_on("2024-01-01", "first").unwrap();
        log.write_line_on("2024-01-01", "second").unwrap();
        log.write_line_on("2024-01-02", "third").unwrap();

        let day1 = fs::read_to_string(dir.path().join("2024-01-01/7.log")).unwrap();
        let day2 = fs::read_to_string(dir.path().join("2024-01-02/7.log")).unwrap();
        assert_eq!(day1, "first\nsecond\n");
        assert_eq!(day2, "third\n");
        assert_eq!(
            log.current_path().unwrap(),
            dir.path().join("2024-01-02").join("7.log")
        );
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        DayLog::new(dir.path(), "1.log")
            .write_line_on("2024-05-05", "a")
            .unwrap();
        DayLog::new(dir.path(), "1.log")
            .write_line_on("2024-05-05", "b")
            .unwrap();
        let text = fs::read_to_string(dir.path().join("2024-05-05/1.log")).unwrap();
        assert_eq!(text, "a\nb\n");
    }

    #[test]
    fn write_line_uses_today() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = DayLog::new(dir.path(), "3.log");
        log.write_line("now").unwrap();
        let today = calendar::log_date(&calendar::now());
        assert!(dir.path().join(today).join("3.log").exists());
    }

    #[test]
    fn chunk_pages_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        fs::write(&path, "l1\nl2\nl3\npartial").unwrap();

        let first = read_chunk(&path, 0, 2, None).unwrap();
        assert_eq!(first.lines, vec!["l1", "l2"]);
        assert_eq!(first.offset, 6);

        let rest = read_chunk(&path, first.offset, 10, None).unwrap();
        assert_eq!(rest.lines, vec!["l3"]);
        assert_eq!(rest.offset, 9, "unterminated tail is not consumed");
    }

    #[test]
    fn chunk_keyword_filter_advances_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        fs::write(&path, "info a\nerror b\ninfo c\nerror d\n").unwrap();

        let re = Regex::new("^error").unwrap();
        let chunk = read_chunk(&path, 0, 1, Some(&re)).unwrap();
        assert_eq!(chunk.lines, vec!["error b"]);
        assert_eq!(chunk.offset, 15);

        let chunk = read_chunk(&path, chunk.offset, 5, Some(&re)).unwrap();
        assert_eq!(chunk.lines, vec!["error d"]);
        assert_eq!(chunk.offset, 30);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = read_chunk(Path::new("/no/such/dir/1.log"), 0, 10, None).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
