/// Append-only per-task log files (§4.5)
///
/// Grounded on the original service's `log_file_manager.py` and its
/// `file_utils.py::tail` helper: writes are appended to a plain text file
/// as `[timestamp] [LEVEL] message` lines, with an in-memory ring buffer of
/// the most recent entries kept alongside for cheap reads, and a
/// seek-from-end heuristic for reading older entries straight off disk.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(LogLevel::Info),
            "WARNING" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            "CRITICAL" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
}

/// Average bytes per line assumed by the seek-from-end `tail` heuristic.
const AVG_LINE_LENGTH: u64 = 150;

struct Inner {
    buffer: Vec<LogEntry>,
}

pub struct LogFileManager {
    file_path: PathBuf,
    limit: usize,
    inner: Mutex<Inner>,
}

impl LogFileManager {
    /// Opens (creating if absent) the log file at `file_path`, loading up to
    /// `limit` existing entries into the in-memory ring buffer.
    pub fn new(file_path: PathBuf, limit: usize) -> std::io::Result<Self> {
        let mut buffer = Vec::new();
        if file_path.exists() {
            let mut contents = String::new();
            File::open(&file_path)?.read_to_string(&mut contents)?;
            for line in contents.lines() {
                if let Some(entry) = parse_log_line(line) {
                    buffer.push(entry);
                }
            }
            if buffer.len() > limit {
                let drop = buffer.len() - limit;
                buffer.drain(0..drop);
            }
        }

        Ok(LogFileManager {
            file_path,
            limit,
            inner: Mutex::new(Inner { buffer }),
        })
    }

    pub fn info(&self, message: &str) {
        tracing::info!(%message, "task log");
        self.write(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        tracing::warn!(%message, "task log");
        self.write(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(%message, "task log");
        self.write(LogLevel::Error, message);
    }

    pub fn critical(&self, message: &str) {
        tracing::error!(%message, critical = true, "task log");
        self.write(LogLevel::Critical, message);
    }

    fn write(&self, level: LogLevel, message: &str) {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let line = format!("[{}] [{}] {}\n", timestamp, level.as_str(), message);
        let entry = LogEntry {
            timestamp,
            level,
            message: message.to_string(),
        };

        let mut inner = self.inner.lock().expect("log buffer mutex poisoned");
        inner.buffer.push(entry);
        if inner.buffer.len() > self.limit {
            let drop = inner.buffer.len() - self.limit;
            inner.buffer.drain(0..drop);
        }

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.file_path) {
            let _ = file.write_all(line.as_bytes());
        }
    }

    /// Reads the most recent `self.limit` entries straight off disk (not
    /// the in-memory buffer), optionally filtered to one level. Mirrors the
    /// original's "always re-read from file" `get_entries` semantics so logs
    /// written by another process are visible. The buffer lock is only held
    /// for the `limit` snapshot; the file tail-read itself runs lock-free so
    /// a slow read doesn't block concurrent `write`/`get_entries` calls.
    pub fn get_entries(&self, level: Option<LogLevel>) -> std::io::Result<Vec<LogEntry>> {
        {
            let _guard = self.inner.lock().expect("log buffer mutex poisoned");
        }
        let lines = tail(&self.file_path, self.limit)?;
        Ok(lines
            .iter()
            .filter_map(|line| parse_log_line(line))
            .filter(|entry| level.map_or(true, |lvl| entry.level == lvl))
            .collect())
    }
}

/// Reads the last `n` lines of `path` without loading the whole file,
/// seeking back `n * AVG_LINE_LENGTH` bytes from the end first. Falls back
/// to reading from the start if the file is shorter than that.
fn tail(path: &PathBuf, n: usize) -> std::io::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut file = File::open(path)?;
    let to_read = n as u64 * AVG_LINE_LENGTH;

    if file.seek(SeekFrom::End(-(to_read as i64))).is_err() {
        file.seek(SeekFrom::Start(0))?;
    }

    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let mut lines: Vec<String> = contents.lines().map(|l| l.to_string()).collect();
    if lines.len() > n {
        let drop = lines.len() - n;
        lines.drain(0..drop);
    }
    Ok(lines)
}

fn parse_log_line(line: &str) -> Option<LogEntry> {
    let pattern = Regex::new(r"^\[(\d+)\] \[(INFO|WARNING|ERROR|CRITICAL)\] (.*)$")
        .expect("static pattern is valid");
    let caps = pattern.captures(line)?;
    let timestamp = caps.get(1)?.as_str().parse().ok()?;
    let level = LogLevel::parse(caps.get(2)?.as_str())?;
    let message = caps.get(3)?.as_str().trim().to_string();
    Some(LogEntry {
        timestamp,
        level,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("resinkit-logfile-test-{}-{}", std::process::id(), name));
        p
    }

    #[test]
    fn writes_and_reads_back_entries() {
        let path = temp_path("basic");
        let _ = std::fs::remove_file(&path);
        let manager = LogFileManager::new(path.clone(), 1000).unwrap();

        manager.info("starting up");
        manager.error("something broke");

        let entries = manager.get_entries(None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[1].level, LogLevel::Error);
        assert_eq!(entries[1].message, "something broke");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn filters_by_level() {
        let path = temp_path("filter");
        let _ = std::fs::remove_file(&path);
        let manager = LogFileManager::new(path.clone(), 1000).unwrap();

        manager.info("a");
        manager.warning("b");
        manager.info("c");

        let infos = manager.get_entries(Some(LogLevel::Info)).unwrap();
        assert_eq!(infos.len(), 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn ring_buffer_respects_limit() {
        let path = temp_path("ring");
        let _ = std::fs::remove_file(&path);
        let manager = LogFileManager::new(path.clone(), 3).unwrap();

        for i in 0..10 {
            manager.info(&format!("line {}", i));
        }

        let buffer_len = manager.inner.lock().unwrap().buffer.len();
        assert_eq!(buffer_len, 3);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn reloads_existing_file_on_open() {
        let path = temp_path("reload");
        let _ = std::fs::remove_file(&path);
        {
            let manager = LogFileManager::new(path.clone(), 1000).unwrap();
            manager.info("persisted entry");
        }

        let reopened = LogFileManager::new(path.clone(), 1000).unwrap();
        let buffer_len = reopened.inner.lock().unwrap().buffer.len();
        assert_eq!(buffer_len, 1);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn parses_well_formed_line() {
        let entry = parse_log_line("[1700000000000] [WARNING] disk is getting full").unwrap();
        assert_eq!(entry.timestamp, 1700000000000);
        assert_eq!(entry.level, LogLevel::Warning);
        assert_eq!(entry.message, "disk is getting full");
    }

    #[test]
    fn ignores_malformed_lines() {
        assert!(parse_log_line("not a log line").is_none());
    }
}
