//! Session capture logging
//!
//! Each connection appends its decoded output stream (ANSI escapes intact) to
//! `logs/<name>_<timestamp>.log`, framed by a header and footer line, so a
//! session can be replayed through the same screen path later.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Per-file cap; writes beyond it are dropped.
const MAX_LOG_BYTES: u64 = 50 * 1024 * 1024;

/// Appends a session's output stream to a capped log file.
pub struct SessionLogger {
    writer: BufWriter<File>,
    path: PathBuf,
    written: u64,
    cap_reported: bool,
}

impl SessionLogger {
    /// Open `logs_dir/<sanitized name>_<YYYY-MM-DD_HHMMSS>.log` and write the
    /// header line. The directory is created owner-only.
    pub fn create(logs_dir: &Path, name: &str) -> std::io::Result<Self> {
        crate::core::create_private_dir(logs_dir)?;

        let stamp = Local::now();
        let file_name = format!(
            "{}_{}.log",
            sanitize_name(name),
            stamp.format("%Y-%m-%d_%H%M%S")
        );
        let path = logs_dir.join(file_name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut logger = Self {
            writer: BufWriter::new(file),
            path,
            written: 0,
            cap_reported: false,
        };
        logger.write_line(&format!(
            "--- {} session started {} ---",
            name,
            stamp.format("%Y-%m-%d %H:%M:%S")
        ));
        Ok(logger)
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append decoded session output.
    pub fn write(&mut self, data: &[u8]) {
        if self.written >= MAX_LOG_BYTES {
            if !self.cap_reported {
                self.cap_reported = true;
                tracing::warn!(path = %self.path.display(), "session log cap reached, dropping further output");
            }
            return;
        }
        if self.writer.write_all(data).is_ok() {
            self.written += data.len() as u64;
        }
    }

    /// Write the footer line and flush.
    pub fn close(mut self) {
        let stamp = Local::now();
        self.write_line(&format!(
            "--- session ended {} ---",
            stamp.format("%Y-%m-%d %H:%M:%S")
        ));
        let _ = self.writer.flush();
    }

    fn write_line(&mut self, line: &str) {
        let framed = format!("\r\n{line}\r\n");
        if self.writer.write_all(framed.as_bytes()).is_ok() {
            self.written += framed.len() as u64;
        }
    }
}

impl Drop for SessionLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Keep log file names shell- and filesystem-safe.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}
