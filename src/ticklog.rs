//! Operator-controlled plain-text log of the regulator telemetry.
//!
//! One line per robot tick: joint vector, regulator error and regulator
//! output, each field rendered with the narrow fixed-width encoder so the
//! file lines up in a plain editor. Append-only; opened and closed explicitly
//! from the console. A write failure closes the log and is reported once,
//! the session itself is never affected.

use crate::frame_codec::{encode_field, LOG_FIELD_WIDTH};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct TickLog {
    sink: Option<(PathBuf, BufWriter<File>)>,
}

impl TickLog {
    pub fn new() -> Self {
        TickLog { sink: None }
    }

    /// Opens (appending) the given file; an already open log is closed first.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        self.close();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path.as_ref())?;
        self.sink = Some((path.as_ref().to_path_buf(), BufWriter::new(file)));
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub fn close(&mut self) {
        if let Some((path, mut writer)) = self.sink.take() {
            if let Err(error) = writer.flush() {
                warn!(path = %path.display(), %error, "flushing tick log failed");
            }
        }
    }

    /// Appends one line. Does nothing while closed.
    pub fn record(&mut self, joints: &[i32; 6], reg_error: &[i32; 6], reg_output: &[i32; 6]) {
        let Some((path, writer)) = self.sink.as_mut() else {
            return;
        };
        let line = format_line(joints, reg_error, reg_output);
        if let Err(error) = writeln!(writer, "{}", line) {
            warn!(path = %path.display(), %error, "tick log write failed, closing the log");
            self.sink = None;
        }
    }
}

impl Default for TickLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TickLog {
    fn drop(&mut self) {
        self.close();
    }
}

fn format_line(joints: &[i32; 6], reg_error: &[i32; 6], reg_output: &[i32; 6]) -> String {
    let mut fields = Vec::with_capacity(18);
    for group in [joints, reg_error, reg_output] {
        for value in group {
            fields.push(encode_field(*value, LOG_FIELD_WIDTH));
        }
    }
    fields.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn line_uses_the_narrow_field_width() {
        let line = format_line(&[10, -20, 0, 0, 0, 0], &[1, 2, 3, 4, 5, 6], &[0; 6]);
        assert!(line.starts_with("00010 -0020 00000"));
        assert_eq!(line.split(' ').count(), 18);
        for field in line.split(' ') {
            assert_eq!(field.len(), LOG_FIELD_WIDTH);
        }
    }

    #[test]
    fn open_record_close_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticks.log");

        let mut log = TickLog::new();
        assert!(!log.is_open());
        log.open(&path).unwrap();
        assert!(log.is_open());
        log.record(&[1; 6], &[2; 6], &[3; 6]);
        log.record(&[4; 6], &[5; 6], &[6; 6]);
        log.close();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00001"));
        assert!(lines[1].starts_with("00004"));
    }

    #[test]
    fn recording_while_closed_is_a_no_op() {
        let mut log = TickLog::new();
        log.record(&[1; 6], &[2; 6], &[3; 6]);
        assert!(!log.is_open());
    }
}
