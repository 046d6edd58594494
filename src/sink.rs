//! Live record emission during a scan.
//!
//! A cursor scan appends every record to its returned collection and, as
//! soon as a record carries a download, also hands it to a [`RecordSink`].
//! The built-in sinks print to **stderr**, so stdout carries only the final
//! collection and stays parseable when piped.

use std::io::Write;

use tracing::warn;

use crate::models::MessageRecord;

/// Receives records the moment they are assembled.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: &MessageRecord);
}

/// Indented JSON, one record after another.
pub struct PrettySink;

impl RecordSink for PrettySink {
    fn emit(&self, record: &MessageRecord) {
        match serde_json::to_string_pretty(record) {
            Ok(text) => write_live(record, &text),
            Err(err) => warn!(message_id = ?record.id(), error = %err, "failed to render live record"),
        }
    }
}

/// One JSON object per line.
pub struct JsonLinesSink;

impl RecordSink for JsonLinesSink {
    fn emit(&self, record: &MessageRecord) {
        match serde_json::to_string(record) {
            Ok(line) => write_live(record, &line),
            Err(err) => warn!(message_id = ?record.id(), error = %err, "failed to render live record"),
        }
    }
}

fn write_live(record: &MessageRecord, text: &str) {
    let mut out = std::io::stderr().lock();
    if let Err(err) = write_line(&mut out, text) {
        warn!(message_id = ?record.id(), error = %err, "failed to write live record");
    }
}

fn write_line(out: &mut impl Write, text: &str) -> std::io::Result<()> {
    writeln!(out, "{}", text)?;
    out.flush()
}

/// Discards records.
pub struct NoSink;

impl RecordSink for NoSink {
    fn emit(&self, _record: &MessageRecord) {}
}

/// Live output mode for the CLI.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum LiveMode {
    Off,
    Human,
    Json,
}

impl LiveMode {
    /// Default: human output when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            LiveMode::Human
        } else {
            LiveMode::Off
        }
    }

    pub fn sink(&self) -> Box<dyn RecordSink> {
        match self {
            LiveMode::Off => Box::new(NoSink),
            LiveMode::Human => Box::new(PrettySink),
            LiveMode::Json => Box::new(JsonLinesSink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(Error::new(ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_line_appends_newline() {
        let mut out = Vec::new();
        write_line(&mut out, "{\"raw\":{}}").unwrap();
        assert_eq!(out, b"{\"raw\":{}}\n");
    }

    #[test]
    fn test_write_line_reports_closed_pipe() {
        let err = write_line(&mut ClosedPipe, "record").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_off_mode_discards() {
        let record = MessageRecord {
            raw: serde_json::Map::new(),
            enrichments: Default::default(),
            download_record: None,
        };
        LiveMode::Off.sink().emit(&record);
    }
}
