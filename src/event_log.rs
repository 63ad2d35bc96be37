//! Durable event sinks for the replay front end.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gcsim_runtime::memory::events::{EventSink, GcEvent};
use tracing::warn;

/// Writes one JSON object per line, truncating the file on open.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
    failed: bool,
}

impl JsonLinesSink {
    /// Opens `path` for writing, creating parent directories as needed.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create log directory {}", parent.display())
            })?;
        }
        let file = File::create(path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
            failed: false,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }

    fn write_event(&mut self, event: &GcEvent) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")
    }
}

impl EventSink for JsonLinesSink {
    fn record(&mut self, event: &GcEvent) {
        match self.write_event(event) {
            Ok(()) => self.written += 1,
            Err(err) => {
                // Only the first failure is reported.
                if !self.failed {
                    warn!(path = %self.path.display(), "event log write failed: {}", err);
                }
                self.failed = true;
            }
        }
    }

    fn flush(&mut self) {
        if let Err(err) = self.writer.flush() {
            warn!(path = %self.path.display(), "event log flush failed: {}", err);
        }
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for FanoutSink {
    fn record(&mut self, event: &GcEvent) {
        for sink in &mut self.sinks {
            sink.record(event);
        }
    }

    fn flush(&mut self) {
        for sink in &mut self.sinks {
            sink.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcsim_runtime::ObjectId;
    use gcsim_runtime::memory::events::MemorySink;

    #[test]
    fn test_writes_one_event_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");

        let mut sink = JsonLinesSink::create(&path).unwrap();
        sink.record(&GcEvent::Allocate {
            object_id: ObjectId::new(1),
        });
        sink.record(&GcEvent::AddRef {
            from_id: ObjectId::ROOT,
            to_id: ObjectId::new(1),
            resulting_ref_count: 1,
        });
        sink.flush();
        assert_eq!(sink.written(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"event":"allocate","object":1}"#,
                r#"{"event":"add_ref","from":0,"to":1,"ref_count":1}"#,
            ]
        );
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let first = MemorySink::new();
        let second = MemorySink::new();
        let mut fanout = FanoutSink::new().with(first.clone()).with(second.clone());
        fanout.record(&GcEvent::Delete {
            object_id: ObjectId::new(3),
        });
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(JsonLinesSink::create(dir.path()).is_err());
    }
}
