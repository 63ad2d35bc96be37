//! Structured notifications emitted once per heap mutation.
//!
//! The serialized form is one flat JSON object per event, e.g.
//! `{"event":"add_ref","from":0,"to":1,"ref_count":1}`. Root edges use the
//! sentinel source `0`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::memory::object::ObjectId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GcEvent {
    Allocate {
        #[serde(rename = "object")]
        object_id: ObjectId,
    },
    AddRef {
        #[serde(rename = "from")]
        from_id: ObjectId,
        #[serde(rename = "to")]
        to_id: ObjectId,
        #[serde(rename = "ref_count")]
        resulting_ref_count: usize,
    },
    RemoveRef {
        #[serde(rename = "from")]
        from_id: ObjectId,
        #[serde(rename = "to")]
        to_id: ObjectId,
        #[serde(rename = "ref_count")]
        resulting_ref_count: usize,
    },
    Delete {
        #[serde(rename = "object")]
        object_id: ObjectId,
    },
    Leak {
        #[serde(rename = "object")]
        object_id: ObjectId,
    },
}

impl GcEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GcEvent::Allocate { .. } => "allocate",
            GcEvent::AddRef { .. } => "add_ref",
            GcEvent::RemoveRef { .. } => "remove_ref",
            GcEvent::Delete { .. } => "delete",
            GcEvent::Leak { .. } => "leak",
        }
    }
}

/// Receiver of collector events.
pub trait EventSink: Send {
    fn record(&mut self, event: &GcEvent);

    fn flush(&mut self) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&mut self, _event: &GcEvent) {}
}

/// Keeps events in memory. Clones share the same buffer, so a caller can keep
/// one handle while the collector owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GcEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GcEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn record(&mut self, event: &GcEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let event = GcEvent::AddRef {
            from_id: ObjectId::ROOT,
            to_id: ObjectId::new(1),
            resulting_ref_count: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"add_ref","from":0,"to":1,"ref_count":1}"#);

        let delete: GcEvent = serde_json::from_str(r#"{"event":"delete","object":2}"#).unwrap();
        assert_eq!(
            delete,
            GcEvent::Delete {
                object_id: ObjectId::new(2)
            }
        );
    }

    #[test]
    fn test_memory_sink_shares_buffer() {
        let sink = MemorySink::new();
        let mut handle: Box<dyn EventSink> = Box::new(sink.clone());
        handle.record(&GcEvent::Leak {
            object_id: ObjectId::new(3),
        });
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].name(), "leak");
        sink.clear();
        assert!(sink.is_empty());
    }
}
