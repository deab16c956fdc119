use std::io::Write;
use std::sync::Mutex;
use log::{info, warn};
use serde::Serialize;

use crate::device::types::ParsedEvent;

/// Receives every accepted and parsed measurement.
///
/// Up to three units append concurrently; implementations serialize their own writes. Failures
/// stay inside the sink.
pub trait EventSink: Send + Sync {
    fn append(&self, index: usize, event: ParsedEvent);
}

/// Keeps the events of each scale in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Vec<ParsedEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn events(&self, index: usize) -> Vec<ParsedEvent> {
        let events = self.events.lock().expect("Failed to lock MemorySink events");
        events.get(index).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        let events = self.events.lock().expect("Failed to lock MemorySink events");
        events.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn append(&self, index: usize, event: ParsedEvent) {
        let mut events = self.events.lock().expect("Failed to lock MemorySink events");
        if events.len() <= index {
            events.resize_with(index + 1, Vec::new);
        }
        events[index].push(event);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventLine<'a> {
    scale: usize,
    #[serde(flatten)]
    event: &'a ParsedEvent,
}

/// Writes one JSON object per event, flushed immediately so nothing is lost on exit.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer: Mutex::new(writer) }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn append(&self, index: usize, event: ParsedEvent) {
        info!("Scale {}: {}", index + 1, event);

        let line = match serde_json::to_string(&EventLine { scale: index + 1, event: &event }) {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to encode event: {:?}", err);
                return;
            },
        };

        let mut writer = match self.writer.lock() {
            Ok(v) => v,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!("Failed to write event: {:?}", err);
        }
    }
}
