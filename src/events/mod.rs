use serde::{Deserialize, Serialize};

use crate::store::ContentKind;

/// Marker prefix for event records on the wire
pub const EVENT_MARKER: &str = "data: ";

/// One typed event decoded from the processing service's stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Fine-grained transcription progress, 0-100 within the stage
    Progress { progress: f64 },

    /// A fragment of transcript text, append-only
    TranscriptChunk { text: String },

    /// Coarse stage transition reported by the service
    StageChange { stage: String },

    /// One generated content artifact keyed by kind
    ContentGenerated {
        #[serde(rename = "contentType")]
        content_type: ContentKind,
        content: serde_json::Value,
    },

    /// Terminal success
    Complete,

    /// Terminal server-reported failure
    Error { message: String },
}

/// Incremental decoder for the newline-delimited event-stream protocol.
///
/// Chunks arrive at arbitrary boundaries: an event may be split across
/// chunks, or several events may arrive in one chunk. The decoder buffers
/// bytes until a full line is available, so a record is never lost or
/// duplicated regardless of how the stream is partitioned. Malformed lines
/// are skipped, not fatal.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk, returning every event completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            // Complete lines only; the trailing fragment stays buffered so a
            // multi-byte character split across chunks is never mangled.
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = Self::parse_line(text.trim_end_matches('\r')) {
                events.push(event);
            }
        }

        events
    }

    /// Finish the stream, discarding any residual partial record.
    pub fn finish(self) {
        if !self.buffer.is_empty() {
            tracing::debug!(
                residual_bytes = self.buffer.len(),
                "discarding incomplete record at end of stream"
            );
        }
    }

    fn parse_line(line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            return None;
        }

        let Some(payload) = line.strip_prefix(EVENT_MARKER) else {
            tracing::debug!(line, "ignoring line without event marker");
            return None;
        };

        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::warn!(%err, payload, "skipping malformed event record");
                None
            }
        }
    }
}

/// Encode one event as a wire record (used by tests and simulators).
pub fn encode_event(event: &StreamEvent) -> String {
    format!(
        "{}{}\n",
        EVENT_MARKER,
        serde_json::to_string(event).expect("event serialization cannot fail")
    )
}
