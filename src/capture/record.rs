//! Status record types from the capture binary's stderr protocol.
//!
//! The binary writes one JSON object per line: `timestamp` (ISO-8601),
//! `message_type`, and a `data` object whose `message` field carries the
//! human-readable text. Any extra `data` fields are preserved as context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a status record.
///
/// `StreamStart` and `StreamStop` are the only authoritative signals of the
/// binary's actual capture readiness; they are independent of OS-level
/// spawn and exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Stream format and device metadata.
    Metadata,
    /// Audio capture has actually started.
    StreamStart,
    /// Audio capture has stopped.
    StreamStop,
    /// Informational message.
    Info,
    /// Error message.
    Error,
    /// Debug message.
    Debug,
}

/// One decoded line from the status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the binary emitted the record.
    pub timestamp: DateTime<Utc>,
    /// Record classification.
    pub message_type: MessageType,
    /// Human-readable message text.
    pub message: String,
    /// Extra structured fields from the wire `data` object, if any.
    pub context: Option<serde_json::Value>,
}

impl LogRecord {
    /// Build a best-effort record for a line that failed structured parsing.
    ///
    /// The raw line text is preserved so no diagnostic output is lost.
    #[must_use]
    pub fn unparsed(line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message_type: MessageType::Info,
            message: line.into(),
            context: None,
        }
    }

    /// Returns true if this record is a capture readiness signal.
    #[must_use]
    pub fn is_stream_start(&self) -> bool {
        self.message_type == MessageType::StreamStart
    }

    /// Returns true if this record signals capture has stopped.
    #[must_use]
    pub fn is_stream_stop(&self) -> bool {
        self.message_type == MessageType::StreamStop
    }
}

/// Wire shape of one stderr line.
#[derive(Debug, Deserialize)]
struct WireRecord {
    timestamp: DateTime<Utc>,
    message_type: MessageType,
    data: WireData,
}

#[derive(Debug, Deserialize)]
struct WireData {
    message: String,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl From<WireRecord> for LogRecord {
    fn from(wire: WireRecord) -> Self {
        let context = if wire.data.extra.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(wire.data.extra))
        };
        Self {
            timestamp: wire.timestamp,
            message_type: wire.message_type,
            message: wire.data.message,
            context,
        }
    }
}

impl LogRecord {
    /// Parse one complete line of the wire protocol.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if the line is not a valid
    /// record; callers are expected to fall back to [`LogRecord::unparsed`].
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<WireRecord>(line).map(Into::into)
    }
}
