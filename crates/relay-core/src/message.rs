//! Chat message model for Relay.
//!
//! A [`Message`] is built by the server at the moment an inbound frame
//! arrives and is immutable from then on. One `Arc<Message>` is shared by
//! every recipient of a broadcast.

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum inbound frame (and therefore content) size in bytes.
pub const MAX_CONTENT_BYTES: usize = 1024;

/// One chat event as delivered to clients.
///
/// The timestamp is always server receipt time; clients never supply it.
/// Content is opaque and passes through unmodified; rendering safety is the
/// consumer's concern.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Display name of the sending connection.
    pub sender: String,
    /// Raw frame payload interpreted as text.
    pub content: String,
    /// Seconds since the Unix epoch at server receipt.
    pub timestamp: i64,
}

impl Message {
    /// Build a message stamped with the current server time.
    #[must_use]
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            timestamp: unix_now(),
        }
    }

    /// Encode the wire form: one JSON object `{sender, content, timestamp}`.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
