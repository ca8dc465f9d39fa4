//! **Chat Streaming Client** — incremental decoding of the SSE-style chat
//! reply stream.
//!
//! The server delivers line-delimited events of the form
//! `data: {"status":"success","sentence":"..."}`. Decoding is best-effort:
//! a line that fails to parse as JSON is skipped, and a non-success event is
//! surfaced inline without aborting the stream. Fragments are delivered in
//! arrival order with no buffering beyond line granularity.

use crate::error::PersoResult;
use serde::Deserialize;
use std::io::BufRead;
use tracing::warn;

/// Prefix marking an event line in the stream.
const EVENT_PREFIX: &str = "data: ";

#[derive(Debug, Deserialize)]
struct ChatEvent {
    #[serde(default)]
    status: String,
    #[serde(default)]
    sentence: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Decode a chat reply stream into the full response text.
///
/// `on_fragment` observes every successful sentence fragment as it is read,
/// before the stream completes. A read error on the underlying connection is
/// fatal; a malformed event line is not.
pub fn decode_stream<R, F>(reader: R, mut on_fragment: F) -> PersoResult<String>
where
    R: BufRead,
    F: FnMut(&str),
{
    let mut response = String::new();

    for line in reader.lines() {
        let line = line?;
        let Some(payload) = line.strip_prefix(EVENT_PREFIX) else {
            continue;
        };
        let event: ChatEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            // Partial or garbled chunks must not abort an otherwise good stream.
            Err(_) => continue,
        };
        if event.status == "success" {
            on_fragment(&event.sentence);
            response.push_str(&event.sentence);
        } else {
            warn!(
                "Chat stream event error: {}",
                event.reason.as_deref().unwrap_or("Unknown error")
            );
        }
    }

    Ok(response)
}
