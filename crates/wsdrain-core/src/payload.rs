//! Outbound payload production.

use chrono::{SecondsFormat, Utc};

use crate::ids::SessionId;

/// Produces outbound application payloads and hears about closed connections.
///
/// Payload content is opaque to the session machinery; implementations only
/// need to be cheap and non-blocking.
pub trait PayloadSource: Send + Sync {
    /// Next periodic payload for a live session.
    fn next_payload(&self) -> String;

    /// The `index`-th trailing payload sent during a drain.
    fn trailing_payload(&self, index: usize) -> String;

    /// A session's connection has closed.
    fn connection_closed(&self, _session_id: &SessionId) {}
}

/// Timestamped payloads: `Business data: <rfc3339>` and
/// `Final data: <rfc3339> - <index>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClockPayloadSource;

impl ClockPayloadSource {
    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl PayloadSource for ClockPayloadSource {
    fn next_payload(&self) -> String {
        format!("Business data: {}", Self::now())
    }

    fn trailing_payload(&self, index: usize) -> String {
        format!("Final data: {} - {index}", Self::now())
    }

    fn connection_closed(&self, session_id: &SessionId) {
        tracing::debug!(session_id = %session_id, "payload source notified of close");
    }
}

/// Client-side payload: `Client message: <rfc3339>`.
pub fn client_message() -> String {
    format!("Client message: {}", ClockPayloadSource::now())
}

/// Extract the embedded timestamp from a payload built by this module.
pub fn embedded_timestamp(payload: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let (_, rest) = payload.split_once(": ")?;
    let stamp = rest.split(" - ").next()?;
    chrono::DateTime::parse_from_rfc3339(stamp).ok()
}
