//! Observable client state and events.

use std::fmt;

/// Connection state of the reconnect loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: cancellation was requested.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why a connection (or connection attempt) ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    ConnectFailed(String),
    ReadError(String),
    /// Server sent the `CLOSE` control message.
    ServerClosed,
    /// Close frame or end of stream.
    PeerClosed,
    WriteError(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::ServerClosed => f.write_str("server requested close"),
            Self::PeerClosed => f.write_str("connection closed by peer"),
            Self::WriteError(e) => write!(f, "write error: {e}"),
        }
    }
}

/// Published on the client's broadcast channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// Server announced it is shutting down. Advisory only.
    ShutdownNotice,
    /// Data payload from the server.
    Received(String),
    /// Payload written to the server.
    Sent(String),
    Disconnected(DisconnectReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_render_detail() {
        assert_eq!(
            DisconnectReason::ReadError("reset".into()).to_string(),
            "read error: reset"
        );
        assert_eq!(
            DisconnectReason::ServerClosed.to_string(),
            "server requested close"
        );
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Stopped.to_string(), "stopped");
    }
}
