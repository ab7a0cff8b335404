//! Wire-level control messages.
//!
//! Every frame is text. Two literals are reserved; everything else is opaque
//! application data.

/// Advisory notice: the server is going away, keep reading.
pub const SHUTDOWN: &str = "SHUTDOWN";

/// Terminal notice: the receiver stops reading after this frame.
pub const CLOSE: &str = "CLOSE";

/// Classification of an inbound text frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Shutdown,
    Close,
    Data(&'a str),
}

impl<'a> Frame<'a> {
    pub fn classify(text: &'a str) -> Self {
        match text {
            SHUTDOWN => Self::Shutdown,
            CLOSE => Self::Close,
            other => Self::Data(other),
        }
    }
}
