//! One accepted connection: its mailbox plus the send and receive loops.
//!
//! The connection is split in two halves. [`run_send`] owns the write half
//! and drains the mailbox to the wire; [`run_receive`] owns the read half and
//! tears the session down when the peer goes away. Either half finishing
//! means the session is dead.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, instrument, warn};
use wsdrain_core::{Frame, SessionId};

use crate::mailbox::{EnqueueError, Mailbox};
use crate::registry::SessionRegistry;

/// A live server-side session.
pub struct Session {
    id: SessionId,
    remote: Option<SocketAddr>,
    mailbox: Mailbox,
    registry: Weak<SessionRegistry>,
    /// Fired on teardown so the connection owner can drop the socket.
    torn_down: CancellationToken,
    connected_at: Instant,
}

impl Session {
    /// Create a session and the mailbox receiver its send loop consumes.
    ///
    /// The session is not added to `registry`; the caller does that once the
    /// loops are about to start.
    pub fn new(
        id: SessionId,
        remote: Option<SocketAddr>,
        mailbox_capacity: usize,
        registry: &Arc<SessionRegistry>,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (mailbox, rx) = Mailbox::new(mailbox_capacity);
        let session = Arc::new(Self {
            id,
            remote,
            mailbox,
            registry: Arc::downgrade(registry),
            torn_down: CancellationToken::new(),
            connected_at: Instant::now(),
        });
        (session, rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Non-blocking enqueue.
    ///
    /// A full mailbox (or a send loop that already exited) tears the session
    /// down: the mailbox is closed and the session leaves the registry.
    pub fn enqueue(&self, payload: impl Into<String>) -> Result<(), EnqueueError> {
        match self.mailbox.try_push(payload.into()) {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.closed_mailbox() {
                    warn!(
                        session_id = %self.id,
                        capacity = self.mailbox.capacity(),
                        reason = %err,
                        "backpressure teardown"
                    );
                    let _ = self.detach();
                    self.torn_down.cancel();
                }
                Err(err)
            }
        }
    }

    /// Close the mailbox so the send loop drains and says goodbye.
    /// Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        self.mailbox.close()
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Close the mailbox, leave the registry and signal the connection
    /// owner. Safe to call repeatedly.
    pub fn teardown(&self) {
        let _ = self.close();
        let _ = self.detach();
        self.torn_down.cancel();
    }

    /// Resolves once the session has been torn down, by backpressure or
    /// explicitly. A plain [`close`](Self::close) does not fire it.
    pub fn torn_down(&self) -> WaitForCancellationFuture<'_> {
        self.torn_down.cancelled()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.is_cancelled()
    }

    fn detach(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(&self.id))
    }
}

/// How the send loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Mailbox closed and drained; a close frame went out.
    Drained { sent: usize },
    /// A write failed; the payload in hand is lost.
    WriteFailed { sent: usize, error: String },
}

/// How the receive loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Peer sent the `CLOSE` control message.
    CloseMessage,
    /// Peer sent a WebSocket close frame.
    CloseFrame,
    /// Stream ended without a close frame.
    EndOfStream,
    ReadError(String),
}

/// Drain `mailbox` to `sink` as text frames, in order.
///
/// When the mailbox is closed and empty a close frame is written and the
/// loop ends. Write errors end the loop without retry.
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn run_send<S>(
    session_id: SessionId,
    mut mailbox: mpsc::Receiver<String>,
    mut sink: S,
) -> SendOutcome
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut sent = 0usize;
    while let Some(payload) = mailbox.recv().await {
        if let Err(e) = sink.send(Message::Text(payload.into())).await {
            warn!(error = %e, sent, "write error");
            return SendOutcome::WriteFailed {
                sent,
                error: e.to_string(),
            };
        }
        sent += 1;
    }

    debug!(sent, "mailbox drained, sending close frame");
    if let Err(e) = sink.send(Message::Close(None)).await {
        // Peer usually already gone at this point.
        debug!(error = %e, "close frame not delivered");
    }
    SendOutcome::Drained { sent }
}

/// Read frames from `stream` until the peer stops, then tear the session
/// down.
///
/// `SHUTDOWN` is advisory and only logged; `CLOSE`, a close frame, end of
/// stream and read errors all end the loop.
#[instrument(skip_all, fields(session_id = %session.id()))]
pub async fn run_receive<St, E>(session: Arc<Session>, mut stream: St) -> ReceiveOutcome
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let outcome = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match Frame::classify(text.as_str()) {
                Frame::Shutdown => info!("peer announced shutdown"),
                Frame::Close => break ReceiveOutcome::CloseMessage,
                Frame::Data(data) => debug!(len = data.len(), payload = data, "received"),
            },
            Some(Ok(Message::Binary(data))) => {
                debug!(len = data.len(), "ignoring binary frame");
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "peer sent close frame");
                break ReceiveOutcome::CloseFrame;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => {
                warn!(error = %e, "websocket error");
                break ReceiveOutcome::ReadError(e.to_string());
            }
            None => break ReceiveOutcome::EndOfStream,
        }
    };

    session.teardown();
    outcome
}
