//! Reconnecting client driver.
//!
//! One driver task owns the connection. While connected it spawns a receive
//! task and acts as the send unit itself, writing one payload per send
//! interval. Any disconnect is followed by the reconnect delay and a fresh
//! attempt, until the cancellation token fires.

use std::fmt::Display;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use wsdrain_core::payload::client_message;
use wsdrain_core::{ClientSettings, ConnectionId, Frame};

use crate::errors::{ClientError, Result};
use crate::events::{ClientEvent, ConnectionState, DisconnectReason};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 256;
/// Bound on the goodbye close frame when leaving a connection.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Reconnecting WebSocket client.
pub struct ReconnectLoop {
    settings: ClientSettings,
    events: broadcast::Sender<ClientEvent>,
    state: watch::Sender<ConnectionState>,
}

impl ReconnectLoop {
    /// Validate `settings` and build an idle loop.
    pub fn new(settings: ClientSettings) -> Result<Self> {
        settings.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            settings,
            events,
            state,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Drive connections until `cancel` fires. Ends in `Stopped`.
    #[instrument(skip_all, fields(url = %self.settings.server_url))]
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            self.set_state(ConnectionState::Connecting);

            let attempt = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                res = self.connect() => res,
            };

            let reason = match attempt {
                Ok(ws) => {
                    self.set_state(ConnectionState::Connected);
                    match self.drive(ws, &cancel).await {
                        Some(reason) => reason,
                        None => break,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "connect failed");
                    DisconnectReason::ConnectFailed(e.to_string())
                }
            };

            info!(reason = %reason, "disconnected");
            self.emit(ClientEvent::Disconnected(reason));
            self.set_state(ConnectionState::Disconnected);

            if !self.wait_reconnect_delay(&cancel).await {
                break;
            }
        }

        info!("client stopped");
        self.set_state(ConnectionState::Stopped);
    }

    async fn connect(&self) -> Result<WsStream> {
        let url = self.settings.server_url.as_str();
        let after = self.settings.connect_timeout();
        debug!(timeout_ms = after.as_millis() as u64, "connecting");
        let (ws, _) = tokio::time::timeout(after, connect_async(url))
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                url: url.to_string(),
                after,
            })?
            .map_err(|source| ClientError::Connect {
                url: url.to_string(),
                source,
            })?;
        Ok(ws)
    }

    /// Run one connection. `None` means cancelled.
    #[instrument(skip_all, fields(connection_id = %ConnectionId::new()))]
    async fn drive(&self, ws: WsStream, cancel: &CancellationToken) -> Option<DisconnectReason> {
        info!("connected");
        let (mut sink, stream) = ws.split();
        let mut reader = tokio::spawn(read_loop(stream, self.events.clone()));

        let period = self.settings.send_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("cancelled while connected, closing");
                    reader.abort();
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
                    return None;
                }
                res = &mut reader => {
                    break match res {
                        Ok(reason) => reason,
                        Err(e) => DisconnectReason::ReadError(e.to_string()),
                    };
                }
                _ = ticker.tick() => {
                    let payload = client_message();
                    if let Err(e) = sink.send(Message::Text(payload.clone().into())).await {
                        reader.abort();
                        break DisconnectReason::WriteError(e.to_string());
                    }
                    debug!(payload = %payload, "sent");
                    self.emit(ClientEvent::Sent(payload));
                }
            }
        };

        // Best effort; the peer may already be gone.
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        Some(reason)
    }

    /// Sleep the reconnect delay. `false` if cancelled meanwhile.
    async fn wait_reconnect_delay(&self, cancel: &CancellationToken) -> bool {
        let delay = self.settings.reconnect_delay();
        info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "state changed");
            self.emit(ClientEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Read server frames until the connection ends.
///
/// `SHUTDOWN` is advisory. `CLOSE`, a close frame, end of stream and read
/// errors end the loop.
pub async fn read_loop<St, E>(mut stream: St, events: broadcast::Sender<ClientEvent>) -> DisconnectReason
where
    St: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match Frame::classify(text.as_str()) {
                Frame::Shutdown => {
                    info!("server announced shutdown");
                    let _ = events.send(ClientEvent::ShutdownNotice);
                }
                Frame::Close => {
                    info!("server requested close");
                    return DisconnectReason::ServerClosed;
                }
                Frame::Data(data) => {
                    info!(payload = data, "received");
                    let _ = events.send(ClientEvent::Received(data.to_string()));
                }
            },
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "close frame");
                return DisconnectReason::PeerClosed;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return DisconnectReason::ReadError(e.to_string()),
            None => return DisconnectReason::PeerClosed,
        }
    }
}
