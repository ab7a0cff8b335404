use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use wsdrain_core::{PayloadSource, ServerSettings, SessionId, SettingsError};

use crate::health::HealthResponse;
use crate::producer::run_producer;
use crate::registry::SessionRegistry;
use crate::sequencer::{DrainReport, ShutdownSequencer, TrailingCount};
use crate::session::{run_receive, run_send, Session};

/// Errors starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    /// Cancelled when the drain begins. Stops producers and the acceptor.
    pub shutdown: CancellationToken,
    pub source: Arc<dyn PayloadSource>,
    pub settings: Arc<ServerSettings>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: ServerSettings, source: Arc<dyn PayloadSource>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            shutdown: CancellationToken::new(),
            source,
            settings: Arc::new(settings),
            start_time: Instant::now(),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Build the axum router: the WebSocket route plus `/health`.
pub fn build_router(state: AppState) -> Router {
    let ws_path = state.settings.path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and start serving. Returns once the listener is up.
pub async fn start(
    settings: ServerSettings,
    source: Arc<dyn PayloadSource>,
) -> Result<ServerHandle, ServerError> {
    settings.validate()?;

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr()?;

    let state = AppState::new(settings, source);
    let router = build_router(state.clone());
    let token = state.shutdown.clone();

    info!(
        addr = %local_addr,
        path = %state.settings.path,
        "wsdrain server started"
    );

    let server = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await;
        if let Err(e) = result {
            warn!(error = %e, "server loop ended with error");
        }
    });

    Ok(ServerHandle {
        local_addr,
        state,
        server,
    })
}

/// Handle returned by [`start`]. Dropping it leaves the server running.
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: AppState,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL a client on this machine can dial.
    pub fn ws_url(&self) -> String {
        let host = if self.local_addr.ip().is_unspecified() {
            "127.0.0.1".to_string()
        } else {
            self.local_addr.ip().to_string()
        };
        format!(
            "ws://{host}:{}{}",
            self.local_addr.port(),
            self.state.settings.path
        )
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Graceful shutdown with the configured trailing count range.
    pub async fn shutdown(self) -> DrainReport {
        let trailing = TrailingCount::from(&self.state.settings.shutdown);
        self.shutdown_with(trailing).await
    }

    /// Graceful shutdown: stop accepting, drain every session, then give the
    /// acceptor one drain window to exit before aborting it.
    pub async fn shutdown_with(self, trailing: TrailingCount) -> DrainReport {
        let Self {
            state, mut server, ..
        } = self;
        info!(connections = state.registry.len(), "shutdown requested");
        state.shutdown.cancel();

        let settings = &state.settings.shutdown;
        let report = ShutdownSequencer::from_settings(
            state.registry.clone(),
            state.source.clone(),
            settings,
        )
        .with_trailing(trailing)
        .run()
        .await;

        if tokio::time::timeout(settings.drain_window(), &mut server)
            .await
            .is_err()
        {
            warn!("acceptor still running after drain window, aborting");
            server.abort();
        }

        info!(
            trailing = report.trailing,
            completed = report.completed.len(),
            torn_down = report.torn_down.len(),
            "shutdown complete"
        );
        report
    }
}

async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.is_draining() {
        debug!(%remote, "refusing upgrade while draining");
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(%remote, reason = %rejection, "websocket upgrade rejected");
            return rejection.into_response();
        }
    };

    ws.on_failed_upgrade(move |e| warn!(%remote, error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, remote, state))
}

/// Own one connection for its lifetime: register it, run the send, receive
/// and producer loops, then join everything and deregister.
///
/// The connection ends when either loop finishes or the session is torn
/// down. Both halves then get one drain window, shared, to finish on their
/// own before they are aborted and the socket is dropped.
async fn handle_socket(socket: WebSocket, remote: SocketAddr, state: AppState) {
    let session_id = SessionId::new();
    let (session, mailbox_rx) = Session::new(
        session_id.clone(),
        Some(remote),
        state.settings.mailbox_capacity,
        &state.registry,
    );
    state.registry.add(session.clone());
    info!(
        session_id = %session_id,
        %remote,
        connections = state.registry.len(),
        "client connected"
    );

    let (sink, stream) = socket.split();
    let mut send_task = tokio::spawn(run_send(session_id.clone(), mailbox_rx, sink));
    let mut recv_task = tokio::spawn(run_receive(session.clone(), stream));

    let producer = run_producer(
        session.clone(),
        state.source.clone(),
        state.settings.push_interval(),
        state.shutdown.clone(),
    );
    tokio::pin!(producer);

    let mut producing = true;
    let mut sent = None;
    let mut received = None;
    loop {
        tokio::select! {
            res = &mut recv_task => {
                received = Some(res);
                break;
            }
            res = &mut send_task => {
                sent = Some(res);
                break;
            }
            () = session.torn_down() => {
                debug!(session_id = %session_id, "session torn down, closing connection");
                break;
            }
            exit = &mut producer, if producing => {
                producing = false;
                debug!(session_id = %session_id, ?exit, "producer finished");
            }
        }
    }

    session.teardown();
    let deadline = tokio::time::Instant::now() + state.settings.shutdown.drain_window();
    if sent.is_none() {
        sent = join_by(&mut send_task, deadline).await;
    }
    if received.is_none() {
        received = join_by(&mut recv_task, deadline).await;
    }

    match sent {
        Some(Ok(outcome)) => debug!(session_id = %session_id, ?outcome, "send loop finished"),
        Some(Err(e)) => warn!(session_id = %session_id, error = %e, "send task failed"),
        None => warn!(session_id = %session_id, "send loop did not flush in time, aborted"),
    }

    state.source.connection_closed(&session_id);
    let reason = match received {
        Some(Ok(outcome)) => format!("{outcome:?}"),
        Some(Err(e)) => format!("receive task failed: {e}"),
        None => "receive loop aborted".to_string(),
    };
    info!(
        session_id = %session_id,
        %remote,
        reason = %reason,
        age_ms = session.age().as_millis() as u64,
        connections = state.registry.len(),
        "client disconnected"
    );
}

/// Wait for `task` until `deadline`; past it, abort and wait for the abort
/// to land so the task's half of the socket is dropped. `None` if aborted.
async fn join_by<T>(
    task: &mut JoinHandle<T>,
    deadline: tokio::time::Instant,
) -> Option<Result<T, JoinError>> {
    if let Ok(res) = tokio::time::timeout_at(deadline, &mut *task).await {
        return Some(res);
    }
    task.abort();
    match task.await {
        Err(e) if e.is_cancelled() => None,
        res => Some(res),
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = HealthResponse::new(
        state.registry.len(),
        state.start_time.elapsed().as_secs(),
        state.is_draining(),
    );
    let status = if body.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsdrain_core::ClockPayloadSource;

    fn test_settings() -> ServerSettings {
        ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start(test_settings(), Arc::new(ClockPayloadSource))
            .await
            .unwrap();
        assert!(handle.local_addr().port() > 0);

        let url = format!("http://{}/health", handle.local_addr());
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: HealthResponse = resp.json().await.unwrap();
        assert_eq!(body.status, "healthy");
        assert_eq!(body.connections, 0);
        assert!(!body.draining);
    }

    #[tokio::test]
    async fn invalid_settings_refuse_to_start() {
        let settings = ServerSettings {
            mailbox_capacity: 0,
            ..test_settings()
        };
        let err = start(settings, Arc::new(ClockPayloadSource))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Settings(_)));
    }

    #[tokio::test]
    async fn occupied_port_reports_bind_error() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let settings = ServerSettings {
            port: taken.local_addr().unwrap().port(),
            ..test_settings()
        };
        let err = start(settings, Arc::new(ClockPayloadSource))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn ws_url_uses_loopback_for_unspecified_host() {
        let state = AppState::new(ServerSettings::default(), Arc::new(ClockPayloadSource));
        let handle = ServerHandle {
            local_addr: "0.0.0.0:9000".parse().unwrap(),
            state,
            server: tokio::spawn(async {}),
        };
        assert_eq!(handle.ws_url(), "ws://127.0.0.1:9000/ws");
    }

    #[tokio::test]
    async fn shutdown_without_sessions_stops_acceptor() {
        let settings = ServerSettings {
            shutdown: wsdrain_core::ShutdownSettings {
                drain_window_ms: 50,
                ..Default::default()
            },
            ..test_settings()
        };
        let handle = start(settings, Arc::new(ClockPayloadSource)).await.unwrap();
        let addr = handle.local_addr();

        let report = handle.shutdown_with(TrailingCount::Fixed(1)).await;
        assert!(report.completed.is_empty());
        assert!(report.torn_down.is_empty());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn join_by_aborts_stragglers() {
        let mut task = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(300)).await;
        });
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(50);
        assert!(join_by(&mut task, deadline).await.is_none());
    }

    #[tokio::test]
    async fn join_by_returns_finished_output() {
        let mut task = tokio::spawn(async { 7 });
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        assert_eq!(join_by(&mut task, deadline).await.unwrap().unwrap(), 7);
    }

    #[test]
    fn draining_follows_the_token() {
        let state = AppState::new(ServerSettings::default(), Arc::new(ClockPayloadSource));
        assert!(!state.is_draining());
        state.shutdown.cancel();
        assert!(state.is_draining());
    }

    #[test]
    fn build_router_creates_routes() {
        let state = AppState::new(ServerSettings::default(), Arc::new(ClockPayloadSource));
        let _router = build_router(state);
    }
}
