//! Reconnect loop against real sockets.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use wsdrain_client::{ClientEvent, ConnectionState, DisconnectReason, ReconnectLoop};
use wsdrain_core::{ClientSettings, ClockPayloadSource, ServerSettings, ShutdownSettings};
use wsdrain_server::TrailingCount;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn next_matching(
    events: &mut broadcast::Receiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    timeout(TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not observed in time")
}

#[tokio::test]
async fn killed_connection_reconnects_after_delay_and_resumes_sending() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First connection: read one message, then vanish without a close frame.
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let _ = ws.next().await;
        drop(ws);

        let (tcp, _) = listener.accept().await.unwrap();
        let accepted_at = Instant::now();
        let mut ws = accept_async(tcp).await.unwrap();
        let msg = ws.next().await.unwrap().unwrap();
        (accepted_at, msg)
    });

    let client = ReconnectLoop::new(ClientSettings {
        server_url: format!("ws://{addr}/ws"),
        send_interval_ms: 50,
        reconnect_delay_ms: 300,
        ..Default::default()
    })
    .unwrap();
    let mut events = client.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(client.run(cancel.clone()));

    next_matching(&mut events, |e| matches!(e, ClientEvent::Sent(_))).await;
    let reason = next_matching(&mut events, |e| matches!(e, ClientEvent::Disconnected(_))).await;
    let disconnected_at = Instant::now();
    assert!(
        matches!(
            reason,
            ClientEvent::Disconnected(
                DisconnectReason::ReadError(_)
                    | DisconnectReason::PeerClosed
                    | DisconnectReason::WriteError(_)
            )
        ),
        "unexpected {reason:?}"
    );

    next_matching(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Connected)
    })
    .await;
    let sent = next_matching(&mut events, |e| matches!(e, ClientEvent::Sent(_))).await;
    assert!(matches!(sent, ClientEvent::Sent(ref p) if p.starts_with("Client message: ")));

    let (accepted_at, msg) = timeout(TIMEOUT, server).await.unwrap().unwrap();
    let waited = accepted_at.duration_since(disconnected_at);
    assert!(waited >= Duration::from_millis(250), "reconnected after {waited:?}");
    match msg {
        Message::Text(t) => assert!(t.as_str().starts_with("Client message: ")),
        other => panic!("expected text, got {other:?}"),
    }

    cancel.cancel();
    timeout(TIMEOUT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn server_drain_ends_connection_with_close() {
    let handle = wsdrain_server::start(
        ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            push_interval_ms: 60_000,
            shutdown: ShutdownSettings {
                pacing_ms: 20,
                drain_window_ms: 300,
                ..Default::default()
            },
            ..Default::default()
        },
        Arc::new(ClockPayloadSource),
    )
    .await
    .unwrap();

    let client = ReconnectLoop::new(ClientSettings {
        server_url: handle.ws_url(),
        send_interval_ms: 60_000,
        reconnect_delay_ms: 60_000,
        ..Default::default()
    })
    .unwrap();
    let mut events = client.subscribe();
    let state = client.state();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(client.run(cancel.clone()));

    next_matching(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Connected)
    })
    .await;
    timeout(TIMEOUT, async {
        while handle.registry().len() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let report = handle.shutdown_with(TrailingCount::Fixed(3)).await;
    assert_eq!(report.completed.len(), 1);

    assert_eq!(
        next_matching(&mut events, |e| *e == ClientEvent::ShutdownNotice).await,
        ClientEvent::ShutdownNotice
    );
    for i in 0..3 {
        let event = next_matching(&mut events, |e| matches!(e, ClientEvent::Received(_))).await;
        let ClientEvent::Received(payload) = event else {
            unreachable!()
        };
        assert!(payload.ends_with(&format!(" - {i}")), "got {payload}");
    }
    assert_eq!(
        next_matching(&mut events, |e| matches!(e, ClientEvent::Disconnected(_))).await,
        ClientEvent::Disconnected(DisconnectReason::ServerClosed)
    );

    cancel.cancel();
    timeout(TIMEOUT, task).await.unwrap().unwrap();
    assert_eq!(*state.borrow(), ConnectionState::Stopped);
}

#[tokio::test]
async fn cancel_while_connected_stops_without_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        // Client says goodbye with a close frame.
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return false,
            }
        }
    });

    let client = ReconnectLoop::new(ClientSettings {
        server_url: format!("ws://{addr}/ws"),
        send_interval_ms: 60_000,
        reconnect_delay_ms: 10,
        ..Default::default()
    })
    .unwrap();
    let mut events = client.subscribe();
    let state = client.state();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(client.run(cancel.clone()));

    next_matching(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Connected)
    })
    .await;
    cancel.cancel();
    timeout(TIMEOUT, task).await.unwrap().unwrap();

    assert_eq!(*state.borrow(), ConnectionState::Stopped);
    assert!(timeout(TIMEOUT, server).await.unwrap().unwrap());
    // Only Stopped follows; no Disconnected or reconnect attempt.
    let mut rest = Vec::new();
    while let Ok(event) = events.try_recv() {
        rest.push(event);
    }
    assert_eq!(rest, vec![ClientEvent::StateChanged(ConnectionState::Stopped)]);
}
