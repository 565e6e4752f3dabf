//! WebSocket transport tests against a real in-process server.
//!
//! Each test spins up a one-shot `tokio-tungstenite` server that
//! verifies the subprotocol negotiation and then plays a scripted
//! remote endpoint.

#![cfg(feature = "websocket")]

use std::future::Future;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HsRequest, Response as HsResponse,
};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use protoo_peer::{connect_websocket, Error, Peer, PeerEvent, GRACEFUL_CLOSE_CODE};

type ServerWs = WebSocketStream<TcpStream>;

/// Accept exactly one connection, checking that the handshake requests
/// the protoo subprotocol, then hand the socket to `handler`.
async fn serve_once<F, Fut>(handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    // ---
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        // ---
        let (stream, _) = listener.accept().await.unwrap();

        let callback = |req: &HsRequest, mut response: HsResponse| -> Result<HsResponse, ErrorResponse> {
            let proto = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok());
            assert_eq!(proto, Some("protoo"), "client must request the protoo subprotocol");

            response.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static("protoo"),
            );
            Ok(response)
        };

        let ws = accept_hdr_async(stream, callback).await.unwrap();
        handler(ws).await;
    });

    (addr, handle)
}

async fn connect_peer(addr: SocketAddr) -> Peer {
    // ---
    let (transport, inbox) = connect_websocket(&format!("ws://{addr}/?peerId=A"))
        .await
        .unwrap();
    Peer::over_transport(transport, inbox)
}

#[tokio::test]
async fn test_request_response_over_real_socket() {
    // ---
    let (addr, server) = serve_once(|mut ws| async move {
        // ---
        let frame = ws.next().await.unwrap().unwrap();
        let raw = frame.to_text().unwrap();
        let request: Value = serde_json::from_str(raw).unwrap();

        assert_eq!(request["request"], json!(true));
        assert_eq!(request["method"], json!("hello"));
        assert_eq!(request["data"], json!({ "foo": "bar" }));

        let reply = json!({
            "response": true,
            "id": request["id"],
            "ok": true,
            "data": { "text": "hi!" },
        });
        ws.send(WsMessage::text(reply.to_string())).await.unwrap();

        // Drain until the client's close frame arrives.
        while let Some(Ok(frame)) = ws.next().await {
            if frame.is_close() {
                break;
            }
        }
    })
    .await;

    let peer = connect_peer(addr).await;

    let data = peer.request("hello", json!({ "foo": "bar" })).await.unwrap();
    assert_eq!(data, json!({ "text": "hi!" }));

    peer.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_server_initiated_request_is_answered() {
    // ---
    let (addr, server) = serve_once(|mut ws| async move {
        // ---
        let request = json!({ "request": true, "id": 21, "method": "ping", "data": {} });
        ws.send(WsMessage::text(request.to_string())).await.unwrap();

        let frame = ws.next().await.unwrap().unwrap();
        let response: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(
            response,
            json!({ "response": true, "id": 21, "ok": true, "data": { "pong": true } })
        );
    })
    .await;

    let peer = connect_peer(addr).await;
    let mut events = peer.subscribe();

    let request = match events.recv().await.unwrap() {
        PeerEvent::Request(request) => request,
        other => panic!("expected an inbound request, got {other:?}"),
    };
    peer.respond(&request, json!({ "pong": true })).await.unwrap();

    server.await.unwrap();
    peer.close().await.unwrap();
}

#[tokio::test]
async fn test_graceful_close_code_completes_without_error() {
    // ---
    let (addr, server) = serve_once(|mut ws| async move {
        // ---
        let frame = CloseFrame {
            code: CloseCode::from(GRACEFUL_CLOSE_CODE),
            reason: "logout".into(),
        };
        ws.send(WsMessage::Close(Some(frame))).await.unwrap();
        // Wait for the close handshake to finish.
        while ws.next().await.is_some() {}
    })
    .await;

    let peer = connect_peer(addr).await;
    let mut events = peer.subscribe();

    // A request left pending can never be satisfied; it is rejected
    // even though the close itself is clean.
    let issuer = peer.clone();
    let in_flight = tokio::spawn(async move { issuer.request("slow", json!({})).await });

    match events.recv().await.unwrap() {
        PeerEvent::Closed { error: None } => {}
        other => panic!("expected a clean close, got {other:?}"),
    }
    assert!(matches!(
        in_flight.await.unwrap(),
        Err(Error::ConnectionClosed) | Err(Error::Transport(_)) | Err(Error::Connection(_))
    ));

    server.await.unwrap();
}

#[tokio::test]
async fn test_abnormal_close_code_fails_the_sequence() {
    // ---
    let (addr, server) = serve_once(|mut ws| async move {
        // ---
        let frame = CloseFrame {
            code: CloseCode::Error,
            reason: "kaboom".into(),
        };
        ws.send(WsMessage::Close(Some(frame))).await.unwrap();
        while ws.next().await.is_some() {}
    })
    .await;

    let peer = connect_peer(addr).await;
    let mut events = peer.subscribe();

    match events.recv().await.unwrap() {
        PeerEvent::Closed {
            error: Some(Error::Connection(reason)),
        } => assert!(reason.contains("1011"), "unexpected reason: {reason}"),
        other => panic!("expected an abnormal close, got {other:?}"),
    }
    assert!(peer.closed());

    server.await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_is_a_connection_error() {
    // ---
    // Nothing is listening here.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    match connect_websocket(&format!("ws://{addr}/")).await {
        Err(Error::Connection(_)) => {}
        other => panic!("expected a connection error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_notifications_flow_both_ways() {
    // ---
    let (addr, server) = serve_once(|mut ws| async move {
        // ---
        let note = json!({ "notification": true, "method": "welcome", "data": {} });
        ws.send(WsMessage::text(note.to_string())).await.unwrap();

        let frame = ws.next().await.unwrap().unwrap();
        let received: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(received["notification"], json!(true));
        assert_eq!(received["method"], json!("bye"));
    })
    .await;

    let peer = connect_peer(addr).await;
    let mut events = peer.subscribe();

    match events.recv().await.unwrap() {
        PeerEvent::Notification(n) => assert_eq!(n.method, "welcome"),
        other => panic!("expected a notification, got {other:?}"),
    }

    peer.notify("bye", json!({})).await.unwrap();

    server.await.unwrap();
    peer.close().await.unwrap();
}
