// src/transport/websocket.rs

//! WebSocket transport implementation.
//!
//! Wraps a `tokio-tungstenite` client connection, requesting the
//! [`WS_SUBPROTOCOL`] token during the handshake. Each text frame
//! carries exactly one serialized [`Message`]; a close with
//! [`GRACEFUL_CLOSE_CODE`] completes the inbound sequence without
//! error, anything else fails it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::macros::{log_debug, log_warn};
use crate::{Error, Inbox, Message, Result, Transport, TransportPtr};
use crate::{GRACEFUL_CLOSE_CODE, WS_SUBPROTOCOL};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct WebSocketTransport {
    // ---
    sink: Mutex<WsSink>,
    closed: AtomicBool,
}

impl WebSocketTransport {
    /// Send a close frame once; later calls are no-ops.
    async fn close_with(&self, code: u16) -> Result<()> {
        // ---
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };

        // The socket may already be gone; closing an already-dead
        // connection is not an error for the caller.
        let mut sink = self.sink.lock().await;
        let _ = sink.send(WsMessage::Close(Some(frame))).await;
        let _ = sink.flush().await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    // ---
    async fn send(&self, message: &Message) -> Result<()> {
        // ---
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::text(message.serialize()))
            .await
            .map_err(|err| Error::Transport(err.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.close_with(GRACEFUL_CLOSE_CODE).await
    }
}

/// Connect to a protoo WebSocket endpoint.
///
/// Does not complete until the socket reports itself open. The
/// handshake requests the [`WS_SUBPROTOCOL`] subprotocol.
///
/// # Errors
///
/// Returns [`Error::Connection`] if the URL is invalid or the
/// handshake fails.
pub async fn connect(url: &str) -> Result<(TransportPtr, Inbox)> {
    // ---
    let mut request = url
        .into_client_request()
        .map_err(|err| Error::Connection(err.to_string()))?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(WS_SUBPROTOCOL),
    );

    let (ws, _response) = connect_async(request)
        .await
        .map_err(|err| Error::Connection(err.to_string()))?;

    let (sink, stream) = ws.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(64);

    let transport = Arc::new(WebSocketTransport {
        sink: Mutex::new(sink),
        closed: AtomicBool::new(false),
    });

    tokio::spawn(read_loop(stream, inbound_tx, transport.clone()));

    Ok((transport as TransportPtr, inbound_rx))
}

/// Pump inbound frames into the inbox until the connection terminates.
///
/// Dropping the sender is what completes the inbound sequence; an
/// `Err` item immediately before that marks the termination abnormal.
async fn read_loop(
    mut stream: WsStream,
    inbound: mpsc::Sender<Result<Message>>,
    transport: Arc<WebSocketTransport>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match Message::parse(text.as_str()) {
                Ok(message) => {
                    if inbound.send(Ok(message)).await.is_err() {
                        // Inbox dropped; nobody is listening anymore.
                        break;
                    }
                }
                Err(err) => {
                    // A malformed frame means the connection is
                    // unreliable; tear it down.
                    log_warn!("malformed inbound frame: {err}");
                    let _ = inbound.send(Err(err)).await;
                    let _ = transport.close_with(u16::from(CloseCode::Invalid)).await;
                    break;
                }
            },
            Ok(WsMessage::Close(frame)) => {
                let code = frame
                    .as_ref()
                    .map(|f| u16::from(f.code))
                    .unwrap_or_default();
                if code != GRACEFUL_CLOSE_CODE {
                    let reason = frame
                        .as_ref()
                        .map(|f| f.reason.as_str().to_owned())
                        .unwrap_or_default();
                    let _ = inbound
                        .send(Err(Error::Connection(format!(
                            "closed with code {code}: {reason}"
                        ))))
                        .await;
                }
                log_debug!("websocket closed (code {code})");
                transport.closed.store(true, Ordering::SeqCst);
                break;
            }
            // Pings are answered by tungstenite itself; binary frames
            // are not part of the protocol.
            Ok(_) => {}
            Err(err) => {
                if !transport.closed.load(Ordering::SeqCst) {
                    let _ = inbound.send(Err(Error::Connection(err.to_string()))).await;
                }
                break;
            }
        }
    }
}
