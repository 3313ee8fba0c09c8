//! WebSocket transport for the hub connection
//!
//! Opens the socket with tokio-tungstenite and splits it:
//! - writes go through an unbounded channel drained by a dedicated writer task,
//!   so any clone of [`SocketHandle`] can send without holding the stream
//! - reads stay with the caller as a [`SocketReader`] stream
//!
//! TCP_NODELAY is set on plain sockets.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read half of an open socket
pub type SocketReader = SplitStream<Stream>;

/// Errors that can occur with WebSocket connections
#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Timeout")]
    Timeout,
    #[error("Not connected")]
    NotConnected,
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Socket opener
pub struct WebSocketConnection;

impl WebSocketConnection {
    /// Open `url`, failing if the upgrade does not complete within `open_timeout`.
    ///
    /// The upgrade request carries `user_agent`. On success the writer task is
    /// already running.
    pub async fn connect(
        url: &Url,
        user_agent: &str,
        open_timeout: Duration,
    ) -> Result<(SocketHandle, SocketReader)> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| WebSocketError::ConnectionFailed(e.to_string()))?;
        let agent = HeaderValue::from_str(user_agent)
            .map_err(|e| WebSocketError::ConnectionFailed(e.to_string()))?;
        request.headers_mut().insert(USER_AGENT, agent);

        let (stream, _) = timeout(open_timeout, connect_async(request))
            .await
            .map_err(|_| WebSocketError::Timeout)?
            .map_err(|e| WebSocketError::ConnectionFailed(e.to_string()))?;

        if let MaybeTlsStream::Plain(tcp) = stream.get_ref() {
            Self::optimize_tcp_stream(tcp)?;
        }

        let (sink, reader) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(run_writer(sink, outbound_rx, open.clone()));

        Ok((SocketHandle { outbound_tx, open }, reader))
    }

    /// Disable Nagle's algorithm
    fn optimize_tcp_stream(stream: &TcpStream) -> Result<()> {
        stream
            .set_nodelay(true)
            .map_err(|e| WebSocketError::ConnectionFailed(e.to_string()))
    }
}

/// Drain the outbound channel into the sink until a close is requested,
/// every handle is dropped, or a write fails
async fn run_writer(
    mut sink: SplitSink<Stream, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    open: Arc<AtomicBool>,
) {
    while let Some(message) = outbound_rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            crate::log_ws!(tracing::Level::DEBUG, error = %e, "socket write failed");
            break;
        }
        if closing {
            break;
        }
    }
    open.store(false, Ordering::Release);
    let _ = sink.close().await;
}

/// Cloneable write side of an open socket
#[derive(Debug, Clone)]
pub struct SocketHandle {
    outbound_tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

impl SocketHandle {
    /// Queue a frame for the writer task
    pub fn send(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(WebSocketError::NotConnected);
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| WebSocketError::ConnectionClosed)
    }

    #[inline]
    pub fn send_text(&self, text: String) -> Result<()> {
        self.send(Message::text(text))
    }

    /// Send a close frame and stop accepting writes
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.outbound_tx.send(Message::Close(None));
        }
    }

    /// Mark the socket gone after the reader observed a close or error
    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound_tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn echo_server() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(tcp).await else { return };
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_text() && ws.send(msg).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        Url::parse(&format!("ws://{addr}/")).unwrap()
    }

    #[test]
    fn test_websocket_error_display() {
        let err = WebSocketError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[tokio::test]
    async fn test_send_through_writer_task() {
        let url = echo_server().await;
        let (handle, mut reader) =
            WebSocketConnection::connect(&url, "test-agent", Duration::from_secs(2))
                .await
                .unwrap();
        assert!(handle.is_open());

        handle.clone().send_text("hello".to_string()).unwrap();
        let echoed = reader.next().await.unwrap().unwrap();
        assert_eq!(echoed.into_text().unwrap().as_str(), "hello");
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let url = echo_server().await;
        let (handle, _reader) =
            WebSocketConnection::connect(&url, "test-agent", Duration::from_secs(2))
                .await
                .unwrap();
        handle.close();
        assert!(!handle.is_open());
        assert!(matches!(
            handle.send_text("late".to_string()),
            Err(WebSocketError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{addr}/")).unwrap();
        let result = WebSocketConnection::connect(&url, "test-agent", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(WebSocketError::ConnectionFailed(_))));
    }
}
