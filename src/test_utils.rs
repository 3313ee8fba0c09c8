//! Test utilities: payload encoding and an in-process hub server
//!
//! [`MockHub`] serves negotiate/start over wiremock and the socket over a local
//! tokio-tungstenite listener. Every client frame is forwarded to the test and
//! passed to a responder closure whose return values are sent back as frames.

use crate::infrastructure::config::{Config, ReconnectConfig, RetryConfig};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Upper bound for any single wait in async tests
pub const TIMEOUT: Duration = Duration::from_secs(3);

/// base64(raw deflate(json)), the shape the hub uses for every payload
pub fn encode_payload(json: &str) -> String {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes()).unwrap();
    STANDARD.encode(encoder.finish().unwrap())
}

type Responder = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

/// Replies `{"I": id, "R": true}` to every call
pub fn ack_all(frame: &Value) -> Vec<String> {
    match frame.get("I") {
        Some(id) => vec![json!({"I": id.to_string(), "R": true}).to_string()],
        None => Vec::new(),
    }
}

pub struct MockHub {
    pub http: MockServer,
    ws_addr: SocketAddr,
    frames_rx: mpsc::UnboundedReceiver<Value>,
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
    connect_uris: Arc<Mutex<Vec<String>>>,
}

impl MockHub {
    /// Hub acking every call
    pub async fn start() -> Self {
        Self::start_with(ack_all).await
    }

    /// Hub with default negotiate/start endpoints and a custom responder
    pub async fn start_with<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> Vec<String> + Send + Sync + 'static,
    {
        let hub = Self::start_bare(responder).await;
        Mock::given(method("GET"))
            .and(path("/negotiate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Self::negotiate_body()))
            .mount(&hub.http)
            .await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Response": "started"})))
            .mount(&hub.http)
            .await;
        hub
    }

    /// Hub with no HTTP mocks mounted
    pub async fn start_bare<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> Vec<String> + Send + Sync + 'static,
    {
        let http = MockServer::start().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = listener.local_addr().unwrap();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(Mutex::new(Vec::new()));
        let connect_uris = Arc::new(Mutex::new(Vec::new()));
        let responder: Responder = Arc::new(responder);

        let conns = connections.clone();
        let uris = connect_uris.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let uris = uris.clone();
                let record = move |req: &Request, resp: Response| {
                    uris.lock().push(req.uri().to_string());
                    Ok::<_, ErrorResponse>(resp)
                };
                let Ok(ws) = accept_hdr_async(tcp, record).await else {
                    continue;
                };
                let (push_tx, push_rx) = mpsc::unbounded_channel();
                conns.lock().push(push_tx);
                tokio::spawn(serve(ws, push_rx, frames_tx.clone(), responder.clone()));
            }
        });

        Self {
            http,
            ws_addr,
            frames_rx,
            connections,
            connect_uris,
        }
    }

    pub fn negotiate_body() -> Value {
        json!({
            "Url": "/signalr",
            "ConnectionId": "abc",
            "ConnectionToken": "tok",
            "ProtocolVersion": "1.5",
            "TransportConnectTimeout": 5.0,
            "KeepAliveTimeout": 20.0,
            "TryWebSockets": true,
        })
    }

    /// Client config pointed at this hub, with fast retries and reconnects
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.connection.http_base = self.http.uri();
        config.connection.ws_base = format!("ws://{}", self.ws_addr);
        config.connection.retry = RetryConfig {
            max_retries: 2,
            min_delay_ms: 10,
            max_delay_ms: 20,
            factor: 2.0,
        };
        config.feed.reconnect = ReconnectConfig {
            enabled: true,
            initial_delay_ms: 20,
            max_delay_ms: 50,
            factor: 2.0,
            max_attempts: Some(3),
        };
        config
    }

    /// Send a text frame on the most recent connection
    pub fn push(&self, text: &str) {
        self.push_message(Message::text(text.to_string()));
    }

    pub fn push_message(&self, message: Message) {
        if let Some(conn) = self.connections.lock().last() {
            let _ = conn.send(message);
        }
    }

    /// Close every open socket from the server side
    pub fn close_connections(&self) {
        for conn in self.connections.lock().iter() {
            let _ = conn.send(Message::Close(None));
        }
    }

    /// Request URIs of every socket upgrade, oldest first
    pub fn connect_uris(&self) -> Vec<String> {
        self.connect_uris.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Next frame sent by the client
    pub async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(TIMEOUT, self.frames_rx.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("frame channel closed")
    }

    /// The next `n` client frames
    pub async fn frames(&mut self, n: usize) -> Vec<Value> {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            frames.push(self.next_frame().await);
        }
        frames
    }

    /// Frames that arrive within `window`
    pub async fn drain_frames(&mut self, window: Duration) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout(window, self.frames_rx.recv()).await {
            frames.push(frame);
        }
        frames
    }
}

async fn serve<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    mut push_rx: mpsc::UnboundedReceiver<Message>,
    frames_tx: mpsc::UnboundedSender<Value>,
    responder: Responder,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            inbound = stream.next() => {
                let Some(Ok(message)) = inbound else { break };
                let Message::Text(text) = message else { continue };
                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                let replies = responder(&frame);
                let _ = frames_tx.send(frame);
                for reply in replies {
                    if sink.send(Message::text(reply)).await.is_err() {
                        return;
                    }
                }
            }
            pushed = push_rx.recv() => {
                let Some(message) = pushed else { break };
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::decode::decode_raw;

    #[test]
    fn test_encode_payload_decodes() {
        let encoded = encode_payload(r#"{"N":1}"#);
        assert_eq!(decode_raw(&encoded).unwrap(), json!({"N": 1}));
    }

    #[test]
    fn test_ack_all() {
        assert_eq!(ack_all(&json!({"H": "c2", "M": "x", "A": [], "I": 4})), vec![r#"{"I":"4","R":true}"#]);
        assert!(ack_all(&json!({"H": "c2"})).is_empty());
    }
}
