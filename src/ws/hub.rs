//! Hub connection engine
//!
//! Owns one socket for its whole life: NEW -> CONNECTING -> {CONNECTED | DISCONNECTED}.
//! An engine is never reused; reconnecting means building a new one.
//!
//! Responsibilities:
//! - drive negotiate/connect/start with per-phase retry, abandoning the
//!   handshake as soon as the state leaves CONNECTING
//! - number outbound hub calls and route result frames back to their caller
//! - forward every multicast entry as [`ConnectionEvent::Data`], in server order
//! - answer pings and record pongs
//!
//! Lifecycle and data are reported through an unbounded event channel so the
//! reader loop never waits on a slow consumer.

use crate::infrastructure::config::ConnectionConfig;
use crate::infrastructure::metrics::FeedMetrics;
use crate::log_ws;
use crate::ws::connection::{SocketHandle, SocketReader, WebSocketConnection};
use crate::ws::handshake::{
    self, endpoints, HandshakeContext, HandshakeError, HandshakeStep, PhaseOutcome,
};
use crate::ws::ping::{ConnectionHealth, LivenessTracker};
use crate::ws::protocol::{parse_frame, HubInvocation, HubMessage, InboundFrame, MessageId};
use crate::FeedError;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
}

/// What the engine reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// All three phases completed
    Connected { connection_id: String },
    /// Terminal handshake failure, or the socket dropped before start completed
    ConnectionError {
        step: HandshakeStep,
        error: HandshakeError,
    },
    /// One hub invocation from a multicast frame
    Data(HubMessage),
    /// Connection gone after CONNECTED, or torn down mid-handshake by `disconnect()`
    Disconnected { requested: bool },
}

/// Failure of a hub call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("hub error: {0}")]
    Remote(String),
    /// The connection dropped before the server replied
    #[error("call abandoned")]
    Abandoned,
}

type CallResult = std::result::Result<Value, CallError>;

/// Result of a call made with [`HubConnection::invoke`]
#[derive(Debug)]
pub struct PendingCall {
    id: MessageId,
    rx: oneshot::Receiver<CallResult>,
}

impl PendingCall {
    pub fn id(&self) -> MessageId {
        self.id
    }
}

impl Future for PendingCall {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CallError::Abandoned)))
    }
}

struct Inner {
    config: ConnectionConfig,
    http: reqwest::Client,
    state: Mutex<ConnectionState>,
    /// Fired once, when the engine leaves CONNECTING/CONNECTED
    cancel: CancellationToken,
    socket: Mutex<Option<SocketHandle>>,
    context: Mutex<Option<HandshakeContext>>,
    pending: Mutex<HashMap<MessageId, oneshot::Sender<CallResult>>>,
    next_id: AtomicU64,
    liveness: LivenessTracker,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    metrics: Arc<FeedMetrics>,
}

/// Handle to one hub connection. Clones share the same engine.
#[derive(Clone)]
pub struct HubConnection {
    inner: Arc<Inner>,
}

impl HubConnection {
    pub fn new(
        config: ConnectionConfig,
        metrics: Arc<FeedMetrics>,
    ) -> crate::Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FeedError::Http(e.to_string()))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Inner {
            liveness: LivenessTracker::new(config.ping_timeout()),
            config,
            http,
            state: Mutex::new(ConnectionState::New),
            cancel: CancellationToken::new(),
            socket: Mutex::new(None),
            context: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events_tx,
            metrics,
        };
        Ok((Self { inner: Arc::new(inner) }, events_rx))
    }

    /// Start the handshake in the background.
    ///
    /// Fails with [`FeedError::AlreadyActive`] unless the engine is NEW. The
    /// outcome arrives as `Connected` or `ConnectionError`.
    pub fn connect(&self) -> crate::Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != ConnectionState::New {
                return Err(FeedError::AlreadyActive);
            }
            *state = ConnectionState::Connecting;
        }
        log_ws!(Level::INFO, hub = %self.inner.config.hub, "connecting");
        tokio::spawn(self.inner.clone().run_handshake());
        Ok(())
    }

    /// Tear the connection down. Idempotent.
    ///
    /// In-flight handshake phases resolve as no-ops and pending calls resolve
    /// with [`CallError::Abandoned`].
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            let previous = *state;
            *state = ConnectionState::Disconnected;
            if matches!(previous, ConnectionState::Connecting | ConnectionState::Connected) {
                log_ws!(Level::INFO, from = ?previous, "disconnect requested");
                self.inner.emit(ConnectionEvent::Disconnected { requested: true });
            }
        }
        self.inner.teardown();
    }

    /// Fire-and-forget hub call. Returns the message id used.
    pub fn call_method(&self, method: &str, args: Vec<Value>) -> Result<MessageId, CallError> {
        self.inner.send_invocation(method, args, None)
    }

    /// Hub call whose result is awaited through the returned [`PendingCall`]
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> Result<PendingCall, CallError> {
        let (tx, rx) = oneshot::channel();
        let id = self.inner.send_invocation(method, args, Some(tx))?;
        Ok(PendingCall { id, rx })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Negotiated connection id, once negotiate has completed
    pub fn connection_id(&self) -> Option<String> {
        self.inner
            .context
            .lock()
            .as_ref()
            .map(|ctx| ctx.connection_id.clone())
    }

    pub fn handshake_context(&self) -> Option<HandshakeContext> {
        self.inner.context.lock().clone()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.inner.liveness.health()
    }

    /// Calls still waiting for a result frame
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl Inner {
    fn emit(&self, event: ConnectionEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.events_tx.send(event);
    }

    fn is_connecting(&self) -> bool {
        *self.state.lock() == ConnectionState::Connecting
    }

    /// Cancel the handshake, close the socket, forget per-connection state
    fn teardown(&self) {
        self.cancel.cancel();
        if let Some(socket) = self.socket.lock().take() {
            socket.close();
        }
        self.context.lock().take();
        // Dropping the senders resolves every PendingCall with Abandoned
        self.pending.lock().clear();
        self.liveness.reset();
    }

    async fn run_handshake(self: Arc<Self>) {
        match self.handshake().await {
            Ok(PhaseOutcome::Done(connection_id)) => {
                log_ws!(Level::INFO, connection_id = %connection_id, "hub connected");
            }
            Ok(PhaseOutcome::Ignored) => {
                log_ws!(Level::DEBUG, "handshake abandoned");
            }
            Err((step, error)) => self.fail(step, error),
        }
    }

    async fn handshake(
        self: &Arc<Self>,
    ) -> Result<PhaseOutcome<String>, (HandshakeStep, HandshakeError)> {
        let config = &self.config;

        let negotiated = match handshake::with_retry(
            HandshakeStep::Negotiate,
            &config.retry,
            &self.cancel,
            || handshake::negotiate(&self.http, config),
        )
        .await
        {
            Ok(PhaseOutcome::Done(negotiated)) => negotiated,
            Ok(PhaseOutcome::Ignored) => return Ok(PhaseOutcome::Ignored),
            Err(error) => return Err((HandshakeStep::Negotiate, error)),
        };
        let mut context = HandshakeContext::from_negotiate(negotiated, config);
        *self.context.lock() = Some(context.clone());
        log_ws!(
            Level::DEBUG,
            step = "negotiate",
            connection_id = %context.connection_id,
            protocol = %context.protocol_version,
            "phase complete"
        );

        let opened = {
            let ctx = &context;
            handshake::with_retry(HandshakeStep::Connect, &config.retry, &self.cancel, || async move {
                let url = endpoints::connect_url(config, ctx, endpoints::tid())?;
                let open_timeout = ctx.socket_open_timeout(config);
                let opened =
                    WebSocketConnection::connect(&url, &config.user_agent, open_timeout).await?;
                Ok::<_, HandshakeError>(opened)
            })
            .await
        };
        let (socket, reader) = match opened {
            Ok(PhaseOutcome::Done(opened)) => opened,
            Ok(PhaseOutcome::Ignored) => return Ok(PhaseOutcome::Ignored),
            Err(error) => return Err((HandshakeStep::Connect, error)),
        };
        context.timestamps.connect = Some(OffsetDateTime::now_utc());
        {
            let mut slot = self.socket.lock();
            // A disconnect may have run teardown between the phase and here
            if !self.is_connecting() {
                socket.close();
                return Ok(PhaseOutcome::Ignored);
            }
            *slot = Some(socket.clone());
        }
        tokio::spawn(self.clone().read_loop(reader, socket));
        log_ws!(Level::DEBUG, step = "connect", "phase complete");

        match handshake::with_retry(HandshakeStep::Start, &config.retry, &self.cancel, || {
            handshake::start(&self.http, config, &context)
        })
        .await
        {
            Ok(PhaseOutcome::Done(())) => {}
            Ok(PhaseOutcome::Ignored) => return Ok(PhaseOutcome::Ignored),
            Err(error) => return Err((HandshakeStep::Start, error)),
        }
        context.timestamps.start = Some(OffsetDateTime::now_utc());

        let mut state = self.state.lock();
        if *state != ConnectionState::Connecting || self.cancel.is_cancelled() {
            return Ok(PhaseOutcome::Ignored);
        }
        *state = ConnectionState::Connected;
        let connection_id = context.connection_id.clone();
        *self.context.lock() = Some(context);
        self.emit(ConnectionEvent::Connected {
            connection_id: connection_id.clone(),
        });
        Ok(PhaseOutcome::Done(connection_id))
    }

    fn fail(&self, step: HandshakeStep, error: HandshakeError) {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Connecting {
                return;
            }
            *state = ConnectionState::Disconnected;
            log_ws!(Level::ERROR, step = step.as_str(), error = %error, "handshake failed");
            self.emit(ConnectionEvent::ConnectionError { step, error });
        }
        self.teardown();
    }

    async fn read_loop(self: Arc<Self>, mut reader: SocketReader, socket: SocketHandle) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle_text(text),
                    Err(_) => self.metrics.record_dropped_frame(),
                },
                Some(Ok(Message::Ping(payload))) => {
                    self.liveness.record_ping();
                    if let Err(e) = socket.send(Message::Pong(payload)) {
                        log_ws!(Level::DEBUG, error = %e, "pong not sent");
                    }
                }
                Some(Ok(Message::Pong(_))) => self.liveness.record_pong(),
                Some(Ok(Message::Close(frame))) => {
                    log_ws!(Level::INFO, frame = ?frame, "server closed socket");
                    break;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    log_ws!(Level::WARN, error = %e, "socket read failed");
                    break;
                }
                None => break,
            }
        }
        socket.mark_closed();
        self.on_socket_closed();
    }

    fn on_socket_closed(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Connected => {
                    self.emit(ConnectionEvent::Disconnected { requested: false });
                }
                ConnectionState::Connecting => {
                    self.emit(ConnectionEvent::ConnectionError {
                        step: HandshakeStep::Start,
                        error: HandshakeError::Client {
                            message: "socket closed before start completed".to_string(),
                        },
                    });
                }
                ConnectionState::New | ConnectionState::Disconnected => return,
            }
            *state = ConnectionState::Disconnected;
        }
        self.teardown();
    }

    fn handle_text(&self, text: &str) {
        self.metrics.record_frame();
        self.liveness.record_activity();

        if *self.state.lock() != ConnectionState::Connected {
            tracing::trace!(target: "ws", "frame before connected, ignored");
            return;
        }

        match parse_frame(text) {
            Ok(InboundFrame::Result { id, result }) => self.resolve(id, Ok(result)),
            Ok(InboundFrame::Error { id, message }) => {
                log_ws!(Level::WARN, message_id = id, error = %message, "hub call failed");
                self.resolve(id, Err(CallError::Remote(message)));
            }
            Ok(InboundFrame::Progress { id }) => {
                tracing::trace!(target: "ws", message_id = id, "progress frame ignored");
            }
            Ok(InboundFrame::Multicast(messages)) => {
                for message in messages {
                    self.metrics.record_invocation();
                    self.emit(ConnectionEvent::Data(message));
                }
            }
            Ok(InboundFrame::KeepAlive) | Ok(InboundFrame::Other) => {}
            Err(e) => {
                self.metrics.record_dropped_frame();
                log_ws!(Level::DEBUG, error = %e, "dropping malformed frame");
            }
        }
    }

    fn resolve(&self, id: MessageId, result: CallResult) {
        match self.pending.lock().remove(&id) {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                tracing::trace!(target: "ws", message_id = id, "no pending call for result");
            }
        }
    }

    fn send_invocation(
        &self,
        method: &str,
        args: Vec<Value>,
        reply: Option<oneshot::Sender<CallResult>>,
    ) -> Result<MessageId, CallError> {
        if *self.state.lock() != ConnectionState::Connected {
            return Err(CallError::NotConnected);
        }
        let socket = self
            .socket
            .lock()
            .clone()
            .filter(SocketHandle::is_open)
            .ok_or(CallError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = HubInvocation::new(&self.config.hub, method, args, id)
            .to_text()
            .map_err(|e| CallError::SendFailed(e.to_string()))?;

        if let Some(reply) = reply {
            self.pending.lock().insert(id, reply);
            // Teardown may have cleared the map between the state check and the insert
            if *self.state.lock() != ConnectionState::Connected {
                self.pending.lock().remove(&id);
                return Err(CallError::NotConnected);
            }
        }

        if let Err(e) = socket.send_text(text) {
            self.pending.lock().remove(&id);
            return Err(CallError::SendFailed(e.to_string()));
        }

        self.metrics.record_call();
        log_ws!(Level::DEBUG, message_id = id, method = %method, "hub call sent");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockHub, TIMEOUT};
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::assert_ok;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
        tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for engine event")
            .expect("event channel closed")
    }

    async fn connected(hub: &MockHub) -> (HubConnection, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (engine, mut events) =
            HubConnection::new(hub.config().connection, Arc::new(FeedMetrics::new())).unwrap();
        assert_ok!(engine.connect());
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::Connected { connection_id: "abc".into() }
        );
        (engine, events)
    }

    #[tokio::test]
    async fn test_handshake_reaches_connected() {
        let hub = MockHub::start().await;
        let (engine, _events) = connected(&hub).await;

        assert_eq!(engine.state(), ConnectionState::Connected);
        assert_eq!(engine.connection_id().as_deref(), Some("abc"));

        let uris = hub.connect_uris();
        assert_eq!(uris.len(), 1);
        assert!(uris[0].starts_with("/connect?"));
        assert!(uris[0].contains("connectionToken=tok"));
        assert!(uris[0].contains("transport=webSockets"));
        assert!(uris[0].contains("tid="));

        let ctx = engine.handshake_context().unwrap();
        assert!(ctx.timestamps.negotiate.is_some());
        assert!(ctx.timestamps.connect.is_some());
        assert!(ctx.timestamps.start.is_some());

        let paths: Vec<_> = hub
            .http
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(paths, ["/negotiate", "/start"]);
    }

    #[tokio::test]
    async fn test_connect_twice_is_already_active() {
        let hub = MockHub::start().await;
        let (engine, _events) = connected(&hub).await;
        assert!(matches!(engine.connect(), Err(FeedError::AlreadyActive)));
    }

    #[tokio::test]
    async fn test_call_before_connected_sends_nothing() {
        let mut hub = MockHub::start().await;
        let (engine, mut events) =
            HubConnection::new(hub.config().connection, Arc::new(FeedMetrics::new())).unwrap();

        assert_eq!(
            engine.call_method("SubscribeToSummaryDeltas", vec![]),
            Err(CallError::NotConnected)
        );
        assert!(matches!(engine.invoke("QuerySummaryState", vec![]), Err(CallError::NotConnected)));

        engine.connect().unwrap();
        next_event(&mut events).await;
        assert_eq!(engine.call_method("SubscribeToSummaryDeltas", vec![]), Ok(1));

        // First frame the server sees is the call made after connecting
        let frame = hub.next_frame().await;
        assert_eq!(frame, json!({"H": "c2", "M": "subscribetosummarydeltas", "A": [], "I": 1}));
    }

    #[tokio::test]
    async fn test_results_matched_by_id_out_of_order() {
        let mut hub = MockHub::start_with(|_| Vec::new()).await;
        let (engine, _events) = connected(&hub).await;

        let first = engine.invoke("QueryExchangeState", vec![json!("BTC-ETH")]).unwrap();
        let second = engine.invoke("QueryExchangeState", vec![json!("BTC-LTC")]).unwrap();
        let third = engine.invoke("QuerySummaryState", vec![]).unwrap();
        assert_eq!((first.id(), second.id(), third.id()), (1, 2, 3));
        for _ in 0..3 {
            hub.next_frame().await;
        }
        assert_eq!(engine.pending_calls(), 3);

        hub.push(r#"{"I":"3","R":"third"}"#);
        hub.push(r#"{"I":1,"R":"first"}"#);
        hub.push(r#"{"I":"2","R":"second"}"#);

        assert_eq!(first.await, Ok(json!("first")));
        assert_eq!(second.await, Ok(json!("second")));
        assert_eq!(third.await, Ok(json!("third")));
        assert_eq!(engine.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_error_and_void_results() {
        let mut hub = MockHub::start_with(|_| Vec::new()).await;
        let (engine, _events) = connected(&hub).await;

        let failing = engine.invoke("Authenticate", vec![json!("k"), json!("sig")]).unwrap();
        let void = engine.invoke("SubscribeToExchangeDeltas", vec![json!("BTC-ETH")]).unwrap();
        hub.next_frame().await;
        hub.next_frame().await;

        hub.push(r#"{"I":"1","D":{"progress":1}}"#);
        hub.push(r#"{"I":"1","E":"Unauthorized"}"#);
        hub.push(r#"{"I":"2"}"#);

        assert_eq!(failing.await, Err(CallError::Remote("Unauthorized".into())));
        assert_eq!(void.await, Ok(Value::Null));
    }

    #[tokio::test]
    async fn test_multicast_entries_emitted_in_order() {
        let hub = MockHub::start().await;
        let (_engine, mut events) = connected(&hub).await;

        hub.push("{}");
        hub.push("{not json");
        hub.push(r#"{"C":"d-1","M":[{"H":"C2","M":"uE","A":["x"]},{"H":"C2","M":"uS","A":["y"]}]}"#);

        let ConnectionEvent::Data(first) = next_event(&mut events).await else {
            panic!("expected data");
        };
        let ConnectionEvent::Data(second) = next_event(&mut events).await else {
            panic!("expected data");
        };
        assert_eq!(first.method, "uE");
        assert_eq!(first.args, vec![json!("x")]);
        assert_eq!(second.method, "uS");
    }

    #[tokio::test]
    async fn test_disconnect_during_negotiate_never_connects() {
        let hub = MockHub::start_bare(|_| Vec::new()).await;
        Mock::given(method("GET"))
            .and(path("/negotiate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(MockHub::negotiate_body())
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&hub.http)
            .await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&hub.http)
            .await;

        let (engine, mut events) =
            HubConnection::new(hub.config().connection, Arc::new(FeedMetrics::new())).unwrap();
        engine.connect().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.disconnect();

        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::Disconnected { requested: true }
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
        assert!(hub.connect_uris().is_empty());
    }

    #[tokio::test]
    async fn test_negotiate_exhaustion_emits_connection_error() {
        let hub = MockHub::start_bare(|_| Vec::new()).await;
        Mock::given(method("GET"))
            .and(path("/negotiate"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&hub.http)
            .await;

        let (engine, mut events) =
            HubConnection::new(hub.config().connection, Arc::new(FeedMetrics::new())).unwrap();
        engine.connect().unwrap();

        match next_event(&mut events).await {
            ConnectionEvent::ConnectionError { step, error } => {
                assert_eq!(step, HandshakeStep::Negotiate);
                assert_eq!(error.code(), Some(500));
                assert_eq!(error.origin(), handshake::ErrorOrigin::Remote);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_absurd_transport_timeout_still_connects() {
        let hub = MockHub::start_bare(|_| Vec::new()).await;
        let mut body = MockHub::negotiate_body();
        body["TransportConnectTimeout"] = json!(1e300);
        Mock::given(method("GET"))
            .and(path("/negotiate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&hub.http)
            .await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Response": "started"})))
            .mount(&hub.http)
            .await;

        let (engine, _events) = connected(&hub).await;
        let ctx = engine.handshake_context().unwrap();
        assert_eq!(
            ctx.transport_connect_timeout,
            Some(handshake::MAX_TRANSPORT_CONNECT_TIMEOUT)
        );
    }

    #[tokio::test]
    async fn test_disconnect_abandons_pending_calls() {
        let mut hub = MockHub::start_with(|_| Vec::new()).await;
        let (engine, mut events) = connected(&hub).await;

        let call = engine.invoke("GetAuthContext", vec![json!("key")]).unwrap();
        hub.next_frame().await;
        engine.disconnect();

        assert_eq!(call.await, Err(CallError::Abandoned));
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::Disconnected { requested: true }
        );
        assert_eq!(engine.call_method("GetAuthContext", vec![]), Err(CallError::NotConnected));
        // Idempotent
        engine.disconnect();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_close_emits_disconnected() {
        let hub = MockHub::start().await;
        let (engine, mut events) = connected(&hub).await;

        hub.close_connections();
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::Disconnected { requested: false }
        );
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert!(engine.connection_id().is_none());
    }

    #[tokio::test]
    async fn test_ping_is_recorded() {
        let hub = MockHub::start().await;
        let (engine, _events) = connected(&hub).await;

        hub.push_message(Message::Ping(bytes::Bytes::from_static(b"hb")));
        tokio::time::timeout(TIMEOUT, async {
            while engine.health().pings_answered == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("ping never observed");
        assert!(engine.health().since_last_activity.is_some());
    }
}
