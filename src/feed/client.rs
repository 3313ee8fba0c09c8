//! Feed client
//!
//! Owns the subscription intent and one connection engine at a time. Every
//! `Connected` from the engine replays the whole intent; every terminal error
//! or unrequested drop schedules a fresh engine per the reconnect policy.
//!
//! Inbound hub invocations are routed by method tag, decoded, and handed to
//! the subscriber as [`ClientEvent::Feed`] through a bounded channel. Feed
//! events that find the channel full are dropped and counted, so a stalled
//! subscriber cannot back up the engine's event queue.
//!
//! All public methods that may open a connection must run inside a tokio runtime.

use crate::feed::auth::{AuthStage, Credentials};
use crate::feed::decode::decode_value_limited;
use crate::feed::events::{ClientEvent, FeedEvent, FeedKind};
use crate::feed::subscription::{PlannedCall, QueryMode, QueryTarget, SubscriptionIntent};
use crate::infrastructure::config::Config;
use crate::infrastructure::metrics::{FeedMetrics, MetricsSnapshot};
use crate::log_feed;
use crate::ws::hub::{ConnectionEvent, HubConnection, PendingCall};
use crate::ws::ping::ConnectionHealth;
use crate::ws::protocol::HubMessage;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Level;

/// Engine currently owned by the client
struct ActiveConnection {
    generation: u64,
    hub: HubConnection,
}

struct Shared {
    config: Config,
    credentials: Option<Credentials>,
    intent: Mutex<SubscriptionIntent>,
    connection: Mutex<Option<ActiveConnection>>,
    /// Bumped for every engine created and on disconnect; stale pumps compare against it
    generation: AtomicU64,
    /// Consecutive reconnects since the last `Connected`
    reconnect_attempts: AtomicU32,
    connection_id: Mutex<Option<String>>,
    events_tx: mpsc::Sender<ClientEvent>,
    metrics: Arc<FeedMetrics>,
}

/// Realtime feed client over a single hub connection
pub struct FeedClient {
    shared: Arc<Shared>,
    events_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl FeedClient {
    /// Client using the credentials from config or environment, if any
    pub fn new(config: Config) -> Self {
        let credentials = config.auth.credentials();
        Self::with_credentials(config, credentials)
    }

    /// Client configured from `CONFIG_PATH` (default `config.toml`)
    pub fn load() -> crate::Result<Self> {
        Ok(Self::new(Config::load()?))
    }

    /// Client configured from the TOML file at `path`
    pub fn from_config_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        Ok(Self::new(Config::load_from(path)?))
    }

    pub fn with_credentials(config: Config, credentials: Option<Credentials>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.feed.event_buffer.max(1));
        let shared = Shared {
            config,
            credentials,
            intent: Mutex::new(SubscriptionIntent::new()),
            connection: Mutex::new(None),
            generation: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
            connection_id: Mutex::new(None),
            events_tx,
            metrics: Arc::new(FeedMetrics::new()),
        };
        Self {
            shared: Arc::new(shared),
            events_rx: Some(events_rx),
        }
    }

    /// Event stream. Can be taken once.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.events_rx.take()
    }

    /// Open a connection unless one already exists
    pub fn connect(&self) -> crate::Result<()> {
        if self.shared.connection.lock().is_some() {
            return Ok(());
        }
        self.shared.create_connection(None)
    }

    /// Drop the connection without reconnecting. The intent is kept.
    pub fn disconnect(&self) {
        let active = self.shared.connection.lock().take();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.connection_id.lock().take();
        if let Some(active) = active {
            log_feed!(Level::INFO, generation = active.generation, "disconnecting");
            active.hub.disconnect();
        }
    }

    /// Replace the subscribed market set with `pairs`
    pub fn subscribe_to_markets<I, S>(&self, pairs: I) -> crate::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let calls = {
            let mut intent = self.shared.intent.lock();
            intent.replace_markets(pairs);
            SubscriptionIntent::market_calls(intent.markets().map(|(pair, _)| pair))
        };
        self.shared.apply(calls)
    }

    /// Subscribe to the private order and balance feed.
    ///
    /// `Ok(false)` when no credentials are configured.
    pub fn subscribe_to_orders(&self) -> crate::Result<bool> {
        if self.shared.credentials.is_none() {
            return Ok(false);
        }
        self.shared.intent.lock().set_orders(true);
        self.shared.apply(vec![PlannedCall::Authenticate])?;
        Ok(true)
    }

    /// One-shot order book snapshot of `pair`, emitted as `orderBook`
    pub fn query_exchange_deltas(&self, pair: impl Into<String>) -> crate::Result<()> {
        self.query(QueryTarget::new(pair, QueryMode::OrderBook))
    }

    /// One-shot summary of every market, emitted as `orderBookSummary`
    pub fn query_summary_state_deltas(&self, pair: impl Into<String>) -> crate::Result<()> {
        self.query(QueryTarget::new(pair, QueryMode::Summary))
    }

    fn query(&self, target: QueryTarget) -> crate::Result<()> {
        self.shared.intent.lock().set_query(target.clone());
        self.shared.apply(vec![PlannedCall::Query(target)])
    }

    pub fn is_connected(&self) -> bool {
        self.shared
            .current_hub()
            .is_some_and(|hub| hub.is_connected())
    }

    pub fn connection_id(&self) -> Option<String> {
        self.shared.connection_id.lock().clone()
    }

    /// Snapshot of the current intent
    pub fn intent(&self) -> SubscriptionIntent {
        self.shared.intent.lock().clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn health(&self) -> Option<ConnectionHealth> {
        self.shared.current_hub().map(|hub| hub.health())
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn current_hub(&self) -> Option<HubConnection> {
        self.connection.lock().as_ref().map(|active| active.hub.clone())
    }

    /// Send `calls` now if connected, otherwise leave them to reconciliation
    fn apply(self: &Arc<Self>, calls: Vec<PlannedCall>) -> crate::Result<()> {
        match self.current_hub() {
            Some(hub) if hub.is_connected() => {
                for call in calls {
                    self.execute(&hub, call);
                }
                Ok(())
            }
            // Handshake or reconnect in progress: `Connected` replays the intent
            Some(_) => Ok(()),
            None if self.config.feed.auto_connect => self.create_connection(None),
            None => Ok(()),
        }
    }

    /// Build a new engine, replacing any previous one, and start it after `delay`
    fn create_connection(self: &Arc<Self>, delay: Option<Duration>) -> crate::Result<()> {
        let (hub, events) =
            HubConnection::new(self.config.connection.clone(), self.metrics.clone())?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.connection_id.lock().take();

        let previous = self.connection.lock().replace(ActiveConnection {
            generation,
            hub: hub.clone(),
        });
        if let Some(previous) = previous {
            previous.hub.disconnect();
        }

        let shared = self.clone();
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
                if !shared.is_current(generation) {
                    return;
                }
            }
            if let Err(e) = hub.connect() {
                log_feed!(Level::WARN, error = %e, "engine did not start");
                return;
            }
            shared.pump(generation, hub, events).await;
        });
        Ok(())
    }

    /// Forward one engine's events until it reports a terminal event
    async fn pump(
        self: Arc<Self>,
        generation: u64,
        hub: HubConnection,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Connected { connection_id } => {
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    *self.connection_id.lock() = Some(connection_id.clone());
                    log_feed!(Level::INFO, connection_id = %connection_id, "connected");
                    self.emit(ClientEvent::Connected { connection_id }).await;
                    self.reconcile(&hub);
                }
                ConnectionEvent::Data(message) => self.process_data(message),
                ConnectionEvent::ConnectionError { step, error } => {
                    self.clear_connection_id(generation);
                    self.emit(ClientEvent::ConnectionError { step, error }).await;
                    self.schedule_reconnect(generation);
                    break;
                }
                ConnectionEvent::Disconnected { requested } => {
                    self.clear_connection_id(generation);
                    self.emit(ClientEvent::Disconnected { requested }).await;
                    if !requested {
                        self.schedule_reconnect(generation);
                    }
                    break;
                }
            }
        }
    }

    fn clear_connection_id(&self, generation: u64) {
        if self.is_current(generation) {
            self.connection_id.lock().take();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let policy = &self.config.feed.reconnect;
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !policy.allows(attempt) {
            log_feed!(Level::WARN, attempt, "reconnect policy exhausted, staying disconnected");
            self.connection.lock().take();
            return;
        }

        let delay = policy.delay(attempt);
        self.metrics.record_reconnect();
        log_feed!(
            Level::INFO,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        if let Err(e) = self.create_connection(Some(delay)) {
            log_feed!(Level::ERROR, error = %e, "reconnect failed");
            self.connection.lock().take();
        }
    }

    /// Replay the full intent on a fresh connection
    fn reconcile(self: &Arc<Self>, hub: &HubConnection) {
        let plan = self.intent.lock().reconciliation_plan();
        log_feed!(Level::DEBUG, calls = plan.len(), "replaying subscriptions");
        for call in plan {
            self.execute(hub, call);
        }
    }

    fn execute(self: &Arc<Self>, hub: &HubConnection, call: PlannedCall) {
        match call {
            PlannedCall::ExchangeDeltas(ref pair) => {
                self.call(hub, call.method(), vec![json!(pair)])
            }
            PlannedCall::SummaryDeltas | PlannedCall::SummaryLiteDeltas => {
                self.call(hub, call.method(), Vec::new())
            }
            PlannedCall::Query(_) => self.run_query(hub),
            PlannedCall::Authenticate => self.authenticate(hub),
        }
    }

    fn call(&self, hub: &HubConnection, method: &str, args: Vec<Value>) {
        if let Err(e) = hub.call_method(method, args) {
            log_feed!(Level::WARN, method = %method, error = %e, "hub call not sent");
        }
    }

    /// Send the pending query, consuming it
    fn run_query(self: &Arc<Self>, hub: &HubConnection) {
        let Some(target) = self.intent.lock().take_query() else {
            return;
        };
        match hub.invoke(target.mode.method(), target.args()) {
            Ok(pending) => {
                tokio::spawn(self.clone().finish_query(target, pending));
            }
            Err(e) => {
                log_feed!(Level::WARN, pair = %target.pair, error = %e, "query not sent");
                // Keep it for the next connect unless a newer query replaced it
                let mut intent = self.intent.lock();
                if intent.query().is_none() {
                    intent.set_query(target);
                }
            }
        }
    }

    async fn finish_query(self: Arc<Self>, target: QueryTarget, pending: PendingCall) {
        let kind = match target.mode {
            QueryMode::OrderBook => FeedKind::OrderBook,
            QueryMode::Summary => FeedKind::OrderBookSummary,
        };
        let result = match pending.await {
            Ok(result) => result,
            Err(e) => {
                log_feed!(Level::WARN, pair = %target.pair, error = %e, "query failed");
                return;
            }
        };
        match decode_value_limited(&result, self.config.feed.max_payload_bytes) {
            Ok(payload) => self.emit_feed(FeedEvent::new(kind, payload)),
            Err(e) => {
                self.metrics.record_decode_failure();
                log_feed!(Level::WARN, pair = %target.pair, error = %e, "query result not decodable");
            }
        }
    }

    /// Challenge/response handshake for the private feed
    fn authenticate(self: &Arc<Self>, hub: &HubConnection) {
        let Some(credentials) = self.credentials.clone() else {
            return;
        };
        let shared = self.clone();
        let hub = hub.clone();
        tokio::spawn(async move {
            let event = match run_auth_handshake(&hub, &credentials).await {
                Ok(()) => {
                    log_feed!(Level::INFO, "private feed authenticated");
                    ClientEvent::Authenticated
                }
                Err((stage, reason)) => {
                    log_feed!(Level::WARN, stage = stage.as_str(), reason = %reason, "authentication failed");
                    ClientEvent::AuthenticationFailed { stage, reason }
                }
            };
            shared.emit(event).await;
        });
    }

    /// Route one hub invocation. Undecodable entries are dropped one by one.
    fn process_data(&self, message: HubMessage) {
        let Some(kind) = FeedKind::from_method_tag(&message.method) else {
            self.metrics.record_unknown_method();
            tracing::trace!(target: "feed", method = %message.method, "unknown method tag");
            return;
        };

        for arg in &message.args {
            let payload = match decode_value_limited(arg, self.config.feed.max_payload_bytes) {
                Ok(payload) => payload,
                Err(e) => {
                    self.metrics.record_decode_failure();
                    log_feed!(Level::DEBUG, event = kind.name(), error = %e, "dropping payload");
                    continue;
                }
            };
            if kind == FeedKind::OrderDelta && payload.get("Order").is_none() {
                tracing::trace!(target: "feed", "order delta without order");
                continue;
            }
            self.emit_feed(FeedEvent::new(kind, payload));
        }
    }

    /// Never waits: a full buffer drops the event so the engine queue keeps draining
    fn emit_feed(&self, event: FeedEvent) {
        match self.events_tx.try_send(ClientEvent::Feed(event)) {
            Ok(()) => self.metrics.record_event(),
            Err(mpsc::error::TrySendError::Full(ClientEvent::Feed(event))) => {
                self.metrics.record_dropped_event();
                tracing::trace!(target: "feed", event = event.name(), "subscriber buffer full");
            }
            Err(_) => {}
        }
    }

    /// False once the subscriber has gone away
    async fn emit(&self, event: ClientEvent) -> bool {
        self.events_tx.send(event).await.is_ok()
    }
}

async fn run_auth_handshake(
    hub: &HubConnection,
    credentials: &Credentials,
) -> Result<(), (AuthStage, String)> {
    let challenge = hub
        .invoke("GetAuthContext", vec![json!(credentials.key())])
        .map_err(|e| (AuthStage::Challenge, e.to_string()))?
        .await
        .map_err(|e| (AuthStage::Challenge, e.to_string()))?;
    let Some(challenge) = challenge.as_str() else {
        return Err((AuthStage::Challenge, format!("unexpected challenge {challenge}")));
    };

    let signature = credentials
        .sign(challenge)
        .map_err(|e| (AuthStage::Sign, e.to_string()))?;

    let accepted = hub
        .invoke(
            "Authenticate",
            vec![json!(credentials.key()), json!(signature)],
        )
        .map_err(|e| (AuthStage::Authenticate, e.to_string()))?
        .await
        .map_err(|e| (AuthStage::Authenticate, e.to_string()))?;
    if accepted == Value::Bool(false) {
        return Err((AuthStage::Authenticate, "rejected by server".to_string()));
    }
    Ok(())
}
