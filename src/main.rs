//! Feed client CLI
//!
//! Subscribes to the markets given as arguments (default `BTC-ETH`), plus the
//! private order feed when credentials are configured, and logs every event
//! until Ctrl-C.

use anyhow::Context;
use signalr_feed::infrastructure::logging;
use signalr_feed::{ClientEvent, FeedClient};
use std::time::Duration;

struct FeedApp {
    client: FeedClient,
    pairs: Vec<String>,
}

impl FeedApp {
    fn new(client: FeedClient, pairs: Vec<String>) -> Self {
        Self { client, pairs }
    }

    async fn run(mut self) -> anyhow::Result<()> {
        let mut events = self
            .client
            .take_receiver()
            .context("event receiver already taken")?;

        tracing::info!(pairs = ?self.pairs, "starting feed client");
        self.client.subscribe_to_markets(self.pairs.clone())?;
        if self.client.subscribe_to_orders()? {
            tracing::info!("private order feed requested");
        }

        let mut stats = tokio::time::interval(Duration::from_secs(60));
        stats.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    log_event(&event);
                }
                _ = stats.tick() => {
                    let m = self.client.metrics();
                    tracing::info!(
                        frames = m.frames_received,
                        events = m.events_emitted,
                        decode_failures = m.decode_failures,
                        reconnects = m.reconnects,
                        rate = m.event_rate,
                        "feed stats"
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    break;
                }
            }
        }

        self.client.disconnect();
        Ok(())
    }
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::Connected { connection_id } => {
            tracing::info!(%connection_id, "connected")
        }
        ClientEvent::ConnectionError { step, error } => {
            tracing::warn!(%step, %error, "connection error")
        }
        ClientEvent::Disconnected { requested } => {
            tracing::warn!(requested, "disconnected")
        }
        ClientEvent::Authenticated => tracing::info!("authenticated"),
        ClientEvent::AuthenticationFailed { stage, reason } => {
            tracing::error!(stage = stage.as_str(), %reason, "authentication failed")
        }
        ClientEvent::Feed(feed) => {
            tracing::debug!(event = feed.name(), payload = %feed.payload(), "feed event")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = std::env::var("LOG_DIR").ok();
    let _guards = match &log_dir {
        Some(dir) => logging::init_logging(dir).context("failed to initialize logging")?,
        None => {
            logging::init_console_logging();
            Vec::new()
        }
    };

    let client = FeedClient::load()?;

    let mut pairs: Vec<String> = std::env::args().skip(1).collect();
    if pairs.is_empty() {
        pairs.push("BTC-ETH".to_string());
    }

    FeedApp::new(client, pairs).run().await
}
