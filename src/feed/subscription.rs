//! Subscription intent and reconciliation planning
//!
//! The intent is what the caller wants to receive, independent of whether a
//! connection exists. On every connect the whole intent is turned into a list
//! of hub calls and replayed, so subscriptions survive reconnects.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Metadata for one subscribed market
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketSubscription {
    /// When this pair first entered the intent
    pub requested_at: OffsetDateTime,
}

/// Snapshot kind requested by a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryMode {
    /// Full order book of one market, emitted as `orderBook`
    OrderBook,
    /// Summary of every market, emitted as `orderBookSummary`
    Summary,
}

impl QueryMode {
    pub fn method(&self) -> &'static str {
        match self {
            QueryMode::OrderBook => "QueryExchangeState",
            QueryMode::Summary => "QuerySummaryState",
        }
    }
}

/// One-shot snapshot request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTarget {
    pub pair: String,
    pub mode: QueryMode,
}

impl QueryTarget {
    pub fn new(pair: impl Into<String>, mode: QueryMode) -> Self {
        Self {
            pair: pair.into(),
            mode,
        }
    }

    /// The summary query covers every market and takes no argument
    pub fn args(&self) -> Vec<Value> {
        match self.mode {
            QueryMode::OrderBook => vec![json!(self.pair)],
            QueryMode::Summary => Vec::new(),
        }
    }
}

/// One step of reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedCall {
    ExchangeDeltas(String),
    SummaryDeltas,
    SummaryLiteDeltas,
    Query(QueryTarget),
    /// Challenge/response handshake for the private feed
    Authenticate,
}

impl PlannedCall {
    /// Hub method of the first call this step makes
    pub fn method(&self) -> &'static str {
        match self {
            PlannedCall::ExchangeDeltas(_) => "SubscribeToExchangeDeltas",
            PlannedCall::SummaryDeltas => "SubscribeToSummaryDeltas",
            PlannedCall::SummaryLiteDeltas => "SubscribeToSummaryLiteDeltas",
            PlannedCall::Query(target) => target.mode.method(),
            PlannedCall::Authenticate => "GetAuthContext",
        }
    }
}

/// Desired steady-state subscriptions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionIntent {
    markets: BTreeMap<String, MarketSubscription>,
    markets_updated_at: Option<OffsetDateTime>,
    orders: bool,
    query: Option<QueryTarget>,
}

impl SubscriptionIntent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the market set. Pairs already present keep their metadata.
    pub fn replace_markets<I, S>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = OffsetDateTime::now_utc();
        let mut previous = std::mem::take(&mut self.markets);
        for pair in pairs {
            let pair = pair.into();
            if pair.is_empty() {
                continue;
            }
            let entry = previous
                .remove(&pair)
                .unwrap_or(MarketSubscription { requested_at: now });
            self.markets.insert(pair, entry);
        }
        self.markets_updated_at = Some(now);
    }

    pub fn markets(&self) -> impl Iterator<Item = (&str, &MarketSubscription)> + Clone {
        self.markets.iter().map(|(pair, sub)| (pair.as_str(), sub))
    }

    pub fn has_market(&self, pair: &str) -> bool {
        self.markets.contains_key(pair)
    }

    pub fn market_count(&self) -> usize {
        self.markets.len()
    }

    pub fn markets_updated_at(&self) -> Option<OffsetDateTime> {
        self.markets_updated_at
    }

    pub fn set_orders(&mut self, subscribed: bool) {
        self.orders = subscribed;
    }

    pub fn orders(&self) -> bool {
        self.orders
    }

    /// Replace any pending query
    pub fn set_query(&mut self, target: QueryTarget) {
        self.query = Some(target);
    }

    pub fn query(&self) -> Option<&QueryTarget> {
        self.query.as_ref()
    }

    /// Consume the pending query
    pub fn take_query(&mut self) -> Option<QueryTarget> {
        self.query.take()
    }

    /// Calls for a market set, grouped by kind: every exchange-delta call
    /// first, then summary, then summary-lite, one of each per pair
    pub fn market_calls<'a, I>(pairs: I) -> Vec<PlannedCall>
    where
        I: IntoIterator<Item = &'a str>,
        I::IntoIter: Clone,
    {
        let pairs = pairs.into_iter();
        let mut calls: Vec<PlannedCall> = pairs
            .clone()
            .map(|pair| PlannedCall::ExchangeDeltas(pair.to_string()))
            .collect();
        calls.extend(pairs.clone().map(|_| PlannedCall::SummaryDeltas));
        calls.extend(pairs.map(|_| PlannedCall::SummaryLiteDeltas));
        calls
    }

    /// Full call set to replay on connect: pending query, market calls, then
    /// the private feed handshake
    pub fn reconciliation_plan(&self) -> Vec<PlannedCall> {
        let mut plan = Vec::with_capacity(self.markets.len() * 3 + 2);
        if let Some(query) = &self.query {
            plan.push(PlannedCall::Query(query.clone()));
        }
        plan.extend(Self::market_calls(self.markets.keys().map(String::as_str)));
        if self.orders {
            plan.push(PlannedCall::Authenticate);
        }
        plan
    }
}
