//! Events produced by the feed client
//!
//! Feed payloads stay generic JSON trees with semantic key names: the key set
//! varies by feed and by server version. [`FeedEvent::typed`] projects a
//! payload onto the known fields when a caller wants numbers, not JSON.

use crate::feed::auth::AuthStage;
use crate::ws::handshake::{HandshakeError, HandshakeStep};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

/// The seven feed event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    OrderBookUpdate,
    OrderBookUpdateLite,
    SummaryDelta,
    BalanceDelta,
    OrderDelta,
    /// Result of `QueryExchangeState`
    OrderBook,
    /// Result of `QuerySummaryState`
    OrderBookSummary,
}

impl FeedKind {
    /// Kind carried by a hub method tag. Case-insensitive.
    pub fn from_method_tag(tag: &str) -> Option<Self> {
        let kind = match tag.to_ascii_lowercase().as_str() {
            "ue" => FeedKind::OrderBookUpdate,
            "ul" => FeedKind::OrderBookUpdateLite,
            "us" => FeedKind::SummaryDelta,
            "ub" => FeedKind::BalanceDelta,
            "uo" => FeedKind::OrderDelta,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FeedKind::OrderBookUpdate => "orderBookUpdate",
            FeedKind::OrderBookUpdateLite => "orderBookUpdateLite",
            FeedKind::SummaryDelta => "summaryDelta",
            FeedKind::BalanceDelta => "balanceDelta",
            FeedKind::OrderDelta => "orderDelta",
            FeedKind::OrderBook => "orderBook",
            FeedKind::OrderBookSummary => "orderBookSummary",
        }
    }
}

/// Decoded feed payload, tagged by kind
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    OrderBookUpdate(Value),
    OrderBookUpdateLite(Value),
    SummaryDelta(Value),
    BalanceDelta(Value),
    OrderDelta(Value),
    OrderBook(Value),
    OrderBookSummary(Value),
}

impl FeedEvent {
    pub fn new(kind: FeedKind, payload: Value) -> Self {
        match kind {
            FeedKind::OrderBookUpdate => FeedEvent::OrderBookUpdate(payload),
            FeedKind::OrderBookUpdateLite => FeedEvent::OrderBookUpdateLite(payload),
            FeedKind::SummaryDelta => FeedEvent::SummaryDelta(payload),
            FeedKind::BalanceDelta => FeedEvent::BalanceDelta(payload),
            FeedKind::OrderDelta => FeedEvent::OrderDelta(payload),
            FeedKind::OrderBook => FeedEvent::OrderBook(payload),
            FeedKind::OrderBookSummary => FeedEvent::OrderBookSummary(payload),
        }
    }

    pub fn kind(&self) -> FeedKind {
        match self {
            FeedEvent::OrderBookUpdate(_) => FeedKind::OrderBookUpdate,
            FeedEvent::OrderBookUpdateLite(_) => FeedKind::OrderBookUpdateLite,
            FeedEvent::SummaryDelta(_) => FeedKind::SummaryDelta,
            FeedEvent::BalanceDelta(_) => FeedKind::BalanceDelta,
            FeedEvent::OrderDelta(_) => FeedKind::OrderDelta,
            FeedEvent::OrderBook(_) => FeedKind::OrderBook,
            FeedEvent::OrderBookSummary(_) => FeedKind::OrderBookSummary,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn payload(&self) -> &Value {
        match self {
            FeedEvent::OrderBookUpdate(v)
            | FeedEvent::OrderBookUpdateLite(v)
            | FeedEvent::SummaryDelta(v)
            | FeedEvent::BalanceDelta(v)
            | FeedEvent::OrderDelta(v)
            | FeedEvent::OrderBook(v)
            | FeedEvent::OrderBookSummary(v) => v,
        }
    }

    pub fn into_payload(self) -> Value {
        match self {
            FeedEvent::OrderBookUpdate(v)
            | FeedEvent::OrderBookUpdateLite(v)
            | FeedEvent::SummaryDelta(v)
            | FeedEvent::BalanceDelta(v)
            | FeedEvent::OrderDelta(v)
            | FeedEvent::OrderBook(v)
            | FeedEvent::OrderBookSummary(v) => v,
        }
    }

    /// Project the payload onto the typed record for its kind
    pub fn typed(&self) -> Result<TypedFeedEvent, serde_json::Error> {
        let payload = self.payload();
        Ok(match self.kind() {
            FeedKind::OrderBookUpdate => {
                TypedFeedEvent::OrderBookUpdate(OrderBookDelta::deserialize(payload)?)
            }
            FeedKind::OrderBookUpdateLite => {
                TypedFeedEvent::OrderBookUpdateLite(SummaryState::deserialize(payload)?)
            }
            FeedKind::SummaryDelta => {
                TypedFeedEvent::SummaryDelta(SummaryState::deserialize(payload)?)
            }
            FeedKind::BalanceDelta => {
                TypedFeedEvent::BalanceDelta(BalanceDelta::deserialize(payload)?)
            }
            FeedKind::OrderDelta => TypedFeedEvent::OrderDelta(OrderDelta::deserialize(payload)?),
            FeedKind::OrderBook => TypedFeedEvent::OrderBook(OrderBookDelta::deserialize(payload)?),
            FeedKind::OrderBookSummary => {
                TypedFeedEvent::OrderBookSummary(SummaryState::deserialize(payload)?)
            }
        })
    }
}

/// Everything a feed client subscriber can observe
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected {
        connection_id: String,
    },
    ConnectionError {
        step: HandshakeStep,
        error: HandshakeError,
    },
    Disconnected {
        requested: bool,
    },
    /// The private feed handshake succeeded
    Authenticated,
    AuthenticationFailed {
        stage: AuthStage,
        reason: String,
    },
    Feed(FeedEvent),
}

/// Typed view of a feed payload
#[derive(Debug, Clone, PartialEq)]
pub enum TypedFeedEvent {
    OrderBookUpdate(OrderBookDelta),
    OrderBookUpdateLite(SummaryState),
    SummaryDelta(SummaryState),
    BalanceDelta(BalanceDelta),
    OrderDelta(OrderDelta),
    OrderBook(OrderBookDelta),
    OrderBookSummary(SummaryState),
}

/// Book level change. Quantity zero removes the level.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BookLevel {
    /// 0 add, 1 remove, 2 update (absent on snapshots)
    #[serde(rename = "Type", default)]
    pub kind: Option<u8>,
    pub rate: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Fill {
    #[serde(default)]
    pub fill_id: Option<u64>,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub rate: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub total: Option<Decimal>,
}

/// `orderBookUpdate` delta or `orderBook` snapshot
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderBookDelta {
    #[serde(default)]
    pub market_name: Option<String>,
    pub nonce: u64,
    #[serde(default)]
    pub buys: Vec<BookLevel>,
    #[serde(default)]
    pub sells: Vec<BookLevel>,
    #[serde(default)]
    pub fills: Vec<Fill>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MarketSummary {
    pub market_name: String,
    #[serde(default)]
    pub high: Option<Decimal>,
    #[serde(default)]
    pub low: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub last: Option<Decimal>,
    #[serde(default)]
    pub base_volume: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub prev_day: Option<Decimal>,
    #[serde(default)]
    pub open_buy_orders: Option<u64>,
    #[serde(default)]
    pub open_sell_orders: Option<u64>,
}

/// `summaryDelta`/`orderBookUpdateLite` (in `deltas`) or `orderBookSummary` (in `summaries`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryState {
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub deltas: Vec<MarketSummary>,
    #[serde(default)]
    pub summaries: Vec<MarketSummary>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Balance {
    pub currency: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub account_id: Option<u64>,
    #[serde(default)]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub available: Option<Decimal>,
    #[serde(default)]
    pub pending: Option<Decimal>,
    #[serde(default)]
    pub crypto_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BalanceDelta {
    pub nonce: u64,
    pub delta: Balance,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Order {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub order_uuid: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub quantity_remaining: Option<Decimal>,
    #[serde(default)]
    pub limit: Option<Decimal>,
    #[serde(default)]
    pub commission_paid: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub price_per_unit: Option<Decimal>,
    #[serde(default)]
    pub is_open: Option<bool>,
    #[serde(default)]
    pub cancel_initiated: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderDelta {
    #[serde(default)]
    pub account_uuid: Option<String>,
    pub nonce: u64,
    /// 0 open, 1 partial, 2 fill, 3 cancel
    #[serde(rename = "Type", default)]
    pub delta_type: Option<u8>,
    pub order: Order,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::decode::remap_keys;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_method_tags() {
        assert_eq!(FeedKind::from_method_tag("uE"), Some(FeedKind::OrderBookUpdate));
        assert_eq!(FeedKind::from_method_tag("UL"), Some(FeedKind::OrderBookUpdateLite));
        assert_eq!(FeedKind::from_method_tag("us"), Some(FeedKind::SummaryDelta));
        assert_eq!(FeedKind::from_method_tag("uB"), Some(FeedKind::BalanceDelta));
        assert_eq!(FeedKind::from_method_tag("uO"), Some(FeedKind::OrderDelta));
        assert_eq!(FeedKind::from_method_tag("uX"), None);
        assert_eq!(FeedKind::from_method_tag(""), None);
    }

    #[test]
    fn test_event_kind_roundtrip() {
        let kinds = [
            FeedKind::OrderBookUpdate,
            FeedKind::OrderBookUpdateLite,
            FeedKind::SummaryDelta,
            FeedKind::BalanceDelta,
            FeedKind::OrderDelta,
            FeedKind::OrderBook,
            FeedKind::OrderBookSummary,
        ];
        for kind in kinds {
            let event = FeedEvent::new(kind, json!({"Nonce": 1}));
            assert_eq!(event.kind(), kind);
            assert_eq!(event.payload(), &json!({"Nonce": 1}));
        }
        assert_eq!(FeedEvent::new(FeedKind::OrderBookSummary, json!(null)).name(), "orderBookSummary");
    }

    #[test]
    fn test_typed_order_book_update() {
        let payload = remap_keys(json!({
            "M": "BTC-ETH",
            "N": 1042,
            "Z": [{"TY": 0, "R": 0.07315, "Q": 12.5}],
            "S": [{"TY": 1, "R": 0.0732, "Q": 0}],
            "f": [{"FI": 7, "OT": "SELL", "R": 0.0731, "Q": 0.4, "T": 1528000000000u64}]
        }));
        let TypedFeedEvent::OrderBookUpdate(delta) =
            FeedEvent::OrderBookUpdate(payload).typed().unwrap()
        else {
            panic!("wrong projection");
        };
        assert_eq!(delta.market_name.as_deref(), Some("BTC-ETH"));
        assert_eq!(delta.nonce, 1042);
        assert_eq!(delta.buys[0].rate, dec!(0.07315));
        assert_eq!(delta.buys[0].quantity, dec!(12.5));
        assert_eq!(delta.sells[0].kind, Some(1));
        assert_eq!(delta.fills[0].fill_id, Some(7));
        assert_eq!(delta.fills[0].order_type.as_deref(), Some("SELL"));
    }

    #[test]
    fn test_typed_summary_delta() {
        let payload = remap_keys(json!({
            "N": 5,
            "D": [{"M": "BTC-LTC", "H": 0.02, "L": 0.018, "l": 0.0195, "m": 812.3, "PD": 0.019}]
        }));
        let TypedFeedEvent::SummaryDelta(state) = FeedEvent::SummaryDelta(payload).typed().unwrap()
        else {
            panic!("wrong projection");
        };
        assert_eq!(state.nonce, Some(5));
        assert_eq!(state.deltas[0].market_name, "BTC-LTC");
        assert_eq!(state.deltas[0].last, Some(dec!(0.0195)));
        assert_eq!(state.deltas[0].base_volume, Some(dec!(812.3)));
        assert!(state.summaries.is_empty());
    }

    #[test]
    fn test_typed_balance_and_order() {
        let balance = remap_keys(json!({"N": 3, "d": {"c": "BTC", "b": 1.5, "a": 1.25, "z": 0.25}}));
        let TypedFeedEvent::BalanceDelta(delta) = FeedEvent::BalanceDelta(balance).typed().unwrap()
        else {
            panic!("wrong projection");
        };
        assert_eq!(delta.delta.currency, "BTC");
        assert_eq!(delta.delta.available, Some(dec!(1.25)));

        let order = remap_keys(json!({
            "w": "acct", "N": 9, "TY": 2,
            "o": {"OU": "ord-1", "E": "BTC-ETH", "OT": "LIMIT_BUY", "Q": 1, "q": 0, "X": 0.07, "i": false}
        }));
        let TypedFeedEvent::OrderDelta(delta) = FeedEvent::OrderDelta(order).typed().unwrap() else {
            panic!("wrong projection");
        };
        assert_eq!(delta.delta_type, Some(2));
        assert_eq!(delta.order.order_uuid.as_deref(), Some("ord-1"));
        assert_eq!(delta.order.limit, Some(dec!(0.07)));
        assert_eq!(delta.order.is_open, Some(false));
    }

    #[test]
    fn test_typed_projection_rejects_wrong_shape() {
        assert!(FeedEvent::BalanceDelta(json!({"Nonce": "x"})).typed().is_err());
        assert!(FeedEvent::OrderDelta(json!({"Nonce": 1})).typed().is_err());
    }
}
