//! Terse protocol key aliases
//!
//! The hub compresses field names of every delta payload down to one or two
//! characters. This table maps them back to descriptive names. Lookups are
//! case-sensitive: `M` is MarketName while `m` is BaseVolume.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Every known terse key and its semantic name
pub const KEY_ALIASES: &[(&str, &str)] = &[
    ("A", "Ask"),
    ("a", "Available"),
    ("B", "Bid"),
    ("b", "Balance"),
    ("C", "Closed"),
    ("c", "Currency"),
    ("CI", "CancelInitiated"),
    ("D", "Deltas"),
    ("d", "Delta"),
    ("DT", "OrderDeltaType"),
    ("E", "Exchange"),
    ("e", "ExchangeDeltaType"),
    ("F", "FillType"),
    ("FI", "FillId"),
    ("f", "Fills"),
    ("G", "OpenBuyOrders"),
    ("g", "OpenSellOrders"),
    ("H", "High"),
    ("h", "AutoSell"),
    ("I", "Id"),
    ("i", "IsOpen"),
    ("J", "Condition"),
    ("j", "ConditionTarget"),
    ("K", "ImmediateOrCancel"),
    ("k", "IsConditionTriggered"),
    ("L", "Low"),
    ("l", "Last"),
    ("M", "MarketName"),
    ("m", "BaseVolume"),
    ("N", "Nonce"),
    ("n", "CommissionPaid"),
    ("O", "Orders"),
    ("o", "Order"),
    ("OT", "OrderType"),
    ("OU", "OrderUuid"),
    ("P", "Price"),
    ("p", "CryptoAddress"),
    ("PD", "PrevDay"),
    ("PU", "PricePerUnit"),
    ("Q", "Quantity"),
    ("q", "QuantityRemaining"),
    ("R", "Rate"),
    ("r", "Requested"),
    ("S", "Sells"),
    ("s", "Summaries"),
    ("T", "TimeStamp"),
    ("t", "Total"),
    ("TY", "Type"),
    ("U", "Uuid"),
    ("u", "Updated"),
    ("V", "Volume"),
    ("W", "AccountId"),
    ("w", "AccountUuid"),
    ("X", "Limit"),
    ("x", "Created"),
    ("Y", "Opened"),
    ("y", "State"),
    ("Z", "Buys"),
    ("z", "Pending"),
];

static ALIAS_TABLE: OnceLock<KeyAliasTable> = OnceLock::new();

/// Process-wide, immutable terse-key lookup
pub struct KeyAliasTable {
    lookup: HashMap<&'static str, &'static str>,
}

impl KeyAliasTable {
    fn new() -> Self {
        Self {
            lookup: KEY_ALIASES.iter().copied().collect(),
        }
    }

    /// Shared table, built on first use
    pub fn global() -> &'static Self {
        ALIAS_TABLE.get_or_init(Self::new)
    }

    /// Semantic name for a terse key
    #[inline]
    pub fn resolve(&self, key: &str) -> Option<&'static str> {
        self.lookup.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}
