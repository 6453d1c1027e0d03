//! Shared identifiers and enums

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier on the collateral and option ledgers
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create an address from any string
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The zero address (mint source / burn sink)
    pub fn zero() -> Self {
        Self("0x0".to_string())
    }

    /// Collateral account of a market
    pub fn market(id: MarketId) -> Self {
        Self(format!("market-{}", id.0))
    }

    /// Account the manager pulls collateral through
    pub fn manager() -> Self {
        Self("market-manager".to_string())
    }

    /// AMM inventory account
    pub fn amm() -> Self {
        Self("amm".to_string())
    }

    /// Vault account
    pub fn vault(name: &str) -> Self {
        Self(format!("vault-{}", name))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == "0x0"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Stable handle of a market in the manager's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(pub u64);

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Priced asset identifier (e.g. "BTC")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct OracleKey(String);

impl OracleKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OracleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OracleKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OracleKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<OracleKey> for String {
    fn from(key: OracleKey) -> Self {
        key.0
    }
}

/// Side of a market. Long pays out when the final price is at or above the strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Long / Up
    #[serde(alias = "up")]
    Long,
    /// Short / Down
    #[serde(alias = "down")]
    Short,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Outcome of a final price against a strike. Ties resolve Long.
    pub fn from_prices(final_price: rust_decimal::Decimal, strike: rust_decimal::Decimal) -> Self {
        if final_price >= strike {
            Side::Long
        } else {
            Side::Short
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("long"),
            Side::Short => f.write_str("short"),
        }
    }
}

/// Which fungible ledger a balance or transfer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "market", rename_all = "lowercase")]
pub enum TokenId {
    /// sUSD-equivalent collateral
    Collateral,
    Long(MarketId),
    Short(MarketId),
}

impl TokenId {
    pub fn option(market: MarketId, side: Side) -> Self {
        match side {
            Side::Long => TokenId::Long(market),
            Side::Short => TokenId::Short(market),
        }
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenId::Collateral => f.write_str("sUSD"),
            TokenId::Long(id) => write!(f, "long{}", id),
            TokenId::Short(id) => write!(f, "short{}", id),
        }
    }
}
