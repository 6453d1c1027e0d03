//! AMM types

use crate::ledger::LedgerError;
use crate::manager::ManagerError;
use crate::math::MathError;
use crate::oracle::OracleError;
use crate::types::{Address, MarketId, OracleKey, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// AMM errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmmError {
    #[error("AMM is paused")]
    Paused,
    #[error("Market is not in Trading phase")]
    NotInTradingPhase,
    #[error("Market is not in Maturity phase")]
    NotInMaturityPhase,
    #[error("No implied volatility configured for {0}")]
    UnsupportedMarket(OracleKey),
    #[error("Fair price {0} is outside the supported range")]
    UnsupportedPrice(Decimal),
    #[error("Not enough liquidity.")]
    InsufficientLiquidity {
        requested: Decimal,
        available: Decimal,
    },
    #[error("Slippage too high: quote {quote}, expected {expected}")]
    SlippageTooHigh { quote: Decimal, expected: Decimal },
    #[error("Not enough sUSD in contract.")]
    InsufficientReserve { needed: Decimal, available: Decimal },
    #[error("Amount must be positive")]
    ZeroAmount,
    #[error("Implied volatility must be between 60% and 300%: {0}")]
    InvalidVolatility(Decimal),
    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: Decimal },
    #[error("Only the contract owner may perform this action")]
    Unauthorized(Address),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Trade direction from the user's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

/// Executed AMM trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub id: Uuid,
    pub market: MarketId,
    pub side: Side,
    pub direction: TradeDirection,
    pub trader: Address,
    /// Option units traded
    pub amount: Decimal,
    /// Collateral paid (buy) or received (sell) by the trader
    pub quote: Decimal,
    /// Portion of the trade routed to the safe box
    pub safe_box_share: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Quote together with its inputs, for display and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDetails {
    /// Fair odds of the side before spread and impact
    pub price: Decimal,
    pub price_impact: Decimal,
    /// Collateral per unit after spread, impact and safe-box fee
    pub unit_price: Decimal,
    pub quote: Decimal,
    pub available: Decimal,
}
