//! Market types

use crate::ledger::LedgerError;
use crate::math::MathError;
use crate::oracle::OracleError;
use crate::types::{Address, MarketId, OracleKey, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Market errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    #[error("Not in Trading phase")]
    NotInTradingPhase,
    #[error("Not yet mature")]
    NotYetMature,
    #[error("Not an active market")]
    NotActiveMarket,
    #[error("Price is stale: published {published}, oldest accepted {oldest_accepted}")]
    StalePrice {
        published: DateTime<Utc>,
        oldest_accepted: DateTime<Utc>,
    },
    #[error("Balance < minimum mint amount: {amount} < {minimum}")]
    MintTooSmall { amount: Decimal, minimum: Decimal },
    #[error("Nothing to exercise")]
    NothingToExercise,
    #[error("Unexpired options remaining")]
    UnexpiredOptionsRemaining,
    #[error("Market is not resolved")]
    NotResolved,
    #[error("Insufficient options: needed {needed}, available {available}")]
    InsufficientOptions { needed: Decimal, available: Decimal },
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Lifecycle phase derived from the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Minting and AMM trading allowed
    Trading,
    /// Matured; can be resolved and exercised
    Maturity,
    /// Past expiry; can be destroyed
    Expiry,
}

/// Fee schedule fixed at market creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fees {
    /// Fraction of each gross mint kept for the fee pool
    pub pool_fee: Decimal,
    /// Fraction of each gross mint kept for the creator
    pub creator_fee: Decimal,
}

impl Fees {
    pub fn total(&self) -> Decimal {
        self.pool_fee + self.creator_fee
    }
}

/// Settlement fixed by `resolve`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub final_price: Decimal,
    pub final_timestamp: DateTime<Utc>,
    pub result: Side,
}

/// Everything the factory needs to build a market
#[derive(Debug, Clone)]
pub struct MarketParams {
    pub id: MarketId,
    pub creator: Address,
    pub oracle_key: OracleKey,
    pub strike_price: Decimal,
    pub maturity: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub fees: Fees,
}

/// Collateral split of one mint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintOutcome {
    /// Units of each side credited to the minter (also added to `deposited`)
    pub minted: Decimal,
    pub pool_fee: Decimal,
    pub creator_fee: Decimal,
}

impl MintOutcome {
    pub(crate) fn empty() -> Self {
        Self {
            minted: Decimal::ZERO,
            pool_fee: Decimal::ZERO,
            creator_fee: Decimal::ZERO,
        }
    }
}

/// Per-holder option balances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptionBalances {
    pub long: Decimal,
    pub short: Decimal,
}

impl OptionBalances {
    pub fn of(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.long,
            Side::Short => self.short,
        }
    }
}
