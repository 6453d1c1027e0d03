//! Market manager types

use crate::ledger::LedgerError;
use crate::market::MarketError;
use crate::math::MathError;
use crate::oracle::OracleError;
use crate::types::{Address, MarketId, OracleKey};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Market manager errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("This action cannot be performed while the contract is paused")]
    Paused,
    #[error("Market creation is disabled")]
    CreationDisabled,
    #[error("Invalid key")]
    InvalidKey(OracleKey),
    #[error("Maturity has to be in the future")]
    MaturityInPast,
    #[error("Maturity too far in the future")]
    MaturityTooFar,
    #[error("Insufficient capital")]
    InsufficientCapital { provided: Decimal, required: Decimal },
    #[error("Strike price must be positive")]
    InvalidStrike(Decimal),
    #[error("Not an active market")]
    NotActiveMarket(MarketId),
    #[error("Market no longer exists")]
    MarketNotFound(MarketId),
    #[error("Market {0} listed more than once")]
    DuplicateMarket(MarketId),
    #[error("Only the contract owner may perform this action")]
    Unauthorized(Address),
    #[error("Total fee must be less than 100%.")]
    FeeTooHigh,
    #[error("Total fee must be nonzero.")]
    ZeroFee,
    #[error(transparent)]
    Market(#[from] MarketError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Arguments of `create_market`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMarket {
    pub oracle_key: OracleKey,
    pub strike_price: Decimal,
    pub maturity: DateTime<Utc>,
    /// Gross collateral minted into both sides for the creator
    pub initial_mint: Decimal,
}

/// Result of expiring one market
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredMarket {
    pub market: MarketId,
    /// Tracked deposit released from the manager's total
    pub released: Decimal,
}
