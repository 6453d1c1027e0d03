//! Vault types

use crate::amm::AmmError;
use crate::ledger::LedgerError;
use crate::manager::ManagerError;
use crate::math::MathError;
use crate::types::{Address, MarketId, OracleKey};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Vault errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("Vault has not started")]
    NotStarted,
    #[error("Vault has already started")]
    AlreadyStarted,
    #[error("This action cannot be performed while the contract is paused")]
    Paused,
    #[error("Invalid amount: {amount} < {minimum}")]
    DepositTooSmall { amount: Decimal, minimum: Decimal },
    #[error("Deposit amount exceeds vault cap")]
    DepositCapExceeded { cap: Decimal },
    #[error("Max number of users reached")]
    MaxUsersReached,
    #[error("Withdrawal is requested, cannot deposit")]
    WithdrawalRequested,
    #[error("Withdrawal already requested")]
    AlreadyRequested,
    #[error("Can't withdraw as you already deposited for next round")]
    DepositedForNextRound,
    #[error("Nothing to withdraw")]
    NothingToWithdraw,
    #[error("Withdrawal request has not been sent")]
    WithdrawalNotRequested,
    #[error("Withdrawal will be processed when the round closes")]
    WithdrawalPending,
    #[error("Can't close current round")]
    CannotCloseRound,
    #[error("Amount less than minimum: {amount} < {minimum}")]
    TradeTooSmall { amount: Decimal, minimum: Decimal },
    #[error("Market time not valid")]
    InvalidMarketTime(MarketId),
    #[error("Market price not valid: {0}")]
    PriceOutOfLimits(Decimal),
    #[error("Skew impact too high: {0}")]
    SkewTooHigh(Decimal),
    #[error("Amount exceeds available allocation")]
    AllocationExceeded { needed: Decimal, available: Decimal },
    #[error("Amount exceeds available allocation for asset")]
    AssetAllocationExceeded {
        category: AssetCategory,
        needed: Decimal,
        available: Decimal,
    },
    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: Decimal },
    #[error("Only the contract owner may perform this action")]
    Unauthorized(Address),
    #[error(transparent)]
    Amm(#[from] AmmError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Allocation bucket of an underlying asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetCategory {
    Eth,
    Btc,
    Other,
}

impl AssetCategory {
    pub fn of(key: &OracleKey) -> Self {
        match key.as_str() {
            "ETH" => AssetCategory::Eth,
            "BTC" => AssetCategory::Btc,
            _ => AssetCategory::Other,
        }
    }
}

impl std::fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetCategory::Eth => f.write_str("eth"),
            AssetCategory::Btc => f.write_str("btc"),
            AssetCategory::Other => f.write_str("other"),
        }
    }
}

/// Accounting of one vault round
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundState {
    /// When the round opened; `None` until it does
    pub start: Option<DateTime<Utc>>,
    /// Capital committed at the start of the round
    pub allocation: Decimal,
    /// Collateral spent on AMM trades this round
    pub spent: Decimal,
    pub spent_per_asset: BTreeMap<AssetCategory, Decimal>,
    /// Deposits queued for this round while the previous one was running
    pub deposits: Decimal,
    /// Ending value over allocation, set when the round closes
    pub profit_and_loss: Option<Decimal>,
    /// Product of all PnL factors up to and including this round
    pub cumulative_pnl: Option<Decimal>,
    /// Opening balance per depositor
    pub balances: BTreeMap<Address, Decimal>,
    pub traded_markets: BTreeSet<MarketId>,
    /// Depositors paid out by `claim` during this round
    pub claimed: BTreeSet<Address>,
}

impl RoundState {
    pub fn balance_of(&self, account: &Address) -> Decimal {
        self.balances
            .get(account)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn spent_on(&self, category: AssetCategory) -> Decimal {
        self.spent_per_asset
            .get(&category)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}
