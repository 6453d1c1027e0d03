//! Owner-only parameter changes routed to the owning component

use crate::config::AllocationLimits;
use crate::types::{Address, MarketId, OracleKey};
use rust_decimal::Decimal;
use serde::Deserialize;

/// One administrative parameter change
///
/// Durations are given in seconds, as in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "setting", rename_all = "snake_case")]
pub enum Setting {
    Paused { value: bool },
    MarketCreationEnabled { value: bool },
    CapitalRequirement { value: Decimal },
    PoolFee { value: Decimal },
    CreatorFee { value: Decimal },
    MaxTimeToMaturity { secs: u64 },
    ExpiryDuration { secs: u64 },
    MaxOraclePriceAge { secs: u64 },
    FeeAddress { address: Address },
    FeeExempt { account: Address, exempt: bool },

    AmmPaused { value: bool },
    ImpliedVolatility { key: OracleKey, volatility: Decimal },
    CapPerMarket { value: Decimal },
    CapOnMarket { market: MarketId, cap: Decimal },
    SupportedPriceRange { min: Decimal, max: Decimal },
    SpreadRange { min: Decimal, max: Decimal },
    SafeBox { address: Address, impact: Decimal },
    MinimalTimeLeftToMaturity { secs: u64 },

    VaultAllocationLimits(AllocationLimits),
    VaultPriceLimits { lower: Decimal, upper: Decimal },
    VaultUtilizationRate { value: Decimal },
    VaultSkewImpactLimit { value: Decimal },
    VaultRoundLength { secs: u64 },
    VaultDepositLimits {
        min_deposit: Decimal,
        #[serde(default)]
        max_allowed_deposit: Option<Decimal>,
        max_allowed_users: usize,
    },
}

/// Component a setting belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Manager,
    Amm,
    Vault,
}

impl Setting {
    pub fn target(&self) -> Target {
        use Setting::*;
        match self {
            Paused { .. }
            | MarketCreationEnabled { .. }
            | CapitalRequirement { .. }
            | PoolFee { .. }
            | CreatorFee { .. }
            | MaxTimeToMaturity { .. }
            | ExpiryDuration { .. }
            | MaxOraclePriceAge { .. }
            | FeeAddress { .. }
            | FeeExempt { .. } => Target::Manager,
            AmmPaused { .. }
            | ImpliedVolatility { .. }
            | CapPerMarket { .. }
            | CapOnMarket { .. }
            | SupportedPriceRange { .. }
            | SpreadRange { .. }
            | SafeBox { .. }
            | MinimalTimeLeftToMaturity { .. } => Target::Amm,
            VaultAllocationLimits(_)
            | VaultPriceLimits { .. }
            | VaultUtilizationRate { .. }
            | VaultSkewImpactLimit { .. }
            | VaultRoundLength { .. }
            | VaultDepositLimits { .. } => Target::Vault,
        }
    }
}
