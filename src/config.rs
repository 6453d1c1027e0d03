//! Configuration types for optmarket

use crate::types::Address;
use chrono::Duration;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Longest accepted duration setting (1000 years)
pub const MAX_DURATION_SECS: u64 = 1000 * 365 * 24 * 60 * 60;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} out of range: {secs}s exceeds {max}s", max = MAX_DURATION_SECS)]
    DurationOutOfRange { name: &'static str, secs: u64 },
}

/// Convert a seconds setting into a duration
pub fn duration_from_secs(name: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs > MAX_DURATION_SECS {
        return Err(ConfigError::DurationOutOfRange { name, secs });
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or(ConfigError::DurationOutOfRange { name, secs })
}

/// Seconds setting as a duration, clamped to [`MAX_DURATION_SECS`]
fn bounded(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Account allowed to call administrative operations
    #[serde(default = "default_owner")]
    pub owner: Address,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub amm: AmmConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

fn default_owner() -> Address {
    Address::from("owner")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            manager: ManagerConfig::default(),
            amm: AmmConfig::default(),
            vault: VaultConfig::default(),
            telemetry: TelemetryConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

/// Market manager policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Minimum initial mint when creating a market
    pub capital_requirement: Decimal,
    /// Minimum notional for any mint
    pub min_mint_amount: Decimal,
    /// Fraction of each mint retained for the fee pool
    pub pool_fee: Decimal,
    /// Fraction of each mint retained for the market creator
    pub creator_fee: Decimal,
    /// Longest allowed time between creation and maturity (seconds)
    pub max_time_to_maturity_secs: u64,
    /// Length of the Maturity phase before a market may be expired (seconds)
    pub expiry_duration_secs: u64,
    /// How old an oracle price may be, relative to maturity, at resolution (seconds)
    pub max_oracle_price_age_secs: u64,
    pub market_creation_enabled: bool,
    pub paused: bool,
    /// Receiver of pool fees
    pub fee_address: Address,
}

impl ManagerConfig {
    pub fn max_time_to_maturity(&self) -> Duration {
        bounded(self.max_time_to_maturity_secs)
    }

    pub fn expiry_duration(&self) -> Duration {
        bounded(self.expiry_duration_secs)
    }

    pub fn max_oracle_price_age(&self) -> Duration {
        bounded(self.max_oracle_price_age_secs)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            capital_requirement: Decimal::new(2, 0),
            min_mint_amount: Decimal::new(1, 2), // 0.01
            pool_fee: Decimal::new(5, 3),        // 0.5%
            creator_fee: Decimal::new(5, 3),     // 0.5%
            max_time_to_maturity_secs: 730 * 24 * 60 * 60,
            expiry_duration_secs: 26 * 7 * 24 * 60 * 60,
            max_oracle_price_age_secs: 120 * 60,
            market_creation_enabled: true,
            paused: false,
            fee_address: Address::from("fee-pool"),
        }
    }
}

/// AMM pricing and exposure parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmmConfig {
    /// Maximum net collateral the AMM commits to a single market
    pub cap_per_market: Decimal,
    /// Spread added to (buy) or removed from (sell) the fair price
    pub min_spread: Decimal,
    /// Largest skew-driven price impact
    pub max_spread: Decimal,
    /// Fee on every trade routed to the safe box
    pub safe_box_impact: Decimal,
    pub safe_box: Address,
    /// Fair prices at or below this are not traded
    pub min_supported_price: Decimal,
    /// Fair prices at or above this are not traded
    pub max_supported_price: Decimal,
    /// Trading stops this long before maturity (seconds)
    pub minimal_time_left_to_maturity_secs: u64,
    /// Annualized implied volatility per asset (0.80 = 80%)
    #[serde(default)]
    pub implied_volatility: Vec<VolatilityConfig>,
    /// Reserve minted to the AMM account at start-up
    pub initial_reserve: Decimal,
}

/// Implied volatility entry
#[derive(Debug, Clone, Deserialize)]
pub struct VolatilityConfig {
    pub key: String,
    pub volatility: Decimal,
}

impl AmmConfig {
    pub fn minimal_time_left_to_maturity(&self) -> Duration {
        bounded(self.minimal_time_left_to_maturity_secs)
    }
}

impl Default for AmmConfig {
    fn default() -> Self {
        Self {
            cap_per_market: Decimal::new(1000, 0),
            min_spread: Decimal::new(2, 2),      // 0.02
            max_spread: Decimal::new(20, 2),     // 0.20
            safe_box_impact: Decimal::new(1, 2), // 0.01
            safe_box: Address::from("safe-box"),
            min_supported_price: Decimal::new(10, 2), // 0.10
            max_supported_price: Decimal::new(90, 2), // 0.90
            minimal_time_left_to_maturity_secs: 60 * 60,
            implied_volatility: vec![],
            initial_reserve: Decimal::ZERO,
        }
    }
}

/// Pooled-capital vault parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault name; its account is `vault-<name>`
    pub name: String,
    pub round_length_secs: u64,
    pub min_deposit_amount: Decimal,
    /// Cap on total deposits queued for a round (none when absent)
    pub max_allowed_deposit: Option<Decimal>,
    pub max_allowed_users: usize,
    /// Fraction of the round allocation that may be traded
    pub utilization_rate: Decimal,
    pub min_trade_amount: Decimal,
    /// Unit quote band accepted for vault trades
    pub price_lower_limit: Decimal,
    pub price_upper_limit: Decimal,
    /// Largest accepted AMM price impact for a vault trade
    pub skew_impact_limit: Decimal,
    pub allocation_limits: AllocationLimits,
}

/// Share of the trading allocation each asset category may use
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AllocationLimits {
    pub eth: Decimal,
    pub btc: Decimal,
    pub other: Decimal,
}

impl Default for AllocationLimits {
    fn default() -> Self {
        Self {
            eth: Decimal::new(50, 2),
            btc: Decimal::new(50, 2),
            other: Decimal::new(25, 2),
        }
    }
}

impl VaultConfig {
    pub fn round_length(&self) -> Duration {
        bounded(self.round_length_secs)
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            round_length_secs: 7 * 24 * 60 * 60,
            min_deposit_amount: Decimal::ONE,
            max_allowed_deposit: None,
            max_allowed_users: 100,
            utilization_rate: Decimal::new(50, 2),
            min_trade_amount: Decimal::ONE,
            price_lower_limit: Decimal::new(5, 2),
            price_upper_limit: Decimal::new(95, 2),
            skew_impact_limit: Decimal::new(10, 2),
            allocation_limits: AllocationLimits::default(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Prometheus listener port; metrics are not exported when absent
    pub metrics_port: Option<u16>,
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,
    /// JSON format for log aggregation
    Json,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Event journal configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub output_dir: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: PathBuf::from("./journal"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot be represented as durations
    pub fn validate(&self) -> Result<(), ConfigError> {
        let manager = &self.manager;
        duration_from_secs("max_time_to_maturity_secs", manager.max_time_to_maturity_secs)?;
        duration_from_secs("expiry_duration_secs", manager.expiry_duration_secs)?;
        duration_from_secs("max_oracle_price_age_secs", manager.max_oracle_price_age_secs)?;
        duration_from_secs(
            "minimal_time_left_to_maturity_secs",
            self.amm.minimal_time_left_to_maturity_secs,
        )?;
        duration_from_secs("round_length_secs", self.vault.round_length_secs)?;
        Ok(())
    }
}
