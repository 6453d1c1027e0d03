//! Scenario files for the `simulate` command
//!
//! A scenario sets a start time and initial prices, then lists steps that
//! are applied in order to a fresh exchange driven by a manual clock.
//! Markets are numbered from 1 in creation order. Account names `manager`,
//! `amm` and `vault` refer to the exchange's internal accounts.

use crate::clock::ManualClock;
use crate::config::Config;
use crate::engine::{Exchange, Setting};
use crate::manager::CreateMarket;
use crate::oracle::StaticOracle;
use crate::types::{Address, MarketId, OracleKey, Side};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Parsed scenario file
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub prices: Vec<InitialPrice>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitialPrice {
    pub key: OracleKey,
    pub price: Decimal,
}

fn default_slippage() -> Decimal {
    Decimal::new(1, 2)
}

/// One scenario action
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Fund {
        account: String,
        amount: Decimal,
    },
    /// Collateral allowance; unlimited when `amount` is omitted
    Approve {
        owner: String,
        spender: String,
        #[serde(default)]
        amount: Option<Decimal>,
    },
    ApproveOptions {
        owner: String,
        market: MarketId,
        side: Side,
        #[serde(default = "amm_name")]
        spender: String,
        #[serde(default)]
        amount: Option<Decimal>,
    },
    /// Publish a price observed at the current clock time
    SetPrice {
        key: OracleKey,
        price: Decimal,
    },
    Advance {
        #[serde(default)]
        days: i64,
        #[serde(default)]
        hours: i64,
        #[serde(default)]
        secs: i64,
    },
    CreateMarket {
        creator: String,
        key: OracleKey,
        strike: Decimal,
        /// Maturity relative to the current clock time
        maturity_hours: i64,
        initial_mint: Decimal,
    },
    Mint {
        account: String,
        market: MarketId,
        amount: Decimal,
    },
    Resolve {
        market: MarketId,
    },
    Exercise {
        account: String,
        market: MarketId,
    },
    BurnOptions {
        account: String,
        market: MarketId,
        amount: Decimal,
    },
    /// Expire markets as the owner
    Expire {
        markets: Vec<MarketId>,
    },
    /// Buy at the current quote with a slippage allowance
    Buy {
        account: String,
        market: MarketId,
        side: Side,
        amount: Decimal,
        #[serde(default = "default_slippage")]
        slippage: Decimal,
    },
    Sell {
        account: String,
        market: MarketId,
        side: Side,
        amount: Decimal,
        #[serde(default = "default_slippage")]
        slippage: Decimal,
    },
    AmmExercise {
        market: MarketId,
    },
    Deposit {
        account: String,
        amount: Decimal,
    },
    StartVault,
    VaultTrade {
        market: MarketId,
        side: Side,
        amount: Decimal,
    },
    CloseRound,
    WithdrawalRequest {
        account: String,
    },
    Claim {
        account: String,
    },
    /// Owner-only parameter change
    Configure(Setting),
}

fn amm_name() -> String {
    "amm".to_string()
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Fund { .. } => "fund",
            Step::Approve { .. } => "approve",
            Step::ApproveOptions { .. } => "approve_options",
            Step::SetPrice { .. } => "set_price",
            Step::Advance { .. } => "advance",
            Step::CreateMarket { .. } => "create_market",
            Step::Mint { .. } => "mint",
            Step::Resolve { .. } => "resolve",
            Step::Exercise { .. } => "exercise",
            Step::BurnOptions { .. } => "burn_options",
            Step::Expire { .. } => "expire",
            Step::Buy { .. } => "buy",
            Step::Sell { .. } => "sell",
            Step::AmmExercise { .. } => "amm_exercise",
            Step::Deposit { .. } => "deposit",
            Step::StartVault => "start_vault",
            Step::VaultTrade { .. } => "vault_trade",
            Step::CloseRound => "close_round",
            Step::WithdrawalRequest { .. } => "withdrawal_request",
            Step::Claim { .. } => "claim",
            Step::Configure(_) => "configure",
        }
    }
}

/// Result of one applied step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub index: usize,
    pub action: &'static str,
    pub at: DateTime<Utc>,
    /// Human-readable result, or the rejection message
    pub result: Result<String, String>,
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Exchange plus the handles a scenario drives it with
pub struct Simulation {
    pub exchange: Exchange,
    pub oracle: Arc<StaticOracle>,
    pub clock: Arc<ManualClock>,
}

impl Simulation {
    pub fn new(config: &Config, scenario: &Scenario) -> anyhow::Result<Self> {
        let oracle = Arc::new(StaticOracle::new());
        for price in &scenario.prices {
            oracle.set_price(price.key.clone(), price.price, scenario.start);
        }
        let clock = Arc::new(ManualClock::new(scenario.start));
        let exchange = Exchange::new(config, oracle.clone(), clock.clone())?;
        Ok(Self {
            exchange,
            oracle,
            clock,
        })
    }

    /// Map a scenario account name to an address
    pub fn address(&self, name: &str) -> Address {
        match name {
            "manager" => Address::manager(),
            "amm" => self.exchange.amm().account().clone(),
            "vault" => self.exchange.vault().account().clone(),
            "owner" => self.exchange.owner().clone(),
            other => Address::new(other),
        }
    }

    /// Apply every step; rejected steps are recorded and do not stop the run
    pub fn run(&mut self, steps: &[Step]) -> Vec<StepOutcome> {
        steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let at = self.exchange.now();
                let result = self.apply(step).map_err(|e| e.to_string());
                if let Err(error) = &result {
                    tracing::info!(index, action = step.name(), %error, "Scenario step rejected");
                }
                StepOutcome {
                    index,
                    action: step.name(),
                    at,
                    result,
                }
            })
            .collect()
    }

    /// Apply one step
    pub fn apply(&mut self, step: &Step) -> anyhow::Result<String> {
        let owner = self.exchange.owner().clone();
        match step {
            Step::Fund { account, amount } => {
                let account = self.address(account);
                self.exchange.fund(&account, *amount)?;
                Ok(format!("{} funded with {}", account, amount))
            }
            Step::Approve {
                owner: holder,
                spender,
                amount,
            } => {
                let (holder, spender) = (self.address(holder), self.address(spender));
                let amount = amount.unwrap_or(Decimal::MAX);
                self.exchange.approve_collateral(&holder, &spender, amount)?;
                Ok(format!("{} approved {}", holder, spender))
            }
            Step::ApproveOptions {
                owner: holder,
                market,
                side,
                spender,
                amount,
            } => {
                let (holder, spender) = (self.address(holder), self.address(spender));
                let amount = amount.unwrap_or(Decimal::MAX);
                self.exchange
                    .approve_options(*market, *side, &holder, &spender, amount)?;
                Ok(format!("{} approved {} on {} {}", holder, spender, market, side))
            }
            Step::SetPrice { key, price } => {
                self.oracle.set_price(key.clone(), *price, self.exchange.now());
                Ok(format!("{} = {}", key, price))
            }
            Step::Advance { days, hours, secs } => {
                let target = offset(*days, *hours, *secs)
                    .and_then(|by| self.exchange.now().checked_add_signed(by))
                    .ok_or_else(|| anyhow::anyhow!("Clock advance out of range"))?;
                self.clock.set(target);
                Ok(format!("now {}", self.exchange.now()))
            }
            Step::CreateMarket {
                creator,
                key,
                strike,
                maturity_hours,
                initial_mint,
            } => {
                let creator = self.address(creator);
                let maturity = Duration::try_hours(*maturity_hours)
                    .and_then(|by| self.exchange.now().checked_add_signed(by))
                    .ok_or_else(|| anyhow::anyhow!("Maturity out of range"))?;
                let id = self.exchange.create_market(
                    &creator,
                    CreateMarket {
                        oracle_key: key.clone(),
                        strike_price: *strike,
                        maturity,
                        initial_mint: *initial_mint,
                    },
                )?;
                Ok(format!("market {} created", id))
            }
            Step::Mint {
                account,
                market,
                amount,
            } => {
                let account = self.address(account);
                let outcome = self.exchange.mint(&account, *market, *amount)?;
                Ok(format!("minted {} of each side", outcome.minted))
            }
            Step::Resolve { market } => {
                let resolution = self.exchange.resolve_market(*market)?;
                Ok(format!(
                    "{} at {}",
                    resolution.result, resolution.final_price
                ))
            }
            Step::Exercise { account, market } => {
                let account = self.address(account);
                let paid = self.exchange.exercise_options(&account, *market)?;
                Ok(format!("paid {}", paid))
            }
            Step::BurnOptions {
                account,
                market,
                amount,
            } => {
                let account = self.address(account);
                let burned = self.exchange.burn_options(&account, *market, *amount)?;
                Ok(format!("redeemed {}", burned))
            }
            Step::Expire { markets } => {
                let expired = self.exchange.expire_markets(&owner, markets)?;
                let released: Decimal = expired.iter().map(|e| e.released).sum();
                Ok(format!("{} expired, released {}", expired.len(), released))
            }
            Step::Buy {
                account,
                market,
                side,
                amount,
                slippage,
            } => {
                let account = self.address(account);
                let quote = self.exchange.buy_from_amm_quote(*market, *side, *amount)?;
                let receipt = self.exchange.buy_from_amm(
                    &account, *market, *side, *amount, quote, *slippage,
                )?;
                Ok(format!("bought {} {} for {}", receipt.amount, side, receipt.quote))
            }
            Step::Sell {
                account,
                market,
                side,
                amount,
                slippage,
            } => {
                let account = self.address(account);
                let quote = self.exchange.sell_to_amm_quote(*market, *side, *amount)?;
                let receipt = self.exchange.sell_to_amm(
                    &account, *market, *side, *amount, quote, *slippage,
                )?;
                Ok(format!("sold {} {} for {}", receipt.amount, side, receipt.quote))
            }
            Step::AmmExercise { market } => {
                let paid = self.exchange.exercise_matured_market(*market)?;
                Ok(format!("AMM received {}", paid))
            }
            Step::Deposit { account, amount } => {
                let account = self.address(account);
                self.exchange.deposit(&account, *amount)?;
                Ok(format!("{} deposited {}", account, amount))
            }
            Step::StartVault => {
                self.exchange.start_vault(&owner)?;
                Ok(format!(
                    "round 1 allocation {}",
                    self.exchange.vault().allocation(1)
                ))
            }
            Step::VaultTrade {
                market,
                side,
                amount,
            } => {
                let quote = self.exchange.vault_trade(&owner, *market, *side, *amount)?;
                Ok(format!("vault bought {} {} for {}", amount, side, quote))
            }
            Step::CloseRound => {
                let round = self.exchange.vault().round();
                let pnl = self.exchange.close_round()?;
                Ok(format!("round {} closed, pnl {}", round, pnl))
            }
            Step::WithdrawalRequest { account } => {
                let account = self.address(account);
                self.exchange.withdrawal_request(&account)?;
                Ok(format!("{} requested withdrawal", account))
            }
            Step::Claim { account } => {
                let account = self.address(account);
                let amount = self.exchange.claim(&account)?;
                Ok(format!("{} claimed {}", account, amount))
            }
            Step::Configure(setting) => {
                self.exchange.configure(&owner, setting.clone())?;
                Ok(format!("{:?}", setting))
            }
        }
    }
}

fn offset(days: i64, hours: i64, secs: i64) -> Option<Duration> {
    Duration::try_days(days)?
        .checked_add(&Duration::try_hours(hours)?)?
        .checked_add(&Duration::try_seconds(secs)?)
}
