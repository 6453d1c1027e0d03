//! Transactional exchange
//!
//! [`Exchange`] owns the manager, the AMM, the vault and the collateral
//! ledger. Every state-changing call runs against a copy of that state and
//! is committed only if it succeeds, so a rejected operation has no effect
//! and emits no events.

mod admin;
mod shared;

pub use admin::{Setting, Target};
pub use shared::SharedExchange;

use crate::amm::{Amm, AmmError, QuoteDetails, TradeReceipt};
use crate::clock::Clock;
use crate::config::{duration_from_secs, Config, ConfigError};
use crate::context::{Snapshot, Tx};
use crate::events::{EventLog, EventRecord};
use crate::ledger::{LedgerError, TokenLedger};
use crate::manager::{CreateMarket, ExpiredMarket, ManagerError, MarketManager};
use crate::market::{Market, MintOutcome, Resolution};
use crate::oracle::{CachedOracle, PriceOracle};
use crate::telemetry::{record_operation, set_gauge, GaugeMetric, Outcome};
use crate::types::{Address, MarketId, Side, TokenId};
use crate::vault::{Vault, VaultError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors surfaced by the exchange
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error(transparent)]
    Amm(#[from] AmmError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Component state replaced wholesale on commit
#[derive(Debug, Clone)]
struct Components {
    manager: MarketManager,
    amm: Amm,
    vault: Vault,
}

/// All markets, the AMM and the vault behind one transactional API
///
/// Every state-changing call clones the full component state and the
/// collateral ledger before running, so its cost grows with the number of
/// live markets and holders. Large simulations should expire settled
/// markets to keep that state small.
pub struct Exchange {
    owner: Address,
    components: Components,
    collateral: TokenLedger,
    events: EventLog,
    oracle: Arc<dyn PriceOracle>,
    clock: Arc<dyn Clock>,
}

impl Exchange {
    /// Build an exchange from configuration
    ///
    /// The AMM is registered as fee exempt, pre-approves the manager for
    /// minting and receives `amm.initial_reserve`; the vault pre-approves
    /// the AMM for its trades.
    pub fn new(
        config: &Config,
        oracle: Arc<dyn PriceOracle>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let owner = config.owner.clone();
        let mut manager = MarketManager::new(owner.clone(), config.manager.clone());
        let amm = Amm::new(owner.clone(), config.amm.clone())?;
        let vault = Vault::new(owner.clone(), config.vault.clone());
        manager.register_fee_exempt(amm.account().clone());

        let mut collateral = TokenLedger::new(TokenId::Collateral);
        let mut bootstrap = Vec::new();
        collateral.approve(amm.account(), &Address::manager(), Decimal::MAX, &mut bootstrap)?;
        collateral.approve(vault.account(), amm.account(), Decimal::MAX, &mut bootstrap)?;
        if config.amm.initial_reserve > Decimal::ZERO {
            collateral.mint(amm.account(), config.amm.initial_reserve, &mut bootstrap)?;
        }

        let mut events = EventLog::new();
        events.commit(clock.now(), bootstrap);

        tracing::info!(
            %owner,
            amm_reserve = %config.amm.initial_reserve,
            vault = %vault.account(),
            "Exchange initialized"
        );

        Ok(Self {
            owner,
            components: Components {
                manager,
                amm,
                vault,
            },
            collateral,
            events,
            oracle,
            clock,
        })
    }

    /// Run `op` against a copy of the state and commit it on success
    fn transact<T, E>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Components, &mut Tx<'_>) -> Result<T, E>,
    ) -> Result<T, EngineError>
    where
        EngineError: From<E>,
    {
        let started = Instant::now();
        let now = self.clock.now();
        let mut components = self.components.clone();
        let mut collateral = self.collateral.clone();
        let oracle = CachedOracle::new(self.oracle.as_ref());

        let result = {
            let mut tx = Tx::new(now, &oracle, &mut collateral);
            f(&mut components, &mut tx).map(|value| (value, tx.into_events()))
        };

        match result {
            Ok((value, events)) => {
                self.components = components;
                self.collateral = collateral;
                self.events.commit(now, events);
                record_operation(op, Outcome::Committed, started.elapsed());
                self.update_gauges();
                Ok(value)
            }
            Err(e) => {
                let err = EngineError::from(e);
                tracing::warn!(op, error = %err, "Operation rejected");
                record_operation(op, Outcome::Rejected, started.elapsed());
                Err(err)
            }
        }
    }

    fn update_gauges(&self) {
        let manager = &self.components.manager;
        set_gauge(
            GaugeMetric::TotalDeposited,
            crate::math::to_f64(manager.total_deposited()),
        );
        set_gauge(GaugeMetric::ActiveMarkets, manager.active_markets().len() as f64);
        set_gauge(GaugeMetric::MaturedMarkets, manager.matured_markets().len() as f64);
        set_gauge(GaugeMetric::VaultRound, self.components.vault.round() as f64);
        set_gauge(GaugeMetric::EventLogLength, self.events.len() as f64);
    }

    /// Run a read-only view at the current clock instant
    ///
    /// Like [`Exchange::transact`], the oracle is read at most once per key
    /// for the whole view.
    fn view<T>(&self, f: impl FnOnce(&Components, Snapshot<'_>) -> T) -> T {
        let oracle = CachedOracle::new(self.oracle.as_ref());
        let snapshot = Snapshot {
            now: self.clock.now(),
            oracle: &oracle,
            collateral: &self.collateral,
        };
        f(&self.components, snapshot)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn manager(&self) -> &MarketManager {
        &self.components.manager
    }

    pub fn amm(&self) -> &Amm {
        &self.components.amm
    }

    pub fn vault(&self) -> &Vault {
        &self.components.vault
    }

    pub fn market(&self, id: MarketId) -> Result<&Market, EngineError> {
        Ok(self.components.manager.market(id)?)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Committed events from `sequence` onwards
    pub fn events_since(&self, sequence: u64) -> &[EventRecord] {
        self.events.since(sequence)
    }

    pub fn collateral_balance(&self, account: &Address) -> Decimal {
        self.collateral.balance_of(account)
    }

    pub fn collateral_allowance(&self, owner: &Address, spender: &Address) -> Decimal {
        self.collateral.allowance(owner, spender)
    }

    pub fn option_balance(&self, id: MarketId, side: Side, account: &Address) -> Decimal {
        self.components
            .manager
            .market(id)
            .map(|m| m.balances_of(account).of(side))
            .unwrap_or(Decimal::ZERO)
    }

    // Collateral

    /// Credit freshly minted collateral to `account`
    pub fn fund(&mut self, account: &Address, amount: Decimal) -> Result<(), EngineError> {
        self.transact("fund", |_, tx| {
            tx.collateral.mint(account, amount, &mut tx.events)
        })
    }

    pub fn approve_collateral(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        self.transact("approve_collateral", |_, tx| {
            tx.collateral.approve(owner, spender, amount, &mut tx.events)
        })
    }

    pub fn transfer_collateral(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        self.transact("transfer_collateral", |_, tx| {
            tx.collateral.transfer(from, to, amount, &mut tx.events)
        })
    }

    // Markets

    pub fn create_market(
        &mut self,
        creator: &Address,
        request: CreateMarket,
    ) -> Result<MarketId, EngineError> {
        self.transact("create_market", |c, tx| {
            c.manager.create_market(tx, creator, request)
        })
    }

    pub fn mint(
        &mut self,
        minter: &Address,
        id: MarketId,
        amount: Decimal,
    ) -> Result<MintOutcome, EngineError> {
        self.transact("mint", |c, tx| c.manager.mint(tx, minter, id, amount))
    }

    pub fn can_resolve(&self, id: MarketId) -> Result<bool, EngineError> {
        Ok(self.view(|c, snapshot| c.manager.can_resolve(snapshot, id))?)
    }

    pub fn resolve_market(&mut self, id: MarketId) -> Result<Resolution, EngineError> {
        self.transact("resolve_market", |c, tx| c.manager.resolve_market(tx, id))
    }

    /// Winning side, frozen once resolved and live from the oracle before
    pub fn result(&self, id: MarketId) -> Result<Side, EngineError> {
        self.view(|c, snapshot| {
            let market = c.manager.market(id)?;
            market
                .result(snapshot)
                .map_err(|e| EngineError::Manager(e.into()))
        })
    }

    pub fn exercise_options(&mut self, account: &Address, id: MarketId) -> Result<Decimal, EngineError> {
        self.transact("exercise_options", |c, tx| {
            c.manager.exercise_options(tx, account, id)
        })
    }

    pub fn burn_options(
        &mut self,
        account: &Address,
        id: MarketId,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        self.transact("burn_options", |c, tx| {
            c.manager.burn_options(tx, account, id, amount)
        })
    }

    pub fn expire_markets(
        &mut self,
        caller: &Address,
        ids: &[MarketId],
    ) -> Result<Vec<ExpiredMarket>, EngineError> {
        self.transact("expire_markets", |c, tx| {
            c.manager.expire_markets(tx, caller, ids)
        })
    }

    pub fn transfer_options(
        &mut self,
        id: MarketId,
        side: Side,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        self.transact("transfer_options", |c, tx| {
            c.manager.transfer_options(tx, id, side, from, to, amount)
        })
    }

    pub fn approve_options(
        &mut self,
        id: MarketId,
        side: Side,
        owner: &Address,
        spender: &Address,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        self.transact("approve_options", |c, tx| {
            c.manager.approve_options(tx, id, side, owner, spender, amount)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transfer_options_from(
        &mut self,
        id: MarketId,
        side: Side,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        self.transact("transfer_options_from", |c, tx| {
            c.manager
                .transfer_options_from(tx, id, side, spender, from, to, amount)
        })
    }

    // AMM

    pub fn price(&self, id: MarketId, side: Side) -> Result<Decimal, EngineError> {
        self.view(|c, snapshot| {
            Ok(c.amm.price(snapshot, &c.manager, id, side)?)
        })
    }

    pub fn is_market_in_amm_trading(&self, id: MarketId) -> bool {
        self.view(|c, snapshot| {
            c.amm.is_market_in_amm_trading(snapshot, &c.manager, id)
        })
    }

    pub fn available_to_buy_from_amm(&self, id: MarketId, side: Side) -> Result<Decimal, EngineError> {
        self.view(|c, snapshot| {
            Ok(c.amm
                .available_to_buy_from_amm(snapshot, &c.manager, id, side)?)
        })
    }

    pub fn available_to_sell_to_amm(&self, id: MarketId, side: Side) -> Result<Decimal, EngineError> {
        self.view(|c, snapshot| {
            Ok(c.amm
                .available_to_sell_to_amm(snapshot, &c.manager, id, side)?)
        })
    }

    pub fn buy_price_impact(
        &self,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        self.view(|c, snapshot| {
            Ok(c.amm
                .buy_price_impact(snapshot, &c.manager, id, side, amount)?)
        })
    }

    pub fn sell_price_impact(
        &self,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        self.view(|c, snapshot| {
            Ok(c.amm
                .sell_price_impact(snapshot, &c.manager, id, side, amount)?)
        })
    }

    pub fn buy_quote_details(
        &self,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<QuoteDetails, EngineError> {
        self.view(|c, snapshot| {
            Ok(c.amm
                .buy_quote_details(snapshot, &c.manager, id, side, amount)?)
        })
    }

    pub fn buy_from_amm_quote(
        &self,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        Ok(self.buy_quote_details(id, side, amount)?.quote)
    }

    pub fn sell_quote_details(
        &self,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<QuoteDetails, EngineError> {
        self.view(|c, snapshot| {
            Ok(c.amm
                .sell_quote_details(snapshot, &c.manager, id, side, amount)?)
        })
    }

    pub fn sell_to_amm_quote(
        &self,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        Ok(self.sell_quote_details(id, side, amount)?.quote)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn buy_from_amm(
        &mut self,
        buyer: &Address,
        id: MarketId,
        side: Side,
        amount: Decimal,
        expected: Decimal,
        slippage: Decimal,
    ) -> Result<TradeReceipt, EngineError> {
        self.transact("buy_from_amm", |c, tx| {
            c.amm
                .buy_from_amm(tx, &mut c.manager, buyer, id, side, amount, expected, slippage)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sell_to_amm(
        &mut self,
        seller: &Address,
        id: MarketId,
        side: Side,
        amount: Decimal,
        expected: Decimal,
        slippage: Decimal,
    ) -> Result<TradeReceipt, EngineError> {
        self.transact("sell_to_amm", |c, tx| {
            c.amm
                .sell_to_amm(tx, &mut c.manager, seller, id, side, amount, expected, slippage)
        })
    }

    pub fn exercise_matured_market(&mut self, id: MarketId) -> Result<Decimal, EngineError> {
        self.transact("exercise_matured_market", |c, tx| {
            c.amm.exercise_matured_market(tx, &mut c.manager, id)
        })
    }

    // Vault

    pub fn deposit(&mut self, account: &Address, amount: Decimal) -> Result<(), EngineError> {
        self.transact("vault_deposit", |c, tx| {
            ensure_vault_open(&c.manager)?;
            c.vault.deposit(tx, account, amount)
        })
    }

    pub fn start_vault(&mut self, caller: &Address) -> Result<(), EngineError> {
        self.transact("start_vault", |c, tx| c.vault.start_vault(tx, caller))
    }

    pub fn vault_trade(
        &mut self,
        caller: &Address,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        self.transact("vault_trade", |c, tx| {
            c.vault
                .trade(tx, caller, &mut c.manager, &mut c.amm, id, side, amount)
        })
    }

    pub fn can_close_current_round(&self) -> bool {
        self.view(|c, snapshot| {
            c.vault.can_close_current_round(snapshot, &c.manager)
        })
    }

    pub fn close_round(&mut self) -> Result<Decimal, EngineError> {
        self.transact("close_round", |c, tx| c.vault.close_round(tx, &mut c.manager))
    }

    pub fn withdrawal_request(&mut self, account: &Address) -> Result<(), EngineError> {
        self.transact("withdrawal_request", |c, tx| {
            ensure_vault_open(&c.manager)?;
            c.vault.withdrawal_request(tx, account)
        })
    }

    pub fn claim(&mut self, account: &Address) -> Result<Decimal, EngineError> {
        self.transact("vault_claim", |c, tx| {
            ensure_vault_open(&c.manager)?;
            c.vault.claim(tx, account)
        })
    }

    // Administration

    /// Apply an owner-only parameter change
    pub fn configure(&mut self, caller: &Address, setting: Setting) -> Result<(), EngineError> {
        self.transact("configure", |c, tx| apply_setting(c, tx, caller, setting))
    }
}

fn ensure_vault_open(manager: &MarketManager) -> Result<(), VaultError> {
    if manager.is_paused() {
        return Err(VaultError::Paused);
    }
    Ok(())
}

fn apply_setting(
    c: &mut Components,
    tx: &mut Tx<'_>,
    caller: &Address,
    setting: Setting,
) -> Result<(), EngineError> {
    let manager = &mut c.manager;
    let amm = &mut c.amm;
    let vault = &mut c.vault;
    match setting {
        Setting::Paused { value } => manager.set_paused(tx, caller, value)?,
        Setting::MarketCreationEnabled { value } => {
            manager.set_market_creation_enabled(tx, caller, value)?
        }
        Setting::CapitalRequirement { value } => {
            manager.set_capital_requirement(tx, caller, value)?
        }
        Setting::PoolFee { value } => manager.set_pool_fee(tx, caller, value)?,
        Setting::CreatorFee { value } => manager.set_creator_fee(tx, caller, value)?,
        Setting::MaxTimeToMaturity { secs } => {
            let value = duration_from_secs("max_time_to_maturity", secs)?;
            manager.set_max_time_to_maturity(tx, caller, value)?
        }
        Setting::ExpiryDuration { secs } => {
            let value = duration_from_secs("expiry_duration", secs)?;
            manager.set_expiry_duration(tx, caller, value)?
        }
        Setting::MaxOraclePriceAge { secs } => {
            let value = duration_from_secs("max_oracle_price_age", secs)?;
            manager.set_max_oracle_price_age(tx, caller, value)?
        }
        Setting::FeeAddress { address } => manager.set_fee_address(tx, caller, address)?,
        Setting::FeeExempt { account, exempt } => {
            manager.set_fee_exempt(tx, caller, &account, exempt)?
        }

        Setting::AmmPaused { value } => amm.set_paused(tx, caller, value)?,
        Setting::ImpliedVolatility { key, volatility } => {
            amm.set_implied_volatility(tx, caller, key, volatility)?
        }
        Setting::CapPerMarket { value } => amm.set_cap_per_market(tx, caller, value)?,
        Setting::CapOnMarket { market, cap } => amm.set_cap_on_market(tx, caller, market, cap)?,
        Setting::SupportedPriceRange { min, max } => {
            amm.set_min_max_supported_price(tx, caller, min, max)?
        }
        Setting::SpreadRange { min, max } => amm.set_min_max_spread(tx, caller, min, max)?,
        Setting::SafeBox { address, impact } => {
            amm.set_safe_box_params(tx, caller, address, impact)?
        }
        Setting::MinimalTimeLeftToMaturity { secs } => {
            let value = duration_from_secs("minimal_time_left_to_maturity", secs)?;
            amm.set_minimal_time_left_to_maturity(tx, caller, value)?
        }

        Setting::VaultAllocationLimits(limits) => {
            vault.set_allocation_limits(tx, caller, limits)?
        }
        Setting::VaultPriceLimits { lower, upper } => {
            vault.set_price_limits(tx, caller, lower, upper)?
        }
        Setting::VaultUtilizationRate { value } => {
            vault.set_utilization_rate(tx, caller, value)?
        }
        Setting::VaultSkewImpactLimit { value } => {
            vault.set_skew_impact_limit(tx, caller, value)?
        }
        Setting::VaultRoundLength { secs } => {
            let value = duration_from_secs("round_length", secs)?;
            vault.set_round_length(tx, caller, value)?
        }
        Setting::VaultDepositLimits {
            min_deposit,
            max_allowed_deposit,
            max_allowed_users,
        } => vault.set_deposit_limits(
            tx,
            caller,
            min_deposit,
            max_allowed_deposit,
            max_allowed_users,
        )?,
    }
    Ok(())
}
