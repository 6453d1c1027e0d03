//! Market manager
//!
//! Registry of live markets. Markets live in an arena keyed by [`MarketId`];
//! expiry removes the slot, so stale handles resolve to
//! [`ManagerError::MarketNotFound`] instead of dangling.

mod types;

pub use types::{CreateMarket, ExpiredMarket, ManagerError};

use crate::config::ManagerConfig;
use crate::context::{Snapshot, Tx};
use crate::events::Event;
use crate::market::{
    Fees, Market, MarketFactory, MarketParams, MintOutcome, Resolution,
};
use crate::math::add;
use crate::types::{Address, MarketId, Side};
use chrono::Duration;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

const COMPONENT: &str = "manager";

/// Factory and registry of markets
#[derive(Debug, Clone)]
pub struct MarketManager {
    owner: Address,
    config: ManagerConfig,
    factory: MarketFactory,
    markets: BTreeMap<MarketId, Market>,
    active: BTreeSet<MarketId>,
    matured: BTreeSet<MarketId>,
    next_id: u64,
    total_deposited: Decimal,
    fee_exempt: BTreeSet<Address>,
}

impl MarketManager {
    pub fn new(owner: Address, config: ManagerConfig) -> Self {
        Self {
            owner,
            config,
            factory: MarketFactory,
            markets: BTreeMap::new(),
            active: BTreeSet::new(),
            matured: BTreeSet::new(),
            next_id: 1,
            total_deposited: Decimal::ZERO,
            fee_exempt: BTreeSet::new(),
        }
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn is_paused(&self) -> bool {
        self.config.paused
    }

    pub fn total_deposited(&self) -> Decimal {
        self.total_deposited
    }

    pub fn market(&self, id: MarketId) -> Result<&Market, ManagerError> {
        self.markets.get(&id).ok_or(ManagerError::MarketNotFound(id))
    }

    fn market_mut(&mut self, id: MarketId) -> Result<&mut Market, ManagerError> {
        self.markets
            .get_mut(&id)
            .ok_or(ManagerError::MarketNotFound(id))
    }

    pub fn is_known_market(&self, id: MarketId) -> bool {
        self.markets.contains_key(&id)
    }

    pub fn is_active_market(&self, id: MarketId) -> bool {
        self.active.contains(&id)
    }

    pub fn active_markets(&self) -> Vec<MarketId> {
        self.active.iter().copied().collect()
    }

    pub fn matured_markets(&self) -> Vec<MarketId> {
        self.matured.iter().copied().collect()
    }

    /// Sum of `deposited` over all live markets
    pub fn markets_deposited(&self) -> Decimal {
        self.markets.values().map(Market::deposited).sum()
    }

    pub fn is_fee_exempt(&self, account: &Address) -> bool {
        self.fee_exempt.contains(account)
    }

    pub fn can_resolve(&self, snapshot: Snapshot<'_>, id: MarketId) -> Result<bool, ManagerError> {
        Ok(self
            .market(id)?
            .can_resolve(snapshot, self.config.max_oracle_price_age()))
    }

    fn ensure_not_paused(&self) -> Result<(), ManagerError> {
        if self.config.paused {
            return Err(ManagerError::Paused);
        }
        Ok(())
    }

    pub(crate) fn ensure_owner(&self, caller: &Address) -> Result<(), ManagerError> {
        if caller != &self.owner {
            return Err(ManagerError::Unauthorized(caller.clone()));
        }
        Ok(())
    }

    /// Validate, build and seed a new market with the creator's initial mint
    pub fn create_market(
        &mut self,
        tx: &mut Tx<'_>,
        creator: &Address,
        request: CreateMarket,
    ) -> Result<MarketId, ManagerError> {
        self.ensure_not_paused()?;
        if !self.config.market_creation_enabled {
            return Err(ManagerError::CreationDisabled);
        }
        if !tx.oracle.is_valid_key(&request.oracle_key) {
            return Err(ManagerError::InvalidKey(request.oracle_key));
        }
        if request.maturity <= tx.now {
            return Err(ManagerError::MaturityInPast);
        }
        if request.maturity - tx.now > self.config.max_time_to_maturity() {
            return Err(ManagerError::MaturityTooFar);
        }
        if request.initial_mint < self.config.capital_requirement {
            return Err(ManagerError::InsufficientCapital {
                provided: request.initial_mint,
                required: self.config.capital_requirement,
            });
        }
        if request.strike_price <= Decimal::ZERO {
            return Err(ManagerError::InvalidStrike(request.strike_price));
        }

        let expiry = request
            .maturity
            .checked_add_signed(self.config.expiry_duration())
            .ok_or(ManagerError::MaturityTooFar)?;
        let id = MarketId(self.next_id);
        self.next_id += 1;
        let mut market = self.factory.create_market(MarketParams {
            id,
            creator: creator.clone(),
            oracle_key: request.oracle_key.clone(),
            strike_price: request.strike_price,
            maturity: request.maturity,
            expiry,
            fees: Fees {
                pool_fee: self.config.pool_fee,
                creator_fee: self.config.creator_fee,
            },
        });

        tx.emit(Event::MarketCreated {
            market: id,
            creator: creator.clone(),
            oracle_key: request.oracle_key.clone(),
            strike_price: request.strike_price,
            maturity: request.maturity,
            expiry,
            initial_mint: request.initial_mint,
        });
        let outcome = market.mint(
            tx,
            creator,
            request.initial_mint,
            self.config.min_mint_amount,
            self.is_fee_exempt(creator),
        )?;

        self.total_deposited = add(self.total_deposited, outcome.minted)?;
        self.markets.insert(id, market);
        self.active.insert(id);

        tracing::info!(
            market = %id,
            %creator,
            key = %request.oracle_key,
            strike = %request.strike_price,
            maturity = %request.maturity,
            "Market created"
        );
        Ok(id)
    }

    pub fn mint(
        &mut self,
        tx: &mut Tx<'_>,
        minter: &Address,
        id: MarketId,
        amount: Decimal,
    ) -> Result<MintOutcome, ManagerError> {
        self.ensure_not_paused()?;
        let minimum = self.config.min_mint_amount;
        let fee_exempt = self.is_fee_exempt(minter);
        let outcome = self
            .market_mut(id)?
            .mint(tx, minter, amount, minimum, fee_exempt)?;
        self.total_deposited = add(self.total_deposited, outcome.minted)?;
        Ok(outcome)
    }

    pub fn resolve_market(
        &mut self,
        tx: &mut Tx<'_>,
        id: MarketId,
    ) -> Result<Resolution, ManagerError> {
        self.ensure_not_paused()?;
        let max_age = self.config.max_oracle_price_age();
        let fee_address = self.config.fee_address.clone();
        let market = self.market_mut(id)?;
        if market.is_resolved() {
            return Err(ManagerError::NotActiveMarket(id));
        }
        let resolution = market.resolve(tx, max_age, &fee_address)?;
        self.active.remove(&id);
        self.matured.insert(id);
        Ok(resolution)
    }

    /// Exercise `account`'s options, resolving the market first if needed
    pub fn exercise_options(
        &mut self,
        tx: &mut Tx<'_>,
        account: &Address,
        id: MarketId,
    ) -> Result<Decimal, ManagerError> {
        self.ensure_not_paused()?;
        if !self.market(id)?.is_resolved() {
            self.resolve_market(tx, id)?;
        }
        let payout = self.market_mut(id)?.exercise(tx, account)?;
        self.total_deposited -= payout;
        Ok(payout)
    }

    /// Redeem matching Long and Short units for collateral before maturity
    pub fn burn_options(
        &mut self,
        tx: &mut Tx<'_>,
        account: &Address,
        id: MarketId,
        amount: Decimal,
    ) -> Result<Decimal, ManagerError> {
        self.ensure_not_paused()?;
        let burned = self.market_mut(id)?.burn_options(tx, account, amount)?;
        self.total_deposited -= burned;
        Ok(burned)
    }

    /// Expire a batch of markets. Fails as a whole if any market is not
    /// expirable; nothing is expired in that case.
    pub fn expire_markets(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        ids: &[MarketId],
    ) -> Result<Vec<ExpiredMarket>, ManagerError> {
        self.ensure_not_paused()?;
        self.ensure_owner(caller)?;

        let mut seen = BTreeSet::new();
        for &id in ids {
            if !seen.insert(id) {
                return Err(ManagerError::DuplicateMarket(id));
            }
            if !self.market(id)?.is_expirable(tx.now) {
                return Err(ManagerError::Market(
                    crate::market::MarketError::UnexpiredOptionsRemaining,
                ));
            }
        }

        let mut expired = Vec::with_capacity(ids.len());
        for &id in ids {
            let released = self.market_mut(id)?.expire(tx, caller)?;
            self.total_deposited -= released;
            self.active.remove(&id);
            self.matured.remove(&id);
            self.markets.remove(&id);
            expired.push(ExpiredMarket {
                market: id,
                released,
            });
        }
        Ok(expired)
    }

    pub fn transfer_options(
        &mut self,
        tx: &mut Tx<'_>,
        id: MarketId,
        side: Side,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> Result<(), ManagerError> {
        self.ensure_not_paused()?;
        self.market_mut(id)?
            .transfer_options(&mut tx.events, side, from, to, amount)?;
        Ok(())
    }

    pub fn approve_options(
        &mut self,
        tx: &mut Tx<'_>,
        id: MarketId,
        side: Side,
        owner: &Address,
        spender: &Address,
        amount: Decimal,
    ) -> Result<(), ManagerError> {
        self.ensure_not_paused()?;
        self.market_mut(id)?
            .approve_options(&mut tx.events, side, owner, spender, amount)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transfer_options_from(
        &mut self,
        tx: &mut Tx<'_>,
        id: MarketId,
        side: Side,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> Result<(), ManagerError> {
        self.ensure_not_paused()?;
        self.market_mut(id)?
            .transfer_options_from(&mut tx.events, side, spender, from, to, amount)?;
        Ok(())
    }

    // Administration

    pub fn set_paused(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        paused: bool,
    ) -> Result<(), ManagerError> {
        self.ensure_owner(caller)?;
        self.config.paused = paused;
        tracing::warn!(paused, "Manager pause flag changed");
        tx.emit(Event::parameter(COMPONENT, "paused", paused));
        Ok(())
    }

    pub fn set_market_creation_enabled(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        enabled: bool,
    ) -> Result<(), ManagerError> {
        self.ensure_owner(caller)?;
        self.config.market_creation_enabled = enabled;
        tx.emit(Event::parameter(COMPONENT, "market_creation_enabled", enabled));
        Ok(())
    }

    pub fn set_capital_requirement(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        value: Decimal,
    ) -> Result<(), ManagerError> {
        self.ensure_owner(caller)?;
        self.config.capital_requirement = value;
        tx.emit(Event::parameter(COMPONENT, "capital_requirement", value));
        Ok(())
    }

    pub fn set_pool_fee(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        value: Decimal,
    ) -> Result<(), ManagerError> {
        self.ensure_owner(caller)?;
        check_fees(value, self.config.creator_fee)?;
        self.config.pool_fee = value;
        tx.emit(Event::parameter(COMPONENT, "pool_fee", value));
        Ok(())
    }

    pub fn set_creator_fee(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        value: Decimal,
    ) -> Result<(), ManagerError> {
        self.ensure_owner(caller)?;
        check_fees(self.config.pool_fee, value)?;
        self.config.creator_fee = value;
        tx.emit(Event::parameter(COMPONENT, "creator_fee", value));
        Ok(())
    }

    pub fn set_max_time_to_maturity(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        value: Duration,
    ) -> Result<(), ManagerError> {
        self.ensure_owner(caller)?;
        self.config.max_time_to_maturity_secs = duration_secs(value);
        tx.emit(Event::parameter(COMPONENT, "max_time_to_maturity", value));
        Ok(())
    }

    pub fn set_expiry_duration(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        value: Duration,
    ) -> Result<(), ManagerError> {
        self.ensure_owner(caller)?;
        self.config.expiry_duration_secs = duration_secs(value);
        tx.emit(Event::parameter(COMPONENT, "expiry_duration", value));
        Ok(())
    }

    pub fn set_max_oracle_price_age(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        value: Duration,
    ) -> Result<(), ManagerError> {
        self.ensure_owner(caller)?;
        self.config.max_oracle_price_age_secs = duration_secs(value);
        tx.emit(Event::parameter(COMPONENT, "max_oracle_price_age", value));
        Ok(())
    }

    pub fn set_fee_address(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        value: Address,
    ) -> Result<(), ManagerError> {
        self.ensure_owner(caller)?;
        tx.emit(Event::parameter(COMPONENT, "fee_address", &value));
        self.config.fee_address = value;
        Ok(())
    }

    /// Fee-exempt minters receive one unit of each side per unit of collateral
    pub fn set_fee_exempt(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        account: &Address,
        exempt: bool,
    ) -> Result<(), ManagerError> {
        self.ensure_owner(caller)?;
        if exempt {
            self.fee_exempt.insert(account.clone());
        } else {
            self.fee_exempt.remove(account);
        }
        tx.emit(Event::parameter(
            COMPONENT,
            "fee_exempt",
            format!("{}={}", account, exempt),
        ));
        Ok(())
    }

    /// Registration used while wiring components together
    pub(crate) fn register_fee_exempt(&mut self, account: Address) {
        self.fee_exempt.insert(account);
    }
}

fn check_fees(pool_fee: Decimal, creator_fee: Decimal) -> Result<(), ManagerError> {
    let total = pool_fee + creator_fee;
    if total >= Decimal::ONE {
        return Err(ManagerError::FeeTooHigh);
    }
    if total <= Decimal::ZERO {
        return Err(ManagerError::ZeroFee);
    }
    Ok(())
}

fn duration_secs(value: Duration) -> u64 {
    value.num_seconds().max(0) as u64
}
