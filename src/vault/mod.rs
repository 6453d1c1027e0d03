//! Pooled-capital vault
//!
//! Depositors fund rounds of fixed length. During a round the owner deploys
//! part of the round's allocation into AMM trades; closing the round
//! exercises those markets and rolls every balance forward by the round's
//! PnL factor. Withdrawals are requested during a round, realised at its
//! close and paid by `claim`.

mod types;

pub use types::{AssetCategory, RoundState, VaultError};

use crate::amm::Amm;
use crate::config::{AllocationLimits, VaultConfig};
use crate::context::{Snapshot, Tx};
use crate::events::Event;
use crate::manager::MarketManager;
use crate::math::{add, div, mul, saturating_sub};
use crate::types::{Address, MarketId, Side};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

const COMPONENT: &str = "vault";

/// Round-based vault trading through the AMM
#[derive(Debug, Clone)]
pub struct Vault {
    owner: Address,
    account: Address,
    config: VaultConfig,
    started: bool,
    round: u64,
    rounds: BTreeMap<u64, RoundState>,
    /// Users whose current-round balance is paid out at the next close
    withdrawal_requested: BTreeSet<Address>,
    /// Realised withdrawals waiting for `claim`
    claimable: BTreeMap<Address, Decimal>,
    users: BTreeSet<Address>,
}

impl Vault {
    pub fn new(owner: Address, config: VaultConfig) -> Self {
        Self {
            owner,
            account: Address::vault(&config.name),
            config,
            started: false,
            round: 0,
            rounds: BTreeMap::new(),
            withdrawal_requested: BTreeSet::new(),
            claimable: BTreeMap::new(),
            users: BTreeSet::new(),
        }
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Current round; 0 before the vault starts
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn round_state(&self, round: u64) -> Option<&RoundState> {
        self.rounds.get(&round)
    }

    fn current(&self) -> Option<&RoundState> {
        self.rounds.get(&self.round)
    }

    fn round_mut(&mut self, round: u64) -> &mut RoundState {
        self.rounds.entry(round).or_default()
    }

    pub fn round_start(&self) -> Option<DateTime<Utc>> {
        self.current().and_then(|r| r.start)
    }

    pub fn round_end(&self) -> Option<DateTime<Utc>> {
        self.round_start()
            .and_then(|start| start.checked_add_signed(self.config.round_length()))
    }

    pub fn allocation(&self, round: u64) -> Decimal {
        self.rounds
            .get(&round)
            .map(|r| r.allocation)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn profit_and_loss(&self, round: u64) -> Option<Decimal> {
        self.rounds.get(&round).and_then(|r| r.profit_and_loss)
    }

    pub fn cumulative_pnl(&self, round: u64) -> Option<Decimal> {
        self.rounds.get(&round).and_then(|r| r.cumulative_pnl)
    }

    pub fn balance_in_round(&self, account: &Address, round: u64) -> Decimal {
        self.rounds
            .get(&round)
            .map(|r| r.balance_of(account))
            .unwrap_or(Decimal::ZERO)
    }

    /// Balance working in the current round
    pub fn balance_of(&self, account: &Address) -> Decimal {
        self.balance_in_round(account, self.round)
    }

    /// Deposit waiting for the next round
    pub fn pending_deposit(&self, account: &Address) -> Decimal {
        self.balance_in_round(account, self.round + 1)
    }

    pub fn claimable(&self, account: &Address) -> Decimal {
        self.claimable
            .get(account)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn is_withdrawal_requested(&self, account: &Address) -> bool {
        self.withdrawal_requested.contains(account)
    }

    pub fn users(&self) -> usize {
        self.users.len()
    }

    fn total_claimable(&self) -> Decimal {
        self.claimable.values().copied().sum()
    }

    fn ensure_owner(&self, caller: &Address) -> Result<(), VaultError> {
        if caller != &self.owner {
            return Err(VaultError::Unauthorized(caller.clone()));
        }
        Ok(())
    }

    fn ensure_started(&self) -> Result<(), VaultError> {
        if !self.started {
            return Err(VaultError::NotStarted);
        }
        Ok(())
    }

    /// Queue `amount` for the next round (round 1 before the vault starts)
    pub fn deposit(
        &mut self,
        tx: &mut Tx<'_>,
        account: &Address,
        amount: Decimal,
    ) -> Result<(), VaultError> {
        if amount < self.config.min_deposit_amount {
            return Err(VaultError::DepositTooSmall {
                amount,
                minimum: self.config.min_deposit_amount,
            });
        }
        if self.withdrawal_requested.contains(account) {
            return Err(VaultError::WithdrawalRequested);
        }
        if !self.users.contains(account) && self.users.len() >= self.config.max_allowed_users {
            return Err(VaultError::MaxUsersReached);
        }
        let target = self.round + 1;
        if let Some(cap) = self.config.max_allowed_deposit {
            let queued = self.rounds.get(&target).map(|r| r.deposits).unwrap_or_default();
            if add(queued, amount)? > cap {
                return Err(VaultError::DepositCapExceeded { cap });
            }
        }

        let vault = self.account.clone();
        tx.collateral
            .transfer_from(&vault, account, &vault, amount, &mut tx.events)?;

        let next = self.round_mut(target);
        next.deposits = add(next.deposits, amount)?;
        let balance = next.balances.entry(account.clone()).or_insert(Decimal::ZERO);
        *balance = add(*balance, amount)?;
        self.users.insert(account.clone());

        tracing::debug!(%account, %amount, round = target, "Vault deposit");
        tx.emit(Event::Deposited {
            vault,
            account: account.clone(),
            amount,
        });
        Ok(())
    }

    /// Open round 1 with everything deposited so far
    pub fn start_vault(&mut self, tx: &mut Tx<'_>, caller: &Address) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        if self.started {
            return Err(VaultError::AlreadyStarted);
        }
        let allocation = tx.collateral.balance_of(&self.account);
        self.started = true;
        self.round = 1;
        let now = tx.now;
        let first = self.round_mut(1);
        first.start = Some(now);
        first.allocation = allocation;

        tracing::info!(vault = %self.account, %allocation, "Vault started");
        tx.emit(Event::VaultStarted {
            vault: self.account.clone(),
            allocation,
        });
        Ok(())
    }

    /// Remaining share of the round allocation usable for `category`
    fn available_allocation(&self, category: AssetCategory) -> Result<(Decimal, Decimal), VaultError> {
        let round = self.current().ok_or(VaultError::NotStarted)?;
        let tradable = mul(round.allocation, self.config.utilization_rate)?;
        let overall = saturating_sub(tradable, round.spent);
        let limit = match category {
            AssetCategory::Eth => self.config.allocation_limits.eth,
            AssetCategory::Btc => self.config.allocation_limits.btc,
            AssetCategory::Other => self.config.allocation_limits.other,
        };
        let for_asset = saturating_sub(mul(tradable, limit)?, round.spent_on(category));
        Ok((overall, for_asset))
    }

    /// Buy `amount` units of `side` through the AMM with round capital
    #[allow(clippy::too_many_arguments)]
    pub fn trade(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        manager: &mut MarketManager,
        amm: &mut Amm,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<Decimal, VaultError> {
        self.ensure_owner(caller)?;
        self.ensure_started()?;
        if amount < self.config.min_trade_amount {
            return Err(VaultError::TradeTooSmall {
                amount,
                minimum: self.config.min_trade_amount,
            });
        }
        let market = manager.market(id)?;
        let round_end = self.round_end().ok_or(VaultError::NotStarted)?;
        if market.maturity() >= round_end {
            return Err(VaultError::InvalidMarketTime(id));
        }
        let category = AssetCategory::of(market.oracle_key());

        let quote = amm.buy_from_amm_quote(tx.snapshot(), manager, id, side, amount)?;
        let unit_price = div(quote, amount)?;
        if unit_price < self.config.price_lower_limit || unit_price > self.config.price_upper_limit {
            return Err(VaultError::PriceOutOfLimits(unit_price));
        }
        let impact = amm.buy_price_impact(tx.snapshot(), manager, id, side, amount)?;
        if impact > self.config.skew_impact_limit {
            return Err(VaultError::SkewTooHigh(impact));
        }
        let (overall, for_asset) = self.available_allocation(category)?;
        if quote > overall {
            return Err(VaultError::AllocationExceeded {
                needed: quote,
                available: overall,
            });
        }
        if quote > for_asset {
            return Err(VaultError::AssetAllocationExceeded {
                category,
                needed: quote,
                available: for_asset,
            });
        }

        let vault = self.account.clone();
        let receipt = amm.buy_from_amm(tx, manager, &vault, id, side, amount, quote, Decimal::ZERO)?;

        let round = self.round_mut(self.round);
        round.spent = add(round.spent, receipt.quote)?;
        let per_asset = round.spent_per_asset.entry(category).or_insert(Decimal::ZERO);
        *per_asset = add(*per_asset, receipt.quote)?;
        round.traded_markets.insert(id);

        tracing::info!(
            vault = %vault,
            market = %id,
            %side,
            %amount,
            quote = %receipt.quote,
            "Vault trade"
        );
        tx.emit(Event::VaultTrade {
            vault,
            market: id,
            side,
            amount,
            quote: receipt.quote,
        });
        Ok(receipt.quote)
    }

    /// Round has run its length and every traded market can settle
    pub fn can_close_current_round(&self, snapshot: Snapshot<'_>, manager: &MarketManager) -> bool {
        let Some(end) = self.round_end() else {
            return false;
        };
        if !self.started || snapshot.now < end {
            return false;
        }
        self.current().map_or(true, |round| {
            round.traded_markets.iter().all(|&id| match manager.market(id) {
                Ok(market) => {
                    market.is_resolved()
                        || market.can_resolve(snapshot, manager.config().max_oracle_price_age())
                }
                // Expired markets have nothing left to settle
                Err(_) => true,
            })
        })
    }

    /// Settle the round's markets and roll balances into the next round
    pub fn close_round(
        &mut self,
        tx: &mut Tx<'_>,
        manager: &mut MarketManager,
    ) -> Result<Decimal, VaultError> {
        self.ensure_started()?;
        if !self.can_close_current_round(tx.snapshot(), manager) {
            return Err(VaultError::CannotCloseRound);
        }

        let traded: Vec<MarketId> = self
            .current()
            .map(|r| r.traded_markets.iter().copied().collect())
            .unwrap_or_default();
        for id in traded {
            self.settle_market(tx, manager, id)?;
        }

        let round = self.round;
        let next = round + 1;
        let balance = tx.collateral.balance_of(&self.account);
        let queued = self.rounds.get(&next).map(|r| r.deposits).unwrap_or_default();
        let unclaimed = self.total_claimable();
        let allocation = self.allocation(round);
        let ending_value = saturating_sub(balance, queued + unclaimed);
        let pnl = if allocation.is_zero() {
            Decimal::ONE
        } else {
            div(ending_value, allocation)?
        };
        let previous_cumulative = self
            .cumulative_pnl(round.saturating_sub(1))
            .unwrap_or(Decimal::ONE);
        let cumulative = mul(previous_cumulative, pnl)?;

        let mut closing = self.rounds.remove(&round).unwrap_or_default();
        let mut opening = self.rounds.remove(&next).unwrap_or_default();
        for (account, amount) in &closing.balances {
            let rolled = mul(*amount, pnl)?;
            if self.withdrawal_requested.contains(account) {
                *self
                    .claimable
                    .entry(account.clone())
                    .or_insert(Decimal::ZERO) += rolled;
            } else if !rolled.is_zero() {
                *opening
                    .balances
                    .entry(account.clone())
                    .or_insert(Decimal::ZERO) += rolled;
            }
        }
        for account in std::mem::take(&mut self.withdrawal_requested) {
            if !opening.balances.contains_key(&account) {
                self.users.remove(&account);
            }
        }

        closing.profit_and_loss = Some(pnl);
        closing.cumulative_pnl = Some(cumulative);
        self.rounds.insert(round, closing);

        opening.start = Some(tx.now);
        opening.allocation = saturating_sub(balance, self.total_claimable());
        let next_allocation = opening.allocation;
        self.rounds.insert(next, opening);
        self.round = next;

        tracing::info!(
            vault = %self.account,
            round,
            %pnl,
            %cumulative,
            next_allocation = %next_allocation,
            "Vault round closed"
        );
        tx.emit(Event::RoundClosed {
            vault: self.account.clone(),
            round,
            profit_and_loss: pnl,
        });
        Ok(pnl)
    }

    /// Resolve a traded market and exercise the vault's winning units
    fn settle_market(
        &self,
        tx: &mut Tx<'_>,
        manager: &mut MarketManager,
        id: MarketId,
    ) -> Result<(), VaultError> {
        let Ok(market) = manager.market(id) else {
            return Ok(());
        };
        let balances = market.balances_of(&self.account);
        if balances.long.is_zero() && balances.short.is_zero() {
            return Ok(());
        }
        if !market.is_resolved() {
            manager.resolve_market(tx, id)?;
        }
        let winning = manager
            .market(id)?
            .resolution()
            .map(|r| balances.of(r.result))
            .unwrap_or_default();
        if !winning.is_zero() {
            manager.exercise_options(tx, &self.account, id)?;
        }
        Ok(())
    }

    /// Ask for the current-round balance to be paid out at the next close
    pub fn withdrawal_request(
        &mut self,
        tx: &mut Tx<'_>,
        account: &Address,
    ) -> Result<(), VaultError> {
        self.ensure_started()?;
        if self.withdrawal_requested.contains(account) {
            return Err(VaultError::AlreadyRequested);
        }
        if !self.pending_deposit(account).is_zero() {
            return Err(VaultError::DepositedForNextRound);
        }
        if self.balance_of(account).is_zero() {
            return Err(VaultError::NothingToWithdraw);
        }
        self.withdrawal_requested.insert(account.clone());

        tracing::debug!(%account, round = self.round, "Vault withdrawal requested");
        tx.emit(Event::WithdrawalRequested {
            vault: self.account.clone(),
            account: account.clone(),
        });
        Ok(())
    }

    /// Pay out a realised withdrawal
    pub fn claim(&mut self, tx: &mut Tx<'_>, account: &Address) -> Result<Decimal, VaultError> {
        let amount = self.claimable(account);
        if amount.is_zero() {
            if self.withdrawal_requested.contains(account) {
                return Err(VaultError::WithdrawalPending);
            }
            return Err(VaultError::WithdrawalNotRequested);
        }
        let vault = self.account.clone();
        tx.collateral
            .transfer(&vault, account, amount, &mut tx.events)?;
        self.claimable.remove(account);
        let round = self.round;
        self.round_mut(round).claimed.insert(account.clone());

        tracing::info!(vault = %vault, %account, %amount, "Vault claim");
        tx.emit(Event::Claimed {
            vault,
            account: account.clone(),
            amount,
        });
        Ok(amount)
    }

    // Administration

    pub fn set_allocation_limits(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        limits: AllocationLimits,
    ) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        for (name, value) in [
            ("eth_allocation", limits.eth),
            ("btc_allocation", limits.btc),
            ("other_allocation", limits.other),
        ] {
            check_fraction(name, value)?;
            tx.emit(Event::parameter(COMPONENT, name, value));
        }
        self.config.allocation_limits = limits;
        Ok(())
    }

    pub fn set_price_limits(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        lower: Decimal,
        upper: Decimal,
    ) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        check_fraction("price_lower_limit", lower)?;
        check_fraction("price_upper_limit", upper)?;
        if lower >= upper {
            return Err(VaultError::InvalidParameter {
                name: "price_lower_limit",
                value: lower,
            });
        }
        self.config.price_lower_limit = lower;
        self.config.price_upper_limit = upper;
        tx.emit(Event::parameter(COMPONENT, "price_lower_limit", lower));
        tx.emit(Event::parameter(COMPONENT, "price_upper_limit", upper));
        Ok(())
    }

    pub fn set_utilization_rate(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        rate: Decimal,
    ) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        check_fraction("utilization_rate", rate)?;
        self.config.utilization_rate = rate;
        tx.emit(Event::parameter(COMPONENT, "utilization_rate", rate));
        Ok(())
    }

    pub fn set_skew_impact_limit(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        limit: Decimal,
    ) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        check_fraction("skew_impact_limit", limit)?;
        self.config.skew_impact_limit = limit;
        tx.emit(Event::parameter(COMPONENT, "skew_impact_limit", limit));
        Ok(())
    }

    pub fn set_round_length(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        length: Duration,
    ) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        self.config.round_length_secs = length.num_seconds().max(0) as u64;
        tx.emit(Event::parameter(COMPONENT, "round_length", length));
        Ok(())
    }

    pub fn set_deposit_limits(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        min_deposit: Decimal,
        max_allowed_deposit: Option<Decimal>,
        max_allowed_users: usize,
    ) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        if min_deposit < Decimal::ZERO {
            return Err(VaultError::InvalidParameter {
                name: "min_deposit_amount",
                value: min_deposit,
            });
        }
        self.config.min_deposit_amount = min_deposit;
        self.config.max_allowed_deposit = max_allowed_deposit;
        self.config.max_allowed_users = max_allowed_users;
        tx.emit(Event::parameter(COMPONENT, "min_deposit_amount", min_deposit));
        tx.emit(Event::parameter(
            COMPONENT,
            "max_allowed_deposit",
            max_allowed_deposit.map_or_else(|| "none".to_string(), |cap| cap.to_string()),
        ));
        tx.emit(Event::parameter(COMPONENT, "max_allowed_users", max_allowed_users));
        Ok(())
    }
}

fn check_fraction(name: &'static str, value: Decimal) -> Result<(), VaultError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(VaultError::InvalidParameter { name, value });
    }
    Ok(())
}
