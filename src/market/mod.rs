//! Positional options markets
//!
//! A market pairs a Long and a Short token against one oracle key and strike.
//! Minting deposits collateral for an equal amount of both sides; once the
//! market matures it is resolved against the oracle and the winning side is
//! exercised 1:1 for collateral. Expiry sweeps what is left and the manager
//! drops the market from its arena.

mod factory;
mod types;

pub use factory::MarketFactory;
pub use types::{
    Fees, MarketError, MarketParams, MintOutcome, OptionBalances, Phase, Resolution,
};

use crate::context::{Snapshot, Tx};
use crate::events::Event;
use crate::ledger::TokenLedger;
use crate::math::{add, complement, mul, saturating_sub};
use crate::oracle::PriceReading;
use crate::types::{Address, MarketId, OracleKey, Side};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

/// A single options market
#[derive(Debug, Clone)]
pub struct Market {
    id: MarketId,
    creator: Address,
    oracle_key: OracleKey,
    strike_price: Decimal,
    maturity: DateTime<Utc>,
    expiry: DateTime<Utc>,
    fees: Fees,
    /// Net collateral backing the outstanding options
    deposited: Decimal,
    /// Fees escrowed until resolution
    accrued_pool_fees: Decimal,
    accrued_creator_fees: Decimal,
    resolution: Option<Resolution>,
    long: TokenLedger,
    short: TokenLedger,
}

impl Market {
    pub fn id(&self) -> MarketId {
        self.id
    }

    pub fn creator(&self) -> &Address {
        &self.creator
    }

    pub fn oracle_key(&self) -> &OracleKey {
        &self.oracle_key
    }

    pub fn strike_price(&self) -> Decimal {
        self.strike_price
    }

    pub fn maturity(&self) -> DateTime<Utc> {
        self.maturity
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub fn fees(&self) -> Fees {
        self.fees
    }

    pub fn deposited(&self) -> Decimal {
        self.deposited
    }

    /// Pool and creator fees not yet remitted
    pub fn accrued_fees(&self) -> (Decimal, Decimal) {
        (self.accrued_pool_fees, self.accrued_creator_fees)
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Collateral account holding this market's deposits
    pub fn account(&self) -> Address {
        Address::market(self.id)
    }

    /// `(maturity, expiry)`
    pub fn times(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.maturity, self.expiry)
    }

    /// `(oracle key, strike, final price once resolved)`
    pub fn oracle_details(&self) -> (&OracleKey, Decimal, Option<Decimal>) {
        (
            &self.oracle_key,
            self.strike_price,
            self.resolution.map(|r| r.final_price),
        )
    }

    pub fn phase(&self, now: DateTime<Utc>) -> Phase {
        if now < self.maturity {
            Phase::Trading
        } else if now < self.expiry {
            Phase::Maturity
        } else {
            Phase::Expiry
        }
    }

    pub fn options(&self, side: Side) -> &TokenLedger {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    fn options_mut(&mut self, side: Side) -> &mut TokenLedger {
        match side {
            Side::Long => &mut self.long,
            Side::Short => &mut self.short,
        }
    }

    pub fn supply(&self, side: Side) -> Decimal {
        self.options(side).total_supply()
    }

    pub fn balances_of(&self, account: &Address) -> OptionBalances {
        OptionBalances {
            long: self.long.balance_of(account),
            short: self.short.balance_of(account),
        }
    }

    /// Pairs `account` could redeem with `burn_options`
    pub fn burn_options_maximum(&self, account: &Address) -> Decimal {
        let balances = self.balances_of(account);
        balances.long.min(balances.short)
    }

    /// Deposit `amount` collateral for equal Long and Short units.
    ///
    /// Collateral is pulled from `minter` through the manager's allowance.
    /// Fee-exempt minters receive `amount` units of each side.
    pub(crate) fn mint(
        &mut self,
        tx: &mut Tx<'_>,
        minter: &Address,
        amount: Decimal,
        minimum: Decimal,
        fee_exempt: bool,
    ) -> Result<MintOutcome, MarketError> {
        if self.phase(tx.now) != Phase::Trading {
            return Err(MarketError::NotInTradingPhase);
        }
        if amount.is_zero() {
            return Ok(MintOutcome::empty());
        }
        if amount < minimum {
            return Err(MarketError::MintTooSmall { amount, minimum });
        }

        let outcome = if fee_exempt {
            MintOutcome {
                minted: amount,
                ..MintOutcome::empty()
            }
        } else {
            let minted = mul(amount, complement(self.fees.total()))?;
            let fees = amount - minted;
            let pool_fee = mul(amount, self.fees.pool_fee)?.min(fees);
            MintOutcome {
                minted,
                pool_fee,
                creator_fee: saturating_sub(fees, pool_fee),
            }
        };

        let account = self.account();
        tx.collateral
            .transfer_from(&Address::manager(), minter, &account, amount, &mut tx.events)?;
        self.long.mint(minter, outcome.minted, &mut tx.events)?;
        self.short.mint(minter, outcome.minted, &mut tx.events)?;

        self.deposited = add(self.deposited, outcome.minted)?;
        self.accrued_pool_fees = add(self.accrued_pool_fees, outcome.pool_fee)?;
        self.accrued_creator_fees = add(self.accrued_creator_fees, outcome.creator_fee)?;

        for side in [Side::Long, Side::Short] {
            tx.emit(Event::Mint {
                market: self.id,
                side,
                account: minter.clone(),
                value: outcome.minted,
            });
        }
        Ok(outcome)
    }

    /// Oracle reading that would settle the market now
    fn resolvable_price(
        &self,
        snapshot: Snapshot<'_>,
        max_price_age: Duration,
    ) -> Result<PriceReading, MarketError> {
        if self.phase(snapshot.now) == Phase::Trading {
            return Err(MarketError::NotYetMature);
        }
        if self.is_resolved() {
            return Err(MarketError::NotActiveMarket);
        }
        let reading = snapshot.oracle.price(&self.oracle_key)?;
        let oldest_accepted = self
            .maturity
            .checked_sub_signed(max_price_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if reading.timestamp < oldest_accepted {
            return Err(MarketError::StalePrice {
                published: reading.timestamp,
                oldest_accepted,
            });
        }
        Ok(reading)
    }

    pub fn can_resolve(&self, snapshot: Snapshot<'_>, max_price_age: Duration) -> bool {
        self.resolvable_price(snapshot, max_price_age).is_ok()
    }

    /// Fix the final price and remit the escrowed fees
    pub(crate) fn resolve(
        &mut self,
        tx: &mut Tx<'_>,
        max_price_age: Duration,
        fee_address: &Address,
    ) -> Result<Resolution, MarketError> {
        let reading = self.resolvable_price(tx.snapshot(), max_price_age)?;
        let resolution = Resolution {
            final_price: reading.price,
            final_timestamp: reading.timestamp,
            result: Side::from_prices(reading.price, self.strike_price),
        };

        let account = self.account();
        let pool_fees = self.accrued_pool_fees;
        let creator_fees = self.accrued_creator_fees;
        if !pool_fees.is_zero() {
            tx.collateral
                .transfer(&account, fee_address, pool_fees, &mut tx.events)?;
        }
        if !creator_fees.is_zero() {
            tx.collateral
                .transfer(&account, &self.creator, creator_fees, &mut tx.events)?;
        }
        self.accrued_pool_fees = Decimal::ZERO;
        self.accrued_creator_fees = Decimal::ZERO;
        self.resolution = Some(resolution);

        tracing::info!(
            market = %self.id,
            result = %resolution.result,
            final_price = %resolution.final_price,
            deposited = %self.deposited,
            "Market resolved"
        );
        tx.emit(Event::MarketResolved {
            market: self.id,
            result: resolution.result,
            oracle_price: resolution.final_price,
            oracle_timestamp: resolution.final_timestamp,
            deposited: self.deposited,
            pool_fees,
            creator_fees,
        });
        Ok(resolution)
    }

    /// Frozen result once resolved, otherwise the live oracle outcome
    pub fn result(&self, snapshot: Snapshot<'_>) -> Result<Side, MarketError> {
        if let Some(resolution) = self.resolution {
            return Ok(resolution.result);
        }
        let reading = snapshot.oracle.price(&self.oracle_key)?;
        Ok(Side::from_prices(reading.price, self.strike_price))
    }

    /// Burn `account`'s winning options and pay them out 1:1.
    /// Losing options are left in place. The market must already be resolved.
    pub(crate) fn exercise(
        &mut self,
        tx: &mut Tx<'_>,
        account: &Address,
    ) -> Result<Decimal, MarketError> {
        let result = self
            .resolution
            .map(|r| r.result)
            .ok_or(MarketError::NotResolved)?;
        let balances = self.balances_of(account);
        let payout = balances.of(result);
        if payout.is_zero() {
            return Err(MarketError::NothingToExercise);
        }

        self.options_mut(result)
            .burn(account, payout, &mut tx.events)?;
        tx.emit(Event::Burned {
            market: self.id,
            side: result,
            account: account.clone(),
            value: payout,
        });

        let market_account = self.account();
        tx.collateral
            .transfer(&market_account, account, payout, &mut tx.events)?;
        self.deposited = saturating_sub(self.deposited, payout);

        tracing::debug!(market = %self.id, %account, %payout, "Options exercised");
        tx.emit(Event::OptionsExercised {
            market: self.id,
            account: account.clone(),
            value: payout,
        });
        Ok(payout)
    }

    /// Redeem `amount` Long plus `amount` Short for `amount` collateral
    pub(crate) fn burn_options(
        &mut self,
        tx: &mut Tx<'_>,
        account: &Address,
        amount: Decimal,
    ) -> Result<Decimal, MarketError> {
        if self.phase(tx.now) != Phase::Trading {
            return Err(MarketError::NotInTradingPhase);
        }
        if amount.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let available = self.burn_options_maximum(account);
        if available < amount {
            return Err(MarketError::InsufficientOptions {
                needed: amount,
                available,
            });
        }

        for side in [Side::Long, Side::Short] {
            self.options_mut(side)
                .burn(account, amount, &mut tx.events)?;
            tx.emit(Event::Burned {
                market: self.id,
                side,
                account: account.clone(),
                value: amount,
            });
        }
        let market_account = self.account();
        tx.collateral
            .transfer(&market_account, account, amount, &mut tx.events)?;
        self.deposited = saturating_sub(self.deposited, amount);
        Ok(amount)
    }

    /// Resolved and either past expiry or fully exercised
    pub fn is_expirable(&self, now: DateTime<Utc>) -> bool {
        match self.resolution {
            Some(resolution) => {
                now >= self.expiry || self.supply(resolution.result).is_zero()
            }
            None => false,
        }
    }

    /// Sweep the market's collateral to `beneficiary`.
    ///
    /// Returns the `deposited` amount that was still tracked so the manager
    /// can release it from its total. The caller drops the market afterwards.
    pub(crate) fn expire(
        &mut self,
        tx: &mut Tx<'_>,
        beneficiary: &Address,
    ) -> Result<Decimal, MarketError> {
        if !self.is_expirable(tx.now) {
            return Err(MarketError::UnexpiredOptionsRemaining);
        }

        let account = self.account();
        let remitted = tx.collateral.balance_of(&account);
        if !remitted.is_zero() {
            tx.collateral
                .transfer(&account, beneficiary, remitted, &mut tx.events)?;
        }
        let released = self.deposited;
        self.deposited = Decimal::ZERO;

        tracing::info!(market = %self.id, %beneficiary, %remitted, "Market expired");
        tx.emit(Event::MarketExpired {
            market: self.id,
            beneficiary: beneficiary.clone(),
            remitted,
        });
        Ok(released)
    }

    pub(crate) fn transfer_options(
        &mut self,
        events: &mut Vec<Event>,
        side: Side,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> Result<(), MarketError> {
        self.options_mut(side).transfer(from, to, amount, events)?;
        Ok(())
    }

    pub(crate) fn approve_options(
        &mut self,
        events: &mut Vec<Event>,
        side: Side,
        owner: &Address,
        spender: &Address,
        amount: Decimal,
    ) -> Result<(), MarketError> {
        self.options_mut(side)
            .approve(owner, spender, amount, events)?;
        Ok(())
    }

    pub(crate) fn transfer_options_from(
        &mut self,
        events: &mut Vec<Event>,
        side: Side,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> Result<(), MarketError> {
        self.options_mut(side)
            .transfer_from(spender, from, to, amount, events)?;
        Ok(())
    }
}
