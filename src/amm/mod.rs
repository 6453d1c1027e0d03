//! Automated market maker
//!
//! Quotes Long/Short units from fair odds plus a spread and a skew-driven
//! price impact. Units the AMM does not hold are minted fee-free from the
//! market; collateral committed that way counts towards the per-market cap.

mod pricing;
mod types;

pub use pricing::{
    available_to_buy, available_to_sell, buy_price_impact, calculate_odds, sell_max_price,
    sell_price_impact, Inventory, OddsParams,
};
pub use types::{AmmError, QuoteDetails, TradeDirection, TradeReceipt};

use crate::config::AmmConfig;
use crate::context::{Snapshot, Tx};
use crate::events::Event;
use crate::manager::MarketManager;
use crate::market::Phase;
use crate::math::{add, complement, div, mul, saturating_sub};
use crate::types::{Address, MarketId, OracleKey, Side};
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use uuid::Uuid;

const COMPONENT: &str = "amm";

/// Buffer on the impact price increase so quotes near the band edges stay conservative
const IMPACT_BUFFER: Decimal = dec!(1.02);

/// Implied volatility accepted by the setter, exclusive bounds
const MIN_IMPLIED_VOLATILITY: Decimal = dec!(0.6);
const MAX_IMPLIED_VOLATILITY: Decimal = dec!(3.0);

/// Automated market maker over the manager's markets
#[derive(Debug, Clone)]
pub struct Amm {
    owner: Address,
    account: Address,
    config: AmmConfig,
    implied_volatility: BTreeMap<OracleKey, Decimal>,
    cap_on_market: BTreeMap<MarketId, Decimal>,
    spent_on_market: BTreeMap<MarketId, Decimal>,
    paused: bool,
}

impl Amm {
    pub fn new(owner: Address, config: AmmConfig) -> Result<Self, AmmError> {
        let mut implied_volatility = BTreeMap::new();
        for entry in &config.implied_volatility {
            check_volatility(entry.volatility)?;
            implied_volatility.insert(OracleKey::new(entry.key.as_str()), entry.volatility);
        }
        Ok(Self {
            owner,
            account: Address::amm(),
            config,
            implied_volatility,
            cap_on_market: BTreeMap::new(),
            spent_on_market: BTreeMap::new(),
            paused: false,
        })
    }

    /// Account holding the AMM's collateral reserve and option inventory
    pub fn account(&self) -> &Address {
        &self.account
    }

    pub fn config(&self) -> &AmmConfig {
        &self.config
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn implied_volatility(&self, key: &OracleKey) -> Option<Decimal> {
        self.implied_volatility.get(key).copied()
    }

    pub fn spent_on_market(&self, id: MarketId) -> Decimal {
        self.spent_on_market
            .get(&id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn cap_on_market(&self, id: MarketId) -> Decimal {
        self.cap_on_market
            .get(&id)
            .copied()
            .unwrap_or(self.config.cap_per_market)
    }

    fn ensure_owner(&self, caller: &Address) -> Result<(), AmmError> {
        if caller != &self.owner {
            return Err(AmmError::Unauthorized(caller.clone()));
        }
        Ok(())
    }

    fn ensure_not_paused(&self, manager: &MarketManager) -> Result<(), AmmError> {
        if self.paused || manager.is_paused() {
            return Err(AmmError::Paused);
        }
        Ok(())
    }

    /// Active, and far enough from maturity for the AMM to quote it
    pub fn is_market_in_amm_trading(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
    ) -> bool {
        if !manager.is_active_market(id) {
            return false;
        }
        match manager.market(id) {
            Ok(market) => {
                market.maturity() > snapshot.now
                    && market.maturity() - snapshot.now
                        > self.config.minimal_time_left_to_maturity()
            }
            Err(_) => false,
        }
    }

    fn ensure_trading(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
    ) -> Result<(), AmmError> {
        if !self.is_market_in_amm_trading(snapshot, manager, id) {
            return Err(AmmError::NotInTradingPhase);
        }
        Ok(())
    }

    fn is_price_supported(&self, price: Decimal) -> bool {
        price > self.config.min_supported_price && price < self.config.max_supported_price
    }

    fn inventory(
        &self,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
    ) -> Result<Inventory, AmmError> {
        let balances = manager.market(id)?.balances_of(&self.account);
        Ok(Inventory {
            position: balances.of(side),
            other: balances.of(side.opposite()),
        })
    }

    /// Fair odds of `side` before spread and impact.
    ///
    /// Fails with [`AmmError::UnsupportedPrice`] when the odds fall outside
    /// the supported band.
    pub fn price(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
    ) -> Result<Decimal, AmmError> {
        let odds = self.fair_odds(snapshot, manager, id, side)?;
        if !self.is_price_supported(odds) {
            return Err(AmmError::UnsupportedPrice(odds));
        }
        Ok(odds)
    }

    fn fair_odds(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
    ) -> Result<Decimal, AmmError> {
        self.ensure_trading(snapshot, manager, id)?;
        let market = manager.market(id)?;
        let key = market.oracle_key();
        let volatility = self
            .implied_volatility(key)
            .ok_or_else(|| AmmError::UnsupportedMarket(key.clone()))?;
        let reading = snapshot.oracle.price(key)?;
        let up = calculate_odds(&OddsParams {
            spot: reading.price,
            strike: market.strike_price(),
            time_to_maturity: market.maturity() - snapshot.now,
            volatility,
        })?;
        Ok(match side {
            Side::Long => up,
            Side::Short => complement(up),
        })
    }

    pub fn available_to_buy_from_amm(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
    ) -> Result<Decimal, AmmError> {
        if !self.is_market_in_amm_trading(snapshot, manager, id) {
            return Ok(Decimal::ZERO);
        }
        let price = self.fair_odds(snapshot, manager, id, side)?;
        if !self.is_price_supported(price) {
            return Ok(Decimal::ZERO);
        }
        let inventory = self.inventory(manager, id, side)?;
        Ok(available_to_buy(
            price,
            inventory.position,
            self.cap_on_market(id),
            self.spent_on_market(id),
            self.config.min_spread,
            self.config.max_spread,
        )?)
    }

    pub fn available_to_sell_to_amm(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
    ) -> Result<Decimal, AmmError> {
        if !self.is_market_in_amm_trading(snapshot, manager, id) {
            return Ok(Decimal::ZERO);
        }
        let price = self.fair_odds(snapshot, manager, id, side)?;
        if !self.is_price_supported(price) {
            return Ok(Decimal::ZERO);
        }
        let max_price = sell_max_price(price, self.config.min_spread, self.config.max_spread)?;
        let inventory = self.inventory(manager, id, side)?;
        Ok(available_to_sell(
            max_price,
            inventory.other,
            self.cap_on_market(id),
            self.spent_on_market(id),
        )?)
    }

    pub fn buy_price_impact(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<Decimal, AmmError> {
        let available = self.available_to_buy_from_amm(snapshot, manager, id, side)?;
        let inventory = self.inventory(manager, id, side)?;
        Ok(buy_price_impact(
            inventory,
            amount.min(available),
            available,
            self.config.max_spread,
        )?)
    }

    pub fn sell_price_impact(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<Decimal, AmmError> {
        let available = self.available_to_sell_to_amm(snapshot, manager, id, side)?;
        let inventory = self.inventory(manager, id, side)?;
        Ok(sell_price_impact(
            inventory,
            amount.min(available),
            available,
            self.config.max_spread,
        )?)
    }

    /// Full breakdown of the collateral needed to buy `amount` units
    pub fn buy_quote_details(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<QuoteDetails, AmmError> {
        self.ensure_trading(snapshot, manager, id)?;
        if amount <= Decimal::ZERO {
            return Err(AmmError::ZeroAmount);
        }
        let price = self.price(snapshot, manager, id, side)?;
        let available = self.available_to_buy_from_amm(snapshot, manager, id, side)?;
        if amount > available {
            return Err(AmmError::InsufficientLiquidity {
                requested: amount,
                available,
            });
        }

        let inventory = self.inventory(manager, id, side)?;
        let impact = buy_price_impact(inventory, amount, available, self.config.max_spread)?;
        let base = price + self.config.min_spread;
        let impact_increase = mul(mul(saturating_sub(Decimal::ONE, base), impact)?, IMPACT_BUFFER)?;
        let impacted = (price + impact_increase).min(self.config.max_supported_price);
        let unit_price = mul(
            impacted + self.config.min_spread,
            Decimal::ONE + self.config.safe_box_impact,
        )?;

        Ok(QuoteDetails {
            price,
            price_impact: impact,
            unit_price,
            quote: mul(amount, unit_price)?,
            available,
        })
    }

    pub fn buy_from_amm_quote(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<Decimal, AmmError> {
        Ok(self
            .buy_quote_details(snapshot, manager, id, side, amount)?
            .quote)
    }

    /// Full breakdown of the collateral paid out for selling `amount` units
    pub fn sell_quote_details(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<QuoteDetails, AmmError> {
        self.ensure_trading(snapshot, manager, id)?;
        if amount <= Decimal::ZERO {
            return Err(AmmError::ZeroAmount);
        }
        let price = self.price(snapshot, manager, id, side)?;
        let available = self.available_to_sell_to_amm(snapshot, manager, id, side)?;
        if amount > available {
            return Err(AmmError::InsufficientLiquidity {
                requested: amount,
                available,
            });
        }

        let inventory = self.inventory(manager, id, side)?;
        let impact = sell_price_impact(inventory, amount, available, self.config.max_spread)?;
        let impacted = mul(price, complement(impact))?.max(self.config.min_supported_price);
        let unit_price = mul(
            saturating_sub(impacted, self.config.min_spread),
            complement(self.config.safe_box_impact),
        )?;

        Ok(QuoteDetails {
            price,
            price_impact: impact,
            unit_price,
            quote: mul(amount, unit_price)?,
            available,
        })
    }

    pub fn sell_to_amm_quote(
        &self,
        snapshot: Snapshot<'_>,
        manager: &MarketManager,
        id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<Decimal, AmmError> {
        Ok(self
            .sell_quote_details(snapshot, manager, id, side, amount)?
            .quote)
    }

    /// Sell `amount` units of `side` to `buyer`.
    ///
    /// Fails when the fresh quote exceeds `expected * (1 + slippage)`.
    #[allow(clippy::too_many_arguments)]
    pub fn buy_from_amm(
        &mut self,
        tx: &mut Tx<'_>,
        manager: &mut MarketManager,
        buyer: &Address,
        id: MarketId,
        side: Side,
        amount: Decimal,
        expected: Decimal,
        slippage: Decimal,
    ) -> Result<TradeReceipt, AmmError> {
        self.ensure_not_paused(manager)?;
        let details = self.buy_quote_details(tx.snapshot(), manager, id, side, amount)?;
        let quote = details.quote;
        if quote > mul(expected, add(Decimal::ONE, slippage)?)? {
            return Err(AmmError::SlippageTooHigh { quote, expected });
        }

        let account = self.account.clone();
        tx.collateral
            .transfer_from(&account, buyer, &account, quote, &mut tx.events)?;

        let inventory = self.inventory(manager, id, side)?;
        let to_mint = saturating_sub(amount, inventory.position);
        if !to_mint.is_zero() {
            let mint_amount = to_mint.max(manager.config().min_mint_amount);
            let reserve = tx.collateral.balance_of(&account);
            if reserve < mint_amount {
                return Err(AmmError::InsufficientReserve {
                    needed: mint_amount,
                    available: reserve,
                });
            }
            manager.mint(tx, &account, id, mint_amount)?;
            let spent = self.spent_on_market.entry(id).or_insert(Decimal::ZERO);
            *spent = add(*spent, mint_amount)?;
        }
        manager.transfer_options(tx, id, side, &account, buyer, amount)?;

        let safe_box_share =
            quote - div(quote, Decimal::ONE + self.config.safe_box_impact)?;
        self.pay_safe_box(tx, safe_box_share)?;

        let spent = self.spent_on_market(id);
        self.spent_on_market
            .insert(id, saturating_sub(spent, quote - safe_box_share));

        tracing::info!(
            market = %id,
            %buyer,
            %side,
            %amount,
            %quote,
            impact = %details.price_impact,
            "Bought from AMM"
        );
        tx.emit(Event::BoughtFromAmm {
            market: id,
            buyer: buyer.clone(),
            side,
            amount,
            paid: quote,
        });
        Ok(TradeReceipt {
            id: Uuid::new_v4(),
            market: id,
            side,
            direction: TradeDirection::Buy,
            trader: buyer.clone(),
            amount,
            quote,
            safe_box_share,
            timestamp: tx.now,
        })
    }

    /// Buy `amount` units of `side` back from `seller`.
    ///
    /// The seller must have approved the AMM on the option token. Fails
    /// when `expected` exceeds the fresh quote by more than `slippage`.
    #[allow(clippy::too_many_arguments)]
    pub fn sell_to_amm(
        &mut self,
        tx: &mut Tx<'_>,
        manager: &mut MarketManager,
        seller: &Address,
        id: MarketId,
        side: Side,
        amount: Decimal,
        expected: Decimal,
        slippage: Decimal,
    ) -> Result<TradeReceipt, AmmError> {
        self.ensure_not_paused(manager)?;
        let details = self.sell_quote_details(tx.snapshot(), manager, id, side, amount)?;
        let quote = details.quote;
        if expected > mul(quote, add(Decimal::ONE, slippage)?)? {
            return Err(AmmError::SlippageTooHigh { quote, expected });
        }

        let account = self.account.clone();
        manager.transfer_options_from(tx, id, side, &account, seller, &account, amount)?;

        // Net matching pairs back into collateral
        let burnable = manager.market(id)?.burn_options_maximum(&account);
        if !burnable.is_zero() {
            manager.burn_options(tx, &account, id, burnable)?;
        }

        let safe_box_share =
            div(quote, complement(self.config.safe_box_impact))? - quote;
        let reserve = tx.collateral.balance_of(&account);
        if reserve < quote + safe_box_share {
            return Err(AmmError::InsufficientReserve {
                needed: quote + safe_box_share,
                available: reserve,
            });
        }
        tx.collateral
            .transfer(&account, seller, quote, &mut tx.events)?;
        self.pay_safe_box(tx, safe_box_share)?;

        let spent = self.spent_on_market(id);
        self.spent_on_market.insert(
            id,
            saturating_sub(spent + quote + safe_box_share, burnable),
        );

        tracing::info!(
            market = %id,
            %seller,
            %side,
            %amount,
            %quote,
            impact = %details.price_impact,
            "Sold to AMM"
        );
        tx.emit(Event::SoldToAmm {
            market: id,
            seller: seller.clone(),
            side,
            amount,
            received: quote,
        });
        Ok(TradeReceipt {
            id: Uuid::new_v4(),
            market: id,
            side,
            direction: TradeDirection::Sell,
            trader: seller.clone(),
            amount,
            quote,
            safe_box_share,
            timestamp: tx.now,
        })
    }

    fn pay_safe_box(&self, tx: &mut Tx<'_>, share: Decimal) -> Result<(), AmmError> {
        if share <= Decimal::ZERO || self.config.safe_box.is_zero() {
            return Ok(());
        }
        tx.collateral
            .transfer(&self.account, &self.config.safe_box, share, &mut tx.events)?;
        Ok(())
    }

    /// Exercise the AMM's own inventory of a matured market
    pub fn exercise_matured_market(
        &mut self,
        tx: &mut Tx<'_>,
        manager: &mut MarketManager,
        id: MarketId,
    ) -> Result<Decimal, AmmError> {
        let market = manager.market(id)?;
        if market.phase(tx.now) != Phase::Maturity {
            return Err(AmmError::NotInMaturityPhase);
        }
        let balances = market.balances_of(&self.account);
        if balances.long.is_zero() && balances.short.is_zero() {
            return Ok(Decimal::ZERO);
        }
        if !market.is_resolved() {
            manager.resolve_market(tx, id)?;
        }
        let result = manager.market(id)?.resolution().map(|r| r.result);
        if result.map_or(true, |side| balances.of(side).is_zero()) {
            // Only losing units left; they are worthless
            return Ok(Decimal::ZERO);
        }
        let paid = manager.exercise_options(tx, &self.account, id)?;
        tracing::info!(market = %id, %paid, "AMM exercised matured market");
        Ok(paid)
    }

    // Administration

    pub fn set_paused(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        paused: bool,
    ) -> Result<(), AmmError> {
        self.ensure_owner(caller)?;
        self.paused = paused;
        tx.emit(Event::parameter(COMPONENT, "paused", paused));
        Ok(())
    }

    pub fn set_implied_volatility(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        key: OracleKey,
        volatility: Decimal,
    ) -> Result<(), AmmError> {
        self.ensure_owner(caller)?;
        check_volatility(volatility)?;
        tx.emit(Event::parameter(
            COMPONENT,
            "implied_volatility",
            format!("{}={}", key, volatility),
        ));
        self.implied_volatility.insert(key, volatility);
        Ok(())
    }

    pub fn set_cap_per_market(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        cap: Decimal,
    ) -> Result<(), AmmError> {
        self.ensure_owner(caller)?;
        check_non_negative("cap_per_market", cap)?;
        self.config.cap_per_market = cap;
        tx.emit(Event::parameter(COMPONENT, "cap_per_market", cap));
        Ok(())
    }

    /// Override the cap of a single market
    pub fn set_cap_on_market(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        id: MarketId,
        cap: Decimal,
    ) -> Result<(), AmmError> {
        self.ensure_owner(caller)?;
        check_non_negative("cap_on_market", cap)?;
        self.cap_on_market.insert(id, cap);
        tx.emit(Event::parameter(
            COMPONENT,
            "cap_on_market",
            format!("{}={}", id, cap),
        ));
        Ok(())
    }

    pub fn set_min_max_supported_price(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        min: Decimal,
        max: Decimal,
    ) -> Result<(), AmmError> {
        self.ensure_owner(caller)?;
        if min <= Decimal::ZERO || min >= max {
            return Err(AmmError::InvalidParameter {
                name: "min_supported_price",
                value: min,
            });
        }
        if max >= Decimal::ONE {
            return Err(AmmError::InvalidParameter {
                name: "max_supported_price",
                value: max,
            });
        }
        self.config.min_supported_price = min;
        self.config.max_supported_price = max;
        tx.emit(Event::parameter(COMPONENT, "min_supported_price", min));
        tx.emit(Event::parameter(COMPONENT, "max_supported_price", max));
        Ok(())
    }

    pub fn set_min_max_spread(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        min: Decimal,
        max: Decimal,
    ) -> Result<(), AmmError> {
        self.ensure_owner(caller)?;
        check_non_negative("min_spread", min)?;
        if max < min || max >= Decimal::ONE {
            return Err(AmmError::InvalidParameter {
                name: "max_spread",
                value: max,
            });
        }
        self.config.min_spread = min;
        self.config.max_spread = max;
        tx.emit(Event::parameter(COMPONENT, "min_spread", min));
        tx.emit(Event::parameter(COMPONENT, "max_spread", max));
        Ok(())
    }

    pub fn set_safe_box_params(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        safe_box: Address,
        impact: Decimal,
    ) -> Result<(), AmmError> {
        self.ensure_owner(caller)?;
        check_non_negative("safe_box_impact", impact)?;
        if impact >= Decimal::ONE {
            return Err(AmmError::InvalidParameter {
                name: "safe_box_impact",
                value: impact,
            });
        }
        tx.emit(Event::parameter(COMPONENT, "safe_box", &safe_box));
        tx.emit(Event::parameter(COMPONENT, "safe_box_impact", impact));
        self.config.safe_box = safe_box;
        self.config.safe_box_impact = impact;
        Ok(())
    }

    pub fn set_minimal_time_left_to_maturity(
        &mut self,
        tx: &mut Tx<'_>,
        caller: &Address,
        value: Duration,
    ) -> Result<(), AmmError> {
        self.ensure_owner(caller)?;
        self.config.minimal_time_left_to_maturity_secs = value.num_seconds().max(0) as u64;
        tx.emit(Event::parameter(
            COMPONENT,
            "minimal_time_left_to_maturity",
            value,
        ));
        Ok(())
    }
}

fn check_volatility(volatility: Decimal) -> Result<(), AmmError> {
    if volatility <= MIN_IMPLIED_VOLATILITY || volatility >= MAX_IMPLIED_VOLATILITY {
        return Err(AmmError::InvalidVolatility(volatility));
    }
    Ok(())
}

fn check_non_negative(name: &'static str, value: Decimal) -> Result<(), AmmError> {
    if value < Decimal::ZERO {
        return Err(AmmError::InvalidParameter { name, value });
    }
    Ok(())
}
