//! Integration tests for AMM quoting and trading

use chrono::{DateTime, Duration, TimeZone, Utc};
use optmarket::amm::{AmmError, TradeDirection};
use optmarket::clock::ManualClock;
use optmarket::config::{Config, VolatilityConfig};
use optmarket::engine::{EngineError, Exchange, Setting};
use optmarket::manager::CreateMarket;
use optmarket::oracle::StaticOracle;
use optmarket::types::{Address, MarketId, OracleKey, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap()
}

struct Harness {
    ex: Exchange,
    oracle: Arc<StaticOracle>,
    clock: Arc<ManualClock>,
    owner: Address,
    bob: Address,
}

impl Harness {
    fn new() -> Self {
        let mut config = Config::default();
        config.amm.initial_reserve = dec!(5000);
        config.amm.implied_volatility = vec![VolatilityConfig {
            key: "BTC".to_string(),
            volatility: dec!(0.8),
        }];
        let oracle = Arc::new(StaticOracle::new());
        oracle.set_price("BTC", dec!(100), start());
        oracle.set_price("ETH", dec!(10), start());
        let clock = Arc::new(ManualClock::new(start()));
        let mut ex = Exchange::new(&config, oracle.clone(), clock.clone()).unwrap();

        let bob = Address::from("bob");
        ex.fund(&bob, dec!(1000)).unwrap();
        ex.approve_collateral(&bob, &Address::amm(), Decimal::MAX)
            .unwrap();

        Self {
            ex,
            oracle,
            clock,
            owner: config.owner,
            bob,
        }
    }

    fn market(&mut self, key: &str, strike: Decimal, maturity: Duration) -> MarketId {
        let alice = Address::from("alice");
        self.ex.fund(&alice, dec!(10)).unwrap();
        self.ex
            .approve_collateral(&alice, &Address::manager(), Decimal::MAX)
            .unwrap();
        self.ex
            .create_market(
                &alice,
                CreateMarket {
                    oracle_key: OracleKey::new(key),
                    strike_price: strike,
                    maturity: self.ex.now() + maturity,
                    initial_mint: dec!(10),
                },
            )
            .unwrap()
    }

    fn buy(&mut self, id: MarketId, side: Side, amount: Decimal) -> Decimal {
        let quote = self.ex.buy_from_amm_quote(id, side, amount).unwrap();
        let bob = self.bob.clone();
        self.ex
            .buy_from_amm(&bob, id, side, amount, quote, dec!(0.01))
            .unwrap()
            .quote
    }
}

#[test]
fn test_prices_are_complementary() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(100), Duration::days(7));

    let long = h.ex.price(id, Side::Long).unwrap();
    let short = h.ex.price(id, Side::Short).unwrap();
    assert_eq!(long + short, Decimal::ONE);
    assert!(long > dec!(0.45) && long < dec!(0.55), "long = {}", long);

    h.oracle.set_price("BTC", dec!(110), h.ex.now());
    let higher = h.ex.price(id, Side::Long).unwrap();
    assert!(higher > long);
    assert_eq!(higher + h.ex.price(id, Side::Short).unwrap(), Decimal::ONE);
}

#[test]
fn test_buy_quote_includes_spread_and_safe_box() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(100), Duration::days(7));

    let details = h.ex.buy_quote_details(id, Side::Long, dec!(100)).unwrap();
    let floor = details.price + dec!(0.02);
    assert!(details.price_impact > Decimal::ZERO);
    assert!(details.unit_price > floor);
    assert_eq!(details.quote, details.unit_price * dec!(100));
    assert!(details.available > dec!(100));

    let sell = h.ex.sell_quote_details(id, Side::Long, dec!(100)).unwrap();
    assert!(sell.unit_price < details.price - dec!(0.02));
}

#[test]
fn test_buy_from_amm_moves_balances() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(100), Duration::days(7));
    let reserve = h.ex.collateral_balance(&Address::amm());

    let quote = h.buy(id, Side::Long, dec!(100));

    assert_eq!(h.ex.option_balance(id, Side::Long, &h.bob), dec!(100));
    assert_eq!(h.ex.collateral_balance(&h.bob), dec!(1000) - quote);
    // The AMM mints fee free and keeps the opposite side
    assert_eq!(h.ex.option_balance(id, Side::Short, &Address::amm()), dec!(100));
    assert_eq!(h.ex.option_balance(id, Side::Long, &Address::amm()), Decimal::ZERO);

    let safe_box = h.ex.collateral_balance(&Address::from("safe-box"));
    assert!(safe_box > Decimal::ZERO);
    assert_eq!(
        h.ex.collateral_balance(&Address::amm()),
        reserve - dec!(100) + quote - safe_box
    );
    assert!(h.ex.amm().spent_on_market(id) > Decimal::ZERO);
    assert!(h.ex.amm().spent_on_market(id) < dec!(100));
}

#[test]
fn test_buy_rejects_slippage_without_side_effects() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(100), Duration::days(7));
    let quote = h.ex.buy_from_amm_quote(id, Side::Short, dec!(50)).unwrap();
    let events = h.ex.events().len();

    let bob = h.bob.clone();
    let err = h
        .ex
        .buy_from_amm(&bob, id, Side::Short, dec!(50), quote / dec!(2), dec!(0.01))
        .unwrap_err();
    assert!(matches!(err, EngineError::Amm(AmmError::SlippageTooHigh { .. })));
    assert_eq!(h.ex.events().len(), events);
    assert_eq!(h.ex.collateral_balance(&bob), dec!(1000));
    assert_eq!(h.ex.option_balance(id, Side::Short, &bob), Decimal::ZERO);
}

#[test]
fn test_buy_above_available_is_rejected() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(100), Duration::days(7));
    let available = h.ex.available_to_buy_from_amm(id, Side::Long).unwrap();
    assert!(available > Decimal::ZERO);

    assert!(matches!(
        h.ex.buy_from_amm_quote(id, Side::Long, available + dec!(1)),
        Err(EngineError::Amm(AmmError::InsufficientLiquidity { .. }))
    ));

    let owner = h.owner.clone();
    h.ex.configure(&owner, Setting::CapOnMarket { market: id, cap: dec!(10) })
        .unwrap();
    let capped = h.ex.available_to_buy_from_amm(id, Side::Long).unwrap();
    assert!(capped < available);
    assert!(capped < dec!(50));
}

#[test]
fn test_sell_to_amm_requires_option_allowance() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(100), Duration::days(7));
    h.buy(id, Side::Long, dec!(100));
    let bob = h.bob.clone();

    let quote = h.ex.sell_to_amm_quote(id, Side::Long, dec!(40)).unwrap();
    let price = h.ex.price(id, Side::Long).unwrap();
    assert!(quote < price * dec!(40));
    assert!(h
        .ex
        .sell_to_amm(&bob, id, Side::Long, dec!(40), quote, dec!(0.01))
        .is_err());

    h.ex.approve_options(id, Side::Long, &bob, &Address::amm(), Decimal::MAX)
        .unwrap();
    let before = h.ex.collateral_balance(&bob);
    let receipt = h
        .ex
        .sell_to_amm(&bob, id, Side::Long, dec!(40), quote, dec!(0.01))
        .unwrap();
    assert_eq!(receipt.direction, TradeDirection::Sell);
    assert_eq!(receipt.quote, quote);
    assert_eq!(h.ex.collateral_balance(&bob), before + quote);
    assert_eq!(h.ex.option_balance(id, Side::Long, &bob), dec!(60));

    // Matching pairs are burned back into collateral
    assert_eq!(h.ex.option_balance(id, Side::Long, &Address::amm()), Decimal::ZERO);
    assert_eq!(h.ex.option_balance(id, Side::Short, &Address::amm()), dec!(60));

    let market = h.ex.market(id).unwrap();
    assert_eq!(market.supply(Side::Long), market.supply(Side::Short));
}

#[test]
fn test_sell_rejects_expected_above_quote() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(100), Duration::days(7));
    h.buy(id, Side::Short, dec!(30));
    let bob = h.bob.clone();
    h.ex.approve_options(id, Side::Short, &bob, &Address::amm(), Decimal::MAX)
        .unwrap();

    let quote = h.ex.sell_to_amm_quote(id, Side::Short, dec!(10)).unwrap();
    assert!(matches!(
        h.ex.sell_to_amm(&bob, id, Side::Short, dec!(10), quote * dec!(2), dec!(0.01)),
        Err(EngineError::Amm(AmmError::SlippageTooHigh { .. }))
    ));
    assert_eq!(h.ex.option_balance(id, Side::Short, &bob), dec!(30));
}

#[test]
fn test_trading_stops_near_maturity() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(100), Duration::hours(3));
    assert!(h.ex.is_market_in_amm_trading(id));

    h.clock.advance(Duration::hours(2) + Duration::minutes(30));
    h.oracle.set_price("BTC", dec!(100), h.ex.now());
    assert!(!h.ex.is_market_in_amm_trading(id));
    assert_eq!(
        h.ex.available_to_buy_from_amm(id, Side::Long).unwrap(),
        Decimal::ZERO
    );
    assert_eq!(
        h.ex.buy_from_amm_quote(id, Side::Long, dec!(1)),
        Err(EngineError::Amm(AmmError::NotInTradingPhase))
    );
}

#[test]
fn test_market_without_volatility_is_not_quoted() {
    let mut h = Harness::new();
    let id = h.market("ETH", dec!(10), Duration::days(7));
    assert!(matches!(
        h.ex.price(id, Side::Long),
        Err(EngineError::Amm(AmmError::UnsupportedMarket(_)))
    ));

    let owner = h.owner.clone();
    assert!(matches!(
        h.ex.configure(
            &owner,
            Setting::ImpliedVolatility {
                key: OracleKey::new("ETH"),
                volatility: dec!(0.5),
            }
        ),
        Err(EngineError::Amm(AmmError::InvalidVolatility(_)))
    ));
    h.ex.configure(
        &owner,
        Setting::ImpliedVolatility {
            key: OracleKey::new("ETH"),
            volatility: dec!(1.2),
        },
    )
    .unwrap();
    assert!(h.ex.price(id, Side::Long).is_ok());
}

#[test]
fn test_extreme_odds_are_not_traded() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(50), Duration::days(2));
    assert!(matches!(
        h.ex.price(id, Side::Long),
        Err(EngineError::Amm(AmmError::UnsupportedPrice(odds))) if odds >= dec!(0.9)
    ));
    assert!(matches!(
        h.ex.price(id, Side::Short),
        Err(EngineError::Amm(AmmError::UnsupportedPrice(odds))) if odds <= dec!(0.1)
    ));
    assert_eq!(
        h.ex.available_to_buy_from_amm(id, Side::Long).unwrap(),
        Decimal::ZERO
    );
    assert_eq!(
        h.ex.available_to_buy_from_amm(id, Side::Short).unwrap(),
        Decimal::ZERO
    );
    assert!(matches!(
        h.ex.buy_from_amm_quote(id, Side::Long, dec!(1)),
        Err(EngineError::Amm(AmmError::UnsupportedPrice(_)))
    ));
    assert!(matches!(
        h.ex.sell_to_amm_quote(id, Side::Short, dec!(1)),
        Err(EngineError::Amm(AmmError::UnsupportedPrice(_)))
    ));
}

#[test]
fn test_paused_amm_rejects_trades() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(100), Duration::days(7));
    let quote = h.ex.buy_from_amm_quote(id, Side::Long, dec!(10)).unwrap();
    let owner = h.owner.clone();
    h.ex.configure(&owner, Setting::AmmPaused { value: true })
        .unwrap();

    let bob = h.bob.clone();
    assert_eq!(
        h.ex.buy_from_amm(&bob, id, Side::Long, dec!(10), quote, dec!(0.01))
            .unwrap_err(),
        EngineError::Amm(AmmError::Paused)
    );
}

#[test]
fn test_exercise_matured_market() {
    let mut h = Harness::new();
    let id = h.market("BTC", dec!(100), Duration::days(2));
    h.buy(id, Side::Long, dec!(80));

    assert_eq!(
        h.ex.exercise_matured_market(id),
        Err(EngineError::Amm(AmmError::NotInMaturityPhase))
    );

    let maturity = h.ex.market(id).unwrap().maturity();
    h.clock.set(maturity + Duration::minutes(1));
    h.oracle.set_price("BTC", dec!(92), h.ex.now());

    let reserve = h.ex.collateral_balance(&Address::amm());
    let paid = h.ex.exercise_matured_market(id).unwrap();
    assert_eq!(paid, dec!(80));
    assert_eq!(h.ex.collateral_balance(&Address::amm()), reserve + dec!(80));
    assert!(h.ex.market(id).unwrap().is_resolved());
    assert_eq!(h.ex.option_balance(id, Side::Short, &Address::amm()), Decimal::ZERO);

    // Nothing left to exercise
    assert_eq!(h.ex.exercise_matured_market(id), Ok(Decimal::ZERO));
}
