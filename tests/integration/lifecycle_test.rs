//! Integration tests for the market lifecycle: create, mint, resolve,
//! exercise, burn and expire

use chrono::{DateTime, Duration, TimeZone, Utc};
use optmarket::clock::ManualClock;
use optmarket::config::Config;
use optmarket::engine::{EngineError, Exchange, Setting};
use optmarket::events::Event;
use optmarket::manager::{CreateMarket, ManagerError};
use optmarket::market::{MarketError, Phase};
use optmarket::oracle::StaticOracle;
use optmarket::types::{Address, MarketId, OracleKey, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

struct Harness {
    ex: Exchange,
    oracle: Arc<StaticOracle>,
    clock: Arc<ManualClock>,
    owner: Address,
}

impl Harness {
    fn new() -> Self {
        let oracle = Arc::new(StaticOracle::new());
        oracle.set_price("BTC", dec!(100), start());
        let clock = Arc::new(ManualClock::new(start()));
        let config = Config::default();
        let ex = Exchange::new(&config, oracle.clone(), clock.clone()).unwrap();
        let owner = config.owner.clone();
        Self {
            ex,
            oracle,
            clock,
            owner,
        }
    }

    fn funded(&mut self, name: &str, amount: Decimal) -> Address {
        let account = Address::from(name);
        self.ex.fund(&account, amount).unwrap();
        self.ex
            .approve_collateral(&account, &Address::manager(), Decimal::MAX)
            .unwrap();
        account
    }

    fn create(&mut self, creator: &Address, strike: Decimal, maturity: Duration, mint: Decimal) -> MarketId {
        self.ex
            .create_market(
                creator,
                CreateMarket {
                    oracle_key: OracleKey::new("BTC"),
                    strike_price: strike,
                    maturity: self.ex.now() + maturity,
                    initial_mint: mint,
                },
            )
            .unwrap()
    }

    /// Move past maturity and publish a fresh price
    fn mature(&self, id: MarketId, price: Decimal) {
        let maturity = self.ex.market(id).unwrap().maturity();
        self.clock.set(maturity + Duration::seconds(1));
        self.oracle.set_price("BTC", price, maturity + Duration::seconds(1));
    }

    fn deposited_sum(&self) -> Decimal {
        let manager = self.ex.manager();
        manager
            .active_markets()
            .into_iter()
            .chain(manager.matured_markets())
            .map(|id| manager.market(id).unwrap().deposited())
            .sum()
    }
}

#[test]
fn test_create_market_splits_fees() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::seconds(200), dec!(2));

    assert_eq!(h.ex.option_balance(id, Side::Long, &alice), dec!(1.98));
    assert_eq!(h.ex.option_balance(id, Side::Short, &alice), dec!(1.98));
    let market = h.ex.market(id).unwrap();
    assert_eq!(market.deposited(), dec!(1.98));
    assert_eq!(market.accrued_fees(), (dec!(0.01), dec!(0.01)));
    assert_eq!(market.phase(h.ex.now()), Phase::Trading);
    assert_eq!(h.ex.manager().total_deposited(), dec!(1.98));
    assert_eq!(h.ex.collateral_balance(&alice), dec!(98));
    assert_eq!(h.ex.collateral_balance(&market.account()), dec!(2));
}

#[test]
fn test_resolve_and_exercise() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::seconds(200), dec!(2));

    h.mature(id, dec!(101));
    assert!(h.ex.can_resolve(id).unwrap());
    assert_eq!(h.ex.result(id), Ok(Side::Long));

    let resolution = h.ex.resolve_market(id).unwrap();
    assert_eq!(resolution.final_price, dec!(101));
    assert_eq!(resolution.result, Side::Long);
    assert_eq!(h.ex.collateral_balance(&Address::from("fee-pool")), dec!(0.01));
    assert_eq!(h.ex.collateral_balance(&alice), dec!(98.01));
    assert_eq!(h.ex.manager().matured_markets(), vec![id]);
    assert!(h.ex.manager().active_markets().is_empty());

    // Later prices do not move a resolved market
    h.oracle.set_price("BTC", dec!(50), h.ex.now());
    assert_eq!(h.ex.result(id), Ok(Side::Long));

    let from = h.ex.events().len() as u64;
    let paid = h.ex.exercise_options(&alice, id).unwrap();
    assert_eq!(paid, dec!(1.98));
    assert_eq!(h.ex.option_balance(id, Side::Long, &alice), Decimal::ZERO);
    // Losing options stay with the holder
    assert_eq!(h.ex.option_balance(id, Side::Short, &alice), dec!(1.98));
    assert_eq!(h.ex.market(id).unwrap().supply(Side::Short), dec!(1.98));
    assert_eq!(h.ex.collateral_balance(&alice), dec!(99.99));
    assert_eq!(h.ex.manager().total_deposited(), Decimal::ZERO);

    let events: Vec<&Event> = h.ex.events_since(from).iter().map(|r| &r.event).collect();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Burned { side: Side::Long, value, .. } if *value == dec!(1.98)
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::Burned { side: Side::Short, .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::OptionsExercised { value, .. } if *value == dec!(1.98)
    )));
}

#[test]
fn test_resolve_before_maturity_fails() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::seconds(200), dec!(2));
    let events = h.ex.events().len();

    let err = h.ex.resolve_market(id).unwrap_err();
    assert_eq!(err.to_string(), "Not yet mature");
    assert!(!h.ex.can_resolve(id).unwrap());
    assert!(!h.ex.market(id).unwrap().is_resolved());
    assert_eq!(h.ex.events().len(), events);
}

#[test]
fn test_resolve_twice_is_rejected() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::hours(1), dec!(2));
    h.mature(id, dec!(120));
    h.ex.resolve_market(id).unwrap();

    h.oracle.set_price("BTC", dec!(80), h.ex.now());
    assert_eq!(
        h.ex.resolve_market(id),
        Err(EngineError::Manager(ManagerError::NotActiveMarket(id)))
    );
    let resolution = h.ex.market(id).unwrap().resolution().copied().unwrap();
    assert_eq!(resolution.final_price, dec!(120));
    assert_eq!(resolution.result, Side::Long);
}

#[test]
fn test_final_price_equal_to_strike_resolves_long() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::hours(1), dec!(2));
    h.mature(id, dec!(100));
    assert_eq!(h.ex.resolve_market(id).unwrap().result, Side::Long);
}

#[test]
fn test_price_age_boundary() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::hours(4), dec!(2));
    let maturity = h.ex.market(id).unwrap().maturity();
    let max_age = Config::default().manager.max_oracle_price_age();
    h.clock.set(maturity);

    h.oracle
        .set_price("BTC", dec!(110), maturity - max_age - Duration::seconds(1));
    assert!(!h.ex.can_resolve(id).unwrap());
    assert!(matches!(
        h.ex.resolve_market(id),
        Err(EngineError::Manager(ManagerError::Market(
            MarketError::StalePrice { .. }
        )))
    ));

    h.oracle.set_price("BTC", dec!(110), maturity - max_age);
    assert!(h.ex.can_resolve(id).unwrap());
    assert_eq!(h.ex.resolve_market(id).unwrap().final_price, dec!(110));
}

#[test]
fn test_mint_minimum_notional() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let bob = h.funded("bob", dec!(10));
    let id = h.create(&alice, dec!(100), Duration::days(1), dec!(2));

    let err = h.ex.mint(&bob, id, dec!(0.0099)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Manager(ManagerError::Market(MarketError::MintTooSmall { .. }))
    ));

    let outcome = h.ex.mint(&bob, id, dec!(0.01)).unwrap();
    assert_eq!(outcome.minted, dec!(0.0099));
    assert_eq!(h.ex.option_balance(id, Side::Long, &bob), dec!(0.0099));

    // Zero is a no-op
    let outcome = h.ex.mint(&bob, id, Decimal::ZERO).unwrap();
    assert_eq!(outcome.minted, Decimal::ZERO);
}

#[test]
fn test_supplies_and_deposits_stay_consistent() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(1000));
    let bob = h.funded("bob", dec!(1000));
    let first = h.create(&alice, dec!(100), Duration::days(1), dec!(10));
    let second = h.create(&bob, dec!(90), Duration::days(2), dec!(25));

    h.ex.mint(&bob, first, dec!(40)).unwrap();
    h.ex.mint(&alice, second, dec!(7.5)).unwrap();
    h.ex.burn_options(&bob, first, dec!(12)).unwrap();
    h.ex.transfer_options(second, Side::Long, &bob, &alice, dec!(5))
        .unwrap();

    for id in [first, second] {
        let market = h.ex.market(id).unwrap();
        assert_eq!(market.supply(Side::Long), market.supply(Side::Short));
        assert_eq!(market.supply(Side::Long), market.deposited());
    }
    assert_eq!(h.ex.manager().total_deposited(), h.deposited_sum());

    h.mature(first, dec!(95));
    h.ex.exercise_options(&bob, first).unwrap();
    assert_eq!(h.ex.manager().total_deposited(), h.deposited_sum());
}

#[test]
fn test_burn_options_returns_collateral() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::days(1), dec!(10));

    assert_eq!(h.ex.burn_options(&alice, id, dec!(4)).unwrap(), dec!(4));
    assert_eq!(h.ex.option_balance(id, Side::Long, &alice), dec!(5.9));
    assert_eq!(h.ex.collateral_balance(&alice), dec!(94));
    assert_eq!(h.ex.market(id).unwrap().deposited(), dec!(5.9));

    let err = h.ex.burn_options(&alice, id, dec!(6)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Manager(ManagerError::Market(
            MarketError::InsufficientOptions { .. }
        ))
    ));
}

#[test]
fn test_create_market_validation() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let request = |key: &str, maturity: DateTime<Utc>, mint: Decimal| CreateMarket {
        oracle_key: OracleKey::new(key),
        strike_price: dec!(100),
        maturity,
        initial_mint: mint,
    };
    let now = h.ex.now();

    assert!(matches!(
        h.ex.create_market(&alice, request("DOGE", now + Duration::days(1), dec!(2))),
        Err(EngineError::Manager(ManagerError::InvalidKey(_)))
    ));
    assert_eq!(
        h.ex.create_market(&alice, request("BTC", now, dec!(2))),
        Err(EngineError::Manager(ManagerError::MaturityInPast))
    );
    assert_eq!(
        h.ex.create_market(&alice, request("BTC", now + Duration::days(731), dec!(2))),
        Err(EngineError::Manager(ManagerError::MaturityTooFar))
    );
    assert!(matches!(
        h.ex.create_market(&alice, request("BTC", now + Duration::days(1), dec!(1.5))),
        Err(EngineError::Manager(ManagerError::InsufficientCapital { .. }))
    ));

    let owner = h.owner.clone();
    h.ex.configure(&owner, Setting::MarketCreationEnabled { value: false })
        .unwrap();
    assert_eq!(
        h.ex.create_market(&alice, request("BTC", now + Duration::days(1), dec!(2))),
        Err(EngineError::Manager(ManagerError::CreationDisabled))
    );

    assert!(h.ex.manager().active_markets().is_empty());
    assert_eq!(h.ex.collateral_balance(&alice), dec!(100));
}

#[test]
fn test_expire_requires_all_winners_exercised() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let bob = Address::from("bob");
    let id = h.create(&alice, dec!(100), Duration::hours(2), dec!(10));
    h.ex.transfer_options(id, Side::Long, &alice, &bob, dec!(4))
        .unwrap();

    h.mature(id, dec!(105));
    h.ex.exercise_options(&alice, id).unwrap();

    let owner = h.owner.clone();
    let err = h.ex.expire_markets(&owner, &[id]).unwrap_err();
    assert_eq!(err.to_string(), "Unexpired options remaining");
    assert!(h.ex.manager().is_known_market(id));

    assert_eq!(h.ex.exercise_options(&bob, id).unwrap(), dec!(4));
    let expired = h.ex.expire_markets(&owner, &[id]).unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].market, id);
    assert!(!h.ex.manager().is_known_market(id));
    assert!(h.ex.manager().matured_markets().is_empty());

    assert_eq!(
        h.ex.expire_markets(&owner, &[id]),
        Err(EngineError::Manager(ManagerError::MarketNotFound(id)))
    );
    assert_eq!(
        h.ex.exercise_options(&bob, id).unwrap_err().to_string(),
        "Market no longer exists"
    );
}

#[test]
fn test_expire_after_expiry_sweeps_collateral() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::hours(2), dec!(10));
    h.mature(id, dec!(90));
    h.ex.resolve_market(id).unwrap();

    let expiry = h.ex.market(id).unwrap().expiry();
    h.clock.set(expiry);
    assert_eq!(h.ex.market(id).unwrap().phase(h.ex.now()), Phase::Expiry);

    let owner = h.owner.clone();
    let before = h.ex.collateral_balance(&owner);
    let expired = h.ex.expire_markets(&owner, &[id]).unwrap();
    assert_eq!(expired[0].released, dec!(9.9));
    assert_eq!(h.ex.collateral_balance(&owner) - before, dec!(9.9));
    assert_eq!(h.ex.manager().total_deposited(), Decimal::ZERO);
    assert!(h
        .ex
        .events()
        .of_kind("market_expired")
        .any(|e| matches!(e, Event::MarketExpired { remitted, .. } if *remitted == dec!(9.9))));
}

#[test]
fn test_expire_sweeps_stray_collateral() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::hours(2), dec!(10));

    // Collateral sent straight to the market is not tracked as deposited
    let market_account = h.ex.market(id).unwrap().account();
    h.ex.transfer_collateral(&alice, &market_account, dec!(3))
        .unwrap();
    assert_eq!(h.ex.market(id).unwrap().deposited(), dec!(9.9));

    h.mature(id, dec!(101));
    h.ex.resolve_market(id).unwrap();
    h.ex.exercise_options(&alice, id).unwrap();
    assert_eq!(h.ex.collateral_balance(&market_account), dec!(3));

    let owner = h.owner.clone();
    let before = h.ex.collateral_balance(&owner);
    let from = h.ex.events().len() as u64;
    let expired = h.ex.expire_markets(&owner, &[id]).unwrap();
    assert_eq!(expired[0].released, Decimal::ZERO);
    assert_eq!(h.ex.collateral_balance(&owner) - before, dec!(3));
    assert_eq!(h.ex.collateral_balance(&market_account), Decimal::ZERO);
    assert!(h.ex.events_since(from).iter().any(|r| matches!(
        r.event,
        Event::MarketExpired { remitted, .. } if remitted == dec!(3)
    )));
}

#[test]
fn test_expire_at_expiry_remits_tracked_and_stray_collateral() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::hours(2), dec!(10));
    let market_account = h.ex.market(id).unwrap().account();
    h.ex.transfer_collateral(&alice, &market_account, dec!(3))
        .unwrap();

    h.mature(id, dec!(90));
    h.ex.resolve_market(id).unwrap();
    h.clock.set(h.ex.market(id).unwrap().expiry());

    let owner = h.owner.clone();
    let before = h.ex.collateral_balance(&owner);
    let from = h.ex.events().len() as u64;
    let expired = h.ex.expire_markets(&owner, &[id]).unwrap();
    assert_eq!(expired[0].released, dec!(9.9));
    assert_eq!(h.ex.collateral_balance(&owner) - before, dec!(12.9));
    assert_eq!(h.ex.manager().total_deposited(), Decimal::ZERO);
    assert!(h.ex.events_since(from).iter().any(|r| matches!(
        r.event,
        Event::MarketExpired { remitted, .. } if remitted == dec!(12.9)
    )));
}

#[test]
fn test_expire_rejects_duplicate_ids() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::hours(2), dec!(5));
    h.mature(id, dec!(101));
    h.ex.exercise_options(&alice, id).unwrap();

    let owner = h.owner.clone();
    assert_eq!(
        h.ex.expire_markets(&owner, &[id, id]),
        Err(EngineError::Manager(ManagerError::DuplicateMarket(id)))
    );
    assert!(h.ex.manager().is_known_market(id));
    assert_eq!(h.ex.expire_markets(&owner, &[id]).unwrap().len(), 1);
}

#[test]
fn test_expire_batch_is_all_or_nothing() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let settled = h.create(&alice, dec!(100), Duration::hours(2), dec!(5));
    let open = h.create(&alice, dec!(100), Duration::days(3), dec!(5));
    h.mature(settled, dec!(101));
    h.ex.exercise_options(&alice, settled).unwrap();

    let owner = h.owner.clone();
    assert!(h.ex.expire_markets(&owner, &[settled, open]).is_err());
    assert!(h.ex.manager().is_known_market(settled));
    assert!(h.ex.manager().is_known_market(open));

    assert!(matches!(
        h.ex.expire_markets(&alice, &[settled]),
        Err(EngineError::Manager(ManagerError::Unauthorized(_)))
    ));
    h.ex.expire_markets(&owner, &[settled]).unwrap();
    assert!(h.ex.manager().is_known_market(open));
}

#[test]
fn test_pause_blocks_mutations() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let id = h.create(&alice, dec!(100), Duration::days(1), dec!(10));
    let owner = h.owner.clone();
    h.ex.configure(&owner, Setting::Paused { value: true }).unwrap();

    assert_eq!(
        h.ex.mint(&alice, id, dec!(1)),
        Err(EngineError::Manager(ManagerError::Paused))
    );
    assert_eq!(
        h.ex.burn_options(&alice, id, dec!(1)),
        Err(EngineError::Manager(ManagerError::Paused))
    );
    assert!(h
        .ex
        .transfer_options(id, Side::Long, &alice, &owner, dec!(1))
        .is_err());

    h.ex.configure(&owner, Setting::Paused { value: false })
        .unwrap();
    h.ex.mint(&alice, id, dec!(1)).unwrap();
}

#[test]
fn test_option_allowances() {
    let mut h = Harness::new();
    let alice = h.funded("alice", dec!(100));
    let bob = Address::from("bob");
    let carol = Address::from("carol");
    let id = h.create(&alice, dec!(100), Duration::days(1), dec!(10));

    assert!(h
        .ex
        .transfer_options_from(id, Side::Short, &bob, &alice, &carol, dec!(1))
        .is_err());
    h.ex.approve_options(id, Side::Short, &alice, &bob, dec!(3))
        .unwrap();
    h.ex.transfer_options_from(id, Side::Short, &bob, &alice, &carol, dec!(2))
        .unwrap();
    assert_eq!(h.ex.option_balance(id, Side::Short, &carol), dec!(2));
    assert!(h
        .ex
        .transfer_options_from(id, Side::Short, &bob, &alice, &carol, dec!(2))
        .is_err());
}
