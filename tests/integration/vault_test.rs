//! Integration tests for the round-based vault

use chrono::{DateTime, Duration, TimeZone, Utc};
use optmarket::clock::ManualClock;
use optmarket::config::{Config, VolatilityConfig};
use optmarket::engine::{EngineError, Exchange};
use optmarket::manager::CreateMarket;
use optmarket::oracle::StaticOracle;
use optmarket::types::{Address, MarketId, OracleKey, Side};
use optmarket::vault::{AssetCategory, VaultError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

fn close_enough(actual: Decimal, expected: Decimal, tolerance: Decimal) -> bool {
    (actual - expected).abs() <= tolerance
}

struct Harness {
    ex: Exchange,
    oracle: Arc<StaticOracle>,
    clock: Arc<ManualClock>,
    owner: Address,
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
        let clock = Arc::new(ManualClock::new(start()));
        let ex = Exchange::new(&config, oracle.clone(), clock.clone()).unwrap();
        Self {
            ex,
            oracle,
            clock,
            owner: config.owner,
        }
    }

    fn depositor(&mut self, name: &str, funds: Decimal, deposit: Decimal) -> Address {
        let account = Address::from(name);
        let vault = self.ex.vault().account().clone();
        self.ex.fund(&account, funds).unwrap();
        self.ex
            .approve_collateral(&account, &vault, Decimal::MAX)
            .unwrap();
        self.ex.deposit(&account, deposit).unwrap();
        account
    }

    fn start_vault(&mut self) {
        let owner = self.owner.clone();
        self.ex.start_vault(&owner).unwrap();
    }

    fn market(&mut self, strike: Decimal, maturity: Duration) -> MarketId {
        let alice = Address::from("alice");
        self.ex.fund(&alice, dec!(10)).unwrap();
        self.ex
            .approve_collateral(&alice, &Address::manager(), Decimal::MAX)
            .unwrap();
        self.ex
            .create_market(
                &alice,
                CreateMarket {
                    oracle_key: OracleKey::new("BTC"),
                    strike_price: strike,
                    maturity: self.ex.now() + maturity,
                    initial_mint: dec!(10),
                },
            )
            .unwrap()
    }

    fn finish_round(&mut self) {
        let end = self.ex.vault().round_end().unwrap();
        self.clock.set(end);
    }

    fn carried_into(&self, round: u64, accounts: &[&Address]) -> Decimal {
        accounts
            .iter()
            .map(|a| self.ex.vault().balance_in_round(a, round))
            .sum()
    }
}

#[test]
fn test_round_profit_is_shared_pro_rata() {
    let mut h = Harness::new();
    let a = h.depositor("user-a", dec!(100), dec!(100));
    let b = h.depositor("user-b", dec!(200), dec!(200));
    h.start_vault();
    assert_eq!(h.ex.vault().allocation(1), dec!(300));

    // Round gains 10 collateral
    let donor = Address::from("donor");
    let vault = h.ex.vault().account().clone();
    h.ex.fund(&donor, dec!(10)).unwrap();
    h.ex.transfer_collateral(&donor, &vault, dec!(10)).unwrap();

    assert!(!h.ex.can_close_current_round());
    assert_eq!(
        h.ex.close_round(),
        Err(EngineError::Vault(VaultError::CannotCloseRound))
    );

    h.finish_round();
    assert!(h.ex.can_close_current_round());
    let pnl = h.ex.close_round().unwrap();

    let tolerance = dec!(0.000001);
    assert!(close_enough(pnl, dec!(1.033333333), tolerance), "pnl = {}", pnl);
    assert_eq!(h.ex.vault().profit_and_loss(1), Some(pnl));
    assert_eq!(h.ex.vault().round(), 2);
    assert!(close_enough(h.ex.vault().balance_of(&a), dec!(103.333333), tolerance));
    assert!(close_enough(h.ex.vault().balance_of(&b), dec!(206.666666), tolerance));
    assert!(close_enough(
        h.carried_into(2, &[&a, &b]),
        h.ex.vault().allocation(1) * pnl,
        tolerance
    ));
    assert_eq!(h.ex.vault().allocation(2), dec!(310));
}

#[test]
fn test_round_settles_vault_trades() {
    let mut h = Harness::new();
    let a = h.depositor("user-a", dec!(100), dec!(100));
    let b = h.depositor("user-b", dec!(200), dec!(200));
    h.start_vault();
    let id = h.market(dec!(100), Duration::days(3));

    let owner = h.owner.clone();
    let quote = h.ex.vault_trade(&owner, id, Side::Long, dec!(50)).unwrap();
    let vault = h.ex.vault().account().clone();
    assert_eq!(h.ex.option_balance(id, Side::Long, &vault), dec!(50));
    assert_eq!(h.ex.collateral_balance(&vault), dec!(300) - quote);
    let state = h.ex.vault().round_state(1).unwrap();
    assert_eq!(state.spent, quote);
    assert_eq!(state.spent_on(AssetCategory::Btc), quote);
    assert!(state.traded_markets.contains(&id));

    let maturity = h.ex.market(id).unwrap().maturity();
    h.clock.set(maturity + Duration::minutes(1));
    h.oracle
        .set_price("BTC", dec!(110), maturity + Duration::minutes(1));

    h.finish_round();
    let pnl = h.ex.close_round().unwrap();

    // Winning units were exercised for collateral during the close
    assert!(h.ex.market(id).unwrap().is_resolved());
    assert_eq!(h.ex.option_balance(id, Side::Long, &vault), Decimal::ZERO);
    assert_eq!(h.ex.collateral_balance(&vault), dec!(350) - quote);
    assert!(pnl > Decimal::ONE);
    assert!(close_enough(
        h.carried_into(2, &[&a, &b]),
        h.ex.vault().allocation(1) * pnl,
        dec!(0.000001)
    ));
    assert_eq!(h.ex.vault().allocation(2), dec!(350) - quote);
}

#[test]
fn test_vault_trade_limits() {
    let mut h = Harness::new();
    let owner = h.owner.clone();
    let near = h.market(dec!(100), Duration::days(3));
    assert_eq!(
        h.ex.vault_trade(&owner, near, Side::Long, dec!(10)),
        Err(EngineError::Vault(VaultError::NotStarted))
    );

    h.depositor("user-a", dec!(300), dec!(300));
    h.start_vault();
    let far = h.market(dec!(100), Duration::days(10));

    assert!(matches!(
        h.ex.vault_trade(&Address::from("user-a"), near, Side::Long, dec!(10)),
        Err(EngineError::Vault(VaultError::Unauthorized(_)))
    ));
    assert_eq!(
        h.ex.vault_trade(&owner, far, Side::Long, dec!(10)),
        Err(EngineError::Vault(VaultError::InvalidMarketTime(far)))
    );
    assert!(matches!(
        h.ex.vault_trade(&owner, near, Side::Long, dec!(0.5)),
        Err(EngineError::Vault(VaultError::TradeTooSmall { .. }))
    ));

    // 300 * 0.5 utilization * 0.5 for BTC leaves 75 for this asset
    assert!(matches!(
        h.ex.vault_trade(&owner, near, Side::Long, dec!(200)),
        Err(EngineError::Vault(VaultError::AssetAllocationExceeded {
            category: AssetCategory::Btc,
            ..
        }))
    ));
    assert_eq!(h.ex.vault().round_state(1).unwrap().spent, Decimal::ZERO);
}

#[test]
fn test_withdrawal_and_claim() {
    let mut h = Harness::new();
    let a = h.depositor("user-a", dec!(100), dec!(100));
    let b = h.depositor("user-b", dec!(200), dec!(200));
    assert_eq!(
        h.ex.withdrawal_request(&a),
        Err(EngineError::Vault(VaultError::NotStarted))
    );
    h.start_vault();

    h.ex.withdrawal_request(&a).unwrap();
    assert!(h.ex.vault().is_withdrawal_requested(&a));
    assert_eq!(
        h.ex.withdrawal_request(&a),
        Err(EngineError::Vault(VaultError::AlreadyRequested))
    );
    assert_eq!(
        h.ex.claim(&a),
        Err(EngineError::Vault(VaultError::WithdrawalPending))
    );
    assert_eq!(
        h.ex.deposit(&a, dec!(10)),
        Err(EngineError::Vault(VaultError::WithdrawalRequested))
    );

    h.finish_round();
    assert_eq!(h.ex.close_round().unwrap(), Decimal::ONE);
    assert_eq!(h.ex.vault().claimable(&a), dec!(100));
    assert_eq!(h.ex.vault().balance_of(&a), Decimal::ZERO);
    assert_eq!(h.ex.vault().balance_of(&b), dec!(200));
    assert_eq!(h.ex.vault().allocation(2), dec!(200));

    assert_eq!(h.ex.claim(&a).unwrap(), dec!(100));
    assert_eq!(h.ex.collateral_balance(&a), dec!(100));
    assert_eq!(
        h.ex.claim(&a),
        Err(EngineError::Vault(VaultError::WithdrawalNotRequested))
    );
    assert_eq!(h.ex.collateral_balance(&a), dec!(100));
    assert_eq!(
        h.ex.claim(&b),
        Err(EngineError::Vault(VaultError::WithdrawalNotRequested))
    );
}

#[test]
fn test_deposits_during_round_wait_for_next() {
    let mut h = Harness::new();
    let a = h.depositor("user-a", dec!(500), dec!(100));
    h.start_vault();

    h.ex.deposit(&a, dec!(50)).unwrap();
    assert_eq!(h.ex.vault().balance_of(&a), dec!(100));
    assert_eq!(h.ex.vault().pending_deposit(&a), dec!(50));
    assert_eq!(
        h.ex.withdrawal_request(&a),
        Err(EngineError::Vault(VaultError::DepositedForNextRound))
    );

    let c = h.depositor("user-c", dec!(80), dec!(80));
    h.finish_round();
    assert_eq!(h.ex.close_round().unwrap(), Decimal::ONE);

    assert_eq!(h.ex.vault().balance_of(&a), dec!(150));
    assert_eq!(h.ex.vault().balance_of(&c), dec!(80));
    assert_eq!(h.ex.vault().allocation(2), dec!(230));
    assert_eq!(h.ex.vault().users(), 2);
    assert!(close_enough(
        h.ex.vault().cumulative_pnl(1).unwrap(),
        Decimal::ONE,
        dec!(0.000001)
    ));
}

#[test]
fn test_deposit_requires_allowance() {
    let mut h = Harness::new();
    let a = Address::from("user-a");
    h.ex.fund(&a, dec!(100)).unwrap();
    assert!(matches!(
        h.ex.deposit(&a, dec!(50)),
        Err(EngineError::Vault(VaultError::Ledger(_)))
    ));
    assert!(matches!(
        h.ex.deposit(&a, dec!(0.5)),
        Err(EngineError::Vault(VaultError::DepositTooSmall { .. }))
    ));
    assert_eq!(h.ex.collateral_balance(&a), dec!(100));
    assert_eq!(h.ex.vault().users(), 0);
}
