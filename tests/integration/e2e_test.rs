//! End-to-end integration tests

use chrono::{TimeZone, Utc};
use optmarket::cli::scenario::{Scenario, Simulation};
use optmarket::clock::ManualClock;
use optmarket::config::Config;
use optmarket::engine::{Exchange, SharedExchange};
use optmarket::journal::{EventJournal, JournalReader};
use optmarket::oracle::StaticOracle;
use optmarket::types::{Address, MarketId, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;

fn repo_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(name)
}

fn run_basic_scenario() -> Simulation {
    let config = Config::load(repo_file("config.toml.example")).unwrap();
    let scenario = Scenario::load(repo_file("scenarios/basic.toml")).unwrap();
    let mut sim = Simulation::new(&config, &scenario).unwrap();
    let outcomes = sim.run(&scenario.steps);

    let rejected: Vec<_> = outcomes.iter().filter(|o| o.result.is_err()).collect();
    assert!(rejected.is_empty(), "rejected steps: {:?}", rejected);
    assert_eq!(outcomes.len(), scenario.steps.len());
    sim
}

#[test]
fn test_config_example_loads() {
    let config = Config::load(repo_file("config.toml.example")).unwrap();
    assert_eq!(config.owner, Address::from("owner"));
    assert_eq!(config.manager.pool_fee, dec!(0.005));
    assert_eq!(config.amm.initial_reserve, dec!(5000));
    assert_eq!(config.amm.implied_volatility.len(), 2);
    assert_eq!(config.vault.round_length_secs, 7 * 24 * 60 * 60);
}

#[test]
fn test_basic_scenario_runs_to_completion() {
    let sim = run_basic_scenario();
    let ex = &sim.exchange;

    // Market 1 was settled and expired, market 2 settled through the vault
    assert!(!ex.manager().is_known_market(MarketId(1)));
    assert_eq!(ex.manager().matured_markets(), vec![MarketId(2)]);
    let resolution = ex.market(MarketId(2)).unwrap().resolution().copied().unwrap();
    assert_eq!(resolution.result, Side::Short);
    assert_eq!(resolution.final_price, dec!(3050));

    let vault = ex.vault();
    assert_eq!(vault.round(), 3);
    assert!(vault.profit_and_loss(1).unwrap() > Decimal::ONE);
    assert_eq!(vault.claimable(&Address::from("carol")), Decimal::ZERO);
    assert!(vault.balance_of(&Address::from("bob")) > dec!(300));
    assert_eq!(vault.balance_of(&Address::from("carol")), Decimal::ZERO);

    // Carol got back more than she put in
    assert!(ex.collateral_balance(&Address::from("carol")) > dec!(1000));

    let manager = ex.manager();
    let deposited: Decimal = manager
        .active_markets()
        .into_iter()
        .chain(manager.matured_markets())
        .map(|id| manager.market(id).unwrap().deposited())
        .sum();
    assert_eq!(manager.total_deposited(), deposited);
}

#[test]
fn test_journal_roundtrip_of_scenario_events() {
    let sim = run_basic_scenario();
    let records = sim.exchange.events().records();
    assert!(!records.is_empty());

    let dir = tempfile::tempdir().unwrap();
    let journal = EventJournal::new(dir.path());
    let path = journal.file_path("events", sim.exchange.now());
    journal.write(&path, records).unwrap();

    let rows = JournalReader::new(&path).read().unwrap();
    assert_eq!(rows.len(), records.len());
    for (row, record) in rows.iter().zip(records) {
        assert_eq!(row.sequence, record.sequence);
        assert_eq!(row.kind, record.event.kind());
        assert_eq!(row.market, record.event.market().map(|m| m.0));
        assert_eq!(row.timestamp, record.timestamp);
    }
    assert!(rows.iter().any(|r| r.kind == "market_expired" && r.market == Some(1)));
    assert!(rows.iter().any(|r| r.kind == "round_closed"));
}

#[tokio::test]
async fn test_shared_exchange_serializes_vault_deposits() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let exchange = Exchange::new(
        &Config::default(),
        Arc::new(StaticOracle::new()),
        Arc::new(ManualClock::new(start)),
    )
    .unwrap();
    let shared = SharedExchange::new(exchange);

    let mut handles = Vec::new();
    for i in 0..10 {
        let shared = shared.clone();
        handles.push(tokio::spawn(async move {
            let account = Address::new(format!("depositor-{}", i));
            let mut ex = shared.lock().await;
            let vault = ex.vault().account().clone();
            ex.fund(&account, dec!(50)).unwrap();
            ex.approve_collateral(&account, &vault, Decimal::MAX).unwrap();
            ex.deposit(&account, dec!(25)).unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let (users, held) = shared
        .read(|ex| {
            (
                ex.vault().users(),
                ex.collateral_balance(ex.vault().account()),
            )
        })
        .await;
    assert_eq!(users, 10);
    assert_eq!(held, dec!(250));

    let owner = shared.read(|ex| ex.owner().clone()).await;
    shared
        .execute(|ex| ex.start_vault(&owner))
        .await
        .unwrap();
    assert_eq!(shared.read(|ex| ex.vault().allocation(1)).await, dec!(250));
}
