//! optmarket: positional options markets with an AMM and pooled-capital vaults
//!
//! This library provides the core components for:
//! - Fixed-point decimal math and fungible token ledgers
//! - Binary options markets with a mint / resolve / exercise / expire lifecycle
//! - A market manager that creates and tracks markets
//! - An AMM pricing options from oracle prices and implied volatility
//! - A round-based vault deploying pooled capital through the AMM
//! - A transactional exchange facade with an event log
//! - Parquet event journal, structured logging and metrics

pub mod amm;
pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod engine;
pub mod events;
pub mod journal;
pub mod ledger;
pub mod manager;
pub mod market;
pub mod math;
pub mod oracle;
pub mod telemetry;
pub mod types;
pub mod vault;
