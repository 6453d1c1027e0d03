//! CLI interface for optmarket
//!
//! Provides subcommands for:
//! - `quote`: Fair odds for a strike, spot and time to maturity
//! - `simulate`: Run a TOML scenario against an in-memory exchange
//! - `config`: Show the effective configuration

mod quote;
pub mod scenario;
mod simulate;

pub use quote::QuoteArgs;
pub use simulate::SimulateArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "optmarket")]
#[command(about = "Positional options markets with an AMM and pooled-capital vaults")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Price a market with the AMM odds model
    Quote(QuoteArgs),
    /// Run a scenario file
    Simulate(SimulateArgs),
    /// Show configuration
    Config,
}
