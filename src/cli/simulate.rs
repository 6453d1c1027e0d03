//! Simulate command implementation

use super::scenario::{Scenario, Simulation};
use crate::config::Config;
use crate::journal::EventJournal;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Scenario file (TOML)
    pub scenario: PathBuf,

    /// Write the event journal to this directory (overrides config)
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Print every committed event
    #[arg(short, long)]
    pub verbose: bool,
}

impl SimulateArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let scenario = Scenario::load(&self.scenario)?;
        tracing::info!(
            scenario = ?self.scenario,
            steps = scenario.steps.len(),
            start = %scenario.start,
            "Running scenario"
        );

        let mut sim = Simulation::new(config, &scenario)?;
        let outcomes = sim.run(&scenario.steps);

        let mut rejected = 0;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(summary) => println!(
                    "[{:>3}] {} {:<18} {}",
                    outcome.index, outcome.at, outcome.action, summary
                ),
                Err(error) => {
                    rejected += 1;
                    println!(
                        "[{:>3}] {} {:<18} REJECTED: {}",
                        outcome.index, outcome.at, outcome.action, error
                    );
                }
            }
        }

        let exchange = &sim.exchange;
        println!();
        println!("Steps: {} ({} rejected)", outcomes.len(), rejected);
        println!("Active markets: {:?}", exchange.manager().active_markets());
        println!("Matured markets: {:?}", exchange.manager().matured_markets());
        println!("Total deposited: {}", exchange.manager().total_deposited());
        println!(
            "AMM reserve: {}",
            exchange.collateral_balance(exchange.amm().account())
        );
        println!(
            "Vault round: {} (allocation {})",
            exchange.vault().round(),
            exchange.vault().allocation(exchange.vault().round())
        );
        println!("Events: {}", exchange.events().len());

        if self.verbose {
            for record in exchange.events().records() {
                println!(
                    "  #{} {} {}",
                    record.sequence,
                    record.timestamp,
                    serde_json::to_string(&record.event)?
                );
            }
        }

        let journal_dir = self
            .journal
            .clone()
            .or_else(|| config.journal.enabled.then(|| config.journal.output_dir.clone()));
        if let Some(dir) = journal_dir {
            let journal = EventJournal::new(dir);
            let path = journal.file_path("events", exchange.now());
            journal.write(&path, exchange.events().records())?;
            println!("Journal written to {}", path.display());
        }

        Ok(())
    }
}
