use clap::Parser;
use optmarket::cli::{Cli, Commands};
use optmarket::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize telemetry
    let _telemetry = optmarket::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Quote(args) => {
            args.execute(&config.amm).await?;
        }
        Commands::Simulate(args) => {
            tracing::info!("Starting simulation");
            args.execute(&config).await?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!("  Owner: {}", config.owner);
            println!(
                "  Manager: capital={} pool_fee={} creator_fee={} paused={}",
                config.manager.capital_requirement,
                config.manager.pool_fee,
                config.manager.creator_fee,
                config.manager.paused
            );
            println!(
                "  AMM: cap={} spread={}..{} band={}..{} reserve={}",
                config.amm.cap_per_market,
                config.amm.min_spread,
                config.amm.max_spread,
                config.amm.min_supported_price,
                config.amm.max_supported_price,
                config.amm.initial_reserve
            );
            for entry in &config.amm.implied_volatility {
                println!("    IV {} = {}", entry.key, entry.volatility);
            }
            println!(
                "  Vault: {} round={}s utilization={}",
                config.vault.name, config.vault.round_length_secs, config.vault.utilization_rate
            );
            println!("  Telemetry: {:?}", config.telemetry.log_format);
        }
    }

    Ok(())
}
