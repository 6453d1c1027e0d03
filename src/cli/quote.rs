//! Quote command implementation

use crate::amm::{calculate_odds, OddsParams};
use crate::config::AmmConfig;
use crate::math::{add, complement, mul};
use chrono::Duration;
use clap::Args;
use rust_decimal::Decimal;

#[derive(Args, Debug)]
pub struct QuoteArgs {
    /// Current oracle price
    #[arg(long)]
    pub spot: Decimal,

    /// Strike price
    #[arg(long)]
    pub strike: Decimal,

    /// Time to maturity in hours
    #[arg(long, default_value = "168")]
    pub hours: i64,

    /// Annualized implied volatility (0.8 = 80%)
    #[arg(long, default_value = "0.8")]
    pub volatility: Decimal,
}

/// Fair odds and indicative AMM unit prices of both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteSummary {
    pub long: Decimal,
    pub short: Decimal,
    /// Smallest buy price per unit: odds plus minimum spread and safe-box fee
    pub long_buy: Decimal,
    pub short_buy: Decimal,
}

impl QuoteArgs {
    pub fn summarize(&self, amm: &AmmConfig) -> anyhow::Result<QuoteSummary> {
        let time_to_maturity = Duration::try_hours(self.hours)
            .ok_or_else(|| anyhow::anyhow!("Time to maturity out of range: {}h", self.hours))?;
        let long = calculate_odds(&OddsParams {
            spot: self.spot,
            strike: self.strike,
            time_to_maturity,
            volatility: self.volatility,
        })?;
        let short = complement(long);
        let markup = add(Decimal::ONE, amm.safe_box_impact)?;
        Ok(QuoteSummary {
            long,
            short,
            long_buy: mul(add(long, amm.min_spread)?, markup)?,
            short_buy: mul(add(short, amm.min_spread)?, markup)?,
        })
    }

    pub async fn execute(&self, amm: &AmmConfig) -> anyhow::Result<()> {
        let summary = self.summarize(amm)?;
        tracing::debug!(spot = %self.spot, strike = %self.strike, hours = self.hours, "Quote");

        let supported = |p: Decimal| p > amm.min_supported_price && p < amm.max_supported_price;
        println!("Strike {} / spot {} / {}h / vol {}", self.strike, self.spot, self.hours, self.volatility);
        println!(
            "  Long:  odds {:.6}  buy from {:.6}{}",
            summary.long,
            summary.long_buy,
            if supported(summary.long) { "" } else { "  (outside AMM band)" }
        );
        println!(
            "  Short: odds {:.6}  buy from {:.6}{}",
            summary.short,
            summary.short_buy,
            if supported(summary.short) { "" } else { "  (outside AMM band)" }
        );
        Ok(())
    }
}
