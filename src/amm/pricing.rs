//! Option pricing and price impact
//!
//! Fair odds come from a Black-Scholes style model:
//! `d1 = ln(K/S) / (sigma * sqrt(T))` with `T` in years, and the up
//! probability is `1 - N(d1)` (or `N(d1)` with the ratio inverted when the
//! spot is above the strike). `N` is the Abramowitz and Stegun 26.2.17
//! polynomial approximation.
//!
//! Impact functions follow the AMM's inventory skew: buying the side the AMM
//! is short of (or selling the side it is long of) moves the price by up to
//! `max_spread`, scaled by how much of the remaining capacity the trade uses.

use crate::math::{div, from_f64, mul, saturating_sub, to_f64, MathError};
use chrono::Duration;
use rust_decimal::Decimal;

const SECONDS_PER_DAY: f64 = 86_400.0;
const DAYS_PER_YEAR: f64 = 365.0;

/// Inputs of the odds model
#[derive(Debug, Clone, Copy)]
pub struct OddsParams {
    pub spot: Decimal,
    pub strike: Decimal,
    pub time_to_maturity: Duration,
    /// Annualized implied volatility (0.80 = 80%)
    pub volatility: Decimal,
}

/// Probability that the final price ends at or above the strike
pub fn calculate_odds(params: &OddsParams) -> Result<Decimal, MathError> {
    let spot = to_f64(params.spot);
    let strike = to_f64(params.strike);
    if spot <= 0.0 || strike <= 0.0 {
        return Err(MathError::DivisionByZero);
    }

    let days = params.time_to_maturity.num_seconds() as f64 / SECONDS_PER_DAY;
    let vt = to_f64(params.volatility) * (days.max(0.0) / DAYS_PER_YEAR).sqrt();
    if vt <= 0.0 {
        // No time or no volatility left: the outcome is whatever the spot says
        return Ok(if params.spot >= params.strike {
            Decimal::ONE
        } else {
            Decimal::ZERO
        });
    }

    let strike_above = strike >= spot;
    let ratio = if strike_above { strike / spot } else { spot / strike };
    let cdf = normal_cdf(ratio.ln() / vt);
    let up = if strike_above { 1.0 - cdf } else { cdf };
    Ok(from_f64(up)?.max(Decimal::ZERO).min(Decimal::ONE))
}

/// Standard normal CDF for `x >= 0` (Abramowitz and Stegun 26.2.17)
fn normal_cdf(x: f64) -> f64 {
    let b1 = 0.319_381_5;
    let b2 = -0.356_538;
    let b3 = 1.781_478;
    let b4 = -1.821_256;
    let b5 = 1.330_274;
    let p = 0.231_641_9;

    let t = 1.0 / (1.0 + p * x);
    let z = (-x * x / 2.0).exp() * 0.398_942_3;
    let poly = ((((b5 * t + b4) * t + b3) * t + b2) * t + b1) * t;
    1.0 - z * poly
}

/// AMM inventory of one market seen from the traded side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inventory {
    /// Units of the traded side held by the AMM
    pub position: Decimal,
    /// Units of the opposite side held by the AMM
    pub other: Decimal,
}

/// Units the AMM can sell of a side priced at `price`, including
/// what it can mint before reaching the market cap
pub fn available_to_buy(
    price: Decimal,
    position_balance: Decimal,
    cap: Decimal,
    spent: Decimal,
    min_spread: Decimal,
    max_spread: Decimal,
) -> Result<Decimal, MathError> {
    let base = price + min_spread;
    if base >= Decimal::ONE {
        return Ok(Decimal::ZERO);
    }
    let mid_impact = div(mul(Decimal::ONE - base, max_spread)?, Decimal::TWO)?;
    let divider = Decimal::ONE - (base + mid_impact);
    if divider <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    let buffer = mul(position_balance, base)?;
    if cap + buffer <= spent {
        return Ok(Decimal::ZERO);
    }
    Ok(position_balance + div(cap + buffer - spent, divider)?)
}

/// Worst unit price the AMM pays when buying a side priced at `price`
pub fn sell_max_price(
    price: Decimal,
    min_spread: Decimal,
    max_spread: Decimal,
) -> Result<Decimal, MathError> {
    let discounted = saturating_sub(price, min_spread);
    mul(discounted, Decimal::ONE - div(max_spread, Decimal::TWO)?)
}

/// Units of a side the AMM can buy back before reaching the market cap
pub fn available_to_sell(
    sell_max_price: Decimal,
    other_balance: Decimal,
    cap: Decimal,
    spent: Decimal,
) -> Result<Decimal, MathError> {
    if sell_max_price <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    let will_pay = mul(other_balance, sell_max_price)?;
    let cap_with_balance = cap + other_balance;
    if cap_with_balance < spent + will_pay {
        return Ok(Decimal::ZERO);
    }
    Ok(div(cap_with_balance - spent - will_pay, sell_max_price)? + other_balance)
}

/// Price impact of buying `amount` from the AMM
///
/// Zero while the trade is covered by inventory.
pub fn buy_price_impact(
    inventory: Inventory,
    amount: Decimal,
    available: Decimal,
    max_spread: Decimal,
) -> Result<Decimal, MathError> {
    let Inventory { position, other } = inventory;
    if amount <= position {
        return Ok(Decimal::ZERO);
    }
    // Inventory of the side is used up; the rest is minted, adding to the other side
    let skew = other + (amount - position);

    let max_skew = other + available - position;
    if max_skew <= Decimal::ZERO {
        return Ok(max_spread);
    }
    let new_impact = mul(max_spread, div(skew, max_skew)?)?;

    if position > Decimal::ZERO {
        // Only the freshly minted part of the order carries impact
        let minted_impact = div(new_impact, Decimal::TWO)?;
        div(mul(amount - position, minted_impact)?, amount)
    } else {
        let previous_impact = mul(max_spread, div(other, max_skew)?)?;
        div(new_impact + previous_impact, Decimal::TWO)
    }
}

/// Price impact of selling `amount` to the AMM
pub fn sell_price_impact(
    inventory: Inventory,
    amount: Decimal,
    available: Decimal,
    max_spread: Decimal,
) -> Result<Decimal, MathError> {
    let Inventory { position, other } = inventory;
    let position_after = if position > Decimal::ZERO {
        position + amount
    } else {
        saturating_sub(amount, other)
    };
    let other_after = saturating_sub(other, amount);
    if position_after < other_after {
        return Ok(Decimal::ZERO);
    }

    let max_skew = position + available - other;
    if max_skew <= Decimal::ZERO {
        return Ok(max_spread);
    }
    let skew = position_after - other_after;
    let new_impact = mul(max_spread, div(skew, max_skew)?)?;

    if other > Decimal::ZERO {
        if amount <= other {
            return Ok(Decimal::ZERO);
        }
        // Only the part not netted against the opposite side carries impact
        let unmatched_impact = div(new_impact, Decimal::TWO)?;
        div(mul(amount - other, unmatched_impact)?, amount)
    } else {
        let previous_impact = mul(max_spread, div(position, max_skew)?)?;
        div(new_impact + previous_impact, Decimal::TWO)
    }
}
