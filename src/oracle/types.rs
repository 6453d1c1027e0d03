//! Oracle types

use crate::types::OracleKey;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A price observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceReading {
    /// Asset price in collateral units
    pub price: Decimal,
    /// When the price was observed by the source
    pub timestamp: DateTime<Utc>,
}

/// A single price update from an upstream source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    /// Asset key (e.g., "BTC")
    pub key: OracleKey,
    /// Observed price
    pub price: Decimal,
    /// Source timestamp
    pub timestamp: DateTime<Utc>,
}

/// Oracle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// No feed configured for this key
    #[error("Invalid key: {0}")]
    UnknownKey(OracleKey),
    /// Feed exists but is configured with inverted pricing
    #[error("Invalid key: {0} uses an inverted feed")]
    InvertedFeed(OracleKey),
    /// Feed returned a non-positive price
    #[error("Invalid price for {key}: {price}")]
    InvalidPrice { key: OracleKey, price: Decimal },
}
