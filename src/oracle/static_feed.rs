//! In-memory oracle fed by explicit updates

use super::{OracleError, PriceOracle, PriceReading, PriceTick};
use crate::types::OracleKey;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct Feed {
    reading: PriceReading,
    inverted: bool,
}

/// Oracle holding the latest price per key
///
/// Shared between the engine (reader) and whoever drives prices (writer);
/// readers always see a whole reading.
#[derive(Debug, Default)]
pub struct StaticOracle {
    feeds: RwLock<HashMap<OracleKey, Feed>>,
}

impl StaticOracle {
    /// Create an empty oracle
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the price of an asset observed at `timestamp`
    pub fn set_price(&self, key: impl Into<OracleKey>, price: Decimal, timestamp: DateTime<Utc>) {
        let key = key.into();
        let mut feeds = self.feeds.write().unwrap_or_else(|e| e.into_inner());
        let reading = PriceReading { price, timestamp };
        feeds
            .entry(key)
            .and_modify(|feed| feed.reading = reading)
            .or_insert(Feed {
                reading,
                inverted: false,
            });
    }

    /// Mark a feed as inverted; inverted feeds are rejected for market creation
    pub fn set_inverted(&self, key: impl Into<OracleKey>, inverted: bool) {
        let key = key.into();
        let mut feeds = self.feeds.write().unwrap_or_else(|e| e.into_inner());
        if let Some(feed) = feeds.get_mut(&key) {
            feed.inverted = inverted;
        }
    }

    /// Apply an upstream tick
    pub fn apply_tick(&self, tick: &PriceTick) {
        tracing::trace!(key = %tick.key, price = %tick.price, "Oracle tick");
        self.set_price(tick.key.clone(), tick.price, tick.timestamp);
    }

    /// Remove a feed entirely
    pub fn remove(&self, key: &OracleKey) {
        let mut feeds = self.feeds.write().unwrap_or_else(|e| e.into_inner());
        feeds.remove(key);
    }
}

impl PriceOracle for StaticOracle {
    fn price(&self, key: &OracleKey) -> Result<PriceReading, OracleError> {
        let feeds = self.feeds.read().unwrap_or_else(|e| e.into_inner());
        let feed = feeds
            .get(key)
            .ok_or_else(|| OracleError::UnknownKey(key.clone()))?;

        if feed.inverted {
            return Err(OracleError::InvertedFeed(key.clone()));
        }
        if feed.reading.price <= Decimal::ZERO {
            return Err(OracleError::InvalidPrice {
                key: key.clone(),
                price: feed.reading.price,
            });
        }
        Ok(feed.reading)
    }
}
