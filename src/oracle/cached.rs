//! Per-operation price cache

use super::{OracleError, PriceOracle, PriceReading};
use crate::types::OracleKey;
use std::collections::HashMap;
use std::sync::Mutex;

/// Wraps a source so each key is read at most once
///
/// One instance lives for a single operation; every quote, availability
/// check and resolution inside it sees the same reading even if the
/// source is updated concurrently.
pub struct CachedOracle<'a> {
    source: &'a dyn PriceOracle,
    readings: Mutex<HashMap<OracleKey, Result<PriceReading, OracleError>>>,
}

impl<'a> CachedOracle<'a> {
    pub fn new(source: &'a dyn PriceOracle) -> Self {
        Self {
            source,
            readings: Mutex::new(HashMap::new()),
        }
    }
}

impl PriceOracle for CachedOracle<'_> {
    fn price(&self, key: &OracleKey) -> Result<PriceReading, OracleError> {
        let mut readings = self.readings.lock().unwrap_or_else(|e| e.into_inner());
        readings
            .entry(key.clone())
            .or_insert_with(|| self.source.price(key))
            .clone()
    }
}
