//! Oracle module
//!
//! Price source consumed by markets at resolution and by the AMM for quotes

mod cached;
mod static_feed;
mod types;

pub use cached::CachedOracle;
pub use static_feed::StaticOracle;
pub use types::{OracleError, PriceReading, PriceTick};

use crate::types::OracleKey;

/// Trait for price oracle implementations
pub trait PriceOracle: Send + Sync {
    /// Latest price for an asset together with the time it was observed
    fn price(&self, key: &OracleKey) -> Result<PriceReading, OracleError>;

    /// Whether markets may be created against this key
    fn is_valid_key(&self, key: &OracleKey) -> bool {
        self.price(key).is_ok()
    }
}
