//! Market construction

use super::{Market, MarketParams};
use crate::ledger::TokenLedger;
use crate::types::TokenId;
use rust_decimal::Decimal;

/// Builds markets and their option token ledgers on behalf of the manager
#[derive(Debug, Default, Clone, Copy)]
pub struct MarketFactory;

impl MarketFactory {
    /// Create an empty market; the manager performs the initial mint
    pub fn create_market(&self, params: MarketParams) -> Market {
        Market {
            id: params.id,
            creator: params.creator,
            oracle_key: params.oracle_key,
            strike_price: params.strike_price,
            maturity: params.maturity,
            expiry: params.expiry,
            fees: params.fees,
            deposited: Decimal::ZERO,
            accrued_pool_fees: Decimal::ZERO,
            accrued_creator_fees: Decimal::ZERO,
            resolution: None,
            long: TokenLedger::new(TokenId::Long(params.id)),
            short: TokenLedger::new(TokenId::Short(params.id)),
        }
    }
}
