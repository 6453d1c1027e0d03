//! Per-operation execution context

use crate::events::Event;
use crate::ledger::TokenLedger;
use crate::oracle::PriceOracle;
use chrono::{DateTime, Utc};

/// Read-only view used by quotes and other views
#[derive(Clone, Copy)]
pub struct Snapshot<'a> {
    /// Instant the operation was started
    pub now: DateTime<Utc>,
    pub oracle: &'a dyn PriceOracle,
    pub collateral: &'a TokenLedger,
}

/// Mutable context threaded through one state-changing operation
///
/// `now` is sampled once when the operation starts; events accumulate here
/// until the engine commits the operation.
pub struct Tx<'a> {
    pub now: DateTime<Utc>,
    pub oracle: &'a dyn PriceOracle,
    pub collateral: &'a mut TokenLedger,
    pub events: Vec<Event>,
}

impl<'a> Tx<'a> {
    pub fn new(
        now: DateTime<Utc>,
        oracle: &'a dyn PriceOracle,
        collateral: &'a mut TokenLedger,
    ) -> Self {
        Self {
            now,
            oracle,
            collateral,
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Read-only view of this transaction's state
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            now: self.now,
            oracle: self.oracle,
            collateral: &*self.collateral,
        }
    }

    /// Hand the buffered events to the caller
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}
