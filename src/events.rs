//! Events emitted by the engine
//!
//! Components push events into the transaction that is executing them. The
//! engine stamps and appends them to the [`EventLog`] only when the
//! transaction commits, so a rejected operation leaves no trace.

use crate::types::{Address, MarketId, OracleKey, Side, TokenId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Externally observable state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    MarketCreated {
        market: MarketId,
        creator: Address,
        oracle_key: OracleKey,
        strike_price: Decimal,
        maturity: DateTime<Utc>,
        expiry: DateTime<Utc>,
        initial_mint: Decimal,
    },
    Mint {
        market: MarketId,
        side: Side,
        account: Address,
        value: Decimal,
    },
    MarketResolved {
        market: MarketId,
        result: Side,
        oracle_price: Decimal,
        oracle_timestamp: DateTime<Utc>,
        deposited: Decimal,
        pool_fees: Decimal,
        creator_fees: Decimal,
    },
    OptionsExercised {
        market: MarketId,
        account: Address,
        value: Decimal,
    },
    Burned {
        market: MarketId,
        side: Side,
        account: Address,
        value: Decimal,
    },
    MarketExpired {
        market: MarketId,
        beneficiary: Address,
        remitted: Decimal,
    },
    Transfer {
        token: TokenId,
        from: Address,
        to: Address,
        value: Decimal,
    },
    Approval {
        token: TokenId,
        owner: Address,
        spender: Address,
        value: Decimal,
    },
    BoughtFromAmm {
        market: MarketId,
        buyer: Address,
        side: Side,
        amount: Decimal,
        paid: Decimal,
    },
    SoldToAmm {
        market: MarketId,
        seller: Address,
        side: Side,
        amount: Decimal,
        received: Decimal,
    },
    VaultStarted {
        vault: Address,
        allocation: Decimal,
    },
    Deposited {
        vault: Address,
        account: Address,
        amount: Decimal,
    },
    WithdrawalRequested {
        vault: Address,
        account: Address,
    },
    VaultTrade {
        vault: Address,
        market: MarketId,
        side: Side,
        amount: Decimal,
        quote: Decimal,
    },
    RoundClosed {
        vault: Address,
        round: u64,
        profit_and_loss: Decimal,
    },
    Claimed {
        vault: Address,
        account: Address,
        amount: Decimal,
    },
    /// Administrative parameter change
    ParameterUpdated {
        component: String,
        parameter: String,
        value: String,
    },
}

impl Event {
    /// Short event name used in logs and journals
    pub fn kind(&self) -> &'static str {
        match self {
            Event::MarketCreated { .. } => "market_created",
            Event::Mint { .. } => "mint",
            Event::MarketResolved { .. } => "market_resolved",
            Event::OptionsExercised { .. } => "options_exercised",
            Event::Burned { .. } => "burned",
            Event::MarketExpired { .. } => "market_expired",
            Event::Transfer { .. } => "transfer",
            Event::Approval { .. } => "approval",
            Event::BoughtFromAmm { .. } => "bought_from_amm",
            Event::SoldToAmm { .. } => "sold_to_amm",
            Event::VaultStarted { .. } => "vault_started",
            Event::Deposited { .. } => "deposited",
            Event::WithdrawalRequested { .. } => "withdrawal_requested",
            Event::VaultTrade { .. } => "vault_trade",
            Event::RoundClosed { .. } => "round_closed",
            Event::Claimed { .. } => "claimed",
            Event::ParameterUpdated { .. } => "parameter_updated",
        }
    }

    /// Market the event concerns, if any
    pub fn market(&self) -> Option<MarketId> {
        match self {
            Event::MarketCreated { market, .. }
            | Event::Mint { market, .. }
            | Event::MarketResolved { market, .. }
            | Event::OptionsExercised { market, .. }
            | Event::Burned { market, .. }
            | Event::MarketExpired { market, .. }
            | Event::BoughtFromAmm { market, .. }
            | Event::SoldToAmm { market, .. }
            | Event::VaultTrade { market, .. } => Some(*market),
            Event::Transfer { token, .. } | Event::Approval { token, .. } => match token {
                TokenId::Long(id) | TokenId::Short(id) => Some(*id),
                TokenId::Collateral => None,
            },
            _ => None,
        }
    }

    pub(crate) fn parameter(component: &str, parameter: &str, value: impl ToString) -> Self {
        Event::ParameterUpdated {
            component: component.to_string(),
            parameter: parameter.to_string(),
            value: value.to_string(),
        }
    }
}

/// A committed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the log, starting at 0
    pub sequence: u64,
    /// Instant of the operation that emitted the event
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// Append-only log of committed events
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the events of a committed operation
    pub fn commit(&mut self, timestamp: DateTime<Utc>, events: Vec<Event>) {
        for event in events {
            tracing::debug!(kind = event.kind(), ?event, "Event");
            let sequence = self.records.len() as u64;
            self.records.push(EventRecord {
                sequence,
                timestamp,
                event,
            });
        }
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Records with `sequence >= from`
    pub fn since(&self, from: u64) -> &[EventRecord] {
        let start = (from as usize).min(self.records.len());
        &self.records[start..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Events of a given kind, in order
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.records
            .iter()
            .map(|r| &r.event)
            .filter(move |e| e.kind() == kind)
    }
}
