//! Fungible token ledgers
//!
//! One implementation backs both the collateral (sUSD) ledger and every
//! market's Long/Short option tokens.

use crate::events::Event;
use crate::types::{Address, TokenId};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Insufficient {token} balance: needed {needed}, available {available}")]
    InsufficientBalance {
        token: TokenId,
        needed: Decimal,
        available: Decimal,
    },
    #[error("Insufficient {token} allowance: needed {needed}, available {available}")]
    InsufficientAllowance {
        token: TokenId,
        needed: Decimal,
        available: Decimal,
    },
    #[error("Transfer to or from the zero address")]
    ZeroAddress,
    #[error("Amount must be non-negative: {0}")]
    NegativeAmount(Decimal),
    #[error("{token} balance or supply would overflow")]
    Overflow { token: TokenId },
}

/// Balance and allowance bookkeeping for one token
#[derive(Debug, Clone)]
pub struct TokenLedger {
    token: TokenId,
    balances: HashMap<Address, Decimal>,
    allowances: HashMap<(Address, Address), Decimal>,
    total_supply: Decimal,
}

impl TokenLedger {
    /// Create an empty ledger
    pub fn new(token: TokenId) -> Self {
        Self {
            token,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            total_supply: Decimal::ZERO,
        }
    }

    pub fn token(&self) -> TokenId {
        self.token
    }

    pub fn balance_of(&self, account: &Address) -> Decimal {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Decimal {
        self.allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn total_supply(&self) -> Decimal {
        self.total_supply
    }

    /// Number of accounts with a non-zero balance
    pub fn holders(&self) -> usize {
        self.balances.values().filter(|b| !b.is_zero()).count()
    }

    /// Create `amount` new units for `to`
    pub fn mint(
        &mut self,
        to: &Address,
        amount: Decimal,
        events: &mut Vec<Event>,
    ) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if to.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { token: self.token })?;
        self.credit(to, amount)?;
        self.total_supply = supply;
        events.push(Event::Transfer {
            token: self.token,
            from: Address::zero(),
            to: to.clone(),
            value: amount,
        });
        Ok(())
    }

    /// Destroy `amount` units held by `from`
    pub fn burn(
        &mut self,
        from: &Address,
        amount: Decimal,
        events: &mut Vec<Event>,
    ) -> Result<(), LedgerError> {
        check_amount(amount)?;
        self.debit(from, amount)?;
        self.total_supply -= amount;
        events.push(Event::Transfer {
            token: self.token,
            from: from.clone(),
            to: Address::zero(),
            value: amount,
        });
        Ok(())
    }

    /// Move `amount` from `from` to `to`
    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Decimal,
        events: &mut Vec<Event>,
    ) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if from.is_zero() || to.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        if from != to && self.balance_of(to).checked_add(amount).is_none() {
            return Err(LedgerError::Overflow { token: self.token });
        }
        self.debit(from, amount)?;
        self.credit(to, amount)?;
        events.push(Event::Transfer {
            token: self.token,
            from: from.clone(),
            to: to.clone(),
            value: amount,
        });
        Ok(())
    }

    /// Set the allowance of `spender` over `owner`'s balance.
    /// `Decimal::MAX` is treated as unlimited and never decremented.
    pub fn approve(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: Decimal,
        events: &mut Vec<Event>,
    ) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if owner.is_zero() || spender.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        self.allowances
            .insert((owner.clone(), spender.clone()), amount);
        events.push(Event::Approval {
            token: self.token,
            owner: owner.clone(),
            spender: spender.clone(),
            value: amount,
        });
        Ok(())
    }

    /// Move `amount` from `from` to `to` on behalf of `spender`
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Decimal,
        events: &mut Vec<Event>,
    ) -> Result<(), LedgerError> {
        check_amount(amount)?;
        let allowance = self.allowance(from, spender);
        if allowance < amount {
            return Err(LedgerError::InsufficientAllowance {
                token: self.token,
                needed: amount,
                available: allowance,
            });
        }
        self.transfer(from, to, amount, events)?;
        if allowance != Decimal::MAX {
            self.allowances
                .insert((from.clone(), spender.clone()), allowance - amount);
        }
        Ok(())
    }

    fn credit(&mut self, to: &Address, amount: Decimal) -> Result<(), LedgerError> {
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { token: self.token })?;
        self.balances.insert(to.clone(), balance);
        Ok(())
    }

    fn debit(&mut self, from: &Address, amount: Decimal) -> Result<(), LedgerError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                token: self.token,
                needed: amount,
                available,
            });
        }
        let remaining = available - amount;
        if remaining.is_zero() {
            self.balances.remove(from);
        } else {
            self.balances.insert(from.clone(), remaining);
        }
        Ok(())
    }
}

fn check_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(LedgerError::NegativeAmount(amount));
    }
    Ok(())
}
