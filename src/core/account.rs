//! Account balance ledger
//!
//! Balances are unsigned and live behind a single reader/writer lock: reads
//! run concurrently with each other, a transfer excludes everything else for
//! its duration and either applies both sides or neither.
//!
//! The zero address is special. It is where minted funds come from (genesis
//! allocations, coinbase-style credits) and where burned funds go, so a
//! transfer *from* it is never balance-checked or debited and a transfer *to*
//! it credits nobody.

use crate::types::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Account ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    AccountNotFound(Address),
    #[error("Insufficient funds in {address}: balance {balance}, needed {needed}")]
    InsufficientFunds {
        address: Address,
        balance: u64,
        needed: u64,
    },
    #[error("Balance overflow crediting {0}")]
    BalanceOverflow(Address),
}

/// A ledger account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: u64,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            balance: 0,
        }
    }
}

/// Thread-safe account balances
#[derive(Debug, Default)]
pub struct AccountState {
    accounts: RwLock<HashMap<Address, Account>>,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account with zero balance, or return the existing one
    pub fn create_account(&self, address: Address) -> Account {
        let mut accounts = self.accounts.write();
        accounts
            .entry(address)
            .or_insert_with(|| Account::new(address))
            .clone()
    }

    pub fn get_account(&self, address: &Address) -> Result<Account, AccountError> {
        self.accounts
            .read()
            .get(address)
            .cloned()
            .ok_or(AccountError::AccountNotFound(*address))
    }

    pub fn balance(&self, address: &Address) -> Result<u64, AccountError> {
        self.get_account(address).map(|account| account.balance)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.read().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    /// Move `amount` from `from` to `to`, creating `to` if needed
    ///
    /// Fails without touching any balance when `from` is unknown or holds
    /// less than `amount` (the zero address excepted).
    pub fn transfer(&self, from: &Address, to: &Address, amount: u64) -> Result<(), AccountError> {
        let mut accounts = self.accounts.write();

        let debited = if from.is_zero() {
            None
        } else {
            let account = accounts
                .get(from)
                .ok_or(AccountError::AccountNotFound(*from))?;
            if account.balance < amount {
                return Err(AccountError::InsufficientFunds {
                    address: *from,
                    balance: account.balance,
                    needed: amount,
                });
            }
            Some(account.balance - amount)
        };

        let credited = if to.is_zero() {
            None
        } else {
            let current = accounts.get(to).map_or(0, |account| account.balance);
            // A self-transfer credits the already-debited balance
            let base = if from == to {
                debited.unwrap_or(current)
            } else {
                current
            };
            Some(
                base.checked_add(amount)
                    .ok_or(AccountError::BalanceOverflow(*to))?,
            )
        };

        if let Some(balance) = debited {
            if let Some(account) = accounts.get_mut(from) {
                account.balance = balance;
            }
        }
        if let Some(balance) = credited {
            accounts
                .entry(*to)
                .or_insert_with(|| Account::new(*to))
                .balance = balance;
        }

        Ok(())
    }

    /// Credit newly created funds to `to`
    pub fn mint(&self, to: &Address, amount: u64) -> Result<(), AccountError> {
        self.transfer(&Address::ZERO, to, amount)
    }

    /// Copy of every account, sorted by address
    pub fn snapshot(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.read().values().cloned().collect();
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        accounts
    }
}
