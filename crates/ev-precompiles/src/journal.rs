//! EVM-visible effects of a precompile call.
//!
//! Handlers never touch balances or logs directly. They append [`JournalEntry`] values to a
//! [`StateJournal`], which applies them atomically on [`StateJournal::commit`] or drops them on
//! [`StateJournal::revert`]. [`MemoryJournal`] is the in-memory implementation; the revm
//! implementation lives in [`crate::evm`].

use alloy_primitives::{Address, U256};
use std::collections::HashMap;
use thiserror::Error;

use crate::events::PrecompileLog;

/// Position in the pending entry list a journal can be reverted to.
///
/// Snapshots only bound [`StateJournal::revert`]; [`StateJournal::commit`] always drains the
/// whole pending list.
pub type SnapshotId = usize;

/// Errors raised when applying journal entries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JournalError {
    /// A debit exceeds the account balance.
    #[error("insufficient balance for {account}: {balance} < {amount}")]
    InsufficientBalance {
        /// Debited account.
        account: Address,
        /// Balance at the time of the debit.
        balance: U256,
        /// Amount debited.
        amount: U256,
    },
    /// A credit overflows the account balance.
    #[error("balance overflow for {account}")]
    BalanceOverflow {
        /// Credited account.
        account: Address,
    },
    /// The underlying EVM state could not be accessed.
    #[error("evm state error: {0}")]
    Evm(String),
}

/// Direction of a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOp {
    /// Credit.
    Add,
    /// Debit.
    Sub,
}

/// One replayable EVM-visible effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// Native balance change of an account.
    BalanceChange {
        /// Affected account.
        account: Address,
        /// Amount added or removed.
        amount: U256,
        /// Direction.
        op: BalanceOp,
    },
    /// Emitted log.
    Log(PrecompileLog),
}

/// Transactional sink for [`JournalEntry`] values.
pub trait StateJournal {
    /// Marks the current position so later entries can be discarded.
    fn snapshot(&mut self) -> SnapshotId;

    /// Appends entries to the pending list.
    fn add_entries(&mut self, entries: Vec<JournalEntry>);

    /// Applies every pending entry, including entries recorded before the latest snapshot.
    /// Either all entries are applied or none is, in which case the pending list is left
    /// untouched.
    fn commit(&mut self) -> Result<(), JournalError>;

    /// Drops pending entries recorded after `snapshot`.
    fn revert(&mut self, snapshot: SnapshotId);

    /// Balance of `account` with the pending balance changes applied.
    fn available_balance(&mut self, account: Address) -> Result<U256, JournalError>;

    /// Appends a single entry.
    fn add_entry(&mut self, entry: JournalEntry) {
        self.add_entries(vec![entry]);
    }
}

fn apply_change(
    account: Address,
    balance: U256,
    amount: U256,
    op: BalanceOp,
) -> Result<U256, JournalError> {
    match op {
        BalanceOp::Add => balance
            .checked_add(amount)
            .ok_or(JournalError::BalanceOverflow { account }),
        BalanceOp::Sub => balance
            .checked_sub(amount)
            .ok_or(JournalError::InsufficientBalance {
                account,
                balance,
                amount,
            }),
    }
}

/// Folds the balance changes of `account` in `entries` over `balance`.
pub(crate) fn pending_balance(
    entries: &[JournalEntry],
    account: Address,
    balance: U256,
) -> Result<U256, JournalError> {
    entries.iter().try_fold(balance, |balance, entry| match entry {
        JournalEntry::BalanceChange {
            account: changed,
            amount,
            op,
        } if *changed == account => apply_change(account, balance, *amount, *op),
        _ => Ok(balance),
    })
}

/// Computes post-commit balances for the accounts touched by `entries`.
///
/// `load` is called once per account to fetch its current balance. The returned list holds
/// final balances in first-touch order.
pub(crate) fn settle_balances<F>(
    entries: &[JournalEntry],
    mut load: F,
) -> Result<Vec<(Address, U256)>, JournalError>
where
    F: FnMut(Address) -> Result<U256, JournalError>,
{
    let mut order = Vec::new();
    let mut balances: HashMap<Address, U256> = HashMap::new();

    for entry in entries {
        let JournalEntry::BalanceChange { account, amount, op } = entry else {
            continue;
        };
        let balance = match balances.get(account) {
            Some(balance) => *balance,
            None => {
                order.push(*account);
                load(*account)?
            }
        };
        balances.insert(*account, apply_change(*account, balance, *amount, *op)?);
    }

    Ok(order
        .into_iter()
        .map(|account| (account, balances[&account]))
        .collect())
}

/// In-memory journal over a balance map and a log list.
#[derive(Debug, Default, Clone)]
pub struct MemoryJournal {
    balances: HashMap<Address, U256>,
    logs: Vec<PrecompileLog>,
    pending: Vec<JournalEntry>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a committed balance directly.
    pub fn set_balance(&mut self, account: Address, balance: U256) {
        self.balances.insert(account, balance);
    }

    /// Committed balance of `account`.
    pub fn balance(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    /// Committed logs in emission order.
    pub fn logs(&self) -> &[PrecompileLog] {
        &self.logs
    }

    /// Entries recorded but not yet committed.
    pub fn pending(&self) -> &[JournalEntry] {
        &self.pending
    }
}

impl StateJournal for MemoryJournal {
    fn snapshot(&mut self) -> SnapshotId {
        self.pending.len()
    }

    fn add_entries(&mut self, entries: Vec<JournalEntry>) {
        self.pending.extend(entries);
    }

    fn commit(&mut self) -> Result<(), JournalError> {
        let settled = settle_balances(&self.pending, |account| Ok(self.balance(account)))?;
        self.balances.extend(settled);
        for entry in self.pending.drain(..) {
            if let JournalEntry::Log(log) = entry {
                self.logs.push(log);
            }
        }
        Ok(())
    }

    fn revert(&mut self, snapshot: SnapshotId) {
        self.pending.truncate(snapshot);
    }

    fn available_balance(&mut self, account: Address) -> Result<U256, JournalError> {
        pending_balance(&self.pending, account, self.balance(account))
    }
}
