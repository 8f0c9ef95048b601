//! revm integration.
//!
//! [`EvmPrecompile`] exposes a [`Dispatcher`] through alloy-evm's [`Precompile`] trait so it can
//! be installed into a `PrecompilesMap`. Everything a call changes goes through the EVM journal
//! of the executing transaction: balances and logs through [`RevmJournal`], grants through
//! [`EvmGrantStore`]. A revert of the calling frame or of the transaction therefore undoes all
//! of it.

use alloy_evm::{
    precompiles::{Precompile, PrecompileInput},
    revm::precompile::{PrecompileError, PrecompileId, PrecompileResult},
    EvmInternals,
};
use alloy_primitives::{keccak256, Address, U256};
use revm::precompile::PrecompileOutput;
use std::{cell::RefCell, fmt::Display, sync::Arc};
use tracing::{debug, trace};

use crate::{
    authorization::{Grant, GrantKey, GrantStore, GrantStoreError},
    dispatcher::{CallContext, Dispatcher, PrecompileModule},
    gas::BasicGasMeter,
    journal::{pending_balance, settle_balances, JournalEntry, JournalError, SnapshotId, StateJournal},
};

/// Upper bound on the encoded size of one stored grant.
const MAX_ENCODED_GRANT: usize = 1 << 20;

/// [`StateJournal`] over the EVM journal of the executing transaction.
///
/// Entries are buffered and only reach the EVM state on commit.
pub struct RevmJournal<'r, 'a> {
    internals: &'r RefCell<EvmInternals<'a>>,
    pending: Vec<JournalEntry>,
}

impl std::fmt::Debug for RevmJournal<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevmJournal")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<'r, 'a> RevmJournal<'r, 'a> {
    /// Wraps the EVM internals of a precompile call.
    pub const fn new(internals: &'r RefCell<EvmInternals<'a>>) -> Self {
        Self {
            internals,
            pending: Vec::new(),
        }
    }

    fn committed_balance(
        internals: &mut EvmInternals<'_>,
        account: Address,
    ) -> Result<U256, JournalError> {
        internals
            .load_account(account)
            .map(|account| account.data.info.balance)
            .map_err(evm_error)
    }
}

impl StateJournal for RevmJournal<'_, '_> {
    fn snapshot(&mut self) -> SnapshotId {
        self.pending.len()
    }

    fn add_entries(&mut self, entries: Vec<JournalEntry>) {
        self.pending.extend(entries);
    }

    /// Balances are settled before anything is written, so an overdraft writes nothing. A
    /// backend failure while writing can leave earlier balances applied; the precompile then
    /// reverts and the EVM discards the frame.
    fn commit(&mut self) -> Result<(), JournalError> {
        let mut internals = self.internals.borrow_mut();
        let settled = settle_balances(&self.pending, |account| {
            Self::committed_balance(&mut internals, account)
        })?;

        for (account, balance) in settled {
            internals.set_balance(account, balance).map_err(evm_error)?;
        }
        for entry in self.pending.drain(..) {
            if let JournalEntry::Log(log) = entry {
                internals.log(log.log);
            }
        }
        Ok(())
    }

    fn revert(&mut self, snapshot: SnapshotId) {
        self.pending.truncate(snapshot);
    }

    fn available_balance(&mut self, account: Address) -> Result<U256, JournalError> {
        let balance = Self::committed_balance(&mut self.internals.borrow_mut(), account)?;
        pending_balance(&self.pending, account, balance)
    }
}

fn evm_error(err: impl Display) -> JournalError {
    JournalError::Evm(err.to_string())
}

/// Grants kept in the storage of the precompile account.
///
/// A grant occupies a run of slots starting at `keccak256(grantee ++ granter ++ kind)`. The
/// first slot holds the byte length of the JSON encoded grant, zero when absent, and the
/// following slots hold the encoding in 32-byte words.
pub struct EvmGrantStore<'r, 'a> {
    internals: &'r RefCell<EvmInternals<'a>>,
    address: Address,
}

impl std::fmt::Debug for EvmGrantStore<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmGrantStore")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl<'r, 'a> EvmGrantStore<'r, 'a> {
    /// Stores grants under the account at `address`.
    pub const fn new(internals: &'r RefCell<EvmInternals<'a>>, address: Address) -> Self {
        Self { internals, address }
    }

    /// First slot of the run holding the grant under `key`.
    pub fn grant_slot(key: &GrantKey) -> U256 {
        let mut preimage = Vec::with_capacity(40 + key.kind.len());
        preimage.extend_from_slice(key.grantee.as_slice());
        preimage.extend_from_slice(key.granter.as_slice());
        preimage.extend_from_slice(key.kind.as_bytes());
        U256::from_be_bytes(keccak256(preimage).0)
    }

    fn word_slot(base: U256, index: usize) -> U256 {
        base.wrapping_add(U256::from(index + 1))
    }

    fn load_word(&self, internals: &mut EvmInternals<'_>, slot: U256) -> Result<U256, GrantStoreError> {
        internals
            .sload(self.address, slot)
            .map(|value| value.data)
            .map_err(backend_error)
    }

    fn store_word(
        &self,
        internals: &mut EvmInternals<'_>,
        slot: U256,
        value: U256,
    ) -> Result<(), GrantStoreError> {
        internals
            .sstore(self.address, slot, value)
            .map(|_| ())
            .map_err(backend_error)
    }

    fn stored_len(
        &self,
        internals: &mut EvmInternals<'_>,
        key: &GrantKey,
        base: U256,
    ) -> Result<usize, GrantStoreError> {
        let len = self.load_word(internals, base)?;
        usize::try_from(len)
            .ok()
            .filter(|len| *len <= MAX_ENCODED_GRANT)
            .ok_or_else(|| corrupt(key, format!("stored length {len} out of range")))
    }

    /// Accounts without nonce, balance or code are cleared at the end of the transaction
    /// together with their storage.
    fn keep_account(&self, internals: &mut EvmInternals<'_>) -> Result<(), GrantStoreError> {
        let nonce = internals
            .load_account(self.address)
            .map_err(backend_error)?
            .data
            .info
            .nonce;
        if nonce == 0 {
            internals.bump_nonce(self.address).map_err(backend_error)?;
        }
        Ok(())
    }

    fn clear_words(
        &self,
        internals: &mut EvmInternals<'_>,
        base: U256,
        words: std::ops::Range<usize>,
    ) -> Result<(), GrantStoreError> {
        for index in words {
            self.store_word(internals, Self::word_slot(base, index), U256::ZERO)?;
        }
        Ok(())
    }
}

impl GrantStore for EvmGrantStore<'_, '_> {
    fn get(&self, key: &GrantKey) -> Result<Option<Grant>, GrantStoreError> {
        let mut internals = self.internals.borrow_mut();
        let base = Self::grant_slot(key);
        let len = self.stored_len(&mut internals, key, base)?;
        if len == 0 {
            return Ok(None);
        }

        let mut bytes = Vec::with_capacity(len.next_multiple_of(32));
        for index in 0..len.div_ceil(32) {
            let word = self.load_word(&mut internals, Self::word_slot(base, index))?;
            bytes.extend_from_slice(&word.to_be_bytes::<32>());
        }
        bytes.truncate(len);
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| corrupt(key, err.to_string()))
    }

    fn set(&mut self, key: GrantKey, grant: Grant) -> Result<(), GrantStoreError> {
        let bytes =
            serde_json::to_vec(&grant).map_err(|err| GrantStoreError::Backend(err.to_string()))?;
        if bytes.len() > MAX_ENCODED_GRANT {
            return Err(GrantStoreError::Backend(format!(
                "grant encoding of {} bytes exceeds {MAX_ENCODED_GRANT}",
                bytes.len()
            )));
        }

        let mut internals = self.internals.borrow_mut();
        let base = Self::grant_slot(&key);
        let previous = self.stored_len(&mut internals, &key, base)?;
        self.keep_account(&mut internals)?;

        self.store_word(&mut internals, base, U256::from(bytes.len()))?;
        for (index, chunk) in bytes.chunks(32).enumerate() {
            let mut word = [0u8; 32];
            word[..chunk.len()].copy_from_slice(chunk);
            self.store_word(
                &mut internals,
                Self::word_slot(base, index),
                U256::from_be_bytes(word),
            )?;
        }
        self.clear_words(
            &mut internals,
            base,
            bytes.len().div_ceil(32)..previous.div_ceil(32),
        )?;
        trace!(
            target: "precompiles::evm",
            grantee = ?key.grantee,
            granter = ?key.granter,
            len = bytes.len(),
            "grant stored"
        );
        Ok(())
    }

    fn delete(&mut self, key: &GrantKey) -> Result<(), GrantStoreError> {
        let mut internals = self.internals.borrow_mut();
        let base = Self::grant_slot(key);
        let previous = self.stored_len(&mut internals, key, base)?;
        if previous == 0 {
            return Ok(());
        }
        self.store_word(&mut internals, base, U256::ZERO)?;
        self.clear_words(&mut internals, base, 0..previous.div_ceil(32))
    }
}

fn backend_error(err: impl Display) -> GrantStoreError {
    GrantStoreError::Backend(err.to_string())
}

fn corrupt(key: &GrantKey, reason: String) -> GrantStoreError {
    GrantStoreError::Corrupt {
        grantee: key.grantee,
        granter: key.granter,
        reason,
    }
}

/// A [`Dispatcher`] installed as an EVM precompile.
pub struct EvmPrecompile<M> {
    id: PrecompileId,
    dispatcher: Arc<Dispatcher<M>>,
}

impl<M> Clone for EvmPrecompile<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<M> std::fmt::Debug for EvmPrecompile<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmPrecompile")
            .field("id", &self.id)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl<M: PrecompileModule> EvmPrecompile<M> {
    /// Wraps `dispatcher`.
    pub fn new(dispatcher: Dispatcher<M>) -> Self {
        Self {
            id: PrecompileId::custom(M::NAME),
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Address the precompile is installed at.
    pub fn address(&self) -> Address {
        self.dispatcher.address()
    }

    /// The wrapped dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher<M> {
        &self.dispatcher
    }
}

impl<M: PrecompileModule> Precompile for EvmPrecompile<M> {
    fn precompile_id(&self) -> &PrecompileId {
        &self.id
    }

    /// Runs the call against the EVM journal.
    ///
    /// Transaction methods are rejected inside a STATICCALL frame. Failures other than gas
    /// exhaustion revert with an `Error(string)` payload and charge the gas used up to the
    /// failure.
    fn call(&self, input: PrecompileInput<'_>) -> PrecompileResult {
        let PrecompileInput {
            data,
            gas,
            caller,
            value,
            is_static,
            internals,
            ..
        } = input;

        let required = self.dispatcher.required_gas(data);
        let Some(remaining) = gas.checked_sub(required) else {
            return Err(PrecompileError::OutOfGas);
        };

        let origin = internals.tx_origin();
        let block_number = internals.block_number().saturating_to::<u64>();
        let block_time = internals.block_timestamp().saturating_to::<u64>();
        let internals = RefCell::new(internals);

        let mut journal = RevmJournal::new(&internals);
        let mut grants = EvmGrantStore::new(&internals, self.address());
        let mut meter = BasicGasMeter::new(remaining);
        let ctx = CallContext {
            caller,
            origin,
            value,
            gas: remaining,
            block_number,
            block_time,
            journal: &mut journal,
            grants: &mut grants,
            meter: &mut meter,
        };

        match self.dispatcher.run(ctx, data, is_static) {
            Ok(output) => {
                let gas_used = required.saturating_add(output.gas_used).min(gas);
                trace!(target: "precompiles::evm", precompile = M::NAME, gas_used, "call succeeded");
                Ok(PrecompileOutput::new(gas_used, output.bytes))
            }
            Err(failure) if failure.error.is_out_of_gas() => Err(PrecompileError::OutOfGas),
            Err(failure) => {
                let gas_used = required.saturating_add(failure.gas_used).min(gas);
                debug!(
                    target: "precompiles::evm",
                    precompile = M::NAME,
                    gas_used,
                    is_static,
                    reason = %failure,
                    "call reverted"
                );
                Ok(PrecompileOutput::new_reverted(gas_used, failure.revert_data()))
            }
        }
    }

    fn is_pure(&self) -> bool {
        false
    }
}
