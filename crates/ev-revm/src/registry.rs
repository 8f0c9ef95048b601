//! Registry of stateful precompiles available to the EVM.
//!
//! Precompiles are registered once at start-up under their fixed address. A subset of them is
//! then activated; only active precompiles are installed into new EVM instances.

use alloy_evm::precompiles::{DynPrecompile, Precompile, PrecompilesMap};
use alloy_primitives::Address;
use ev_precompiles::{dispatcher::PrecompileModule, evm::EvmPrecompile};
use std::{collections::BTreeMap, fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while assembling the precompile set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two precompiles claim the same address.
    #[error("precompile already registered at {0}")]
    DuplicateAddress(Address),
    /// An address appears twice in the active list.
    #[error("duplicate precompile {0}")]
    DuplicateActive(Address),
    /// The active list is not in ascending address order.
    #[error("precompiles need to be sorted: {0:?}")]
    Unsorted(Vec<Address>),
    /// An active address has no registered precompile.
    #[error("precompile {0} is not available")]
    NotAvailable(Address),
}

type SharedPrecompile = Arc<dyn Precompile + Send + Sync>;

/// Available and active precompiles keyed by address.
#[derive(Clone, Default)]
pub struct PrecompileRegistry {
    available: BTreeMap<Address, SharedPrecompile>,
    active: Option<Vec<Address>>,
}

impl fmt::Debug for PrecompileRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrecompileRegistry")
            .field("available", &self.available.keys().collect::<Vec<_>>())
            .field("active", &self.active)
            .finish()
    }
}

impl PrecompileRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dispatcher-backed precompile under its own address.
    pub fn register<M: PrecompileModule>(
        &mut self,
        precompile: EvmPrecompile<M>,
    ) -> Result<(), RegistryError> {
        let address = precompile.address();
        self.register_at(address, precompile)
    }

    /// Registers any precompile under `address`.
    pub fn register_at<P>(&mut self, address: Address, precompile: P) -> Result<(), RegistryError>
    where
        P: Precompile + Send + Sync + 'static,
    {
        if self.available.contains_key(&address) {
            warn!(target: "evm::precompiles", %address, "precompile address collision");
            return Err(RegistryError::DuplicateAddress(address));
        }
        debug!(
            target: "evm::precompiles",
            %address,
            id = ?precompile.precompile_id(),
            "precompile registered"
        );
        self.available.insert(address, Arc::new(precompile));
        Ok(())
    }

    /// Sets the active subset. Addresses must be unique, sorted and registered.
    pub fn set_active(&mut self, addresses: Vec<Address>) -> Result<(), RegistryError> {
        for pair in addresses.windows(2) {
            if pair[0] == pair[1] {
                return Err(RegistryError::DuplicateActive(pair[0]));
            }
        }
        if !addresses.is_sorted() {
            return Err(RegistryError::Unsorted(addresses));
        }
        if let Some(missing) = addresses
            .iter()
            .find(|address| !self.available.contains_key(*address))
        {
            return Err(RegistryError::NotAvailable(*missing));
        }
        self.active = Some(addresses);
        Ok(())
    }

    /// Builder variant of [`Self::set_active`].
    pub fn with_active(mut self, addresses: Vec<Address>) -> Result<Self, RegistryError> {
        self.set_active(addresses)?;
        Ok(self)
    }

    /// Registered addresses in ascending order.
    pub fn addresses(&self) -> Vec<Address> {
        self.available.keys().copied().collect()
    }

    /// Active addresses in ascending order. Every registered precompile is active until
    /// [`Self::set_active`] narrows the set.
    pub fn active(&self) -> Vec<Address> {
        self.active.clone().unwrap_or_else(|| self.addresses())
    }

    /// Whether `address` hosts an active precompile.
    pub fn is_active(&self, address: &Address) -> bool {
        match &self.active {
            Some(active) => active.binary_search(address).is_ok(),
            None => self.available.contains_key(address),
        }
    }

    /// Number of registered precompiles.
    pub fn len(&self) -> usize {
        self.available.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    /// Installs every active precompile into `precompiles`, replacing whatever was there.
    pub fn install(&self, precompiles: &mut PrecompilesMap) {
        for address in self.active() {
            let Some(precompile) = self.available.get(&address) else {
                continue;
            };
            let precompile = Arc::clone(precompile);
            let id = precompile.precompile_id().clone();
            precompiles.apply_precompile(&address, move |_| {
                let precompile_for_call = Arc::clone(&precompile);
                Some(DynPrecompile::new_stateful(id, move |input| {
                    precompile_for_call.call(input)
                }))
            });
        }
    }
}
