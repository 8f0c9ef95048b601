//! # Stateful EVM Precompiles
//!
//! This crate exposes chain modules (staking, IBC transfers, slashing) to EVM contracts as
//! precompiled contracts, together with the framework they share.
//!
//! ## Available Precompiles
//!
//! | Address | Name | Description |
//! |---------|------|-------------|
//! | `0x0800` | [`staking`] | Delegation and undelegation with spend grants |
//! | `0x0802` | [`ics20`] | IBC fungible token transfers with per-channel allocations |
//! | `0x0806` | [`slashing`] | Validator unjailing and signing info |
//!
//! ## Architecture
//!
//! Every precompile implements [`dispatcher::PrecompileModule`]: an ABI, a handler per method
//! and a base gas table. The [`dispatcher::Dispatcher`] runs each call atomically:
//!
//! 1. **Dispatch**: selector lookup in the [`abi::AbiCatalog`] and read-only enforcement
//! 2. **Authorization**: grant checks through the [`authorization::AuthorizationLedger`]
//! 3. **Gas**: host gas metering through [`gas::HostGasMeter`]
//! 4. **State**: balance changes and logs recorded in a [`journal::StateJournal`], committed
//!    only when the handler succeeds
//!
//! ## Integration
//!
//! [`evm::EvmPrecompile`] adapts a dispatcher to the revm precompile interface. Grants live in
//! the storage of the precompile account and every change goes through the EVM journal. The
//! `ev-revm` crate installs every registered precompile into the EVM:
//!
//! ```ignore
//! use ev_precompiles::{config::PrecompileConfig, dispatcher::Dispatcher, staking::StakingPrecompile};
//!
//! let staking = Dispatcher::new(StakingPrecompile::new(keeper), PrecompileConfig::from_env()?)?;
//! ```

pub mod abi;
pub mod authorization;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod evm;
pub mod gas;
pub mod ics20;
pub mod journal;
pub mod slashing;
pub mod staking;
