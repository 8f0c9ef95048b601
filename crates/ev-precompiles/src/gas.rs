//! Bridge between the EVM call gas budget and the host chain gas meter.
//!
//! Module handlers charge gas on a [`HostGasMeter`] the way Cosmos-style keepers do. The
//! dispatcher brackets each handler invocation with a [`MeteringScope`] so the amount charged
//! during the call can be compared against the caller's remaining EVM gas. Faults on the host
//! side (including panics thrown by a meter or keeper) are contained by the scope and surface as
//! ordinary errors.

use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Errors produced while metering host-side gas.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GasError {
    /// The meter limit was exceeded.
    #[error("out of gas in location: {descriptor}; gas wanted: {wanted}, gas used: {used}")]
    OutOfGas {
        /// What was being charged.
        descriptor: String,
        /// Amount that was requested.
        wanted: u64,
        /// Amount already consumed before the request.
        used: u64,
    },
    /// A handler panicked for a reason other than gas exhaustion.
    #[error("precompile handler panicked: {0}")]
    Panicked(String),
}

/// Panic payload host meters use to signal exhaustion.
///
/// Meters that cannot return errors (for instance ones shared with code that expects
/// unwinding) may `std::panic::panic_any(OutOfGasPanic { .. })`; [`MeteringScope::run`]
/// converts it back into [`GasError::OutOfGas`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfGasPanic {
    /// What was being charged.
    pub descriptor: String,
}

/// Gas meter of the host chain.
pub trait HostGasMeter {
    /// Total gas consumed so far.
    fn consumed(&self) -> u64;

    /// Maximum gas this meter allows.
    fn limit(&self) -> u64;

    /// Charges `amount`, failing if the limit would be exceeded.
    fn consume(&mut self, amount: u64, descriptor: &str) -> Result<(), GasError>;

    /// Gas left before the limit.
    fn remaining(&self) -> u64 {
        self.limit().saturating_sub(self.consumed())
    }
}

/// Fixed-limit gas meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicGasMeter {
    limit: u64,
    consumed: u64,
}

impl BasicGasMeter {
    /// Creates a meter allowing up to `limit` gas.
    pub const fn new(limit: u64) -> Self {
        Self { limit, consumed: 0 }
    }
}

impl HostGasMeter for BasicGasMeter {
    fn consumed(&self) -> u64 {
        self.consumed
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn consume(&mut self, amount: u64, descriptor: &str) -> Result<(), GasError> {
        let out_of_gas = || GasError::OutOfGas {
            descriptor: descriptor.to_string(),
            wanted: amount,
            used: self.consumed,
        };
        let total = self.consumed.checked_add(amount).ok_or_else(out_of_gas)?;
        if total > self.limit {
            let err = out_of_gas();
            // The meter is exhausted either way; pin it at the limit like the host chain does.
            self.consumed = self.limit;
            return Err(err);
        }
        self.consumed = total;
        Ok(())
    }
}

/// Flat and per-byte costs charged for grant-store access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvGasConfig {
    /// Existence check.
    pub has_cost: u64,
    /// Deletion.
    pub delete_cost: u64,
    /// Flat cost of a read.
    pub read_cost_flat: u64,
    /// Per-byte cost of a read.
    pub read_cost_per_byte: u64,
    /// Flat cost of a write.
    pub write_cost_flat: u64,
    /// Per-byte cost of a write.
    pub write_cost_per_byte: u64,
}

impl Default for KvGasConfig {
    fn default() -> Self {
        Self {
            has_cost: 1_000,
            delete_cost: 1_000,
            read_cost_flat: 1_000,
            read_cost_per_byte: 3,
            write_cost_flat: 2_000,
            write_cost_per_byte: 30,
        }
    }
}

impl KvGasConfig {
    /// Cost of reading `len` bytes.
    pub const fn read_cost(&self, len: usize) -> u64 {
        self.read_cost_flat
            .saturating_add(self.read_cost_per_byte.saturating_mul(len as u64))
    }

    /// Cost of writing `len` bytes.
    pub const fn write_cost(&self, len: usize) -> u64 {
        self.write_cost_flat
            .saturating_add(self.write_cost_per_byte.saturating_mul(len as u64))
    }
}

/// Brackets one handler invocation on a host gas meter.
#[derive(Debug, Clone, Copy)]
pub struct MeteringScope {
    start: u64,
}

impl MeteringScope {
    /// Opens a scope at the meter's current reading.
    pub fn open(meter: &dyn HostGasMeter) -> Self {
        Self {
            start: meter.consumed(),
        }
    }

    /// Gas consumed on `meter` since the scope was opened.
    pub fn consumed(&self, meter: &dyn HostGasMeter) -> u64 {
        meter.consumed().saturating_sub(self.start)
    }

    /// Runs `f`, containing any panic it raises.
    ///
    /// An [`OutOfGasPanic`] payload becomes [`GasError::OutOfGas`]; any other payload becomes
    /// [`GasError::Panicked`]. Errors returned normally by `f` are passed through.
    pub fn run<T, E, F>(&self, f: F) -> Result<Result<T, E>, GasError>
    where
        F: FnOnce() -> Result<T, E>,
    {
        panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
            if let Some(oog) = payload.downcast_ref::<OutOfGasPanic>() {
                GasError::OutOfGas {
                    descriptor: oog.descriptor.clone(),
                    wanted: 0,
                    used: self.start,
                }
            } else if let Some(msg) = payload.downcast_ref::<&str>() {
                GasError::Panicked((*msg).to_string())
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                GasError::Panicked(msg.clone())
            } else {
                GasError::Panicked("unknown panic payload".to_string())
            }
        })
    }
}
