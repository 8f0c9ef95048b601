//! Error taxonomy shared by every precompile.
//!
//! Each variant's `Display` output is the revert reason surfaced to the EVM caller, so the
//! messages are part of the external interface and must stay stable.

use alloy::sol_types::{Revert, SolError};
use alloy_primitives::{Address, Bytes, U256};
use thiserror::Error;

use crate::{
    abi::AbiError, authorization::GrantStoreError, events::EventError, gas::GasError,
    journal::JournalError,
};

/// Errors returned by a precompile call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Calldata could not be interpreted (short selector, bad argument encoding or types).
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// The 4-byte selector does not belong to this precompile.
    #[error("no method with id: {0}")]
    UnknownMethod(String),
    /// A transaction method was invoked from a static (read-only) context.
    #[error("write protection: cannot call {method} in a read-only context")]
    ReadOnlyViolation {
        /// Name of the rejected method.
        method: String,
    },
    /// No live grant exists for the key.
    #[error("authorization to {kind} for address {grantee} does not exist or is expired")]
    AuthorizationNotFoundOrExpired {
        /// Account allowed to act.
        grantee: Address,
        /// Account that granted the permission.
        granter: Address,
        /// Message kind the grant covers.
        kind: String,
    },
    /// Attempt to create a grant from a zero or negative allowance change.
    #[error("cannot approve non-positive value")]
    NonPositiveApproval,
    /// The requested decrease exceeds the remaining allowance.
    #[error("negative amount when decreasing allowance: {requested} > {remaining}")]
    NegativeAmount {
        /// Amount the caller tried to subtract.
        requested: U256,
        /// Allowance that was left.
        remaining: U256,
    },
    /// The resulting allowance does not fit in 256 bits.
    #[error("integer overflow when increasing allowance")]
    IntegerOverflow,
    /// The grant has no allocation for the port/channel/denom triple.
    #[error("no matching allocation found for source port: {port}, source channel: {channel}, and denom: {denom}")]
    NoMatchingAllocation {
        /// IBC source port.
        port: String,
        /// IBC source channel.
        channel: String,
        /// Coin denomination.
        denom: String,
    },
    /// The stored grant carries a limit of the other variant.
    #[error("unknown authorization type: expected {expected}")]
    UnknownAuthorizationType {
        /// Variant required by the operation.
        expected: &'static str,
    },
    /// The allocation restricts receivers and this one is not listed.
    #[error("receiver {receiver} is not in the allow list")]
    ReceiverNotAllowed {
        /// Rejected receiver.
        receiver: String,
    },
    /// A spend exceeds what the grant still allows.
    #[error("amount {requested} exceeds allowance {remaining}")]
    ExceededAllowance {
        /// Amount the grantee tried to spend.
        requested: U256,
        /// Allowance that was left.
        remaining: U256,
    },
    /// Gas consumed by the call exceeds the gas left to the caller.
    #[error("out of gas")]
    OutOfGas,
    /// Opaque failure reported by a module keeper or handler.
    #[error("{0}")]
    Handler(String),
    /// ABI encoding or decoding failed.
    #[error(transparent)]
    Abi(#[from] AbiError),
    /// An event could not be encoded.
    #[error(transparent)]
    Event(#[from] EventError),
    /// EVM-visible effects could not be applied.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// Grants could not be read or written.
    #[error(transparent)]
    GrantStore(#[from] GrantStoreError),
}

impl DispatchError {
    /// Returns `true` if the error reports gas exhaustion.
    pub const fn is_out_of_gas(&self) -> bool {
        matches!(self, Self::OutOfGas)
    }

    /// Convenience constructor for handler failures.
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }
}

impl From<GasError> for DispatchError {
    fn from(err: GasError) -> Self {
        match err {
            GasError::OutOfGas { .. } => Self::OutOfGas,
            GasError::Panicked(msg) => Self::Handler(msg),
        }
    }
}

impl From<KeeperError> for DispatchError {
    fn from(err: KeeperError) -> Self {
        Self::Handler(err.to_string())
    }
}

/// Failure reported by an external module keeper.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct KeeperError(pub String);

impl KeeperError {
    /// Creates a keeper error with the given message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A failed precompile call: the error plus the gas charged up to the failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{error}")]
pub struct CallFailure {
    /// The reason the call reverted.
    pub error: DispatchError,
    /// Gas charged to the caller.
    pub gas_used: u64,
}

impl CallFailure {
    /// Creates a failure that charged no gas.
    pub const fn free(error: DispatchError) -> Self {
        Self { error, gas_used: 0 }
    }

    /// Returns the revert reason string.
    pub fn revert_reason(&self) -> String {
        self.error.to_string()
    }

    /// Revert reason encoded as Solidity `Error(string)` return data.
    pub fn revert_data(&self) -> Bytes {
        Revert::from(self.revert_reason()).abi_encode().into()
    }
}
