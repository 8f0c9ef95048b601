//! ICS-20 transfer precompile.
//!
//! Sends fungible tokens over IBC through the transfer module keeper at
//! [`ICS20_PRECOMPILE_ADDR`]. Transfer grants carry per-channel allocations instead of a
//! single amount; a grantee transferring on behalf of a granter spends the allocation that
//! matches the source port and channel.

use alloy::dyn_abi::DynSolValue;
use alloy_primitives::{address, Address, U256};
use tracing::info;

use crate::{
    abi::{AbiCatalog, AbiError},
    authorization::{Allocation, Coin, GrantKey, Limit},
    dispatcher::{Args, HandlerContext, HandlerTable, PrecompileModule},
    error::{DispatchError, KeeperError},
};

/// Address of the ICS-20 precompile.
pub const ICS20_PRECOMPILE_ADDR: Address = address!("0x0000000000000000000000000000000000000802");

/// Message kind of IBC transfers.
pub const TRANSFER_MSG: &str = "/ibc.applications.transfer.v1.MsgTransfer";

const INTERFACE: &str = include_str!("../abi/ics20.json");

/// A transfer handed to the keeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgTransfer {
    /// IBC source port.
    pub source_port: String,
    /// IBC source channel.
    pub source_channel: String,
    /// Tokens sent.
    pub token: Coin,
    /// Sending account.
    pub sender: Address,
    /// Receiver on the counterparty chain.
    pub receiver: String,
    /// Absolute timeout in nanoseconds since the unix epoch.
    pub timeout_timestamp: u64,
    /// Free-form memo forwarded with the packet.
    pub memo: String,
}

/// Transfer module operations used by the precompile.
pub trait TransferKeeper: Send + Sync {
    /// Whether an open channel exists for `port`/`channel`.
    fn has_channel(&self, port: &str, channel: &str) -> bool;

    /// Denomination backed by the native EVM balance.
    fn evm_denom(&self) -> &str;

    /// Sends the packet and returns its sequence number.
    fn transfer(&self, msg: &MsgTransfer) -> Result<u64, KeeperError>;
}

/// ICS-20 precompile over a [`TransferKeeper`].
#[derive(Debug, Clone)]
pub struct Ics20Precompile<K> {
    keeper: K,
}

impl<K: TransferKeeper + 'static> Ics20Precompile<K> {
    /// Creates the precompile.
    pub const fn new(keeper: K) -> Self {
        Self { keeper }
    }

    /// The wrapped keeper.
    pub const fn keeper(&self) -> &K {
        &self.keeper
    }

    fn approve(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let grantee = args.address(0)?;
        let allocations = args
            .array(1)?
            .iter()
            .map(Allocation::from_sol_value)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| DispatchError::MalformedInput("invalid allocation".to_string()))?;
        if allocations.is_empty() {
            return Err(DispatchError::MalformedInput("no allocations".to_string()));
        }
        if let Some(missing) = allocations
            .iter()
            .find(|allocation| !self.keeper.has_channel(&allocation.source_port, &allocation.source_channel))
        {
            return Err(DispatchError::handler(format!(
                "channel not found: port ID ({}) channel ID ({})",
                missing.source_port, missing.source_channel
            )));
        }

        let key = GrantKey::new(grantee, ctx.caller, TRANSFER_MSG);
        ctx.ledger().approve(key, Limit::Allocations(allocations))?;
        Ok(vec![DynSolValue::Bool(true)])
    }

    fn revoke(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let grantee = args.address(0)?;
        let key = GrantKey::new(grantee, ctx.caller, TRANSFER_MSG);
        ctx.ledger().revoke(key)?;
        Ok(vec![DynSolValue::Bool(true)])
    }

    fn increase_allowance(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let key = GrantKey::new(args.address(0)?, ctx.caller, TRANSFER_MSG);
        ctx.ledger().increase_allocation(
            key,
            args.string(1)?,
            args.string(2)?,
            args.string(3)?,
            args.uint(4)?,
        )?;
        Ok(vec![DynSolValue::Bool(true)])
    }

    fn decrease_allowance(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let key = GrantKey::new(args.address(0)?, ctx.caller, TRANSFER_MSG);
        ctx.ledger().decrease_allocation(
            key,
            args.string(1)?,
            args.string(2)?,
            args.string(3)?,
            args.uint(4)?,
        )?;
        Ok(vec![DynSolValue::Bool(true)])
    }

    fn allowance(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let key = GrantKey::new(args.address(0)?, args.address(1)?, TRANSFER_MSG);
        let allocations = match ctx.ledger().exists(&key) {
            Ok(grant) => match grant.limit {
                Limit::Allocations(allocations) => allocations,
                Limit::Simple(_) => {
                    return Err(DispatchError::UnknownAuthorizationType {
                        expected: "allocation",
                    })
                }
            },
            Err(DispatchError::AuthorizationNotFoundOrExpired { .. }) => Vec::new(),
            Err(err) => return Err(err),
        };
        Ok(vec![DynSolValue::Array(
            allocations.iter().map(Allocation::to_sol_value).collect(),
        )])
    }

    fn transfer(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let msg = MsgTransfer {
            source_port: args.string(0)?.to_string(),
            source_channel: args.string(1)?.to_string(),
            token: Coin::new(args.string(2)?, args.uint(3)?),
            sender: args.address(4)?,
            receiver: args.string(5)?.to_string(),
            timeout_timestamp: args.u64(6)?,
            memo: args.string(7)?.to_string(),
        };
        if msg.token.amount.is_zero() {
            return Err(DispatchError::MalformedInput(
                "transfer amount must be positive".to_string(),
            ));
        }

        if msg.sender != ctx.caller {
            let key = GrantKey::new(ctx.caller, msg.sender, TRANSFER_MSG);
            ctx.ledger().spend_allocation(
                &key,
                &msg.source_port,
                &msg.source_channel,
                &msg.token.denom,
                msg.token.amount,
                &msg.receiver,
            )?;
        }
        if msg.token.denom == self.keeper.evm_denom() {
            ctx.debit(msg.sender, msg.token.amount)?;
        }
        let sequence = self.keeper.transfer(&msg)?;

        ctx.emit(
            "IBCTransfer",
            &[
                DynSolValue::Address(msg.sender),
                DynSolValue::String(msg.receiver.clone()),
            ],
            &[
                DynSolValue::String(msg.source_port.clone()),
                DynSolValue::String(msg.source_channel.clone()),
                DynSolValue::String(msg.token.denom.clone()),
                DynSolValue::Uint(msg.token.amount, 256),
                DynSolValue::String(msg.memo.clone()),
            ],
        )?;
        info!(
            target: "precompiles::ics20",
            sender = ?msg.sender,
            receiver = %msg.receiver,
            channel = %msg.source_channel,
            denom = %msg.token.denom,
            amount = %msg.token.amount,
            sequence,
            "ibc transfer sent"
        );
        Ok(vec![DynSolValue::Uint(U256::from(sequence), 64)])
    }
}

impl<K: TransferKeeper + 'static> PrecompileModule for Ics20Precompile<K> {
    const NAME: &'static str = "ics20";

    fn address(&self) -> Address {
        ICS20_PRECOMPILE_ADDR
    }

    fn catalog() -> Result<AbiCatalog, AbiError> {
        AbiCatalog::from_json(INTERFACE)
    }

    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
            .with("approve", Self::approve)
            .with("revoke", Self::revoke)
            .with("increaseAllowance", Self::increase_allowance)
            .with("decreaseAllowance", Self::decrease_allowance)
            .with("allowance", Self::allowance)
            .with("transfer", Self::transfer)
    }

    fn base_gas() -> &'static [(&'static str, u64)] {
        &[
            ("approve", 30_000),
            ("revoke", 30_000),
            ("increaseAllowance", 30_000),
            ("decreaseAllowance", 30_000),
            ("allowance", 3_000),
            ("transfer", 60_000),
        ]
    }
}
