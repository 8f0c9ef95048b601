//! Staking precompile.
//!
//! Exposes delegation to the staking module keeper at [`STAKING_PRECOMPILE_ADDR`]. Accounts
//! can authorize others to delegate or undelegate on their behalf through the
//! `approve`/`increaseAllowance`/`decreaseAllowance`/`revoke` methods; such calls spend the
//! grant before the keeper runs.

use alloy::dyn_abi::DynSolValue;
use alloy_primitives::{address, Address, I256, U256};
use tracing::info;

use crate::{
    abi::{AbiCatalog, AbiError},
    authorization::{GrantKey, Limit},
    dispatcher::{Args, HandlerContext, HandlerTable, PrecompileModule},
    error::{DispatchError, KeeperError},
};

/// Address of the staking precompile.
pub const STAKING_PRECOMPILE_ADDR: Address = address!("0x0000000000000000000000000000000000000800");

/// Message kind of delegations.
pub const DELEGATE_MSG: &str = "/cosmos.staking.v1beta1.MsgDelegate";
/// Message kind of undelegations.
pub const UNDELEGATE_MSG: &str = "/cosmos.staking.v1beta1.MsgUndelegate";

const SUPPORTED_MSGS: [&str; 2] = [DELEGATE_MSG, UNDELEGATE_MSG];

const INTERFACE: &[&str] = &[
    "function approve(address spender, uint256 amount, string[] methods) returns (bool approved)",
    "function revoke(address spender, string[] methods) returns (bool revoked)",
    "function increaseAllowance(address spender, uint256 amount, string[] methods) returns (bool approved)",
    "function decreaseAllowance(address spender, uint256 amount, string[] methods) returns (bool approved)",
    "function allowance(address owner, address spender, string method) view returns (uint256 remaining)",
    "function delegate(address delegatorAddress, string validatorAddress, uint256 amount) returns (bool success)",
    "function undelegate(address delegatorAddress, string validatorAddress, uint256 amount) returns (int64 completionTime)",
    "event Approval(address indexed grantee, address indexed granter, string[] methods, uint256 value)",
    "event AllowanceChange(address indexed grantee, address indexed granter, string[] methods, uint256[] values)",
    "event Revocation(address indexed grantee, address indexed granter, string[] methods)",
    "event Delegate(address indexed delegatorAddress, string indexed validatorAddress, uint256 amount, uint256 newShares)",
    "event Unbond(address indexed delegatorAddress, string indexed validatorAddress, uint256 amount, uint256 completionTime)",
];

/// Staking module operations used by the precompile.
pub trait StakingKeeper: Send + Sync {
    /// Delegates `amount` from `delegator` to `validator` and returns the shares issued.
    fn delegate(
        &self,
        delegator: Address,
        validator: &str,
        amount: U256,
    ) -> Result<U256, KeeperError>;

    /// Starts unbonding `amount` and returns the completion time (unix seconds).
    fn undelegate(
        &self,
        delegator: Address,
        validator: &str,
        amount: U256,
    ) -> Result<u64, KeeperError>;
}

/// Staking precompile over a [`StakingKeeper`].
#[derive(Debug, Clone)]
pub struct StakingPrecompile<K> {
    keeper: K,
}

impl<K: StakingKeeper + 'static> StakingPrecompile<K> {
    /// Creates the precompile.
    pub const fn new(keeper: K) -> Self {
        Self { keeper }
    }

    /// The wrapped keeper.
    pub const fn keeper(&self) -> &K {
        &self.keeper
    }

    fn message_kinds(args: Args<'_>, idx: usize) -> Result<Vec<String>, DispatchError> {
        let methods = args.strings(idx)?;
        if methods.is_empty() {
            return Err(DispatchError::MalformedInput("no methods defined".to_string()));
        }
        if let Some(invalid) = methods
            .iter()
            .find(|method| !SUPPORTED_MSGS.contains(&method.as_str()))
        {
            return Err(DispatchError::MalformedInput(format!(
                "invalid method: {invalid}"
            )));
        }
        Ok(methods)
    }

    fn approve(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let spender = args.address(0)?;
        let amount = args.uint(1)?;
        for kind in Self::message_kinds(args, 2)? {
            let key = GrantKey::new(spender, ctx.caller, kind);
            ctx.ledger().approve(key, Limit::Simple(amount))?;
        }
        Ok(vec![DynSolValue::Bool(true)])
    }

    fn revoke(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let spender = args.address(0)?;
        for kind in Self::message_kinds(args, 1)? {
            let key = GrantKey::new(spender, ctx.caller, kind);
            ctx.ledger().revoke(key)?;
        }
        Ok(vec![DynSolValue::Bool(true)])
    }

    fn increase_allowance(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let spender = args.address(0)?;
        let amount = args.uint(1)?;
        for kind in Self::message_kinds(args, 2)? {
            let key = GrantKey::new(spender, ctx.caller, kind);
            ctx.ledger().increase_allowance(key, amount)?;
        }
        Ok(vec![DynSolValue::Bool(true)])
    }

    fn decrease_allowance(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let spender = args.address(0)?;
        let amount = args.uint(1)?;
        for kind in Self::message_kinds(args, 2)? {
            let key = GrantKey::new(spender, ctx.caller, kind);
            ctx.ledger().decrease_allowance(key, amount)?;
        }
        Ok(vec![DynSolValue::Bool(true)])
    }

    fn allowance(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let owner = args.address(0)?;
        let spender = args.address(1)?;
        let method = args.string(2)?;
        let remaining = ctx
            .ledger()
            .allowance(&GrantKey::new(spender, owner, method))?;
        Ok(vec![DynSolValue::Uint(remaining, 256)])
    }

    /// Spends the caller's grant when acting for someone else.
    fn authorize(
        ctx: &mut HandlerContext<'_>,
        delegator: Address,
        kind: &str,
        amount: U256,
    ) -> Result<(), DispatchError> {
        if delegator == ctx.caller {
            return Ok(());
        }
        let key = GrantKey::new(ctx.caller, delegator, kind);
        ctx.ledger().spend(&key, amount)
    }

    fn delegate(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let delegator = args.address(0)?;
        let validator = args.string(1)?;
        let amount = args.uint(2)?;

        Self::authorize(ctx, delegator, DELEGATE_MSG, amount)?;
        ctx.debit(delegator, amount)?;
        let shares = self.keeper.delegate(delegator, validator, amount)?;

        ctx.emit(
            "Delegate",
            &[
                DynSolValue::Address(delegator),
                DynSolValue::String(validator.to_string()),
            ],
            &[DynSolValue::Uint(amount, 256), DynSolValue::Uint(shares, 256)],
        )?;
        info!(
            target: "precompiles::staking",
            ?delegator,
            validator,
            %amount,
            %shares,
            "delegated"
        );
        Ok(vec![DynSolValue::Bool(true)])
    }

    fn undelegate(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let delegator = args.address(0)?;
        let validator = args.string(1)?;
        let amount = args.uint(2)?;

        Self::authorize(ctx, delegator, UNDELEGATE_MSG, amount)?;
        let completion = self.keeper.undelegate(delegator, validator, amount)?;

        ctx.emit(
            "Unbond",
            &[
                DynSolValue::Address(delegator),
                DynSolValue::String(validator.to_string()),
            ],
            &[
                DynSolValue::Uint(amount, 256),
                DynSolValue::Uint(U256::from(completion), 256),
            ],
        )?;
        info!(
            target: "precompiles::staking",
            ?delegator,
            validator,
            %amount,
            completion,
            "undelegated"
        );
        Ok(vec![DynSolValue::Int(I256::from_raw(U256::from(completion)), 64)])
    }
}

impl<K: StakingKeeper + 'static> PrecompileModule for StakingPrecompile<K> {
    const NAME: &'static str = "staking";

    fn address(&self) -> Address {
        STAKING_PRECOMPILE_ADDR
    }

    fn catalog() -> Result<AbiCatalog, AbiError> {
        AbiCatalog::from_signatures(INTERFACE.iter().copied())
    }

    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
            .with("approve", Self::approve)
            .with("revoke", Self::revoke)
            .with("increaseAllowance", Self::increase_allowance)
            .with("decreaseAllowance", Self::decrease_allowance)
            .with("allowance", Self::allowance)
            .with("delegate", Self::delegate)
            .with("undelegate", Self::undelegate)
    }

    fn base_gas() -> &'static [(&'static str, u64)] {
        &[
            ("approve", 30_000),
            ("revoke", 30_000),
            ("increaseAllowance", 30_000),
            ("decreaseAllowance", 30_000),
            ("allowance", 3_000),
            ("delegate", 50_000),
            ("undelegate", 50_000),
        ]
    }
}
