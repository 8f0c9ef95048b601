//! Precompile dispatcher.
//!
//! Every precompile is a [`PrecompileModule`] wrapped in a [`Dispatcher`]. The dispatcher owns
//! the module's [`AbiCatalog`] and a handler table keyed by selector, and runs each call through
//! the same lifecycle:
//!
//! 1. resolve the method from the 4-byte selector and reject writes in read-only contexts,
//! 2. decode the arguments,
//! 3. snapshot the journal, branch the grant store and open a gas metering scope,
//! 4. run the handler with panics contained at the scope boundary,
//! 5. commit the journal and the grant branch on success, or revert both on failure.
//!
//! A call ends in exactly one of `Rejected`, `Committed` or `RolledBack`.

use alloy::dyn_abi::DynSolValue;
use alloy_primitives::{hex, Address, Bytes, Selector, U256};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::{
    abi::{AbiCatalog, AbiError, MethodDescriptor},
    authorization::{
        AuthorizationEvent, AuthorizationEventSink, AuthorizationLedger, CacheGrantStore,
        GrantStore, LedgerParams,
    },
    config::{ConfigError, PrecompileConfig},
    error::{CallFailure, DispatchError},
    events::{self, EventError},
    gas::{HostGasMeter, MeteringScope},
    journal::{BalanceOp, JournalEntry, JournalError, SnapshotId, StateJournal},
};

/// Handler for one interface method.
pub type Handler<M> =
    fn(&M, &mut HandlerContext<'_>, Args<'_>) -> Result<Vec<DynSolValue>, DispatchError>;

/// Method name to handler mapping supplied by a module.
#[derive(Debug)]
pub struct HandlerTable<M> {
    entries: Vec<(&'static str, Handler<M>)>,
}

impl<M> Default for HandlerTable<M> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<M> HandlerTable<M> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the method called `name`.
    pub fn with(mut self, name: &'static str, handler: Handler<M>) -> Self {
        self.entries.push((name, handler));
        self
    }
}

/// A chain module exposed as a precompile.
pub trait PrecompileModule: Send + Sync + Sized + 'static {
    /// Identifier used for the revm precompile id and in logs.
    const NAME: &'static str;

    /// Address the precompile is installed at.
    fn address(&self) -> Address;

    /// Loads the module interface.
    fn catalog() -> Result<AbiCatalog, AbiError>;

    /// Handlers by method name. Every interface method needs exactly one.
    fn handlers() -> HandlerTable<Self>;

    /// Default base gas per method name.
    fn base_gas() -> &'static [(&'static str, u64)] {
        &[]
    }
}

/// Environment of one precompile call.
pub struct CallContext<'a> {
    /// Immediate caller.
    pub caller: Address,
    /// Transaction origin.
    pub origin: Address,
    /// Value sent with the call.
    pub value: U256,
    /// Gas left to the call.
    pub gas: u64,
    /// Height of the executing block.
    pub block_number: u64,
    /// Unix time (seconds) of the executing block.
    pub block_time: u64,
    /// Sink for EVM-visible effects.
    pub journal: &'a mut dyn StateJournal,
    /// Shared grant store.
    pub grants: &'a mut dyn GrantStore,
    /// Host chain gas meter.
    pub meter: &'a mut dyn HostGasMeter,
}

impl<'a> CallContext<'a> {
    /// Creates a context at block zero where the caller is also the origin.
    pub fn new(
        caller: Address,
        gas: u64,
        journal: &'a mut dyn StateJournal,
        grants: &'a mut dyn GrantStore,
        meter: &'a mut dyn HostGasMeter,
    ) -> Self {
        Self {
            caller,
            origin: caller,
            value: U256::ZERO,
            gas,
            block_number: 0,
            block_time: 0,
            journal,
            grants,
            meter,
        }
    }

    /// Sets the block height and time.
    pub const fn with_block(mut self, number: u64, time: u64) -> Self {
        self.block_number = number;
        self.block_time = time;
        self
    }

    /// Sets the transaction origin.
    pub const fn with_origin(mut self, origin: Address) -> Self {
        self.origin = origin;
        self
    }

    /// Sets the call value.
    pub const fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

impl std::fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("caller", &self.caller)
            .field("origin", &self.origin)
            .field("value", &self.value)
            .field("gas", &self.gas)
            .field("block_number", &self.block_number)
            .field("block_time", &self.block_time)
            .finish_non_exhaustive()
    }
}

/// Result of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutput {
    /// ABI-encoded return values.
    pub bytes: Bytes,
    /// Gas consumed by the handler.
    pub gas_used: u64,
}

/// Typed access to decoded call arguments.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a>(&'a [DynSolValue]);

impl<'a> Args<'a> {
    /// Wraps decoded values.
    pub const fn new(values: &'a [DynSolValue]) -> Self {
        Self(values)
    }

    /// All values.
    pub const fn values(&self) -> &'a [DynSolValue] {
        self.0
    }

    fn get(&self, idx: usize) -> Result<&'a DynSolValue, DispatchError> {
        self.0
            .get(idx)
            .ok_or_else(|| DispatchError::MalformedInput(format!("missing argument {idx}")))
    }

    fn mismatch(idx: usize, expected: &str) -> DispatchError {
        DispatchError::MalformedInput(format!("argument {idx} is not {expected}"))
    }

    /// `address` argument.
    pub fn address(&self, idx: usize) -> Result<Address, DispatchError> {
        self.get(idx)?
            .as_address()
            .ok_or_else(|| Self::mismatch(idx, "an address"))
    }

    /// `uintN` argument.
    pub fn uint(&self, idx: usize) -> Result<U256, DispatchError> {
        self.get(idx)?
            .as_uint()
            .map(|(value, _)| value)
            .ok_or_else(|| Self::mismatch(idx, "an unsigned integer"))
    }

    /// `uintN` argument that must fit in 64 bits.
    pub fn u64(&self, idx: usize) -> Result<u64, DispatchError> {
        let value = self.uint(idx)?;
        u64::try_from(value).map_err(|_| Self::mismatch(idx, "a 64-bit integer"))
    }

    /// `string` argument.
    pub fn string(&self, idx: usize) -> Result<&'a str, DispatchError> {
        self.get(idx)?
            .as_str()
            .ok_or_else(|| Self::mismatch(idx, "a string"))
    }

    /// `string[]` argument.
    pub fn strings(&self, idx: usize) -> Result<Vec<String>, DispatchError> {
        self.array(idx)?
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Self::mismatch(idx, "a string array"))
    }

    /// Dynamic array argument.
    pub fn array(&self, idx: usize) -> Result<&'a [DynSolValue], DispatchError> {
        self.get(idx)?
            .as_array()
            .ok_or_else(|| Self::mismatch(idx, "an array"))
    }
}

struct EventEmitter<'a> {
    catalog: &'a AbiCatalog,
    address: Address,
    block_number: u64,
    journal: &'a mut dyn StateJournal,
}

impl EventEmitter<'_> {
    fn emit(
        &mut self,
        name: &str,
        indexed: &[DynSolValue],
        data: &[DynSolValue],
    ) -> Result<(), DispatchError> {
        let event = self
            .catalog
            .event_by_name(name)
            .ok_or_else(|| EventError::UnknownEvent(name.to_string()))?;
        let log = events::encode(event, self.address, self.block_number, indexed, data)?;
        self.journal.add_entry(JournalEntry::Log(log));
        Ok(())
    }
}

impl AuthorizationEventSink for EventEmitter<'_> {
    fn authorization_event(&mut self, event: AuthorizationEvent) -> Result<(), DispatchError> {
        let (name, indexed, data) = event.log_args();
        self.emit(name, &indexed, &data)
    }
}

/// What a handler sees of the call.
pub struct HandlerContext<'a> {
    /// Immediate caller.
    pub caller: Address,
    /// Transaction origin.
    pub origin: Address,
    /// Value sent with the call.
    pub value: U256,
    /// Address of the running precompile.
    pub address: Address,
    /// Height of the executing block.
    pub block_number: u64,
    /// Unix time (seconds) of the executing block.
    pub block_time: u64,
    grants: &'a mut dyn GrantStore,
    meter: &'a mut dyn HostGasMeter,
    emitter: EventEmitter<'a>,
    ledger_params: LedgerParams,
}

impl std::fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("caller", &self.caller)
            .field("address", &self.address)
            .field("block_number", &self.block_number)
            .finish_non_exhaustive()
    }
}

impl HandlerContext<'_> {
    /// Authorization ledger over the call's grant branch. Mutations emit their events.
    pub fn ledger(&mut self) -> AuthorizationLedger<'_> {
        AuthorizationLedger::new(
            &mut *self.grants,
            &mut *self.meter,
            &mut self.emitter,
            self.ledger_params,
        )
    }

    /// Emits an event declared by the precompile interface.
    pub fn emit(
        &mut self,
        name: &str,
        indexed: &[DynSolValue],
        data: &[DynSolValue],
    ) -> Result<(), DispatchError> {
        self.emitter.emit(name, indexed, data)
    }

    /// Records a native balance credit.
    pub fn credit(&mut self, account: Address, amount: U256) {
        self.emitter.journal.add_entry(JournalEntry::BalanceChange {
            account,
            amount,
            op: BalanceOp::Add,
        });
    }

    /// Records a native balance debit. Fails right away when `account` cannot cover `amount`
    /// after the changes already recorded in this call.
    pub fn debit(&mut self, account: Address, amount: U256) -> Result<(), DispatchError> {
        let balance = self.emitter.journal.available_balance(account)?;
        if balance < amount {
            return Err(JournalError::InsufficientBalance {
                account,
                balance,
                amount,
            }
            .into());
        }
        self.emitter.journal.add_entry(JournalEntry::BalanceChange {
            account,
            amount,
            op: BalanceOp::Sub,
        });
        Ok(())
    }

    /// Charges host gas.
    pub fn consume_gas(&mut self, amount: u64, descriptor: &str) -> Result<(), DispatchError> {
        self.meter.consume(amount, descriptor)?;
        Ok(())
    }

    /// Host gas meter of the call.
    pub fn gas_meter(&mut self) -> &mut dyn HostGasMeter {
        &mut *self.meter
    }
}

/// Runs calls against one [`PrecompileModule`].
pub struct Dispatcher<M> {
    module: M,
    catalog: AbiCatalog,
    handlers: HashMap<Selector, Handler<M>>,
    base_gas: HashMap<String, u64>,
    config: PrecompileConfig,
}

impl<M> std::fmt::Debug for Dispatcher<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.handlers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<M: PrecompileModule> Dispatcher<M> {
    /// Loads the module interface and builds the handler table.
    pub fn new(module: M, config: PrecompileConfig) -> Result<Self, ConfigError> {
        let catalog = M::catalog()?;

        let mut handlers = HashMap::new();
        for (name, handler) in M::handlers().entries {
            let method = catalog
                .method_by_name(name)
                .ok_or_else(|| ConfigError::UnknownHandler {
                    name: name.to_string(),
                })?;
            handlers.insert(method.selector(), handler);
        }
        if let Some(method) = catalog
            .methods()
            .find(|method| !handlers.contains_key(&method.selector()))
        {
            return Err(ConfigError::MissingHandler {
                method: method.name().to_string(),
            });
        }

        let mut base_gas: HashMap<String, u64> = M::base_gas()
            .iter()
            .map(|(name, gas)| (name.to_string(), *gas))
            .collect();
        base_gas.extend(config.base_gas.clone());

        Ok(Self {
            module,
            catalog,
            handlers,
            base_gas,
            config,
        })
    }

    /// The wrapped module.
    pub const fn module(&self) -> &M {
        &self.module
    }

    /// Address of the precompile.
    pub fn address(&self) -> Address {
        self.module.address()
    }

    /// Interface of the precompile.
    pub const fn catalog(&self) -> &AbiCatalog {
        &self.catalog
    }

    /// Shared configuration.
    pub const fn config(&self) -> &PrecompileConfig {
        &self.config
    }

    /// Gas charged before the handler runs: the method's base cost plus the per-byte storage
    /// cost of its arguments. Unknown or truncated input costs nothing.
    pub fn required_gas(&self, input: &[u8]) -> u64 {
        let Some(method) = input
            .get(..4)
            .and_then(|selector| self.catalog.method_by_id(selector))
        else {
            return 0;
        };
        let base = self.base_gas.get(method.name()).copied().unwrap_or_default();
        let per_byte = if method.is_transaction() {
            self.config.kv_gas.write_cost_per_byte
        } else {
            self.config.kv_gas.read_cost_per_byte
        };
        let arg_len = (input.len() - 4) as u64;
        base.saturating_add(per_byte.saturating_mul(arg_len))
    }

    /// Executes one call.
    pub fn run(
        &self,
        ctx: CallContext<'_>,
        input: &[u8],
        read_only: bool,
    ) -> Result<CallOutput, CallFailure> {
        let CallContext {
            caller,
            origin,
            value,
            gas,
            block_number,
            block_time,
            journal,
            grants,
            meter,
        } = ctx;

        let (method, handler, args) = self
            .resolve(input, read_only)
            .map_err(|error| {
                warn!(
                    target: "precompiles::dispatcher",
                    precompile = M::NAME,
                    ?caller,
                    %error,
                    "call rejected"
                );
                CallFailure::free(error)
            })?;
        debug!(
            target: "precompiles::dispatcher",
            precompile = M::NAME,
            method = method.name(),
            ?caller,
            gas,
            "method resolved"
        );

        let snapshot = journal.snapshot();
        let scope = MeteringScope::open(&*meter);
        let mut branch = CacheGrantStore::new(&*grants);
        let outcome = {
            let mut handler_ctx = HandlerContext {
                caller,
                origin,
                value,
                address: self.module.address(),
                block_number,
                block_time,
                grants: &mut branch,
                meter: &mut *meter,
                emitter: EventEmitter {
                    catalog: &self.catalog,
                    address: self.module.address(),
                    block_number,
                    journal: &mut *journal,
                },
                ledger_params: LedgerParams {
                    block_time,
                    approval_expiration: self.config.approval_expiration,
                    kv_gas: self.config.kv_gas,
                },
            };
            scope.run(|| handler(&self.module, &mut handler_ctx, Args::new(&args)))
        };
        let consumed = scope.consumed(&*meter);

        let values = match outcome.map_err(DispatchError::from).and_then(|result| result) {
            Ok(values) => values,
            Err(error) => {
                return Err(Self::roll_back(
                    journal,
                    snapshot,
                    method,
                    error,
                    consumed.min(gas),
                ))
            }
        };
        if consumed > gas {
            return Err(Self::roll_back(
                journal,
                snapshot,
                method,
                DispatchError::OutOfGas,
                gas,
            ));
        }
        let bytes = match method.encode_output(values) {
            Ok(bytes) => bytes,
            Err(error) => {
                return Err(Self::roll_back(journal, snapshot, method, error.into(), consumed))
            }
        };
        if let Err(error) = journal.commit() {
            return Err(Self::roll_back(journal, snapshot, method, error.into(), consumed));
        }

        let changes = branch.into_changeset();
        let grant_writes = changes.len();
        if let Err(error) = changes.write(grants) {
            return Err(Self::roll_back(journal, snapshot, method, error.into(), consumed));
        }

        debug!(
            target: "precompiles::dispatcher",
            precompile = M::NAME,
            method = method.name(),
            gas_used = consumed,
            grant_writes,
            "call committed"
        );
        Ok(CallOutput {
            bytes: bytes.into(),
            gas_used: consumed,
        })
    }

    fn resolve(
        &self,
        input: &[u8],
        read_only: bool,
    ) -> Result<(&MethodDescriptor, Handler<M>, Vec<DynSolValue>), DispatchError> {
        let Some(selector) = input.get(..4) else {
            return Err(DispatchError::MalformedInput(format!(
                "input too short: {} bytes",
                input.len()
            )));
        };
        let unknown = || DispatchError::UnknownMethod(hex::encode_prefixed(selector));
        let method = self.catalog.method_by_id(selector).ok_or_else(unknown)?;
        let handler = *self
            .handlers
            .get(&method.selector())
            .ok_or_else(unknown)?;
        if read_only && method.is_transaction() {
            return Err(DispatchError::ReadOnlyViolation {
                method: method.name().to_string(),
            });
        }
        let args = method
            .decode_input(&input[4..])
            .map_err(|err| DispatchError::MalformedInput(err.to_string()))?;
        Ok((method, handler, args))
    }

    fn roll_back(
        journal: &mut dyn StateJournal,
        snapshot: SnapshotId,
        method: &MethodDescriptor,
        error: DispatchError,
        gas_used: u64,
    ) -> CallFailure {
        journal.revert(snapshot);
        debug!(
            target: "precompiles::dispatcher",
            precompile = M::NAME,
            method = method.name(),
            %error,
            gas_used,
            "call rolled back"
        );
        CallFailure { error, gas_used }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authorization::{GrantKey, Limit, MemoryGrantStore},
        gas::{BasicGasMeter, OutOfGasPanic},
        journal::MemoryJournal,
    };
    use alloy::{
        sol,
        sol_types::{SolCall, SolValue},
    };
    use alloy_primitives::address;

    sol! {
        interface IVault {
            function deposit(address account, uint256 amount) external returns (bool);
            function approve(address grantee, uint256 amount) external returns (bool);
            function approveThenFail(address grantee, uint256 amount) external returns (bool);
            function burn(uint256 gas) external returns (bool);
            function explode() external;
            function allowance(address grantee, address granter) external view returns (uint256);
        }
    }

    const VAULT: Address = address!("0x0000000000000000000000000000000000000900");
    const ALICE: Address = address!("0x00000000000000000000000000000000000000a1");
    const BOB: Address = address!("0x00000000000000000000000000000000000000b1");
    const KIND: &str = "/vault.MsgWithdraw";

    struct Vault;

    impl Vault {
        fn deposit(
            &self,
            ctx: &mut HandlerContext<'_>,
            args: Args<'_>,
        ) -> Result<Vec<DynSolValue>, DispatchError> {
            let account = args.address(0)?;
            let amount = args.uint(1)?;
            ctx.credit(account, amount);
            ctx.emit(
                "Deposit",
                &[DynSolValue::Address(account)],
                &[DynSolValue::Uint(amount, 256)],
            )?;
            Ok(vec![DynSolValue::Bool(true)])
        }

        fn approve(
            &self,
            ctx: &mut HandlerContext<'_>,
            args: Args<'_>,
        ) -> Result<Vec<DynSolValue>, DispatchError> {
            let key = GrantKey::new(args.address(0)?, ctx.caller, KIND);
            ctx.ledger().approve(key, Limit::Simple(args.uint(1)?))?;
            Ok(vec![DynSolValue::Bool(true)])
        }

        fn approve_then_fail(
            &self,
            ctx: &mut HandlerContext<'_>,
            args: Args<'_>,
        ) -> Result<Vec<DynSolValue>, DispatchError> {
            self.approve(ctx, args)?;
            ctx.credit(ctx.caller, U256::from(1u64));
            Err(DispatchError::handler("keeper rejected the message"))
        }

        fn burn(
            &self,
            ctx: &mut HandlerContext<'_>,
            args: Args<'_>,
        ) -> Result<Vec<DynSolValue>, DispatchError> {
            ctx.credit(ctx.caller, U256::from(1u64));
            ctx.consume_gas(args.u64(0)?, "burn")?;
            Ok(vec![DynSolValue::Bool(true)])
        }

        fn explode(
            &self,
            _ctx: &mut HandlerContext<'_>,
            _args: Args<'_>,
        ) -> Result<Vec<DynSolValue>, DispatchError> {
            std::panic::panic_any(OutOfGasPanic {
                descriptor: "keeper".to_string(),
            })
        }

        fn allowance(
            &self,
            ctx: &mut HandlerContext<'_>,
            args: Args<'_>,
        ) -> Result<Vec<DynSolValue>, DispatchError> {
            let key = GrantKey::new(args.address(0)?, args.address(1)?, KIND);
            let value = ctx.ledger().allowance(&key)?;
            Ok(vec![DynSolValue::Uint(value, 256)])
        }
    }

    impl PrecompileModule for Vault {
        const NAME: &'static str = "vault";

        fn address(&self) -> Address {
            VAULT
        }

        fn catalog() -> Result<AbiCatalog, AbiError> {
            AbiCatalog::from_signatures([
                "function deposit(address account, uint256 amount) returns (bool)",
                "function approve(address grantee, uint256 amount) returns (bool)",
                "function approveThenFail(address grantee, uint256 amount) returns (bool)",
                "function burn(uint256 gas) returns (bool)",
                "function explode()",
                "function allowance(address grantee, address granter) view returns (uint256)",
                "event Deposit(address indexed account, uint256 amount)",
                "event Approval(address indexed grantee, address indexed granter, string[] methods, uint256 value)",
            ])
        }

        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new()
                .with("deposit", Self::deposit)
                .with("approve", Self::approve)
                .with("approveThenFail", Self::approve_then_fail)
                .with("burn", Self::burn)
                .with("explode", Self::explode)
                .with("allowance", Self::allowance)
        }

        fn base_gas() -> &'static [(&'static str, u64)] {
            &[("deposit", 10_000), ("allowance", 2_000)]
        }
    }

    struct Env {
        journal: MemoryJournal,
        grants: MemoryGrantStore,
        meter: BasicGasMeter,
    }

    impl Env {
        fn new() -> Self {
            Self {
                journal: MemoryJournal::new(),
                grants: MemoryGrantStore::new(),
                meter: BasicGasMeter::new(u64::MAX),
            }
        }

        fn call(
            &mut self,
            dispatcher: &Dispatcher<Vault>,
            caller: Address,
            gas: u64,
            input: &[u8],
            read_only: bool,
        ) -> Result<CallOutput, CallFailure> {
            let ctx = CallContext::new(
                caller,
                gas,
                &mut self.journal,
                &mut self.grants,
                &mut self.meter,
            )
            .with_block(7, 1_000);
            dispatcher.run(ctx, input, read_only)
        }
    }

    fn dispatcher() -> Dispatcher<Vault> {
        Dispatcher::new(Vault, PrecompileConfig::default()).unwrap()
    }

    #[test]
    fn successful_call_commits_effects() {
        let dispatcher = dispatcher();
        let mut env = Env::new();
        let input = IVault::depositCall {
            account: BOB,
            amount: U256::from(5u64),
        }
        .abi_encode();

        let output = env.call(&dispatcher, ALICE, 1_000_000, &input, false).unwrap();
        assert_eq!(output.bytes.as_ref(), true.abi_encode().as_slice());
        assert_eq!(env.journal.balance(BOB), U256::from(5u64));
        assert_eq!(env.journal.logs().len(), 1);
        assert_eq!(env.journal.logs()[0].block_number, 7);
        assert_eq!(env.journal.logs()[0].log.address, VAULT);
    }

    #[test]
    fn rejects_short_and_unknown_input() {
        let dispatcher = dispatcher();
        let mut env = Env::new();

        let err = env.call(&dispatcher, ALICE, 1_000, &[0x01, 0x02], false).unwrap_err();
        assert!(matches!(err.error, DispatchError::MalformedInput(_)));
        assert_eq!(err.gas_used, 0);

        let err = env
            .call(&dispatcher, ALICE, 1_000, &[0xde, 0xad, 0xbe, 0xef], false)
            .unwrap_err();
        assert_eq!(err.error, DispatchError::UnknownMethod("0xdeadbeef".to_string()));

        let mut input = IVault::depositCall {
            account: BOB,
            amount: U256::from(5u64),
        }
        .abi_encode();
        input.truncate(20);
        let err = env.call(&dispatcher, ALICE, 1_000, &input, false).unwrap_err();
        assert!(matches!(err.error, DispatchError::MalformedInput(_)));
    }

    #[test]
    fn read_only_context_rejects_transactions() {
        let dispatcher = dispatcher();
        let mut env = Env::new();
        let input = IVault::approveCall {
            grantee: BOB,
            amount: U256::from(5u64),
        }
        .abi_encode();

        let err = env.call(&dispatcher, ALICE, 1_000_000, &input, true).unwrap_err();
        assert_eq!(
            err.error,
            DispatchError::ReadOnlyViolation {
                method: "approve".to_string()
            }
        );
        assert_eq!(env.meter.consumed(), 0, "handler never ran");
        assert!(env.grants.is_empty());

        let query = IVault::allowanceCall {
            grantee: BOB,
            granter: ALICE,
        }
        .abi_encode();
        assert!(env.call(&dispatcher, ALICE, 1_000_000, &query, true).is_ok());
    }

    #[test]
    fn failing_handler_reverts_everything() {
        let dispatcher = dispatcher();
        let mut env = Env::new();
        let input = IVault::approveThenFailCall {
            grantee: BOB,
            amount: U256::from(5u64),
        }
        .abi_encode();

        let err = env.call(&dispatcher, ALICE, 1_000_000, &input, false).unwrap_err();
        assert_eq!(err.revert_reason(), "keeper rejected the message");
        assert!(err.gas_used > 0, "gas consumed before the failure is charged");
        assert!(env.grants.is_empty(), "grant branch discarded");
        assert!(env.journal.pending().is_empty(), "journal reverted");
        assert!(env.journal.logs().is_empty());
        assert_eq!(env.journal.balance(ALICE), U256::ZERO);
    }

    #[test]
    fn approval_is_committed_and_queryable() {
        let dispatcher = dispatcher();
        let mut env = Env::new();
        let input = IVault::approveCall {
            grantee: BOB,
            amount: U256::from(5u64),
        }
        .abi_encode();
        env.call(&dispatcher, ALICE, 1_000_000, &input, false).unwrap();
        assert_eq!(env.journal.logs().len(), 1, "approval event emitted");

        let query = IVault::allowanceCall {
            grantee: BOB,
            granter: ALICE,
        }
        .abi_encode();
        let output = env.call(&dispatcher, ALICE, 1_000_000, &query, true).unwrap();
        let value = IVault::allowanceCall::abi_decode_returns(&output.bytes).unwrap();
        assert_eq!(value, U256::from(5u64));
    }

    #[test]
    fn overconsumption_is_out_of_gas() {
        let dispatcher = dispatcher();
        let mut env = Env::new();
        let input = IVault::burnCall {
            gas: U256::from(5_000u64),
        }
        .abi_encode();

        let err = env.call(&dispatcher, ALICE, 4_000, &input, false).unwrap_err();
        assert_eq!(err.error, DispatchError::OutOfGas);
        assert_eq!(err.gas_used, 4_000);
        assert!(env.journal.pending().is_empty());
        assert_eq!(env.journal.balance(ALICE), U256::ZERO);

        let output = env.call(&dispatcher, ALICE, 5_000, &input, false).unwrap();
        assert_eq!(output.gas_used, 5_000);
        assert_eq!(env.journal.balance(ALICE), U256::from(1u64));
    }

    #[test]
    fn handler_panic_is_contained() {
        let dispatcher = dispatcher();
        let mut env = Env::new();
        let input = IVault::explodeCall {}.abi_encode();

        let err = env.call(&dispatcher, ALICE, 1_000, &input, false).unwrap_err();
        assert_eq!(err.error, DispatchError::OutOfGas);
        assert!(err.error.is_out_of_gas());
    }

    #[test]
    fn required_gas_combines_base_and_bytes() {
        let dispatcher = Dispatcher::new(
            Vault,
            PrecompileConfig::default().with_base_gas("allowance", 3_000),
        )
        .unwrap();
        let deposit = IVault::depositCall {
            account: BOB,
            amount: U256::from(5u64),
        }
        .abi_encode();
        assert_eq!(dispatcher.required_gas(&deposit), 10_000 + 30 * 64);

        let query = IVault::allowanceCall {
            grantee: BOB,
            granter: ALICE,
        }
        .abi_encode();
        assert_eq!(dispatcher.required_gas(&query), 3_000 + 3 * 64);

        assert_eq!(dispatcher.required_gas(&[0x01]), 0);
        assert_eq!(dispatcher.required_gas(&[0xde, 0xad, 0xbe, 0xef, 0x00]), 0);
    }

    struct Incomplete;

    impl PrecompileModule for Incomplete {
        const NAME: &'static str = "incomplete";

        fn address(&self) -> Address {
            VAULT
        }

        fn catalog() -> Result<AbiCatalog, AbiError> {
            AbiCatalog::from_signatures(["function ping()", "function pong()"])
        }

        fn handlers() -> HandlerTable<Self> {
            fn noop(
                _: &Incomplete,
                _: &mut HandlerContext<'_>,
                _: Args<'_>,
            ) -> Result<Vec<DynSolValue>, DispatchError> {
                Ok(Vec::new())
            }
            HandlerTable::new().with("ping", noop)
        }
    }

    #[test]
    fn construction_requires_complete_handler_table() {
        let err = Dispatcher::new(Incomplete, PrecompileConfig::default()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingHandler {
                method: "pong".to_string()
            }
        );
    }
}
