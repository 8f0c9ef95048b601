//! Helpers for wrapping Reth EVM factories with the stateful precompile set and the chain's
//! opcode table.

use crate::{
    jump_table::{JumpTableError, VmTable},
    registry::PrecompileRegistry,
};
use alloy_evm::{
    eth::{EthBlockExecutorFactory, EthEvm, EthEvmContext, EthEvmFactory},
    precompiles::PrecompilesMap,
    Database, Evm, EvmEnv, EvmFactory,
};
use reth_evm_ethereum::EthEvmConfig;
use reth_revm::{
    inspector::NoOpInspector,
    revm::{
        context::{
            result::{EVMError, HaltReason},
            BlockEnv, TxEnv,
        },
        context_interface::result::InvalidTransaction,
        primitives::hardfork::SpecId,
        Inspector,
    },
};
use std::sync::Arc;
use tracing::{info, trace};

/// Wrapper around an existing `EvmFactory` that installs the registered precompiles, and the
/// opcode table when one is configured, into every EVM it creates.
#[derive(Debug, Clone)]
pub struct EvEvmFactory<F> {
    inner: F,
    registry: Arc<PrecompileRegistry>,
    jump_table: Option<Arc<VmTable>>,
}

impl<F> EvEvmFactory<F> {
    /// Creates a new factory wrapper around `inner`.
    pub const fn new(inner: F, registry: Arc<PrecompileRegistry>) -> Self {
        Self {
            inner,
            registry,
            jump_table: None,
        }
    }

    /// Installs `table` into every EVM built from now on.
    ///
    /// The table is checked against the interpreter and sealed here, so no EVM ever runs with a
    /// table that can still change.
    pub fn with_jump_table(mut self, mut table: VmTable) -> Result<Self, JumpTableError> {
        table.check_executable()?;
        table.seal();
        info!(
            target: "evm::jump_table",
            overridden = ?table.overridden().collect::<Vec<_>>(),
            "jump table attached to evm factory"
        );
        self.jump_table = Some(Arc::new(table));
        Ok(self)
    }

    /// The precompile registry.
    pub const fn registry(&self) -> &Arc<PrecompileRegistry> {
        &self.registry
    }

    /// The sealed opcode table, if any.
    pub const fn jump_table(&self) -> Option<&Arc<VmTable>> {
        self.jump_table.as_ref()
    }

    fn install_precompiles(&self, precompiles: &mut PrecompilesMap) {
        self.registry.install(precompiles);
        trace!(
            target: "evm::precompiles",
            installed = self.registry.active().len(),
            "stateful precompiles installed"
        );
    }

    fn install_jump_table<DB: Database, I>(
        &self,
        evm: EthEvm<DB, I, PrecompilesMap>,
        inspect: bool,
    ) -> EthEvm<DB, I, PrecompilesMap> {
        let Some(table) = &self.jump_table else {
            return evm;
        };
        let mut inner = evm.into_inner();
        table.install(&mut inner.instruction);
        EthEvm::new(inner, inspect)
    }
}

impl EvmFactory for EvEvmFactory<EthEvmFactory> {
    type Evm<DB: Database, I: Inspector<Self::Context<DB>>> = EthEvm<DB, I, PrecompilesMap>;
    type Context<DB: Database> = EthEvmContext<DB>;
    type Tx = TxEnv;
    type Error<DBError: std::error::Error + Send + Sync + 'static> =
        EVMError<DBError, InvalidTransaction>;
    type HaltReason = HaltReason;
    type Spec = SpecId;
    type BlockEnv = BlockEnv;
    type Precompiles = PrecompilesMap;

    fn create_evm<DB: Database>(
        &self,
        db: DB,
        evm_env: EvmEnv<Self::Spec, Self::BlockEnv>,
    ) -> Self::Evm<DB, NoOpInspector> {
        let mut evm = self.inner.create_evm(db, evm_env);
        self.install_precompiles(evm.precompiles_mut());
        self.install_jump_table(evm, false)
    }

    fn create_evm_with_inspector<DB: Database, I: Inspector<Self::Context<DB>>>(
        &self,
        db: DB,
        input: EvmEnv<Self::Spec, Self::BlockEnv>,
        inspector: I,
    ) -> Self::Evm<DB, I> {
        let mut evm = self.inner.create_evm_with_inspector(db, input, inspector);
        self.install_precompiles(evm.precompiles_mut());
        self.install_jump_table(evm, true)
    }
}

/// Wraps an [`EthEvmConfig`] so that its EVMs carry the registered precompiles.
pub fn with_precompiles<ChainSpec>(
    config: EthEvmConfig<ChainSpec, EthEvmFactory>,
    registry: Arc<PrecompileRegistry>,
) -> EthEvmConfig<ChainSpec, EvEvmFactory<EthEvmFactory>> {
    let factory = EvEvmFactory::new(*config.executor_factory.evm_factory(), registry);
    with_factory(config, factory)
}

/// Wraps an [`EthEvmConfig`] so that its EVMs carry the registered precompiles and run with
/// `table` as their opcode table.
pub fn with_precompiles_and_jump_table<ChainSpec>(
    config: EthEvmConfig<ChainSpec, EthEvmFactory>,
    registry: Arc<PrecompileRegistry>,
    table: VmTable,
) -> Result<EthEvmConfig<ChainSpec, EvEvmFactory<EthEvmFactory>>, JumpTableError> {
    let factory = EvEvmFactory::new(*config.executor_factory.evm_factory(), registry)
        .with_jump_table(table)?;
    Ok(with_factory(config, factory))
}

fn with_factory<ChainSpec>(
    config: EthEvmConfig<ChainSpec, EthEvmFactory>,
    wrapped_factory: EvEvmFactory<EthEvmFactory>,
) -> EthEvmConfig<ChainSpec, EvEvmFactory<EthEvmFactory>> {
    let EthEvmConfig {
        executor_factory,
        block_assembler,
    } = config;
    let new_executor_factory = EthBlockExecutorFactory::new(
        *executor_factory.receipt_builder(),
        executor_factory.spec().clone(),
        wrapped_factory,
    );

    EthEvmConfig {
        executor_factory: new_executor_factory,
        block_assembler,
    }
}
