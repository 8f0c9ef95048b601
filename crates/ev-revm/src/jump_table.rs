//! Opcode table with start-up extensions.
//!
//! [`VmTable`] describes every opcode the interpreter accepts: its name, constant gas, stack
//! bounds and optional dynamic gas and memory expansion functions. The base table is seeded
//! from revm's opcode metadata and static gas at the latest hardfork. Chain-specific changes
//! are applied once at start-up through named activators (`"<chain>_<number>"`), after which
//! the table is sealed and installed into every EVM the factory builds.
//!
//! Only slots touched through [`VmTable::register_opcode`], [`VmTable::replace_opcode`] or
//! [`VmTable::remove_opcode`] are written into revm's instruction table. Every other slot keeps
//! the hardfork-specific instruction revm selected.

use alloy_primitives::U256;
use reth_revm::revm::{
    bytecode::opcode::{self, OpCodeInfo, OPCODE_INFO},
    handler::instructions::EthInstructions,
    interpreter::{
        host::DummyHost,
        instructions::instruction_table_gas_changes_spec,
        interpreter::EthInterpreter,
        interpreter_types::{Jumps, LegacyBytecode},
        instruction_table, Host, Instruction, InstructionContext,
    },
    primitives::hardfork::SpecId,
};
use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    fmt,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Maximum depth of the EVM stack.
pub const STACK_LIMIT: usize = 1024;

/// Activators whose changes revm already ships in its base instruction set. Extending the table
/// with one of these names is a no-op.
pub const BASE_ACTIVATORS: [&str; 6] = [
    "ethereum_1153",
    "ethereum_3198",
    "ethereum_3855",
    "ethereum_4844",
    "ethereum_5656",
    "ethereum_7516",
];

/// Extra gas charged on top of the constant cost, computed from the stack.
pub type DynamicGasFn = fn(&[U256]) -> u64;

/// Memory size an operation needs, computed from the stack. `None` means no expansion.
pub type MemorySizeFn = fn(&[U256]) -> Option<u64>;

/// Start-up patch applied by an activator.
pub type Activator = fn(&mut VmTable) -> Result<(), JumpTableError>;

/// Errors raised while extending or installing the table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JumpTableError {
    /// The table no longer accepts changes.
    #[error("jump table is sealed")]
    TableSealed,
    /// The opcode slot is already taken.
    #[error("opcode 0x{opcode:02x} already registered as {existing}")]
    OpcodeCollision {
        /// Opcode byte.
        opcode: u8,
        /// Name of the registered operation.
        existing: String,
    },
    /// Another opcode already uses the name.
    #[error("opcode name {name} already used by 0x{opcode:02x}")]
    NameCollision {
        /// Operation name.
        name: String,
        /// Opcode carrying the name.
        opcode: u8,
    },
    /// The opcode slot is empty.
    #[error("opcode 0x{0:02x} is not assigned")]
    UnassignedOpcode(u8),
    /// Activator names have the form `<chain>_<number>`.
    #[error("invalid activator name {0}, expected <chain>_<number>")]
    InvalidActivatorName(String),
    /// Stack bounds that can never be satisfied.
    #[error("invalid stack bounds for {name}: min {min_stack}, max {max_stack}")]
    InvalidStackBounds {
        /// Operation name.
        name: String,
        /// Minimum stack height.
        min_stack: usize,
        /// Maximum stack height.
        max_stack: usize,
    },
    /// The interpreter cannot run the operation registered in the slot.
    #[error("opcode 0x{opcode:02x} ({name}) cannot be installed: {reason}")]
    NotExecutable {
        /// Opcode byte.
        opcode: u8,
        /// Operation name.
        name: String,
        /// What the interpreter lacks.
        reason: &'static str,
    },
}

/// One opcode slot.
#[derive(Clone)]
pub struct Operation {
    /// Mnemonic.
    pub name: Cow<'static, str>,
    /// Gas charged before execution.
    pub constant_gas: u64,
    /// Extra gas depending on the operands.
    pub dynamic_gas: Option<DynamicGasFn>,
    /// Items the operation needs on the stack.
    pub min_stack: usize,
    /// Highest stack height at which the operation does not overflow.
    pub max_stack: usize,
    /// Memory the operation touches.
    pub memory_size: Option<MemorySizeFn>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("constant_gas", &self.constant_gas)
            .field("dynamic_gas", &self.dynamic_gas.is_some())
            .field("min_stack", &self.min_stack)
            .field("max_stack", &self.max_stack)
            .field("memory_size", &self.memory_size.is_some())
            .finish()
    }
}

impl Operation {
    /// Creates an operation popping `inputs` and pushing `outputs` stack items.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        constant_gas: u64,
        inputs: usize,
        outputs: usize,
    ) -> Self {
        Self {
            name: name.into(),
            constant_gas,
            dynamic_gas: None,
            min_stack: inputs,
            max_stack: (STACK_LIMIT + inputs).saturating_sub(outputs),
            memory_size: None,
        }
    }

    /// Sets the dynamic gas function.
    pub const fn with_dynamic_gas(mut self, dynamic_gas: DynamicGasFn) -> Self {
        self.dynamic_gas = Some(dynamic_gas);
        self
    }

    /// Sets the memory size function.
    pub const fn with_memory_size(mut self, memory_size: MemorySizeFn) -> Self {
        self.memory_size = Some(memory_size);
        self
    }

    fn from_info(info: &OpCodeInfo, constant_gas: u64) -> Self {
        Self::new(
            info.name(),
            constant_gas,
            info.inputs() as usize,
            info.outputs() as usize,
        )
    }

    fn validate(&self) -> Result<(), JumpTableError> {
        if self.min_stack > self.max_stack || self.min_stack > STACK_LIMIT {
            return Err(JumpTableError::InvalidStackBounds {
                name: self.name.to_string(),
                min_stack: self.min_stack,
                max_stack: self.max_stack,
            });
        }
        Ok(())
    }

    /// Checks that revm's implementation of `opcode` runs this operation unchanged apart from
    /// its constant gas.
    fn check_native(&self, opcode: u8) -> Result<(), JumpTableError> {
        let fail = |reason| JumpTableError::NotExecutable {
            opcode,
            name: self.name.to_string(),
            reason,
        };
        let info = OPCODE_INFO[opcode as usize]
            .as_ref()
            .ok_or_else(|| fail("no native implementation"))?;
        if self.dynamic_gas.is_some() || self.memory_size.is_some() {
            return Err(fail("custom dynamic gas or memory size"));
        }
        let native = Self::from_info(info, self.constant_gas);
        if native.min_stack != self.min_stack || native.max_stack != self.max_stack {
            return Err(fail("stack bounds differ from the native implementation"));
        }
        Ok(())
    }
}

/// Runs revm's own implementation of the opcode being executed.
///
/// The interpreter advances the program counter before dispatching, so the current opcode sits
/// one byte behind it.
fn run_native<H: Host>(ctx: InstructionContext<'_, H, EthInterpreter>) {
    let bytecode = &ctx.interpreter.bytecode;
    let byte = bytecode
        .pc()
        .checked_sub(1)
        .and_then(|pc| bytecode.bytecode_slice().get(pc).copied())
        .unwrap_or(opcode::STOP);
    instruction_table::<EthInterpreter, H>()[byte as usize].execute(ctx);
}

/// Checks that `name` has the form `<chain>_<number>`.
pub fn validate_activator_name(name: &str) -> Result<(), JumpTableError> {
    let invalid = || JumpTableError::InvalidActivatorName(name.to_string());
    let (chain, number) = name.rsplit_once('_').ok_or_else(invalid)?;
    let chain_ok = !chain.is_empty()
        && chain
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let number_ok = !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    if chain_ok && number_ok {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// The interpreter's opcode table.
#[derive(Clone)]
pub struct VmTable {
    operations: Box<[Option<Operation>; 256]>,
    overridden: BTreeSet<u8>,
    applied: BTreeSet<String>,
    sealed: bool,
}

impl fmt::Debug for VmTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmTable")
            .field("operations", &self.operations.iter().flatten().count())
            .field("overridden", &self.overridden)
            .field("applied", &self.applied)
            .field("sealed", &self.sealed)
            .finish()
    }
}

impl Default for VmTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTable {
    /// Creates the base table from revm's opcode metadata.
    pub fn new() -> Self {
        let native = instruction_table_gas_changes_spec::<EthInterpreter, DummyHost>(
            SpecId::default(),
        );
        let operations = Box::new(std::array::from_fn(|idx| {
            OPCODE_INFO[idx]
                .as_ref()
                .map(|info| Operation::from_info(info, native[idx].static_gas()))
        }));
        Self {
            operations,
            overridden: BTreeSet::new(),
            applied: BASE_ACTIVATORS.iter().map(|name| name.to_string()).collect(),
            sealed: false,
        }
    }

    /// Operation registered for `opcode`.
    pub fn operation(&self, opcode: u8) -> Option<&Operation> {
        self.operations[opcode as usize].as_ref()
    }

    /// Opcode carrying `name`.
    pub fn opcode_by_name(&self, name: &str) -> Option<u8> {
        self.operations
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|op| op.name == name))
            .map(|idx| idx as u8)
    }

    /// Activators applied so far, base activators included, in name order.
    pub fn applied(&self) -> impl Iterator<Item = &str> {
        self.applied.iter().map(String::as_str)
    }

    /// Opcodes changed since the base table was built.
    pub fn overridden(&self) -> impl Iterator<Item = u8> + '_ {
        self.overridden.iter().copied()
    }

    /// Whether the table accepts no further changes.
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Freezes the table.
    pub fn seal(&mut self) {
        if !self.sealed {
            info!(target: "evm::jump_table", applied = ?self.applied, "jump table sealed");
        }
        self.sealed = true;
    }

    fn ensure_unsealed(&self) -> Result<(), JumpTableError> {
        if self.sealed {
            return Err(JumpTableError::TableSealed);
        }
        Ok(())
    }

    /// Adds a new opcode. Fails if the slot or the name is already taken.
    pub fn register_opcode(
        &mut self,
        opcode: u8,
        operation: Operation,
    ) -> Result<(), JumpTableError> {
        self.ensure_unsealed()?;
        operation.validate()?;
        if let Some(existing) = self.operation(opcode) {
            warn!(
                target: "evm::jump_table",
                opcode,
                existing = %existing.name,
                "opcode collision"
            );
            return Err(JumpTableError::OpcodeCollision {
                opcode,
                existing: existing.name.to_string(),
            });
        }
        if let Some(other) = self.opcode_by_name(&operation.name) {
            warn!(
                target: "evm::jump_table",
                opcode = other,
                name = %operation.name,
                "opcode name collision"
            );
            return Err(JumpTableError::NameCollision {
                name: operation.name.to_string(),
                opcode: other,
            });
        }
        debug!(target: "evm::jump_table", opcode, name = %operation.name, "opcode registered");
        self.operations[opcode as usize] = Some(operation);
        self.overridden.insert(opcode);
        Ok(())
    }

    /// Replaces the operation of an existing opcode and returns the previous one.
    pub fn replace_opcode(
        &mut self,
        opcode: u8,
        operation: Operation,
    ) -> Result<Operation, JumpTableError> {
        self.ensure_unsealed()?;
        operation.validate()?;
        match &mut self.operations[opcode as usize] {
            Some(existing) => {
                debug!(target: "evm::jump_table", opcode, name = %operation.name, "opcode replaced");
                let previous = std::mem::replace(existing, operation);
                self.overridden.insert(opcode);
                Ok(previous)
            }
            None => Err(JumpTableError::UnassignedOpcode(opcode)),
        }
    }

    /// Clears the slot of `opcode`. The interpreter halts with an unknown-opcode error when it
    /// reaches a cleared slot.
    pub fn remove_opcode(&mut self, opcode: u8) -> Result<Operation, JumpTableError> {
        self.ensure_unsealed()?;
        let previous = self.operations[opcode as usize]
            .take()
            .ok_or(JumpTableError::UnassignedOpcode(opcode))?;
        debug!(target: "evm::jump_table", opcode, name = %previous.name, "opcode removed");
        self.overridden.insert(opcode);
        Ok(previous)
    }

    /// Applies `activators` in ascending name order. Names already applied, including the
    /// [`BASE_ACTIVATORS`], are skipped. All names are validated before any activator runs.
    ///
    /// Either every pending activator applies or the table is left as it was before the call.
    /// Returns the names applied by this call.
    pub fn extend(
        &mut self,
        activators: &BTreeMap<String, Activator>,
    ) -> Result<Vec<String>, JumpTableError> {
        self.ensure_unsealed()?;
        for name in activators.keys() {
            validate_activator_name(name)?;
        }

        let snapshot = self.clone();
        let mut applied = Vec::new();
        for (name, activator) in activators {
            if self.applied.contains(name) {
                debug!(target: "evm::jump_table", activator = %name, "already applied, skipping");
                continue;
            }
            if let Err(error) = activator(self) {
                warn!(target: "evm::jump_table", activator = %name, %error, "activator failed");
                *self = snapshot;
                return Err(error);
            }
            self.applied.insert(name.clone());
            info!(target: "evm::jump_table", activator = %name, "activator applied");
            applied.push(name.clone());
        }
        Ok(applied)
    }

    /// Checks that every changed slot can be written into revm's instruction table.
    ///
    /// A changed slot is either empty or holds an operation revm implements natively with the
    /// same stack bounds. Only its constant gas may differ.
    pub fn check_executable(&self) -> Result<(), JumpTableError> {
        for &opcode in &self.overridden {
            if let Some(operation) = self.operation(opcode) {
                operation.check_native(opcode)?;
            }
        }
        Ok(())
    }

    /// Writes the changed slots into `instructions`.
    pub fn install<H: Host>(&self, instructions: &mut EthInstructions<EthInterpreter, H>) {
        for &opcode in &self.overridden {
            let instruction = match self.operation(opcode) {
                Some(operation) => Instruction::new(run_native::<H>, operation.constant_gas),
                None => Instruction::unknown(),
            };
            instructions.insert_instruction(opcode, instruction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUSTOM: u8 = 0xd0;

    fn add_custom(table: &mut VmTable) -> Result<(), JumpTableError> {
        table.register_opcode(CUSTOM, Operation::new("CUSTOM", 7, 1, 1))
    }

    fn raise_add(table: &mut VmTable) -> Result<(), JumpTableError> {
        let mut add = table
            .operation(opcode::ADD)
            .cloned()
            .ok_or(JumpTableError::UnassignedOpcode(opcode::ADD))?;
        add.constant_gas += 1;
        table.replace_opcode(opcode::ADD, add)?;
        Ok(())
    }

    fn activators(entries: &[(&str, Activator)]) -> BTreeMap<String, Activator> {
        entries
            .iter()
            .map(|(name, activator)| (name.to_string(), *activator))
            .collect()
    }

    #[test]
    fn base_table_follows_revm_metadata() {
        let table = VmTable::new();
        let add = table.operation(opcode::ADD).unwrap();
        assert_eq!(add.name, "ADD");
        assert_eq!(add.constant_gas, 3);
        assert_eq!(add.min_stack, 2);
        assert_eq!(add.max_stack, STACK_LIMIT + 1);

        let push1 = table.operation(opcode::PUSH1).unwrap();
        assert_eq!(push1.min_stack, 0);
        assert_eq!(push1.max_stack, STACK_LIMIT - 1);

        assert!(table.operation(CUSTOM).is_none());
        assert_eq!(table.opcode_by_name("JUMPDEST"), Some(opcode::JUMPDEST));
    }

    #[test]
    fn extend_is_sorted_and_idempotent() {
        let mut table = VmTable::new();
        let patches = activators(&[("evmos_2", raise_add), ("evmos_1", add_custom)]);

        let applied = table.extend(&patches).unwrap();
        assert_eq!(applied, vec!["evmos_1".to_string(), "evmos_2".to_string()]);
        assert_eq!(table.operation(opcode::ADD).unwrap().constant_gas, 4);

        let applied = table.extend(&patches).unwrap();
        assert!(applied.is_empty());
        assert_eq!(table.operation(opcode::ADD).unwrap().constant_gas, 4);
        let chain: Vec<_> = table.applied().filter(|name| name.starts_with("evmos_")).collect();
        assert_eq!(chain, vec!["evmos_1", "evmos_2"]);
        assert_eq!(table.applied().count(), BASE_ACTIVATORS.len() + 2);
    }

    #[test]
    fn base_activators_are_never_overwritten() {
        fn drop_push0(table: &mut VmTable) -> Result<(), JumpTableError> {
            table.remove_opcode(opcode::PUSH0).map(drop)
        }

        let mut table = VmTable::new();
        assert!(table.applied().any(|name| name == "ethereum_3855"));

        let applied = table
            .extend(&activators(&[("ethereum_3855", drop_push0), ("evmos_1", add_custom)]))
            .unwrap();
        assert_eq!(applied, vec!["evmos_1".to_string()]);
        assert_eq!(table.operation(opcode::PUSH0).unwrap().name, "PUSH0");
        assert_eq!(table.overridden().collect::<Vec<_>>(), vec![CUSTOM]);
    }

    #[test]
    fn failed_activator_restores_table() {
        fn clash_with_add(table: &mut VmTable) -> Result<(), JumpTableError> {
            table.register_opcode(opcode::ADD, Operation::new("ADD2", 3, 2, 1))
        }

        let mut table = VmTable::new();
        let patches = activators(&[
            ("evmos_1", raise_add),
            ("evmos_2", add_custom),
            ("evmos_3", clash_with_add),
        ]);
        assert_eq!(
            table.extend(&patches),
            Err(JumpTableError::OpcodeCollision {
                opcode: opcode::ADD,
                existing: "ADD".to_string()
            })
        );

        assert_eq!(table.operation(opcode::ADD).unwrap().constant_gas, 3);
        assert!(table.operation(CUSTOM).is_none());
        assert_eq!(table.overridden().count(), 0);
        assert!(!table.applied().any(|name| name.starts_with("evmos_")));

        // the same table still accepts a clean extension afterwards
        let applied = table.extend(&activators(&[("evmos_1", raise_add)])).unwrap();
        assert_eq!(applied, vec!["evmos_1".to_string()]);
    }

    #[test]
    fn install_overlays_only_changed_slots() {
        let mut table = VmTable::new();
        raise_add(&mut table).unwrap();
        table.remove_opcode(opcode::MCOPY).unwrap();
        table.check_executable().unwrap();

        let mut instructions =
            EthInstructions::<EthInterpreter, DummyHost>::new_mainnet_with_spec(SpecId::CANCUN);
        let sload = instructions.instruction_table[opcode::SLOAD as usize].static_gas();
        table.install(&mut instructions);

        let installed = &instructions.instruction_table;
        assert_eq!(installed[opcode::ADD as usize].static_gas(), 4);
        assert_eq!(installed[opcode::MCOPY as usize].static_gas(), 0);
        assert_eq!(installed[opcode::MUL as usize].static_gas(), 5);
        assert_eq!(installed[opcode::SLOAD as usize].static_gas(), sload);
    }

    #[test]
    fn operations_without_native_code_are_not_executable() {
        let mut table = VmTable::new();
        add_custom(&mut table).unwrap();
        assert_eq!(
            table.check_executable(),
            Err(JumpTableError::NotExecutable {
                opcode: CUSTOM,
                name: "CUSTOM".to_string(),
                reason: "no native implementation",
            })
        );

        let mut table = VmTable::new();
        let mut add = table.operation(opcode::ADD).cloned().unwrap();
        add.min_stack = 3;
        table.replace_opcode(opcode::ADD, add).unwrap();
        assert!(matches!(
            table.check_executable(),
            Err(JumpTableError::NotExecutable { opcode: opcode::ADD, .. })
        ));
    }

    #[test]
    fn invalid_names_apply_nothing() {
        let mut table = VmTable::new();
        let patches = activators(&[("evmos_1", add_custom), ("Evmos-one", raise_add)]);
        assert_eq!(
            table.extend(&patches),
            Err(JumpTableError::InvalidActivatorName("Evmos-one".to_string()))
        );
        assert!(table.operation(CUSTOM).is_none());

        assert!(validate_activator_name("evmos_3855").is_ok());
        assert!(validate_activator_name("evmos_").is_err());
        assert!(validate_activator_name("_1").is_err());
        assert!(validate_activator_name("evmos").is_err());
    }

    #[test]
    fn registration_collisions_fail() {
        let mut table = VmTable::new();
        assert_eq!(
            table.register_opcode(opcode::ADD, Operation::new("ADD2", 3, 2, 1)),
            Err(JumpTableError::OpcodeCollision {
                opcode: opcode::ADD,
                existing: "ADD".to_string()
            })
        );
        assert_eq!(
            table.register_opcode(CUSTOM, Operation::new("MUL", 5, 2, 1)),
            Err(JumpTableError::NameCollision {
                name: "MUL".to_string(),
                opcode: opcode::MUL
            })
        );
        assert!(matches!(
            table.register_opcode(CUSTOM, Operation::new("DEEP", 1, STACK_LIMIT + 1, 0)),
            Err(JumpTableError::InvalidStackBounds { .. })
        ));
    }

    #[test]
    fn sealed_table_rejects_changes() {
        let mut table = VmTable::new();
        table.seal();
        assert!(table.is_sealed());
        assert_eq!(
            table.register_opcode(CUSTOM, Operation::new("CUSTOM", 1, 0, 0)),
            Err(JumpTableError::TableSealed)
        );
        assert_eq!(
            table.extend(&activators(&[("evmos_1", add_custom)])),
            Err(JumpTableError::TableSealed)
        );
    }

    #[test]
    fn dynamic_parts_are_kept() {
        fn words(stack: &[U256]) -> u64 {
            stack.first().map_or(0, |len| len.saturating_to::<u64>().div_ceil(32) * 3)
        }
        fn offset(stack: &[U256]) -> Option<u64> {
            stack.first().map(|off| off.saturating_to::<u64>() + 32)
        }

        let mut table = VmTable::new();
        let op = Operation::new("CUSTOM", 2, 1, 0)
            .with_dynamic_gas(words)
            .with_memory_size(offset);
        table.register_opcode(CUSTOM, op).unwrap();

        let registered = table.operation(CUSTOM).unwrap();
        let dynamic_gas = registered.dynamic_gas.unwrap();
        assert_eq!(dynamic_gas(&[U256::from(64u64)]), 6);
        let memory_size = registered.memory_size.unwrap();
        assert_eq!(memory_size(&[U256::from(0u64)]), Some(32));
    }
}
