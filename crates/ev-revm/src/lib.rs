//! Stateful precompile and opcode table extensions for `revm`.

pub mod factory;
pub mod jump_table;
pub mod registry;

pub use factory::{with_precompiles, with_precompiles_and_jump_table, EvEvmFactory};
pub use jump_table::{JumpTableError, Operation, VmTable, BASE_ACTIVATORS};
pub use registry::{PrecompileRegistry, RegistryError};
