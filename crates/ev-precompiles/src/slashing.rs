//! Slashing precompile: lets a jailed validator unjail itself and exposes signing info.

use alloy::dyn_abi::DynSolValue;
use alloy_primitives::{address, Address, I256};
use tracing::info;

use crate::{
    abi::{AbiCatalog, AbiError},
    dispatcher::{Args, HandlerContext, HandlerTable, PrecompileModule},
    error::{DispatchError, KeeperError},
};

/// Address of the slashing precompile.
pub const SLASHING_PRECOMPILE_ADDR: Address =
    address!("0x0000000000000000000000000000000000000806");

const INTERFACE: &[&str] = &[
    "function unjail(address validatorAddress) returns (bool success)",
    "function getSigningInfo(address consAddress) view returns ((address validatorAddress, int64 startHeight, int64 indexOffset, int64 jailedUntil, bool tombstoned, int64 missedBlocksCounter) signingInfo)",
    "event ValidatorUnjailed(address indexed validator)",
];

/// Liveness record of a validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SigningInfo {
    /// Consensus address of the validator.
    pub validator_address: Address,
    /// Height at which the validator started signing.
    pub start_height: i64,
    /// Offset into the signed blocks window.
    pub index_offset: i64,
    /// Unix time until which the validator is jailed.
    pub jailed_until: i64,
    /// Whether the validator is permanently removed.
    pub tombstoned: bool,
    /// Missed blocks in the current window.
    pub missed_blocks_counter: i64,
}

impl SigningInfo {
    fn to_sol_value(self) -> DynSolValue {
        let int = |value: i64| DynSolValue::Int(I256::try_from(value).unwrap_or_default(), 64);
        DynSolValue::Tuple(vec![
            DynSolValue::Address(self.validator_address),
            int(self.start_height),
            int(self.index_offset),
            int(self.jailed_until),
            DynSolValue::Bool(self.tombstoned),
            int(self.missed_blocks_counter),
        ])
    }
}

/// Slashing module operations used by the precompile.
pub trait SlashingKeeper: Send + Sync {
    /// Releases `validator` from jail.
    fn unjail(&self, validator: Address) -> Result<(), KeeperError>;

    /// Signing info of the validator with consensus address `cons_address`.
    fn signing_info(&self, cons_address: Address) -> Result<SigningInfo, KeeperError>;
}

/// Slashing precompile over a [`SlashingKeeper`].
#[derive(Debug, Clone)]
pub struct SlashingPrecompile<K> {
    keeper: K,
}

impl<K: SlashingKeeper + 'static> SlashingPrecompile<K> {
    /// Creates the precompile.
    pub const fn new(keeper: K) -> Self {
        Self { keeper }
    }

    fn unjail(
        &self,
        ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let validator = args.address(0)?;
        if validator != ctx.caller {
            return Err(DispatchError::handler(format!(
                "caller {} is not the validator {validator}",
                ctx.caller
            )));
        }
        self.keeper.unjail(validator)?;
        ctx.emit("ValidatorUnjailed", &[DynSolValue::Address(validator)], &[])?;
        info!(target: "precompiles::slashing", ?validator, "validator unjailed");
        Ok(vec![DynSolValue::Bool(true)])
    }

    fn get_signing_info(
        &self,
        _ctx: &mut HandlerContext<'_>,
        args: Args<'_>,
    ) -> Result<Vec<DynSolValue>, DispatchError> {
        let cons_address = args.address(0)?;
        if cons_address.is_zero() {
            return Err(DispatchError::MalformedInput(
                "invalid consensus address".to_string(),
            ));
        }
        let signing_info = self.keeper.signing_info(cons_address)?;
        Ok(vec![signing_info.to_sol_value()])
    }
}

impl<K: SlashingKeeper + 'static> PrecompileModule for SlashingPrecompile<K> {
    const NAME: &'static str = "slashing";

    fn address(&self) -> Address {
        SLASHING_PRECOMPILE_ADDR
    }

    fn catalog() -> Result<AbiCatalog, AbiError> {
        AbiCatalog::from_signatures(INTERFACE.iter().copied())
    }

    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
            .with("unjail", Self::unjail)
            .with("getSigningInfo", Self::get_signing_info)
    }

    fn base_gas() -> &'static [(&'static str, u64)] {
        &[("unjail", 40_000), ("getSigningInfo", 3_000)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authorization::MemoryGrantStore,
        config::PrecompileConfig,
        dispatcher::{CallContext, CallOutput, Dispatcher},
        error::CallFailure,
        gas::BasicGasMeter,
        journal::MemoryJournal,
    };
    use alloy::{sol, sol_types::SolCall};
    use parking_lot::Mutex;

    sol! {
        struct SolSigningInfo {
            address validatorAddress;
            int64 startHeight;
            int64 indexOffset;
            int64 jailedUntil;
            bool tombstoned;
            int64 missedBlocksCounter;
        }

        interface ISlashing {
            function unjail(address validatorAddress) external returns (bool success);
            function getSigningInfo(address consAddress) external view returns (SolSigningInfo signingInfo);
        }
    }

    const VALIDATOR: Address = address!("0x00000000000000000000000000000000000000c1");
    const OTHER: Address = address!("0x00000000000000000000000000000000000000c2");

    #[derive(Default)]
    struct MockKeeper {
        jailed: Mutex<Vec<Address>>,
    }

    impl SlashingKeeper for MockKeeper {
        fn unjail(&self, validator: Address) -> Result<(), KeeperError> {
            let mut jailed = self.jailed.lock();
            let idx = jailed
                .iter()
                .position(|addr| *addr == validator)
                .ok_or_else(|| KeeperError::new("validator not jailed"))?;
            jailed.remove(idx);
            Ok(())
        }

        fn signing_info(&self, cons_address: Address) -> Result<SigningInfo, KeeperError> {
            Ok(SigningInfo {
                validator_address: cons_address,
                start_height: 1,
                index_offset: 2,
                jailed_until: 0,
                tombstoned: false,
                missed_blocks_counter: 1,
            })
        }
    }

    fn run(
        dispatcher: &Dispatcher<SlashingPrecompile<MockKeeper>>,
        journal: &mut MemoryJournal,
        caller: Address,
        input: &[u8],
        read_only: bool,
    ) -> Result<CallOutput, CallFailure> {
        let mut grants = MemoryGrantStore::new();
        let mut meter = BasicGasMeter::new(u64::MAX);
        let ctx = CallContext::new(caller, 1_000_000, journal, &mut grants, &mut meter);
        dispatcher.run(ctx, input, read_only)
    }

    #[test]
    fn validator_unjails_itself() {
        let keeper = MockKeeper::default();
        keeper.jailed.lock().push(VALIDATOR);
        let dispatcher =
            Dispatcher::new(SlashingPrecompile::new(keeper), PrecompileConfig::default()).unwrap();
        let mut journal = MemoryJournal::new();
        let input = ISlashing::unjailCall {
            validatorAddress: VALIDATOR,
        }
        .abi_encode();

        let err = run(&dispatcher, &mut journal, OTHER, &input, false).unwrap_err();
        assert!(err.revert_reason().contains("is not the validator"));

        run(&dispatcher, &mut journal, VALIDATOR, &input, false).unwrap();
        assert_eq!(journal.logs().len(), 1);
        assert_eq!(journal.logs()[0].log.topics()[1], VALIDATOR.into_word());

        let err = run(&dispatcher, &mut journal, VALIDATOR, &input, false).unwrap_err();
        assert_eq!(err.revert_reason(), "validator not jailed");
        assert_eq!(journal.logs().len(), 1);
    }

    #[test]
    fn signing_info_query() {
        let dispatcher = Dispatcher::new(
            SlashingPrecompile::new(MockKeeper::default()),
            PrecompileConfig::default(),
        )
        .unwrap();
        let mut journal = MemoryJournal::new();

        let input = ISlashing::getSigningInfoCall {
            consAddress: VALIDATOR,
        }
        .abi_encode();
        let output = run(&dispatcher, &mut journal, OTHER, &input, true).unwrap();
        let info = ISlashing::getSigningInfoCall::abi_decode_returns(&output.bytes).unwrap();
        assert_eq!(info.validatorAddress, VALIDATOR);
        assert_eq!(info.startHeight, 1);
        assert_eq!(info.indexOffset, 2);
        assert_eq!(info.missedBlocksCounter, 1);
        assert!(!info.tombstoned);

        let input = ISlashing::getSigningInfoCall {
            consAddress: Address::ZERO,
        }
        .abi_encode();
        let err = run(&dispatcher, &mut journal, OTHER, &input, true).unwrap_err();
        assert_eq!(err.revert_reason(), "malformed input: invalid consensus address");
    }
}
