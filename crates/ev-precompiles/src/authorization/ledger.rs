use alloy::dyn_abi::DynSolValue;
use alloy_primitives::U256;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    store::GrantStore,
    types::{Allocation, Coin, Grant, GrantKey, Limit},
};
use crate::{
    error::DispatchError,
    gas::{HostGasMeter, KvGasConfig},
};

/// Externally observable change to a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationEvent {
    /// A grant was created or overwritten.
    Approval {
        /// Grant key.
        key: GrantKey,
        /// Limit after the change.
        limit: Limit,
    },
    /// An existing grant's limit changed.
    AllowanceChange {
        /// Grant key.
        key: GrantKey,
        /// Limit after the change.
        limit: Limit,
    },
    /// A grant was removed.
    Revocation {
        /// Grant key.
        key: GrantKey,
    },
}

impl AuthorizationEvent {
    /// Log arguments for the event declared by the precompile interface: the event name, the
    /// indexed `(grantee, granter)` pair and the data values.
    ///
    /// Simple limits map to `Approval(grantee, granter, string[] methods, uint256 value)`,
    /// `AllowanceChange(grantee, granter, string[] methods, uint256[] values)` and
    /// `Revocation(grantee, granter, string[] methods)`. Allocation limits map to
    /// `IBCTransferAuthorization(grantee, granter, Allocation[] allocations)`.
    pub fn log_args(&self) -> (&'static str, Vec<DynSolValue>, Vec<DynSolValue>) {
        let (key, limit) = match self {
            Self::Approval { key, limit } | Self::AllowanceChange { key, limit } => {
                (key, Some(limit))
            }
            Self::Revocation { key } => (key, None),
        };
        let indexed = vec![
            DynSolValue::Address(key.grantee),
            DynSolValue::Address(key.granter),
        ];
        let kinds = DynSolValue::Array(vec![DynSolValue::String(key.kind.clone())]);

        match (self, limit) {
            (_, Some(Limit::Allocations(allocations))) => (
                "IBCTransferAuthorization",
                indexed,
                vec![DynSolValue::Array(
                    allocations.iter().map(Allocation::to_sol_value).collect(),
                )],
            ),
            (Self::Approval { .. }, Some(Limit::Simple(value))) => (
                "Approval",
                indexed,
                vec![kinds, DynSolValue::Uint(*value, 256)],
            ),
            (_, Some(Limit::Simple(value))) => (
                "AllowanceChange",
                indexed,
                vec![kinds, DynSolValue::Array(vec![DynSolValue::Uint(*value, 256)])],
            ),
            (_, None) => ("Revocation", indexed, vec![kinds]),
        }
    }
}

/// Receives authorization events as the ledger produces them.
pub trait AuthorizationEventSink {
    /// Records `event`.
    fn authorization_event(&mut self, event: AuthorizationEvent) -> Result<(), DispatchError>;
}

impl AuthorizationEventSink for Vec<AuthorizationEvent> {
    fn authorization_event(&mut self, event: AuthorizationEvent) -> Result<(), DispatchError> {
        self.push(event);
        Ok(())
    }
}

/// Block-level parameters of ledger operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerParams {
    /// Unix time (seconds) of the executing block.
    pub block_time: u64,
    /// Lifetime of new grants; `None` creates grants that never expire.
    pub approval_expiration: Option<Duration>,
    /// Storage access costs.
    pub kv_gas: KvGasConfig,
}

/// Grant bookkeeping on top of a [`GrantStore`].
///
/// Every store access is charged on the host gas meter and every mutation reports an
/// [`AuthorizationEvent`] to the sink.
pub struct AuthorizationLedger<'a> {
    store: &'a mut dyn GrantStore,
    meter: &'a mut dyn HostGasMeter,
    events: &'a mut dyn AuthorizationEventSink,
    params: LedgerParams,
}

impl std::fmt::Debug for AuthorizationLedger<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationLedger")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<'a> AuthorizationLedger<'a> {
    /// Creates a ledger over `store`.
    pub fn new(
        store: &'a mut dyn GrantStore,
        meter: &'a mut dyn HostGasMeter,
        events: &'a mut dyn AuthorizationEventSink,
        params: LedgerParams,
    ) -> Self {
        Self {
            store,
            meter,
            events,
            params,
        }
    }

    /// Returns the live grant for `key`.
    pub fn exists(&mut self, key: &GrantKey) -> Result<Grant, DispatchError> {
        self.load(key)?.ok_or_else(|| not_found(key))
    }

    /// Remaining simple allowance for `key`, zero when no live grant exists.
    pub fn allowance(&mut self, key: &GrantKey) -> Result<U256, DispatchError> {
        match self.load(key)? {
            None => Ok(U256::ZERO),
            Some(Grant {
                limit: Limit::Simple(value),
                ..
            }) => Ok(value),
            Some(_) => Err(DispatchError::UnknownAuthorizationType { expected: "simple" }),
        }
    }

    /// Creates or overwrites the grant for `key`.
    ///
    /// A simple limit of zero removes any existing grant instead of storing it.
    pub fn approve(&mut self, key: GrantKey, limit: Limit) -> Result<(), DispatchError> {
        if matches!(limit, Limit::Simple(value) if value.is_zero()) {
            if self.load(&key)?.is_some() {
                self.delete(&key)?;
            }
        } else {
            let grant = Grant {
                limit: limit.clone(),
                expiration: self.new_expiration(),
            };
            self.store(key.clone(), grant)?;
        }
        info!(
            target: "precompiles::authorization",
            grantee = ?key.grantee,
            granter = ?key.granter,
            kind = %key.kind,
            limit = limit.variant(),
            "grant approved"
        );
        self.events
            .authorization_event(AuthorizationEvent::Approval { key, limit })
    }

    /// Adds `delta` to the simple allowance of `key`, creating the grant if needed.
    pub fn increase_allowance(&mut self, key: GrantKey, delta: U256) -> Result<U256, DispatchError> {
        self.apply_delta(key, delta, true)
    }

    /// Subtracts `delta` from the simple allowance of `key`.
    pub fn decrease_allowance(&mut self, key: GrantKey, delta: U256) -> Result<U256, DispatchError> {
        self.apply_delta(key, delta, false)
    }

    fn apply_delta(
        &mut self,
        key: GrantKey,
        delta: U256,
        increase: bool,
    ) -> Result<U256, DispatchError> {
        let Some(grant) = self.load(&key)? else {
            if !increase || delta.is_zero() {
                return Err(DispatchError::NonPositiveApproval);
            }
            let grant = Grant {
                limit: Limit::Simple(delta),
                expiration: self.new_expiration(),
            };
            self.store(key.clone(), grant)?;
            return self.allowance_changed(key, delta);
        };

        let Limit::Simple(current) = grant.limit else {
            return Err(DispatchError::UnknownAuthorizationType { expected: "simple" });
        };
        let updated = if increase {
            current
                .checked_add(delta)
                .ok_or(DispatchError::IntegerOverflow)?
        } else {
            current
                .checked_sub(delta)
                .ok_or(DispatchError::NegativeAmount {
                    requested: delta,
                    remaining: current,
                })?
        };

        if updated.is_zero() {
            self.delete(&key)?;
        } else {
            let grant = Grant {
                limit: Limit::Simple(updated),
                expiration: self.new_expiration(),
            };
            self.store(key.clone(), grant)?;
        }
        self.allowance_changed(key, updated)
    }

    fn allowance_changed(&mut self, key: GrantKey, value: U256) -> Result<U256, DispatchError> {
        debug!(
            target: "precompiles::authorization",
            grantee = ?key.grantee,
            granter = ?key.granter,
            kind = %key.kind,
            %value,
            "allowance changed"
        );
        self.events
            .authorization_event(AuthorizationEvent::AllowanceChange {
                key,
                limit: Limit::Simple(value),
            })?;
        Ok(value)
    }

    /// Removes the grant for `key`.
    pub fn revoke(&mut self, key: GrantKey) -> Result<(), DispatchError> {
        if self.load(&key)?.is_none() {
            warn!(
                target: "precompiles::authorization",
                grantee = ?key.grantee,
                granter = ?key.granter,
                kind = %key.kind,
                "revoking missing grant"
            );
            return Err(not_found(&key));
        }
        self.delete(&key)?;
        info!(
            target: "precompiles::authorization",
            grantee = ?key.grantee,
            granter = ?key.granter,
            kind = %key.kind,
            "grant revoked"
        );
        self.events
            .authorization_event(AuthorizationEvent::Revocation { key })
    }

    /// Adds `amount` of `denom` to the allocation for `port`/`channel`.
    pub fn increase_allocation(
        &mut self,
        key: GrantKey,
        port: &str,
        channel: &str,
        denom: &str,
        amount: U256,
    ) -> Result<Vec<Allocation>, DispatchError> {
        self.update_allocation(key, port, channel, denom, |coins, idx| {
            coins[idx].amount = coins[idx]
                .amount
                .checked_add(amount)
                .ok_or(DispatchError::IntegerOverflow)?;
            Ok(())
        })
    }

    /// Subtracts `amount` of `denom` from the allocation for `port`/`channel`.
    ///
    /// A denomination that reaches zero is removed; the allocation itself is kept even when
    /// it has no denominations left.
    pub fn decrease_allocation(
        &mut self,
        key: GrantKey,
        port: &str,
        channel: &str,
        denom: &str,
        amount: U256,
    ) -> Result<Vec<Allocation>, DispatchError> {
        self.update_allocation(key, port, channel, denom, |coins, idx| {
            let remaining = coins[idx].amount;
            let updated = remaining
                .checked_sub(amount)
                .ok_or(DispatchError::NegativeAmount {
                    requested: amount,
                    remaining,
                })?;
            if updated.is_zero() {
                coins.remove(idx);
            } else {
                coins[idx].amount = updated;
            }
            Ok(())
        })
    }

    fn update_allocation<F>(
        &mut self,
        key: GrantKey,
        port: &str,
        channel: &str,
        denom: &str,
        update: F,
    ) -> Result<Vec<Allocation>, DispatchError>
    where
        F: FnOnce(&mut Vec<Coin>, usize) -> Result<(), DispatchError>,
    {
        let grant = self.exists(&key)?;
        let Limit::Allocations(mut allocations) = grant.limit else {
            return Err(DispatchError::UnknownAuthorizationType {
                expected: "allocation",
            });
        };
        let no_match = || DispatchError::NoMatchingAllocation {
            port: port.to_string(),
            channel: channel.to_string(),
            denom: denom.to_string(),
        };
        let allocation = allocations
            .iter_mut()
            .find(|allocation| allocation.matches(port, channel))
            .ok_or_else(no_match)?;
        let idx = allocation
            .spend_limit
            .iter()
            .position(|coin| coin.denom == denom)
            .ok_or_else(no_match)?;
        update(&mut allocation.spend_limit, idx)?;

        let grant = Grant {
            limit: Limit::Allocations(allocations.clone()),
            expiration: grant.expiration,
        };
        self.store(key.clone(), grant)?;
        debug!(
            target: "precompiles::authorization",
            grantee = ?key.grantee,
            granter = ?key.granter,
            port,
            channel,
            denom,
            "allocation changed"
        );
        self.events
            .authorization_event(AuthorizationEvent::AllowanceChange {
                key,
                limit: Limit::Allocations(allocations.clone()),
            })?;
        Ok(allocations)
    }

    /// Consumes `amount` from the simple allowance of `key`.
    ///
    /// An unlimited (`U256::MAX`) allowance is not decremented. A grant that is used up
    /// exactly is removed.
    pub fn spend(&mut self, key: &GrantKey, amount: U256) -> Result<(), DispatchError> {
        let grant = self.exists(key)?;
        let Limit::Simple(remaining) = grant.limit else {
            return Err(DispatchError::UnknownAuthorizationType { expected: "simple" });
        };
        if remaining == U256::MAX {
            return Ok(());
        }
        let updated = remaining
            .checked_sub(amount)
            .ok_or(DispatchError::ExceededAllowance {
                requested: amount,
                remaining,
            })?;
        if updated.is_zero() {
            self.delete(key)?;
        } else {
            let grant = Grant {
                limit: Limit::Simple(updated),
                expiration: grant.expiration,
            };
            self.store(key.clone(), grant)?;
        }
        debug!(
            target: "precompiles::authorization",
            grantee = ?key.grantee,
            granter = ?key.granter,
            kind = %key.kind,
            %amount,
            "grant spent"
        );
        Ok(())
    }

    /// Consumes `amount` of `denom` from the allocation for `port`/`channel`.
    ///
    /// Empty allocations authorize nothing. When every allocation of the grant is used up the
    /// grant is removed.
    pub fn spend_allocation(
        &mut self,
        key: &GrantKey,
        port: &str,
        channel: &str,
        denom: &str,
        amount: U256,
        receiver: &str,
    ) -> Result<(), DispatchError> {
        let grant = self.exists(key)?;
        let Limit::Allocations(mut allocations) = grant.limit else {
            return Err(DispatchError::UnknownAuthorizationType {
                expected: "allocation",
            });
        };
        let no_match = || DispatchError::NoMatchingAllocation {
            port: port.to_string(),
            channel: channel.to_string(),
            denom: denom.to_string(),
        };
        let allocation = allocations
            .iter_mut()
            .find(|allocation| allocation.matches(port, channel))
            .ok_or_else(no_match)?;
        if !allocation.allow_list.is_empty()
            && !allocation.allow_list.iter().any(|allowed| allowed == receiver)
        {
            warn!(
                target: "precompiles::authorization",
                grantee = ?key.grantee,
                receiver,
                "receiver rejected by allow list"
            );
            return Err(DispatchError::ReceiverNotAllowed {
                receiver: receiver.to_string(),
            });
        }
        let idx = allocation
            .spend_limit
            .iter()
            .position(|coin| coin.denom == denom)
            .ok_or_else(no_match)?;

        let remaining = allocation.spend_limit[idx].amount;
        if remaining != U256::MAX {
            let updated = remaining
                .checked_sub(amount)
                .ok_or(DispatchError::ExceededAllowance {
                    requested: amount,
                    remaining,
                })?;
            if updated.is_zero() {
                allocation.spend_limit.remove(idx);
            } else {
                allocation.spend_limit[idx].amount = updated;
            }
        }

        if allocations
            .iter()
            .all(|allocation| allocation.spend_limit.is_empty())
        {
            self.delete(key)?;
        } else {
            let grant = Grant {
                limit: Limit::Allocations(allocations),
                expiration: grant.expiration,
            };
            self.store(key.clone(), grant)?;
        }
        debug!(
            target: "precompiles::authorization",
            grantee = ?key.grantee,
            granter = ?key.granter,
            port,
            channel,
            denom,
            %amount,
            "allocation spent"
        );
        Ok(())
    }

    fn new_expiration(&self) -> Option<u64> {
        self.params
            .approval_expiration
            .map(|lifetime| self.params.block_time.saturating_add(lifetime.as_secs()))
    }

    fn load(&mut self, key: &GrantKey) -> Result<Option<Grant>, DispatchError> {
        let grant = self.store.get(key)?;
        let len = grant.as_ref().map_or(0, Grant::encoded_len);
        self.meter
            .consume(self.params.kv_gas.read_cost(len), "grant read")?;
        Ok(grant.filter(|grant| !grant.is_expired(self.params.block_time)))
    }

    fn store(&mut self, key: GrantKey, grant: Grant) -> Result<(), DispatchError> {
        self.meter.consume(
            self.params.kv_gas.write_cost(grant.encoded_len()),
            "grant write",
        )?;
        self.store.set(key, grant)?;
        Ok(())
    }

    fn delete(&mut self, key: &GrantKey) -> Result<(), DispatchError> {
        self.meter
            .consume(self.params.kv_gas.delete_cost, "grant delete")?;
        self.store.delete(key)?;
        Ok(())
    }
}

fn not_found(key: &GrantKey) -> DispatchError {
    DispatchError::AuthorizationNotFoundOrExpired {
        grantee: key.grantee,
        granter: key.granter,
        kind: key.kind.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{authorization::store::MemoryGrantStore, gas::BasicGasMeter};
    use alloy_primitives::address;

    const GRANTEE: Address = address!("0x00000000000000000000000000000000000000b1");
    const GRANTER: Address = address!("0x00000000000000000000000000000000000000a1");
    const DELEGATE: &str = "/cosmos.staking.v1beta1.MsgDelegate";
    const TRANSFER: &str = "/ibc.applications.transfer.v1.MsgTransfer";
    const YEAR: u64 = 365 * 24 * 60 * 60;

    struct Fixture {
        store: MemoryGrantStore,
        meter: BasicGasMeter,
        events: Vec<AuthorizationEvent>,
        block_time: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemoryGrantStore::new(),
                meter: BasicGasMeter::new(u64::MAX),
                events: Vec::new(),
                block_time: 1_000,
            }
        }

        fn ledger(&mut self) -> AuthorizationLedger<'_> {
            AuthorizationLedger::new(
                &mut self.store,
                &mut self.meter,
                &mut self.events,
                LedgerParams {
                    block_time: self.block_time,
                    approval_expiration: Some(Duration::from_secs(YEAR)),
                    kv_gas: KvGasConfig::default(),
                },
            )
        }
    }

    fn key() -> GrantKey {
        GrantKey::new(GRANTEE, GRANTER, DELEGATE)
    }

    fn transfer_key() -> GrantKey {
        GrantKey::new(GRANTEE, GRANTER, TRANSFER)
    }

    fn simple(value: u64) -> Limit {
        Limit::Simple(U256::from(value))
    }

    fn channel_allocation(amount: u64) -> Allocation {
        Allocation::new(
            "transfer",
            "channel-0",
            vec![Coin::new("aevmos", U256::from(amount))],
        )
    }

    #[test]
    fn approve_sets_expiration_and_emits() {
        let mut fx = Fixture::new();
        fx.ledger().approve(key(), simple(100)).unwrap();

        let grant = fx.ledger().exists(&key()).unwrap();
        assert_eq!(grant.limit, simple(100));
        assert_eq!(grant.expiration, Some(1_000 + YEAR));
        assert_eq!(
            fx.events,
            vec![AuthorizationEvent::Approval {
                key: key(),
                limit: simple(100)
            }]
        );
        assert!(fx.meter.consumed() > 0, "store access is metered");
    }

    #[test]
    fn approve_overwrites_and_zero_deletes() {
        let mut fx = Fixture::new();
        fx.ledger().approve(key(), simple(100)).unwrap();
        fx.ledger().approve(key(), simple(100)).unwrap();
        assert_eq!(fx.store.len(), 1, "re-approve leaves a single grant");

        fx.ledger().approve(key(), Limit::Simple(U256::MAX)).unwrap();
        assert_eq!(fx.ledger().allowance(&key()).unwrap(), U256::MAX);

        fx.ledger().approve(key(), simple(0)).unwrap();
        assert!(fx.store.is_empty(), "zero is never stored");
    }

    #[test]
    fn decrease_to_zero_deletes() {
        let mut fx = Fixture::new();
        fx.ledger().approve(key(), simple(100)).unwrap();

        let value = fx.ledger().decrease_allowance(key(), U256::from(100u64)).unwrap();
        assert_eq!(value, U256::ZERO);
        assert!(matches!(
            fx.ledger().exists(&key()),
            Err(DispatchError::AuthorizationNotFoundOrExpired { .. })
        ));
    }

    #[test]
    fn decrease_below_zero_leaves_grant() {
        let mut fx = Fixture::new();
        fx.ledger().approve(key(), simple(50)).unwrap();

        let err = fx
            .ledger()
            .decrease_allowance(key(), U256::from(51u64))
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::NegativeAmount {
                requested: U256::from(51u64),
                remaining: U256::from(50u64)
            }
        );
        assert_eq!(fx.ledger().allowance(&key()).unwrap(), U256::from(50u64));
    }

    #[test]
    fn delta_without_grant() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.ledger().decrease_allowance(key(), U256::from(1u64)),
            Err(DispatchError::NonPositiveApproval)
        );
        assert_eq!(
            fx.ledger().increase_allowance(key(), U256::ZERO),
            Err(DispatchError::NonPositiveApproval)
        );
        assert_eq!(
            fx.ledger().increase_allowance(key(), U256::from(5u64)),
            Ok(U256::from(5u64))
        );
        assert_eq!(fx.ledger().exists(&key()).unwrap().limit, simple(5));
    }

    #[test]
    fn increase_overflow_is_rejected() {
        let mut fx = Fixture::new();
        fx.ledger()
            .approve(key(), Limit::Simple(U256::MAX - U256::from(1u64)))
            .unwrap();

        assert_eq!(
            fx.ledger().increase_allowance(key(), U256::from(2u64)),
            Err(DispatchError::IntegerOverflow)
        );
        assert_eq!(
            fx.ledger().allowance(&key()).unwrap(),
            U256::MAX - U256::from(1u64)
        );
    }

    #[test]
    fn decreasing_unlimited_becomes_finite() {
        let mut fx = Fixture::new();
        fx.ledger().approve(key(), Limit::Simple(U256::MAX)).unwrap();
        let value = fx.ledger().decrease_allowance(key(), U256::from(1u64)).unwrap();
        assert_eq!(value, U256::MAX - U256::from(1u64));
    }

    #[test]
    fn update_refreshes_expiration() {
        let mut fx = Fixture::new();
        fx.ledger().approve(key(), simple(10)).unwrap();
        fx.block_time = 5_000;
        fx.ledger().increase_allowance(key(), U256::from(1u64)).unwrap();
        assert_eq!(
            fx.ledger().exists(&key()).unwrap().expiration,
            Some(5_000 + YEAR)
        );
    }

    #[test]
    fn expired_grants_are_absent() {
        let mut fx = Fixture::new();
        fx.ledger().approve(key(), simple(10)).unwrap();
        fx.block_time += YEAR;

        assert!(fx.ledger().exists(&key()).is_err());
        assert_eq!(fx.ledger().allowance(&key()).unwrap(), U256::ZERO);
        assert!(matches!(
            fx.ledger().revoke(key()),
            Err(DispatchError::AuthorizationNotFoundOrExpired { .. })
        ));
    }

    #[test]
    fn revoke_removes_and_emits() {
        let mut fx = Fixture::new();
        fx.ledger().approve(key(), simple(10)).unwrap();
        fx.ledger().revoke(key()).unwrap();
        assert!(fx.store.is_empty());
        assert_eq!(
            fx.events.last(),
            Some(&AuthorizationEvent::Revocation { key: key() })
        );
    }

    #[test]
    fn spend_consumes_simple_limit() {
        let mut fx = Fixture::new();
        fx.ledger().approve(key(), simple(10)).unwrap();

        fx.ledger().spend(&key(), U256::from(4u64)).unwrap();
        assert_eq!(fx.ledger().allowance(&key()).unwrap(), U256::from(6u64));

        assert_eq!(
            fx.ledger().spend(&key(), U256::from(7u64)),
            Err(DispatchError::ExceededAllowance {
                requested: U256::from(7u64),
                remaining: U256::from(6u64)
            })
        );

        fx.ledger().spend(&key(), U256::from(6u64)).unwrap();
        assert!(fx.store.is_empty());
    }

    #[test]
    fn unlimited_spend_is_not_decremented() {
        let mut fx = Fixture::new();
        fx.ledger().approve(key(), Limit::Simple(U256::MAX)).unwrap();
        fx.ledger().spend(&key(), U256::from(1_000u64)).unwrap();
        assert_eq!(fx.ledger().allowance(&key()).unwrap(), U256::MAX);
    }

    #[test]
    fn allocation_decrease_removes_only_the_denom() {
        let mut fx = Fixture::new();
        fx.ledger()
            .approve(
                transfer_key(),
                Limit::Allocations(vec![channel_allocation(100)]),
            )
            .unwrap();

        let allocations = fx
            .ledger()
            .decrease_allocation(
                transfer_key(),
                "transfer",
                "channel-0",
                "aevmos",
                U256::from(100u64),
            )
            .unwrap();
        assert_eq!(allocations.len(), 1);
        assert!(allocations[0].spend_limit.is_empty());

        let grant = fx.ledger().exists(&transfer_key()).unwrap();
        assert_eq!(grant.limit, Limit::Allocations(allocations));
        assert_eq!(grant.expiration, Some(1_000 + YEAR));
    }

    #[test]
    fn allocation_lookup_failures() {
        let mut fx = Fixture::new();
        fx.ledger()
            .approve(
                transfer_key(),
                Limit::Allocations(vec![channel_allocation(100)]),
            )
            .unwrap();

        let err = fx
            .ledger()
            .increase_allocation(transfer_key(), "transfer", "channel-9", "aevmos", U256::from(1u64))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoMatchingAllocation { .. }));

        let err = fx
            .ledger()
            .decrease_allocation(transfer_key(), "transfer", "channel-0", "uatom", U256::from(1u64))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoMatchingAllocation { .. }));

        let err = fx
            .ledger()
            .decrease_allocation(transfer_key(), "transfer", "channel-0", "aevmos", U256::from(101u64))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NegativeAmount { .. }));

        fx.ledger().approve(key(), simple(1)).unwrap();
        let err = fx
            .ledger()
            .increase_allocation(key(), "transfer", "channel-0", "aevmos", U256::from(1u64))
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnknownAuthorizationType {
                expected: "allocation"
            }
        );
        let err = fx
            .ledger()
            .increase_allowance(transfer_key(), U256::from(1u64))
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnknownAuthorizationType { expected: "simple" }
        );
    }

    #[test]
    fn spend_allocation_enforces_receivers_and_deletes_when_exhausted() {
        let mut fx = Fixture::new();
        let mut allocation = channel_allocation(10);
        allocation.allow_list = vec!["cosmos1dest".to_string()];
        fx.ledger()
            .approve(transfer_key(), Limit::Allocations(vec![allocation]))
            .unwrap();

        let err = fx
            .ledger()
            .spend_allocation(
                &transfer_key(),
                "transfer",
                "channel-0",
                "aevmos",
                U256::from(1u64),
                "cosmos1other",
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::ReceiverNotAllowed { .. }));

        fx.ledger()
            .spend_allocation(
                &transfer_key(),
                "transfer",
                "channel-0",
                "aevmos",
                U256::from(4u64),
                "cosmos1dest",
            )
            .unwrap();
        fx.ledger()
            .spend_allocation(
                &transfer_key(),
                "transfer",
                "channel-0",
                "aevmos",
                U256::from(6u64),
                "cosmos1dest",
            )
            .unwrap();
        assert!(fx.store.is_empty(), "exhausted grant is removed");
    }

    #[test]
    fn empty_allocation_authorizes_nothing() {
        let mut fx = Fixture::new();
        fx.ledger()
            .approve(
                transfer_key(),
                Limit::Allocations(vec![
                    Allocation::new("transfer", "channel-0", Vec::new()),
                    channel_allocation(5),
                ]),
            )
            .unwrap();
        // second allocation shares the port/channel; lookup stops at the first match
        let err = fx
            .ledger()
            .spend_allocation(
                &transfer_key(),
                "transfer",
                "channel-0",
                "aevmos",
                U256::from(1u64),
                "cosmos1dest",
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoMatchingAllocation { .. }));
    }

    #[test]
    fn event_log_args_follow_interface_shapes() {
        let approval = AuthorizationEvent::Approval {
            key: key(),
            limit: simple(3),
        };
        let (name, indexed, data) = approval.log_args();
        assert_eq!(name, "Approval");
        assert_eq!(indexed, vec![DynSolValue::Address(GRANTEE), DynSolValue::Address(GRANTER)]);
        assert_eq!(data[1], DynSolValue::Uint(U256::from(3u64), 256));

        let change = AuthorizationEvent::AllowanceChange {
            key: transfer_key(),
            limit: Limit::Allocations(vec![channel_allocation(1)]),
        };
        assert_eq!(change.log_args().0, "IBCTransferAuthorization");
        assert_eq!(
            AuthorizationEvent::Revocation { key: key() }.log_args().0,
            "Revocation"
        );
    }
}
