//! Time- and amount-limited authorizations.
//!
//! A grant lets a grantee act on behalf of a granter for one message kind. Grants carry either
//! a simple amount limit or a list of per-channel IBC allocations, and optionally expire. The
//! [`AuthorizationLedger`] implements every grant operation on top of a [`GrantStore`]; inside a
//! precompile call the store is a [`CacheGrantStore`] branch that only reaches the backing store
//! when the call succeeds.

mod ledger;
mod store;
mod types;

pub use ledger::{AuthorizationEvent, AuthorizationEventSink, AuthorizationLedger, LedgerParams};
pub use store::{CacheGrantStore, GrantChangeset, GrantStore, GrantStoreError, MemoryGrantStore};
pub use types::{Allocation, Coin, Grant, GrantKey, Limit};
