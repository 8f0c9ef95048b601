use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;

use crate::{abi::AbiError, gas::KvGasConfig};

/// Default lifetime of a new grant: one year.
pub const DEFAULT_APPROVAL_EXPIRATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Environment variable holding the grant lifetime in seconds; `0` disables expiration.
pub const APPROVAL_EXPIRATION_ENV: &str = "EV_PRECOMPILE_APPROVAL_EXPIRATION_SECS";

/// Environment variable holding a JSON object with `kv_gas` and/or `base_gas` overrides.
pub const GAS_CONFIG_ENV: &str = "EV_PRECOMPILE_GAS_CONFIG";

/// Settings shared by every precompile instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecompileConfig {
    /// Lifetime of new and updated grants. `None` creates grants that never expire.
    pub approval_expiration: Option<Duration>,
    /// Storage access costs charged by the authorization ledger.
    pub kv_gas: KvGasConfig,
    /// Base gas per method name. Entries override the module defaults.
    pub base_gas: BTreeMap<String, u64>,
}

impl Default for PrecompileConfig {
    fn default() -> Self {
        Self {
            approval_expiration: Some(DEFAULT_APPROVAL_EXPIRATION),
            kv_gas: KvGasConfig::default(),
            base_gas: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize)]
struct GasOverrides {
    #[serde(default)]
    kv_gas: Option<KvGasConfig>,
    #[serde(default)]
    base_gas: BTreeMap<String, u64>,
}

impl PrecompileConfig {
    /// Creates a new `PrecompileConfig` from environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> eyre::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(APPROVAL_EXPIRATION_ENV) {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|err| eyre::eyre!("invalid {APPROVAL_EXPIRATION_ENV}: {err}"))?;
            config.approval_expiration = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(raw) = lookup(GAS_CONFIG_ENV) {
            let overrides: GasOverrides = serde_json::from_str(&raw)?;
            if let Some(kv_gas) = overrides.kv_gas {
                config.kv_gas = kv_gas;
            }
            config.base_gas.extend(overrides.base_gas);
        }

        Ok(config)
    }

    /// Sets the grant lifetime.
    pub fn with_approval_expiration(mut self, expiration: Option<Duration>) -> Self {
        self.approval_expiration = expiration;
        self
    }

    /// Overrides the base gas of one method.
    pub fn with_base_gas(mut self, method: impl Into<String>, gas: u64) -> Self {
        self.base_gas.insert(method.into(), gas);
        self
    }
}

/// Errors raised while assembling a precompile.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The interface could not be loaded.
    #[error(transparent)]
    Abi(#[from] AbiError),
    /// An interface method has no handler.
    #[error("method {method} has no handler")]
    MissingHandler {
        /// Method name.
        method: String,
    },
    /// A handler is registered for a method the interface does not declare.
    #[error("handler {name} does not match any method")]
    UnknownHandler {
        /// Handler name.
        name: String,
    },
}
