use alloy::dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Identifies a grant: `grantee` may act on behalf of `granter` for messages of `kind`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GrantKey {
    /// Account allowed to act.
    pub grantee: Address,
    /// Account that granted the permission.
    pub granter: Address,
    /// Message kind (type URL) the grant covers.
    pub kind: String,
}

impl GrantKey {
    /// Creates a key.
    pub fn new(grantee: Address, granter: Address, kind: impl Into<String>) -> Self {
        Self {
            grantee,
            granter,
            kind: kind.into(),
        }
    }
}

/// An amount of one denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Denomination.
    pub denom: String,
    /// Amount; `U256::MAX` means unbounded.
    pub amount: U256,
}

impl Coin {
    /// Creates a coin.
    pub fn new(denom: impl Into<String>, amount: U256) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    /// ABI value of the `(string denom, uint256 amount)` tuple.
    pub fn to_sol_value(&self) -> DynSolValue {
        DynSolValue::Tuple(vec![
            DynSolValue::String(self.denom.clone()),
            DynSolValue::Uint(self.amount, 256),
        ])
    }

    /// Parses a `(string, uint256)` tuple.
    pub fn from_sol_value(value: &DynSolValue) -> Option<Self> {
        let DynSolValue::Tuple(fields) = value else {
            return None;
        };
        match fields.as_slice() {
            [denom, amount] => Some(Self::new(denom.as_str()?, amount.as_uint()?.0)),
            _ => None,
        }
    }
}

/// Spend limit for one IBC source port and channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// IBC source port.
    pub source_port: String,
    /// IBC source channel.
    pub source_channel: String,
    /// Remaining amount per denomination. A denomination that is absent is not authorized.
    pub spend_limit: Vec<Coin>,
    /// Receivers the grantee may send to. Empty means any receiver.
    #[serde(default)]
    pub allow_list: Vec<String>,
    /// Packet data the grantee may attach. Empty means any.
    #[serde(default)]
    pub allowed_packet_data: Vec<String>,
}

impl Allocation {
    /// Creates an allocation without receiver or packet data restrictions.
    pub fn new(
        source_port: impl Into<String>,
        source_channel: impl Into<String>,
        spend_limit: Vec<Coin>,
    ) -> Self {
        Self {
            source_port: source_port.into(),
            source_channel: source_channel.into(),
            spend_limit,
            allow_list: Vec::new(),
            allowed_packet_data: Vec::new(),
        }
    }

    /// Whether this allocation covers the port and channel.
    pub fn matches(&self, port: &str, channel: &str) -> bool {
        self.source_port == port && self.source_channel == channel
    }

    /// ABI value of the allocation tuple
    /// `(string, string, (string, uint256)[], string[], string[])`.
    pub fn to_sol_value(&self) -> DynSolValue {
        let strings = |items: &[String]| {
            DynSolValue::Array(items.iter().cloned().map(DynSolValue::String).collect())
        };
        DynSolValue::Tuple(vec![
            DynSolValue::String(self.source_port.clone()),
            DynSolValue::String(self.source_channel.clone()),
            DynSolValue::Array(self.spend_limit.iter().map(Coin::to_sol_value).collect()),
            strings(&self.allow_list),
            strings(&self.allowed_packet_data),
        ])
    }

    /// Parses the allocation tuple.
    pub fn from_sol_value(value: &DynSolValue) -> Option<Self> {
        let DynSolValue::Tuple(fields) = value else {
            return None;
        };
        let [port, channel, coins, allow_list, packet_data] = fields.as_slice() else {
            return None;
        };
        let strings = |value: &DynSolValue| -> Option<Vec<String>> {
            value
                .as_array()?
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect()
        };
        Some(Self {
            source_port: port.as_str()?.to_string(),
            source_channel: channel.as_str()?.to_string(),
            spend_limit: coins
                .as_array()?
                .iter()
                .map(Coin::from_sol_value)
                .collect::<Option<_>>()?,
            allow_list: strings(allow_list)?,
            allowed_packet_data: strings(packet_data)?,
        })
    }
}

/// What a grant allows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Limit {
    /// A single amount; `U256::MAX` means unlimited.
    Simple(U256),
    /// Per-channel allocations for IBC transfers.
    Allocations(Vec<Allocation>),
}

impl Limit {
    /// Name of the variant, used in error messages.
    pub const fn variant(&self) -> &'static str {
        match self {
            Self::Simple(_) => "simple",
            Self::Allocations(_) => "allocation",
        }
    }
}

/// A stored authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Remaining allowance.
    pub limit: Limit,
    /// Unix time (seconds) at which the grant stops being valid. `None` never expires.
    pub expiration: Option<u64>,
}

impl Grant {
    /// Whether the grant is expired at `block_time`.
    pub fn is_expired(&self, block_time: u64) -> bool {
        self.expiration.is_some_and(|exp| exp <= block_time)
    }

    /// Size of the stored representation, used for gas accounting.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}
