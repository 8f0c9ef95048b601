//! ABI catalog: method and event lookup for a precompile interface.
//!
//! A catalog is built once when the precompile is constructed, either from a JSON ABI document
//! or from human-readable Solidity signatures, and is immutable afterwards. Parsing failures are
//! returned as [`AbiError`] so a precompile with a broken interface never gets registered.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    json_abi::{Event, Function, JsonAbi, StateMutability},
};
use alloy_primitives::{hex, Selector, B256};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while loading an interface or (de)serializing call data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AbiError {
    /// The interface description could not be parsed.
    #[error("invalid ABI: {0}")]
    InvalidAbi(String),
    /// Two methods share the same 4-byte selector.
    #[error("duplicate selector {selector} for methods {first} and {second}")]
    DuplicateSelector {
        /// Hex-encoded selector.
        selector: String,
        /// First method using the selector.
        first: String,
        /// Second method using the selector.
        second: String,
    },
    /// Overloaded names cannot be dispatched by name.
    #[error("overloaded {kind} {name} is not supported")]
    Overloaded {
        /// `"method"` or `"event"`.
        kind: &'static str,
        /// The overloaded name.
        name: String,
    },
    /// A parameter type string is not a valid Solidity type.
    #[error("invalid type {ty} in {item}: {reason}")]
    InvalidType {
        /// Method or event the parameter belongs to.
        item: String,
        /// The offending type string.
        ty: String,
        /// Parser message.
        reason: String,
    },
    /// Call arguments could not be decoded.
    #[error("failed to decode arguments of {method}: {reason}")]
    Decode {
        /// Method being decoded.
        method: String,
        /// Decoder message.
        reason: String,
    },
    /// Return values do not match the method outputs.
    #[error("invalid outputs for {method}: {reason}")]
    Encode {
        /// Method being encoded.
        method: String,
        /// Mismatch description.
        reason: String,
    },
}

/// A resolved method of the interface.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    name: String,
    selector: Selector,
    signature: String,
    inputs: Vec<DynSolType>,
    outputs: Vec<DynSolType>,
    is_transaction: bool,
}

impl MethodDescriptor {
    fn from_function(function: &Function) -> Result<Self, AbiError> {
        let signature = function.signature();
        let inputs = function
            .inputs
            .iter()
            .map(|param| parse_type(&signature, &param.selector_type()))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = function
            .outputs
            .iter()
            .map(|param| parse_type(&signature, &param.selector_type()))
            .collect::<Result<Vec<_>, _>>()?;
        let is_transaction = !matches!(
            function.state_mutability,
            StateMutability::View | StateMutability::Pure
        );

        Ok(Self {
            name: function.name.clone(),
            selector: function.selector(),
            signature,
            inputs,
            outputs,
            is_transaction,
        })
    }

    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 4-byte selector.
    pub const fn selector(&self) -> Selector {
        self.selector
    }

    /// Canonical signature, e.g. `approve(address,uint256,string[])`.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Ordered input types.
    pub fn inputs(&self) -> &[DynSolType] {
        &self.inputs
    }

    /// Ordered output types.
    pub fn outputs(&self) -> &[DynSolType] {
        &self.outputs
    }

    /// Whether the method mutates state (anything other than `view`/`pure`).
    pub const fn is_transaction(&self) -> bool {
        self.is_transaction
    }

    /// Decodes the arguments that follow the selector.
    pub fn decode_input(&self, data: &[u8]) -> Result<Vec<DynSolValue>, AbiError> {
        if self.inputs.is_empty() {
            return Ok(Vec::new());
        }
        let decoded = DynSolType::Tuple(self.inputs.clone())
            .abi_decode_params(data)
            .map_err(|err| AbiError::Decode {
                method: self.name.clone(),
                reason: err.to_string(),
            })?;
        Ok(match decoded {
            DynSolValue::Tuple(values) => values,
            other => vec![other],
        })
    }

    /// Encodes return values, checking them against the declared outputs.
    pub fn encode_output(&self, values: Vec<DynSolValue>) -> Result<Vec<u8>, AbiError> {
        if values.len() != self.outputs.len() {
            return Err(AbiError::Encode {
                method: self.name.clone(),
                reason: format!("expected {} values, got {}", self.outputs.len(), values.len()),
            });
        }
        if let Some(idx) = self
            .outputs
            .iter()
            .zip(&values)
            .position(|(ty, value)| !ty.matches(value))
        {
            return Err(AbiError::Encode {
                method: self.name.clone(),
                reason: format!("value {idx} does not match type {}", self.outputs[idx]),
            });
        }
        if values.is_empty() {
            return Ok(Vec::new());
        }
        Ok(DynSolValue::Tuple(values).abi_encode_params())
    }
}

/// A resolved event of the interface.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    name: String,
    topic0: B256,
    inputs: Vec<EventInput>,
    anonymous: bool,
}

/// One parameter of an event.
#[derive(Debug, Clone)]
pub struct EventInput {
    /// Parameter name.
    pub name: String,
    /// Resolved type.
    pub ty: DynSolType,
    /// Whether the value is emitted as a topic.
    pub indexed: bool,
}

impl EventDescriptor {
    fn from_event(event: &Event) -> Result<Self, AbiError> {
        let signature = event.signature();
        let inputs = event
            .inputs
            .iter()
            .map(|param| {
                Ok(EventInput {
                    name: param.name.clone(),
                    ty: parse_type(&signature, &param.selector_type())?,
                    indexed: param.indexed,
                })
            })
            .collect::<Result<Vec<_>, AbiError>>()?;

        Ok(Self {
            name: event.name.clone(),
            topic0: event.selector(),
            inputs,
            anonymous: event.anonymous,
        })
    }

    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keccak-256 hash of the event signature (topic 0).
    pub const fn topic0(&self) -> B256 {
        self.topic0
    }

    /// All parameters in declaration order.
    pub fn inputs(&self) -> &[EventInput] {
        &self.inputs
    }

    /// Anonymous events carry no signature topic.
    pub const fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Indexed parameters in declaration order.
    pub fn indexed(&self) -> impl Iterator<Item = &EventInput> {
        self.inputs.iter().filter(|input| input.indexed)
    }

    /// Non-indexed parameters in declaration order.
    pub fn non_indexed(&self) -> impl Iterator<Item = &EventInput> {
        self.inputs.iter().filter(|input| !input.indexed)
    }
}

/// Method and event lookup tables for one precompile interface.
#[derive(Debug, Clone)]
pub struct AbiCatalog {
    methods: Vec<MethodDescriptor>,
    by_selector: HashMap<Selector, usize>,
    by_name: HashMap<String, usize>,
    events: HashMap<String, EventDescriptor>,
}

impl AbiCatalog {
    /// Loads a catalog from a JSON ABI document.
    pub fn from_json(json: &str) -> Result<Self, AbiError> {
        let abi: JsonAbi =
            serde_json::from_str(json).map_err(|err| AbiError::InvalidAbi(err.to_string()))?;
        Self::from_abi(&abi)
    }

    /// Loads a catalog from human-readable Solidity signatures, e.g.
    /// `"function approve(address grantee, uint256 amount) returns (bool)"`.
    pub fn from_signatures<'a, I>(signatures: I) -> Result<Self, AbiError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let abi = JsonAbi::parse(signatures).map_err(|err| AbiError::InvalidAbi(err.to_string()))?;
        Self::from_abi(&abi)
    }

    /// Builds the lookup tables from a parsed ABI.
    pub fn from_abi(abi: &JsonAbi) -> Result<Self, AbiError> {
        let mut methods = Vec::new();
        let mut by_selector = HashMap::new();
        let mut by_name = HashMap::new();

        for function in abi.functions() {
            let method = MethodDescriptor::from_function(function)?;
            if by_name.contains_key(method.name()) {
                return Err(AbiError::Overloaded {
                    kind: "method",
                    name: method.name.clone(),
                });
            }
            if let Some(&existing) = by_selector.get(&method.selector) {
                let first: &MethodDescriptor = &methods[existing];
                return Err(AbiError::DuplicateSelector {
                    selector: hex::encode_prefixed(method.selector),
                    first: first.signature.clone(),
                    second: method.signature.clone(),
                });
            }
            let idx = methods.len();
            by_selector.insert(method.selector, idx);
            by_name.insert(method.name.clone(), idx);
            methods.push(method);
        }

        let mut events = HashMap::new();
        for event in abi.events() {
            let descriptor = EventDescriptor::from_event(event)?;
            if events.contains_key(descriptor.name()) {
                return Err(AbiError::Overloaded {
                    kind: "event",
                    name: descriptor.name,
                });
            }
            events.insert(descriptor.name.clone(), descriptor);
        }

        Ok(Self {
            methods,
            by_selector,
            by_name,
            events,
        })
    }

    /// Looks a method up by its 4-byte selector.
    pub fn method_by_id(&self, selector: &[u8]) -> Option<&MethodDescriptor> {
        let selector = Selector::try_from(selector).ok()?;
        self.by_selector.get(&selector).map(|&idx| &self.methods[idx])
    }

    /// Looks a method up by name.
    pub fn method_by_name(&self, name: &str) -> Option<&MethodDescriptor> {
        self.by_name.get(name).map(|&idx| &self.methods[idx])
    }

    /// Looks an event up by name.
    pub fn event_by_name(&self, name: &str) -> Option<&EventDescriptor> {
        self.events.get(name)
    }

    /// All methods in load order.
    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.iter()
    }
}

fn parse_type(item: &str, ty: &str) -> Result<DynSolType, AbiError> {
    DynSolType::parse(ty).map_err(|err| AbiError::InvalidType {
        item: item.to_string(),
        ty: ty.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{
        sol,
        sol_types::{SolCall, SolValue},
    };
    use alloy_primitives::{address, U256};

    sol! {
        interface IExample {
            function approve(address grantee, uint256 amount, string[] methods) external returns (bool);
            function allowance(address grantee, address granter, string method) external view returns (uint256);
        }
    }

    const SIGNATURES: &[&str] = &[
        "function approve(address grantee, uint256 amount, string[] methods) returns (bool)",
        "function allowance(address grantee, address granter, string method) view returns (uint256)",
        "event Approval(address indexed grantee, address indexed granter, string[] methods, uint256 value)",
    ];

    const JSON_ABI: &str = r#"[{"inputs":[{"internalType":"address","name":"to","type":"address"},{"internalType":"uint256","name":"amount","type":"uint256"}],"name":"mint","outputs":[],"stateMutability":"nonpayable","type":"function"}]"#;

    #[test]
    fn resolves_methods_by_selector_and_name() {
        let catalog = AbiCatalog::from_signatures(SIGNATURES.iter().copied()).unwrap();

        let approve = catalog
            .method_by_id(IExample::approveCall::SELECTOR.as_slice())
            .expect("approve is registered");
        assert_eq!(approve.name(), "approve");
        assert!(approve.is_transaction());

        let allowance = catalog.method_by_name("allowance").expect("allowance");
        assert_eq!(allowance.selector(), Selector::from(IExample::allowanceCall::SELECTOR));
        assert!(!allowance.is_transaction(), "view methods are queries");

        assert!(catalog.method_by_id(&[0xde, 0xad, 0xbe, 0xef]).is_none());
        assert!(catalog.event_by_name("Approval").is_some());
        assert!(catalog.event_by_name("Missing").is_none());
    }

    #[test]
    fn loads_json_abi() {
        let catalog = AbiCatalog::from_json(JSON_ABI).unwrap();
        let mint = catalog.method_by_name("mint").unwrap();
        assert_eq!(mint.signature(), "mint(address,uint256)");
        assert!(mint.outputs().is_empty());
    }

    #[test]
    fn rejects_broken_interfaces() {
        assert!(matches!(
            AbiCatalog::from_json("{not json"),
            Err(AbiError::InvalidAbi(_))
        ));
        assert!(matches!(
            AbiCatalog::from_signatures(["function broken(uint257 x)"]),
            Err(_)
        ));
        let overloaded = AbiCatalog::from_signatures([
            "function transfer(address to)",
            "function transfer(address to, uint256 amount)",
        ]);
        assert!(matches!(overloaded, Err(AbiError::Overloaded { .. })));
    }

    #[test]
    fn decodes_inputs_and_encodes_outputs() {
        let catalog = AbiCatalog::from_signatures(SIGNATURES.iter().copied()).unwrap();
        let grantee = address!("0x00000000000000000000000000000000000000b1");
        let call = IExample::approveCall {
            grantee,
            amount: U256::from(7u64),
            methods: vec!["delegate".to_string()],
        };
        let data = call.abi_encode();

        let method = catalog.method_by_id(&data[..4]).unwrap();
        let args = method.decode_input(&data[4..]).unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0].as_address(), Some(grantee));
        assert_eq!(args[1].as_uint(), Some((U256::from(7u64), 256)));

        let out = method.encode_output(vec![DynSolValue::Bool(true)]).unwrap();
        assert_eq!(out, true.abi_encode());

        let err = method
            .encode_output(vec![DynSolValue::Uint(U256::ZERO, 256)])
            .unwrap_err();
        assert!(matches!(err, AbiError::Encode { .. }));
    }

    #[test]
    fn truncated_arguments_fail_to_decode() {
        let catalog = AbiCatalog::from_signatures(SIGNATURES.iter().copied()).unwrap();
        let method = catalog.method_by_name("allowance").unwrap();
        let err = method.decode_input(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, AbiError::Decode { .. }));
    }
}
