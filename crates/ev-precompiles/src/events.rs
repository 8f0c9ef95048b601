//! Event encoding for precompile logs.
//!
//! Logs produced here are byte-identical to what a Solidity contract emits for the same event
//! declaration: topic 0 is the signature hash (omitted for anonymous events), each indexed
//! argument becomes one topic and the remaining arguments are ABI-encoded into the data.

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{keccak256, Address, Bytes, Log, B256};
use thiserror::Error;

use crate::abi::{EventDescriptor, EventInput};

/// Errors raised while encoding or decoding an event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    /// The event is not declared by the precompile interface.
    #[error("event {0} is not part of the interface")]
    UnknownEvent(String),
    /// Wrong number of indexed or non-indexed arguments.
    #[error("event {event} expects {expected} {section} arguments, got {got}")]
    ArgumentCount {
        /// Event name.
        event: String,
        /// `"indexed"` or `"data"`.
        section: &'static str,
        /// Declared count.
        expected: usize,
        /// Supplied count.
        got: usize,
    },
    /// An argument does not match its declared type.
    #[error("argument {param} of event {event} does not match type {ty}")]
    TypeMismatch {
        /// Event name.
        event: String,
        /// Parameter name.
        param: String,
        /// Declared type.
        ty: String,
    },
    /// A log may carry at most four topics.
    #[error("event {0} has too many topics")]
    TooManyTopics(String),
    /// A log does not match the event layout.
    #[error("failed to decode event {event}: {reason}")]
    Decode {
        /// Event name.
        event: String,
        /// Decoder message.
        reason: String,
    },
}

/// A log emitted by a precompile together with the block it was emitted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecompileLog {
    /// The EVM log.
    pub log: Log,
    /// Height of the block the call executed in.
    pub block_number: u64,
}

/// Builds a log for `event`.
///
/// `indexed` and `data` hold the indexed and non-indexed arguments, each in declaration order.
pub fn encode(
    event: &EventDescriptor,
    address: Address,
    block_number: u64,
    indexed: &[DynSolValue],
    data: &[DynSolValue],
) -> Result<PrecompileLog, EventError> {
    let indexed_inputs: Vec<&EventInput> = event.indexed().collect();
    let data_inputs: Vec<&EventInput> = event.non_indexed().collect();
    check_arguments(event, "indexed", &indexed_inputs, indexed)?;
    check_arguments(event, "data", &data_inputs, data)?;

    let mut topics = Vec::with_capacity(indexed.len() + 1);
    if !event.is_anonymous() {
        topics.push(event.topic0());
    }
    topics.extend(indexed.iter().map(topic_for));

    let payload = if data.is_empty() {
        Bytes::new()
    } else {
        Bytes::from(DynSolValue::Tuple(data.to_vec()).abi_encode_params())
    };

    let log = Log::new(address, topics, payload)
        .ok_or_else(|| EventError::TooManyTopics(event.name().to_string()))?;
    Ok(PrecompileLog { log, block_number })
}

/// Recovers the arguments of a log emitted for `event`.
///
/// Returns the indexed and non-indexed arguments in declaration order. Indexed arguments of
/// dynamic or composite types are only available as their hash and decode to a `bytes32`.
pub fn decode(
    event: &EventDescriptor,
    log: &Log,
) -> Result<(Vec<DynSolValue>, Vec<DynSolValue>), EventError> {
    let decode_err = |reason: String| EventError::Decode {
        event: event.name().to_string(),
        reason,
    };

    let mut topics = log.topics().iter();
    if !event.is_anonymous() {
        match topics.next() {
            Some(topic) if *topic == event.topic0() => {}
            _ => return Err(decode_err("signature topic mismatch".to_string())),
        }
    }

    let mut indexed = Vec::new();
    for input in event.indexed() {
        let topic = topics
            .next()
            .ok_or_else(|| decode_err(format!("missing topic for {}", input.name)))?;
        let value = if is_hashed(&input.ty) {
            DynSolValue::FixedBytes(*topic, 32)
        } else {
            input
                .ty
                .abi_decode(topic.as_slice())
                .map_err(|err| decode_err(err.to_string()))?
        };
        indexed.push(value);
    }
    if topics.next().is_some() {
        return Err(decode_err("unexpected extra topics".to_string()));
    }

    let data_types: Vec<DynSolType> = event.non_indexed().map(|input| input.ty.clone()).collect();
    let data = if data_types.is_empty() {
        Vec::new()
    } else {
        match DynSolType::Tuple(data_types)
            .abi_decode_params(&log.data.data)
            .map_err(|err| decode_err(err.to_string()))?
        {
            DynSolValue::Tuple(values) => values,
            other => vec![other],
        }
    };

    Ok((indexed, data))
}

fn check_arguments(
    event: &EventDescriptor,
    section: &'static str,
    inputs: &[&EventInput],
    values: &[DynSolValue],
) -> Result<(), EventError> {
    if inputs.len() != values.len() {
        return Err(EventError::ArgumentCount {
            event: event.name().to_string(),
            section,
            expected: inputs.len(),
            got: values.len(),
        });
    }
    for (input, value) in inputs.iter().zip(values) {
        if !input.ty.matches(value) {
            return Err(EventError::TypeMismatch {
                event: event.name().to_string(),
                param: input.name.clone(),
                ty: input.ty.to_string(),
            });
        }
    }
    Ok(())
}

fn is_hashed(ty: &DynSolType) -> bool {
    matches!(
        ty,
        DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(..)
            | DynSolType::Tuple(_)
    )
}

fn topic_for(value: &DynSolValue) -> B256 {
    match value {
        DynSolValue::String(s) => keccak256(s.as_bytes()),
        DynSolValue::Bytes(b) => keccak256(b),
        DynSolValue::Array(_) | DynSolValue::FixedArray(_) | DynSolValue::Tuple(_) => {
            let mut preimage = Vec::new();
            topic_preimage(value, &mut preimage);
            keccak256(preimage)
        }
        other => other.as_word().unwrap_or_default(),
    }
}

/// In-place encoding of a composite indexed value: every element padded to 32 bytes, no
/// offsets or length prefixes.
fn topic_preimage(value: &DynSolValue, out: &mut Vec<u8>) {
    match value {
        DynSolValue::String(s) => pad_into(s.as_bytes(), out),
        DynSolValue::Bytes(b) => pad_into(b, out),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            for item in items {
                topic_preimage(item, out);
            }
        }
        other => out.extend_from_slice(other.as_word().unwrap_or_default().as_slice()),
    }
}

fn pad_into(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes);
    let rem = bytes.len() % 32;
    if rem != 0 {
        out.resize(out.len() + 32 - rem, 0);
    }
}
