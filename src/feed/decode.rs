//! Delta payload decoding
//!
//! Every per-entry payload pushed by the hub is a base64 string wrapping a raw
//! DEFLATE stream (no zlib or gzip header) of terse-keyed JSON. Decoding runs
//! base64 -> inflate -> JSON, then renames every key through the
//! [`KeyAliasTable`], recursing into nested objects and arrays.

use crate::feed::aliases::KeyAliasTable;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use serde_json::{Map, Value};
use std::io::Read;

/// Decoding failures. Callers drop the entry; none of these is fatal.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Inflate failed: {0}")]
    Inflate(#[from] std::io::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Payload is not a string")]
    NotAString,
}

/// Inflated size cap used when the caller does not configure one
pub const DEFAULT_MAX_INFLATED_BYTES: usize = 16 * 1024 * 1024;

/// base64 -> raw inflate -> JSON, without key remapping
pub fn decode_raw(encoded: &str) -> Result<Value, DecodeError> {
    decode_raw_limited(encoded, DEFAULT_MAX_INFLATED_BYTES)
}

/// Like [`decode_raw`], failing with [`DecodeError::Inflate`] once the
/// inflated stream exceeds `max_inflated` bytes
pub fn decode_raw_limited(encoded: &str, max_inflated: usize) -> Result<Value, DecodeError> {
    let compressed = STANDARD.decode(encoded.trim())?;
    let mut inflated = Vec::with_capacity((compressed.len() * 4).min(max_inflated));
    DeflateDecoder::new(compressed.as_slice())
        .take(max_inflated as u64 + 1)
        .read_to_end(&mut inflated)?;
    if inflated.len() > max_inflated {
        return Err(DecodeError::Inflate(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("inflated payload exceeds {max_inflated} bytes"),
        )));
    }
    Ok(serde_json::from_slice(&inflated)?)
}

/// Full pipeline: decode then remap keys to their semantic names
pub fn decode_payload(encoded: &str) -> Result<Value, DecodeError> {
    decode_raw(encoded).map(remap_keys)
}

/// Decode a hub argument, which must be a base64 string
pub fn decode_value(arg: &Value) -> Result<Value, DecodeError> {
    decode_value_limited(arg, DEFAULT_MAX_INFLATED_BYTES)
}

pub fn decode_value_limited(arg: &Value, max_inflated: usize) -> Result<Value, DecodeError> {
    match arg {
        Value::String(encoded) => decode_raw_limited(encoded, max_inflated).map(remap_keys),
        _ => Err(DecodeError::NotAString),
    }
}

/// Recursively rename terse keys. Unknown keys are kept as-is.
pub fn remap_keys(value: Value) -> Value {
    let table = KeyAliasTable::global();
    remap_with(table, value)
}

fn remap_with(table: &KeyAliasTable, value: Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut remapped = Map::with_capacity(fields.len());
            for (key, inner) in fields {
                let name = match table.resolve(&key) {
                    Some(name) => name.to_string(),
                    None => {
                        tracing::warn!(target: "feed", key = %key, "unknown payload key");
                        key
                    }
                };
                remapped.insert(name, remap_with(table, inner));
            }
            Value::Object(remapped)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|item| remap_with(table, item)).collect())
        }
        scalar => scalar,
    }
}
