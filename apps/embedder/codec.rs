//! Binary packing of embedding vectors and the content digest used as the
//! reverse-lookup key.
//!
//! The packed form is every element as IEEE-754 single precision,
//! little-endian, concatenated in vector order. Non-finite values are packed
//! bit-for-bit without validation.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;

/// Size in bytes of one packed element.
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// SHA-256 over the packed form of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorDigest([u8; 32]);

impl VectorDigest {
    /// Lowercase hex, the form used in store keys.
    pub fn to_hex(&self) -> String {
        format!("{self}")
    }
}

impl fmt::Display for VectorDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

pub fn serialize(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * ELEMENT_SIZE);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn digest(bytes: &[u8]) -> VectorDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    VectorDigest(out)
}

pub fn digest_vector(vector: &[f32]) -> VectorDigest {
    digest(&serialize(vector))
}

/// Tokens for non-finite elements, as Python's `json.dumps` writes them.
const NAN_TOKEN: &str = "NaN";
const INFINITY_TOKEN: &str = "Infinity";
const NEG_INFINITY_TOKEN: &str = "-Infinity";

/// JSON array form stored under `embedding:post:<id>`. Finite elements are
/// plain JSON numbers; NaN and infinities use the `NaN`/`Infinity`/`-Infinity`
/// tokens so they survive the round trip.
pub fn to_json(vector: &[f32]) -> Result<String> {
    let mut out = String::with_capacity(vector.len() * 12 + 2);
    out.push('[');
    for (i, value) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if value.is_nan() {
            out.push_str(NAN_TOKEN);
        } else if value.is_infinite() {
            out.push_str(if *value > 0.0 {
                INFINITY_TOKEN
            } else {
                NEG_INFINITY_TOKEN
            });
        } else {
            out.push_str(&serde_json::to_string(value)?);
        }
    }
    out.push(']');
    Ok(out)
}

/// Parses the stored array form, including the non-finite tokens and the
/// `", "` separators Python writes.
pub fn from_json(value: &str) -> Result<Vec<f32>> {
    let inner = value
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| Error::Codec(format!("expected a JSON array of floats, got {value:?}")))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|token| parse_element(token.trim()))
        .collect()
}

fn parse_element(token: &str) -> Result<f32> {
    match token {
        NAN_TOKEN => Ok(f32::NAN),
        INFINITY_TOKEN => Ok(f32::INFINITY),
        NEG_INFINITY_TOKEN => Ok(f32::NEG_INFINITY),
        _ => Ok(serde_json::from_str::<f32>(token)?),
    }
}
