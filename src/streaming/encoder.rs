//! Item encoding.
//!
//! The bridge never inspects items; it only needs bytes for each one.
//! Items the source already rendered travel as [`Item::Encoded`] and are
//! written verbatim.

use crate::error::EncodeError;
use bytes::Bytes;
use serde::Serialize;

/// One result item as delivered by the data source.
#[derive(Debug, Clone, PartialEq)]
pub enum Item<T> {
    /// A value that still needs encoding.
    Value(T),
    /// Bytes of an already-encoded JSON value.
    Encoded(Bytes),
}

impl<T> From<T> for Item<T> {
    fn from(value: T) -> Self {
        Item::Value(value)
    }
}

/// Converts a single value to its JSON bytes.
pub trait ItemEncoder<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Bytes, EncodeError>;
}

/// Compact `serde_json` encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

impl<T: Serialize> ItemEncoder<T> for JsonEncoder {
    fn encode(&self, value: &T) -> Result<Bytes, EncodeError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }
}

/// Encode an item, passing pre-encoded bytes through unchanged.
pub fn encode_item<T>(encoder: &dyn ItemEncoder<T>, item: Item<T>) -> Result<Bytes, EncodeError> {
    match item {
        Item::Value(value) => encoder.encode(&value),
        Item::Encoded(bytes) if bytes.is_empty() => Err(EncodeError::Empty),
        Item::Encoded(bytes) => Ok(bytes),
    }
}
