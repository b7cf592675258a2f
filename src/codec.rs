//! # Codecs
//!
//! Sources and sinks never know how keys and values look on the wire. They are
//! handed a [`Deserializer`] or [`Serializer`] per key and per value when they
//! are registered, and call through it for every record.
//!
//! Built-in codecs:
//!
//! - [`StringSerde`]: UTF-8 strings
//! - [`BytesSerde`]: raw bytes, passed through untouched
//! - [`I64Serde`]: 8-byte big-endian signed integers
//! - [`JsonSerde`]: any serde type as JSON

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use thiserror::Error;

/// Error type for encoding and decoding keys and values.
#[derive(Error, Debug)]
pub enum CodecError {
  /// The bytes are not valid UTF-8.
  #[error("invalid utf-8: {0}")]
  Utf8(#[from] std::str::Utf8Error),
  /// JSON encoding or decoding failed.
  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
  /// The input has the wrong length for a fixed-width type.
  #[error("expected {expected} bytes, got {actual}")]
  Length {
    /// Required number of bytes.
    expected: usize,
    /// Number of bytes received.
    actual: usize,
  },
  /// Codec-specific failure.
  #[error("{0}")]
  Custom(String),
}

impl CodecError {
  /// Creates a codec-specific error from a message.
  pub fn custom(message: impl Into<String>) -> Self {
    Self::Custom(message.into())
  }
}

/// Encodes one key or value type to bytes.
pub trait Serializer: Send + Sync {
  /// The type this serializer encodes.
  type Item;

  /// Encodes `item`.
  fn serialize(&self, item: &Self::Item) -> Result<Bytes, CodecError>;
}

/// Decodes one key or value type from bytes.
pub trait Deserializer: Send + Sync {
  /// The type this deserializer produces.
  type Item;

  /// Decodes `data`.
  fn deserialize(&self, data: &[u8]) -> Result<Self::Item, CodecError>;
}

/// UTF-8 string codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringSerde;

impl Serializer for StringSerde {
  type Item = String;

  fn serialize(&self, item: &String) -> Result<Bytes, CodecError> {
    Ok(Bytes::copy_from_slice(item.as_bytes()))
  }
}

impl Deserializer for StringSerde {
  type Item = String;

  fn deserialize(&self, data: &[u8]) -> Result<String, CodecError> {
    Ok(std::str::from_utf8(data)?.to_owned())
  }
}

/// Pass-through codec for raw bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesSerde;

impl Serializer for BytesSerde {
  type Item = Bytes;

  fn serialize(&self, item: &Bytes) -> Result<Bytes, CodecError> {
    Ok(item.clone())
  }
}

impl Deserializer for BytesSerde {
  type Item = Bytes;

  fn deserialize(&self, data: &[u8]) -> Result<Bytes, CodecError> {
    Ok(Bytes::copy_from_slice(data))
  }
}

/// Big-endian `i64` codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct I64Serde;

impl Serializer for I64Serde {
  type Item = i64;

  fn serialize(&self, item: &i64) -> Result<Bytes, CodecError> {
    Ok(Bytes::copy_from_slice(&item.to_be_bytes()))
  }
}

impl Deserializer for I64Serde {
  type Item = i64;

  fn deserialize(&self, data: &[u8]) -> Result<i64, CodecError> {
    let raw: [u8; 8] = data.try_into().map_err(|_| CodecError::Length {
      expected: 8,
      actual: data.len(),
    })?;
    Ok(i64::from_be_bytes(raw))
  }
}

/// JSON codec for any serde type.
pub struct JsonSerde<T> {
  _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerde<T> {
  /// Creates a JSON codec for `T`.
  pub fn new() -> Self {
    Self {
      _marker: PhantomData,
    }
  }
}

impl<T> Default for JsonSerde<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for JsonSerde<T> {
  fn clone(&self) -> Self {
    Self::new()
  }
}

impl<T: Serialize> Serializer for JsonSerde<T> {
  type Item = T;

  fn serialize(&self, item: &T) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(item)?))
  }
}

impl<T: DeserializeOwned> Deserializer for JsonSerde<T> {
  type Item = T;

  fn deserialize(&self, data: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(data)?)
  }
}
