use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A raw record read from or written to the partitioned log.
///
/// The topology only interprets `topic`, `partition`, `key` and `value`; the
/// other fields are carried for the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
  /// Topic name.
  pub topic: String,
  /// Partition number within the topic.
  pub partition: i32,
  /// Offset within the partition, `-1` for records not yet written.
  pub offset: i64,
  /// Encoded key. Empty when the record has no key.
  pub key: Bytes,
  /// Encoded value.
  pub value: Bytes,
  /// Record timestamp, if the transport provides one.
  pub timestamp: Option<DateTime<Utc>>,
}

impl Record {
  /// Creates an outbound record for `topic`. Partition assignment is left to the transport.
  pub fn new(topic: impl Into<String>, key: Bytes, value: Bytes) -> Self {
    Self {
      topic: topic.into(),
      partition: -1,
      offset: -1,
      key,
      value,
      timestamp: None,
    }
  }

  /// Sets the partition.
  #[must_use]
  pub fn with_partition(mut self, partition: i32) -> Self {
    self.partition = partition;
    self
  }

  /// Sets the offset.
  #[must_use]
  pub fn with_offset(mut self, offset: i64) -> Self {
    self.offset = offset;
    self
  }

  /// Sets the timestamp.
  #[must_use]
  pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = Some(timestamp);
    self
  }
}
