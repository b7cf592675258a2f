//! Source runtime node.
//!
//! Decodes raw records from one topic and forwards the typed pair to its
//! children. A record whose key or value fails to decode is not dropped: the
//! decode failure becomes that record's processing error.

use crate::codec::Deserializer;
use crate::error::ProcessError;
use crate::processor::{Data, ProcessorContext, SharedInput};
use crate::record::Record;
use std::sync::Arc;
use tracing::trace;

/// A node that ingests raw records, independent of the decoded types.
pub(crate) trait RecordProcessor: Send {
  fn name(&self) -> &str;
  fn topic(&self) -> &str;
  fn process_record(&mut self, record: &Record) -> Result<(), ProcessError>;
}

/// Runtime counterpart of a source descriptor.
pub struct SourceNode<K, V> {
  name: String,
  topic: String,
  key_deserializer: Arc<dyn Deserializer<Item = K>>,
  value_deserializer: Arc<dyn Deserializer<Item = V>>,
  context: ProcessorContext<K, V>,
}

impl<K: Data, V: Data> SourceNode<K, V> {
  /// Creates a source reading `topic`.
  pub fn new(
    name: impl Into<String>,
    topic: impl Into<String>,
    key_deserializer: Arc<dyn Deserializer<Item = K>>,
    value_deserializer: Arc<dyn Deserializer<Item = V>>,
  ) -> Self {
    Self {
      name: name.into(),
      topic: topic.into(),
      key_deserializer,
      value_deserializer,
      context: ProcessorContext::new(),
    }
  }

  /// Returns the topic this source reads.
  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// Registers a downstream node.
  pub fn add_output(&mut self, name: impl Into<String>, output: SharedInput<K, V>) {
    self.context.add_output(name, output);
  }

  /// Decodes `record` and forwards it to every child.
  pub fn process(&mut self, record: &Record) -> Result<(), ProcessError> {
    let key = self
      .key_deserializer
      .deserialize(&record.key)
      .map_err(|source| ProcessError::KeyDecode {
        node: self.name.clone(),
        source,
      })?;
    let value = self
      .value_deserializer
      .deserialize(&record.value)
      .map_err(|source| ProcessError::ValueDecode {
        node: self.name.clone(),
        source,
      })?;

    trace!(
      node = %self.name,
      topic = %record.topic,
      partition = record.partition,
      offset = record.offset,
      "ingesting record"
    );

    self.context.forward(key, value);
    let errors = self.context.take_errors();
    if errors.is_empty() {
      Ok(())
    } else {
      Err(ProcessError::Forward {
        node: self.name.clone(),
        errors,
      })
    }
  }
}

impl<K: Data, V: Data> RecordProcessor for SourceNode<K, V> {
  fn name(&self) -> &str {
    &self.name
  }

  fn topic(&self) -> &str {
    &self.topic
  }

  fn process_record(&mut self, record: &Record) -> Result<(), ProcessError> {
    self.process(record)
  }
}
