//! Sink runtime node.
//!
//! Encodes each key/value pair and submits one record to the destination
//! topic. Submission does not wait for the transport's acknowledgment: the
//! acknowledgment is kept pending and collected when the partition task is
//! flushed. A record the transport refuses on the spot is reported as that
//! record's error.

use crate::codec::Serializer;
use crate::error::{FlushError, ProcessError};
use crate::processor::{Data, InputProcessor};
use crate::record::Record;
use crate::transport::{ProduceFuture, RecordProducer, TransportError};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Acknowledgments handed over by a sink on flush or close.
pub struct PendingAcks {
  sink: String,
  topic: String,
  acks: FuturesUnordered<ProduceFuture>,
  failures: Vec<TransportError>,
}

impl PendingAcks {
  fn new(sink: &str, topic: &str) -> Self {
    Self {
      sink: sink.to_string(),
      topic: topic.to_string(),
      acks: FuturesUnordered::new(),
      failures: Vec::new(),
    }
  }

  /// Returns the number of acknowledgments not yet received.
  pub fn outstanding(&self) -> usize {
    self.acks.len()
  }

  /// Records the outcome of every acknowledgment that has already arrived.
  fn collect_ready(&mut self) {
    while let Some(Some(result)) = self.acks.next().now_or_never() {
      if let Err(err) = result {
        self.failures.push(err);
      }
    }
  }

  /// Hands over the transport failures known so far without waiting.
  ///
  /// Acknowledgments that have not arrived stay outstanding.
  pub fn take_failures(&mut self) -> Result<(), FlushError> {
    self.collect_ready();
    if self.failures.is_empty() {
      return Ok(());
    }
    Err(FlushError::Transport {
      sink: self.sink.clone(),
      topic: self.topic.clone(),
      failures: std::mem::take(&mut self.failures),
    })
  }

  /// Waits for every acknowledgment, or until `cancel` fires.
  ///
  /// Transport failures collected since the previous flush are reported
  /// together.
  pub async fn wait(mut self, cancel: &CancellationToken) -> Result<(), FlushError> {
    loop {
      tokio::select! {
        biased;
        next = self.acks.next() => match next {
          Some(Ok(())) => {}
          Some(Err(err)) => self.failures.push(err),
          None => break,
        },
        _ = cancel.cancelled() => {
          return Err(FlushError::Cancelled {
            sink: self.sink,
            pending: self.acks.len(),
          });
        }
      }
    }

    if self.failures.is_empty() {
      Ok(())
    } else {
      Err(FlushError::Transport {
        sink: self.sink,
        topic: self.topic,
        failures: self.failures,
      })
    }
  }
}

/// A sink, independent of its key/value types.
pub(crate) trait Flush: Send {
  fn name(&self) -> &str;
  fn take_pending(&mut self) -> PendingAcks;
}

/// Runtime counterpart of a sink descriptor.
pub struct SinkNode<K, V> {
  name: String,
  topic: String,
  key_serializer: Arc<dyn Serializer<Item = K>>,
  value_serializer: Arc<dyn Serializer<Item = V>>,
  producer: Arc<dyn RecordProducer>,
  cancel: CancellationToken,
  pending: PendingAcks,
}

impl<K: Data, V: Data> SinkNode<K, V> {
  /// Creates a sink writing to `topic` through `producer`.
  ///
  /// Once `cancel` fires the sink refuses further records.
  pub fn new(
    name: impl Into<String>,
    topic: impl Into<String>,
    key_serializer: Arc<dyn Serializer<Item = K>>,
    value_serializer: Arc<dyn Serializer<Item = V>>,
    producer: Arc<dyn RecordProducer>,
    cancel: CancellationToken,
  ) -> Self {
    let name = name.into();
    let topic = topic.into();
    let pending = PendingAcks::new(&name, &topic);
    Self {
      name,
      topic,
      key_serializer,
      value_serializer,
      producer,
      cancel,
      pending,
    }
  }

  /// Returns the destination topic.
  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// Hands over the acknowledgments and failures collected since the last
  /// hand-over. Flushing a partition task awaits what this returns.
  pub fn take_pending(&mut self) -> PendingAcks {
    std::mem::replace(&mut self.pending, PendingAcks::new(&self.name, &self.topic))
  }
}

impl<K: Data, V: Data> InputProcessor<K, V> for SinkNode<K, V> {
  fn process(&mut self, key: K, value: V) -> Result<(), ProcessError> {
    if self.cancel.is_cancelled() {
      return Err(ProcessError::Cancelled {
        node: self.name.clone(),
      });
    }

    let key = self
      .key_serializer
      .serialize(&key)
      .map_err(|source| ProcessError::KeyEncode {
        node: self.name.clone(),
        source,
      })?;
    let value = self
      .value_serializer
      .serialize(&value)
      .map_err(|source| ProcessError::ValueEncode {
        node: self.name.clone(),
        source,
      })?;

    trace!(node = %self.name, topic = %self.topic, "submitting record");

    let mut ack = self.producer.produce(Record::new(self.topic.clone(), key, value));
    match (&mut ack).now_or_never() {
      Some(Err(source)) => {
        return Err(ProcessError::Transport {
          node: self.name.clone(),
          topic: self.topic.clone(),
          source,
        });
      }
      Some(Ok(())) => {}
      None => self.pending.acks.push(ack),
    }

    self.pending.collect_ready();
    Ok(())
  }
}

impl<K: Data, V: Data> Flush for SinkNode<K, V> {
  fn name(&self) -> &str {
    &self.name
  }

  fn take_pending(&mut self) -> PendingAcks {
    SinkNode::take_pending(self)
  }
}
