//! # Transport
//!
//! The outbound half of the partitioned-log client, seen from the topology.
//! A sink only needs to hand over a [`Record`] and eventually learn whether it
//! was acknowledged; connections, batching, offsets and broker topology belong
//! to the client behind [`RecordProducer`].

use crate::record::Record;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Error type for record submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  /// The producer no longer accepts records.
  #[error("producer is closed")]
  Closed,
  /// The transport refused the record.
  #[error("record for topic {topic} rejected: {reason}")]
  Rejected {
    /// Destination topic of the rejected record.
    topic: String,
    /// Reason given by the transport.
    reason: String,
  },
  /// Any other transport failure.
  #[error("transport error: {0}")]
  Other(String),
}

/// Acknowledgment of one submitted record.
pub type ProduceFuture = BoxFuture<'static, Result<(), TransportError>>;

/// Outbound record submission.
///
/// `produce` must enqueue the record before returning, so that records
/// submitted in order are written in order. The returned future only reports
/// the acknowledgment and may be awaited much later, or concurrently with
/// other acknowledgments.
pub trait RecordProducer: Send + Sync {
  /// Submits `record` and returns its pending acknowledgment.
  fn produce(&self, record: Record) -> ProduceFuture;
}

#[derive(Default)]
struct MemoryLog {
  records: Vec<Record>,
  rejected_topics: HashSet<String>,
  closed: bool,
}

/// In-memory producer that appends every submitted record to a shared log.
///
/// Clones share the same log. Useful for tests and for wiring a topology
/// without a broker.
#[derive(Clone, Default)]
pub struct MemoryProducer {
  log: Arc<Mutex<MemoryLog>>,
}

impl MemoryProducer {
  /// Creates an empty producer.
  pub fn new() -> Self {
    Self::default()
  }

  /// Makes every later submission to `topic` fail with [`TransportError::Rejected`].
  pub fn reject_topic(&self, topic: impl Into<String>) {
    self.lock().rejected_topics.insert(topic.into());
  }

  /// Makes every later submission fail with [`TransportError::Closed`].
  pub fn close(&self) {
    self.lock().closed = true;
  }

  /// Returns a copy of all accepted records, in submission order.
  pub fn records(&self) -> Vec<Record> {
    self.lock().records.clone()
  }

  /// Returns a copy of the accepted records for one topic, in submission order.
  pub fn records_for(&self, topic: &str) -> Vec<Record> {
    self
      .lock()
      .records
      .iter()
      .filter(|r| r.topic == topic)
      .cloned()
      .collect()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, MemoryLog> {
    self.log.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl RecordProducer for MemoryProducer {
  fn produce(&self, record: Record) -> ProduceFuture {
    let mut log = self.lock();
    let result = if log.closed {
      Err(TransportError::Closed)
    } else if log.rejected_topics.contains(&record.topic) {
      Err(TransportError::Rejected {
        topic: record.topic.clone(),
        reason: "topic rejected".to_string(),
      })
    } else {
      log.records.push(record);
      Ok(())
    };
    future::ready(result).boxed()
  }
}
