//! Live instance of one partition group bound to one partition.

use crate::error::{FlushError, ForwardErrors, ProcessError};
use crate::processor::{Lifecycle, lock};
use crate::record::Record;
use crate::sink::{Flush, PendingAcks};
use crate::source::RecordProcessor;
use crate::store::{SharedStore, StoreSet};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

/// The live nodes and stores of one (partition group, partition) pair.
///
/// Created by [`Topology::instantiate`](crate::topology::Topology::instantiate).
/// Records must be handed to [`process`](Self::process) in partition order;
/// the task is not meant to be shared between threads, only moved.
pub struct PartitionTask {
  group: usize,
  partition: i32,
  sources: BTreeMap<String, Vec<Arc<Mutex<dyn RecordProcessor>>>>,
  processors: BTreeMap<String, Arc<Mutex<dyn Lifecycle>>>,
  sinks: Vec<Arc<Mutex<dyn Flush>>>,
  stores: BTreeMap<String, SharedStore>,
  cancel: CancellationToken,
}

impl PartitionTask {
  pub(crate) fn new(group: usize, partition: i32, cancel: CancellationToken) -> Self {
    Self {
      group,
      partition,
      sources: BTreeMap::new(),
      processors: BTreeMap::new(),
      sinks: Vec::new(),
      stores: BTreeMap::new(),
      cancel,
    }
  }

  pub(crate) fn add_source(&mut self, topic: String, source: Arc<Mutex<dyn RecordProcessor>>) {
    self.sources.entry(topic).or_default().push(source);
  }

  pub(crate) fn add_processor(&mut self, processor: Arc<Mutex<dyn Lifecycle>>) {
    let name = lock(&processor).name().to_string();
    self.processors.insert(name, processor);
  }

  pub(crate) fn add_sink(&mut self, sink: Arc<Mutex<dyn Flush>>) {
    self.sinks.push(sink);
  }

  pub(crate) fn add_store(&mut self, name: String, store: SharedStore) {
    self.stores.insert(name, store);
  }

  pub(crate) fn init_processor(&mut self, name: &str, stores: &StoreSet) -> Result<(), ProcessError> {
    match self.processors.get(name) {
      Some(processor) => lock(processor).init(stores),
      None => Ok(()),
    }
  }

  /// Returns the index of the partition group this task runs.
  pub fn group(&self) -> usize {
    self.group
  }

  /// Returns the partition this task is bound to.
  pub fn partition(&self) -> i32 {
    self.partition
  }

  /// Returns the topics this task reads.
  pub fn topics(&self) -> impl Iterator<Item = &str> {
    self.sources.keys().map(String::as_str)
  }

  /// Returns the store instance registered as `name`.
  pub fn store(&self, name: &str) -> Option<SharedStore> {
    self.stores.get(name).cloned()
  }

  /// Returns the token that stops the task's sinks.
  pub fn cancellation_token(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Feeds one record to every source reading its topic.
  ///
  /// Returns once the record and everything derived from it has been
  /// forwarded through the graph and submitted by the sinks.
  ///
  /// # Errors
  ///
  /// - [`ProcessError::UnknownTopic`] if no source of the task reads the topic
  /// - the source's error if exactly one source reads the topic
  /// - [`ProcessError::Forward`] keyed by source name if several sources read
  ///   the topic and at least one failed
  pub fn process(&mut self, record: &Record) -> Result<(), ProcessError> {
    let Some(sources) = self.sources.get(&record.topic) else {
      return Err(ProcessError::UnknownTopic(record.topic.clone()));
    };

    trace!(
      group = self.group,
      partition = self.partition,
      topic = %record.topic,
      offset = record.offset,
      "processing record"
    );

    if let [source] = sources.as_slice() {
      return lock(source).process_record(record);
    }

    let mut errors = ForwardErrors::new();
    for source in sources {
      let mut source = lock(source);
      if let Err(err) = source.process_record(record) {
        errors.insert(source.name(), err);
      }
    }
    if errors.is_empty() {
      Ok(())
    } else {
      Err(ProcessError::Forward {
        node: record.topic.clone(),
        errors,
      })
    }
  }

  /// Flushes every store, then waits for the acknowledgments of everything the
  /// sinks submitted so far.
  ///
  /// Waiting stops early when the task's cancellation token fires. Every store
  /// and sink is flushed even if an earlier one fails.
  ///
  /// # Errors
  ///
  /// The first failure encountered; the others are logged.
  pub async fn flush(&mut self) -> Result<(), FlushError> {
    let mut first: Option<FlushError> = None;

    for (name, store) in &self.stores {
      let result = lock(store).flush();
      if let Err(source) = result {
        error!(
          group = self.group,
          partition = self.partition,
          store = %name,
          error = %source,
          "store flush failed"
        );
        first.get_or_insert(FlushError::Store {
          store: name.clone(),
          source,
        });
      }
    }

    let pending: Vec<PendingAcks> = self.sinks.iter().map(|sink| lock(sink).take_pending()).collect();
    for acks in pending {
      if let Err(err) = acks.wait(&self.cancel).await {
        error!(
          group = self.group,
          partition = self.partition,
          error = %err,
          "sink flush failed"
        );
        first.get_or_insert(err);
      }
    }

    match first {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  /// Closes every processor, then every store.
  ///
  /// Acknowledgments still pending are dropped; call [`flush`](Self::flush)
  /// first to wait for them. Transport failures that already arrived and
  /// were not reported by a flush are logged and returned. Every node and
  /// store is closed even if an earlier one fails.
  ///
  /// # Errors
  ///
  /// The first failure encountered; the others are logged.
  pub fn close(&mut self) -> Result<(), ProcessError> {
    let mut first: Option<ProcessError> = None;

    for (name, processor) in &self.processors {
      let result = lock(processor).close();
      if let Err(err) = result {
        warn!(processor = %name, error = %err, "processor close failed");
        first.get_or_insert(err);
      }
    }

    for sink in &self.sinks {
      let mut sink = lock(sink);
      let mut pending = sink.take_pending();
      if let Err(err) = pending.take_failures() {
        if let FlushError::Transport { failures, .. } = &err {
          for failure in failures {
            error!(
              sink = %sink.name(),
              partition = self.partition,
              error = %failure,
              "record failed before close"
            );
          }
        }
        first.get_or_insert(err.into());
      }
      if pending.outstanding() > 0 {
        warn!(
          sink = %sink.name(),
          partition = self.partition,
          outstanding = pending.outstanding(),
          "closing with unacknowledged records"
        );
      }
    }

    for (name, store) in &self.stores {
      let result = lock(store).close();
      if let Err(err) = result {
        warn!(store = %name, error = %err, "store close failed");
        first.get_or_insert(err.into());
      }
    }

    match first {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}
