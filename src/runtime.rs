//! # Worker
//!
//! Drives a [`Topology`] over a stream of records.
//!
//! The worker reads records one by one, looks up the partition group that owns
//! each record's topic, and hands the record to the partition task for
//! (group, partition). Partition tasks are created lazily on first use and each
//! runs on its own tokio task, fed through a bounded channel:
//!
//! ```text
//! records ──► router ──► mpsc ──► PartitionTask (group 0, partition 0)
//!                   ├──► mpsc ──► PartitionTask (group 0, partition 1)
//!                   └──► mpsc ──► PartitionTask (group 1, partition 0)
//! ```
//!
//! Records of one partition are therefore processed in arrival order, while
//! different groups and partitions run in parallel.
//!
//! ## Shutdown
//!
//! The run ends when the record stream ends or the
//! [`shutdown_token`](Worker::shutdown_token) fires. On a normal end every
//! partition task drains its channel, flushes and closes. Cancellation also
//! reaches every sink, so flushes in flight stop waiting for
//! acknowledgments.

use crate::error::{ErrorAction, FlushError, ProcessError, TopologyError};
use crate::record::Record;
use crate::topology::{PartitionTask, Topology};
use crate::transport::RecordProducer;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Configuration for a [`Worker`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Capacity of the channel feeding each partition task.
  pub channel_capacity: usize,
  /// Interval between periodic flushes of a partition task, in milliseconds.
  pub flush_interval_ms: u64,
  /// What to do when a record fails.
  pub on_error: ErrorAction,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      channel_capacity: 64,
      flush_interval_ms: 1000,
      on_error: ErrorAction::Stop,
    }
  }
}

impl WorkerConfig {
  /// Sets the channel capacity of each partition task. Zero is raised to one.
  #[must_use]
  pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
    self.channel_capacity = capacity;
    self
  }

  /// Sets the periodic flush interval in milliseconds.
  #[must_use]
  pub fn with_flush_interval_ms(mut self, interval_ms: u64) -> Self {
    self.flush_interval_ms = interval_ms;
    self
  }

  /// Sets the action taken when a record fails.
  #[must_use]
  pub fn with_on_error(mut self, action: ErrorAction) -> Self {
    self.on_error = action;
    self
  }

  fn flush_interval(&self) -> Duration {
    Duration::from_millis(self.flush_interval_ms.max(1))
  }
}

/// Error type for a worker run.
#[derive(Error, Debug)]
pub enum WorkerError {
  /// A partition task could not be created.
  #[error("group {group} partition {partition}: {source}")]
  Instantiate {
    /// Partition group index.
    group: usize,
    /// Partition.
    partition: i32,
    /// Instantiation failure.
    #[source]
    source: TopologyError,
  },
  /// A record failed and the worker is configured to stop.
  #[error("group {group} partition {partition}: record {topic}@{offset} failed: {source}")]
  Record {
    /// Partition group index.
    group: usize,
    /// Partition.
    partition: i32,
    /// Topic of the failing record.
    topic: String,
    /// Offset of the failing record.
    offset: i64,
    /// Processing failure.
    #[source]
    source: ProcessError,
  },
  /// Flushing a partition task failed and the worker is configured to stop.
  #[error("group {group} partition {partition}: flush failed: {source}")]
  Flush {
    /// Partition group index.
    group: usize,
    /// Partition.
    partition: i32,
    /// Flush failure.
    #[source]
    source: FlushError,
  },
  /// Closing a partition task failed.
  #[error("group {group} partition {partition}: close failed: {source}")]
  Close {
    /// Partition group index.
    group: usize,
    /// Partition.
    partition: i32,
    /// Close failure.
    #[source]
    source: ProcessError,
  },
  /// A partition task panicked or was aborted.
  #[error("partition task aborted: {0}")]
  Join(String),
}

/// Counters for one partition task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
  /// Partition group index.
  pub group: usize,
  /// Partition.
  pub partition: i32,
  /// Records processed without error.
  pub processed: u64,
  /// Records that failed.
  pub failed: u64,
}

/// Outcome of a successful [`Worker::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
  /// One entry per partition task, ordered by (group, partition).
  pub partitions: Vec<PartitionReport>,
  /// Records skipped because no source reads their topic.
  pub unknown_topic: u64,
  /// `true` if the run ended through the shutdown token.
  pub cancelled: bool,
}

impl WorkerReport {
  /// Total records processed without error.
  pub fn processed(&self) -> u64 {
    self.partitions.iter().map(|p| p.processed).sum()
  }

  /// Total records that failed.
  pub fn failed(&self) -> u64 {
    self.partitions.iter().map(|p| p.failed).sum()
  }

  /// Returns the counters of one partition task.
  pub fn partition(&self, group: usize, partition: i32) -> Option<&PartitionReport> {
    self
      .partitions
      .iter()
      .find(|p| p.group == group && p.partition == partition)
  }
}

/// Runs a topology over a record stream.
pub struct Worker {
  topology: Arc<Topology>,
  producer: Arc<dyn RecordProducer>,
  config: WorkerConfig,
  shutdown: CancellationToken,
}

impl Worker {
  /// Creates a worker submitting sink output through `producer`.
  pub fn new(topology: Arc<Topology>, producer: Arc<dyn RecordProducer>, config: WorkerConfig) -> Self {
    Self {
      topology,
      producer,
      config,
      shutdown: CancellationToken::new(),
    }
  }

  /// Returns a token that stops the run when cancelled.
  pub fn shutdown_token(&self) -> CancellationToken {
    self.shutdown.clone()
  }

  /// Returns the configuration.
  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  /// Processes `records` until the stream ends or shutdown is requested.
  ///
  /// # Errors
  ///
  /// The first fatal error of any partition task. With
  /// [`ErrorAction::Skip`] failed records are counted instead.
  pub async fn run<S>(self, mut records: S) -> Result<WorkerReport, WorkerError>
  where
    S: Stream<Item = Record> + Unpin,
  {
    info!(
      groups = self.topology.partition_groups().len(),
      channel_capacity = self.config.channel_capacity,
      "worker starting"
    );

    let mut lanes: HashMap<(usize, i32), mpsc::Sender<Record>> = HashMap::new();
    let mut tasks: JoinSet<Result<PartitionReport, WorkerError>> = JoinSet::new();
    let mut unknown_topic = 0u64;
    let mut failure: Option<WorkerError> = None;

    loop {
      let record = tokio::select! {
        biased;
        _ = self.shutdown.cancelled() => break,
        next = records.next() => match next {
          Some(record) => record,
          None => break,
        },
      };

      let Some(group) = self.topology.group_for_topic(&record.topic) else {
        warn!(topic = %record.topic, offset = record.offset, "no source reads topic, skipping record");
        unknown_topic += 1;
        continue;
      };

      let lane = (group, record.partition);
      if !lanes.contains_key(&lane) {
        match self.spawn_partition(&mut tasks, group, record.partition) {
          Ok(sender) => {
            lanes.insert(lane, sender);
          }
          Err(err) => {
            error!(group, partition = record.partition, error = %err, "failed to start partition task");
            failure = Some(err);
            self.shutdown.cancel();
            break;
          }
        }
      }
      let Some(sender) = lanes.get(&lane) else {
        continue;
      };

      let sent = tokio::select! {
        biased;
        _ = self.shutdown.cancelled() => break,
        sent = sender.send(record) => sent,
      };
      if sent.is_err() {
        // The partition task stopped on a fatal error; it is reported below.
        break;
      }
    }

    let cancelled = self.shutdown.is_cancelled() && failure.is_none();
    drop(lanes);

    let mut partitions = Vec::new();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok(Ok(report)) => partitions.push(report),
        Ok(Err(err)) => {
          failure.get_or_insert(err);
        }
        Err(join_err) => {
          failure.get_or_insert(WorkerError::Join(join_err.to_string()));
        }
      }
    }

    if let Some(err) = failure {
      error!(error = %err, "worker stopped");
      return Err(err);
    }

    partitions.sort_by_key(|p| (p.group, p.partition));
    let report = WorkerReport {
      partitions,
      unknown_topic,
      cancelled,
    };
    info!(
      processed = report.processed(),
      failed = report.failed(),
      unknown_topic = report.unknown_topic,
      cancelled = report.cancelled,
      "worker stopped"
    );
    Ok(report)
  }

  fn spawn_partition(
    &self,
    tasks: &mut JoinSet<Result<PartitionReport, WorkerError>>,
    group: usize,
    partition: i32,
  ) -> Result<mpsc::Sender<Record>, WorkerError> {
    let task = self
      .topology
      .instantiate(group, partition, Arc::clone(&self.producer), self.shutdown.clone())
      .map_err(|source| WorkerError::Instantiate {
        group,
        partition,
        source,
      })?;
    let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));
    tasks.spawn(run_partition(task, receiver, self.config.clone(), self.shutdown.clone()));
    Ok(sender)
  }
}

/// Feeds one partition task until its channel closes or shutdown is
/// requested, flushing periodically, then flushes and closes it.
async fn run_partition(
  mut task: PartitionTask,
  mut records: mpsc::Receiver<Record>,
  config: WorkerConfig,
  shutdown: CancellationToken,
) -> Result<PartitionReport, WorkerError> {
  let group = task.group();
  let partition = task.partition();
  let mut report = PartitionReport {
    group,
    partition,
    ..PartitionReport::default()
  };

  let mut ticker = tokio::time::interval(config.flush_interval());
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  ticker.tick().await;

  let outcome = loop {
    tokio::select! {
      biased;
      _ = shutdown.cancelled() => break Ok(()),
      _ = ticker.tick() => {
        if let Err(err) = flush_partition(&mut task, &config).await {
          break Err(err);
        }
      }
      next = records.recv() => {
        let Some(record) = next else {
          break Ok(());
        };
        match task.process(&record) {
          Ok(()) => report.processed += 1,
          Err(source) => {
            report.failed += 1;
            match config.on_error {
              ErrorAction::Skip => {
                warn!(
                  group,
                  partition,
                  topic = %record.topic,
                  offset = record.offset,
                  error = %source,
                  "record failed, skipping"
                );
              }
              ErrorAction::Stop => {
                error!(
                  group,
                  partition,
                  topic = %record.topic,
                  offset = record.offset,
                  error = %source,
                  "record failed, stopping"
                );
                break Err(WorkerError::Record {
                  group,
                  partition,
                  topic: record.topic,
                  offset: record.offset,
                  source,
                });
              }
            }
          }
        }
      }
    }
  };

  let outcome = match outcome {
    Ok(()) => flush_partition(&mut task, &config).await,
    Err(err) => {
      shutdown.cancel();
      Err(err)
    }
  };

  let closed = task.close().map_err(|source| WorkerError::Close {
    group,
    partition,
    source,
  });

  outcome.and(closed).map(|()| report)
}

/// Flushes `task`, deciding from the configuration whether a failure is fatal.
///
/// A flush interrupted by shutdown is never fatal. Otherwise `on_error` alone
/// decides, however the run ends.
async fn flush_partition(
  task: &mut PartitionTask,
  config: &WorkerConfig,
) -> Result<(), WorkerError> {
  match task.flush().await {
    Ok(()) => Ok(()),
    Err(FlushError::Cancelled { sink, pending }) => {
      warn!(
        group = task.group(),
        partition = task.partition(),
        sink = %sink,
        pending,
        "flush interrupted by shutdown"
      );
      Ok(())
    }
    Err(source) if config.on_error == ErrorAction::Skip => {
      warn!(
        group = task.group(),
        partition = task.partition(),
        error = %source,
        "flush failed, continuing"
      );
      Ok(())
    }
    Err(source) => Err(WorkerError::Flush {
      group: task.group(),
      partition: task.partition(),
      source,
    }),
  }
}
