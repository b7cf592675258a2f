//! # Error Handling
//!
//! Errors fall into four groups:
//!
//! - **Registration errors** ([`TopologyError`]): duplicate names, unknown
//!   parents or stores. Returned to the caller; the builder is left unchanged.
//! - **Build errors** ([`BuildError`]): every edge problem found by
//!   [`TopologyBuilder::build`](crate::topology::TopologyBuilder::build),
//!   reported together as one error.
//! - **Record errors** ([`ProcessError`]): decode, encode, store and user
//!   failures for one record. A failure in one branch of a fan-out never stops
//!   its siblings; see [`ForwardErrors`].
//! - **Transport errors**: submission failures, surfaced when a sink is flushed.

use crate::codec::CodecError;
use crate::store::StoreError;
use crate::topology::NodeKind;
use crate::transport::TransportError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Boxed error returned by user code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Action to take when a record fails inside a partition task.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
  /// Stop processing. The worker shuts down and reports the error.
  #[default]
  Stop,
  /// Log the failure and continue with the next record.
  Skip,
}

/// Error type for topology registration, build and instantiation.
#[derive(Error, Debug)]
pub enum TopologyError {
  /// A source, processor or sink with this name is already registered.
  #[error("node exists already: {kind} {name}")]
  NodeAlreadyExists {
    /// Kind of the node that already holds the name.
    kind: NodeKind,
    /// The contested name.
    name: String,
  },
  /// A store with this name is already registered.
  #[error("store exists already: {0}")]
  StoreAlreadyExists(String),
  /// The parent of an edge is not a registered source or processor.
  #[error("node not found: {0}")]
  NodeNotFound(String),
  /// A processor declared a store that is not registered.
  #[error("store not found: processor {processor} requires {store}")]
  StoreNotFound {
    /// The processor being registered.
    processor: String,
    /// The missing store.
    store: String,
  },
  /// The edge is already recorded.
  #[error("edge exists already: {parent} -> {child}")]
  EdgeAlreadyExists {
    /// Parent node.
    parent: String,
    /// Child node.
    child: String,
  },
  /// The topology failed validation.
  #[error(transparent)]
  Build(#[from] BuildError),
  /// A store factory or store `init` failed while instantiating a partition task.
  #[error("store {store}: {source}")]
  Store {
    /// The failing store.
    store: String,
    /// Underlying store error.
    #[source]
    source: StoreError,
  },
  /// A processor's `init` failed while instantiating a partition task.
  #[error("processor {processor}: init failed: {source}")]
  ProcessorInit {
    /// The failing processor.
    processor: String,
    /// Error returned by `init`.
    #[source]
    source: ProcessError,
  },
  /// There is no partition group with this index.
  #[error("partition group {0} does not exist")]
  InvalidGroup(usize),
  /// A built topology violated one of its own invariants.
  #[error("internal: {0}")]
  Internal(String),
}

/// Every problem found while validating a topology.
#[derive(Debug, Default)]
pub struct BuildError {
  /// The problems, in discovery order.
  pub problems: Vec<BuildProblem>,
}

impl BuildError {
  /// Returns `true` if no problem was recorded.
  pub fn is_empty(&self) -> bool {
    self.problems.is_empty()
  }
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "invalid topology ({} problem(s))", self.problems.len())?;
    for (i, problem) in self.problems.iter().enumerate() {
      let sep = if i == 0 { ": " } else { "; " };
      write!(f, "{}{}", sep, problem)?;
    }
    Ok(())
  }
}

impl std::error::Error for BuildError {}

/// One problem found by topology validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildProblem {
  /// An edge points to a name that is not a processor or sink.
  #[error("{parent} -> {child}: child does not exist")]
  UnknownChild {
    /// Parent node.
    parent: String,
    /// Missing child.
    child: String,
  },
  /// An edge points to a source; sources have no parent.
  #[error("{parent} -> {child}: child is a source")]
  SourceAsChild {
    /// Parent node.
    parent: String,
    /// Source named as child.
    child: String,
  },
  /// The parent's output types differ from the child's input types.
  #[error("{parent} -> {child}: parent produces {produces}, child expects {expects}")]
  TypeMismatch {
    /// Parent node.
    parent: String,
    /// Child node.
    child: String,
    /// Key and value types forwarded by the parent.
    produces: String,
    /// Key and value types accepted by the child.
    expects: String,
  },
  /// A sink no node forwards to.
  #[error("sink {0} has no parent")]
  SinkWithoutParent(String),
  /// A sink with more than one parent.
  #[error("sink {sink} has several parents: {}", .parents.join(", "))]
  SinkWithParents {
    /// The sink.
    sink: String,
    /// All of its parents.
    parents: Vec<String>,
  },
  /// A processor no node forwards to.
  #[error("processor {0} has no parent")]
  Orphan(String),
  /// Nodes that lie on, or downstream of, a cycle.
  #[error("cycle through {}", .0.join(", "))]
  Cycle(Vec<String>),
}

/// Error type for processing one record.
#[derive(Error, Debug)]
pub enum ProcessError {
  /// The record key could not be decoded.
  #[error("source {node}: failed to decode key: {source}")]
  KeyDecode {
    /// The source node.
    node: String,
    /// Codec failure.
    #[source]
    source: CodecError,
  },
  /// The record value could not be decoded.
  #[error("source {node}: failed to decode value: {source}")]
  ValueDecode {
    /// The source node.
    node: String,
    /// Codec failure.
    #[source]
    source: CodecError,
  },
  /// The key could not be encoded.
  #[error("sink {node}: failed to encode key: {source}")]
  KeyEncode {
    /// The sink node.
    node: String,
    /// Codec failure.
    #[source]
    source: CodecError,
  },
  /// The value could not be encoded.
  #[error("sink {node}: failed to encode value: {source}")]
  ValueEncode {
    /// The sink node.
    node: String,
    /// Codec failure.
    #[source]
    source: CodecError,
  },
  /// The transport refused the record.
  #[error("sink {node}: failed to submit to {topic}: {source}")]
  Transport {
    /// The sink node.
    node: String,
    /// Destination topic.
    topic: String,
    /// Transport failure.
    #[source]
    source: TransportError,
  },
  /// A state store failed.
  #[error(transparent)]
  Store(#[from] StoreError),
  /// One or more downstream nodes failed.
  #[error("{node}: forwarding failed: {errors}")]
  Forward {
    /// The forwarding node, or the topic when several sources share it.
    node: String,
    /// Failures keyed by downstream node name.
    errors: ForwardErrors,
  },
  /// A sink was closed holding transport failures that no flush reported.
  #[error(transparent)]
  Flush(#[from] FlushError),
  /// No source of the partition task reads this topic.
  #[error("no source reads topic {0}")]
  UnknownTopic(String),
  /// The partition task was shut down.
  #[error("{node}: cancelled")]
  Cancelled {
    /// The node that observed the cancellation.
    node: String,
  },
  /// Failure raised by user processor logic.
  #[error("{0}")]
  User(BoxError),
}

impl ProcessError {
  /// Wraps an error raised by user processor logic.
  pub fn user<E>(err: E) -> Self
  where
    E: Into<BoxError>,
  {
    Self::User(err.into())
  }
}

/// Failures of a fan-out, keyed by the name of the failing output.
#[derive(Debug, Default)]
pub struct ForwardErrors {
  errors: BTreeMap<String, ProcessError>,
}

impl ForwardErrors {
  /// Creates an empty set.
  pub fn new() -> Self {
    Self::default()
  }

  /// Records the failure of `output`, replacing an earlier failure of the same output.
  pub fn insert(&mut self, output: impl Into<String>, err: ProcessError) {
    self.errors.insert(output.into(), err);
  }

  /// Returns the failure recorded for `output`.
  pub fn get(&self, output: &str) -> Option<&ProcessError> {
    self.errors.get(output)
  }

  /// Returns the number of failing outputs.
  pub fn len(&self) -> usize {
    self.errors.len()
  }

  /// Returns `true` if no output failed.
  pub fn is_empty(&self) -> bool {
    self.errors.is_empty()
  }

  /// Iterates over failures in output-name order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &ProcessError)> {
    self.errors.iter().map(|(name, err)| (name.as_str(), err))
  }
}

impl IntoIterator for ForwardErrors {
  type Item = (String, ProcessError);
  type IntoIter = std::collections::btree_map::IntoIter<String, ProcessError>;

  fn into_iter(self) -> Self::IntoIter {
    self.errors.into_iter()
  }
}

impl fmt::Display for ForwardErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, (name, err)) in self.errors.iter().enumerate() {
      if i > 0 {
        write!(f, "; ")?;
      }
      write!(f, "[{}] {}", name, err)?;
    }
    Ok(())
  }
}

/// Error type for flushing a partition task.
#[derive(Error, Debug)]
pub enum FlushError {
  /// Shutdown was requested before all acknowledgments arrived.
  #[error("sink {sink}: cancelled with {pending} acknowledgment(s) outstanding")]
  Cancelled {
    /// The sink being flushed.
    sink: String,
    /// Acknowledgments still outstanding.
    pending: usize,
  },
  /// The transport failed one or more submitted records.
  #[error("sink {sink}: {} record(s) to {topic} failed", .failures.len())]
  Transport {
    /// The sink being flushed.
    sink: String,
    /// Destination topic.
    topic: String,
    /// Every failure, in acknowledgment order. Never empty.
    failures: Vec<TransportError>,
  },
  /// A state store failed to flush.
  #[error("store {store}: {source}")]
  Store {
    /// The failing store.
    store: String,
    /// Underlying store error.
    #[source]
    source: StoreError,
  },
}
