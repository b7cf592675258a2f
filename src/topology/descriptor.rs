//! Node descriptors.
//!
//! A descriptor is the inert, build-time description of one node: its name,
//! the types it accepts and produces, how to build a live instance, and how
//! to attach a child to that instance.
//!
//! The topology stores every descriptor of a kind in one map, so their
//! generic parameters are erased. Types meet again at exactly two points: the
//! [`PortTypes`] comparison in `build()`, and the attach operation, which
//! downcasts the live parent and child to the concrete types recorded when
//! the parent was registered.

use crate::codec::{Deserializer, Serializer};
use crate::error::TopologyError;
use crate::processor::{Data, Lifecycle, Processor, ProcessorNode, SharedInput, lock};
use crate::sink::{Flush, SinkNode};
use crate::source::{RecordProcessor, SourceNode};
use crate::store::StoreFactory;
use crate::transport::RecordProducer;
use serde::Serialize;
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Kind of a graph node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
  /// Reads one topic.
  Source,
  /// Runs user logic.
  Processor,
  /// Writes one topic.
  Sink,
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NodeKind::Source => write!(f, "source"),
      NodeKind::Processor => write!(f, "processor"),
      NodeKind::Sink => write!(f, "sink"),
    }
  }
}

/// Key and value types on one side of a node.
#[derive(Clone, Copy, Debug)]
pub struct PortTypes {
  key: TypeId,
  value: TypeId,
  key_name: &'static str,
  value_name: &'static str,
}

impl PortTypes {
  /// Captures the types `K` and `V`.
  pub fn of<K: 'static, V: 'static>() -> Self {
    Self {
      key: TypeId::of::<K>(),
      value: TypeId::of::<V>(),
      key_name: type_name::<K>(),
      value_name: type_name::<V>(),
    }
  }

  /// Returns the readable key type name.
  pub fn key_name(&self) -> &'static str {
    self.key_name
  }

  /// Returns the readable value type name.
  pub fn value_name(&self) -> &'static str {
    self.value_name
  }
}

impl PartialEq for PortTypes {
  fn eq(&self, other: &Self) -> bool {
    self.key == other.key && self.value == other.value
  }
}

impl Eq for PortTypes {}

impl fmt::Display for PortTypes {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {})", self.key_name, self.value_name)
  }
}

/// Live facet of a built node that the partition task drives directly.
pub(crate) enum LiveRole {
  Source(Arc<Mutex<dyn RecordProcessor>>),
  Processor(Arc<Mutex<dyn Lifecycle>>),
  Sink(Arc<Mutex<dyn Flush>>),
}

/// A freshly built node, before its edges are attached.
pub(crate) struct BuiltNode {
  /// Concrete handle, downcast by the attach operation of this node.
  pub(crate) node: Box<dyn Any + Send>,
  /// `SharedInput<K, V>` for nodes that accept records from a parent.
  pub(crate) input: Option<Box<dyn Any + Send>>,
  pub(crate) role: LiveRole,
}

impl BuiltNode {
  fn input_as<K: Data, V: Data>(&self) -> Option<SharedInput<K, V>> {
    self
      .input
      .as_ref()?
      .downcast_ref::<SharedInput<K, V>>()
      .cloned()
  }
}

/// Attaches a built child to a built parent under the child's name.
pub(crate) type AttachFn = Arc<dyn Fn(&BuiltNode, &BuiltNode, &str) -> Result<(), TopologyError> + Send + Sync>;

fn attach_error(parent: &str, child: &str, expected: &str) -> TopologyError {
  TopologyError::Internal(format!("attaching {child} to {parent}: expected {expected}"))
}

/// Describes a source node.
pub struct SourceDescriptor {
  name: String,
  topic: String,
  children: Vec<String>,
  output: PortTypes,
  pub(crate) build: Arc<dyn Fn() -> BuiltNode + Send + Sync>,
  pub(crate) attach: AttachFn,
}

impl SourceDescriptor {
  pub(crate) fn new<K: Data, V: Data>(
    name: String,
    topic: String,
    key_deserializer: Arc<dyn Deserializer<Item = K>>,
    value_deserializer: Arc<dyn Deserializer<Item = V>>,
  ) -> Self {
    let build = {
      let name = name.clone();
      let topic = topic.clone();
      Arc::new(move || {
        let node = Arc::new(Mutex::new(SourceNode::new(
          name.clone(),
          topic.clone(),
          Arc::clone(&key_deserializer),
          Arc::clone(&value_deserializer),
        )));
        BuiltNode {
          role: LiveRole::Source(node.clone()),
          node: Box::new(node),
          input: None,
        }
      })
    };

    let parent_name = name.clone();
    let attach: AttachFn = Arc::new(move |parent: &BuiltNode, child: &BuiltNode, child_name: &str| {
      let parent = parent
        .node
        .downcast_ref::<Arc<Mutex<SourceNode<K, V>>>>()
        .ok_or_else(|| attach_error(&parent_name, child_name, type_name::<SourceNode<K, V>>()))?;
      let child = child
        .input_as::<K, V>()
        .ok_or_else(|| attach_error(&parent_name, child_name, type_name::<SharedInput<K, V>>()))?;
      lock(parent).add_output(child_name, child);
      Ok(())
    });

    Self {
      name,
      topic,
      children: Vec::new(),
      output: PortTypes::of::<K, V>(),
      build,
      attach,
    }
  }

  /// Returns the node name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Returns the topic the source reads.
  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// Returns the children, in registration order.
  pub fn children(&self) -> &[String] {
    &self.children
  }

  /// Returns the decoded key and value types.
  pub fn output_types(&self) -> PortTypes {
    self.output
  }

  pub(crate) fn push_child(&mut self, child: String) {
    self.children.push(child);
  }
}

/// Describes a processor node.
pub struct ProcessorDescriptor {
  name: String,
  children: Vec<String>,
  stores: Vec<String>,
  input: PortTypes,
  output: PortTypes,
  pub(crate) build: Arc<dyn Fn() -> BuiltNode + Send + Sync>,
  pub(crate) attach: AttachFn,
}

impl ProcessorDescriptor {
  pub(crate) fn new<P, F>(name: String, factory: F, stores: Vec<String>) -> Self
  where
    P: Processor + 'static,
    F: Fn() -> P + Send + Sync + 'static,
  {
    let build = {
      let name = name.clone();
      Arc::new(move || {
        let node = Arc::new(Mutex::new(ProcessorNode::new(name.clone(), factory())));
        let input: SharedInput<P::KeyIn, P::ValueIn> = node.clone();
        BuiltNode {
          role: LiveRole::Processor(node.clone()),
          node: Box::new(node),
          input: Some(Box::new(input)),
        }
      })
    };

    let parent_name = name.clone();
    let attach: AttachFn = Arc::new(move |parent: &BuiltNode, child: &BuiltNode, child_name: &str| {
      let parent = parent
        .node
        .downcast_ref::<Arc<Mutex<ProcessorNode<P>>>>()
        .ok_or_else(|| attach_error(&parent_name, child_name, type_name::<ProcessorNode<P>>()))?;
      let child = child.input_as::<P::KeyOut, P::ValueOut>().ok_or_else(|| {
        attach_error(
          &parent_name,
          child_name,
          type_name::<SharedInput<P::KeyOut, P::ValueOut>>(),
        )
      })?;
      lock(parent).add_output(child_name, child);
      Ok(())
    });

    Self {
      name,
      children: Vec::new(),
      stores,
      input: PortTypes::of::<P::KeyIn, P::ValueIn>(),
      output: PortTypes::of::<P::KeyOut, P::ValueOut>(),
      build,
      attach,
    }
  }

  /// Returns the node name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Returns the children, in registration order.
  pub fn children(&self) -> &[String] {
    &self.children
  }

  /// Returns the names of the stores the processor requires.
  pub fn stores(&self) -> &[String] {
    &self.stores
  }

  /// Returns the key and value types the processor accepts.
  pub fn input_types(&self) -> PortTypes {
    self.input
  }

  /// Returns the key and value types the processor forwards.
  pub fn output_types(&self) -> PortTypes {
    self.output
  }

  pub(crate) fn push_child(&mut self, child: String) {
    self.children.push(child);
  }
}

/// Builds a live sink bound to a producer and a cancellation token.
pub(crate) type SinkBuildFn = Arc<dyn Fn(Arc<dyn RecordProducer>, CancellationToken) -> BuiltNode + Send + Sync>;

/// Describes a sink node.
pub struct SinkDescriptor {
  name: String,
  topic: String,
  input: PortTypes,
  pub(crate) build: SinkBuildFn,
}

impl SinkDescriptor {
  pub(crate) fn new<K: Data, V: Data>(
    name: String,
    topic: String,
    key_serializer: Arc<dyn Serializer<Item = K>>,
    value_serializer: Arc<dyn Serializer<Item = V>>,
  ) -> Self {
    let build: SinkBuildFn = {
      let name = name.clone();
      let topic = topic.clone();
      Arc::new(move |producer: Arc<dyn RecordProducer>, cancel: CancellationToken| {
        let node = Arc::new(Mutex::new(SinkNode::new(
          name.clone(),
          topic.clone(),
          Arc::clone(&key_serializer),
          Arc::clone(&value_serializer),
          producer,
          cancel,
        )));
        let input: SharedInput<K, V> = node.clone();
        BuiltNode {
          role: LiveRole::Sink(node.clone()),
          node: Box::new(node),
          input: Some(Box::new(input)),
        }
      })
    };

    Self {
      name,
      topic,
      input: PortTypes::of::<K, V>(),
      build,
    }
  }

  /// Returns the node name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Returns the topic the sink writes.
  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// Returns the key and value types the sink accepts.
  pub fn input_types(&self) -> PortTypes {
    self.input
  }
}

/// Describes a state store.
pub struct StoreDescriptor {
  name: String,
  pub(crate) factory: StoreFactory,
}

impl StoreDescriptor {
  pub(crate) fn new(name: String, factory: StoreFactory) -> Self {
    Self { name, factory }
  }

  /// Returns the store name.
  pub fn name(&self) -> &str {
    &self.name
  }
}
