//! # Topology
//!
//! A [`Topology`] is the frozen result of [`TopologyBuilder::build`]: the
//! validated node descriptors, the store descriptors, and the partition groups
//! derived from them. It is immutable and shared between workers by `Arc`.
//!
//! ## Partition Group Seeds
//!
//! Groups are computed from two kinds of seeds, supplied in a stable order so
//! that group indices are reproducible:
//!
//! 1. one seed per source, in name order: its topic and every processor
//!    reachable from it
//! 2. one seed per processor, in name order: the processor and the stores it
//!    declared
//!
//! Sinks are not members of a group. A sink runs in the group of its parent.

mod builder;
mod descriptor;
mod partition_group;
mod task;

#[cfg(test)]
mod builder_test;

pub use builder::TopologyBuilder;
pub use descriptor::{
  NodeKind, PortTypes, ProcessorDescriptor, SinkDescriptor, SourceDescriptor, StoreDescriptor,
};
pub use partition_group::{PartitionGroup, merge_partition_groups};
pub use task::PartitionTask;

use crate::error::TopologyError;
use crate::processor::lock;
use crate::store::{SharedStore, StoreSet};
use crate::transport::RecordProducer;
use descriptor::{BuiltNode, LiveRole};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A validated, immutable processing graph.
pub struct Topology {
  sources: BTreeMap<String, SourceDescriptor>,
  processors: BTreeMap<String, ProcessorDescriptor>,
  sinks: BTreeMap<String, SinkDescriptor>,
  stores: BTreeMap<String, StoreDescriptor>,
  groups: Vec<PartitionGroup>,
  topic_groups: HashMap<String, usize>,
  sink_parents: BTreeMap<String, String>,
}

impl Topology {
  pub(crate) fn new(
    sources: BTreeMap<String, SourceDescriptor>,
    processors: BTreeMap<String, ProcessorDescriptor>,
    sinks: BTreeMap<String, SinkDescriptor>,
    stores: BTreeMap<String, StoreDescriptor>,
  ) -> Self {
    let mut sink_parents = BTreeMap::new();
    let edges = sources
      .values()
      .map(|s| (s.name(), s.children()))
      .chain(processors.values().map(|p| (p.name(), p.children())));
    for (parent, children) in edges {
      for child in children.iter().filter(|c| sinks.contains_key(*c)) {
        sink_parents.insert(child.clone(), parent.to_string());
      }
    }

    let mut seeds = Vec::with_capacity(sources.len() + processors.len());
    for source in sources.values() {
      seeds.push(
        PartitionGroup::new()
          .with_topic(source.topic())
          .with_processors(reachable_processors(source.children(), &processors)),
      );
    }
    for processor in processors.values() {
      seeds.push(
        PartitionGroup::new()
          .with_processor(processor.name())
          .with_stores(processor.stores().iter().cloned()),
      );
    }
    let groups = merge_partition_groups(seeds);

    let mut topic_groups = HashMap::new();
    for (index, group) in groups.iter().enumerate() {
      for topic in group.source_topics() {
        topic_groups.insert(topic.clone(), index);
      }
    }

    Self {
      sources,
      processors,
      sinks,
      stores,
      groups,
      topic_groups,
      sink_parents,
    }
  }

  /// Returns the partition groups, pairwise disjoint.
  pub fn partition_groups(&self) -> &[PartitionGroup] {
    &self.groups
  }

  /// Returns the index of the group that reads `topic`.
  pub fn group_for_topic(&self, topic: &str) -> Option<usize> {
    self.topic_groups.get(topic).copied()
  }

  /// Returns every topic read by a source.
  pub fn source_topics(&self) -> BTreeSet<&str> {
    self.sources.values().map(SourceDescriptor::topic).collect()
  }

  /// Returns every topic written by a sink.
  pub fn sink_topics(&self) -> BTreeSet<&str> {
    self.sinks.values().map(SinkDescriptor::topic).collect()
  }

  /// Returns a serializable summary of the graph and its partition groups.
  pub fn describe(&self) -> TopologyDescription {
    TopologyDescription {
      sources: self
        .sources
        .values()
        .map(|s| SourceDescription {
          name: s.name().to_string(),
          topic: s.topic().to_string(),
          children: s.children().to_vec(),
          output: s.output_types().to_string(),
        })
        .collect(),
      processors: self
        .processors
        .values()
        .map(|p| ProcessorDescription {
          name: p.name().to_string(),
          children: p.children().to_vec(),
          stores: p.stores().to_vec(),
          input: p.input_types().to_string(),
          output: p.output_types().to_string(),
        })
        .collect(),
      sinks: self
        .sinks
        .values()
        .map(|s| SinkDescription {
          name: s.name().to_string(),
          topic: s.topic().to_string(),
          input: s.input_types().to_string(),
        })
        .collect(),
      stores: self.stores.keys().cloned().collect(),
      partition_groups: self.groups.clone(),
    }
  }

  /// Builds a live instance of partition group `group` for `partition`.
  ///
  /// Every store of the group is created afresh from its factory, so no two
  /// partition tasks share a store instance. Sinks submit through `producer`
  /// and stop accepting records once `cancel` fires.
  ///
  /// # Errors
  ///
  /// - [`TopologyError::InvalidGroup`] if there is no such group
  /// - [`TopologyError::Store`] if a store factory or store `init` fails
  /// - [`TopologyError::ProcessorInit`] if a processor's `init` fails
  pub fn instantiate(
    &self,
    group: usize,
    partition: i32,
    producer: Arc<dyn RecordProducer>,
    cancel: CancellationToken,
  ) -> Result<PartitionTask, TopologyError> {
    let members = self
      .groups
      .get(group)
      .ok_or(TopologyError::InvalidGroup(group))?;

    let mut stores: BTreeMap<String, SharedStore> = BTreeMap::new();
    for name in members.stores() {
      let descriptor = self
        .stores
        .get(name)
        .ok_or_else(|| TopologyError::Internal(format!("store {name} has no descriptor")))?;
      let mut store = (descriptor.factory)().map_err(|source| TopologyError::Store {
        store: name.clone(),
        source,
      })?;
      store.init().map_err(|source| TopologyError::Store {
        store: name.clone(),
        source,
      })?;
      stores.insert(name.clone(), Arc::new(Mutex::new(store)));
    }

    let mut built: BTreeMap<&str, BuiltNode> = BTreeMap::new();
    let sources: Vec<&SourceDescriptor> = self
      .sources
      .values()
      .filter(|s| members.source_topics().contains(s.topic()))
      .collect();
    for source in &sources {
      built.insert(source.name(), (source.build)());
    }
    let processors: Vec<&ProcessorDescriptor> = members
      .processors()
      .iter()
      .map(|name| {
        self
          .processors
          .get(name)
          .ok_or_else(|| TopologyError::Internal(format!("processor {name} has no descriptor")))
      })
      .collect::<Result<_, _>>()?;
    for processor in &processors {
      built.insert(processor.name(), (processor.build)());
    }
    for (sink, parent) in &self.sink_parents {
      if built.contains_key(parent.as_str()) {
        if let Some(descriptor) = self.sinks.get(sink) {
          built.insert(descriptor.name(), (descriptor.build)(Arc::clone(&producer), cancel.clone()));
        }
      }
    }

    let edges = sources
      .iter()
      .map(|s| (s.name(), s.children(), &s.attach))
      .chain(processors.iter().map(|p| (p.name(), p.children(), &p.attach)));
    for (parent, children, attach) in edges {
      for child in children {
        let (Some(parent_node), Some(child_node)) = (built.get(parent), built.get(child.as_str())) else {
          return Err(TopologyError::Internal(format!(
            "{parent} -> {child}: child is not part of partition group {group}"
          )));
        };
        attach(parent_node, child_node, child.as_str())?;
      }
    }

    let mut task = PartitionTask::new(group, partition, cancel);
    for (_, node) in built {
      match node.role {
        LiveRole::Source(source) => {
          let topic = lock(&source).topic().to_string();
          task.add_source(topic, source);
        }
        LiveRole::Processor(processor) => task.add_processor(processor),
        LiveRole::Sink(sink) => task.add_sink(sink),
      }
    }
    for (name, store) in stores {
      task.add_store(name, store);
    }

    for processor in &processors {
      let mut declared = StoreSet::default();
      for store in processor.stores() {
        let shared = task
          .store(store)
          .ok_or_else(|| TopologyError::Internal(format!("store {store} is not part of partition group {group}")))?;
        declared.insert(store.clone(), shared);
      }
      task
        .init_processor(processor.name(), &declared)
        .map_err(|source| TopologyError::ProcessorInit {
          processor: processor.name().to_string(),
          source,
        })?;
    }

    debug!(
      group,
      partition,
      sources = sources.len(),
      processors = processors.len(),
      stores = members.stores().len(),
      "partition task instantiated"
    );
    Ok(task)
  }
}

/// Collects the processors reachable from `roots` through processor edges.
fn reachable_processors(roots: &[String], processors: &BTreeMap<String, ProcessorDescriptor>) -> BTreeSet<String> {
  let mut seen = BTreeSet::new();
  let mut queue: VecDeque<&String> = roots.iter().collect();
  while let Some(name) = queue.pop_front() {
    let Some(processor) = processors.get(name) else {
      continue;
    };
    if seen.insert(name.clone()) {
      queue.extend(processor.children());
    }
  }
  seen
}

/// Serializable summary of a [`Topology`].
#[derive(Clone, Debug, Serialize)]
pub struct TopologyDescription {
  /// Sources in name order.
  pub sources: Vec<SourceDescription>,
  /// Processors in name order.
  pub processors: Vec<ProcessorDescription>,
  /// Sinks in name order.
  pub sinks: Vec<SinkDescription>,
  /// Store names in name order.
  pub stores: Vec<String>,
  /// Partition groups, by index.
  pub partition_groups: Vec<PartitionGroup>,
}

/// Summary of one source.
#[derive(Clone, Debug, Serialize)]
pub struct SourceDescription {
  /// Node name.
  pub name: String,
  /// Topic read.
  pub topic: String,
  /// Children in registration order.
  pub children: Vec<String>,
  /// Decoded key and value types.
  pub output: String,
}

/// Summary of one processor.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessorDescription {
  /// Node name.
  pub name: String,
  /// Children in registration order.
  pub children: Vec<String>,
  /// Declared stores.
  pub stores: Vec<String>,
  /// Accepted key and value types.
  pub input: String,
  /// Forwarded key and value types.
  pub output: String,
}

/// Summary of one sink.
#[derive(Clone, Debug, Serialize)]
pub struct SinkDescription {
  /// Node name.
  pub name: String,
  /// Topic written.
  pub topic: String,
  /// Accepted key and value types.
  pub input: String,
}
