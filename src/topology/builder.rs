//! # TopologyBuilder
//!
//! Registry of node descriptors and the edges between them.
//!
//! ## Naming
//!
//! Sources, processors and sinks share one namespace: a name can be used by
//! at most one node, whatever its kind. Stores have a namespace of their own,
//! so a processor and the store it owns may carry the same name.
//!
//! ## Validation
//!
//! Registration checks everything it can see locally (unique names, known
//! stores, known parents) before touching the registry, so a failed call
//! leaves the builder exactly as it was. Checks that need the whole graph
//! (child existence, type compatibility, sink parents, cycles) run in
//! [`build`](TopologyBuilder::build), which reports every problem at once.

use crate::codec::{Deserializer, Serializer};
use crate::error::{BuildError, BuildProblem, TopologyError};
use crate::processor::{Data, Processor};
use crate::store::{Store, StoreError};
use crate::topology::Topology;
use crate::topology::descriptor::{
  NodeKind, PortTypes, ProcessorDescriptor, SinkDescriptor, SourceDescriptor, StoreDescriptor,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Builder for a [`Topology`].
///
/// # Example
///
/// ```rust,no_run
/// use streamweave_topology::codec::{I64Serde, StringSerde};
/// use streamweave_topology::store::MemoryStore;
/// use streamweave_topology::topology::TopologyBuilder;
/// # use streamweave_topology::processor::{Processor, ProcessorContext};
/// # use streamweave_topology::error::ProcessError;
/// # struct Count;
/// # impl Processor for Count {
/// #   type KeyIn = String; type ValueIn = String; type KeyOut = String; type ValueOut = i64;
/// #   fn process(&mut self, _: &mut ProcessorContext<String, i64>, _: String, _: String) -> Result<(), ProcessError> { Ok(()) }
/// # }
///
/// let mut builder = TopologyBuilder::new();
/// builder.add_store("counts", MemoryStore::factory("counts"))?;
/// builder.add_source("lines", "text", StringSerde, StringSerde)?;
/// builder.register_processor("count", || Count, "lines", &["counts"])?;
/// builder.register_sink("out", "word-counts", StringSerde, I64Serde, "count")?;
/// let topology = builder.build()?;
/// # Ok::<(), streamweave_topology::error::TopologyError>(())
/// ```
#[derive(Default)]
pub struct TopologyBuilder {
  sources: BTreeMap<String, SourceDescriptor>,
  processors: BTreeMap<String, ProcessorDescriptor>,
  sinks: BTreeMap<String, SinkDescriptor>,
  stores: BTreeMap<String, StoreDescriptor>,
}

impl TopologyBuilder {
  /// Creates an empty builder.
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the kind of the node registered as `name`.
  pub fn node_kind(&self, name: &str) -> Option<NodeKind> {
    if self.sources.contains_key(name) {
      Some(NodeKind::Source)
    } else if self.processors.contains_key(name) {
      Some(NodeKind::Processor)
    } else if self.sinks.contains_key(name) {
      Some(NodeKind::Sink)
    } else {
      None
    }
  }

  fn ensure_free(&self, name: &str) -> Result<(), TopologyError> {
    match self.node_kind(name) {
      Some(kind) => Err(TopologyError::NodeAlreadyExists {
        kind,
        name: name.to_string(),
      }),
      None => Ok(()),
    }
  }

  fn ensure_parent(&self, parent: &str) -> Result<(), TopologyError> {
    if self.sources.contains_key(parent) || self.processors.contains_key(parent) {
      Ok(())
    } else {
      Err(TopologyError::NodeNotFound(parent.to_string()))
    }
  }

  /// Registers a state store.
  ///
  /// # Errors
  ///
  /// [`TopologyError::StoreAlreadyExists`] if the name is taken.
  pub fn add_store<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), TopologyError>
  where
    F: Fn() -> Result<Box<dyn Store>, StoreError> + Send + Sync + 'static,
  {
    let name = name.into();
    if self.stores.contains_key(&name) {
      return Err(TopologyError::StoreAlreadyExists(name));
    }
    debug!(store = %name, "registering store");
    self
      .stores
      .insert(name.clone(), StoreDescriptor::new(name, Arc::new(factory)));
    Ok(())
  }

  /// Registers a source reading `topic`.
  ///
  /// # Errors
  ///
  /// [`TopologyError::NodeAlreadyExists`] if the name is taken.
  pub fn add_source<KD, VD>(
    &mut self,
    name: impl Into<String>,
    topic: impl Into<String>,
    key_deserializer: KD,
    value_deserializer: VD,
  ) -> Result<(), TopologyError>
  where
    KD: Deserializer + 'static,
    VD: Deserializer + 'static,
    KD::Item: Data,
    VD::Item: Data,
  {
    let name = name.into();
    let topic = topic.into();
    self.ensure_free(&name)?;
    debug!(node = %name, topic = %topic, "registering source");
    let descriptor = SourceDescriptor::new::<KD::Item, VD::Item>(
      name.clone(),
      topic,
      Arc::new(key_deserializer),
      Arc::new(value_deserializer),
    );
    self.sources.insert(name, descriptor);
    Ok(())
  }

  /// Registers a sink writing to `topic`. Its parent is set with
  /// [`set_parent`](Self::set_parent).
  ///
  /// # Errors
  ///
  /// [`TopologyError::NodeAlreadyExists`] if the name is taken.
  pub fn add_sink<KS, VS>(
    &mut self,
    name: impl Into<String>,
    topic: impl Into<String>,
    key_serializer: KS,
    value_serializer: VS,
  ) -> Result<(), TopologyError>
  where
    KS: Serializer + 'static,
    VS: Serializer + 'static,
    KS::Item: Data,
    VS::Item: Data,
  {
    let name = name.into();
    let topic = topic.into();
    self.ensure_free(&name)?;
    debug!(node = %name, topic = %topic, "registering sink");
    let descriptor = SinkDescriptor::new::<KS::Item, VS::Item>(
      name.clone(),
      topic,
      Arc::new(key_serializer),
      Arc::new(value_serializer),
    );
    self.sinks.insert(name, descriptor);
    Ok(())
  }

  /// Registers a processor built by `factory`, requiring `stores`.
  ///
  /// # Errors
  ///
  /// - [`TopologyError::NodeAlreadyExists`] if the name is taken
  /// - [`TopologyError::StoreNotFound`] if a store is not registered
  ///
  /// The builder is unchanged on error.
  pub fn add_processor<P, F>(
    &mut self,
    name: impl Into<String>,
    factory: F,
    stores: &[&str],
  ) -> Result<(), TopologyError>
  where
    P: Processor + 'static,
    F: Fn() -> P + Send + Sync + 'static,
  {
    let name = name.into();
    self.ensure_free(&name)?;
    if let Some(missing) = stores.iter().find(|s| !self.stores.contains_key(**s)) {
      return Err(TopologyError::StoreNotFound {
        processor: name,
        store: missing.to_string(),
      });
    }

    let mut declared: Vec<String> = Vec::with_capacity(stores.len());
    for store in stores {
      if !declared.iter().any(|s| s == store) {
        declared.push(store.to_string());
      }
    }

    debug!(node = %name, stores = ?declared, "registering processor");
    let descriptor = ProcessorDescriptor::new(name.clone(), factory, declared);
    self.processors.insert(name, descriptor);
    Ok(())
  }

  /// Records the edge `parent -> child`.
  ///
  /// Whether `child` exists and accepts the parent's output types is checked
  /// by [`build`](Self::build).
  ///
  /// # Errors
  ///
  /// - [`TopologyError::NodeNotFound`] if `parent` is not a source or processor
  /// - [`TopologyError::EdgeAlreadyExists`] if the edge is already recorded
  pub fn set_parent(&mut self, parent: &str, child: &str) -> Result<(), TopologyError> {
    let children = if let Some(source) = self.sources.get(parent) {
      source.children()
    } else if let Some(processor) = self.processors.get(parent) {
      processor.children()
    } else {
      return Err(TopologyError::NodeNotFound(parent.to_string()));
    };

    if children.iter().any(|c| c == child) {
      return Err(TopologyError::EdgeAlreadyExists {
        parent: parent.to_string(),
        child: child.to_string(),
      });
    }

    debug!(parent = %parent, child = %child, "adding edge");
    if let Some(source) = self.sources.get_mut(parent) {
      source.push_child(child.to_string());
    } else if let Some(processor) = self.processors.get_mut(parent) {
      processor.push_child(child.to_string());
    }
    Ok(())
  }

  /// Registers a processor and makes it a child of `parent`.
  ///
  /// # Errors
  ///
  /// Any error of [`add_processor`](Self::add_processor), or
  /// [`TopologyError::NodeNotFound`] if `parent` is unknown. The builder is
  /// unchanged on error.
  pub fn register_processor<P, F>(
    &mut self,
    name: impl Into<String>,
    factory: F,
    parent: &str,
    stores: &[&str],
  ) -> Result<(), TopologyError>
  where
    P: Processor + 'static,
    F: Fn() -> P + Send + Sync + 'static,
  {
    let name = name.into();
    self.ensure_parent(parent)?;
    self.add_processor(name.clone(), factory, stores)?;
    self.set_parent(parent, &name)
  }

  /// Registers a sink and makes it the child of `parent`.
  ///
  /// # Errors
  ///
  /// Any error of [`add_sink`](Self::add_sink), or
  /// [`TopologyError::NodeNotFound`] if `parent` is unknown. The builder is
  /// unchanged on error.
  pub fn register_sink<KS, VS>(
    &mut self,
    name: impl Into<String>,
    topic: impl Into<String>,
    key_serializer: KS,
    value_serializer: VS,
    parent: &str,
  ) -> Result<(), TopologyError>
  where
    KS: Serializer + 'static,
    VS: Serializer + 'static,
    KS::Item: Data,
    VS::Item: Data,
  {
    let name = name.into();
    self.ensure_parent(parent)?;
    self.add_sink(name.clone(), topic, key_serializer, value_serializer)?;
    self.set_parent(parent, &name)
  }

  /// Returns the source registered as `name`.
  pub fn source(&self, name: &str) -> Option<&SourceDescriptor> {
    self.sources.get(name)
  }

  /// Returns the processor registered as `name`.
  pub fn processor(&self, name: &str) -> Option<&ProcessorDescriptor> {
    self.processors.get(name)
  }

  /// Returns the sink registered as `name`.
  pub fn sink(&self, name: &str) -> Option<&SinkDescriptor> {
    self.sinks.get(name)
  }

  /// Returns the store registered as `name`.
  pub fn store(&self, name: &str) -> Option<&StoreDescriptor> {
    self.stores.get(name)
  }

  /// Iterates over every edge as (parent, parent output types, child).
  fn edges(&self) -> impl Iterator<Item = (&str, PortTypes, &str)> {
    let from_sources = self
      .sources
      .values()
      .flat_map(|s| s.children().iter().map(move |c| (s.name(), s.output_types(), c.as_str())));
    let from_processors = self
      .processors
      .values()
      .flat_map(|p| p.children().iter().map(move |c| (p.name(), p.output_types(), c.as_str())));
    from_sources.chain(from_processors)
  }

  fn validate(&self) -> BuildError {
    let mut problems = Vec::new();
    let mut parents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (parent, produces, child) in self.edges() {
      let expects = if let Some(processor) = self.processors.get(child) {
        processor.input_types()
      } else if let Some(sink) = self.sinks.get(child) {
        sink.input_types()
      } else if self.sources.contains_key(child) {
        problems.push(BuildProblem::SourceAsChild {
          parent: parent.to_string(),
          child: child.to_string(),
        });
        continue;
      } else {
        problems.push(BuildProblem::UnknownChild {
          parent: parent.to_string(),
          child: child.to_string(),
        });
        continue;
      };

      parents.entry(child).or_default().push(parent);
      if produces != expects {
        problems.push(BuildProblem::TypeMismatch {
          parent: parent.to_string(),
          child: child.to_string(),
          produces: produces.to_string(),
          expects: expects.to_string(),
        });
      }
    }

    for sink in self.sinks.keys() {
      match parents.get(sink.as_str()) {
        None => problems.push(BuildProblem::SinkWithoutParent(sink.clone())),
        Some(p) if p.len() > 1 => problems.push(BuildProblem::SinkWithParents {
          sink: sink.clone(),
          parents: p.iter().map(|s| s.to_string()).collect(),
        }),
        Some(_) => {}
      }
    }

    for processor in self.processors.keys() {
      if !parents.contains_key(processor.as_str()) {
        problems.push(BuildProblem::Orphan(processor.clone()));
      }
    }

    if let Some(cycle) = self.find_cycle() {
      problems.push(BuildProblem::Cycle(cycle));
    }

    BuildError { problems }
  }

  /// Runs Kahn's algorithm over the processor subgraph. Processors left with
  /// unresolved parents lie on, or downstream of, a cycle.
  ///
  /// Sources have no parent and sinks no children, so neither can be part of
  /// a cycle.
  fn find_cycle(&self) -> Option<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = self.processors.keys().map(|p| (p.as_str(), 0)).collect();
    for processor in self.processors.values() {
      for child in processor.children() {
        if let Some(degree) = in_degree.get_mut(child.as_str()) {
          *degree += 1;
        }
      }
    }

    let mut queue: VecDeque<&str> = in_degree
      .iter()
      .filter(|(_, d)| **d == 0)
      .map(|(name, _)| *name)
      .collect();
    let mut resolved: BTreeSet<&str> = BTreeSet::new();

    while let Some(name) = queue.pop_front() {
      resolved.insert(name);
      let Some(processor) = self.processors.get(name) else {
        continue;
      };
      for child in processor.children() {
        if let Some(degree) = in_degree.get_mut(child.as_str()) {
          *degree -= 1;
          if *degree == 0 {
            queue.push_back(child.as_str());
          }
        }
      }
    }

    let remaining: Vec<String> = in_degree
      .keys()
      .filter(|name| !resolved.contains(*name))
      .map(|name| name.to_string())
      .collect();
    if remaining.is_empty() { None } else { Some(remaining) }
  }

  /// Validates the graph and freezes it into a [`Topology`].
  ///
  /// # Errors
  ///
  /// [`TopologyError::Build`] listing every problem found: unknown children,
  /// sources used as children, key/value type mismatches, sinks without
  /// exactly one parent, processors without a parent, cycles.
  pub fn build(self) -> Result<Topology, TopologyError> {
    let problems = self.validate();
    if !problems.is_empty() {
      return Err(problems.into());
    }

    let topology = Topology::new(self.sources, self.processors, self.sinks, self.stores);
    debug!(
      groups = topology.partition_groups().len(),
      "topology built"
    );
    Ok(topology)
  }
}
