//! # streamweave-topology
//!
//! Keyed stream-processing topologies over a partitioned log.
//!
//! A topology is a directed graph of named nodes:
//!
//! - **Sources** decode raw records from one topic into typed key/value pairs
//! - **Processors** run user logic and forward zero or more results downstream
//! - **Sinks** encode key/value pairs and submit them to a destination topic
//!
//! Processors may declare state stores by name. Everything that shares a source
//! topic, a processor or a store must run on the same partition, so
//! [`TopologyBuilder::build`](topology::TopologyBuilder::build) merges those
//! dependencies into disjoint [`PartitionGroup`]s. At run time each
//! (partition group, partition) pair becomes one [`PartitionTask`], driven in
//! arrival order by the [`Worker`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use streamweave_topology::codec::StringSerde;
//! use streamweave_topology::processor::{Processor, ProcessorContext};
//! use streamweave_topology::error::ProcessError;
//! use streamweave_topology::topology::TopologyBuilder;
//!
//! struct Upper;
//!
//! impl Processor for Upper {
//!   type KeyIn = String;
//!   type ValueIn = String;
//!   type KeyOut = String;
//!   type ValueOut = String;
//!
//!   fn process(
//!     &mut self,
//!     ctx: &mut ProcessorContext<String, String>,
//!     key: String,
//!     value: String,
//!   ) -> Result<(), ProcessError> {
//!     ctx.forward(key, value.to_uppercase());
//!     Ok(())
//!   }
//! }
//!
//! let mut builder = TopologyBuilder::new();
//! builder.add_source("input", "words", StringSerde, StringSerde)?;
//! builder.register_processor("upper", || Upper, "input", &[])?;
//! builder.register_sink("output", "shouted", StringSerde, StringSerde, "upper")?;
//! let topology = builder.build()?;
//! # Ok::<(), streamweave_topology::error::TopologyError>(())
//! ```

#![deny(missing_docs)]

/// Setup-time helpers that abort on registration errors.
pub mod bootstrap;
/// Key/value codec capabilities and built-in codecs.
pub mod codec;
/// Error types shared by the builder and runtime nodes.
pub mod error;
/// User processors, the forwarding context and processor runtime nodes.
pub mod processor;
/// Raw records exchanged with the partitioned log.
pub mod record;
/// Async driver running partition tasks over a record stream.
pub mod runtime;
/// Sink runtime node.
pub mod sink;
/// Source runtime node.
pub mod source;
/// Keyed state store contract and in-memory store.
pub mod store;
/// Topology builder, descriptors, partition groups and partition tasks.
pub mod topology;
/// Outbound transport capability.
pub mod transport;

pub use error::{ForwardErrors, ProcessError, TopologyError};
pub use processor::{Processor, ProcessorContext};
pub use record::Record;
pub use runtime::{Worker, WorkerConfig};
pub use topology::{PartitionGroup, PartitionTask, Topology, TopologyBuilder};

#[cfg(test)]
mod error_test;
#[cfg(test)]
mod store_test;
