//! # Processors and Forwarding
//!
//! A [`Processor`] is user logic: it receives one key/value pair at a time and
//! forwards zero or more results through its [`ProcessorContext`]. The
//! context fans each forwarded pair out to every downstream node, in output
//! name order, synchronously.
//!
//! ## Partial Failure
//!
//! Each downstream call is independent. If one output fails, its error is
//! recorded under that output's name and the remaining outputs are still
//! invoked. After the user logic returns, the enclosing [`ProcessorNode`]
//! drains the recorded failures and reports them as a single
//! [`ProcessError::Forward`].
//!
//! ## Example
//!
//! ```rust
//! use streamweave_topology::error::ProcessError;
//! use streamweave_topology::processor::{Processor, ProcessorContext};
//!
//! /// Splits a line into (word, 1) pairs.
//! struct Split;
//!
//! impl Processor for Split {
//!   type KeyIn = String;
//!   type ValueIn = String;
//!   type KeyOut = String;
//!   type ValueOut = i64;
//!
//!   fn process(
//!     &mut self,
//!     ctx: &mut ProcessorContext<String, i64>,
//!     _key: String,
//!     line: String,
//!   ) -> Result<(), ProcessError> {
//!     for word in line.split_whitespace() {
//!       ctx.forward(word.to_lowercase(), 1);
//!     }
//!     Ok(())
//!   }
//! }
//! ```

use crate::error::{ForwardErrors, ProcessError};
use crate::store::StoreSet;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

/// Bound for keys and values flowing between nodes.
///
/// Fan-out hands every output its own copy, so data must be `Clone`.
pub trait Data: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> Data for T {}

/// A node that accepts typed key/value pairs.
pub trait InputProcessor<K, V>: Send {
  /// Processes one pair.
  fn process(&mut self, key: K, value: V) -> Result<(), ProcessError>;
}

/// Input-facing handle to a live node, as stored in a parent's outputs.
pub type SharedInput<K, V> = Arc<Mutex<dyn InputProcessor<K, V>>>;

/// User processing logic.
///
/// One instance is created per partition task by the factory given to
/// [`TopologyBuilder::add_processor`](crate::topology::TopologyBuilder::add_processor).
pub trait Processor: Send {
  /// Key type received from the parent.
  type KeyIn: Data;
  /// Value type received from the parent.
  type ValueIn: Data;
  /// Key type forwarded to children.
  type KeyOut: Data;
  /// Value type forwarded to children.
  type ValueOut: Data;

  /// Called once before the first record, with the stores the processor declared.
  fn init(&mut self, _stores: &StoreSet) -> Result<(), ProcessError> {
    Ok(())
  }

  /// Processes one pair, forwarding results through `ctx`.
  fn process(
    &mut self,
    ctx: &mut ProcessorContext<Self::KeyOut, Self::ValueOut>,
    key: Self::KeyIn,
    value: Self::ValueIn,
  ) -> Result<(), ProcessError>;

  /// Called once when the partition task closes.
  fn close(&mut self) -> Result<(), ProcessError> {
    Ok(())
  }
}

/// Forwarding context handed to user logic.
pub struct ProcessorContext<K, V> {
  outputs: BTreeMap<String, SharedInput<K, V>>,
  errors: ForwardErrors,
}

impl<K: Data, V: Data> ProcessorContext<K, V> {
  /// Creates a context without outputs.
  pub fn new() -> Self {
    Self {
      outputs: BTreeMap::new(),
      errors: ForwardErrors::new(),
    }
  }

  /// Registers a downstream node under `name`, replacing any output of that name.
  pub fn add_output(&mut self, name: impl Into<String>, output: SharedInput<K, V>) {
    self.outputs.insert(name.into(), output);
  }

  /// Returns the names of the registered outputs, in forwarding order.
  pub fn output_names(&self) -> impl Iterator<Item = &str> {
    self.outputs.keys().map(String::as_str)
  }

  /// Sends the pair to every output.
  ///
  /// Outputs are invoked one after the other; a failing output is recorded
  /// and does not stop the others. See [`errors`](Self::errors).
  pub fn forward(&mut self, key: K, value: V) {
    for (name, output) in &self.outputs {
      trace!(output = %name, "forwarding record");
      if let Err(err) = lock(output).process(key.clone(), value.clone()) {
        self.errors.insert(name.clone(), err);
      }
    }
  }

  /// Returns the failures recorded since the last [`take_errors`](Self::take_errors).
  pub fn errors(&self) -> &ForwardErrors {
    &self.errors
  }

  /// Returns and clears the recorded failures.
  pub fn take_errors(&mut self) -> ForwardErrors {
    std::mem::take(&mut self.errors)
  }
}

impl<K: Data, V: Data> Default for ProcessorContext<K, V> {
  fn default() -> Self {
    Self::new()
  }
}

/// Lifecycle of a live processor, independent of its key/value types.
pub(crate) trait Lifecycle: Send {
  fn name(&self) -> &str;
  fn init(&mut self, stores: &StoreSet) -> Result<(), ProcessError>;
  fn close(&mut self) -> Result<(), ProcessError>;
}

/// Runtime counterpart of a processor descriptor.
pub struct ProcessorNode<P: Processor> {
  name: String,
  processor: P,
  context: ProcessorContext<P::KeyOut, P::ValueOut>,
}

impl<P: Processor> ProcessorNode<P> {
  /// Wraps a user processor.
  pub fn new(name: impl Into<String>, processor: P) -> Self {
    Self {
      name: name.into(),
      processor,
      context: ProcessorContext::new(),
    }
  }

  /// Returns the node name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Registers a downstream node.
  pub fn add_output(&mut self, name: impl Into<String>, output: SharedInput<P::KeyOut, P::ValueOut>) {
    self.context.add_output(name, output);
  }
}

impl<P: Processor> InputProcessor<P::KeyIn, P::ValueIn> for ProcessorNode<P> {
  fn process(&mut self, key: P::KeyIn, value: P::ValueIn) -> Result<(), ProcessError> {
    let result = self.processor.process(&mut self.context, key, value);
    let errors = self.context.take_errors();

    if let Err(err) = result {
      for (output, forward_err) in errors.iter() {
        warn!(
          node = %self.name,
          output = %output,
          error = %forward_err,
          "discarding forward error, processor failed"
        );
      }
      return Err(err);
    }

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

impl<P: Processor> Lifecycle for ProcessorNode<P> {
  fn name(&self) -> &str {
    &self.name
  }

  fn init(&mut self, stores: &StoreSet) -> Result<(), ProcessError> {
    self.processor.init(stores)
  }

  fn close(&mut self) -> Result<(), ProcessError> {
    self.processor.close()
  }
}

/// Locks a node, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
