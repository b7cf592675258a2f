//! Process setup helpers.
//!
//! Topology registration returns `Result` everywhere. Setup code that cannot
//! do anything useful with a registration error may wrap each call in
//! [`must`], which logs the error and aborts the process. Never use it on a
//! request-serving path.
//!
//! ```rust,should_panic
//! use streamweave_topology::bootstrap::must;
//! use streamweave_topology::codec::StringSerde;
//! use streamweave_topology::topology::TopologyBuilder;
//!
//! let mut builder = TopologyBuilder::new();
//! must(builder.add_source("lines", "text", StringSerde, StringSerde));
//! // Name taken: panics.
//! must(builder.add_source("lines", "other", StringSerde, StringSerde));
//! ```

use std::fmt::Display;
use tracing::error;

/// Returns the success value, or logs the error and panics.
///
/// # Panics
///
/// If `result` is an `Err`.
#[track_caller]
pub fn must<T, E: Display>(result: Result<T, E>) -> T {
  match result {
    Ok(value) => value,
    Err(err) => {
      error!(error = %err, "topology setup failed");
      panic!("topology setup failed: {err}");
    }
  }
}
