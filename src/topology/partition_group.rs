//! # Partition Groups
//!
//! A partition group is a set of source topics, processors and stores that
//! must run together on one partition. Two dependency sets that share any
//! member, be it a topic, a processor or a store, end up in the same group.
//!
//! ## Merge Order
//!
//! [`merge_partition_groups`] merges pairwise until no two groups overlap. The
//! resulting partition of members does not depend on the input order, but the
//! order of the resulting groups does: each merge folds the later group into
//! the earlier one, so a group keeps the position of its earliest seed.
//! Callers that need reproducible group indices must supply seeds in a stable
//! order.

use serde::Serialize;
use std::collections::BTreeSet;

/// Source topics, processors and stores that must be co-located.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PartitionGroup {
  source_topics: BTreeSet<String>,
  processors: BTreeSet<String>,
  stores: BTreeSet<String>,
}

impl PartitionGroup {
  /// Creates an empty group.
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a source topic.
  #[must_use]
  pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
    self.source_topics.insert(topic.into());
    self
  }

  /// Adds a processor.
  #[must_use]
  pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
    self.processors.insert(processor.into());
    self
  }

  /// Adds a store.
  #[must_use]
  pub fn with_store(mut self, store: impl Into<String>) -> Self {
    self.stores.insert(store.into());
    self
  }

  /// Adds several processors.
  #[must_use]
  pub fn with_processors<I, S>(mut self, processors: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.processors.extend(processors.into_iter().map(Into::into));
    self
  }

  /// Adds several stores.
  #[must_use]
  pub fn with_stores<I, S>(mut self, stores: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.stores.extend(stores.into_iter().map(Into::into));
    self
  }

  /// Returns the source topics.
  pub fn source_topics(&self) -> &BTreeSet<String> {
    &self.source_topics
  }

  /// Returns the processor names.
  pub fn processors(&self) -> &BTreeSet<String> {
    &self.processors
  }

  /// Returns the store names.
  pub fn stores(&self) -> &BTreeSet<String> {
    &self.stores
  }

  /// Returns `true` if the group has no member.
  pub fn is_empty(&self) -> bool {
    self.source_topics.is_empty() && self.processors.is_empty() && self.stores.is_empty()
  }

  /// Returns `true` if the two groups share a topic, a processor or a store.
  pub fn overlaps(&self, other: &PartitionGroup) -> bool {
    !self.source_topics.is_disjoint(&other.source_topics)
      || !self.processors.is_disjoint(&other.processors)
      || !self.stores.is_disjoint(&other.stores)
  }

  /// Moves every member of `other` into `self`.
  pub fn absorb(&mut self, other: PartitionGroup) {
    self.source_topics.extend(other.source_topics);
    self.processors.extend(other.processors);
    self.stores.extend(other.stores);
  }
}

/// Merges overlapping groups until all groups are pairwise disjoint.
///
/// The union of all members is preserved. Running the merge again on its own
/// output returns the output unchanged.
pub fn merge_partition_groups(mut groups: Vec<PartitionGroup>) -> Vec<PartitionGroup> {
  while let Some((keep, fold)) = first_overlap(&groups) {
    let folded = groups.remove(fold);
    groups[keep].absorb(folded);
  }
  groups
}

/// Finds the first overlapping pair in scan order. The first index is always
/// the lower one: any overlap with an earlier group would have been found
/// while scanning that group.
fn first_overlap(groups: &[PartitionGroup]) -> Option<(usize, usize)> {
  for (i, group) in groups.iter().enumerate() {
    for (j, other) in groups.iter().enumerate().skip(i + 1) {
      if group.overlaps(other) {
        return Some((i, j));
      }
    }
  }
  None
}
