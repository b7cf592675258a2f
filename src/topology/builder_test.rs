//! # TopologyBuilder Test Suite
//!
//! Covers registration errors, validate-then-commit behaviour, the aggregated
//! build validation, and the partition groups of built topologies.

use crate::codec::{I64Serde, StringSerde};
use crate::error::{BuildProblem, ProcessError, TopologyError};
use crate::processor::{Processor, ProcessorContext};
use crate::store::MemoryStore;
use crate::topology::{NodeKind, PartitionGroup, TopologyBuilder};
use std::marker::PhantomData;

/// Forwards every pair unchanged.
struct Pass<K, V>(PhantomData<fn() -> (K, V)>);

fn pass<K, V>() -> Pass<K, V> {
  Pass(PhantomData)
}

impl<K: Clone + Send + 'static, V: Clone + Send + 'static> Processor for Pass<K, V> {
  type KeyIn = K;
  type ValueIn = V;
  type KeyOut = K;
  type ValueOut = V;

  fn process(&mut self, ctx: &mut ProcessorContext<K, V>, key: K, value: V) -> Result<(), ProcessError> {
    ctx.forward(key, value);
    Ok(())
  }
}

/// Parses string values into integers.
struct Parse;

impl Processor for Parse {
  type KeyIn = String;
  type ValueIn = String;
  type KeyOut = String;
  type ValueOut = i64;

  fn process(
    &mut self,
    ctx: &mut ProcessorContext<String, i64>,
    key: String,
    value: String,
  ) -> Result<(), ProcessError> {
    let parsed = value.trim().parse::<i64>().map_err(ProcessError::user)?;
    ctx.forward(key, parsed);
    Ok(())
  }
}

fn strings() -> fn() -> Pass<String, String> {
  pass::<String, String>
}

fn problems(err: TopologyError) -> Vec<BuildProblem> {
  match err {
    TopologyError::Build(build) => build.problems,
    other => panic!("expected build error, got {other}"),
  }
}

#[test]
fn test_duplicate_processor_keeps_original() {
  let mut builder = TopologyBuilder::new();
  builder.add_store("s1", MemoryStore::factory("s1")).unwrap();
  builder.add_processor("p", strings(), &["s1"]).unwrap();

  let err = builder.add_processor("p", || Parse, &[]).unwrap_err();
  assert!(matches!(
    err,
    TopologyError::NodeAlreadyExists {
      kind: NodeKind::Processor,
      ..
    }
  ));

  let kept = builder.processor("p").unwrap();
  assert_eq!(kept.stores(), ["s1".to_string()]);
  assert_eq!(kept.output_types().value_name(), std::any::type_name::<String>());
}

#[test]
fn test_names_are_shared_across_node_kinds() {
  let mut builder = TopologyBuilder::new();
  builder.add_source("n", "t", StringSerde, StringSerde).unwrap();

  let err = builder.add_processor("n", strings(), &[]).unwrap_err();
  assert!(matches!(err, TopologyError::NodeAlreadyExists { kind: NodeKind::Source, .. }));
  let err = builder.add_sink("n", "out", StringSerde, StringSerde).unwrap_err();
  assert!(matches!(err, TopologyError::NodeAlreadyExists { .. }));
  let err = builder.add_source("n", "t2", StringSerde, StringSerde).unwrap_err();
  assert!(matches!(err, TopologyError::NodeAlreadyExists { .. }));

  builder.add_sink("k", "out", StringSerde, StringSerde).unwrap();
  let err = builder.add_sink("k", "out", StringSerde, StringSerde).unwrap_err();
  assert!(matches!(err, TopologyError::NodeAlreadyExists { kind: NodeKind::Sink, .. }));
}

#[test]
fn test_store_namespace_is_separate() {
  let mut builder = TopologyBuilder::new();
  builder.add_store("counts", MemoryStore::factory("counts")).unwrap();
  builder.add_processor("counts", strings(), &["counts"]).unwrap();

  let err = builder
    .add_store("counts", MemoryStore::factory("counts"))
    .unwrap_err();
  assert!(matches!(err, TopologyError::StoreAlreadyExists(ref name) if name == "counts"));
}

#[test]
fn test_unknown_store_leaves_builder_unchanged() {
  let mut builder = TopologyBuilder::new();
  builder.add_store("s1", MemoryStore::factory("s1")).unwrap();

  let err = builder.add_processor("p", strings(), &["s1", "missing"]).unwrap_err();
  match err {
    TopologyError::StoreNotFound { processor, store } => {
      assert_eq!(processor, "p");
      assert_eq!(store, "missing");
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(builder.processor("p").is_none());

  // The name is still free.
  builder.add_processor("p", strings(), &["s1"]).unwrap();
}

#[test]
fn test_duplicate_store_declarations_collapse() {
  let mut builder = TopologyBuilder::new();
  builder.add_store("s", MemoryStore::factory("s")).unwrap();
  builder.add_processor("p", strings(), &["s", "s"]).unwrap();
  assert_eq!(builder.processor("p").unwrap().stores().len(), 1);
}

#[test]
fn test_set_parent_unknown_parent() {
  let mut builder = TopologyBuilder::new();
  builder.add_processor("child", strings(), &[]).unwrap();

  let err = builder.set_parent("ghost", "child").unwrap_err();
  assert!(matches!(err, TopologyError::NodeNotFound(ref name) if name == "ghost"));

  // A sink is not a valid parent either.
  builder.add_sink("out", "t", StringSerde, StringSerde).unwrap();
  let err = builder.set_parent("out", "child").unwrap_err();
  assert!(matches!(err, TopologyError::NodeNotFound(_)));
}

#[test]
fn test_set_parent_rejects_duplicate_edge() {
  let mut builder = TopologyBuilder::new();
  builder.add_source("in", "t", StringSerde, StringSerde).unwrap();
  builder.add_processor("p", strings(), &[]).unwrap();
  builder.set_parent("in", "p").unwrap();

  let err = builder.set_parent("in", "p").unwrap_err();
  assert!(matches!(err, TopologyError::EdgeAlreadyExists { .. }));
  assert_eq!(builder.source("in").unwrap().children(), ["p".to_string()]);
}

#[test]
fn test_register_with_unknown_parent_leaves_builder_unchanged() {
  let mut builder = TopologyBuilder::new();
  let err = builder
    .register_processor("p", strings(), "ghost", &[])
    .unwrap_err();
  assert!(matches!(err, TopologyError::NodeNotFound(_)));
  assert!(builder.processor("p").is_none());

  let err = builder
    .register_sink("out", "t", StringSerde, StringSerde, "ghost")
    .unwrap_err();
  assert!(matches!(err, TopologyError::NodeNotFound(_)));
  assert!(builder.sink("out").is_none());
}

#[test]
fn test_build_simple_pipeline() {
  let mut builder = TopologyBuilder::new();
  builder.add_store("s", MemoryStore::factory("s")).unwrap();
  builder.add_source("in", "lines", StringSerde, StringSerde).unwrap();
  builder.register_processor("parse", || Parse, "in", &["s"]).unwrap();
  builder
    .register_sink("out", "numbers", StringSerde, I64Serde, "parse")
    .unwrap();
  assert!(builder.store("s").is_some());

  let topology = builder.build().unwrap();
  assert_eq!(
    topology.partition_groups(),
    [PartitionGroup::new()
      .with_topic("lines")
      .with_processor("parse")
      .with_store("s")]
  );
  assert_eq!(topology.group_for_topic("lines"), Some(0));
  assert_eq!(topology.group_for_topic("numbers"), None);
  assert_eq!(topology.sink_topics().into_iter().collect::<Vec<_>>(), vec!["numbers"]);

  let description = serde_json::to_value(topology.describe()).unwrap();
  assert_eq!(description["processors"][0]["name"], "parse");
  assert_eq!(description["sinks"][0]["topic"], "numbers");
  assert_eq!(description["partition_groups"][0]["stores"][0], "s");
}

#[test]
fn test_build_reports_all_type_mismatches() {
  let mut builder = TopologyBuilder::new();
  builder.add_source("in", "t", StringSerde, StringSerde).unwrap();
  builder.register_processor("parse", || Parse, "in", &[]).unwrap();
  // Expects strings, but `parse` forwards integers.
  builder.register_processor("echo", strings(), "parse", &[]).unwrap();
  // Expects integer keys, but `in` forwards strings.
  builder
    .register_processor("ints", pass::<i64, String>, "in", &[])
    .unwrap();
  builder
    .register_sink("out", "o", StringSerde, StringSerde, "echo")
    .unwrap();

  let problems = problems(builder.build().err().unwrap());
  let mismatches: Vec<_> = problems
    .iter()
    .filter_map(|p| match p {
      BuildProblem::TypeMismatch { parent, child, .. } => Some((parent.as_str(), child.as_str())),
      _ => None,
    })
    .collect();
  assert_eq!(mismatches.len(), 2);
  assert!(mismatches.contains(&("parse", "echo")));
  assert!(mismatches.contains(&("in", "ints")));

  let message = problems
    .iter()
    .find(|p| matches!(p, BuildProblem::TypeMismatch { child, .. } if child == "echo"))
    .unwrap()
    .to_string();
  assert!(message.contains("i64"), "{message}");
}

#[test]
fn test_build_reports_unknown_child_and_source_child() {
  let mut builder = TopologyBuilder::new();
  builder.add_source("a", "t1", StringSerde, StringSerde).unwrap();
  builder.add_source("b", "t2", StringSerde, StringSerde).unwrap();
  builder.set_parent("a", "nowhere").unwrap();
  builder.set_parent("a", "b").unwrap();

  let problems = problems(builder.build().err().unwrap());
  assert!(problems.contains(&BuildProblem::UnknownChild {
    parent: "a".to_string(),
    child: "nowhere".to_string(),
  }));
  assert!(problems.contains(&BuildProblem::SourceAsChild {
    parent: "a".to_string(),
    child: "b".to_string(),
  }));
}

#[test]
fn test_build_reports_sink_parents() {
  let mut builder = TopologyBuilder::new();
  builder.add_source("a", "t1", StringSerde, StringSerde).unwrap();
  builder.add_source("b", "t2", StringSerde, StringSerde).unwrap();
  builder.add_sink("lonely", "o1", StringSerde, StringSerde).unwrap();
  builder.add_sink("shared", "o2", StringSerde, StringSerde).unwrap();
  builder.set_parent("a", "shared").unwrap();
  builder.set_parent("b", "shared").unwrap();

  let problems = problems(builder.build().err().unwrap());
  assert!(problems.contains(&BuildProblem::SinkWithoutParent("lonely".to_string())));
  assert!(problems.contains(&BuildProblem::SinkWithParents {
    sink: "shared".to_string(),
    parents: vec!["a".to_string(), "b".to_string()],
  }));
}

#[test]
fn test_build_reports_orphan_and_cycle() {
  let mut builder = TopologyBuilder::new();
  builder.add_source("in", "t", StringSerde, StringSerde).unwrap();
  builder.add_processor("orphan", strings(), &[]).unwrap();
  builder.register_processor("x", strings(), "in", &[]).unwrap();
  builder.register_processor("y", strings(), "x", &[]).unwrap();
  builder.set_parent("y", "x").unwrap();

  let problems = problems(builder.build().err().unwrap());
  assert!(problems.contains(&BuildProblem::Orphan("orphan".to_string())));
  assert!(problems.contains(&BuildProblem::Cycle(vec!["x".to_string(), "y".to_string()])));

  let err = TopologyError::Build(crate::error::BuildError { problems });
  assert!(err.to_string().starts_with("invalid topology (2 problem(s))"));
}

#[test]
fn test_groups_follow_shared_stores_and_topics() {
  let mut builder = TopologyBuilder::new();
  builder.add_store("shared", MemoryStore::factory("shared")).unwrap();
  builder.add_source("clicks", "clicks", StringSerde, StringSerde).unwrap();
  builder.add_source("views", "views", StringSerde, StringSerde).unwrap();
  builder.add_source("audit", "audit", StringSerde, StringSerde).unwrap();
  builder
    .register_processor("count_clicks", strings(), "clicks", &["shared"])
    .unwrap();
  builder
    .register_processor("count_views", strings(), "views", &["shared"])
    .unwrap();
  builder.register_processor("log", strings(), "audit", &[]).unwrap();
  builder
    .register_sink("audit_out", "audit-log", StringSerde, StringSerde, "log")
    .unwrap();

  let topology = builder.build().unwrap();
  let groups = topology.partition_groups();
  assert_eq!(groups.len(), 2);

  // Seeds are ordered by source name, so "audit" seeds the first group.
  assert_eq!(
    groups[0],
    PartitionGroup::new().with_topic("audit").with_processor("log")
  );
  assert_eq!(
    groups[1],
    PartitionGroup::new()
      .with_topic("clicks")
      .with_topic("views")
      .with_processors(["count_clicks", "count_views"])
      .with_store("shared")
  );
  assert_eq!(topology.group_for_topic("clicks"), Some(1));
  assert_eq!(topology.group_for_topic("views"), Some(1));
  assert_eq!(topology.group_for_topic("audit"), Some(0));
}

#[test]
fn test_node_kind_lookup() {
  let mut builder = TopologyBuilder::new();
  builder.add_source("in", "t", StringSerde, StringSerde).unwrap();
  builder.register_processor("p", strings(), "in", &[]).unwrap();
  builder.register_sink("out", "o", StringSerde, StringSerde, "p").unwrap();

  assert_eq!(builder.node_kind("in"), Some(NodeKind::Source));
  assert_eq!(builder.node_kind("p"), Some(NodeKind::Processor));
  assert_eq!(builder.node_kind("out"), Some(NodeKind::Sink));
  assert_eq!(builder.node_kind("nope"), None);
  assert_eq!(NodeKind::Processor.to_string(), "processor");
}
