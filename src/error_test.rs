//! Tests for error formatting and the forward error set.

use crate::codec::CodecError;
use crate::error::{BuildError, BuildProblem, ErrorAction, FlushError, ForwardErrors, ProcessError, TopologyError};
use crate::topology::NodeKind;
use crate::transport::TransportError;

#[test]
fn test_forward_errors_keep_last_failure_per_output() {
  let mut errors = ForwardErrors::new();
  errors.insert("b", ProcessError::user("first"));
  errors.insert("a", ProcessError::UnknownTopic("t".to_string()));
  errors.insert("b", ProcessError::user("second"));

  assert_eq!(errors.len(), 2);
  assert_eq!(errors.get("b").unwrap().to_string(), "second");
  assert_eq!(errors.to_string(), "[a] no source reads topic t; [b] second");

  let names: Vec<String> = errors.into_iter().map(|(name, _)| name).collect();
  assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn test_build_error_lists_every_problem() {
  let err = TopologyError::from(BuildError {
    problems: vec![
      BuildProblem::Orphan("p".to_string()),
      BuildProblem::SinkWithParents {
        sink: "s".to_string(),
        parents: vec!["a".to_string(), "b".to_string()],
      },
    ],
  });
  assert_eq!(
    err.to_string(),
    "invalid topology (2 problem(s)): processor p has no parent; sink s has several parents: a, b"
  );
}

#[test]
fn test_messages_name_the_failing_node() {
  let err = TopologyError::NodeAlreadyExists {
    kind: NodeKind::Sink,
    name: "out".to_string(),
  };
  assert_eq!(err.to_string(), "node exists already: sink out");

  let err = ProcessError::KeyEncode {
    node: "out".to_string(),
    source: CodecError::custom("bad"),
  };
  assert_eq!(err.to_string(), "sink out: failed to encode key: bad");

  let err = FlushError::Transport {
    sink: "out".to_string(),
    topic: "t".to_string(),
    failures: vec![TransportError::Closed, TransportError::Closed],
  };
  assert_eq!(err.to_string(), "sink out: 2 record(s) to t failed");

  let err = ProcessError::from(err);
  assert_eq!(err.to_string(), "sink out: 2 record(s) to t failed");
}

#[test]
fn test_error_action_deserializes() {
  let action: ErrorAction = serde_json::from_str("\"skip\"").unwrap();
  assert_eq!(action, ErrorAction::Skip);
  assert_eq!(ErrorAction::default(), ErrorAction::Stop);
}
