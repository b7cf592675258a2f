use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use streamweave_topology::codec::{I64Serde, StringSerde};
use streamweave_topology::error::{BuildProblem, ProcessError, TopologyError};
use streamweave_topology::processor::{Processor, ProcessorContext};
use streamweave_topology::store::{MemoryStore, SharedStore, StoreSet};
use streamweave_topology::transport::MemoryProducer;
use streamweave_topology::{PartitionGroup, Record, TopologyBuilder, Worker, WorkerConfig};

struct Split;

impl Processor for Split {
  type KeyIn = String;
  type ValueIn = String;
  type KeyOut = String;
  type ValueOut = String;

  fn process(
    &mut self,
    ctx: &mut ProcessorContext<String, String>,
    _key: String,
    line: String,
  ) -> Result<(), ProcessError> {
    for word in line.split_whitespace() {
      ctx.forward(word.to_string(), String::new());
    }
    Ok(())
  }
}

#[derive(Default)]
struct Count {
  counts: Option<SharedStore>,
}

impl Processor for Count {
  type KeyIn = String;
  type ValueIn = String;
  type KeyOut = String;
  type ValueOut = i64;

  fn init(&mut self, stores: &StoreSet) -> Result<(), ProcessError> {
    self.counts = stores.get("counts");
    Ok(())
  }

  fn process(
    &mut self,
    ctx: &mut ProcessorContext<String, i64>,
    word: String,
    _value: String,
  ) -> Result<(), ProcessError> {
    let counts = self
      .counts
      .as_ref()
      .ok_or_else(|| ProcessError::user("no counts store"))?;
    let mut counts = counts.lock().unwrap();
    let next = counts
      .get(word.as_bytes())?
      .map(|raw| i64::from_be_bytes(raw[..].try_into().unwrap()))
      .unwrap_or(0)
      + 1;
    counts.set(Bytes::from(word.clone()), Bytes::copy_from_slice(&next.to_be_bytes()))?;
    drop(counts);
    ctx.forward(word, next);
    Ok(())
  }
}

fn builder() -> TopologyBuilder {
  let mut builder = TopologyBuilder::new();
  builder.add_store("counts", MemoryStore::factory("counts")).unwrap();
  builder.add_source("lines", "text", StringSerde, StringSerde).unwrap();
  builder.register_processor("split", || Split, "lines", &[]).unwrap();
  builder
    .register_processor("count", Count::default, "split", &["counts"])
    .unwrap();
  builder
    .register_sink("out", "word-counts", StringSerde, I64Serde, "count")
    .unwrap();
  builder
}

#[tokio::test]
async fn word_count_over_two_partitions() {
  let topology = Arc::new(builder().build().unwrap());
  assert_eq!(
    topology.partition_groups(),
    [PartitionGroup::new()
      .with_topic("text")
      .with_processors(["count", "split"])
      .with_store("counts")]
  );

  let producer = MemoryProducer::new();
  let worker = Worker::new(topology, Arc::new(producer.clone()), WorkerConfig::default());
  let lines = [(0, "a b a"), (1, "b c"), (0, "a"), (1, "c c")];
  let records = lines.iter().enumerate().map(|(offset, (partition, text))| {
    Record::new("text", Bytes::new(), Bytes::from(text.to_string()))
      .with_partition(*partition)
      .with_offset(offset as i64)
  });

  let report = worker.run(futures::stream::iter(records)).await.unwrap();
  assert_eq!(report.processed(), 4);
  assert_eq!(report.partitions.len(), 2);

  // Stores are per partition, so each partition counts on its own.
  let mut maxima: HashMap<String, i64> = HashMap::new();
  for record in producer.records_for("word-counts") {
    let word = String::from_utf8(record.key.to_vec()).unwrap();
    let count = i64::from_be_bytes(record.value[..].try_into().unwrap());
    let entry = maxima.entry(word).or_default();
    *entry = (*entry).max(count);
  }
  assert_eq!(maxima["a"], 3);
  assert_eq!(maxima["b"], 1);
  assert_eq!(maxima["c"], 3);
}

#[test]
fn miswired_sink_is_rejected_at_build() {
  let mut builder = builder();
  // `split` forwards strings, the sink expects integer values.
  builder
    .register_sink("raw", "raw-words", StringSerde, I64Serde, "split")
    .unwrap();

  match builder.build() {
    Err(TopologyError::Build(err)) => {
      assert_eq!(err.problems.len(), 1);
      assert!(matches!(
        &err.problems[0],
        BuildProblem::TypeMismatch { parent, child, .. } if parent == "split" && child == "raw"
      ));
    }
    Err(other) => panic!("unexpected error: {other}"),
    Ok(_) => panic!("build should fail"),
  }
}
