//! Word count over two partitions.
//!
//! Lines arrive as JSON messages on the `posts` topic. A splitter turns each
//! post into words, a counter keeps a running count per word in a state store,
//! and a sink writes `(word, count)` to `word-counts`.
//!
//! One of the posts is not valid JSON. The worker is configured to skip
//! failed records, so it is logged and counted as failed.
//!
//! ```text
//! cargo run --example word_count
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use streamweave_topology::bootstrap::must;
use streamweave_topology::codec::{I64Serde, JsonSerde, StringSerde};
use streamweave_topology::error::{ErrorAction, ProcessError};
use streamweave_topology::processor::{Processor, ProcessorContext};
use streamweave_topology::store::{MemoryStore, SharedStore, StoreSet};
use streamweave_topology::transport::MemoryProducer;
use streamweave_topology::{Record, TopologyBuilder, Worker, WorkerConfig};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Post {
  author: String,
  text: String,
}

struct Split;

impl Processor for Split {
  type KeyIn = String;
  type ValueIn = Post;
  type KeyOut = String;
  type ValueOut = String;

  fn process(
    &mut self,
    ctx: &mut ProcessorContext<String, String>,
    _key: String,
    post: Post,
  ) -> Result<(), ProcessError> {
    for word in post.text.split(|c: char| !c.is_alphanumeric()) {
      if !word.is_empty() {
        ctx.forward(word.to_lowercase(), post.author.clone());
      }
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
    match self.counts {
      Some(_) => Ok(()),
      None => Err(ProcessError::user("counts store not declared")),
    }
  }

  fn process(
    &mut self,
    ctx: &mut ProcessorContext<String, i64>,
    word: String,
    _author: String,
  ) -> Result<(), ProcessError> {
    let Some(counts) = &self.counts else {
      return Err(ProcessError::user("counts store not initialised"));
    };
    let count = {
      let mut counts = counts.lock().map_err(|e| ProcessError::user(e.to_string()))?;
      let previous = match counts.get(word.as_bytes())? {
        Some(raw) => i64::from_be_bytes(raw[..].try_into().map_err(ProcessError::user)?),
        None => 0,
      };
      counts.set(
        Bytes::from(word.clone()),
        Bytes::copy_from_slice(&(previous + 1).to_be_bytes()),
      )?;
      previous + 1
    };
    ctx.forward(word, count);
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt::init();

  let mut builder = TopologyBuilder::new();
  must(builder.add_store("counts", MemoryStore::factory("counts")));
  must(builder.add_source("posts", "posts", StringSerde, JsonSerde::<Post>::new()));
  must(builder.register_processor("split", || Split, "posts", &[]));
  must(builder.register_processor("count", Count::default, "split", &["counts"]));
  must(builder.register_sink("out", "word-counts", StringSerde, I64Serde, "count"));
  let topology = Arc::new(builder.build()?);

  println!("{}", serde_json::to_string_pretty(&topology.describe())?);

  let producer = MemoryProducer::new();
  let worker = Worker::new(
    topology,
    Arc::new(producer.clone()),
    WorkerConfig::default().with_on_error(ErrorAction::Skip),
  );

  let (tx, rx) = mpsc::channel(16);
  let feed = tokio::spawn(async move {
    let posts = [
      (0, "ada", "The engine merges overlapping groups"),
      (1, "grace", "Groups run in parallel"),
      (0, "ada", "the engine keeps order per partition"),
      (1, "linus", "not json at all"),
    ];
    for (offset, (partition, author, text)) in posts.into_iter().enumerate() {
      let value = if text.starts_with("not json") {
        Bytes::from_static(b"{broken")
      } else {
        let post = Post {
          author: author.to_string(),
          text: text.to_string(),
        };
        Bytes::from(serde_json::to_vec(&post)?)
      };
      let record = Record::new("posts", Bytes::from(author.to_string()), value)
        .with_partition(partition)
        .with_offset(offset as i64);
      if tx.send(record).await.is_err() {
        break;
      }
    }
    Ok::<(), serde_json::Error>(())
  });

  let report = worker.run(ReceiverStream::new(rx)).await?;
  feed.await??;

  let mut latest = BTreeMap::new();
  for record in producer.records_for("word-counts") {
    let word = String::from_utf8(record.key.to_vec())?;
    let count = i64::from_be_bytes(record.value[..].try_into()?);
    latest.insert(word, count);
  }

  println!("processed {} record(s), {} failed", report.processed(), report.failed());
  for (word, count) in latest {
    println!("{word:>12} {count}");
  }
  Ok(())
}
