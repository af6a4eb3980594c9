//! Shared harness for flow tests: mock backends wired into a supervisor.
//!
//! Run with `RUST_LOG=trellis=debug cargo test -p trellis -- --nocapture` to
//! see tracing output from the flows under test.

use std::collections::HashSet;
use std::sync::Arc;

use ctor::ctor;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[ctor]
fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_filter(filter),
        )
        .try_init();
}

use trellis::graph::SchemaSnapshot;
use trellis::trace::TraceStep;
use trellis::{
    Config, IdentifierRegistry, LlmClient, MemorySpanSink, MockGraph, RequestSupervisor,
};

/// Schema snapshot with the given labels (no properties).
pub fn schema_with(labels: &[&str]) -> SchemaSnapshot {
    let mut snapshot = SchemaSnapshot::default();
    for label in labels {
        snapshot.labels.insert((*label).to_string(), Vec::new());
    }
    snapshot
}

/// Builds a supervisor over mock backends with every `dbs` entry registered.
pub fn supervisor_with(
    graph: MockGraph,
    llm: Arc<dyn LlmClient>,
    dbs: &[&str],
    config: Config,
) -> (Arc<RequestSupervisor>, Arc<MemorySpanSink>) {
    let registry = Arc::new(IdentifierRegistry::new());
    for db in dbs {
        registry.register_db(db).expect("valid test db name");
    }
    let spans = Arc::new(MemorySpanSink::new());
    let supervisor = Arc::new(RequestSupervisor::new(
        Arc::new(graph),
        llm,
        registry,
        Arc::new(config),
        spans.clone(),
    ));
    (supervisor, spans)
}

/// Asserts the universal trace properties: exactly one root, unique node ids,
/// and every parent recorded before its child.
pub fn assert_trace_dag(steps: &[TraceStep]) {
    let roots = steps
        .iter()
        .filter(|s| s.parent_id.is_none() && s.parent_ids.is_empty())
        .count();
    assert_eq!(roots, 1, "expected exactly one root step, got {roots}");

    let mut seen: HashSet<&str> = HashSet::new();
    for step in steps {
        assert!(
            seen.insert(step.node_id.as_str()),
            "duplicate node id {}",
            step.node_id
        );
    }

    let mut prior: HashSet<&str> = HashSet::new();
    for step in steps {
        for parent in step.parent_id.iter().chain(step.parent_ids.iter()) {
            assert!(
                prior.contains(parent.as_str()),
                "step {} references parent {} that was not recorded earlier",
                step.node_id,
                parent
            );
        }
        prior.insert(step.node_id.as_str());
    }
}
