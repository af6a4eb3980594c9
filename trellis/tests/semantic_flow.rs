//! Semantic flow end to end: resolve → route → specialist → answer over mock
//! backends.

mod common;

use std::sync::Arc;

use serde_json::json;
use trellis::trace::StepType;
use trellis::{
    CandidateSource, Config, EntityOverride, LlmReply, MockGraph, MockLlm, Mode,
    OrchestratorError, Route, RunRequest,
};

use common::{assert_trace_dag, schema_with, supervisor_with};

fn semantic_request(query: &str, overrides: Vec<EntityOverride>) -> RunRequest {
    RunRequest {
        query: query.to_string(),
        workspace_id: "default".to_string(),
        databases: vec!["kgnormal".to_string()],
        entity_overrides: overrides,
        label_hints: Default::default(),
        mode: Mode::Semantic,
        fallback_enabled: true,
    }
}

/// **Scenario**: happy path with a caller override. The override pins the
/// entity (confident at rank 0), the LPG specialist queries around the pinned
/// node id, and the trace is the linear chain RESOLVE → ROUTE → SPECIALIST →
/// ANSWER.
#[tokio::test]
async fn override_happy_path_produces_linear_chain() {
    let graph = MockGraph::new()
        .with_database("kgnormal", schema_with(&["Company"]))
        .with_index("kgnormal", "entity_fulltext")
        .with_rows(
            "kgnormal",
            "elementId(n)",
            vec![json!({"rel": "SUPPLIES", "labels": ["Company"], "name": "SupplyCo"})],
        );
    let llm = Arc::new(MockLlm::scripted(
        vec![
            // entity extraction
            LlmReply::text("[\"ACME\"]"),
            // specialist: one query_db call around the pinned node
            LlmReply::tool_call(
                "query_db",
                json!({
                    "query": "MATCH (n) WHERE elementId(n) = $node_id MATCH (n)-[r]-(m) \
                              RETURN type(r) AS rel, labels(m) AS labels, m.name AS name LIMIT 25",
                    "params": {"node_id": "4:abc:1"}
                }),
            ),
            LlmReply::text("ACME is supplied by SupplyCo."),
            // answer generation
            LlmReply::text("ACME is supplied by SupplyCo."),
        ],
        LlmReply::text("unexpected extra call"),
    ));
    let (supervisor, _spans) = supervisor_with(graph, llm, &["kgnormal"], Config::default());

    let overrides = vec![EntityOverride {
        question_entity: "ACME".into(),
        database: "kgnormal".into(),
        node_id: "4:abc:1".into(),
        display_name: "ACME".into(),
        labels: vec!["Company".into()],
    }];
    let result = supervisor
        .run(semantic_request("Who supplies ACME?", overrides))
        .await
        .expect("semantic run succeeds");

    assert_eq!(result.route, Some(Route::Lpg));
    assert!(result.answer.contains("SupplyCo"));

    let context = result.semantic_context.expect("semantic context present");
    let top = &context.matches["ACME"][0];
    assert!(top.is_confident);
    assert_eq!(top.source, CandidateSource::Override);
    assert_eq!(top.node_id, "4:abc:1");

    let types: Vec<StepType> = result.trace_steps.iter().map(|s| s.step_type).collect();
    assert_eq!(
        types,
        vec![
            StepType::Resolve,
            StepType::Route,
            StepType::Specialist,
            StepType::Answer
        ]
    );
    // Linear chain: each step's parent is exactly the previous step.
    for pair in result.trace_steps.windows(2) {
        assert_eq!(pair[1].parent_id.as_deref(), Some(pair[0].node_id.as_str()));
    }
    assert_trace_dag(&result.trace_steps);
}

/// **Scenario**: a pinned label that fails validation aborts before any
/// Cypher: InvalidIdentifier, no SPECIALIST step, backend never queried.
#[tokio::test]
async fn invalid_label_aborts_before_cypher() {
    let graph = MockGraph::new()
        .with_database("kgnormal", schema_with(&["Company"]))
        .with_index("kgnormal", "entity_fulltext");
    let llm = Arc::new(MockLlm::always("[\"ACME\"]"));
    let (supervisor, _spans) = supervisor_with(graph, llm, &["kgnormal"], Config::default());

    let overrides = vec![EntityOverride {
        question_entity: "ACME".into(),
        database: "kgnormal".into(),
        node_id: "4:abc:1".into(),
        display_name: "ACME".into(),
        labels: vec!["Bad Label".into()],
    }];
    let failure = supervisor
        .run(semantic_request("Who supplies ACME?", overrides))
        .await
        .expect_err("invalid label must fail");

    assert!(matches!(
        failure.error,
        OrchestratorError::InvalidIdentifier(_)
    ));
    assert!(failure
        .trace_steps
        .iter()
        .all(|s| s.step_type != StepType::Specialist));
}

/// **Scenario**: the specialist issues the same Cypher twice; the second call
/// is a cache hit and the graph backend runs exactly once.
#[tokio::test]
async fn repeated_cypher_hits_shared_memory() {
    let graph = Arc::new(
        MockGraph::new()
            .with_database("kgfibo", schema_with(&["Bond"]))
            .with_index("kgfibo", "entity_fulltext")
            .with_rows("kgfibo", "RETURN b.name", vec![json!({"name": "Bond A"})]),
    );
    let same_call = || {
        LlmReply::tool_call(
            "query_db",
            json!({"query": "MATCH (b:Bond) RETURN b.name LIMIT 10"}),
        )
    };
    let llm = Arc::new(MockLlm::scripted(
        vec![
            LlmReply::text("[\"Bond\"]"),
            same_call(),
            same_call(),
            LlmReply::text("Bond A is listed."),
            LlmReply::text("Bond A is listed."),
        ],
        LlmReply::text("unexpected extra call"),
    ));

    let registry = Arc::new(trellis::IdentifierRegistry::new());
    registry.register_db("kgfibo").unwrap();
    let spans = Arc::new(trellis::MemorySpanSink::new());
    let supervisor = trellis::RequestSupervisor::new(
        graph.clone(),
        llm,
        registry,
        Arc::new(Config::default()),
        spans.clone(),
    );

    let result = supervisor
        .run(RunRequest {
            query: "List bonds".into(),
            workspace_id: "default".into(),
            databases: vec!["kgfibo".into()],
            entity_overrides: Vec::new(),
            label_hints: Default::default(),
            mode: Mode::Semantic,
            fallback_enabled: true,
        })
        .await
        .expect("semantic run succeeds");

    assert!(result.answer.contains("Bond A"));
    assert_eq!(graph.cypher_calls("kgfibo"), 1, "backend hit exactly once");

    let tool_spans: Vec<_> = spans
        .spans()
        .into_iter()
        .filter(|s| s.name == "tool:query_db")
        .collect();
    assert_eq!(tool_spans.len(), 2);
    assert_eq!(tool_spans[0].metadata["cache"], "miss");
    assert_eq!(tool_spans[1].metadata["cache"], "hit");
}

/// **Scenario**: a hybrid question runs both specialists sequentially; the
/// chain stays linear with two SPECIALIST steps.
#[tokio::test]
async fn hybrid_route_runs_both_specialists() {
    let graph = MockGraph::new()
        .with_database("kgnormal", schema_with(&["Company", "Class"]))
        .with_index("kgnormal", "entity_fulltext");
    let llm = Arc::new(MockLlm::scripted(
        vec![
            LlmReply::text("[]"),
            // LPG specialist answers directly, then the RDF specialist.
            LlmReply::text("instance facts"),
            LlmReply::text("hierarchy facts"),
            LlmReply::text("combined answer"),
        ],
        LlmReply::text("unexpected extra call"),
    ));
    let (supervisor, _spans) = supervisor_with(graph, llm, &["kgnormal"], Config::default());

    let result = supervisor
        .run(semantic_request(
            "Which classes define the suppliers connected to ACME and list their subclass hierarchy?",
            Vec::new(),
        ))
        .await
        .expect("semantic run succeeds");

    assert_eq!(result.route, Some(Route::Hybrid));
    let specialist_steps: Vec<_> = result
        .trace_steps
        .iter()
        .filter(|s| s.step_type == StepType::Specialist)
        .collect();
    assert_eq!(specialist_steps.len(), 2);
    assert_trace_dag(&result.trace_steps);
}

/// **Scenario**: an override naming a database outside the request's set is
/// rejected up front.
#[tokio::test]
async fn override_for_foreign_database_is_rejected() {
    let graph = MockGraph::new().with_database("kgnormal", schema_with(&["Company"]));
    let llm = Arc::new(MockLlm::always("[]"));
    let (supervisor, _spans) =
        supervisor_with(graph, llm, &["kgnormal", "kgother"], Config::default());

    let overrides = vec![EntityOverride {
        question_entity: "ACME".into(),
        database: "kgother".into(),
        node_id: "4:abc:9".into(),
        display_name: "ACME".into(),
        labels: Vec::new(),
    }];
    let failure = supervisor
        .run(semantic_request("Who supplies ACME?", overrides))
        .await
        .expect_err("foreign override must fail");
    assert!(matches!(
        failure.error,
        OrchestratorError::InvalidIdentifier(_)
    ));
}
