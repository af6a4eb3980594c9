//! Debate flow end to end: fan-out, status accounting, collect, synthesis,
//! and the blocked → semantic fallback.

mod common;

use std::sync::Arc;
use std::time::Duration;

use trellis::trace::StepType;
use trellis::{
    Config, DebateState, LlmReply, MockGraph, MockLlm, Mode, OrchestratorError, RunRequest,
    WorkerStatus,
};

use common::{assert_trace_dag, schema_with, supervisor_with};

fn debate_request(query: &str, databases: Vec<String>) -> RunRequest {
    RunRequest {
        query: query.to_string(),
        workspace_id: "default".to_string(),
        databases,
        entity_overrides: Vec::new(),
        label_hints: Default::default(),
        mode: Mode::Debate,
        fallback_enabled: true,
    }
}

/// **Scenario**: one of three databases is unreachable. The debate degrades:
/// two FAN_OUT_CHILD steps under FANOUT, COLLECT joins both, SYNTHESIS
/// follows COLLECT, and the dead database reports `unreachable`.
#[tokio::test]
async fn degraded_debate_accounts_for_unreachable_database() {
    let graph = MockGraph::new()
        .with_database("kgnormal", schema_with(&["Company"]))
        .with_database("kgfibo", schema_with(&["Bond"]))
        .with_unreachable("kgruntime");
    let llm = Arc::new(MockLlm::always("entities compared"));
    let (supervisor, _spans) = supervisor_with(
        graph,
        llm,
        &["kgnormal", "kgfibo", "kgruntime"],
        Config::default(),
    );

    let result = supervisor
        .run(debate_request(
            "Compare known entities",
            vec![
                "kgnormal".to_string(),
                "kgfibo".to_string(),
                "kgruntime".to_string(),
            ],
        ))
        .await
        .expect("degraded debate still answers");

    assert_eq!(result.debate_state, Some(DebateState::Degraded));
    assert_eq!(
        result.agent_statuses["kgruntime"],
        WorkerStatus::Unreachable
    );
    assert_eq!(result.agent_statuses["kgnormal"], WorkerStatus::Answered);
    assert_eq!(result.agent_statuses["kgfibo"], WorkerStatus::Answered);

    let steps = &result.trace_steps;
    let fanout = steps
        .iter()
        .find(|s| s.step_type == StepType::Fanout)
        .expect("fanout step");
    let children: Vec<_> = steps
        .iter()
        .filter(|s| s.step_type == StepType::FanOutChild)
        .collect();
    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(child.parent_id.as_deref(), Some(fanout.node_id.as_str()));
    }
    let collect = steps
        .iter()
        .find(|s| s.step_type == StepType::Collect)
        .expect("collect step");
    assert_eq!(collect.parent_ids.len(), 2);
    let synthesis = steps
        .iter()
        .find(|s| s.step_type == StepType::Synthesis)
        .expect("synthesis step");
    assert_eq!(
        synthesis.parent_id.as_deref(),
        Some(collect.node_id.as_str())
    );
    assert_trace_dag(steps);
}

/// **Scenario**: every database is down. The debate blocks and the supervisor
/// falls back to the semantic flow; the response carries
/// `fallback_from="debate"` and still reports `debate_state=blocked`.
#[tokio::test]
async fn blocked_debate_falls_back_to_semantic() {
    let graph = MockGraph::new()
        .with_unreachable("kgnormal")
        .with_unreachable("kgfibo");
    let llm = Arc::new(MockLlm::always("no data available"));
    let (supervisor, _spans) =
        supervisor_with(graph, llm, &["kgnormal", "kgfibo"], Config::default());

    let result = supervisor
        .run(debate_request(
            "Compare known entities",
            vec!["kgnormal".to_string(), "kgfibo".to_string()],
        ))
        .await
        .expect("fallback still answers");

    assert_eq!(result.debate_state, Some(DebateState::Blocked));
    assert_eq!(result.fallback_from.as_deref(), Some("debate"));
    assert!(result.semantic_context.is_some());
    assert!(result
        .agent_statuses
        .values()
        .all(|s| *s == WorkerStatus::Unreachable));
    // The fallback chains under the debate's trace; one root overall.
    assert_trace_dag(&result.trace_steps);
    assert_eq!(
        result.trace_steps[0].step_type,
        StepType::Orchestration
    );
}

/// **Scenario**: fallback disabled: a fully blocked debate surfaces the
/// readiness summary as a Blocked error.
#[tokio::test]
async fn blocked_debate_without_fallback_errors() {
    let graph = MockGraph::new().with_unreachable("kgnormal");
    let llm = Arc::new(MockLlm::always("unused"));
    let (supervisor, _spans) = supervisor_with(graph, llm, &["kgnormal"], Config::default());

    let mut request = debate_request("Compare known entities", vec!["kgnormal".to_string()]);
    request.fallback_enabled = false;
    let failure = supervisor.run(request).await.expect_err("must block");
    match failure.error {
        OrchestratorError::Blocked(summary) => {
            assert!(summary.ready.is_empty());
            assert_eq!(summary.blocked.len(), 1);
        }
        other => panic!("expected Blocked, got {other:?}"),
    }
}

/// **Scenario**: no database is fully ready but the agents still exist
/// (probes out of date, so everything is degraded). The fan-out runs anyway:
/// one FAN_OUT_CHILD per degraded agent, and only then does the blocked
/// snapshot send the supervisor to the semantic fallback.
#[tokio::test]
async fn degraded_only_debate_still_fans_out() {
    let graph = MockGraph::new()
        .with_database("kgnormal", schema_with(&["Company"]))
        .with_database("kgfibo", schema_with(&["Bond"]));
    let llm = Arc::new(MockLlm::always("stale fragment"));
    let config = Config {
        // Every probe is already stale by the time readiness is computed.
        probe_max_age: Duration::ZERO,
        ..Config::default()
    };
    let (supervisor, _spans) = supervisor_with(graph, llm, &["kgnormal", "kgfibo"], config);

    let result = supervisor
        .run(debate_request(
            "Compare known entities",
            vec!["kgnormal".to_string(), "kgfibo".to_string()],
        ))
        .await
        .expect("fallback still answers");

    // Both degraded agents were attempted and answered before the fallback.
    let children = result
        .trace_steps
        .iter()
        .filter(|s| s.step_type == StepType::FanOutChild)
        .count();
    assert_eq!(children, 2, "fan-out covers ready ∪ degraded");
    assert!(result
        .trace_steps
        .iter()
        .any(|s| s.step_type == StepType::Fanout));
    assert!(result
        .agent_statuses
        .values()
        .all(|s| *s == WorkerStatus::Answered));

    // The snapshot had no ready database, so the request still falls back.
    assert_eq!(result.debate_state, Some(DebateState::Blocked));
    assert_eq!(result.fallback_from.as_deref(), Some("debate"));
    assert!(result.semantic_context.is_some());
    assert_trace_dag(&result.trace_steps);
}

/// **Scenario**: one agent exceeds the per-agent deadline. Its child records
/// `timeout`, COLLECT still joins the fast agents, and synthesis runs.
#[tokio::test]
async fn slow_agent_times_out_without_failing_the_debate() {
    let graph = MockGraph::new()
        .with_database("kgnormal", schema_with(&["Company"]))
        .with_database("kgfibo", schema_with(&["Bond"]))
        .with_database("kgreg", schema_with(&["Rule"]));
    let llm = Arc::new(
        MockLlm::always("fragment answer")
            .with_delay_when("kgfibo", Duration::from_millis(500)),
    );
    let config = Config {
        agent_timeout: Duration::from_millis(100),
        grace: Duration::from_millis(10),
        ..Config::default()
    };
    let (supervisor, _spans) =
        supervisor_with(graph, llm, &["kgnormal", "kgfibo", "kgreg"], config);

    let result = supervisor
        .run(debate_request(
            "Compare known entities",
            vec![
                "kgnormal".to_string(),
                "kgfibo".to_string(),
                "kgreg".to_string(),
            ],
        ))
        .await
        .expect("timeout is isolated");

    assert_eq!(result.agent_statuses["kgfibo"], WorkerStatus::Timeout);
    assert_eq!(result.agent_statuses["kgnormal"], WorkerStatus::Answered);
    assert_eq!(result.agent_statuses["kgreg"], WorkerStatus::Answered);

    let children = result
        .trace_steps
        .iter()
        .filter(|s| s.step_type == StepType::FanOutChild)
        .count();
    assert_eq!(children, 3, "every attempted agent settles with a child step");
    let collect = result
        .trace_steps
        .iter()
        .find(|s| s.step_type == StepType::Collect)
        .expect("collect still emitted");
    assert_eq!(collect.parent_ids.len(), 2, "only answering children join");
    assert!(result
        .trace_steps
        .iter()
        .any(|s| s.step_type == StepType::Synthesis));
}

/// **Scenario**: an empty database list expands to the registry's user
/// databases; every attempted agent is accounted for.
#[tokio::test]
async fn empty_database_list_uses_registry() {
    let graph = MockGraph::new()
        .with_database("kgnormal", schema_with(&["Company"]))
        .with_database("kgfibo", schema_with(&["Bond"]));
    let llm = Arc::new(MockLlm::always("fragment"));
    let (supervisor, _spans) =
        supervisor_with(graph, llm, &["kgnormal", "kgfibo"], Config::default());

    let result = supervisor
        .run(debate_request("Compare known entities", Vec::new()))
        .await
        .expect("debate over registry databases");

    assert_eq!(result.agent_statuses.len(), 2);
    assert!(result.agent_statuses.contains_key("kgnormal"));
    assert!(result.agent_statuses.contains_key("kgfibo"));
    assert_eq!(result.debate_state, Some(DebateState::Ready));
}

/// **Scenario**: the fan-out child count always equals the attempted set, and
/// settled statuses partition it.
#[tokio::test]
async fn child_count_matches_attempted_set() {
    let graph = MockGraph::new()
        .with_database("kgnormal", schema_with(&["Company"]))
        .with_database("kgfibo", schema_with(&["Bond"]))
        .with_unreachable("kgdown");
    let llm = Arc::new(MockLlm::always("fragment"));
    let (supervisor, _spans) = supervisor_with(
        graph,
        llm,
        &["kgnormal", "kgfibo", "kgdown"],
        Config::default(),
    );

    let result = supervisor
        .run(debate_request(
            "Compare known entities",
            vec![
                "kgnormal".to_string(),
                "kgfibo".to_string(),
                "kgdown".to_string(),
            ],
        ))
        .await
        .expect("debate answers");

    let children = result
        .trace_steps
        .iter()
        .filter(|s| s.step_type == StepType::FanOutChild)
        .count();
    // attempted = ready ∪ degraded; the unreachable database never spawns.
    assert_eq!(children, 2);
    let settled = result
        .agent_statuses
        .values()
        .filter(|s| **s != WorkerStatus::Unreachable)
        .count();
    assert_eq!(settled, children);
}

/// **Scenario**: the whole-request deadline cancels mid-flight; the failure
/// carries a truncated trace whose root step is present.
#[tokio::test]
async fn request_deadline_returns_partial_trace() {
    let graph = MockGraph::new().with_database("kgnormal", schema_with(&["Company"]));
    let llm = Arc::new(
        MockLlm::always("slow").with_delay_when("kgnormal", Duration::from_millis(500)),
    );
    let config = Config {
        request_timeout: Duration::from_millis(80),
        grace: Duration::from_millis(10),
        ..Config::default()
    };
    let (supervisor, _spans) = supervisor_with(graph, llm, &["kgnormal"], config);

    let failure = supervisor
        .run(debate_request(
            "Compare known entities",
            vec!["kgnormal".to_string()],
        ))
        .await
        .expect_err("deadline must fire");

    assert_eq!(failure.error.error_code(), "timeout");
    assert!(!failure.trace_steps.is_empty(), "partial trace is kept");
    assert_eq!(
        failure.trace_steps[0].step_type,
        StepType::Orchestration
    );
}
