//! Runtime configuration: an explicit enumeration of every recognized option.
//!
//! Env-first: each field reads one variable and falls back to its default with
//! a warning on parse failure. Nothing else in the crate reads the environment.

use std::time::Duration;

use tracing::warn;

/// Default fulltext index consulted by entity resolution.
pub const DEFAULT_FULLTEXT_INDEX: &str = "entity_fulltext";

/// All tunables for the orchestration core. Built once per process with
/// [`Config::from_env`] and passed around behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat model used for agent runs, extraction, routing fallback, and synthesis.
    pub model: String,
    /// Logical tenant identifier propagated through every request.
    pub workspace_id: String,
    /// Whole-request deadline.
    pub request_timeout: Duration,
    /// Per-agent-run deadline inside a debate or specialist step.
    pub agent_timeout: Duration,
    /// Per-Cypher-call deadline.
    pub graph_timeout: Duration,
    /// Maximum age of a schema probe before an agent counts as degraded.
    pub probe_max_age: Duration,
    /// Drain window granted to workers after cancellation.
    pub grace: Duration,
    /// Debate fan-out permit cap.
    pub fanout_cap: usize,
    /// Shared-memory LRU capacity (cached Cypher results per request).
    pub memory_capacity: usize,
    /// Concurrent request cap at the HTTP boundary; beyond it requests get 503.
    pub max_concurrent_requests: usize,
    /// Reranker weights: lexical similarity, normalized fulltext score, label-hint bonus.
    pub rerank_weights: (f64, f64, f64),
    /// Score gap between first and second candidate required for confidence.
    pub confidence_gap: f64,
    /// Lexical similarity at or above which two candidates collapse as duplicates.
    pub dedup_threshold: f64,
    /// Router margin below which classification falls back to hybrid or the LLM.
    pub route_margin: f64,
    /// Cap on extracted question entities.
    pub max_entities: usize,
    /// Turn cap for the tool loop inside one agent run.
    pub max_agent_turns: usize,
    /// Graph connection settings.
    pub graph_uri: String,
    pub graph_user: String,
    pub graph_password: String,
    /// Fulltext index name used for candidate retrieval.
    pub fulltext_index: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            workspace_id: "default".to_string(),
            request_timeout: Duration::from_secs(120),
            agent_timeout: Duration::from_secs(60),
            graph_timeout: Duration::from_secs(10),
            probe_max_age: Duration::from_secs(30),
            grace: Duration::from_secs(1),
            fanout_cap: 8,
            memory_capacity: 100,
            max_concurrent_requests: 200,
            rerank_weights: (0.5, 0.4, 0.1),
            confidence_gap: 0.15,
            dedup_threshold: 0.92,
            route_margin: 0.2,
            max_entities: 8,
            max_agent_turns: 8,
            graph_uri: "bolt://localhost:7687".to_string(),
            graph_user: "neo4j".to_string(),
            graph_password: String::new(),
            fulltext_index: DEFAULT_FULLTEXT_INDEX.to_string(),
        }
    }
}

impl Config {
    /// Builds the config from the process environment.
    ///
    /// Recognized variables: `TRELLIS_MODEL`, `WORKSPACE_ID`,
    /// `TRELLIS_REQUEST_TIMEOUT_SECS`, `TRELLIS_AGENT_TIMEOUT_SECS`,
    /// `TRELLIS_GRAPH_TIMEOUT_SECS`, `TRELLIS_PROBE_MAX_AGE_SECS`,
    /// `TRELLIS_GRACE_SECS`, `TRELLIS_FANOUT_CAP`, `TRELLIS_MEMORY_CAPACITY`,
    /// `TRELLIS_MAX_CONCURRENT_REQUESTS`, `TRELLIS_CONFIDENCE_GAP`,
    /// `TRELLIS_DEDUP_THRESHOLD`, `TRELLIS_ROUTE_MARGIN`,
    /// `TRELLIS_RERANK_WEIGHTS` (three comma-separated floats),
    /// `TRELLIS_MAX_ENTITIES`, `TRELLIS_MAX_AGENT_TURNS`,
    /// `GRAPH_URI`, `GRAPH_USER`, `GRAPH_PASSWORD`, `FULLTEXT_INDEX`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            model: env_string("TRELLIS_MODEL", d.model),
            workspace_id: env_string("WORKSPACE_ID", d.workspace_id),
            request_timeout: env_secs("TRELLIS_REQUEST_TIMEOUT_SECS", d.request_timeout),
            agent_timeout: env_secs("TRELLIS_AGENT_TIMEOUT_SECS", d.agent_timeout),
            graph_timeout: env_secs("TRELLIS_GRAPH_TIMEOUT_SECS", d.graph_timeout),
            probe_max_age: env_secs("TRELLIS_PROBE_MAX_AGE_SECS", d.probe_max_age),
            grace: env_secs("TRELLIS_GRACE_SECS", d.grace),
            fanout_cap: env_usize("TRELLIS_FANOUT_CAP", d.fanout_cap),
            memory_capacity: env_usize("TRELLIS_MEMORY_CAPACITY", d.memory_capacity),
            max_concurrent_requests: env_usize(
                "TRELLIS_MAX_CONCURRENT_REQUESTS",
                d.max_concurrent_requests,
            ),
            rerank_weights: env_weights("TRELLIS_RERANK_WEIGHTS", d.rerank_weights),
            confidence_gap: env_f64("TRELLIS_CONFIDENCE_GAP", d.confidence_gap),
            dedup_threshold: env_f64("TRELLIS_DEDUP_THRESHOLD", d.dedup_threshold),
            route_margin: env_f64("TRELLIS_ROUTE_MARGIN", d.route_margin),
            max_entities: env_usize("TRELLIS_MAX_ENTITIES", d.max_entities),
            max_agent_turns: env_usize("TRELLIS_MAX_AGENT_TURNS", d.max_agent_turns),
            graph_uri: env_string("GRAPH_URI", d.graph_uri),
            graph_user: env_string("GRAPH_USER", d.graph_user),
            graph_password: env_string("GRAPH_PASSWORD", d.graph_password),
            fulltext_index: env_string("FULLTEXT_INDEX", d.fulltext_index),
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparseable duration, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparseable integer, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<f64>() {
            Ok(x) => x,
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparseable float, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_weights(key: &str, default: (f64, f64, f64)) -> (f64, f64, f64) {
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    let parts: Vec<f64> = raw
        .split(',')
        .filter_map(|p| p.trim().parse::<f64>().ok())
        .collect();
    match parts.as_slice() {
        [a, b, c] => (*a, *b, *c),
        _ => {
            warn!(key, value = %raw, "expected three comma-separated floats, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: defaults match the documented timeouts and capacities.
    #[test]
    fn defaults_match_contract() {
        let c = Config::default();
        assert_eq!(c.request_timeout, Duration::from_secs(120));
        assert_eq!(c.agent_timeout, Duration::from_secs(60));
        assert_eq!(c.graph_timeout, Duration::from_secs(10));
        assert_eq!(c.probe_max_age, Duration::from_secs(30));
        assert_eq!(c.grace, Duration::from_secs(1));
        assert_eq!(c.fanout_cap, 8);
        assert_eq!(c.memory_capacity, 100);
        assert_eq!(c.max_concurrent_requests, 200);
        assert_eq!(c.rerank_weights, (0.5, 0.4, 0.1));
        assert_eq!(c.fulltext_index, "entity_fulltext");
    }

    /// **Scenario**: malformed weights fall back to defaults instead of failing startup.
    #[test]
    fn bad_weights_fall_back() {
        std::env::set_var("TRELLIS_RERANK_WEIGHTS", "0.5,oops");
        let c = Config::from_env();
        assert_eq!(c.rerank_weights, (0.5, 0.4, 0.1));
        std::env::remove_var("TRELLIS_RERANK_WEIGHTS");
    }

    /// **Scenario**: the extraction and tool-loop caps are operator-tunable.
    #[test]
    fn entity_and_turn_caps_read_env() {
        std::env::set_var("TRELLIS_MAX_ENTITIES", "4");
        std::env::set_var("TRELLIS_MAX_AGENT_TURNS", "12");
        let c = Config::from_env();
        assert_eq!(c.max_entities, 4);
        assert_eq!(c.max_agent_turns, 12);
        std::env::remove_var("TRELLIS_MAX_ENTITIES");
        std::env::remove_var("TRELLIS_MAX_AGENT_TURNS");
    }
}
