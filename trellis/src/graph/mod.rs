//! Graph gateway: read-only Cypher execution, fulltext retrieval, schema snapshots.
//!
//! Everything in the request path goes through [`GraphClient`]; the Bolt
//! implementation lives in [`Neo4jGraph`] and tests run against [`MockGraph`].
//! A session is bound to exactly one database per call, and every statement is
//! checked by [`require_read_only`] before it reaches the wire.

mod mock;
mod neo4j;

pub use mock::MockGraph;
pub use neo4j::Neo4jGraph;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Graph backend failure kinds.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The backend is down for this database; the caller downgrades the
    /// database to unreachable for the rest of the request.
    #[error("graph unreachable: {0}")]
    Unreachable(String),
    /// The statement or result could not be processed.
    #[error("cypher error: {0}")]
    Syntax(String),
    /// The per-call deadline elapsed.
    #[error("graph call timed out")]
    Timeout,
    /// The statement was rejected before execution (mutating keyword).
    #[error("statement rejected: {0}")]
    Forbidden(String),
}

/// Property name and type as reported by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    pub prop_type: String,
}

/// Labels, relationship types, and their property types for one database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub labels: BTreeMap<String, Vec<PropertySpec>>,
    pub relationship_types: BTreeMap<String, Vec<PropertySpec>>,
}

impl SchemaSnapshot {
    /// Compact rendering embedded into agent instructions.
    pub fn render(&self) -> String {
        let mut out = String::from("Node labels:\n");
        for (label, props) in &self.labels {
            let names: Vec<&str> = props.iter().map(|p| p.name.as_str()).collect();
            out.push_str(&format!("  {} ({})\n", label, names.join(", ")));
        }
        out.push_str("Relationship types:\n");
        for (rel, props) in &self.relationship_types {
            let names: Vec<&str> = props.iter().map(|p| p.name.as_str()).collect();
            out.push_str(&format!("  {} ({})\n", rel, names.join(", ")));
        }
        out
    }
}

/// One fulltext (or CONTAINS-fallback) candidate. `node_id` is an
/// `elementId(...)`-style stable identifier, never a legacy integer id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateHit {
    pub node_id: String,
    pub score: f64,
    pub labels: Vec<String>,
    pub properties: Value,
}

/// Outcome of an index-ensure call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsureResult {
    /// Whether the index exists after the call.
    pub exists: bool,
    /// Whether this call created it.
    pub created: bool,
}

/// Read-only gateway to one labeled property graph backend.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Executes a read-only Cypher statement against one database. Values are
    /// always bound as parameters; `params` must be a JSON object of scalars.
    async fn run_cypher(
        &self,
        db: &str,
        query: &str,
        params: Value,
    ) -> Result<Vec<Value>, GraphError>;

    /// Ensures a fulltext index over `labels` × `properties`. With
    /// `create_if_missing = false` this only reports existence. Idempotent.
    async fn ensure_fulltext_index(
        &self,
        db: &str,
        index_name: &str,
        labels: &[String],
        properties: &[String],
        create_if_missing: bool,
    ) -> Result<EnsureResult, GraphError>;

    /// Fulltext candidate retrieval over an existing index.
    async fn fulltext_search(
        &self,
        db: &str,
        index_name: &str,
        terms: &str,
        limit: usize,
    ) -> Result<Vec<CandidateHit>, GraphError>;

    /// Label/relationship/property introspection; doubles as the readiness probe.
    async fn schema_snapshot(&self, db: &str) -> Result<SchemaSnapshot, GraphError>;
}

const MUTATING_KEYWORDS: &[&str] = &[
    "CREATE", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "DROP", "LOAD", "FOREACH", "ALTER",
];

/// Rejects statements that begin with a mutating keyword. Runs before any I/O.
pub fn require_read_only(query: &str) -> Result<(), GraphError> {
    let first = query
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    if MUTATING_KEYWORDS.contains(&first.as_str()) {
        return Err(GraphError::Forbidden(format!(
            "mutating statement ({first})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: reads pass, writes are rejected case-insensitively.
    #[test]
    fn read_only_guard() {
        assert!(require_read_only("MATCH (n) RETURN n").is_ok());
        assert!(require_read_only("  match (n) return n").is_ok());
        assert!(require_read_only("CALL db.index.fulltext.queryNodes('x', 'y')").is_ok());
        assert!(matches!(
            require_read_only("CREATE (n:Thing)"),
            Err(GraphError::Forbidden(_))
        ));
        assert!(matches!(
            require_read_only("merge (n:Thing)"),
            Err(GraphError::Forbidden(_))
        ));
        assert!(matches!(
            require_read_only("DETACH DELETE n"),
            Err(GraphError::Forbidden(_))
        ));
    }

    /// **Scenario**: snapshot rendering lists labels with their properties.
    #[test]
    fn snapshot_render_lists_labels() {
        let mut snap = SchemaSnapshot::default();
        snap.labels.insert(
            "Supplier".into(),
            vec![PropertySpec {
                name: "name".into(),
                prop_type: "String".into(),
            }],
        );
        let text = snap.render();
        assert!(text.contains("Supplier (name)"));
    }
}
