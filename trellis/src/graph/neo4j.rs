//! Bolt-backed graph gateway.
//!
//! One `neo4rs::Graph` per database, created lazily and cached; every call is
//! wrapped in the configured per-call timeout. Index DDL is the only write
//! this module ever issues, and it never takes client-controlled identifiers
//! that have not passed label validation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::registry::{is_valid_label, require_valid_label};

use super::{
    require_read_only, CandidateHit, EnsureResult, GraphClient, GraphError, PropertySpec,
    SchemaSnapshot,
};

pub struct Neo4jGraph {
    uri: String,
    user: String,
    password: String,
    call_timeout: Duration,
    connections: Mutex<HashMap<String, Graph>>,
}

impl Neo4jGraph {
    pub fn new(
        uri: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            uri: uri.into(),
            user: user.into(),
            password: password.into(),
            call_timeout,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Session bound to exactly one database; connections are cached per db.
    async fn graph_for(&self, db: &str) -> Result<Graph, GraphError> {
        let mut connections = self.connections.lock().await;
        if let Some(graph) = connections.get(db) {
            return Ok(graph.clone());
        }
        let config = ConfigBuilder::default()
            .uri(&self.uri)
            .user(&self.user)
            .password(&self.password)
            .db(db)
            .build()
            .map_err(|e| GraphError::Unreachable(e.to_string()))?;
        let graph = Graph::connect(config)
            .await
            .map_err(|e| GraphError::Unreachable(e.to_string()))?;
        connections.insert(db.to_string(), graph.clone());
        Ok(graph)
    }

    async fn execute_collect(&self, db: &str, query: Query) -> Result<Vec<Value>, GraphError> {
        let graph = self.graph_for(db).await?;
        let collect = async {
            let mut stream = graph
                .execute(query)
                .await
                .map_err(|e| map_backend_error(&e))?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await.map_err(|e| map_backend_error(&e))? {
                let value: Value = row
                    .to::<Value>()
                    .map_err(|e| GraphError::Syntax(format!("row decode: {e}")))?;
                rows.push(value);
            }
            Ok(rows)
        };
        match tokio::time::timeout(self.call_timeout, collect).await {
            Ok(result) => result,
            Err(_) => Err(GraphError::Timeout),
        }
    }
}

fn map_backend_error(e: &neo4rs::Error) -> GraphError {
    let text = e.to_string();
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("connection") || lowered.contains("io error") {
        GraphError::Unreachable(text)
    } else {
        GraphError::Syntax(text)
    }
}

fn bind_params(mut query: Query, params: &Value) -> Result<Query, GraphError> {
    let Some(map) = params.as_object() else {
        if params.is_null() {
            return Ok(query);
        }
        return Err(GraphError::Syntax("params must be a JSON object".into()));
    };
    for (key, value) in map {
        query = match value {
            Value::String(s) => query.param(key, s.as_str()),
            Value::Bool(b) => query.param(key, *b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.param(key, i)
                } else if let Some(f) = n.as_f64() {
                    query.param(key, f)
                } else {
                    return Err(GraphError::Syntax(format!("unsupported number for {key}")));
                }
            }
            other => {
                return Err(GraphError::Syntax(format!(
                    "unsupported param type for {key}: {other}"
                )))
            }
        };
    }
    Ok(query)
}

#[async_trait]
impl GraphClient for Neo4jGraph {
    async fn run_cypher(
        &self,
        db: &str,
        query: &str,
        params: Value,
    ) -> Result<Vec<Value>, GraphError> {
        require_read_only(query)?;
        debug!(db, "run_cypher");
        let bound = bind_params(Query::new(query.to_string()), &params)?;
        self.execute_collect(db, bound).await
    }

    async fn ensure_fulltext_index(
        &self,
        db: &str,
        index_name: &str,
        labels: &[String],
        properties: &[String],
        create_if_missing: bool,
    ) -> Result<EnsureResult, GraphError> {
        // Index names and labels share the label grammar; nothing unvalidated
        // is ever interpolated into the DDL below.
        if !is_valid_label(index_name) {
            return Err(GraphError::Forbidden(format!(
                "index name `{index_name}`"
            )));
        }
        for label in labels {
            require_valid_label(label).map_err(|e| GraphError::Forbidden(e.to_string()))?;
        }
        for prop in properties {
            if !is_valid_label(prop) {
                return Err(GraphError::Forbidden(format!("property `{prop}`")));
            }
        }

        let existing = self
            .execute_collect(db, Query::new("SHOW INDEXES YIELD name RETURN name".into()))
            .await?;
        let exists = existing.iter().any(|row| {
            row.get("name").and_then(Value::as_str) == Some(index_name)
        });
        if exists {
            return Ok(EnsureResult {
                exists: true,
                created: false,
            });
        }
        if !create_if_missing {
            return Ok(EnsureResult {
                exists: false,
                created: false,
            });
        }

        let label_list = labels.join("|");
        let prop_list = properties
            .iter()
            .map(|p| format!("n.{p}"))
            .collect::<Vec<_>>()
            .join(", ");
        let ddl = format!(
            "CREATE FULLTEXT INDEX {index_name} IF NOT EXISTS FOR (n:{label_list}) ON EACH [{prop_list}]"
        );
        self.execute_collect(db, Query::new(ddl)).await?;
        Ok(EnsureResult {
            exists: true,
            created: true,
        })
    }

    async fn fulltext_search(
        &self,
        db: &str,
        index_name: &str,
        terms: &str,
        limit: usize,
    ) -> Result<Vec<CandidateHit>, GraphError> {
        let query = Query::new(
            "CALL db.index.fulltext.queryNodes($index, $terms) YIELD node, score \
             RETURN elementId(node) AS node_id, score, labels(node) AS labels, \
             properties(node) AS properties LIMIT $limit"
                .into(),
        )
        .param("index", index_name)
        .param("terms", terms)
        .param("limit", limit as i64);
        let rows = self.execute_collect(db, query).await?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            hits.push(CandidateHit {
                node_id: row
                    .get("node_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                score: row.get("score").and_then(Value::as_f64).unwrap_or(0.0),
                labels: row
                    .get("labels")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                properties: row.get("properties").cloned().unwrap_or(Value::Null),
            });
        }
        Ok(hits)
    }

    async fn schema_snapshot(&self, db: &str) -> Result<SchemaSnapshot, GraphError> {
        let mut snapshot = SchemaSnapshot::default();

        let node_rows = self
            .execute_collect(
                db,
                Query::new(
                    "CALL db.schema.nodeTypeProperties() \
                     YIELD nodeLabels, propertyName, propertyTypes \
                     RETURN nodeLabels, propertyName, propertyTypes"
                        .into(),
                ),
            )
            .await?;
        for row in node_rows {
            let labels: Vec<String> = row
                .get("nodeLabels")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let Some(prop) = row.get("propertyName").and_then(Value::as_str) else {
                continue;
            };
            let prop_type = row
                .get("propertyTypes")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(Value::as_str)
                .unwrap_or("String")
                .to_string();
            for label in labels {
                snapshot
                    .labels
                    .entry(label)
                    .or_default()
                    .push(PropertySpec {
                        name: prop.to_string(),
                        prop_type: prop_type.clone(),
                    });
            }
        }

        let rel_rows = self
            .execute_collect(
                db,
                Query::new(
                    "CALL db.schema.relTypeProperties() \
                     YIELD relType, propertyName, propertyTypes \
                     RETURN relType, propertyName, propertyTypes"
                        .into(),
                ),
            )
            .await?;
        for row in rel_rows {
            let Some(rel) = row.get("relType").and_then(Value::as_str) else {
                continue;
            };
            let rel = rel.trim_matches([':', '`']).to_string();
            let entry = snapshot.relationship_types.entry(rel).or_default();
            if let Some(prop) = row.get("propertyName").and_then(Value::as_str) {
                let prop_type = row
                    .get("propertyTypes")
                    .and_then(Value::as_array)
                    .and_then(|a| a.first())
                    .and_then(Value::as_str)
                    .unwrap_or("String")
                    .to_string();
                entry.push(PropertySpec {
                    name: prop.to_string(),
                    prop_type,
                });
            }
        }

        Ok(snapshot)
    }
}
