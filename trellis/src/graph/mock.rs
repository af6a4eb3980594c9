//! Scripted graph backend for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    require_read_only, CandidateHit, EnsureResult, GraphClient, GraphError, SchemaSnapshot,
};

/// In-memory [`GraphClient`]: fixed schemas, fulltext candidates, canned rows,
/// and per-database unreachability. Counts Cypher executions so cache tests
/// can assert how often the backend was actually hit.
pub struct MockGraph {
    schemas: BTreeMap<String, SchemaSnapshot>,
    unreachable: HashSet<String>,
    hits: BTreeMap<String, Vec<CandidateHit>>,
    /// `(db, query substring)` → rows. First match wins; no match returns no rows.
    rows: Vec<(String, String, Vec<Value>)>,
    indexes: Mutex<HashSet<(String, String)>>,
    cypher_calls: Mutex<HashMap<String, usize>>,
}

impl MockGraph {
    pub fn new() -> Self {
        Self {
            schemas: BTreeMap::new(),
            unreachable: HashSet::new(),
            hits: BTreeMap::new(),
            rows: Vec::new(),
            indexes: Mutex::new(HashSet::new()),
            cypher_calls: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a reachable database with the given schema.
    pub fn with_database(mut self, db: impl Into<String>, schema: SchemaSnapshot) -> Self {
        self.schemas.insert(db.into(), schema);
        self
    }

    /// Marks a database as down; every call against it fails `Unreachable`.
    pub fn with_unreachable(mut self, db: impl Into<String>) -> Self {
        self.unreachable.insert(db.into());
        self
    }

    /// Seeds fulltext candidates for one database.
    pub fn with_hits(mut self, db: impl Into<String>, hits: Vec<CandidateHit>) -> Self {
        self.hits.insert(db.into(), hits);
        self
    }

    /// Seeds rows returned for any Cypher containing `fragment` on `db`.
    pub fn with_rows(
        mut self,
        db: impl Into<String>,
        fragment: impl Into<String>,
        rows: Vec<Value>,
    ) -> Self {
        self.rows.push((db.into(), fragment.into(), rows));
        self
    }

    /// Pre-creates a fulltext index so searches succeed without an ensure call.
    pub fn with_index(self, db: impl Into<String>, index: impl Into<String>) -> Self {
        self.indexes
            .lock()
            .expect("mock index lock")
            .insert((db.into(), index.into()));
        self
    }

    /// Number of `run_cypher` executions against `db`.
    pub fn cypher_calls(&self, db: &str) -> usize {
        self.cypher_calls
            .lock()
            .expect("mock counter lock")
            .get(db)
            .copied()
            .unwrap_or(0)
    }

    fn check_reachable(&self, db: &str) -> Result<(), GraphError> {
        if self.unreachable.contains(db) {
            Err(GraphError::Unreachable(format!("{db} is down")))
        } else {
            Ok(())
        }
    }
}

impl Default for MockGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphClient for MockGraph {
    async fn run_cypher(
        &self,
        db: &str,
        query: &str,
        _params: Value,
    ) -> Result<Vec<Value>, GraphError> {
        require_read_only(query)?;
        self.check_reachable(db)?;
        *self
            .cypher_calls
            .lock()
            .expect("mock counter lock")
            .entry(db.to_string())
            .or_insert(0) += 1;
        for (row_db, fragment, rows) in &self.rows {
            if row_db == db && query.contains(fragment.as_str()) {
                return Ok(rows.clone());
            }
        }
        Ok(Vec::new())
    }

    async fn ensure_fulltext_index(
        &self,
        db: &str,
        index_name: &str,
        _labels: &[String],
        _properties: &[String],
        create_if_missing: bool,
    ) -> Result<EnsureResult, GraphError> {
        self.check_reachable(db)?;
        let mut indexes = self.indexes.lock().expect("mock index lock");
        let key = (db.to_string(), index_name.to_string());
        if indexes.contains(&key) {
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
        indexes.insert(key);
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
        self.check_reachable(db)?;
        let has_index = self
            .indexes
            .lock()
            .expect("mock index lock")
            .contains(&(db.to_string(), index_name.to_string()));
        if !has_index {
            return Ok(Vec::new());
        }
        let needle = terms.to_lowercase();
        let matches = self
            .hits
            .get(db)
            .map(|hits| {
                hits.iter()
                    .filter(|hit| {
                        hit.properties
                            .get("name")
                            .and_then(Value::as_str)
                            .map(|name| {
                                let name = name.to_lowercase();
                                needle
                                    .split_whitespace()
                                    .any(|term| name.contains(term.trim_matches('"')))
                            })
                            .unwrap_or(false)
                    })
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(matches)
    }

    async fn schema_snapshot(&self, db: &str) -> Result<SchemaSnapshot, GraphError> {
        self.check_reachable(db)?;
        Ok(self.schemas.get(db).cloned().unwrap_or_default())
    }
}
