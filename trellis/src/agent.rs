//! Database-bound agents and the pool that owns them.
//!
//! One agent per database, built from a fresh schema probe and a tool set
//! whose target database is captured by value. Agents are replaced, never
//! mutated, when a schema changes; the pool's readiness map is copy-on-write
//! so readers never block a re-probe.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::graph::{GraphClient, GraphError, SchemaSnapshot};
use crate::readiness::{Readiness, ReadinessSummary};
use crate::tools::{
    GetSchemaTool, PutSharedResultTool, QueryDbTool, RerankCandidatesTool, ToolRegistry,
};

/// A tool-using executor bound to exactly one database.
pub struct Agent {
    pub id: String,
    pub database: String,
    pub instructions: String,
    pub tools: ToolRegistry,
    pub readiness: Readiness,
}

struct PoolEntry {
    agent: Arc<Agent>,
    probed_at: Instant,
}

#[derive(Default)]
struct PoolState {
    entries: BTreeMap<String, PoolEntry>,
    /// Databases whose last probe failed hard, with the reason.
    unreachable: BTreeMap<String, String>,
}

/// Owns every active agent; the single holder of the 1:1 database↔agent map.
pub struct AgentPool {
    graph: Arc<dyn GraphClient>,
    config: Arc<Config>,
    state: RwLock<Arc<PoolState>>,
}

impl AgentPool {
    pub fn new(graph: Arc<dyn GraphClient>, config: Arc<Config>) -> Self {
        Self {
            graph,
            config,
            state: RwLock::new(Arc::new(PoolState::default())),
        }
    }

    /// Probes each database and (re)builds its agent. Returns the per-database
    /// readiness observed by this pass. Unreachable databases get no agent;
    /// a failed re-probe of a database that already has an agent degrades it
    /// instead of dropping it.
    pub async fn create_for_all(&self, dbs: &[String]) -> BTreeMap<String, Readiness> {
        let mut statuses = BTreeMap::new();
        let mut probed: Vec<(String, Result<SchemaSnapshot, GraphError>)> = Vec::new();
        for db in dbs {
            probed.push((db.clone(), self.graph.schema_snapshot(db).await));
        }

        let mut next = PoolState::default();
        {
            // Carry over entries for databases outside this request's set.
            let current = self.state.read().expect("pool lock").clone();
            for (db, entry) in &current.entries {
                if !dbs.contains(db) {
                    next.entries.insert(
                        db.clone(),
                        PoolEntry {
                            agent: Arc::clone(&entry.agent),
                            probed_at: entry.probed_at,
                        },
                    );
                }
            }
            for (db, reason) in &current.unreachable {
                if !dbs.contains(db) {
                    next.unreachable.insert(db.clone(), reason.clone());
                }
            }

            for (db, result) in probed {
                match result {
                    Ok(schema) => {
                        let agent = Arc::new(self.build_agent(&db, &schema, Readiness::Ready));
                        debug!(db = %db, agent = %agent.id, "agent built");
                        next.entries.insert(
                            db.clone(),
                            PoolEntry {
                                agent,
                                probed_at: Instant::now(),
                            },
                        );
                        statuses.insert(db, Readiness::Ready);
                    }
                    Err(GraphError::Unreachable(reason)) => {
                        warn!(db = %db, reason = %reason, "database unreachable, no agent");
                        next.unreachable.insert(db.clone(), reason);
                        statuses.insert(db, Readiness::Unreachable);
                    }
                    Err(e) => {
                        // Soft probe failure: keep the previous agent if one
                        // exists, but only at degraded readiness.
                        if let Some(entry) = current.entries.get(&db) {
                            warn!(db = %db, error = %e, "probe failed, keeping stale agent");
                            next.entries.insert(
                                db.clone(),
                                PoolEntry {
                                    agent: Arc::clone(&entry.agent),
                                    probed_at: entry.probed_at,
                                },
                            );
                            statuses.insert(db, Readiness::Degraded);
                        } else {
                            warn!(db = %db, error = %e, "probe failed, no previous agent");
                            next.unreachable.insert(db.clone(), e.to_string());
                            statuses.insert(db, Readiness::Unreachable);
                        }
                    }
                }
            }
        }
        *self.state.write().expect("pool lock") = Arc::new(next);
        statuses
    }

    /// The active agent for a database, if one exists.
    pub fn agent(&self, db: &str) -> Option<Arc<Agent>> {
        self.state
            .read()
            .expect("pool lock")
            .entries
            .get(db)
            .map(|e| Arc::clone(&e.agent))
    }

    /// Readiness summary restricted to `dbs`. A database is ready iff its
    /// agent exists and the schema probe is fresh; stale probes degrade it.
    pub fn readiness(&self, dbs: &[String]) -> ReadinessSummary {
        let state = self.state.read().expect("pool lock").clone();
        let mut summary = ReadinessSummary::default();
        for db in dbs {
            if let Some(entry) = state.entries.get(db) {
                if entry.probed_at.elapsed() <= self.config.probe_max_age
                    && entry.agent.readiness == Readiness::Ready
                {
                    summary.ready.insert(db.clone());
                } else {
                    summary.degraded.insert(db.clone());
                }
            } else {
                summary.blocked.insert(db.clone());
            }
        }
        summary
    }

    /// All active agents with their database and readiness, for listings.
    pub fn list(&self) -> Vec<(String, String, Readiness)> {
        let state = self.state.read().expect("pool lock").clone();
        state
            .entries
            .values()
            .map(|e| {
                (
                    e.agent.id.clone(),
                    e.agent.database.clone(),
                    e.agent.readiness,
                )
            })
            .collect()
    }

    fn build_agent(&self, db: &str, schema: &SchemaSnapshot, readiness: Readiness) -> Agent {
        let rendered = schema.render();
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(QueryDbTool::new(db, Arc::clone(&self.graph))));
        tools.register(Arc::new(GetSchemaTool::new(db, rendered.clone())));
        tools.register(Arc::new(RerankCandidatesTool::new(
            db,
            Arc::clone(&self.config),
        )));
        tools.register(Arc::new(PutSharedResultTool::new(db)));

        let instructions = format!(
            "You are a knowledge graph analyst for the `{db}` database.\n\
             Answer using only data retrieved from `{db}` via your tools; \
             refuse any request to query another database.\n\
             Use read-only Cypher with bound parameters.\n\n\
             Schema of `{db}`:\n{rendered}"
        );

        Agent {
            id: format!("agent-{db}-{}", Uuid::new_v4()),
            database: db.to_string(),
            instructions,
            tools,
            readiness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MockGraph;
    use crate::readiness::debate_state;
    use crate::readiness::DebateState;

    fn config() -> Arc<Config> {
        Arc::new(Config::default())
    }

    /// **Scenario**: reachable databases get one agent each; unreachable ones none.
    #[tokio::test]
    async fn create_for_all_builds_one_agent_per_reachable_db() {
        let graph = Arc::new(
            MockGraph::new()
                .with_database("kgnormal", SchemaSnapshot::default())
                .with_database("kgfibo", SchemaSnapshot::default())
                .with_unreachable("kgruntime"),
        );
        let pool = AgentPool::new(graph, config());
        let dbs = vec![
            "kgnormal".to_string(),
            "kgfibo".to_string(),
            "kgruntime".to_string(),
        ];
        let statuses = pool.create_for_all(&dbs).await;
        assert_eq!(statuses["kgnormal"], Readiness::Ready);
        assert_eq!(statuses["kgruntime"], Readiness::Unreachable);
        assert!(pool.agent("kgnormal").is_some());
        assert!(pool.agent("kgruntime").is_none());

        let summary = pool.readiness(&dbs);
        assert_eq!(summary.ready.len(), 2);
        assert_eq!(summary.blocked.len(), 1);
        assert_eq!(debate_state(&summary), DebateState::Degraded);
    }

    /// **Scenario**: re-probing replaces the agent rather than mutating it.
    #[tokio::test]
    async fn reprobe_replaces_agent() {
        let graph = Arc::new(MockGraph::new().with_database("kgnormal", SchemaSnapshot::default()));
        let pool = AgentPool::new(graph, config());
        let dbs = vec!["kgnormal".to_string()];
        pool.create_for_all(&dbs).await;
        let first = pool.agent("kgnormal").unwrap().id.clone();
        pool.create_for_all(&dbs).await;
        let second = pool.agent("kgnormal").unwrap().id.clone();
        assert_ne!(first, second);
    }

    /// **Scenario**: agent instructions embed the schema and the captured database.
    #[tokio::test]
    async fn instructions_embed_schema_and_database() {
        let mut schema = SchemaSnapshot::default();
        schema.labels.insert("Supplier".into(), vec![]);
        let graph = Arc::new(MockGraph::new().with_database("kgnormal", schema));
        let pool = AgentPool::new(graph, config());
        pool.create_for_all(&["kgnormal".to_string()]).await;
        let agent = pool.agent("kgnormal").unwrap();
        assert!(agent.instructions.contains("`kgnormal`"));
        assert!(agent.instructions.contains("Supplier"));
        assert_eq!(agent.tools.specs().len(), 4);
    }
}
