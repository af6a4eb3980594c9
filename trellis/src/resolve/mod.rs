//! Semantic resolution: question entities → pinned graph nodes.
//!
//! Extract candidate entity strings, retrieve candidates per database
//! (fulltext first, `CONTAINS` fallback when no index exists), rerank with the
//! deterministic scorer, fold in caller overrides, and gate confidence.

mod extract;
mod rerank;

pub use extract::{extract_deterministic, extract_entities};
pub use rerank::{lexical_sim, normalize_alias, rank_candidates};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::Config;
use crate::error::OrchestratorError;
use crate::graph::GraphClient;
use crate::llm::LlmClient;

/// Where a candidate came from; participates in tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Fulltext,
    Contains,
    Override,
}

/// One resolved candidate for a question entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub question_entity: String,
    pub display_name: String,
    pub database: String,
    pub node_id: String,
    pub labels: Vec<String>,
    pub score: f64,
    pub source: CandidateSource,
    pub is_confident: bool,
}

/// Caller-supplied pin: ranked above every retrieved candidate for the same
/// question entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityOverride {
    pub question_entity: String,
    pub database: String,
    pub node_id: String,
    pub display_name: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Resolver output attached to semantic responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticContext {
    /// Extracted question entities, in extraction order.
    pub entities: Vec<String>,
    /// Ranked candidates per question entity.
    pub matches: BTreeMap<String, Vec<CandidateEntity>>,
}

impl SemanticContext {
    /// Best confident candidates, one per question entity, best score first.
    pub fn pinned(&self) -> Vec<&CandidateEntity> {
        let mut pins: Vec<&CandidateEntity> = self
            .matches
            .values()
            .filter_map(|ranked| ranked.first())
            .filter(|c| c.is_confident)
            .collect();
        pins.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        pins
    }
}

/// Entity resolution over a set of databases.
pub struct Resolver {
    graph: Arc<dyn GraphClient>,
    llm: Arc<dyn LlmClient>,
    config: Arc<Config>,
}

impl Resolver {
    pub fn new(graph: Arc<dyn GraphClient>, llm: Arc<dyn LlmClient>, config: Arc<Config>) -> Self {
        Self { graph, llm, config }
    }

    /// Resolves every extracted entity across `dbs`. An unreachable database
    /// is skipped with a warning; resolution degrades instead of failing.
    pub async fn resolve(
        &self,
        question: &str,
        dbs: &[String],
        overrides: &[EntityOverride],
        hints: &BTreeMap<String, Vec<String>>,
    ) -> Result<SemanticContext, OrchestratorError> {
        let mut entities =
            extract_entities(&self.llm, question, self.config.max_entities).await?;
        for o in overrides {
            if !entities
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&o.question_entity))
            {
                entities.push(o.question_entity.clone());
            }
        }

        let mut matches = BTreeMap::new();
        for entity in &entities {
            let mut candidates = Vec::new();
            for db in dbs {
                match self.collect_candidates(db, entity).await {
                    Ok(mut found) => candidates.append(&mut found),
                    Err(OrchestratorError::Unreachable { reason, .. }) => {
                        warn!(
                            db = %db,
                            entity = %entity,
                            reason = %reason,
                            "skipping unreachable database during resolve"
                        );
                    }
                    Err(other) => return Err(other),
                }
            }
            for o in overrides.iter().filter(|o| {
                o.question_entity.eq_ignore_ascii_case(entity)
            }) {
                candidates.push(CandidateEntity {
                    question_entity: entity.clone(),
                    display_name: o.display_name.clone(),
                    database: o.database.clone(),
                    node_id: o.node_id.clone(),
                    labels: o.labels.clone(),
                    score: 0.0,
                    source: CandidateSource::Override,
                    is_confident: true,
                });
            }
            let entity_hints = hints.get(entity).cloned().unwrap_or_default();
            let ranked = rank_candidates(entity, candidates, &entity_hints, &self.config);
            matches.insert(entity.clone(), ranked);
        }

        Ok(SemanticContext { entities, matches })
    }

    async fn collect_candidates(
        &self,
        db: &str,
        entity: &str,
    ) -> Result<Vec<CandidateEntity>, OrchestratorError> {
        let index = &self.config.fulltext_index;
        let ensure = self
            .graph
            .ensure_fulltext_index(db, index, &[], &[], false)
            .await
            .map_err(|e| attach_db(e.into(), db))?;

        if ensure.exists {
            let hits = self
                .graph
                .fulltext_search(db, index, entity, 10)
                .await
                .map_err(|e| attach_db(e.into(), db))?;
            return Ok(hits
                .into_iter()
                .map(|hit| CandidateEntity {
                    question_entity: entity.to_string(),
                    display_name: hit
                        .properties
                        .get("name")
                        .or_else(|| hit.properties.get("title"))
                        .and_then(Value::as_str)
                        .unwrap_or(&hit.node_id)
                        .to_string(),
                    database: db.to_string(),
                    node_id: hit.node_id,
                    labels: hit.labels,
                    score: hit.score,
                    source: CandidateSource::Fulltext,
                    is_confident: false,
                })
                .collect());
        }

        // No fulltext index: CONTAINS over name-like properties.
        let rows = self
            .graph
            .run_cypher(
                db,
                "MATCH (n) WHERE toLower(coalesce(n.name, n.title, '')) CONTAINS $term \
                 RETURN elementId(n) AS node_id, labels(n) AS labels, \
                 coalesce(n.name, n.title) AS name LIMIT $limit",
                json!({"term": entity.to_lowercase(), "limit": 10}),
            )
            .await
            .map_err(|e| attach_db(e.into(), db))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let node_id = row.get("node_id")?.as_str()?.to_string();
                let display_name = row
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(&node_id)
                    .to_string();
                Some(CandidateEntity {
                    question_entity: entity.to_string(),
                    display_name,
                    database: db.to_string(),
                    node_id,
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
                    score: 0.0,
                    source: CandidateSource::Contains,
                    is_confident: false,
                })
            })
            .collect())
    }
}

fn attach_db(e: OrchestratorError, db: &str) -> OrchestratorError {
    match e {
        OrchestratorError::Unreachable { reason, .. } => OrchestratorError::Unreachable {
            db: db.to_string(),
            reason,
        },
        other => other,
    }
}
