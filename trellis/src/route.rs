//! Deterministic intent routing: `{lpg, rdf, hybrid}`.
//!
//! A cascade of keyword matchers scores both directions; when the margin is
//! too small the router asks the model once, and anything still ambiguous is
//! `hybrid`. Classification is pure over the normalized question text, so the
//! same input always routes the same way.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::llm::LlmClient;
use crate::message::Message;

/// Route targets: instance-level graph queries, schema-level hierarchy walks,
/// or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Lpg,
    Rdf,
    Hybrid,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Lpg => "lpg",
            Route::Rdf => "rdf",
            Route::Hybrid => "hybrid",
        }
    }
}

/// Signals for schema-level questions: type hierarchies, definitions, classes.
const RDF_MARKERS: &[&str] = &[
    "is-a",
    "is a kind of",
    "type of",
    "types of",
    "subclass",
    "superclass",
    "class",
    "classes",
    "taxonomy",
    "ontology",
    "hierarchy",
    "definition",
    "define",
    "defined as",
    "category",
    "categories",
    "kind of",
];

/// Signals for instance-level questions: entities, counts, attributes, hops.
const LPG_MARKERS: &[&str] = &[
    "how many",
    "count",
    "number of",
    "list",
    "which",
    "who",
    "connected",
    "connection",
    "related",
    "relationship between",
    "neighbors",
    "path",
    "supplies",
    "supplier",
    "owns",
    "located",
    "attribute",
    "property",
    "value of",
];

/// Deterministic classifier with a single bounded model fallback.
pub struct Router {
    llm: Option<Arc<dyn LlmClient>>,
    margin: f64,
}

impl Router {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, config: &Config) -> Self {
        Self {
            llm,
            margin: config.route_margin,
        }
    }

    /// Keyword-only score pair `(lpg, rdf)`, each normalized to `[0, 1]`.
    fn scores(question: &str) -> (f64, f64) {
        let text = normalize(question);
        let hits = |markers: &[&str]| -> f64 {
            markers.iter().filter(|m| text.contains(*m)).count() as f64
        };
        let lpg = hits(LPG_MARKERS);
        let rdf = hits(RDF_MARKERS);
        let total = lpg + rdf;
        if total == 0.0 {
            (0.0, 0.0)
        } else {
            (lpg / total, rdf / total)
        }
    }

    /// Classifies one question. At most one model call is made, and only when
    /// the keyword margin is below the configured threshold.
    pub async fn classify(&self, question: &str) -> Route {
        let (lpg, rdf) = Self::scores(question);
        let margin = (lpg - rdf).abs();
        if margin >= self.margin {
            let route = if lpg > rdf { Route::Lpg } else { Route::Rdf };
            debug!(route = route.as_str(), lpg, rdf, "routed by keyword cascade");
            return route;
        }
        if lpg == 0.0 && rdf == 0.0 {
            if let Some(llm) = &self.llm {
                if let Some(route) = self.ask_model(llm, question).await {
                    debug!(route = route.as_str(), "routed by model fallback");
                    return route;
                }
            }
        }
        debug!(lpg, rdf, "margin below threshold, routing hybrid");
        Route::Hybrid
    }

    async fn ask_model(&self, llm: &Arc<dyn LlmClient>, question: &str) -> Option<Route> {
        let prompt = format!(
            "Classify this question for a knowledge graph system. Reply with \
             exactly one word: `lpg` for questions about specific entities, \
             counts, attributes or neighborhoods; `rdf` for questions about \
             type hierarchies, classes or definitions; `hybrid` when both \
             apply.\n\nQuestion: {question}"
        );
        let reply = llm.complete(&[Message::user(prompt)], &[]).await.ok()?;
        match reply.content.trim().to_lowercase().as_str() {
            "lpg" => Some(Route::Lpg),
            "rdf" => Some(Route::Rdf),
            "hybrid" => Some(Route::Hybrid),
            _ => None,
        }
    }
}

fn normalize(question: &str) -> String {
    question.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
