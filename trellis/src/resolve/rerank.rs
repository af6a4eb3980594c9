//! Deterministic candidate reranking.
//!
//! `score = w1·lexical_sim + w2·fulltext_score_norm + w3·label_hint_bonus`,
//! with alias normalization applied before similarity. Ordering is total and
//! stable: ties break by source (override > fulltext > contains), then by
//! display name, so identical inputs always produce identical rankings.

use crate::config::Config;

use super::{CandidateEntity, CandidateSource};

/// Lowercases and strips punctuation, collapsing runs of whitespace.
pub fn normalize_alias(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Bigram Dice similarity over normalized strings, in `[0, 1]`.
pub fn lexical_sim(a: &str, b: &str) -> f64 {
    let a = normalize_alias(a);
    let b = normalize_alias(b);
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let ba = bigrams(&a);
    let bb = bigrams(&b);
    if ba.is_empty() || bb.is_empty() {
        // One-character names: fall back to containment.
        return if a.contains(&b) || b.contains(&a) {
            0.5
        } else {
            0.0
        };
    }
    let mut remaining = bb.clone();
    let mut shared = 0usize;
    for g in &ba {
        if let Some(pos) = remaining.iter().position(|h| h == g) {
            remaining.remove(pos);
            shared += 1;
        }
    }
    (2.0 * shared as f64) / (ba.len() + bb.len()) as f64
}

fn source_rank(source: CandidateSource) -> u8 {
    match source {
        CandidateSource::Override => 0,
        CandidateSource::Fulltext => 1,
        CandidateSource::Contains => 2,
    }
}

fn dedup_key(candidate: &CandidateEntity) -> (String, Vec<String>) {
    let mut labels = candidate.labels.clone();
    labels.sort();
    (normalize_alias(&candidate.display_name), labels)
}

/// Scores, sorts, deduplicates, and gates one entity's candidates.
///
/// Overrides are moved to rank 0 and marked confident. Candidates carry their
/// raw retrieval score on input; the field holds the final blended score on
/// output.
pub fn rank_candidates(
    question_entity: &str,
    candidates: Vec<CandidateEntity>,
    hints: &[String],
    config: &Config,
) -> Vec<CandidateEntity> {
    let (w_lex, w_fulltext, w_hint) = config.rerank_weights;

    let max_raw = candidates
        .iter()
        .filter(|c| c.source != CandidateSource::Override)
        .map(|c| c.score)
        .fold(0.0_f64, f64::max);

    let (mut overrides, rest): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|c| c.source == CandidateSource::Override);

    let mut scored: Vec<CandidateEntity> = rest
        .into_iter()
        .map(|mut c| {
            let lex = lexical_sim(&c.display_name, question_entity);
            let fulltext_norm = if max_raw > 0.0 { c.score / max_raw } else { 0.0 };
            let hint_bonus = if c.labels.iter().any(|l| hints.iter().any(|h| h == l)) {
                1.0
            } else {
                0.0
            };
            c.score = w_lex * lex + w_fulltext * fulltext_norm + w_hint * hint_bonus;
            c.is_confident = false;
            c
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| source_rank(a.source).cmp(&source_rank(b.source)))
            .then_with(|| a.display_name.cmp(&b.display_name))
    });

    // Exact dedup on (name, labels) keeps the best-scored survivor, then the
    // near-duplicate collapse folds candidates whose normalized names are
    // almost identical under the same label set.
    let mut deduped: Vec<CandidateEntity> = Vec::with_capacity(scored.len());
    for candidate in scored {
        let key = dedup_key(&candidate);
        let duplicate = deduped.iter().any(|kept| {
            let kept_key = dedup_key(kept);
            kept_key == key
                || (kept_key.1 == key.1
                    && lexical_sim(&kept.display_name, &candidate.display_name)
                        >= config.dedup_threshold)
        });
        if !duplicate {
            deduped.push(candidate);
        }
    }

    for o in &mut overrides {
        o.score = 1.0;
        o.is_confident = true;
        o.question_entity = question_entity.to_string();
    }
    overrides.sort_by(|a, b| a.display_name.cmp(&b.display_name));

    let mut ranked = overrides;
    ranked.extend(deduped);

    if let Some(top) = ranked.first() {
        let confident = top.source == CandidateSource::Override
            || ranked.len() == 1
            || ranked
                .get(1)
                .map(|second| top.score - second.score >= config.confidence_gap)
                .unwrap_or(true);
        if let Some(top) = ranked.first_mut() {
            top.is_confident = confident || top.is_confident;
        }
    }

    ranked
}
