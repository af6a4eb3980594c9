//! Question-entity extraction: deterministic tokenizer plus one short model call.

use std::sync::Arc;

use tracing::debug;

use crate::llm::{LlmClient, LlmError};
use crate::message::Message;

/// Question words and connectives never treated as entity tokens.
const STOPWORDS: &[&str] = &[
    "Who", "What", "Which", "Where", "When", "Why", "How", "Is", "Are", "Does", "Do", "The", "A",
    "An", "List", "Show", "Compare", "Find", "Give", "Tell", "And", "Or", "Of", "In", "On", "For",
    "With", "About", "Between",
];

/// Deterministic pass: quoted strings, runs of capitalized words, and acronyms.
pub fn extract_deterministic(question: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        let candidate = candidate.trim().to_string();
        if !candidate.is_empty()
            && !entities
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&candidate))
        {
            entities.push(candidate);
        }
    };

    // Quoted phrases first; they are the strongest signal.
    for quote in ['"', '\''] {
        let mut parts = question.split(quote);
        parts.next();
        while let (Some(inner), Some(_)) = (parts.next(), parts.next()) {
            push(inner.to_string());
        }
    }

    // Runs of capitalized words and ALL-CAPS acronyms.
    let mut run: Vec<&str> = Vec::new();
    for raw in question.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric());
        let capitalized = token
            .chars()
            .next()
            .map(char::is_uppercase)
            .unwrap_or(false);
        if capitalized && !STOPWORDS.contains(&token) {
            run.push(token);
        } else {
            if !run.is_empty() {
                push(run.join(" "));
                run.clear();
            }
            // Acronyms survive even when stop-listed patterns do not apply.
            if token.len() >= 2 && token.chars().all(|c| c.is_ascii_uppercase()) {
                push(token.to_string());
            }
        }
    }
    if !run.is_empty() {
        push(run.join(" "));
    }

    entities
}

/// Merges the deterministic pass with one model call, deduplicates, and caps
/// the result. The model call is best-effort: parse failures only log.
pub async fn extract_entities(
    llm: &Arc<dyn LlmClient>,
    question: &str,
    cap: usize,
) -> Result<Vec<String>, LlmError> {
    let mut entities = extract_deterministic(question);

    let prompt = format!(
        "Extract the named entities a knowledge graph lookup should resolve \
         from this question. Reply with a JSON array of strings only.\n\nQuestion: {question}"
    );
    let reply = llm
        .complete(&[Message::user(prompt)], &[])
        .await?;
    match parse_entity_array(&reply.content) {
        Some(extra) => {
            for entity in extra {
                if !entities.iter().any(|e| e.eq_ignore_ascii_case(&entity)) {
                    entities.push(entity);
                }
            }
        }
        None => debug!("entity extraction reply was not a JSON array; using tokenizer output"),
    }

    entities.truncate(cap);
    Ok(entities)
}

fn parse_entity_array(content: &str) -> Option<Vec<String>> {
    let start = content.find('[')?;
    let end = content.rfind(']')?;
    serde_json::from_str::<Vec<String>>(&content[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: capitalized runs and acronyms come out; question words do not.
    #[test]
    fn tokenizer_finds_names_and_acronyms() {
        let entities = extract_deterministic("Who supplies ACME in New York?");
        assert!(entities.contains(&"ACME".to_string()));
        assert!(entities.contains(&"New York".to_string()));
        assert!(!entities.iter().any(|e| e == "Who"));
    }

    /// **Scenario**: quoted phrases are extracted verbatim.
    #[test]
    fn tokenizer_finds_quoted_phrases() {
        let entities = extract_deterministic("What is \"interest rate swap\" linked to?");
        assert!(entities.contains(&"interest rate swap".to_string()));
    }

    /// **Scenario**: a malformed model reply falls back to the tokenizer output.
    #[test]
    fn parse_tolerates_garbage() {
        assert!(parse_entity_array("no json here").is_none());
        assert_eq!(
            parse_entity_array("sure: [\"ACME\", \"Bond\"]").unwrap(),
            vec!["ACME".to_string(), "Bond".to_string()]
        );
    }
}
