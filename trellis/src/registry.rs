//! Identifier validation and the database registry.
//!
//! The registry is the single source of truth for database names: downstream
//! components consult it before accepting a name from input. Labels are
//! treated as code: they are validated here before ever reaching a Cypher
//! string. Registration is append-only under a lock and idempotent.

use std::collections::BTreeSet;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::OrchestratorError;

/// System database holding trace output; never listed as a user database.
pub const TRACE_STORE_DB: &str = "agenttraces";

static DB_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z][A-Za-z0-9]*$").expect("db name pattern"));
static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("label pattern"));

/// True when `name` is a syntactically valid database name. Case-sensitive.
pub fn is_valid_db_name(name: &str) -> bool {
    DB_NAME_RE.is_match(name)
}

/// True when `label` may be interpolated into a Cypher statement.
pub fn is_valid_label(label: &str) -> bool {
    LABEL_RE.is_match(label)
}

/// Rejects a label before it can reach any query text.
pub fn require_valid_label(label: &str) -> Result<(), OrchestratorError> {
    if is_valid_label(label) {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidIdentifier(format!(
            "label `{label}`"
        )))
    }
}

/// Append-only registry of known database names.
pub struct IdentifierRegistry {
    names: RwLock<BTreeSet<String>>,
}

impl Default for IdentifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self {
            names: RwLock::new(BTreeSet::new()),
        }
    }

    /// Registers a database name. Idempotent; rejects invalid names before
    /// anything downstream can see them.
    pub fn register_db(&self, name: &str) -> Result<(), OrchestratorError> {
        if !is_valid_db_name(name) {
            return Err(OrchestratorError::InvalidIdentifier(format!(
                "database `{name}`"
            )));
        }
        let mut names = self.names.write().expect("registry lock");
        names.insert(name.to_string());
        Ok(())
    }

    /// True when the name has been registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.names.read().expect("registry lock").contains(name)
    }

    /// Fails with `NotRegistered` (or `InvalidIdentifier` for malformed input)
    /// unless the name is known.
    pub fn ensure_registered(&self, name: &str) -> Result<(), OrchestratorError> {
        if !is_valid_db_name(name) {
            return Err(OrchestratorError::InvalidIdentifier(format!(
                "database `{name}`"
            )));
        }
        if self.is_registered(name) {
            Ok(())
        } else {
            Err(OrchestratorError::NotRegistered(name.to_string()))
        }
    }

    /// Registered user-facing database names, sorted; system databases are excluded.
    pub fn list_user_dbs(&self) -> Vec<String> {
        self.names
            .read()
            .expect("registry lock")
            .iter()
            .filter(|n| n.as_str() != TRACE_STORE_DB)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the database pattern requires a leading letter and rejects separators.
    #[test]
    fn db_name_validation() {
        assert!(is_valid_db_name("kgnormal"));
        assert!(is_valid_db_name("Kg2"));
        assert!(!is_valid_db_name("2kg"));
        assert!(!is_valid_db_name("kg-normal"));
        assert!(!is_valid_db_name("kg normal"));
        assert!(!is_valid_db_name(""));
    }

    /// **Scenario**: labels allow underscores but never spaces or leading digits.
    #[test]
    fn label_validation() {
        assert!(is_valid_label("Supplier"));
        assert!(is_valid_label("_Internal"));
        assert!(is_valid_label("Class_2"));
        assert!(!is_valid_label("Bad Label"));
        assert!(!is_valid_label("1Bad"));
        assert!(!is_valid_label("Bad-Label"));
    }

    /// **Scenario**: registering twice is a no-op and the trace store never lists.
    #[test]
    fn register_is_idempotent_and_excludes_trace_store() {
        let reg = IdentifierRegistry::new();
        reg.register_db("kgnormal").unwrap();
        reg.register_db("kgnormal").unwrap();
        reg.register_db(TRACE_STORE_DB).unwrap();
        assert_eq!(reg.list_user_dbs(), vec!["kgnormal".to_string()]);
    }

    /// **Scenario**: invalid names fail registration; unknown names fail ensure_registered.
    #[test]
    fn rejects_invalid_and_unknown() {
        let reg = IdentifierRegistry::new();
        assert!(matches!(
            reg.register_db("bad db"),
            Err(OrchestratorError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            reg.ensure_registered("kgother"),
            Err(OrchestratorError::NotRegistered(_))
        ));
    }
}
