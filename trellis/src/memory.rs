//! Request-scoped shared memory.
//!
//! One instance per request, shared by reference with every tool closure and
//! debate worker of that request. Holds a bounded LRU of Cypher results keyed
//! by a fingerprint of `(db, normalized query)` plus the per-agent answer
//! fragments collected during a debate. Operations serialize on one mutex, so
//! a read returns a consistent snapshot of everything written before the call.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Strips `//` line comments and `/* */` block comments and trims trailing
/// whitespace so that formatting differences do not defeat the cache.
pub fn normalize_cypher(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    let mut in_block = false;
    let mut in_line = false;
    let mut in_string: Option<char> = None;
    while let Some(c) = chars.next() {
        if in_block {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block = false;
            }
            continue;
        }
        if in_line {
            if c == '\n' {
                in_line = false;
                out.push(c);
            }
            continue;
        }
        if let Some(quote) = in_string {
            out.push(c);
            if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                in_string = Some(c);
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                chars.next();
                in_line = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_block = true;
            }
            _ => out.push(c),
        }
    }
    out.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

/// Cache key for one `(db, query)` pair.
pub fn fingerprint(db: &str, query: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    db.hash(&mut hasher);
    0u8.hash(&mut hasher);
    normalize_cypher(query).hash(&mut hasher);
    hasher.finish()
}

struct MemoryInner {
    cache: HashMap<u64, String>,
    /// Recency order, least recent first. Touched on both get and put.
    order: VecDeque<u64>,
    results: BTreeMap<String, String>,
}

/// Per-request bounded cache for Cypher results and agent answer fragments.
pub struct SharedMemory {
    inner: Mutex<MemoryInner>,
    capacity: usize,
}

impl SharedMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                cache: HashMap::new(),
                order: VecDeque::new(),
                results: BTreeMap::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Returns the cached result for `(db, query)` and marks it most recent.
    pub fn get_cached(&self, db: &str, query: &str) -> Option<String> {
        let key = fingerprint(db, query);
        let mut inner = self.inner.lock().expect("memory lock");
        let hit = inner.cache.get(&key).cloned();
        if hit.is_some() {
            touch(&mut inner.order, key);
        }
        hit
    }

    /// Stores a result, evicting the least recently used entry at capacity.
    pub fn put_cached(&self, db: &str, query: &str, result: impl Into<String>) {
        let key = fingerprint(db, query);
        let mut inner = self.inner.lock().expect("memory lock");
        if inner.cache.insert(key, result.into()).is_none() && inner.cache.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.cache.remove(&oldest);
            }
        }
        touch(&mut inner.order, key);
    }

    /// Records one agent's answer fragment. Later writes for the same database win.
    pub fn put_result(&self, db: &str, answer: impl Into<String>) {
        let mut inner = self.inner.lock().expect("memory lock");
        inner.results.insert(db.to_string(), answer.into());
    }

    /// Snapshot of all fragments written so far, keyed by database.
    pub fn all_results(&self) -> BTreeMap<String, String> {
        self.inner.lock().expect("memory lock").results.clone()
    }
}

fn touch(order: &mut VecDeque<u64>, key: u64) {
    if let Some(pos) = order.iter().position(|k| *k == key) {
        order.remove(pos);
    }
    order.push_back(key);
}
