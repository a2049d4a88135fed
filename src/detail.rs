//! Detail-token manager.
//!
//! Oversized tool results are parked here under short opaque ids and a
//! summary goes back to the agent instead. `get_detailed_data` retrieves the
//! stored value (optionally path-indexed) until the token expires.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Error, Result};

/// Default token lifetime.
const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Items shown when summarizing arrays and objects.
const SUMMARY_PREVIEW_ITEMS: usize = 5;

struct Entry {
    value: Value,
    created: Instant,
    size: usize,
}

/// Process-wide store for oversized tool results.
pub struct DetailStore {
    entries: HashMap<String, Entry>,
    /// Every id ever minted. Ids are never reused, even after expiry, so a
    /// stale id always fails as expired rather than returning someone
    /// else's data.
    minted: HashSet<String>,
    ttl: Duration,
}

impl Default for DetailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DetailStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            minted: HashSet::new(),
            ttl,
        }
    }

    /// Store a value and return its opaque id. Size is computed once here.
    pub fn store(&mut self, value: Value) -> String {
        let id = self.mint_id();
        let size = serialized_size(&value);
        debug!(id = %id, size, "stored detail value");
        self.entries.insert(
            id.clone(),
            Entry {
                value,
                created: Instant::now(),
                size,
            },
        );
        id
    }

    fn mint_id(&mut self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id = format!("detail_{:08x}{:04x}", rng.gen::<u32>(), rng.gen::<u16>());
            if self.minted.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Retrieve a stored value, optionally indexing into it with a
    /// dot-separated path (numeric segments index arrays).
    pub fn retrieve(&mut self, id: &str, path: Option<&str>) -> Result<Value> {
        let entry = match self.entries.get(id) {
            Some(e) => e,
            None => {
                return Err(if self.minted.contains(id) {
                    Error::DetailExpired(id.to_string())
                } else {
                    Error::DetailInvalid(format!("unknown id `{id}`"))
                });
            }
        };
        if entry.created.elapsed() > self.ttl {
            self.entries.remove(id);
            return Err(Error::DetailExpired(id.to_string()));
        }
        match path {
            None => Ok(entry.value.clone()),
            Some(p) => index_path(&entry.value, p)
                .cloned()
                .ok_or_else(|| Error::DetailInvalid(format!("path `{p}` not found in `{id}`"))),
        }
    }

    /// Return the value itself when it fits, or park it and return a
    /// summary + detail id.
    pub fn smart_handle(&mut self, value: Value, max_bytes: usize) -> Value {
        let size = serialized_size(&value);
        if size <= max_bytes {
            return value;
        }
        let summary = summarize(&value, size);
        let id = self.store(value);
        json!({
            "summary": summary,
            "detailId": id,
            "hint": "use get_detailed_data with this detailId (and an optional dotted path) for the full result",
        })
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.created.elapsed() <= ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.entries.values().map(|e| e.size).sum()
    }
}

fn serialized_size(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

fn index_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = value;
    for segment in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(cur)
}

fn summarize(value: &Value, size: usize) -> Value {
    match value {
        Value::Object(map) => {
            let keys: Vec<&String> = map.keys().take(SUMMARY_PREVIEW_ITEMS * 4).collect();
            json!({
                "type": "object",
                "totalBytes": size,
                "keyCount": map.len(),
                "keys": keys,
            })
        }
        Value::Array(items) => {
            let preview: Vec<Value> = items
                .iter()
                .take(SUMMARY_PREVIEW_ITEMS)
                .map(preview_item)
                .collect();
            json!({
                "type": "array",
                "totalBytes": size,
                "length": items.len(),
                "preview": preview,
            })
        }
        Value::String(s) => {
            let head: String = s.chars().take(400).collect();
            json!({
                "type": "string",
                "totalBytes": size,
                "length": s.len(),
                "head": head,
            })
        }
        other => other.clone(),
    }
}

fn preview_item(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let keys: Vec<&String> = map.keys().take(SUMMARY_PREVIEW_ITEMS).collect();
            json!({ "keys": keys })
        }
        Value::String(s) if s.len() > 80 => {
            let head: String = s.chars().take(77).collect();
            Value::String(format!("{head}..."))
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_retrieve_identity() {
        let mut store = DetailStore::new();
        let value = json!({ "a": [1, 2, 3], "b": { "c": "deep" } });
        let id = store.store(value.clone());
        assert!(id.starts_with("detail_"));
        assert_eq!(store.retrieve(&id, None).unwrap(), value);
        // Retrieval is repeatable until expiry.
        assert_eq!(store.retrieve(&id, None).unwrap(), value);
    }

    #[test]
    fn test_path_indexing() {
        let mut store = DetailStore::new();
        let id = store.store(json!({ "children": [{ "tag": "div" }, { "tag": "a" }] }));
        assert_eq!(
            store.retrieve(&id, Some("children.0.tag")).unwrap(),
            json!("div")
        );
        assert_eq!(
            store.retrieve(&id, Some("children.1.tag")).unwrap(),
            json!("a")
        );
        // Bad path fails without disturbing the entry.
        assert!(matches!(
            store.retrieve(&id, Some("children.9.tag")),
            Err(Error::DetailInvalid(_))
        ));
        assert!(store.retrieve(&id, None).is_ok());
    }

    #[test]
    fn test_unknown_vs_expired() {
        let mut store = DetailStore::with_ttl(Duration::from_millis(0));
        let id = store.store(json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            store.retrieve(&id, None),
            Err(Error::DetailExpired(_))
        ));
        assert!(matches!(
            store.retrieve("detail_nope", None),
            Err(Error::DetailInvalid(_))
        ));
        // Expired stays expired, never invalid: the id was minted once.
        assert!(matches!(
            store.retrieve(&id, None),
            Err(Error::DetailExpired(_))
        ));
    }

    #[test]
    fn test_smart_handle_small_passthrough() {
        let mut store = DetailStore::new();
        let value = json!({ "small": true });
        assert_eq!(store.smart_handle(value.clone(), 1024), value);
        assert!(store.is_empty());
    }

    #[test]
    fn test_smart_handle_large_parks() {
        let mut store = DetailStore::new();
        let big: Vec<String> = (0..1000).map(|i| format!("item-{i}")).collect();
        let wrapped = store.smart_handle(json!(big), 256);
        let id = wrapped["detailId"].as_str().unwrap().to_string();
        assert_eq!(wrapped["summary"]["length"], 1000);
        let back = store.retrieve(&id, None).unwrap();
        assert_eq!(back.as_array().unwrap().len(), 1000);
        assert_eq!(store.retrieve(&id, Some("3")).unwrap(), json!("item-3"));
    }

    #[test]
    fn test_cleanup() {
        let mut store = DetailStore::with_ttl(Duration::from_millis(0));
        store.store(json!(1));
        store.store(json!(2));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.cleanup(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_ids_unique() {
        let mut store = DetailStore::new();
        let a = store.store(json!(1));
        let b = store.store(json!(2));
        assert_ne!(a, b);
    }
}
