//! Two-tier script cache.
//!
//! Hot tier: in-memory LRU by access recency under a byte budget. Warm tier:
//! on-disk entries keyed by content hash, with a JSON index mapping cache
//! keys to hashes. Disk TTL outlives memory TTL; expired entries are
//! unreadable either way. Callers serialize access (the collector holds the
//! cache behind its own lock), which gives per-key single-flight for free.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::compress::content_hash;
use crate::Result;

/// Disk-entry removals per `cleanup` call, to bound I/O.
const CLEANUP_IO_BOUND: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    hash: String,
    stored_unix: i64,
    size: usize,
}

struct MemEntry<V> {
    value: V,
    size: usize,
    stored: Instant,
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub total_size: usize,
}

/// Two-tier keyed store for collected-code results.
pub struct ScriptCache<V> {
    memory: LruCache<String, MemEntry<V>>,
    resident: usize,
    memory_budget: usize,
    memory_ttl: Duration,
    disk_ttl: Duration,
    dir: PathBuf,
    index: HashMap<String, IndexEntry>,
}

impl<V: Clone + Serialize + DeserializeOwned> ScriptCache<V> {
    pub fn new(
        dir: impl Into<PathBuf>,
        memory_budget: usize,
        memory_ttl: Duration,
        disk_ttl: Duration,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let index = load_index(&dir);
        Ok(Self {
            memory: LruCache::unbounded(),
            resident: 0,
            memory_budget,
            memory_ttl,
            disk_ttl,
            dir,
            index,
        })
    }

    fn key(url: &str, options_hash: &str) -> String {
        format!("{url}|{options_hash}")
    }

    /// Fresh hit from memory (no disk I/O) or disk (promoted to memory).
    pub fn get(&mut self, url: &str, options_hash: &str) -> Option<V> {
        let key = Self::key(url, options_hash);

        if let Some(entry) = self.memory.get(&key) {
            if entry.stored.elapsed() <= self.memory_ttl {
                debug!(%key, "cache hit (memory)");
                return Some(entry.value.clone());
            }
            let dead = self.memory.pop(&key);
            if let Some(e) = dead {
                self.resident -= e.size;
            }
        }

        let meta = self.index.get(&key)?.clone();
        let age = chrono::Utc::now().timestamp() - meta.stored_unix;
        if age < 0 || age as u64 > self.disk_ttl.as_secs() {
            self.index.remove(&key);
            return None;
        }
        let path = self.dir.join(format!("{}.json", meta.hash));
        let raw = match std::fs::read_to_string(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!(%key, error = %e, "disk cache entry unreadable");
                self.index.remove(&key);
                return None;
            }
        };
        let value: V = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(%key, error = %e, "disk cache entry corrupt");
                self.index.remove(&key);
                return None;
            }
        };
        debug!(%key, "cache hit (disk), promoting");
        self.insert_memory(key, value.clone(), raw.len());
        Some(value)
    }

    /// Store under both tiers. The disk entry is keyed by content hash, so
    /// identical results from different keys share one file.
    pub fn set(&mut self, url: &str, options_hash: &str, value: &V) -> Result<()> {
        let key = Self::key(url, options_hash);
        let raw = serde_json::to_string(value)?;
        let hash = content_hash(&raw);
        let path = self.dir.join(format!("{hash}.json"));
        if !path.exists() {
            std::fs::write(&path, &raw)?;
        }
        self.index.insert(
            key.clone(),
            IndexEntry {
                hash,
                stored_unix: chrono::Utc::now().timestamp(),
                size: raw.len(),
            },
        );
        self.persist_index()?;
        self.insert_memory(key, value.clone(), raw.len());
        Ok(())
    }

    fn insert_memory(&mut self, key: String, value: V, size: usize) {
        // Enforce headroom before insert.
        while self.resident + size > self.memory_budget {
            match self.memory.pop_lru() {
                Some((_, evicted)) => self.resident -= evicted.size,
                None => break,
            }
        }
        if size > self.memory_budget {
            return;
        }
        if let Some(old) = self.memory.put(
            key,
            MemEntry {
                value,
                size,
                stored: Instant::now(),
            },
        ) {
            self.resident -= old.size;
        }
        self.resident += size;
    }

    /// Drop expired entries from both tiers. Disk I/O is bounded per call.
    pub fn cleanup(&mut self) -> Result<usize> {
        let mut removed = 0;

        let ttl = self.memory_ttl;
        let expired: Vec<String> = self
            .memory
            .iter()
            .filter(|(_, e)| e.stored.elapsed() > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(e) = self.memory.pop(&key) {
                self.resident -= e.size;
                removed += 1;
            }
        }

        let now = chrono::Utc::now().timestamp();
        let disk_ttl = self.disk_ttl.as_secs() as i64;
        let dead: Vec<String> = self
            .index
            .iter()
            .filter(|(_, e)| now - e.stored_unix > disk_ttl)
            .map(|(k, _)| k.clone())
            .take(CLEANUP_IO_BOUND)
            .collect();
        for key in dead {
            if let Some(entry) = self.index.remove(&key) {
                // Only unlink when no other key references the same content.
                if !self.index.values().any(|e| e.hash == entry.hash) {
                    let _ = std::fs::remove_file(self.dir.join(format!("{}.json", entry.hash)));
                }
                removed += 1;
            }
        }
        self.persist_index()?;
        Ok(removed)
    }

    /// Full flush of both tiers.
    pub fn clear(&mut self) -> Result<()> {
        self.memory.clear();
        self.resident = 0;
        for entry in self.index.values() {
            let _ = std::fs::remove_file(self.dir.join(format!("{}.json", entry.hash)));
        }
        self.index.clear();
        self.persist_index()?;
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.memory.len(),
            disk_entries: self.index.len(),
            total_size: self.resident + self.index.values().map(|e| e.size).sum::<usize>(),
        }
    }

    fn persist_index(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.index)?;
        std::fs::write(self.dir.join("index.json"), raw)?;
        Ok(())
    }
}

fn load_index(dir: &Path) -> HashMap<String, IndexEntry> {
    let path = dir.join("index.json");
    match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(memory_ttl: Duration, disk_ttl: Duration) -> (ScriptCache<String>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScriptCache::new(dir.path(), 1024 * 1024, memory_ttl, disk_ttl).unwrap();
        (cache, dir)
    }

    #[test]
    fn test_set_get_within_ttl() {
        let (mut cache, _dir) = temp_cache(Duration::from_secs(60), Duration::from_secs(600));
        cache
            .set("https://a.test", "h1", &"payload".to_string())
            .unwrap();
        assert_eq!(
            cache.get("https://a.test", "h1").as_deref(),
            Some("payload")
        );
        // Different options hash is a different key.
        assert!(cache.get("https://a.test", "h2").is_none());
    }

    #[test]
    fn test_disk_promotion_after_memory_expiry() {
        let (mut cache, _dir) = temp_cache(Duration::from_millis(0), Duration::from_secs(600));
        cache.set("u", "h", &"v".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        // Memory entry expired, disk still fresh: get succeeds via disk.
        assert_eq!(cache.get("u", "h").as_deref(), Some("v"));
    }

    #[test]
    fn test_expired_both_tiers() {
        let (mut cache, _dir) = temp_cache(Duration::from_millis(0), Duration::from_secs(0));
        cache.set("u", "h", &"v".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get("u", "h").is_none());
    }

    #[test]
    fn test_persistence_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache: ScriptCache<String> = ScriptCache::new(
                dir.path(),
                1024,
                Duration::from_secs(60),
                Duration::from_secs(600),
            )
            .unwrap();
            cache.set("u", "h", &"persisted".to_string()).unwrap();
        }
        let mut cache: ScriptCache<String> = ScriptCache::new(
            dir.path(),
            1024,
            Duration::from_secs(60),
            Duration::from_secs(600),
        )
        .unwrap();
        assert_eq!(cache.get("u", "h").as_deref(), Some("persisted"));
    }

    #[test]
    fn test_memory_budget_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache: ScriptCache<String> = ScriptCache::new(
            dir.path(),
            40,
            Duration::from_secs(60),
            Duration::from_secs(600),
        )
        .unwrap();
        cache.set("a", "h", &"x".repeat(20)).unwrap();
        cache.set("b", "h", &"y".repeat(20)).unwrap();
        let stats = cache.stats();
        // Both cannot be resident under a 40-byte budget (JSON adds quotes).
        assert!(stats.memory_entries <= 1);
        // Disk keeps both.
        assert_eq!(stats.disk_entries, 2);
    }

    #[test]
    fn test_clear() {
        let (mut cache, _dir) = temp_cache(Duration::from_secs(60), Duration::from_secs(600));
        cache.set("u", "h", &"v".to_string()).unwrap();
        cache.clear().unwrap();
        assert!(cache.get("u", "h").is_none());
        let stats = cache.stats();
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.disk_entries, 0);
    }

    #[test]
    fn test_cleanup_reports_removed() {
        let (mut cache, _dir) = temp_cache(Duration::from_millis(0), Duration::from_secs(0));
        cache.set("u", "h", &"v".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        let removed = cache.cleanup().unwrap();
        assert!(removed >= 1);
        assert_eq!(cache.stats().disk_entries, 0);
    }
}
