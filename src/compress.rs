//! Text-artifact compression.
//!
//! Gzip via `flate2`, with an LRU result cache keyed by (content hash,
//! level), auto level selection by size bucket, bounded-concurrency batch
//! mode, and linear-backoff retries for transient failures.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{Error, Result};

/// One compressed artifact.
#[derive(Debug, Clone, Serialize)]
pub struct Compressed {
    #[serde(skip)]
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: f64,
    pub level: u32,
    pub content_hash: String,
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct CompressOptions {
    /// Fixed level; `None` selects by size bucket.
    pub level: Option<u32>,
    /// Attempt ceiling for transient failures.
    pub max_attempts: u32,
    /// Linear backoff unit between attempts.
    pub backoff: Duration,
    /// Parallel in-flight ceiling for batch mode.
    pub concurrency: usize,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            level: None,
            max_attempts: 3,
            backoff: Duration::from_millis(50),
            concurrency: 5,
        }
    }
}

/// Cumulative statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompressStats {
    pub original_size: usize,
    pub compressed_size: usize,
    pub hits: usize,
    pub misses: usize,
    pub total_time_ms: u64,
}

impl CompressStats {
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            0.0
        } else {
            self.compressed_size as f64 / self.original_size as f64
        }
    }
}

/// Compressor with an LRU result cache under a hard byte cap.
pub struct Compressor {
    cache: LruCache<(String, u32), Compressed>,
    cache_budget: usize,
    cache_resident: usize,
    stats: CompressStats,
}

impl Compressor {
    pub fn new(cache_budget: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            cache_budget,
            cache_resident: 0,
            stats: CompressStats::default(),
        }
    }

    /// Level by size bucket: small inputs take cheap levels, large inputs
    /// the stronger ones.
    pub fn select_level(size: usize) -> u32 {
        match size {
            0..=4_095 => 1,
            4_096..=65_535 => 4,
            65_536..=1_048_575 => 6,
            _ => 9,
        }
    }

    /// Worth compressing at all? Tiny or already-dense inputs are not.
    pub fn should_compress(text: &str, threshold: usize) -> bool {
        text.len() >= threshold
    }

    pub fn stats(&self) -> &CompressStats {
        &self.stats
    }

    /// Compress one artifact, serving repeats from the cache.
    pub async fn compress(&mut self, text: &str, opts: &CompressOptions) -> Result<Compressed> {
        let level = opts.level.unwrap_or_else(|| Self::select_level(text.len())).clamp(1, 9);
        let hash = content_hash(text);
        let key = (hash.clone(), level);
        if let Some(hit) = self.cache.get(&key) {
            self.stats.hits += 1;
            return Ok(hit.clone());
        }
        self.stats.misses += 1;

        let started = Instant::now();
        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            match raw_compress(text, level, &hash) {
                Ok(c) => break c,
                Err(e) if attempt < opts.max_attempts => {
                    debug!(attempt, error = %e, "compression attempt failed, retrying");
                    tokio::time::sleep(opts.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        };
        self.stats.original_size += result.original_size;
        self.stats.compressed_size += result.compressed_size;
        self.stats.total_time_ms += started.elapsed().as_millis() as u64;
        self.insert_cached(key, result.clone());
        Ok(result)
    }

    /// Compress many artifacts with at most `opts.concurrency` in flight.
    /// `progress(done, total)` fires as results land. Output order matches
    /// input order; individual failures do not abort the batch.
    pub async fn compress_batch(
        &mut self,
        items: &[String],
        opts: &CompressOptions,
        mut progress: Option<&mut (dyn FnMut(usize, usize) + Send)>,
    ) -> Vec<Result<Compressed>> {
        let total = items.len();
        let mut out: Vec<Result<Compressed>> = Vec::with_capacity(total);
        let limit = opts.concurrency.max(1);

        for chunk in items.chunks(limit) {
            let mut handles = Vec::with_capacity(chunk.len());
            for text in chunk {
                let level = opts
                    .level
                    .unwrap_or_else(|| Self::select_level(text.len()))
                    .clamp(1, 9);
                let hash = content_hash(text);
                if let Some(hit) = self.cache.get(&(hash.clone(), level)) {
                    self.stats.hits += 1;
                    handles.push(BatchSlot::Done(Ok(hit.clone())));
                    continue;
                }
                self.stats.misses += 1;
                let text = text.clone();
                handles.push(BatchSlot::Pending(
                    tokio::task::spawn_blocking(move || {
                        let started = Instant::now();
                        let r = raw_compress(&text, level, &content_hash(&text));
                        (r, started.elapsed())
                    }),
                    level,
                ));
            }
            for slot in handles {
                let result = match slot {
                    BatchSlot::Done(r) => r,
                    BatchSlot::Pending(handle, level) => match handle.await {
                        Ok((Ok(c), elapsed)) => {
                            self.stats.original_size += c.original_size;
                            self.stats.compressed_size += c.compressed_size;
                            self.stats.total_time_ms += elapsed.as_millis() as u64;
                            self.insert_cached((c.content_hash.clone(), level), c.clone());
                            Ok(c)
                        }
                        Ok((Err(e), _)) => Err(e),
                        Err(join) => Err(Error::Invariant(format!("batch task failed: {join}"))),
                    },
                };
                out.push(result);
                if let Some(cb) = progress.as_deref_mut() {
                    cb(out.len(), total);
                }
            }
        }
        out
    }

    /// Inverse of `compress`.
    pub fn decompress(&self, blob: &[u8]) -> Result<String> {
        let mut decoder = GzDecoder::new(blob);
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|e| Error::Invariant(format!("decompression failed: {e}")))?;
        Ok(out)
    }

    fn insert_cached(&mut self, key: (String, u32), value: Compressed) {
        let size = value.compressed_size;
        // Headroom before insert, not after.
        while self.cache_resident + size > self.cache_budget {
            match self.cache.pop_lru() {
                Some((_, evicted)) => self.cache_resident -= evicted.compressed_size,
                None => break,
            }
        }
        if size <= self.cache_budget {
            self.cache_resident += size;
            self.cache.put(key, value);
        }
    }
}

enum BatchSlot {
    Done(Result<Compressed>),
    Pending(tokio::task::JoinHandle<(Result<Compressed>, Duration)>, u32),
}

fn raw_compress(text: &str, level: u32, hash: &str) -> Result<Compressed> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| Error::Invariant(format!("compression failed: {e}")))?;
    let data = encoder
        .finish()
        .map_err(|e| Error::Invariant(format!("compression failed: {e}")))?;
    let compressed_size = data.len();
    Ok(Compressed {
        data,
        original_size: text.len(),
        compressed_size,
        ratio: if text.is_empty() {
            0.0
        } else {
            compressed_size as f64 / text.len() as f64
        },
        level,
        content_hash: hash.to_string(),
    })
}

/// Hex sha256 of the input.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let mut c = Compressor::new(1024 * 1024);
        let text = "function f() { return 'hello'.repeat(100); }".repeat(50);
        let compressed = c.compress(&text, &CompressOptions::default()).await.unwrap();
        assert!(compressed.compressed_size < compressed.original_size);
        assert_eq!(c.decompress(&compressed.data).unwrap(), text);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_recompression() {
        let mut c = Compressor::new(1024 * 1024);
        let text = "var a = 1;".repeat(200);
        c.compress(&text, &CompressOptions::default()).await.unwrap();
        c.compress(&text, &CompressOptions::default()).await.unwrap();
        assert_eq!(c.stats().hits, 1);
        assert_eq!(c.stats().misses, 1);
    }

    #[test]
    fn test_level_buckets() {
        assert_eq!(Compressor::select_level(100), 1);
        assert_eq!(Compressor::select_level(10_000), 4);
        assert_eq!(Compressor::select_level(500_000), 6);
        assert_eq!(Compressor::select_level(5_000_000), 9);
    }

    #[test]
    fn test_should_compress() {
        assert!(!Compressor::should_compress("tiny", 1024));
        assert!(Compressor::should_compress(&"x".repeat(2048), 1024));
    }

    #[tokio::test]
    async fn test_batch_order_and_progress() {
        let mut c = Compressor::new(1024 * 1024);
        let items: Vec<String> = (0..12).map(|i| format!("item {i} ").repeat(100)).collect();
        let mut seen = Vec::new();
        let mut progress = |done: usize, total: usize| seen.push((done, total));
        let results = c
            .compress_batch(&items, &CompressOptions::default(), Some(&mut progress))
            .await;
        assert_eq!(results.len(), 12);
        for (i, r) in results.iter().enumerate() {
            let r = r.as_ref().unwrap();
            assert_eq!(c.decompress(&r.data).unwrap(), items[i]);
        }
        assert_eq!(seen.last(), Some(&(12, 12)));
    }

    #[tokio::test]
    async fn test_cache_budget_enforced() {
        // Budget smaller than any compressed artifact: nothing is cached,
        // every call is a miss.
        let mut c = Compressor::new(10);
        let a = "a".repeat(5000);
        c.compress(&a, &CompressOptions::default()).await.unwrap();
        c.compress(&a, &CompressOptions::default()).await.unwrap();
        assert_eq!(c.stats().misses, 2);
        assert_eq!(c.stats().hits, 0);
    }
}
