//! Script collection.
//!
//! Each `collect` runs on its own page: enable Network and Runtime, watch
//! responses, navigate, dwell, then pull inline scripts, service-worker
//! scripts, and web-worker bodies out of the live page. Results land in the
//! two-tier cache and an in-memory per-URL buffer that the bounded query
//! methods (`files_by_pattern`, `top_priority_files`) read from.

pub mod priority;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::browser::network::NetworkMonitor;
use crate::browser::BrowserSession;
use crate::cache::ScriptCache;
use crate::compress::{CompressOptions, Compressor};
use crate::config::Settings;
use crate::{Error, Result};

/// Worker-constructor hook installed before navigation.
const WORKER_HOOK: &str = r#"
(() => {
    window.__workerUrls = [];
    const OrigWorker = window.Worker;
    window.Worker = function(url, opts) {
        try { window.__workerUrls.push(String(url)); } catch (e) {}
        return new OrigWorker(url, opts);
    };
    window.Worker.prototype = OrigWorker.prototype;
})();
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SmartMode {
    #[default]
    Off,
    /// Reorder by priority and trim to the size budget.
    Filter,
    /// Return per-file summaries instead of sources.
    Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectOptions {
    pub include_inline: bool,
    pub include_service_worker: bool,
    pub include_web_worker: bool,
    pub include_dynamic: bool,
    pub smart_mode: SmartMode,
    pub compress: bool,
    /// Total response budget in bytes for the returned file set.
    pub max_total_size: usize,
    /// Per-file override of the configured single-file cap.
    pub max_file_size: Option<usize>,
    /// Extra URL keywords boosted by smart selection.
    pub priorities: Vec<String>,
    pub timeout_ms: Option<u64>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            include_inline: true,
            include_service_worker: false,
            include_web_worker: false,
            include_dynamic: false,
            smart_mode: SmartMode::Off,
            compress: false,
            max_total_size: 4 * 1024 * 1024,
            max_file_size: None,
            priorities: Vec::new(),
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptKind {
    Inline,
    External,
    ServiceWorker,
    WebWorker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionMeta {
    pub encoding: String,
    pub compressed_size: usize,
    pub ratio: f64,
    pub level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptFile {
    pub id: String,
    pub url: String,
    pub kind: ScriptKind,
    pub source: String,
    pub size: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionMeta>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub url: String,
    pub size: usize,
    pub kind: ScriptKind,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectResult {
    pub files: Vec<ScriptFile>,
    pub dependencies: Vec<String>,
    pub total_size: usize,
    pub collect_time_ms: u64,
    pub truncated_count: usize,
}

#[derive(Debug, Serialize)]
pub struct PatternQueryResult {
    pub files: Vec<ScriptFile>,
    pub matched: usize,
    pub returned: usize,
    pub truncated: bool,
}

/// Owns the browser session, the cache, the compressor, and the per-URL
/// collected-files buffer.
pub struct ScriptCollector {
    session: Option<BrowserSession>,
    cache: ScriptCache<CollectResult>,
    compressor: Compressor,
    /// Insertion-ordered (page URL, result) buffer, accumulated across
    /// collects within one dispatcher run.
    collected: Vec<(String, CollectResult)>,
    settings: Settings,
}

impl ScriptCollector {
    pub fn new(settings: Settings) -> Result<Self> {
        let cache = ScriptCache::new(
            &settings.paths.cache_dir,
            settings.collector.cache_memory_budget,
            Duration::from_secs(settings.collector.cache_memory_ttl_secs),
            Duration::from_secs(settings.collector.cache_disk_ttl_secs),
        )?;
        Ok(Self {
            session: None,
            cache,
            compressor: Compressor::new(settings.collector.cache_memory_budget / 4),
            collected: Vec::new(),
            settings,
        })
    }

    // ---- browser lifecycle -----------------------------------------------

    pub async fn init(&mut self) -> Result<()> {
        if self.session.is_none() {
            self.session = Some(BrowserSession::launch(&self.settings.browser).await?);
        }
        Ok(())
    }

    pub fn browser(&self) -> Result<&BrowserSession> {
        self.session.as_ref().ok_or(Error::NoBrowser)
    }

    pub fn browser_mut(&mut self) -> Result<&mut BrowserSession> {
        self.session.as_mut().ok_or(Error::NoBrowser)
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Close everything. Derived caches and the collected-files buffer are
    /// cleared before the browser goes down.
    pub async fn close(&mut self) -> Result<()> {
        self.collected.clear();
        if let Err(e) = self.cache.clear() {
            warn!(error = %e, "cache clear during close failed");
        }
        if let Some(session) = self.session.take() {
            session.close().await?;
        }
        Ok(())
    }

    // ---- collect ---------------------------------------------------------

    pub async fn collect(&mut self, url: &str, opts: &CollectOptions) -> Result<CollectResult> {
        let options_hash = options_hash(opts);
        if let Some(hit) = self.cache.get(url, &options_hash) {
            debug!(url, "collect served from cache");
            self.remember(url, hit.clone());
            return Ok(self.post_process(hit, opts).await);
        }

        self.init().await?;
        let timeout = opts
            .timeout_ms
            .unwrap_or(self.settings.collector.collect_timeout_ms);
        let started = Instant::now();
        let harvest = self.harvest(url, opts);
        let mut result = tokio::time::timeout(Duration::from_millis(timeout), harvest)
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        result.collect_time_ms = started.elapsed().as_millis() as u64;

        info!(
            url,
            files = result.files.len(),
            total = result.total_size,
            ms = result.collect_time_ms,
            "collect finished"
        );
        if let Err(e) = self.cache.set(url, &options_hash, &result) {
            warn!(error = %e, "cache store failed");
        }
        self.remember(url, result.clone());
        Ok(self.post_process(result, opts).await)
    }

    /// The raw harvest: everything between page open and page close.
    async fn harvest(&self, url: &str, opts: &CollectOptions) -> Result<CollectResult> {
        let max_files = self.settings.collector.max_files_per_collect;
        let max_file_size = opts
            .max_file_size
            .unwrap_or(self.settings.collector.max_single_file_size);

        let session = self.session.as_ref().ok_or(Error::NoBrowser)?;
        let page = session.open_page("about:blank").await?;

        let mut monitor = NetworkMonitor::new();
        let outcome = async {
            monitor.enable(&page).await?;
            if opts.include_web_worker {
                page.execute(
                    chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams::new(
                        WORKER_HOOK,
                    ),
                )
                .await?;
            }

            page.goto(url)
                .await
                .map_err(|e| Error::Navigation(format!("{url}: {e}")))?;
            let _ = page.wait_for_navigation().await;
            // Settle, then optionally dwell for late script injection.
            tokio::time::sleep(Duration::from_millis(500)).await;
            if opts.include_dynamic {
                tokio::time::sleep(Duration::from_millis(
                    self.settings.collector.dynamic_wait_ms,
                ))
                .await;
            }

            let mut files: Vec<ScriptFile> = Vec::new();
            let mut truncated_count = 0usize;

            // External scripts observed on the wire, in emission order.
            for req in monitor.requests().await {
                if files.len() >= max_files {
                    warn!(bound = max_files, "collection bound reached, skipping remaining scripts");
                    break;
                }
                if !is_script_response(&req.url, req.mime.as_deref()) {
                    continue;
                }
                match monitor
                    .response_body(&page, &req.request_id, max_file_size)
                    .await
                {
                    Ok((body, truncated, original)) => {
                        if truncated {
                            truncated_count += 1;
                        }
                        files.push(ScriptFile {
                            id: req.request_id.clone(),
                            url: req.url.clone(),
                            kind: ScriptKind::External,
                            size: body.len(),
                            source: body,
                            truncated,
                            original_size: truncated.then_some(original),
                            compression: None,
                        });
                    }
                    Err(e) => {
                        debug!(url = %req.url, error = %e, "body fetch failed, skipping file");
                    }
                }
            }

            // Inline scripts from the DOM.
            if opts.include_inline {
                let inline: Vec<String> = page
                    .evaluate(
                        "JSON.parse(JSON.stringify(Array.from(document.scripts).filter(s => !s.src).map(s => s.textContent || '')))",
                    )
                    .await?
                    .into_value()
                    .unwrap_or_default();
                for (i, text) in inline.into_iter().enumerate() {
                    if files.len() >= max_files {
                        warn!(bound = max_files, "collection bound reached at inline scripts");
                        break;
                    }
                    if text.trim().is_empty() {
                        continue;
                    }
                    let original = text.len();
                    let truncated = original > max_file_size;
                    let mut source = text;
                    if truncated {
                        truncated_count += 1;
                        source.truncate(floor_boundary(&source, max_file_size));
                    }
                    files.push(ScriptFile {
                        id: format!("inline-script-{i}"),
                        url: format!("{url}#inline-{i}"),
                        kind: ScriptKind::Inline,
                        size: source.len(),
                        source,
                        truncated,
                        original_size: truncated.then_some(original),
                        compression: None,
                    });
                }
            }

            // Service workers: enumerate registrations, fetch in page
            // context, never re-navigate.
            if opts.include_service_worker {
                let sw_urls: Vec<String> = page
                    .evaluate(
                        r#"(async () => {
                            if (!navigator.serviceWorker) return [];
                            const regs = await navigator.serviceWorker.getRegistrations();
                            return regs.map(r => (r.active || r.installing || r.waiting))
                                .filter(w => w)
                                .map(w => w.scriptURL);
                        })()"#,
                    )
                    .await?
                    .into_value()
                    .unwrap_or_default();
                self.fetch_in_page(&page, &sw_urls, ScriptKind::ServiceWorker, max_files, max_file_size, &mut files, &mut truncated_count)
                    .await;
            }

            // Web workers recorded by the constructor hook.
            if opts.include_web_worker {
                let worker_urls: Vec<String> = page
                    .evaluate("window.__workerUrls || []")
                    .await?
                    .into_value()
                    .unwrap_or_default();
                self.fetch_in_page(&page, &worker_urls, ScriptKind::WebWorker, max_files, max_file_size, &mut files, &mut truncated_count)
                    .await;
            }

            let dependencies = extract_dependencies(&files);
            let total_size = files.iter().map(|f| f.size).sum();
            Ok::<CollectResult, Error>(CollectResult {
                files,
                dependencies,
                total_size,
                collect_time_ms: 0,
                truncated_count,
            })
        }
        .await;

        // Deterministic teardown on success or failure.
        monitor.disable(&page).await;
        if let Err(e) = page.close().await {
            debug!(error = %e, "collect page close failed");
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_in_page(
        &self,
        page: &chromiumoxide::Page,
        urls: &[String],
        kind: ScriptKind,
        max_files: usize,
        max_file_size: usize,
        files: &mut Vec<ScriptFile>,
        truncated_count: &mut usize,
    ) {
        for worker_url in urls {
            if files.len() >= max_files {
                warn!(bound = max_files, "collection bound reached at worker scripts");
                return;
            }
            let quoted = match serde_json::to_string(worker_url) {
                Ok(q) => q,
                Err(_) => continue,
            };
            let script = format!(
                "(async () => {{ try {{ const r = await fetch({quoted}); return await r.text(); }} catch (e) {{ return null; }} }})()"
            );
            let body: Option<String> = match page.evaluate(script).await {
                Ok(result) => result.into_value().unwrap_or(None),
                Err(e) => {
                    debug!(url = %worker_url, error = %e, "worker fetch failed, skipping");
                    continue;
                }
            };
            let Some(mut source) = body else {
                debug!(url = %worker_url, "worker body unavailable, skipping");
                continue;
            };
            let original = source.len();
            let truncated = original > max_file_size;
            if truncated {
                *truncated_count += 1;
                source.truncate(floor_boundary(&source, max_file_size));
            }
            files.push(ScriptFile {
                id: format!("{:?}-{}", kind, files.len()),
                url: worker_url.clone(),
                kind,
                size: source.len(),
                source,
                truncated,
                original_size: truncated.then_some(original),
                compression: None,
            });
        }
    }

    /// Smart filtering and optional compression of the response copy. The
    /// collected buffer always keeps the raw harvest.
    async fn post_process(&mut self, mut result: CollectResult, opts: &CollectOptions) -> CollectResult {
        if opts.smart_mode == SmartMode::Filter {
            let mut indexed: Vec<(usize, ScriptFile)> = result.files.into_iter().enumerate().collect();
            indexed.sort_by_key(|(i, f)| {
                (
                    -priority::score(&f.url, f.kind, f.size, &opts.priorities),
                    *i,
                )
            });
            let mut kept = Vec::new();
            let mut used = 0usize;
            for (_, f) in indexed {
                if used + f.size > opts.max_total_size {
                    continue;
                }
                used += f.size;
                kept.push(f);
            }
            result.files = kept;
        }

        if opts.compress {
            let copts = CompressOptions::default();
            for file in result.files.iter_mut() {
                if !Compressor::should_compress(&file.source, 1024) {
                    continue;
                }
                match self.compressor.compress(&file.source, &copts).await {
                    Ok(c) => {
                        file.compression = Some(CompressionMeta {
                            encoding: "gzip+base64".into(),
                            compressed_size: c.compressed_size,
                            ratio: c.ratio,
                            level: c.level,
                        });
                        file.source =
                            base64::engine::general_purpose::STANDARD.encode(&c.data);
                    }
                    Err(e) => warn!(url = %file.url, error = %e, "compression failed, keeping plain source"),
                }
            }
        }
        result
    }

    fn remember(&mut self, url: &str, result: CollectResult) {
        if let Some(slot) = self.collected.iter_mut().find(|(u, _)| u == url) {
            slot.1 = result;
            return;
        }
        if self.collected.len() >= self.settings.collector.max_collected_urls {
            self.collected.remove(0);
        }
        self.collected.push((url.to_string(), result));
    }

    // ---- query surface ---------------------------------------------------

    fn all_files(&self) -> impl Iterator<Item = &ScriptFile> {
        self.collected.iter().flat_map(|(_, r)| r.files.iter())
    }

    pub fn collected_files_summary(&self) -> Vec<FileSummary> {
        self.all_files()
            .map(|f| FileSummary {
                url: f.url.clone(),
                size: f.size,
                kind: f.kind,
                truncated: f.truncated,
                original_size: f.original_size,
            })
            .collect()
    }

    pub fn file_by_url(&self, url: &str) -> Option<&ScriptFile> {
        self.all_files().find(|f| f.url == url)
    }

    pub fn files_by_pattern(
        &self,
        pattern: &str,
        limit: usize,
        max_total_size: usize,
    ) -> Result<PatternQueryResult> {
        let re = regex::Regex::new(pattern)?;
        let matches: Vec<&ScriptFile> = self.all_files().filter(|f| re.is_match(&f.url)).collect();
        let matched = matches.len();
        let mut files = Vec::new();
        let mut used = 0usize;
        for f in matches {
            if files.len() >= limit || used + f.size > max_total_size {
                break;
            }
            used += f.size;
            files.push(f.clone());
        }
        let returned = files.len();
        Ok(PatternQueryResult {
            files,
            matched,
            returned,
            truncated: returned < matched,
        })
    }

    pub fn top_priority_files(&self, top_n: usize, max_total_size: usize) -> Vec<ScriptFile> {
        let mut indexed: Vec<(usize, &ScriptFile)> = self.all_files().enumerate().collect();
        indexed.sort_by_key(|(i, f)| (-priority::score(&f.url, f.kind, f.size, &[]), *i));
        let mut out = Vec::new();
        let mut used = 0usize;
        for (_, f) in indexed {
            if out.len() >= top_n {
                break;
            }
            if used + f.size > max_total_size {
                continue;
            }
            used += f.size;
            out.push(f.clone());
        }
        out
    }

    pub fn clear_all_data(&mut self) -> Result<()> {
        self.collected.clear();
        self.cache.clear()?;
        Ok(())
    }

    pub fn cache_cleanup(&mut self) -> Result<usize> {
        self.cache.cleanup()
    }

    pub fn status(&self) -> Value {
        let cache_stats = self.cache.stats();
        json!({
            "browserRunning": self.session.is_some(),
            "collectedUrls": self.collected.len(),
            "collectedFiles": self.all_files().count(),
            "cache": cache_stats,
            "compressor": self.compressor.stats(),
        })
    }

    /// Summary variant of a collect result for `smart_mode = summary`.
    pub fn summarize_result(result: &CollectResult) -> Value {
        let files: Vec<Value> = result
            .files
            .iter()
            .map(|f| {
                json!({
                    "url": f.url,
                    "kind": f.kind,
                    "size": f.size,
                    "truncated": f.truncated,
                })
            })
            .collect();
        json!({
            "files": files,
            "fileCount": result.files.len(),
            "dependencies": result.dependencies,
            "totalSize": result.total_size,
            "collectTime": result.collect_time_ms,
            "truncatedCount": result.truncated_count,
        })
    }
}

/// Largest index ≤ `index` that is a char boundary, so truncation never
/// splits a code point.
fn floor_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn is_script_response(url: &str, mime: Option<&str>) -> bool {
    if let Some(mime) = mime {
        let m = mime.to_lowercase();
        if m.contains("javascript") || m.contains("ecmascript") {
            return true;
        }
        // Mis-labeled scripts still matter when the URL says .js.
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.ends_with(".js") || path.ends_with(".mjs")
}

fn extract_dependencies(files: &[ScriptFile]) -> Vec<String> {
    let import_re = regex::Regex::new(
        r#"(?:import\s+(?:[\w*{},\s]+\s+from\s+)?|require\(|importScripts\()\s*['"]([^'"]+)['"]"#,
    )
    .expect("static dependency pattern");
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for file in files {
        for cap in import_re.captures_iter(&file.source) {
            let dep = cap[1].to_string();
            if seen.insert(dep.clone()) {
                out.push(dep);
            }
        }
    }
    out
}

fn options_hash(opts: &CollectOptions) -> String {
    let normalized = serde_json::to_string(opts).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(url: &str, size: usize, kind: ScriptKind) -> ScriptFile {
        ScriptFile {
            id: url.to_string(),
            url: url.to_string(),
            kind,
            source: "x".repeat(size),
            size,
            truncated: false,
            original_size: None,
            compression: None,
        }
    }

    fn collector_with_files(files: Vec<ScriptFile>) -> (ScriptCollector, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.paths.cache_dir = dir.path().to_path_buf();
        let mut collector = ScriptCollector::new(settings).unwrap();
        let total_size = files.iter().map(|f| f.size).sum();
        collector.collected.push((
            "https://page.test/".to_string(),
            CollectResult {
                files,
                dependencies: Vec::new(),
                total_size,
                collect_time_ms: 0,
                truncated_count: 0,
            },
        ));
        (collector, dir)
    }

    #[test]
    fn test_pattern_query_bounds() {
        let files: Vec<ScriptFile> = (0..20)
            .map(|i| file(&format!("https://a.test/vendor/lib{i}.js"), 10_000, ScriptKind::External))
            .collect();
        let (collector, _dir) = collector_with_files(files);
        let result = collector
            .files_by_pattern(".*vendor.*", 10, 512 * 1024)
            .unwrap();
        assert_eq!(result.matched, 20);
        assert_eq!(result.returned, 10);
        assert!(result.truncated);
        assert!(result.files.iter().map(|f| f.size).sum::<usize>() <= 512 * 1024);
    }

    #[test]
    fn test_pattern_query_size_budget() {
        let files: Vec<ScriptFile> = (0..5)
            .map(|i| file(&format!("https://a.test/app{i}.js"), 100, ScriptKind::External))
            .collect();
        let (collector, _dir) = collector_with_files(files);
        let result = collector.files_by_pattern("app", 10, 250).unwrap();
        assert_eq!(result.matched, 5);
        assert_eq!(result.returned, 2);
        assert!(result.truncated);
    }

    #[test]
    fn test_pattern_no_match() {
        let (collector, _dir) = collector_with_files(vec![file("https://a.test/app.js", 10, ScriptKind::External)]);
        let result = collector.files_by_pattern("nothing-here", 10, 1024).unwrap();
        assert_eq!(result.matched, 0);
        assert_eq!(result.returned, 0);
        assert!(!result.truncated);
        assert!(result.files.is_empty());
    }

    #[test]
    fn test_top_priority_prefers_crypto() {
        let (collector, _dir) = collector_with_files(vec![
            file("https://a.test/vendor/jquery.js", 50_000, ScriptKind::External),
            file("https://a.test/js/crypto-core.js", 50_000, ScriptKind::External),
            file("https://a.test/js/misc.js", 50_000, ScriptKind::External),
        ]);
        let top = collector.top_priority_files(2, 1024 * 1024);
        assert_eq!(top.len(), 2);
        assert!(top[0].url.contains("crypto"));
    }

    #[test]
    fn test_file_by_url() {
        let (collector, _dir) = collector_with_files(vec![file("https://a.test/app.js", 10, ScriptKind::External)]);
        assert!(collector.file_by_url("https://a.test/app.js").is_some());
        assert!(collector.file_by_url("https://a.test/other.js").is_none());
    }

    #[test]
    fn test_summary_shape() {
        let (collector, _dir) = collector_with_files(vec![file("https://a.test/app.js", 10, ScriptKind::External)]);
        let summary = collector.collected_files_summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].url, "https://a.test/app.js");
    }

    #[test]
    fn test_options_hash_stable_and_distinct() {
        let a = options_hash(&CollectOptions::default());
        let b = options_hash(&CollectOptions::default());
        assert_eq!(a, b);
        let mut opts = CollectOptions::default();
        opts.include_service_worker = true;
        assert_ne!(a, options_hash(&opts));
    }

    #[test]
    fn test_is_script_response() {
        assert!(is_script_response("https://a.test/x.js", None));
        assert!(is_script_response("https://a.test/x.js?v=2", None));
        assert!(is_script_response("https://a.test/api", Some("application/javascript")));
        assert!(!is_script_response("https://a.test/style.css", Some("text/css")));
        assert!(!is_script_response("https://a.test/index.html", Some("text/html")));
    }

    #[test]
    fn test_extract_dependencies() {
        let files = vec![ScriptFile {
            id: "1".into(),
            url: "https://a.test/app.js".into(),
            kind: ScriptKind::External,
            source: "import x from './mod.js'; const y = require('lodash'); importScripts('worker.js');".into(),
            size: 10,
            truncated: false,
            original_size: None,
            compression: None,
        }];
        let deps = extract_dependencies(&files);
        assert_eq!(deps, vec!["./mod.js", "lodash", "worker.js"]);
    }

    #[test]
    fn test_remember_bounds_urls() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.paths.cache_dir = dir.path().to_path_buf();
        settings.collector.max_collected_urls = 2;
        let mut collector = ScriptCollector::new(settings).unwrap();
        for i in 0..4 {
            collector.remember(
                &format!("https://p{i}.test/"),
                CollectResult {
                    files: Vec::new(),
                    dependencies: Vec::new(),
                    total_size: 0,
                    collect_time_ms: 0,
                    truncated_count: 0,
                },
            );
        }
        assert_eq!(collector.collected.len(), 2);
        assert_eq!(collector.collected[0].0, "https://p2.test/");
    }
}
