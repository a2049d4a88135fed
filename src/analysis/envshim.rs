//! Browser-environment synthesis.
//!
//! Finds the browser globals a script touches, builds a manifest of values
//! for them (static catalog, optionally overlaid with live values pulled
//! from a real page, optionally filled in by the model), and emits a shim
//! program for Node.js and/or Python that installs those globals.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::ast::{self, Node, Visitor};
use crate::llm::{ChatMessage, ChatOptions, ModelAdapter, Role};
use crate::Result;

/// Roots treated as browser globals.
const GLOBAL_ROOTS: &[&str] = &[
    "window",
    "document",
    "navigator",
    "location",
    "screen",
    "history",
    "performance",
    "localStorage",
    "sessionStorage",
    "crypto",
];

/// Serialization depth cap for live extraction and shim emission.
const MAX_DEPTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetRuntime {
    Nodejs,
    Python,
    Both,
}

#[derive(Debug, Clone)]
pub struct EnvRequest {
    pub source: String,
    pub target_runtime: TargetRuntime,
    pub include_comments: bool,
    pub extract_depth: usize,
}

impl Default for EnvRequest {
    fn default() -> Self {
        Self {
            source: String::new(),
            target_runtime: TargetRuntime::Nodejs,
            include_comments: true,
            extract_depth: 3,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EmulationCode {
    pub nodejs: Option<String>,
    pub python: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnvStats {
    pub total: usize,
    pub filled: usize,
    pub manual: usize,
}

#[derive(Debug, Serialize)]
pub struct EnvReport {
    /// Detected dotted paths grouped by root global.
    pub detected_variables: BTreeMap<String, Vec<String>>,
    pub emulation_code: EmulationCode,
    pub missing_apis: Vec<String>,
    /// Dotted path → serialized value.
    pub variable_manifest: Map<String, Value>,
    pub recommendations: Vec<String>,
    pub stats: EnvStats,
}

/// Static analysis only: catalog-backed manifest.
pub fn analyze(req: &EnvRequest) -> Result<EnvReport> {
    let detected = collect_paths(&req.source)?;
    Ok(build_report(req, detected, Map::new()))
}

/// Static analysis overlaid with live values from a page, then optionally
/// model-filled for paths still missing.
pub async fn analyze_live(
    req: &EnvRequest,
    page: Option<&chromiumoxide::Page>,
    model: Option<&ModelAdapter>,
) -> Result<EnvReport> {
    let detected = collect_paths(&req.source)?;
    let mut live = Map::new();
    if let Some(page) = page {
        for paths in detected.values() {
            for path in paths {
                match extract_value(page, path, req.extract_depth.min(MAX_DEPTH)).await {
                    Ok(Some(value)) => {
                        live.insert(path.clone(), value);
                    }
                    Ok(None) => {}
                    Err(e) => debug!(path, error = %e, "live extraction failed"),
                }
            }
        }
    }
    let mut report = build_report(req, detected, live);

    if let (Some(model), false) = (model, report.missing_apis.is_empty()) {
        if let Some(filled) = model_fill(model, &report.missing_apis).await {
            for (path, value) in filled {
                if report.missing_apis.iter().any(|m| m == &path) {
                    report.variable_manifest.insert(path.clone(), value);
                    report.missing_apis.retain(|m| m != &path);
                    report.stats.filled += 1;
                    report.stats.manual = report.stats.manual.saturating_sub(1);
                }
            }
        }
        // Regenerate shims with the enriched manifest.
        report.emulation_code = emit_code(req, &report.variable_manifest);
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// path detection
// ---------------------------------------------------------------------------

fn collect_paths(source: &str) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let outcome = ast::parse(source)?;
    struct Collector {
        found: BTreeMap<String, BTreeSet<String>>,
    }
    impl Collector {
        fn add(&mut self, path: &str) {
            let root = path.split('.').next().unwrap_or(path).to_string();
            if GLOBAL_ROOTS.contains(&root.as_str()) {
                // `window.navigator.x` and `navigator.x` are the same API.
                let normalized = path.strip_prefix("window.").unwrap_or(path);
                let root = normalized.split('.').next().unwrap_or(normalized);
                if GLOBAL_ROOTS.contains(&root) {
                    self.found
                        .entry(root.to_string())
                        .or_default()
                        .insert(normalized.to_string());
                } else {
                    self.found
                        .entry("window".to_string())
                        .or_default()
                        .insert(path.to_string());
                }
            }
        }
    }
    impl Visitor for Collector {
        fn enter(&mut self, node: &Node) {
            match node {
                Node::Member { .. } => {
                    if let Some(path) = node.member_path() {
                        self.add(&path);
                    }
                }
                Node::Ident { name, .. } => {
                    if GLOBAL_ROOTS.contains(&name.as_str()) {
                        self.add(name);
                    }
                }
                _ => {}
            }
        }
    }
    let mut collector = Collector {
        found: BTreeMap::new(),
    };
    ast::walk(&outcome.program, &mut collector);

    // Keep only the longest paths per chain: `navigator` alone adds noise
    // when `navigator.userAgent` was also seen.
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (root, paths) in collector.found {
        let kept: BTreeSet<String> = paths
            .iter()
            .filter(|p| {
                !paths
                    .iter()
                    .any(|longer| longer.len() > p.len() && longer.starts_with(&format!("{p}.")))
            })
            .cloned()
            .collect();
        out.insert(root, kept);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// manifest
// ---------------------------------------------------------------------------

fn static_catalog() -> Map<String, Value> {
    let mut m = Map::new();
    let entries: Vec<(&str, Value)> = vec![
        ("navigator.userAgent", json!("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")),
        ("navigator.platform", json!("Win32")),
        ("navigator.language", json!("en-US")),
        ("navigator.languages", json!(["en-US", "en"])),
        ("navigator.webdriver", json!(false)),
        ("navigator.hardwareConcurrency", json!(8)),
        ("navigator.vendor", json!("Google Inc.")),
        ("navigator.appVersion", json!("5.0 (Windows NT 10.0; Win64; x64)")),
        ("navigator.cookieEnabled", json!(true)),
        ("navigator.plugins", json!({ "length": 0 })),
        ("screen.width", json!(1920)),
        ("screen.height", json!(1080)),
        ("screen.availWidth", json!(1920)),
        ("screen.availHeight", json!(1040)),
        ("screen.colorDepth", json!(24)),
        ("screen.pixelDepth", json!(24)),
        ("location.href", json!("https://example.com/")),
        ("location.protocol", json!("https:")),
        ("location.host", json!("example.com")),
        ("location.hostname", json!("example.com")),
        ("location.origin", json!("https://example.com")),
        ("location.pathname", json!("/")),
        ("location.search", json!("")),
        ("location.hash", json!("")),
        ("location.port", json!("")),
        ("window.innerWidth", json!(1920)),
        ("window.innerHeight", json!(937)),
        ("window.outerWidth", json!(1920)),
        ("window.outerHeight", json!(1040)),
        ("window.devicePixelRatio", json!(1)),
        ("window.name", json!("")),
        ("document.title", json!("Document")),
        ("document.referrer", json!("")),
        ("document.cookie", json!("")),
        ("document.characterSet", json!("UTF-8")),
        ("document.readyState", json!("complete")),
        ("document.hidden", json!(false)),
        ("document.visibilityState", json!("visible")),
        ("document.createElement", json!("[Function: createElement]")),
        ("document.getElementById", json!("[Function: getElementById]")),
        ("document.querySelector", json!("[Function: querySelector]")),
        ("document.addEventListener", json!("[Function: addEventListener]")),
        ("performance.now", json!("[Function: now]")),
        ("performance.timing", json!({ "navigationStart": 1700000000000u64 })),
        ("localStorage.getItem", json!("[Function: getItem]")),
        ("localStorage.setItem", json!("[Function: setItem]")),
        ("localStorage.removeItem", json!("[Function: removeItem]")),
        ("sessionStorage.getItem", json!("[Function: getItem]")),
        ("sessionStorage.setItem", json!("[Function: setItem]")),
        ("crypto.getRandomValues", json!("[Function: getRandomValues]")),
        ("crypto.randomUUID", json!("[Function: randomUUID]")),
        ("history.length", json!(1)),
        ("history.pushState", json!("[Function: pushState]")),
    ];
    for (k, v) in entries {
        m.insert(k.to_string(), v);
    }
    m
}

fn build_report(
    req: &EnvRequest,
    detected: BTreeMap<String, BTreeSet<String>>,
    live: Map<String, Value>,
) -> EnvReport {
    let catalog = static_catalog();
    let mut manifest = Map::new();
    let mut missing = Vec::new();
    let mut total = 0usize;

    for paths in detected.values() {
        for path in paths {
            total += 1;
            if let Some(value) = live.get(path) {
                manifest.insert(path.clone(), value.clone());
                continue;
            }
            if let Some(value) = catalog.get(path) {
                manifest.insert(path.clone(), value.clone());
                continue;
            }
            // A bare root pulls in every catalog default under it.
            let prefix = format!("{path}.");
            let mut any = false;
            for (k, v) in &catalog {
                if k.starts_with(&prefix) || k == path {
                    manifest.insert(k.clone(), v.clone());
                    any = true;
                }
            }
            if !any {
                missing.push(path.clone());
            }
        }
    }

    let filled = total - missing.len();
    let mut recommendations = Vec::new();
    if !missing.is_empty() {
        recommendations.push(
            "some accessed APIs have no template value; re-run with autoFetch against a live page or fill them manually"
                .to_string(),
        );
    }
    if manifest.values().any(is_function_marker) {
        recommendations.push(
            "function placeholders return undefined; implement the ones the target script actually calls"
                .to_string(),
        );
    }

    let emulation_code = emit_code(req, &manifest);
    EnvReport {
        detected_variables: detected
            .into_iter()
            .map(|(root, paths)| (root, paths.into_iter().collect()))
            .collect(),
        emulation_code,
        missing_apis: missing.clone(),
        variable_manifest: manifest,
        recommendations,
        stats: EnvStats {
            total,
            filled,
            manual: missing.len(),
        },
    }
}

fn is_function_marker(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| s.starts_with("[Function"))
}

// ---------------------------------------------------------------------------
// live extraction
// ---------------------------------------------------------------------------

async fn extract_value(
    page: &chromiumoxide::Page,
    path: &str,
    depth: usize,
) -> Result<Option<Value>> {
    // Serialize in page context: depth-capped, cycle-guarded, functions
    // become name-hinted markers.
    let script = format!(
        r#"(() => {{
            const MAX = {depth};
            const seen = new Set();
            function ser(v, d) {{
                if (v === null || v === undefined) return null;
                const t = typeof v;
                if (t === 'function') return '[Function: ' + (v.name || 'anonymous') + ']';
                if (t !== 'object') return v;
                if (seen.has(v) || d >= MAX) return {{}};
                seen.add(v);
                const out = {{}};
                try {{
                    for (const k of Object.keys(v).slice(0, 64)) {{
                        try {{ out[k] = ser(v[k], d + 1); }} catch (e) {{}}
                    }}
                }} catch (e) {{}}
                return out;
            }}
            try {{
                const v = {path};
                return JSON.stringify(ser(v, 0));
            }} catch (e) {{
                return null;
            }}
        }})()"#
    );
    let result = page.evaluate(script).await?;
    let raw: Option<String> = result.into_value().unwrap_or(None);
    match raw {
        Some(s) => Ok(serde_json::from_str(&s).ok()),
        None => Ok(None),
    }
}

async fn model_fill(model: &ModelAdapter, missing: &[String]) -> Option<Map<String, Value>> {
    let messages = vec![
        ChatMessage {
            role: Role::System,
            content: "You provide realistic, mutually consistent values for browser environment APIs. Respond with one JSON object mapping each requested dotted path to a value; use the string \"[Function: name]\" for functions. No prose.".into(),
        },
        ChatMessage {
            role: Role::User,
            content: serde_json::to_string(missing).unwrap_or_default(),
        },
    ];
    let resp = model.chat(&messages, &ChatOptions::default()).await.ok()?;
    serde_json::from_str::<Map<String, Value>>(resp.content.trim()).ok()
}

// ---------------------------------------------------------------------------
// shim emission
// ---------------------------------------------------------------------------

fn emit_code(req: &EnvRequest, manifest: &Map<String, Value>) -> EmulationCode {
    let nodejs = matches!(req.target_runtime, TargetRuntime::Nodejs | TargetRuntime::Both)
        .then(|| emit_nodejs(manifest, req.include_comments));
    let python = matches!(req.target_runtime, TargetRuntime::Python | TargetRuntime::Both)
        .then(|| emit_python(manifest, req.include_comments));
    EmulationCode { nodejs, python }
}

/// Nested tree rebuilt from dotted paths.
fn nest(manifest: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut roots: BTreeMap<String, Value> = BTreeMap::new();
    for (path, value) in manifest {
        let mut segments: Vec<&str> = path.split('.').collect();
        let root = segments.remove(0).to_string();
        let mut cursor = roots.entry(root).or_insert_with(|| json!({}));
        for seg in &segments[..segments.len().saturating_sub(1)] {
            if !cursor.is_object() {
                *cursor = json!({});
            }
            cursor = cursor
                .as_object_mut()
                .expect("cursor coerced to object above")
                .entry(seg.to_string())
                .or_insert_with(|| json!({}));
        }
        match segments.last() {
            Some(last) => {
                if !cursor.is_object() {
                    *cursor = json!({});
                }
                if let Some(obj) = cursor.as_object_mut() {
                    obj.insert(last.to_string(), value.clone());
                }
            }
            None => *cursor = value.clone(),
        }
    }
    roots
}

fn emit_nodejs(manifest: &Map<String, Value>, comments: bool) -> String {
    let mut out = String::new();
    if comments {
        out.push_str("// Browser environment shim. Installs the globals the target\n");
        out.push_str("// script reads; function placeholders return undefined.\n");
    }
    out.push_str("const __env = globalThis;\n");
    for (root, tree) in nest(manifest) {
        out.push_str(&format!("__env.{root} = {};\n", js_literal(&tree, 0)));
    }
    out.push_str("if (typeof __env.window === 'undefined') { __env.window = __env; }\n");
    out.push_str("__env.self = __env.window;\n");
    out
}

fn emit_python(manifest: &Map<String, Value>, comments: bool) -> String {
    let mut out = String::new();
    if comments {
        out.push_str("# Browser environment shim: dictionaries mirroring the globals\n");
        out.push_str("# the target script reads. Feed to a JS engine binding as context.\n");
    }
    out.push_str("env = {}\n");
    for (root, tree) in nest(manifest) {
        out.push_str(&format!("env['{root}'] = {}\n", py_literal(&tree, 0)));
    }
    out.push_str("env.setdefault('window', env)\n");
    out
}

fn js_literal(value: &Value, depth: usize) -> String {
    if depth >= MAX_DEPTH {
        return "{}".to_string();
    }
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            if let Some(name) = s.strip_prefix("[Function: ").and_then(|r| r.strip_suffix(']')) {
                format!("function {}() {{ return undefined; }}", sanitize_fn_name(name))
            } else {
                serde_json::to_string(s).unwrap_or_else(|_| "''".into())
            }
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(|v| js_literal(v, depth + 1)).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}: {}",
                        serde_json::to_string(k).unwrap_or_default(),
                        js_literal(v, depth + 1)
                    )
                })
                .collect();
            format!("{{ {} }}", inner.join(", "))
        }
    }
}

fn py_literal(value: &Value, depth: usize) -> String {
    if depth >= MAX_DEPTH {
        return "{}".to_string();
    }
    match value {
        Value::Null => "None".into(),
        Value::Bool(b) => if *b { "True" } else { "False" }.into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| "''".into()),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(|v| py_literal(v, depth + 1)).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}: {}",
                        serde_json::to_string(k).unwrap_or_default(),
                        py_literal(v, depth + 1)
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn sanitize_fn_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .collect();
    if cleaned.is_empty() {
        "anonymous".into()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(source: &str) -> EnvRequest {
        EnvRequest {
            source: source.to_string(),
            target_runtime: TargetRuntime::Both,
            ..Default::default()
        }
    }

    #[test]
    fn test_detects_grouped_paths() {
        let report = analyze(&req(
            "var ua = navigator.userAgent; var w = screen.width; f(location.href);",
        ))
        .unwrap();
        assert!(report.detected_variables.contains_key("navigator"));
        assert!(report.detected_variables.contains_key("screen"));
        assert_eq!(report.detected_variables["navigator"], vec!["navigator.userAgent"]);
    }

    #[test]
    fn test_window_prefix_normalized() {
        let report = analyze(&req("var ua = window.navigator.userAgent;")).unwrap();
        assert!(report.variable_manifest.contains_key("navigator.userAgent"));
    }

    #[test]
    fn test_manifest_filled_from_catalog() {
        let report = analyze(&req("check(navigator.webdriver);")).unwrap();
        assert_eq!(report.variable_manifest["navigator.webdriver"], json!(false));
        assert_eq!(report.stats.total, 1);
        assert_eq!(report.stats.filled, 1);
        assert_eq!(report.stats.manual, 0);
    }

    #[test]
    fn test_missing_api_reported() {
        let report = analyze(&req("use(navigator.bluetooth.requestDevice);")).unwrap();
        assert_eq!(report.missing_apis, vec!["navigator.bluetooth.requestDevice"]);
        assert_eq!(report.stats.manual, 1);
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn test_nodejs_shim_parses_as_js() {
        let report = analyze(&req(
            "var ua = navigator.userAgent; var t = performance.now();",
        ))
        .unwrap();
        let code = report.emulation_code.nodejs.unwrap();
        let outcome = ast::parse(&code).expect("shim must parse");
        assert!(outcome.is_clean(), "issues: {:?}\n{code}", outcome.errors);
        assert!(code.contains("userAgent"));
        assert!(code.contains("function now()"));
    }

    #[test]
    fn test_python_shim_emitted() {
        let report = analyze(&req("check(navigator.webdriver);")).unwrap();
        let py = report.emulation_code.python.unwrap();
        assert!(py.contains("False"));
        assert!(py.contains("env['navigator']"));
    }

    #[test]
    fn test_runtime_selection() {
        let mut r = req("f(screen.width);");
        r.target_runtime = TargetRuntime::Python;
        let report = analyze(&r).unwrap();
        assert!(report.emulation_code.nodejs.is_none());
        assert!(report.emulation_code.python.is_some());
    }

    #[test]
    fn test_bare_root_pulls_catalog_defaults() {
        let report = analyze(&req("hook(localStorage);")).unwrap();
        assert!(report.variable_manifest.contains_key("localStorage.getItem"));
    }

    #[test]
    fn test_non_globals_ignored() {
        let report = analyze(&req("var x = myObject.someField;")).unwrap();
        assert_eq!(report.stats.total, 0);
        assert!(report.variable_manifest.is_empty());
    }

    #[test]
    fn test_nest_builds_tree() {
        let mut m = Map::new();
        m.insert("navigator.userAgent".into(), json!("ua"));
        m.insert("navigator.connection.rtt".into(), json!(50));
        let roots = nest(&m);
        assert_eq!(roots["navigator"]["userAgent"], json!("ua"));
        assert_eq!(roots["navigator"]["connection"]["rtt"], json!(50));
    }
}
