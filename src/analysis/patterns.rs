//! Crypto, signature, token, and anti-debug pattern recognition over
//! collected traffic and console logs.
//!
//! Rule-based passes with fixed per-shape confidences; an optional
//! model-enhanced pass can append findings it can justify. Findings dedupe
//! by (type, location).

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::browser::network::CapturedRequest;
use crate::llm::{ChatMessage, ChatOptions, ModelAdapter, Role};

/// Parameter keys that never count as signature payload.
const EXCLUDED_PARAM_KEYS: &[&str] = &["callback", "timestamp", "ts", "time", "nonce", "random"];

#[derive(Debug, Clone, Serialize)]
pub struct PatternFinding {
    /// encryption | signature | token | anti-debug
    pub kind: String,
    /// Family or shape: aes, hmac-sha256, jwt, bearer, ...
    pub family: String,
    pub location: String,
    pub confidence: f64,
    pub details: Value,
}

#[derive(Debug, Serialize)]
pub struct PatternReport {
    pub findings: Vec<PatternFinding>,
    pub requests_scanned: usize,
    pub logs_scanned: usize,
}

/// Run all rule-based passes.
pub fn analyze(requests: &[CapturedRequest], logs: &[String]) -> PatternReport {
    let mut findings = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    let mut push = |f: PatternFinding, seen: &mut HashSet<(String, String)>| {
        if seen.insert((f.kind.clone(), f.location.clone())) {
            findings.push(f);
        }
    };

    for req in requests {
        for f in scan_encryption(&req.url, req.post_data.as_deref(), &req.url, 0.6) {
            push(f, &mut seen);
        }
        for f in scan_signature(req) {
            push(f, &mut seen);
        }
        for f in scan_tokens(req) {
            push(f, &mut seen);
        }
    }
    for (i, log) in logs.iter().enumerate() {
        let location = format!("log:{i}");
        for f in scan_encryption(log, None, &location, 0.75) {
            push(f, &mut seen);
        }
        for f in scan_anti_debug(log, &location) {
            push(f, &mut seen);
        }
    }

    debug!(
        findings = findings.len(),
        requests = requests.len(),
        logs = logs.len(),
        "pattern analysis complete"
    );
    PatternReport {
        findings,
        requests_scanned: requests.len(),
        logs_scanned: logs.len(),
    }
}

/// Rule pass plus one model pass appending only well-formed extra findings.
pub async fn analyze_enhanced(
    requests: &[CapturedRequest],
    logs: &[String],
    model: &ModelAdapter,
) -> PatternReport {
    let mut report = analyze(requests, logs);
    let sample: Vec<Value> = requests
        .iter()
        .take(25)
        .map(|r| {
            json!({
                "url": r.url,
                "method": r.method,
                "headerNames": r.headers.keys().collect::<Vec<_>>(),
                "postData": r.post_data.as_deref().map(|p| p.chars().take(400).collect::<String>()),
            })
        })
        .collect();
    let messages = vec![
        ChatMessage {
            role: Role::System,
            content: "You recognize cryptographic, signature, and token patterns in web traffic. Respond with a JSON array of {\"kind\", \"family\", \"location\", \"confidence\", \"details\"}. kind is one of encryption|signature|token|anti-debug. Respond [] when unsure. No prose.".into(),
        },
        ChatMessage {
            role: Role::User,
            content: json!({ "requests": sample, "logs": logs.iter().take(40).collect::<Vec<_>>() }).to_string(),
        },
    ];
    if let Ok(resp) = model.chat(&messages, &ChatOptions::default()).await {
        if let Ok(extra) = serde_json::from_str::<Vec<Value>>(resp.content.trim()) {
            let mut seen: HashSet<(String, String)> = report
                .findings
                .iter()
                .map(|f| (f.kind.clone(), f.location.clone()))
                .collect();
            for item in extra {
                let (Some(kind), Some(location)) =
                    (item["kind"].as_str(), item["location"].as_str())
                else {
                    continue;
                };
                if !matches!(kind, "encryption" | "signature" | "token" | "anti-debug") {
                    continue;
                }
                if !seen.insert((kind.to_string(), location.to_string())) {
                    continue;
                }
                report.findings.push(PatternFinding {
                    kind: kind.to_string(),
                    family: item["family"].as_str().unwrap_or("custom").to_string(),
                    location: location.to_string(),
                    confidence: item["confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
                    details: item["details"].clone(),
                });
            }
        }
    }
    report
}

// ---------------------------------------------------------------------------
// encryption
// ---------------------------------------------------------------------------

fn scan_encryption(
    haystack: &str,
    post_data: Option<&str>,
    location: &str,
    confidence: f64,
) -> Vec<PatternFinding> {
    const FAMILIES: &[(&str, &[&str])] = &[
        ("aes", &["aes", "rijndael", "cbc", "gcm", "ecb"]),
        ("rsa", &["rsa", "pkcs1", "oaep", "publickey"]),
        ("md5", &["md5"]),
        ("sha", &["sha1", "sha256", "sha512", "sha-"]),
        ("base64", &["base64", "atob(", "btoa("]),
    ];
    let lower = haystack.to_lowercase();
    let post_lower = post_data.map(str::to_lowercase);
    let mut out = Vec::new();
    for (family, keywords) in FAMILIES {
        let hit = keywords.iter().find(|k| {
            lower.contains(**k) || post_lower.as_deref().is_some_and(|p| p.contains(**k))
        });
        if let Some(keyword) = hit {
            out.push(PatternFinding {
                kind: "encryption".into(),
                family: (*family).into(),
                location: location.to_string(),
                confidence,
                details: json!({ "keyword": keyword }),
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// signature
// ---------------------------------------------------------------------------

fn hex64() -> Regex {
    Regex::new(r"^[0-9a-f]{64}$").unwrap()
}

fn jwt_shape() -> Regex {
    Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+$").unwrap()
}

/// Keys from the URL query, headers, and a JSON body.
fn request_params(req: &CapturedRequest) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = req.url.split_once('?').map(|(_, q)| q) {
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(k.to_string(), v.to_string());
        }
    }
    for (k, v) in &req.headers {
        params.insert(k.clone(), v.clone());
    }
    if let Some(post) = &req.post_data {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(post) {
            for (k, v) in map {
                let value = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                params.insert(k, value);
            }
        }
    }
    params
}

fn is_signature_key(key: &str) -> bool {
    let k = key.to_lowercase();
    k == "sign" || k == "sig" || k.contains("signature") || k.ends_with("_sign") || k == "x-sign"
}

fn excluded_param(key: &str) -> bool {
    key.starts_with('_') || EXCLUDED_PARAM_KEYS.contains(&key.to_lowercase().as_str())
}

fn scan_signature(req: &CapturedRequest) -> Vec<PatternFinding> {
    let params = request_params(req);
    let mut out = Vec::new();
    for (key, value) in &params {
        if !is_signature_key(key) {
            continue;
        }
        let (family, confidence) = if hex64().is_match(&value.to_lowercase()) {
            ("hmac-sha256", 0.9)
        } else if jwt_shape().is_match(value) {
            ("jwt", 0.9)
        } else {
            ("custom", 0.6)
        };
        let mut parameters: Vec<&String> = params
            .keys()
            .filter(|k| *k != key && !is_signature_key(k) && !excluded_param(k))
            .collect();
        parameters.sort();
        out.push(PatternFinding {
            kind: "signature".into(),
            family: family.into(),
            location: req.url.clone(),
            confidence,
            details: json!({
                "signatureKey": key,
                "valueLength": value.len(),
                "parameters": parameters,
            }),
        });
    }
    out
}

// ---------------------------------------------------------------------------
// tokens
// ---------------------------------------------------------------------------

fn is_token_key(key: &str) -> bool {
    let k = key.to_lowercase();
    ["token", "auth", "authorization", "access_token", "api_key", "apikey", "session", "jwt", "bearer"]
        .iter()
        .any(|t| k == *t || k.contains("token"))
}

fn base64ish() -> Regex {
    Regex::new(r"^[A-Za-z0-9+/_=-]+$").unwrap()
}

fn scan_tokens(req: &CapturedRequest) -> Vec<PatternFinding> {
    let params = request_params(req);
    let mut out = Vec::new();
    for (key, value) in &params {
        if !is_token_key(key) || value.is_empty() {
            continue;
        }
        let family = if jwt_shape().is_match(value.trim_start_matches("Bearer ")) {
            Some(("jwt", 0.9))
        } else if value.starts_with("Bearer ") {
            Some(("bearer", 0.85))
        } else if value.len() > 20 && base64ish().is_match(value) {
            Some(("custom", 0.6))
        } else {
            None
        };
        if let Some((family, confidence)) = family {
            out.push(PatternFinding {
                kind: "token".into(),
                family: family.into(),
                location: req.url.clone(),
                confidence,
                details: json!({ "key": key, "valueLength": value.len() }),
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// anti-debug
// ---------------------------------------------------------------------------

fn scan_anti_debug(log: &str, location: &str) -> Vec<PatternFinding> {
    let lower = log.to_lowercase();
    let mut out = Vec::new();
    let mut hit = |family: &str, confidence: f64, marker: &str| {
        out.push(PatternFinding {
            kind: "anti-debug".into(),
            family: family.into(),
            location: location.to_string(),
            confidence,
            details: json!({ "marker": marker }),
        });
    };
    if lower.contains("debugger") {
        hit("debugger-statement", 0.8, "debugger");
    }
    if lower.contains("devtools")
        || lower.contains("outerwidth - innerwidth")
        || lower.contains("outerheight - innerheight")
        || lower.contains("console.profile")
    {
        hit("devtools-detection", 0.75, "devtools");
    }
    if (lower.contains("performance.now") || lower.contains("gettime()"))
        && (lower.contains("- start") || lower.contains("delta") || lower.contains("elapsed"))
    {
        hit("timing-check", 0.6, "timing");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str) -> CapturedRequest {
        CapturedRequest {
            request_id: "1".into(),
            url: url.into(),
            method: "GET".into(),
            headers: HashMap::new(),
            post_data: None,
            timestamp: 0.0,
            mime: None,
            status: Some(200),
            response_headers: HashMap::new(),
            body: None,
        }
    }

    #[test]
    fn test_hmac_signature_shape() {
        let sig = "a".repeat(64);
        let r = req(&format!(
            "https://api.test/v1/order?item=1&callback=cb&_t=99&sign={sig}"
        ));
        let report = analyze(&[r], &[]);
        let finding = report
            .findings
            .iter()
            .find(|f| f.kind == "signature")
            .unwrap();
        assert_eq!(finding.family, "hmac-sha256");
        assert_eq!(finding.confidence, 0.9);
        // callback and underscore-prefixed keys are excluded from payload.
        let params: Vec<&str> = finding.details["parameters"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(params, vec!["item"]);
    }

    #[test]
    fn test_jwt_signature_shape() {
        let r = req("https://api.test/x?signature=eyJhb.eyJzd.SflKx");
        let report = analyze(&[r], &[]);
        let finding = report
            .findings
            .iter()
            .find(|f| f.kind == "signature")
            .unwrap();
        assert_eq!(finding.family, "jwt");
    }

    #[test]
    fn test_bearer_token_header() {
        let mut r = req("https://api.test/data");
        r.headers
            .insert("Authorization".into(), "Bearer abcdef1234567890abcdef".into());
        let report = analyze(&[r], &[]);
        let finding = report.findings.iter().find(|f| f.kind == "token").unwrap();
        assert_eq!(finding.family, "bearer");
    }

    #[test]
    fn test_jwt_token_beats_bearer() {
        let mut r = req("https://api.test/data");
        r.headers.insert(
            "Authorization".into(),
            "Bearer eyJhbGciOi.eyJzdWIiOi.SflKxwRJSM".into(),
        );
        let report = analyze(&[r], &[]);
        let finding = report.findings.iter().find(|f| f.kind == "token").unwrap();
        assert_eq!(finding.family, "jwt");
    }

    #[test]
    fn test_encryption_in_logs_higher_confidence() {
        let report = analyze(&[], &["CryptoJS.AES.encrypt(payload, key)".to_string()]);
        let finding = report
            .findings
            .iter()
            .find(|f| f.kind == "encryption" && f.family == "aes")
            .unwrap();
        assert_eq!(finding.confidence, 0.75);
    }

    #[test]
    fn test_encryption_in_url() {
        let report = analyze(&[req("https://cdn.test/lib/aes.min.js")], &[]);
        let finding = report
            .findings
            .iter()
            .find(|f| f.kind == "encryption")
            .unwrap();
        assert_eq!(finding.confidence, 0.6);
    }

    #[test]
    fn test_anti_debug_log() {
        let report = analyze(
            &[],
            &["detected: debugger; loop armed".to_string()],
        );
        assert!(report.findings.iter().any(|f| f.kind == "anti-debug"));
    }

    #[test]
    fn test_dedupe_by_kind_and_location() {
        let r1 = req("https://api.test/x?sign=abc");
        let r2 = req("https://api.test/x?sign=abc");
        let report = analyze(&[r1, r2], &[]);
        let sigs = report
            .findings
            .iter()
            .filter(|f| f.kind == "signature")
            .count();
        assert_eq!(sigs, 1);
    }

    #[test]
    fn test_no_findings_on_plain_traffic() {
        let report = analyze(&[req("https://example.test/index.html")], &[]);
        assert!(report.findings.is_empty());
    }
}
