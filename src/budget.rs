//! Token-budget ledger.
//!
//! Every tool return is recorded here; the ledger keeps a rolling picture of
//! response-size spend and latches warnings as configured thresholds are
//! crossed. Token counts are estimated at four bytes per token, the usual
//! cheap approximation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::BudgetSettings;

/// Bytes per estimated token.
const BYTES_PER_TOKEN: usize = 4;

/// Entries shown in `top_tools`.
const TOP_K: usize = 5;

/// Calls echoed back in `recent_calls`.
const RECENT_K: usize = 10;

#[derive(Debug, Clone)]
struct CallRecord {
    tool: String,
    bytes: usize,
    at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    pub tool: String,
    pub tokens: usize,
    pub calls: usize,
}

/// Rolling ledger of per-call response sizes.
pub struct BudgetLedger {
    records: Vec<CallRecord>,
    settings: BudgetSettings,
    /// Threshold fractions already latched this session.
    fired: Vec<f64>,
    warnings: Vec<String>,
    started: Instant,
}

impl BudgetLedger {
    pub fn new(settings: BudgetSettings) -> Self {
        Self {
            records: Vec::new(),
            settings,
            fired: Vec::new(),
            warnings: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Record one tool response. Threshold latches fire here, once per
    /// session until `reset`.
    pub fn record(&mut self, tool: &str, response_bytes: usize) {
        self.records.push(CallRecord {
            tool: tool.to_string(),
            bytes: response_bytes,
            at: Instant::now(),
        });
        let usage = self.current_tokens();
        let max = self.settings.max_tokens;
        let mut fractions = self.settings.warn_fractions.clone();
        fractions.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        for f in fractions {
            if usage as f64 >= f * max as f64 && !self.fired.contains(&f) {
                self.fired.push(f);
                let message = format!(
                    "token budget at {:.0}%: {usage} of {max} estimated tokens used",
                    f * 100.0
                );
                warn!(tool, usage, "{message}");
                self.warnings.push(message);
            }
        }
    }

    pub fn current_tokens(&self) -> usize {
        self.records.iter().map(|r| r.bytes).sum::<usize>() / BYTES_PER_TOKEN
    }

    /// Point-in-time picture of spend, top consumers, and advice.
    pub fn snapshot(&self) -> Value {
        let usage = self.current_tokens();
        let max = self.settings.max_tokens;
        let mut per_tool: HashMap<&str, (usize, usize)> = HashMap::new();
        for r in &self.records {
            let e = per_tool.entry(&r.tool).or_insert((0, 0));
            e.0 += r.bytes;
            e.1 += 1;
        }
        let mut top: Vec<ToolUsage> = per_tool
            .into_iter()
            .map(|(tool, (bytes, calls))| ToolUsage {
                tool: tool.to_string(),
                tokens: bytes / BYTES_PER_TOKEN,
                calls,
            })
            .collect();
        top.sort_by(|a, b| b.tokens.cmp(&a.tokens));
        top.truncate(TOP_K);

        let recent: Vec<Value> = self
            .records
            .iter()
            .rev()
            .take(RECENT_K)
            .map(|r| {
                json!({
                    "tool": r.tool,
                    "tokens": r.bytes / BYTES_PER_TOKEN,
                    "secondsAgo": r.at.elapsed().as_secs(),
                })
            })
            .collect();

        json!({
            "currentUsage": usage,
            "maxTokens": max,
            "usagePercentage": if max == 0 { 0.0 } else { (usage as f64 / max as f64 * 100.0 * 10.0).round() / 10.0 },
            "toolCallCount": self.records.len(),
            "topTools": top,
            "warnings": self.warnings,
            "recentCalls": recent,
            "suggestions": self.suggestions(usage, &self.top_tool_name()),
            "sessionSeconds": self.started.elapsed().as_secs(),
        })
    }

    fn top_tool_name(&self) -> Option<String> {
        let mut per_tool: HashMap<&str, usize> = HashMap::new();
        for r in &self.records {
            *per_tool.entry(&r.tool).or_insert(0) += r.bytes;
        }
        per_tool
            .into_iter()
            .max_by_key(|(_, b)| *b)
            .map(|(t, _)| t.to_string())
    }

    fn suggestions(&self, usage: usize, top_tool: &Option<String>) -> Vec<String> {
        let mut out = Vec::new();
        let max = self.settings.max_tokens;
        if max > 0 && usage * 2 >= max {
            out.push(
                "usage is past half the budget; prefer summary modes and detail-token drilldown"
                    .to_string(),
            );
        }
        if let Some(tool) = top_tool {
            if tool.contains("collect") || tool.contains("scripts") {
                out.push(
                    "script harvests dominate spend; use get_files_by_pattern or get_top_priority_files with tight limits"
                        .to_string(),
                );
            } else if tool.contains("network") {
                out.push(
                    "network captures dominate spend; filter with network_get_requests options before fetching bodies"
                        .to_string(),
                );
            }
        }
        if max > 0 && usage as f64 >= 0.9 * max as f64 {
            out.push("call manual_token_cleanup or reset_token_budget to reclaim headroom".to_string());
        }
        out
    }

    /// Drop records older than the configured window.
    pub fn cleanup(&mut self) -> usize {
        let window = Duration::from_secs(self.settings.window_secs);
        let before = self.records.len();
        self.records.retain(|r| r.at.elapsed() <= window);
        before - self.records.len()
    }

    /// Zero all counters and re-arm the warning latches.
    pub fn reset(&mut self) {
        self.records.clear();
        self.fired.clear();
        self.warnings.clear();
        self.started = Instant::now();
    }

    pub fn detail_threshold(&self) -> usize {
        self.settings.detail_threshold_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_budget() -> BudgetSettings {
        BudgetSettings {
            max_tokens: 1000,
            warn_fractions: vec![0.5, 0.75, 0.9],
            window_secs: 3600,
            detail_threshold_bytes: 1024,
        }
    }

    #[test]
    fn test_record_and_snapshot() {
        let mut ledger = BudgetLedger::new(small_budget());
        ledger.record("page_navigate", 400);
        ledger.record("get_all_scripts", 1200);
        let snap = ledger.snapshot();
        assert_eq!(snap["currentUsage"], 400); // 1600 bytes / 4
        assert_eq!(snap["toolCallCount"], 2);
        assert_eq!(snap["topTools"][0]["tool"], "get_all_scripts");
    }

    #[test]
    fn test_warning_latches_once() {
        let mut ledger = BudgetLedger::new(small_budget());
        // 0.5 * 1000 tokens = 500 tokens = 2000 bytes.
        ledger.record("a", 2000);
        ledger.record("a", 4);
        ledger.record("a", 4);
        let snap = ledger.snapshot();
        let warnings = snap["warnings"].as_array().unwrap();
        assert_eq!(
            warnings
                .iter()
                .filter(|w| w.as_str().unwrap().contains("50%"))
                .count(),
            1
        );
    }

    #[test]
    fn test_multiple_thresholds() {
        let mut ledger = BudgetLedger::new(small_budget());
        ledger.record("a", 4000); // 1000 tokens = 100%
        let snap = ledger.snapshot();
        assert_eq!(snap["warnings"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_reset_zeroes_immediately() {
        let mut ledger = BudgetLedger::new(small_budget());
        ledger.record("a", 4000);
        ledger.reset();
        assert_eq!(ledger.snapshot()["currentUsage"], 0);
        // Latches re-armed.
        ledger.record("a", 2000);
        assert_eq!(ledger.snapshot()["warnings"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_window() {
        let mut settings = small_budget();
        settings.window_secs = 0;
        let mut ledger = BudgetLedger::new(settings);
        ledger.record("a", 400);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(ledger.cleanup(), 1);
        assert_eq!(ledger.current_tokens(), 0);
    }

    #[test]
    fn test_suggestions_for_heavy_collector() {
        let mut ledger = BudgetLedger::new(small_budget());
        ledger.record("collect_scripts", 3000);
        let snap = ledger.snapshot();
        let suggestions = snap["suggestions"].as_array().unwrap();
        assert!(suggestions
            .iter()
            .any(|s| s.as_str().unwrap().contains("get_files_by_pattern")));
    }
}
