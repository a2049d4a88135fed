//! MCP tool dispatcher.
//!
//! One rmcp server owns the whole workbench: the script collector (and
//! through it the browser), the network/console/debugger monitors, the
//! detail-token store, and the token-budget ledger. Every tool return is
//! recorded in the ledger and oversized results are parked behind a detail
//! token before leaving the dispatcher. Tool failures come back as
//! `{ success: false, error, hint? }` text results so the agent can adapt.

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::analysis::deob::{DeobOptions, Deobfuscator};
use crate::analysis::envshim::{self, EnvRequest, TargetRuntime};
use crate::analysis::obfuscation;
use crate::analysis::patterns;
use crate::analysis::taint::{self, TaintConfig};
use crate::browser::console::{self as console_mod, ConsoleTracker};
use crate::browser::debugger::DebuggerControl;
use crate::browser::network::NetworkMonitor;
use crate::browser::stealth;
use crate::budget::BudgetLedger;
use crate::collector::{CollectOptions, ScriptCollector, SmartMode};
use crate::config::Settings;
use crate::detail::DetailStore;
use crate::llm::ModelAdapter;
use crate::{Error, Result as WbResult};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct State {
    collector: ScriptCollector,
    network: NetworkMonitor,
    console: ConsoleTracker,
    debugger: DebuggerControl,
    detail: DetailStore,
    budget: BudgetLedger,
    model: Option<ModelAdapter>,
    settings: Settings,
}

impl State {
    fn new(settings: Settings) -> WbResult<Self> {
        let model = ModelAdapter::from_settings(&settings.model);
        Ok(Self {
            collector: ScriptCollector::new(settings.clone())?,
            network: NetworkMonitor::new(),
            console: ConsoleTracker::new(),
            debugger: DebuggerControl::new(&settings.paths.debugger_session_dir),
            detail: DetailStore::new(),
            budget: BudgetLedger::new(settings.budget.clone()),
            model,
            settings,
        })
    }

    /// Wrap a tool outcome: budget accounting and detail-token handling on
    /// success, a `{ success: false }` text result on failure.
    fn finish(&mut self, tool: &str, result: WbResult<Value>) -> Result<CallToolResult, ErrorData> {
        let value = match result {
            Ok(v) => v,
            Err(e) => {
                warn!(tool, error = %e, "tool failed");
                let mut body = json!({ "success": false, "error": e.to_string() });
                if let Some(hint) = e.hint() {
                    body["hint"] = json!(hint);
                }
                let text = body.to_string();
                self.budget.record(tool, text.len());
                return Ok(CallToolResult::success(vec![Content::text(text)]));
            }
        };
        let threshold = self.budget.detail_threshold();
        let handled = self.detail.smart_handle(value, threshold);
        let text = serde_json::to_string(&handled)
            .unwrap_or_else(|e| json!({ "success": false, "error": e.to_string() }).to_string());
        self.budget.record(tool, text.len());
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    fn page(&self) -> WbResult<&chromiumoxide::Page> {
        self.collector.browser()?.active_page()
    }

    /// Source text from an inline argument or a collected file URL.
    fn resolve_source(&self, source: &Option<String>, url: &Option<String>) -> WbResult<String> {
        if let Some(s) = source {
            return Ok(s.clone());
        }
        if let Some(u) = url {
            return self
                .collector
                .file_by_url(u)
                .map(|f| f.source.clone())
                .ok_or_else(|| {
                    Error::Invariant(format!(
                        "no collected file for `{u}`; run collect_scripts first"
                    ))
                });
        }
        Err(Error::Config("provide either `source` or `url`".into()))
    }

    // ---- browser lifecycle -----------------------------------------------

    async fn browser_launch(&mut self) -> WbResult<Value> {
        self.collector.init().await?;
        Ok(json!({ "success": true, "status": self.collector.status() }))
    }

    async fn browser_close(&mut self) -> WbResult<Value> {
        // Monitors first, then the collector tears down caches and browser.
        if let Ok(page) = self.page() {
            let page = page.clone();
            self.network.disable(&page).await;
            let _ = self.debugger.disable(&page).await;
        }
        self.console.disable();
        self.collector.close().await?;
        Ok(json!({ "success": true }))
    }

    async fn browser_status(&mut self) -> WbResult<Value> {
        Ok(json!({
            "collector": self.collector.status(),
            "networkEnabled": self.network.is_enabled(),
            "consoleEnabled": self.console.is_enabled(),
            "debuggerEnabled": self.debugger.is_enabled(),
            "detailTokens": self.detail.len(),
        }))
    }

    // ---- navigation ------------------------------------------------------

    async fn page_navigate(&mut self, req: &NavigateRequest) -> WbResult<Value> {
        self.collector.init().await?;
        let (url, title) = self.collector.browser_mut()?.navigate(&req.url).await?;
        if req.enable_network.unwrap_or(true) {
            let page = self.page()?.clone();
            self.network.enable(&page).await?;
        }
        let mut out = json!({ "success": true, "url": url, "title": title });
        if req.detect_captcha.unwrap_or(false) {
            let page = self.page()?.clone();
            match crate::captcha::detect_on_page(&page).await {
                Some(info) => out["captcha"] = serde_json::to_value(&info)?,
                None => out["captcha"] = Value::Null,
            }
        }
        Ok(out)
    }

    async fn page_reload(&mut self) -> WbResult<Value> {
        self.collector.browser()?.reload().await?;
        Ok(json!({ "success": true, "url": self.collector.browser()?.current_url().await? }))
    }

    async fn history(&mut self, delta: i32) -> WbResult<Value> {
        self.collector.browser()?.history_go(delta).await?;
        Ok(json!({ "success": true, "url": self.collector.browser()?.current_url().await? }))
    }

    // ---- DOM -------------------------------------------------------------

    async fn dom_eval(&self, js: String) -> WbResult<Value> {
        self.collector.browser()?.evaluate_value(js).await
    }

    // ---- scripts ---------------------------------------------------------

    async fn collect_scripts(&mut self, req: &CollectRequest) -> WbResult<Value> {
        let opts = req.to_options();
        let result = self.collector.collect(&req.url, &opts).await?;
        if opts.smart_mode == SmartMode::Summary {
            Ok(ScriptCollector::summarize_result(&result))
        } else {
            Ok(serde_json::to_value(&result)?)
        }
    }

    async fn get_script_source(&self, req: &ScriptSourceRequest) -> WbResult<Value> {
        let file = self.collector.file_by_url(&req.url).ok_or_else(|| {
            Error::Invariant(format!(
                "no collected file for `{}`; run collect_scripts first",
                req.url
            ))
        })?;
        let lines: Vec<&str> = file.source.lines().collect();
        let start = req.start_line.unwrap_or(1).max(1);
        let end = req.end_line.unwrap_or(start + 199).min(lines.len());
        let slice: Vec<Value> = lines
            .iter()
            .enumerate()
            .skip(start.saturating_sub(1))
            .take(end.saturating_sub(start.saturating_sub(1)))
            .map(|(i, l)| json!({ "line": i + 1, "text": l }))
            .collect();
        Ok(json!({
            "url": file.url,
            "kind": file.kind,
            "totalLines": lines.len(),
            "start": start,
            "end": end.min(lines.len()),
            "lines": slice,
            "truncatedFile": file.truncated,
        }))
    }

    // ---- analysis --------------------------------------------------------

    async fn deobfuscate(&mut self, req: &DeobRequest) -> WbResult<Value> {
        let source = self.resolve_source(&req.source, &req.url)?;
        let opts = DeobOptions {
            aggressive: req.aggressive.unwrap_or(false),
            rename: req.rename.unwrap_or(false),
            use_model: req.use_model.unwrap_or(true),
            ..Default::default()
        };
        let deob = match &self.model {
            Some(m) => Deobfuscator::with_model(m.clone()),
            None => Deobfuscator::new(),
        };
        let result = deob.run(&source, &opts).await;
        Ok(serde_json::to_value(&result)?)
    }

    async fn analyze_taint(&mut self, req: &SourceOrUrlRequest) -> WbResult<Value> {
        let source = self.resolve_source(&req.source, &req.url)?;
        let config = TaintConfig::default();
        let report = match (&self.model, req.use_model.unwrap_or(false)) {
            (Some(model), true) => taint::analyze_enhanced(&source, &config, model).await?,
            _ => taint::analyze(&source, &config)?,
        };
        Ok(serde_json::to_value(&report)?)
    }

    async fn analyze_patterns(&mut self, req: &PatternsRequest) -> WbResult<Value> {
        let requests = self.network.requests().await;
        let logs = if req.include_logs.unwrap_or(true) {
            self.console.log_texts().await
        } else {
            Vec::new()
        };
        let report = match (&self.model, req.use_model.unwrap_or(false)) {
            (Some(model), true) => patterns::analyze_enhanced(&requests, &logs, model).await,
            _ => patterns::analyze(&requests, &logs),
        };
        Ok(serde_json::to_value(&report)?)
    }

    async fn synthesize_env(&mut self, req: &EnvSynthRequest) -> WbResult<Value> {
        let source = self.resolve_source(&req.source, &req.url)?;
        let env_req = EnvRequest {
            source,
            target_runtime: req.target_runtime.unwrap_or(TargetRuntime::Nodejs),
            include_comments: req.include_comments.unwrap_or(true),
            extract_depth: req.extract_depth.unwrap_or(3),
        };
        let auto_fetch = req.auto_fetch.unwrap_or(false);
        let page = if auto_fetch { self.page().ok().cloned() } else { None };
        let report = envshim::analyze_live(&env_req, page.as_ref(), self.model.as_ref()).await?;
        Ok(serde_json::to_value(&report)?)
    }

    // ---- console ---------------------------------------------------------

    async fn console_enable(&mut self) -> WbResult<Value> {
        let page = self.page()?.clone();
        self.console.enable(&page).await?;
        Ok(json!({ "success": true }))
    }

    async fn console_inject(&mut self, req: &InterceptorRequest) -> WbResult<Value> {
        let script = match req.kind.as_str() {
            "xhr" => console_mod::XHR_INTERCEPTOR.to_string(),
            "fetch" => console_mod::FETCH_INTERCEPTOR.to_string(),
            "script-monitor" => console_mod::SCRIPT_MONITOR.to_string(),
            "function-tracer" => {
                let target = req.target.as_deref().ok_or_else(|| {
                    Error::Config("function-tracer needs `target` (dotted function path)".into())
                })?;
                console_mod::function_tracer(target)
            }
            other => {
                return Err(Error::Config(format!(
                    "unknown interceptor `{other}`; use xhr|fetch|function-tracer|script-monitor"
                )))
            }
        };
        let outcome: Value = self.collector.browser()?.evaluate_value(script).await?;
        Ok(json!({ "success": true, "result": outcome }))
    }

    // ---- network ---------------------------------------------------------

    async fn network_enable(&mut self) -> WbResult<Value> {
        let page = self.page()?.clone();
        self.network.enable(&page).await?;
        Ok(json!({ "success": true }))
    }

    async fn network_disable(&mut self) -> WbResult<Value> {
        let page = self.page()?.clone();
        self.network.disable(&page).await;
        Ok(json!({ "success": true }))
    }

    async fn network_get_requests(&self, req: &NetworkRequestsRequest) -> WbResult<Value> {
        let mut requests = self.network.requests().await;
        if let Some(filter) = &req.filter_url {
            requests.retain(|r| r.url.contains(filter.as_str()));
        }
        let total = requests.len();
        let limit = req.limit.unwrap_or(50);
        let slice: Vec<Value> = requests
            .into_iter()
            .rev()
            .take(limit)
            .map(|r| {
                json!({
                    "requestId": r.request_id,
                    "url": r.url,
                    "method": r.method,
                    "status": r.status,
                    "mime": r.mime,
                    "postData": r.post_data,
                })
            })
            .collect();
        Ok(json!({ "total": total, "returned": slice.len(), "requests": slice }))
    }

    async fn network_get_response_body(&mut self, req: &ResponseBodyRequest) -> WbResult<Value> {
        let page = self.page()?.clone();
        let max = req
            .max_bytes
            .unwrap_or(self.settings.collector.max_response_size);
        let (body, truncated, original) = self
            .network
            .response_body(&page, &req.request_id, max)
            .await?;
        if req.summary_only.unwrap_or(false) {
            let head: String = body.chars().take(400).collect();
            return Ok(json!({
                "requestId": req.request_id,
                "originalSize": original,
                "head": head,
            }));
        }
        Ok(json!({
            "requestId": req.request_id,
            "body": body,
            "truncated": truncated,
            "originalSize": original,
        }))
    }

    // ---- budget ----------------------------------------------------------

    fn manual_cleanup(&mut self) -> WbResult<Value> {
        let budget_dropped = self.budget.cleanup();
        let details_dropped = self.detail.cleanup();
        let cache_dropped = self.collector.cache_cleanup().unwrap_or(0);
        Ok(json!({
            "success": true,
            "budgetRecordsDropped": budget_dropped,
            "detailTokensDropped": details_dropped,
            "cacheEntriesDropped": cache_dropped,
        }))
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct NavigateRequest {
    #[schemars(description = "URL to navigate to")]
    pub url: String,
    #[schemars(description = "Auto-enable the network monitor (default true)")]
    pub enable_network: Option<bool>,
    #[schemars(description = "Probe the landed page for a captcha widget")]
    pub detect_captcha: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SelectorRequest {
    #[schemars(description = "CSS selector")]
    pub selector: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct QueryAllRequest {
    #[schemars(description = "CSS selector")]
    pub selector: String,
    #[schemars(description = "Maximum elements returned (default 20)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DomStructureRequest {
    #[schemars(description = "Maximum tree depth (default 4)")]
    pub max_depth: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ComputedStyleRequest {
    #[schemars(description = "CSS selector")]
    pub selector: String,
    #[schemars(description = "Style property names; a common set when omitted")]
    pub properties: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FindTextRequest {
    #[schemars(description = "Text substring, case-insensitive")]
    pub text: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TypeRequest {
    #[schemars(description = "CSS selector of the input")]
    pub selector: String,
    #[schemars(description = "Text to type")]
    pub text: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SelectOptionRequest {
    #[schemars(description = "CSS selector of the <select>")]
    pub selector: String,
    #[schemars(description = "Option value or visible text")]
    pub value: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ScrollRequest {
    #[schemars(description = "up, down, top, bottom, or a CSS selector to scroll into view")]
    pub target: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PressKeyRequest {
    #[schemars(description = "Key to press (Enter, Tab, Escape, ArrowDown, ...)")]
    pub key: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct WaitForSelectorRequest {
    #[schemars(description = "CSS selector to wait for")]
    pub selector: String,
    #[schemars(description = "Timeout in milliseconds (default 10000)")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EvaluateRequest {
    #[schemars(description = "JavaScript expression; its JSON value is returned")]
    pub expression: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ScreenshotRequest {
    #[schemars(description = "Capture the full page instead of the viewport")]
    pub full_page: Option<bool>,
    #[schemars(description = "Also return the PNG as base64")]
    pub as_base64: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct InjectScriptRequest {
    #[schemars(description = "JavaScript to run in the page now")]
    pub script: String,
    #[schemars(description = "Also install for every future document")]
    pub persist: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SetCookieRequest {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ViewportRequest {
    pub width: i64,
    pub height: i64,
    #[schemars(description = "Emulate a mobile device")]
    pub mobile: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EmulateDeviceRequest {
    #[schemars(description = "Device preset: iphone, pixel, ipad, desktop")]
    pub device: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StorageGetRequest {
    #[schemars(description = "Read sessionStorage instead of localStorage")]
    pub session: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StorageSetRequest {
    pub key: String,
    pub value: String,
    #[schemars(description = "Write sessionStorage instead of localStorage")]
    pub session: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CollectRequest {
    #[schemars(description = "Page URL to harvest scripts from")]
    pub url: String,
    pub include_inline: Option<bool>,
    pub include_service_worker: Option<bool>,
    pub include_web_worker: Option<bool>,
    #[schemars(description = "Dwell after load for dynamically injected scripts")]
    pub include_dynamic: Option<bool>,
    #[schemars(description = "off, filter (priority-trimmed), or summary")]
    pub smart_mode: Option<SmartMode>,
    #[schemars(description = "Gzip+base64 the returned sources")]
    pub compress: Option<bool>,
    pub max_total_size: Option<usize>,
    pub max_file_size: Option<usize>,
    #[schemars(description = "Extra URL keywords boosted by smart selection")]
    pub priorities: Option<Vec<String>>,
    pub timeout_ms: Option<u64>,
}

impl CollectRequest {
    fn to_options(&self) -> CollectOptions {
        let defaults = CollectOptions::default();
        CollectOptions {
            include_inline: self.include_inline.unwrap_or(defaults.include_inline),
            include_service_worker: self
                .include_service_worker
                .unwrap_or(defaults.include_service_worker),
            include_web_worker: self
                .include_web_worker
                .unwrap_or(defaults.include_web_worker),
            include_dynamic: self.include_dynamic.unwrap_or(defaults.include_dynamic),
            smart_mode: self.smart_mode.unwrap_or(defaults.smart_mode),
            compress: self.compress.unwrap_or(defaults.compress),
            max_total_size: self.max_total_size.unwrap_or(defaults.max_total_size),
            max_file_size: self.max_file_size,
            priorities: self.priorities.clone().unwrap_or_default(),
            timeout_ms: self.timeout_ms,
        }
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ScriptSourceRequest {
    #[schemars(description = "Collected file URL")]
    pub url: String,
    #[schemars(description = "1-based first line of the preview")]
    pub start_line: Option<usize>,
    #[schemars(description = "1-based last line of the preview")]
    pub end_line: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FilesByPatternRequest {
    #[schemars(description = "Regex matched against collected file URLs")]
    pub pattern: String,
    #[schemars(description = "Maximum files returned (default 10)")]
    pub limit: Option<usize>,
    #[schemars(description = "Total size budget in bytes (default 512 KiB)")]
    pub max_total_size: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TopPriorityRequest {
    #[schemars(description = "How many files (default 5)")]
    pub top_n: Option<usize>,
    #[schemars(description = "Total size budget in bytes (default 512 KiB)")]
    pub max_total_size: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FileByUrlRequest {
    #[schemars(description = "Collected file URL")]
    pub url: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SourceOrUrlRequest {
    #[schemars(description = "JavaScript source text")]
    pub source: Option<String>,
    #[schemars(description = "Collected file URL to analyze instead")]
    pub url: Option<String>,
    #[schemars(description = "Let the configured model add findings")]
    pub use_model: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeobRequest {
    #[schemars(description = "JavaScript source text")]
    pub source: Option<String>,
    #[schemars(description = "Collected file URL to deobfuscate instead")]
    pub url: Option<String>,
    #[schemars(description = "Enable control-flow unflattening and VM work")]
    pub aggressive: Option<bool>,
    #[schemars(description = "Rename mangled identifiers to var_N")]
    pub rename: Option<bool>,
    #[schemars(description = "Allow model-assisted passes (default true)")]
    pub use_model: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PatternsRequest {
    #[schemars(description = "Scan console logs too (default true)")]
    pub include_logs: Option<bool>,
    #[schemars(description = "Let the configured model add findings")]
    pub use_model: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EnvSynthRequest {
    #[schemars(description = "JavaScript source text")]
    pub source: Option<String>,
    #[schemars(description = "Collected file URL to analyze instead")]
    pub url: Option<String>,
    #[schemars(description = "nodejs, python, or both (default nodejs)")]
    pub target_runtime: Option<TargetRuntime>,
    #[schemars(description = "Pull real values from the live page")]
    pub auto_fetch: Option<bool>,
    #[schemars(description = "Object serialization depth for live values (default 3)")]
    pub extract_depth: Option<usize>,
    pub include_comments: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ConsoleLogsRequest {
    #[schemars(description = "Maximum entries returned, newest first (default 100)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct InterceptorRequest {
    #[schemars(description = "xhr, fetch, function-tracer, or script-monitor")]
    pub kind: String,
    #[schemars(description = "Dotted function path for function-tracer")]
    pub target: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct NetworkRequestsRequest {
    #[schemars(description = "Substring filter on the URL")]
    pub filter_url: Option<String>,
    #[schemars(description = "Maximum requests returned, newest first (default 50)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ResponseBodyRequest {
    #[schemars(description = "Request id from network_get_requests")]
    pub request_id: String,
    #[schemars(description = "Truncation cap in bytes")]
    pub max_bytes: Option<usize>,
    #[schemars(description = "Return only a short head and the size")]
    pub summary_only: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BreakpointRequest {
    #[schemars(description = "Script URL the breakpoint applies to")]
    pub url: String,
    #[schemars(description = "0-based line number")]
    pub line: i64,
    #[schemars(description = "Optional condition expression")]
    pub condition: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BreakpointIdRequest {
    #[schemars(description = "Breakpoint id from breakpoint_set")]
    pub id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExceptionBreakRequest {
    #[schemars(description = "all, uncaught, or none")]
    pub state: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct XhrBreakRequest {
    #[schemars(description = "URL substring that triggers the break")]
    pub url_substring: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EventBreakRequest {
    #[schemars(description = "Event name, e.g. click or setTimeout")]
    pub event_name: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BlackboxRequest {
    #[schemars(description = "Regex patterns for scripts to blackbox")]
    pub patterns: Vec<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExpressionRequest {
    #[schemars(description = "Expression to evaluate")]
    pub expression: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct WaitPausedRequest {
    #[schemars(description = "Timeout in milliseconds (default 10000)")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SessionNameRequest {
    #[schemars(description = "Session name")]
    pub name: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DetailRequest {
    #[schemars(description = "Detail id returned with an oversized result")]
    pub detail_id: String,
    #[schemars(description = "Dotted path into the stored value; numbers index arrays")]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UserAgentRequest {
    #[schemars(description = "User agent string to present")]
    pub user_agent: String,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "''".into())
}

#[derive(Clone)]
pub struct WorkbenchServer {
    state: Arc<Mutex<State>>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl WorkbenchServer {
    pub fn new(settings: Settings) -> WbResult<Self> {
        Ok(Self {
            state: Arc::new(Mutex::new(State::new(settings)?)),
            tool_router: Self::tool_router(),
        })
    }

    // ---- browser lifecycle -----------------------------------------------

    #[tool(description = "Launch the browser. Safe to call twice.")]
    async fn browser_launch(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.browser_launch().await;
        state.finish("browser_launch", result)
    }

    #[tool(description = "Close the browser and clear all derived caches and collected files.")]
    async fn browser_close(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.browser_close().await;
        state.finish("browser_close", result)
    }

    #[tool(description = "Browser, monitor, cache, and collection status.")]
    async fn browser_status(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.browser_status().await;
        state.finish("browser_status", result)
    }

    // ---- navigation ------------------------------------------------------

    #[tool(
        description = "Navigate to a URL (launches the browser on first call). Auto-enables the network monitor unless enable_network is false; optionally probes for captchas."
    )]
    async fn page_navigate(
        &self,
        req: Parameters<NavigateRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.page_navigate(&req.0).await;
        state.finish("page_navigate", result)
    }

    #[tool(description = "Reload the current page.")]
    async fn page_reload(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.page_reload().await;
        state.finish("page_reload", result)
    }

    #[tool(description = "Go back in history.")]
    async fn page_back(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.history(-1).await;
        state.finish("page_back", result)
    }

    #[tool(description = "Go forward in history.")]
    async fn page_forward(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.history(1).await;
        state.finish("page_forward", result)
    }

    // ---- DOM -------------------------------------------------------------

    #[tool(description = "First element matching a CSS selector: tag, attributes, text.")]
    async fn dom_query_selector(
        &self,
        req: Parameters<SelectorRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return null;
                return {{
                    tag: el.tagName.toLowerCase(),
                    id: el.id || null,
                    className: el.className || null,
                    text: (el.textContent || '').trim().slice(0, 200),
                    attributes: Object.fromEntries(Array.from(el.attributes).map(a => [a.name, a.value])),
                }};
            }})()"#,
            sel = js_str(&req.0.selector)
        );
        let result = state.dom_eval(js).await;
        state.finish("dom_query_selector", result)
    }

    #[tool(description = "All elements matching a CSS selector, bounded by limit.")]
    async fn dom_query_all(
        &self,
        req: Parameters<QueryAllRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"Array.from(document.querySelectorAll({sel})).slice(0, {limit}).map(el => ({{
                tag: el.tagName.toLowerCase(),
                id: el.id || null,
                text: (el.textContent || '').trim().slice(0, 120),
            }}))"#,
            sel = js_str(&req.0.selector),
            limit = req.0.limit.unwrap_or(20)
        );
        let result = state.dom_eval(js).await;
        state.finish("dom_query_all", result)
    }

    #[tool(
        description = "Bounded-depth DOM tree of the page. Large trees come back behind a detail token."
    )]
    async fn dom_get_structure(
        &self,
        req: Parameters<DomStructureRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"(() => {{
                const MAX = {depth};
                function walk(el, d) {{
                    const out = {{ tag: el.tagName.toLowerCase() }};
                    if (el.id) out.id = el.id;
                    if (d < MAX) {{
                        const kids = Array.from(el.children).slice(0, 40).map(c => walk(c, d + 1));
                        if (kids.length) out.children = kids;
                    }} else if (el.children.length) {{
                        out.childCount = el.children.length;
                    }}
                    return out;
                }}
                return walk(document.documentElement, 0);
            }})()"#,
            depth = req.0.max_depth.unwrap_or(4)
        );
        let result = state.dom_eval(js).await;
        state.finish("dom_get_structure", result)
    }

    #[tool(description = "Clickable elements on the page (links, buttons, inputs, role=button).")]
    async fn dom_find_clickable(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = r#"Array.from(document.querySelectorAll('a, button, input[type=submit], input[type=button], [role="button"], [onclick]'))
            .slice(0, 100)
            .map((el, i) => ({
                index: i,
                tag: el.tagName.toLowerCase(),
                text: (el.textContent || el.value || '').trim().slice(0, 80),
                href: el.href || null,
            }))"#
            .to_string();
        let result = state.dom_eval(js).await;
        state.finish("dom_find_clickable", result)
    }

    #[tool(description = "Computed style of the first element matching a selector.")]
    async fn dom_get_computed_style(
        &self,
        req: Parameters<ComputedStyleRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let props = req.0.properties.clone().unwrap_or_else(|| {
            [
                "display",
                "visibility",
                "position",
                "width",
                "height",
                "color",
                "background-color",
                "z-index",
                "opacity",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()
        });
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return null;
                const cs = getComputedStyle(el);
                const props = {props};
                return Object.fromEntries(props.map(p => [p, cs.getPropertyValue(p)]));
            }})()"#,
            sel = js_str(&req.0.selector),
            props = serde_json::to_string(&props).unwrap_or_else(|_| "[]".into())
        );
        let result = state.dom_eval(js).await;
        state.finish("dom_get_computed_style", result)
    }

    #[tool(description = "Elements whose own text contains a substring (case-insensitive).")]
    async fn dom_find_by_text(
        &self,
        req: Parameters<FindTextRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"(() => {{
                const needle = {needle}.toLowerCase();
                const out = [];
                const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_ELEMENT);
                while (walker.nextNode() && out.length < 50) {{
                    const el = walker.currentNode;
                    const own = Array.from(el.childNodes)
                        .filter(n => n.nodeType === 3)
                        .map(n => n.textContent)
                        .join(' ');
                    if (own.toLowerCase().includes(needle)) {{
                        out.push({{ tag: el.tagName.toLowerCase(), id: el.id || null, text: own.trim().slice(0, 120) }});
                    }}
                }}
                return out;
            }})()"#,
            needle = js_str(&req.0.text)
        );
        let result = state.dom_eval(js).await;
        state.finish("dom_find_by_text", result)
    }

    #[tool(description = "XPath of the first element matching a CSS selector.")]
    async fn dom_get_xpath(
        &self,
        req: Parameters<SelectorRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"(() => {{
                let el = document.querySelector({sel});
                if (!el) return null;
                const parts = [];
                while (el && el.nodeType === 1) {{
                    let idx = 1;
                    let sib = el.previousElementSibling;
                    while (sib) {{ if (sib.tagName === el.tagName) idx++; sib = sib.previousElementSibling; }}
                    parts.unshift(el.tagName.toLowerCase() + '[' + idx + ']');
                    el = el.parentElement;
                }}
                return '/' + parts.join('/');
            }})()"#,
            sel = js_str(&req.0.selector)
        );
        let result = state.dom_eval(js).await;
        state.finish("dom_get_xpath", result)
    }

    #[tool(description = "Whether the first element matching a selector is inside the viewport.")]
    async fn dom_is_in_viewport(
        &self,
        req: Parameters<SelectorRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return null;
                const r = el.getBoundingClientRect();
                return r.bottom > 0 && r.top < window.innerHeight && r.right > 0 && r.left < window.innerWidth;
            }})()"#,
            sel = js_str(&req.0.selector)
        );
        let result = state.dom_eval(js).await;
        state.finish("dom_is_in_viewport", result)
    }

    // ---- interaction -----------------------------------------------------

    #[tool(description = "Click the first element matching a CSS selector.")]
    async fn page_click(
        &self,
        req: Parameters<SelectorRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"(() => {{ const el = document.querySelector({sel}); if (!el) return false; el.click(); return true; }})()"#,
            sel = js_str(&req.0.selector)
        );
        let result = state.dom_eval(js).await;
        state.finish("page_click", result)
    }

    #[tool(description = "Set an input's value and fire input/change events.")]
    async fn page_type(&self, req: Parameters<TypeRequest>) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.focus();
                el.value = {text};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js_str(&req.0.selector),
            text = js_str(&req.0.text)
        );
        let result = state.dom_eval(js).await;
        state.finish("page_type", result)
    }

    #[tool(description = "Select a dropdown option by value or visible text.")]
    async fn page_select(
        &self,
        req: Parameters<SelectOptionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"(() => {{
                const sel = document.querySelector({selector});
                if (!sel) return false;
                const val = {value};
                const opt = Array.from(sel.options).find(o => o.value === val || o.text === val);
                if (!opt) return false;
                sel.value = opt.value;
                sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            selector = js_str(&req.0.selector),
            value = js_str(&req.0.value)
        );
        let result = state.dom_eval(js).await;
        state.finish("page_select", result)
    }

    #[tool(description = "Fire mouseover on the first element matching a selector.")]
    async fn page_hover(
        &self,
        req: Parameters<SelectorRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.dispatchEvent(new MouseEvent('mouseover', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js_str(&req.0.selector)
        );
        let result = state.dom_eval(js).await;
        state.finish("page_hover", result)
    }

    #[tool(
        description = "Scroll the page: up, down, top, bottom, or a selector to scroll into view."
    )]
    async fn page_scroll(
        &self,
        req: Parameters<ScrollRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = match req.0.target.as_str() {
            "up" => "window.scrollBy(0, -window.innerHeight * 0.8); true".to_string(),
            "down" => "window.scrollBy(0, window.innerHeight * 0.8); true".to_string(),
            "top" => "window.scrollTo(0, 0); true".to_string(),
            "bottom" => "window.scrollTo(0, document.body.scrollHeight); true".to_string(),
            selector => format!(
                "(() => {{ const el = document.querySelector({sel}); if (!el) return false; el.scrollIntoView({{ block: 'center' }}); return true; }})()",
                sel = js_str(selector)
            ),
        };
        let result = state.dom_eval(js).await;
        state.finish("page_scroll", result)
    }

    #[tool(description = "Dispatch a keyboard event to the focused element.")]
    async fn page_press_key(
        &self,
        req: Parameters<PressKeyRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = format!(
            r#"(() => {{
                const key = {key};
                const target = document.activeElement || document.body;
                for (const kind of ['keydown', 'keypress', 'keyup']) {{
                    target.dispatchEvent(new KeyboardEvent(kind, {{ key, bubbles: true }}));
                }}
                return true;
            }})()"#,
            key = js_str(&req.0.key)
        );
        let result = state.dom_eval(js).await;
        state.finish("page_press_key", result)
    }

    #[tool(description = "Wait until a selector matches, or time out.")]
    async fn page_wait_for_selector(
        &self,
        req: Parameters<WaitForSelectorRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let timeout = req.0.timeout_ms.unwrap_or(10_000);
        let probe = format!("!!document.querySelector({})", js_str(&req.0.selector));
        let result = async {
            let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout);
            loop {
                let found: bool = state.collector.browser()?.evaluate(probe.clone()).await?;
                if found {
                    return Ok(json!({ "found": true }));
                }
                if std::time::Instant::now() >= deadline {
                    return Err(Error::Timeout(timeout));
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
        .await;
        state.finish("page_wait_for_selector", result)
    }

    #[tool(
        description = "Evaluate a JavaScript expression and return its JSON value. Large results come back behind a detail token."
    )]
    async fn page_evaluate(
        &self,
        req: Parameters<EvaluateRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.dom_eval(req.0.expression.clone()).await;
        state.finish("page_evaluate", result)
    }

    #[tool(
        description = "Screenshot the page to the screenshots directory; optionally return base64 PNG."
    )]
    async fn page_screenshot(
        &self,
        req: Parameters<ScreenshotRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let png = state
                .collector
                .browser()?
                .screenshot_png(req.0.full_page.unwrap_or(false))
                .await?;
            std::fs::create_dir_all(&state.settings.paths.screenshot_dir)?;
            let name = format!("shot-{}.png", chrono::Utc::now().format("%Y%m%d-%H%M%S%3f"));
            let path = state.settings.paths.screenshot_dir.join(&name);
            std::fs::write(&path, &png)?;
            let mut out = json!({ "path": path.to_string_lossy(), "bytes": png.len() });
            if req.0.as_base64.unwrap_or(false) {
                use base64::Engine;
                out["base64"] = json!(base64::engine::general_purpose::STANDARD.encode(&png));
            }
            Ok(out)
        }
        .await;
        state.finish("page_screenshot", result)
    }

    #[tool(description = "Run a script in the page, optionally persisting it for future documents.")]
    async fn page_inject_script(
        &self,
        req: Parameters<InjectScriptRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            if req.0.persist.unwrap_or(false) {
                let page = state.page()?;
                page.execute(
                    chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams::new(
                        req.0.script.clone(),
                    ),
                )
                .await?;
            }
            let value = state
                .collector
                .browser()?
                .evaluate_value(req.0.script.clone())
                .await?;
            Ok(json!({ "success": true, "result": value }))
        }
        .await;
        state.finish("page_inject_script", result)
    }

    #[tool(description = "Set a cookie on the current page or a given domain/url.")]
    async fn page_set_cookies(
        &self,
        req: Parameters<SetCookieRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            state
                .collector
                .browser()?
                .set_cookie(
                    &req.0.name,
                    &req.0.value,
                    req.0.domain.as_deref(),
                    req.0.url.as_deref(),
                )
                .await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("page_set_cookies", result)
    }

    #[tool(description = "Cookies visible to the current page.")]
    async fn page_get_cookies(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async { state.collector.browser()?.get_cookies().await }.await;
        state.finish("page_get_cookies", result)
    }

    #[tool(description = "Clear all browser cookies.")]
    async fn page_clear_cookies(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            state.collector.browser()?.clear_cookies().await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("page_clear_cookies", result)
    }

    #[tool(description = "Override the viewport size (and mobile flag).")]
    async fn page_set_viewport(
        &self,
        req: Parameters<ViewportRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            state
                .collector
                .browser()?
                .set_viewport(req.0.width, req.0.height, req.0.mobile.unwrap_or(false))
                .await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("page_set_viewport", result)
    }

    #[tool(description = "Emulate a device preset: iphone, pixel, ipad, desktop.")]
    async fn page_emulate_device(
        &self,
        req: Parameters<EmulateDeviceRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let (w, h, mobile, ua): (i64, i64, bool, &str) = match req.0.device.as_str() {
                "iphone" => (390, 844, true, "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1"),
                "pixel" => (412, 915, true, "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36"),
                "ipad" => (820, 1180, true, "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1"),
                "desktop" => (1920, 1080, false, "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"),
                other => return Err(Error::Config(format!("unknown device preset `{other}`"))),
            };
            let browser = state.collector.browser()?;
            browser.set_viewport(w, h, mobile).await?;
            browser.set_user_agent(ua).await?;
            Ok(json!({ "success": true, "device": req.0.device, "viewport": [w, h] }))
        }
        .await;
        state.finish("page_emulate_device", result)
    }

    #[tool(description = "Read localStorage (or sessionStorage) as an object.")]
    async fn page_get_storage(
        &self,
        req: Parameters<StorageGetRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            state
                .collector
                .browser()?
                .get_storage(req.0.session.unwrap_or(false))
                .await
        }
        .await;
        state.finish("page_get_storage", result)
    }

    #[tool(description = "Write one localStorage (or sessionStorage) key.")]
    async fn page_set_storage(
        &self,
        req: Parameters<StorageSetRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            state
                .collector
                .browser()?
                .set_storage(req.0.session.unwrap_or(false), &req.0.key, &req.0.value)
                .await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("page_set_storage", result)
    }

    #[tool(description = "All links on the page with text and href.")]
    async fn page_get_all_links(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = r#"Array.from(document.querySelectorAll('a[href]')).slice(0, 200).map(a => ({
            href: a.href,
            text: (a.textContent || '').trim().slice(0, 80),
        }))"#
            .to_string();
        let result = state.dom_eval(js).await;
        state.finish("page_get_all_links", result)
    }

    // ---- scripts ---------------------------------------------------------

    #[tool(
        description = "Harvest scripts for a URL: external via CDP, inline from the DOM, optionally service and web workers. Results are cached and feed the get_* query tools."
    )]
    async fn collect_scripts(
        &self,
        req: Parameters<CollectRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.collect_scripts(&req.0).await;
        state.finish("collect_scripts", result)
    }

    #[tool(description = "Script elements on the current page: srcs and inline previews.")]
    async fn get_all_scripts(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let js = r#"Array.from(document.scripts).map((s, i) => ({
            index: i,
            src: s.src || null,
            inline: s.src ? null : (s.textContent || '').slice(0, 200),
            length: s.src ? null : (s.textContent || '').length,
        }))"#
            .to_string();
        let result = state.dom_eval(js).await;
        state.finish("get_all_scripts", result)
    }

    #[tool(description = "Line-range preview of a collected script by URL.")]
    async fn get_script_source(
        &self,
        req: Parameters<ScriptSourceRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.get_script_source(&req.0).await;
        state.finish("get_script_source", result)
    }

    #[tool(description = "Lightweight list of every collected file: url, size, kind, truncation.")]
    async fn get_collected_files_summary(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let summary = state.collector.collected_files_summary();
        let result = serde_json::to_value(&summary).map_err(Error::from);
        state.finish("get_collected_files_summary", result)
    }

    #[tool(description = "One collected file, full source, by exact URL.")]
    async fn get_file_by_url(
        &self,
        req: Parameters<FileByUrlRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = match state.collector.file_by_url(&req.0.url) {
            Some(file) => serde_json::to_value(file).map_err(Error::from),
            None => Ok(Value::Null),
        };
        state.finish("get_file_by_url", result)
    }

    #[tool(
        description = "Collected files whose URL matches a regex, capped by count and total size. Returns matched/returned/truncated counters."
    )]
    async fn get_files_by_pattern(
        &self,
        req: Parameters<FilesByPatternRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state
            .collector
            .files_by_pattern(
                &req.0.pattern,
                req.0.limit.unwrap_or(10),
                req.0.max_total_size.unwrap_or(512 * 1024),
            )
            .and_then(|r| serde_json::to_value(&r).map_err(Error::from));
        state.finish("get_files_by_pattern", result)
    }

    #[tool(
        description = "Highest-priority collected files (crypto/api/core first) within a size budget."
    )]
    async fn get_top_priority_files(
        &self,
        req: Parameters<TopPriorityRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let files = state.collector.top_priority_files(
            req.0.top_n.unwrap_or(5),
            req.0.max_total_size.unwrap_or(512 * 1024),
        );
        let result = serde_json::to_value(&files).map_err(Error::from);
        state.finish("get_top_priority_files", result)
    }

    #[tool(description = "Drop the collected-files buffer and flush the script cache.")]
    async fn clear_collected_data(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state
            .collector
            .clear_all_data()
            .map(|()| json!({ "success": true }));
        state.finish("clear_collected_data", result)
    }

    // ---- analysis --------------------------------------------------------

    #[tool(description = "Classify a script across the known obfuscation families.")]
    async fn detect_obfuscation(
        &self,
        req: Parameters<SourceOrUrlRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state
            .resolve_source(&req.0.source, &req.0.url)
            .map(|source| obfuscation::detect(&source))
            .and_then(|d| serde_json::to_value(&d).map_err(Error::from));
        state.finish("detect_obfuscation", result)
    }

    #[tool(
        description = "Run the deobfuscation pipeline: string-array extraction/decryption, constant folding, dead code removal, simplification; aggressive adds unflattening and VM work."
    )]
    async fn deobfuscate(&self, req: Parameters<DeobRequest>) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.deobfuscate(&req.0).await;
        state.finish("deobfuscate", result)
    }

    #[tool(description = "Taint analysis: sources, sinks, sanitizers, and source→sink paths.")]
    async fn analyze_taint(
        &self,
        req: Parameters<SourceOrUrlRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.analyze_taint(&req.0).await;
        state.finish("analyze_taint", result)
    }

    #[tool(
        description = "Crypto/signature/token/anti-debug pattern recognition over captured requests and console logs."
    )]
    async fn analyze_patterns(
        &self,
        req: Parameters<PatternsRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.analyze_patterns(&req.0).await;
        state.finish("analyze_patterns", result)
    }

    #[tool(
        description = "Detect the browser globals a script reads and synthesize a Node.js/Python environment shim; auto_fetch pulls real values from the live page."
    )]
    async fn synthesize_env(
        &self,
        req: Parameters<EnvSynthRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.synthesize_env(&req.0).await;
        state.finish("synthesize_env", result)
    }

    // ---- console ---------------------------------------------------------

    #[tool(description = "Start capturing console output and exceptions.")]
    async fn console_enable(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.console_enable().await;
        state.finish("console_enable", result)
    }

    #[tool(
        description = "Captured console entries, newest first. Large logs come back behind a detail token."
    )]
    async fn console_get_logs(
        &self,
        req: Parameters<ConsoleLogsRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let logs = state.console.logs().await;
        let total = logs.len();
        let limit = req.0.limit.unwrap_or(100);
        let slice: Vec<_> = logs.into_iter().rev().take(limit).collect();
        let result = Ok(json!({ "total": total, "returned": slice.len(), "entries": slice }));
        state.finish("console_get_logs", result)
    }

    #[tool(description = "Evaluate an expression in the page and return its value.")]
    async fn console_execute(
        &self,
        req: Parameters<ExpressionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.dom_eval(req.0.expression.clone()).await;
        state.finish("console_execute", result)
    }

    #[tool(description = "Captured uncaught exceptions.")]
    async fn console_get_exceptions(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let exceptions = state.console.exceptions().await;
        let result = serde_json::to_value(&exceptions).map_err(Error::from);
        state.finish("console_get_exceptions", result)
    }

    #[tool(
        description = "Install a page-side interceptor: xhr, fetch, function-tracer (needs target), or script-monitor. Logged lines appear in console_get_logs."
    )]
    async fn console_inject_interceptor(
        &self,
        req: Parameters<InterceptorRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.console_inject(&req.0).await;
        state.finish("console_inject_interceptor", result)
    }

    // ---- network ---------------------------------------------------------

    #[tool(description = "Start capturing network requests and responses.")]
    async fn network_enable(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.network_enable().await;
        state.finish("network_enable", result)
    }

    #[tool(description = "Stop capturing network traffic.")]
    async fn network_disable(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.network_disable().await;
        state.finish("network_disable", result)
    }

    #[tool(description = "Monitor state and captured-request count.")]
    async fn network_get_status(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let count = state.network.count().await;
        let result = Ok(json!({ "enabled": state.network.is_enabled(), "captured": count }));
        state.finish("network_get_status", result)
    }

    #[tool(
        description = "Captured requests, newest first, with an optional URL filter. Large captures come back behind a detail token."
    )]
    async fn network_get_requests(
        &self,
        req: Parameters<NetworkRequestsRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.network_get_requests(&req.0).await;
        state.finish("network_get_requests", result)
    }

    #[tool(
        description = "Response body for a captured request, auto-truncated; summary_only returns just the head and size."
    )]
    async fn network_get_response_body(
        &self,
        req: Parameters<ResponseBodyRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.network_get_response_body(&req.0).await;
        state.finish("network_get_response_body", result)
    }

    #[tool(description = "Aggregate traffic statistics: counts, mime buckets, body bytes.")]
    async fn network_get_stats(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let stats = state.network.stats().await;
        let result = serde_json::to_value(&stats).map_err(Error::from);
        state.finish("network_get_stats", result)
    }

    // ---- performance -----------------------------------------------------

    #[tool(description = "CDP performance metrics for the page.")]
    async fn performance_get_metrics(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async { state.collector.browser()?.performance_metrics().await }.await;
        state.finish("performance_get_metrics", result)
    }

    #[tool(description = "Start collecting JS coverage.")]
    async fn coverage_start(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            state.collector.browser()?.coverage_start().await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("coverage_start", result)
    }

    #[tool(description = "Stop coverage collection and return per-script ranges.")]
    async fn coverage_stop(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async { state.collector.browser()?.coverage_stop().await }.await;
        state.finish("coverage_stop", result)
    }

    #[tool(description = "JS heap usage snapshot (used and total bytes).")]
    async fn heap_snapshot(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async { state.collector.browser()?.heap_usage().await }.await;
        state.finish("heap_snapshot", result)
    }

    // ---- debugger --------------------------------------------------------

    #[tool(description = "Enable the debugger domain and start tracking pause state.")]
    async fn debugger_enable(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state.debugger.enable(&page).await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("debugger_enable", result)
    }

    #[tool(description = "Disable the debugger domain.")]
    async fn debugger_disable(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state.debugger.disable(&page).await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("debugger_disable", result)
    }

    #[tool(description = "Pause JavaScript execution.")]
    async fn debugger_pause(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state.debugger.pause(&page).await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("debugger_pause", result)
    }

    #[tool(description = "Resume JavaScript execution.")]
    async fn debugger_resume(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state.debugger.resume(&page).await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("debugger_resume", result)
    }

    #[tool(description = "Step into the next call.")]
    async fn debugger_step_into(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state.debugger.step_into(&page).await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("debugger_step_into", result)
    }

    #[tool(description = "Step over the next statement.")]
    async fn debugger_step_over(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state.debugger.step_over(&page).await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("debugger_step_over", result)
    }

    #[tool(description = "Step out of the current frame.")]
    async fn debugger_step_out(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state.debugger.step_out(&page).await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("debugger_step_out", result)
    }

    #[tool(description = "Evaluate an expression on the paused top call frame.")]
    async fn debugger_evaluate(
        &self,
        req: Parameters<ExpressionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state
                .debugger
                .evaluate_on_frame(&page, &req.0.expression)
                .await
        }
        .await;
        state.finish("debugger_evaluate", result)
    }

    #[tool(description = "Evaluate an expression in the global scope (works while running).")]
    async fn debugger_evaluate_global(
        &self,
        req: Parameters<ExpressionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state
                .debugger
                .evaluate_global(&page, &req.0.expression)
                .await
        }
        .await;
        state.finish("debugger_evaluate_global", result)
    }

    #[tool(description = "Block until the debugger pauses (breakpoint hit), or time out.")]
    async fn debugger_wait_for_paused(
        &self,
        req: Parameters<WaitPausedRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state
            .debugger
            .wait_for_paused(req.0.timeout_ms.unwrap_or(10_000))
            .await;
        state.finish("debugger_wait_for_paused", result)
    }

    #[tool(description = "Current paused state with call frames, or null when running.")]
    async fn debugger_get_paused_state(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let paused = state.debugger.paused_state().await;
        let watches = if paused.is_some() {
            match state.page() {
                Ok(page) => {
                    let page = page.clone();
                    state.debugger.evaluate_watches(&page).await
                }
                Err(_) => Vec::new(),
            }
        } else {
            Vec::new()
        };
        let result = Ok(json!({ "paused": paused, "watches": watches }));
        state.finish("debugger_get_paused_state", result)
    }

    #[tool(description = "Set a breakpoint by script URL and 0-based line; optional condition.")]
    async fn breakpoint_set(
        &self,
        req: Parameters<BreakpointRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            let record = state
                .debugger
                .set_breakpoint(&page, &req.0.url, req.0.line, req.0.condition.clone())
                .await?;
            serde_json::to_value(&record).map_err(Error::from)
        }
        .await;
        state.finish("breakpoint_set", result)
    }

    #[tool(description = "Remove a breakpoint by id.")]
    async fn breakpoint_remove(
        &self,
        req: Parameters<BreakpointIdRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            let removed = state.debugger.remove_breakpoint(&page, &req.0.id).await?;
            Ok(json!({ "removed": removed }))
        }
        .await;
        state.finish("breakpoint_remove", result)
    }

    #[tool(description = "All breakpoints set this session.")]
    async fn breakpoint_list(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let list = state.debugger.list_breakpoints();
        let result = serde_json::to_value(&list).map_err(Error::from);
        state.finish("breakpoint_list", result)
    }

    #[tool(description = "Break on exceptions: all, uncaught, or none.")]
    async fn breakpoint_set_on_exception(
        &self,
        req: Parameters<ExceptionBreakRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state
                .debugger
                .set_pause_on_exceptions(&page, &req.0.state)
                .await?;
            Ok(json!({ "success": true, "state": req.0.state }))
        }
        .await;
        state.finish("breakpoint_set_on_exception", result)
    }

    #[tool(description = "Break whenever an XHR/fetch URL contains a substring.")]
    async fn breakpoint_set_xhr(
        &self,
        req: Parameters<XhrBreakRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state
                .debugger
                .set_xhr_breakpoint(&page, &req.0.url_substring)
                .await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("breakpoint_set_xhr", result)
    }

    #[tool(description = "Break when an event listener of the given name fires.")]
    async fn breakpoint_set_event(
        &self,
        req: Parameters<EventBreakRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state
                .debugger
                .set_event_breakpoint(&page, &req.0.event_name)
                .await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("breakpoint_set_event", result)
    }

    #[tool(
        description = "Blackbox scripts matching the given regex patterns (stepping skips them)."
    )]
    async fn debugger_blackbox(
        &self,
        req: Parameters<BlackboxRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            state
                .debugger
                .blackbox(&page, req.0.patterns.clone())
                .await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("debugger_blackbox", result)
    }

    #[tool(description = "Add a watch expression, evaluated with every paused-state read.")]
    async fn watch_add(
        &self,
        req: Parameters<ExpressionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        state.debugger.watch_add(&req.0.expression);
        let result = Ok(json!({ "success": true, "watches": state.debugger.watches() }));
        state.finish("watch_add", result)
    }

    #[tool(description = "Remove a watch expression.")]
    async fn watch_remove(
        &self,
        req: Parameters<ExpressionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let removed = state.debugger.watch_remove(&req.0.expression);
        let result = Ok(json!({ "removed": removed, "watches": state.debugger.watches() }));
        state.finish("watch_remove", result)
    }

    #[tool(description = "Current watch expressions.")]
    async fn watch_list(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = Ok(json!({ "watches": state.debugger.watches() }));
        state.finish("watch_list", result)
    }

    #[tool(description = "Save breakpoints and watches as a named debugger session.")]
    async fn debugger_session_save(
        &self,
        req: Parameters<SessionNameRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state
            .debugger
            .session_save(&req.0.name)
            .map(|path| json!({ "success": true, "path": path.to_string_lossy() }));
        state.finish("debugger_session_save", result)
    }

    #[tool(description = "Load a named debugger session: re-arms its breakpoints and watches.")]
    async fn debugger_session_load(
        &self,
        req: Parameters<SessionNameRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            let session = state.debugger.session_load(&page, &req.0.name).await?;
            serde_json::to_value(&session).map_err(Error::from)
        }
        .await;
        state.finish("debugger_session_load", result)
    }

    #[tool(description = "Export a named debugger session as JSON without loading it.")]
    async fn debugger_session_export(
        &self,
        req: Parameters<SessionNameRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state
            .debugger
            .session_export(&req.0.name)
            .and_then(|s| serde_json::to_value(&s).map_err(Error::from));
        state.finish("debugger_session_export", result)
    }

    #[tool(description = "Saved debugger session names.")]
    async fn debugger_session_list(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = Ok(json!({ "sessions": state.debugger.session_list() }));
        state.finish("debugger_session_list", result)
    }

    // ---- detail tokens ---------------------------------------------------

    #[tool(
        description = "Retrieve an oversized result parked behind a detail id; an optional dotted path (numbers index arrays) drills into it."
    )]
    async fn get_detailed_data(
        &self,
        req: Parameters<DetailRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state
            .detail
            .retrieve(&req.0.detail_id, req.0.path.as_deref());
        // Detail payloads bypass smart handling: the agent asked for them.
        let value = match result {
            Ok(v) => v,
            Err(e) => {
                let mut body = json!({ "success": false, "error": e.to_string() });
                if let Some(hint) = e.hint() {
                    body["hint"] = json!(hint);
                }
                body
            }
        };
        let text = value.to_string();
        state.budget.record("get_detailed_data", text.len());
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    // ---- budget ----------------------------------------------------------

    #[tool(description = "Token-budget snapshot: usage, top tools, warnings, suggestions.")]
    async fn get_token_budget_stats(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let snapshot = state.budget.snapshot();
        let result = Ok(snapshot);
        state.finish("get_token_budget_stats", result)
    }

    #[tool(
        description = "Drop aged budget records, expired detail tokens, and stale cache entries."
    )]
    async fn manual_token_cleanup(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = state.manual_cleanup();
        state.finish("manual_token_cleanup", result)
    }

    #[tool(description = "Zero the budget counters and re-arm the warnings.")]
    async fn reset_token_budget(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        state.budget.reset();
        let result = Ok(json!({ "success": true }));
        state.finish("reset_token_budget", result)
    }

    // ---- stealth ---------------------------------------------------------

    #[tool(description = "Install the stealth init script (runs before every future document).")]
    async fn stealth_inject(&self) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            let page = state.page()?.clone();
            stealth::inject(&page).await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("stealth_inject", result)
    }

    #[tool(description = "Override the user agent for the active page.")]
    async fn stealth_set_user_agent(
        &self,
        req: Parameters<UserAgentRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut state = self.state.lock().await;
        let result = async {
            state
                .collector
                .browser()?
                .set_user_agent(&req.0.user_agent)
                .await?;
            Ok(json!({ "success": true }))
        }
        .await;
        state.finish("stealth_set_user_agent", result)
    }
}

#[tool_handler]
impl ServerHandler for WorkbenchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "jsrev-tools".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "JavaScript reverse-engineering workbench. 'page_navigate' opens a URL (launches the \
                 browser automatically and starts network capture). 'collect_scripts' harvests a site's \
                 JavaScript; drill in with 'get_files_by_pattern' / 'get_top_priority_files' to stay \
                 inside your context budget. Static analysis: 'detect_obfuscation', 'deobfuscate', \
                 'analyze_taint', 'synthesize_env'. Runtime analysis: console_*, network_*, debugger_* \
                 and breakpoint_* tools. Oversized results return a detailId; fetch the full value \
                 with 'get_detailed_data'. Watch your spend with 'get_token_budget_stats'."
                    .into(),
            ),
        }
    }
}

/// Serve the workbench over stdio.
pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    info!("starting jsrev-tools MCP server");
    let server = WorkbenchServer::new(settings)?;
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
