//! Console and exception tracking, plus page-side interceptor scripts.

use std::sync::Arc;

use chromiumoxide::cdp::js_protocol::runtime::{
    EnableParams, EventConsoleApiCalled, EventExceptionThrown,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::Result;

/// Retained console entries; oldest drop past this.
const MAX_ENTRIES: usize = 5_000;

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleEntry {
    pub level: String,
    pub text: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExceptionEntry {
    pub text: String,
    pub url: Option<String>,
    pub line: Option<i64>,
    pub column: Option<i64>,
}

/// Subscribes to Runtime console/exception events for one page.
pub struct ConsoleTracker {
    entries: Arc<Mutex<Vec<ConsoleEntry>>>,
    exceptions: Arc<Mutex<Vec<ExceptionEntry>>>,
    tasks: Vec<JoinHandle<()>>,
    enabled: bool,
}

impl Default for ConsoleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleTracker {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            exceptions: Arc::new(Mutex::new(Vec::new())),
            tasks: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn enable(&mut self, page: &Page) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        page.execute(EnableParams::default()).await?;

        let mut console = page.event_listener::<EventConsoleApiCalled>().await?;
        let store = Arc::clone(&self.entries);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = console.next().await {
                let level = enum_string(&event.r#type);
                let text = event
                    .args
                    .iter()
                    .map(|arg| {
                        arg.value
                            .as_ref()
                            .map(render_value)
                            .or_else(|| arg.description.clone())
                            .unwrap_or_default()
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                let mut entries = store.lock().await;
                if entries.len() >= MAX_ENTRIES {
                    entries.remove(0);
                }
                entries.push(ConsoleEntry {
                    level,
                    text,
                    timestamp: number_of(&event.timestamp),
                });
            }
        }));

        let mut thrown = page.event_listener::<EventExceptionThrown>().await?;
        let store = Arc::clone(&self.exceptions);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = thrown.next().await {
                let details = &event.exception_details;
                let text = details
                    .exception
                    .as_ref()
                    .and_then(|e| e.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                let mut exceptions = store.lock().await;
                if exceptions.len() >= MAX_ENTRIES {
                    exceptions.remove(0);
                }
                exceptions.push(ExceptionEntry {
                    text,
                    url: details.url.clone(),
                    line: Some(details.line_number),
                    column: Some(details.column_number),
                });
            }
        }));

        self.enabled = true;
        debug!("console tracker enabled");
        Ok(())
    }

    pub fn disable(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.enabled {
            debug!("console tracker disabled");
        }
        self.enabled = false;
    }

    pub async fn logs(&self) -> Vec<ConsoleEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn log_texts(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| e.text.clone())
            .collect()
    }

    pub async fn exceptions(&self) -> Vec<ExceptionEntry> {
        self.exceptions.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
        self.exceptions.lock().await.clear();
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn enum_string<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "log".to_string())
}

fn number_of<T: Serialize>(value: &T) -> f64 {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// interceptor scripts (installed via console_inject_interceptor)
// ---------------------------------------------------------------------------

/// Logs every XHR open/send with method, URL, and body.
pub const XHR_INTERCEPTOR: &str = r#"
(function() {
    if (window.__xhrHooked) return 'already installed';
    window.__xhrHooked = true;
    const origOpen = XMLHttpRequest.prototype.open;
    const origSend = XMLHttpRequest.prototype.send;
    XMLHttpRequest.prototype.open = function(method, url) {
        this.__method = method;
        this.__url = url;
        return origOpen.apply(this, arguments);
    };
    XMLHttpRequest.prototype.send = function(body) {
        console.log('[xhr]', this.__method, this.__url, body ? String(body).slice(0, 500) : '');
        this.addEventListener('load', () => {
            console.log('[xhr:response]', this.__url, this.status, String(this.responseText || '').slice(0, 500));
        });
        return origSend.apply(this, arguments);
    };
    return 'installed';
})()
"#;

/// Logs every fetch call and its response status.
pub const FETCH_INTERCEPTOR: &str = r#"
(function() {
    if (window.__fetchHooked) return 'already installed';
    window.__fetchHooked = true;
    const orig = window.fetch;
    window.fetch = function(input, init) {
        const url = typeof input === 'string' ? input : (input && input.url);
        const method = (init && init.method) || 'GET';
        const body = init && init.body ? String(init.body).slice(0, 500) : '';
        console.log('[fetch]', method, url, body);
        return orig.apply(this, arguments).then(resp => {
            console.log('[fetch:response]', url, resp.status);
            return resp;
        });
    };
    return 'installed';
})()
"#;

/// Wraps one named global function and logs arguments and return values.
pub fn function_tracer(target: &str) -> String {
    let quoted = serde_json::to_string(target).unwrap_or_else(|_| "\"\"".into());
    format!(
        r#"
(function() {{
    const path = {quoted}.split('.');
    let holder = window;
    for (let i = 0; i < path.length - 1; i++) {{
        holder = holder && holder[path[i]];
    }}
    const name = path[path.length - 1];
    if (!holder || typeof holder[name] !== 'function') return 'target is not a function';
    const orig = holder[name];
    holder[name] = function() {{
        console.log('[trace]', {quoted}, 'args:', JSON.stringify(Array.from(arguments)).slice(0, 500));
        const result = orig.apply(this, arguments);
        try {{ console.log('[trace]', {quoted}, 'ret:', JSON.stringify(result).slice(0, 500)); }} catch (e) {{}}
        return result;
    }};
    return 'installed';
}})()
"#
    )
}

/// Logs dynamically inserted script elements.
pub const SCRIPT_MONITOR: &str = r#"
(function() {
    if (window.__scriptMonitor) return 'already installed';
    window.__scriptMonitor = true;
    new MutationObserver(muts => {
        for (const m of muts) {
            for (const node of m.addedNodes) {
                if (node.tagName === 'SCRIPT') {
                    console.log('[script]', node.src || ('inline:' + (node.textContent || '').slice(0, 200)));
                }
            }
        }
    }).observe(document.documentElement, { childList: true, subtree: true });
    return 'installed';
})()
"#;
