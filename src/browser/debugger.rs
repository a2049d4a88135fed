//! Debugger control over the CDP Debugger domain.
//!
//! Pausing, stepping, breakpoints (URL, exception, XHR, event-listener),
//! blackboxing, watch expressions, and named debugger sessions persisted as
//! JSON under the configured session directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::dom_debugger;
use chromiumoxide::cdp::js_protocol::debugger::{
    self, EventPaused, EventResumed, SetPauseOnExceptionsState,
};
use chromiumoxide::cdp::js_protocol::runtime;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointRecord {
    pub id: String,
    pub url: String,
    pub line: i64,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DebuggerSession {
    pub breakpoints: Vec<BreakpointRecord>,
    pub watches: Vec<String>,
    pub pause_on_exceptions: Option<String>,
}

/// Per-page debugger state.
pub struct DebuggerControl {
    enabled: bool,
    paused: Arc<Mutex<Option<Value>>>,
    breakpoints: HashMap<String, BreakpointRecord>,
    watches: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
    session_dir: PathBuf,
}

impl DebuggerControl {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: false,
            paused: Arc::new(Mutex::new(None)),
            breakpoints: HashMap::new(),
            watches: Vec::new(),
            tasks: Vec::new(),
            session_dir: session_dir.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn enable(&mut self, page: &Page) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        page.execute(debugger::EnableParams::default()).await?;

        let mut paused_events = page.event_listener::<EventPaused>().await?;
        let slot = Arc::clone(&self.paused);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = paused_events.next().await {
                let value = serde_json::to_value(&*event).unwrap_or(Value::Null);
                *slot.lock().await = Some(value);
            }
        }));

        let mut resumed_events = page.event_listener::<EventResumed>().await?;
        let slot = Arc::clone(&self.paused);
        self.tasks.push(tokio::spawn(async move {
            while let Some(_event) = resumed_events.next().await {
                *slot.lock().await = None;
            }
        }));

        self.enabled = true;
        debug!("debugger enabled");
        Ok(())
    }

    pub async fn disable(&mut self, page: &Page) -> Result<()> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.enabled {
            if let Err(e) = page.execute(debugger::DisableParams::default()).await {
                warn!(error = %e, "Debugger.disable failed during teardown");
            }
        }
        self.enabled = false;
        *self.paused.lock().await = None;
        Ok(())
    }

    fn require_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(Error::Invariant(
                "debugger not enabled; call debugger_enable first".into(),
            ))
        }
    }

    // ---- execution control -----------------------------------------------

    pub async fn pause(&self, page: &Page) -> Result<()> {
        self.require_enabled()?;
        page.execute(debugger::PauseParams::default()).await?;
        Ok(())
    }

    pub async fn resume(&self, page: &Page) -> Result<()> {
        self.require_enabled()?;
        page.execute(debugger::ResumeParams::default()).await?;
        Ok(())
    }

    pub async fn step_into(&self, page: &Page) -> Result<()> {
        self.require_enabled()?;
        page.execute(debugger::StepIntoParams::default()).await?;
        Ok(())
    }

    pub async fn step_over(&self, page: &Page) -> Result<()> {
        self.require_enabled()?;
        page.execute(debugger::StepOverParams::default()).await?;
        Ok(())
    }

    pub async fn step_out(&self, page: &Page) -> Result<()> {
        self.require_enabled()?;
        page.execute(debugger::StepOutParams::default()).await?;
        Ok(())
    }

    /// Latest paused event, if execution is currently paused.
    pub async fn paused_state(&self) -> Option<Value> {
        self.paused.lock().await.clone()
    }

    /// Wait until the debugger reports a pause, or time out.
    pub async fn wait_for_paused(&self, timeout_ms: u64) -> Result<Value> {
        self.require_enabled()?;
        let deadline = Duration::from_millis(timeout_ms);
        let poll = async {
            loop {
                if let Some(state) = self.paused_state().await {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(deadline, poll)
            .await
            .map_err(|_| Error::Timeout(timeout_ms))
    }

    /// Evaluate an expression on the top call frame of the paused state.
    pub async fn evaluate_on_frame(&self, page: &Page, expression: &str) -> Result<Value> {
        self.require_enabled()?;
        let paused = self
            .paused_state()
            .await
            .ok_or_else(|| Error::Invariant("not paused; call debugger_pause or hit a breakpoint".into()))?;
        let frame_id = paused["callFrames"][0]["callFrameId"]
            .as_str()
            .ok_or_else(|| Error::Invariant("paused state has no call frames".into()))?
            .to_string();
        let params = debugger::EvaluateOnCallFrameParams::builder()
            .call_frame_id(frame_id)
            .expression(expression)
            .return_by_value(true)
            .build()
            .map_err(Error::Config)?;
        let resp = page.execute(params).await?;
        Ok(serde_json::to_value(&resp.result)?)
    }

    /// Evaluate in the global scope regardless of pause state.
    pub async fn evaluate_global(&self, page: &Page, expression: &str) -> Result<Value> {
        let params = runtime::EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .build()
            .map_err(Error::Config)?;
        let resp = page.execute(params).await?;
        Ok(serde_json::to_value(&resp.result)?)
    }

    // ---- breakpoints -----------------------------------------------------

    pub async fn set_breakpoint(
        &mut self,
        page: &Page,
        url: &str,
        line: i64,
        condition: Option<String>,
    ) -> Result<BreakpointRecord> {
        self.require_enabled()?;
        let mut builder = debugger::SetBreakpointByUrlParams::builder()
            .line_number(line)
            .url(url);
        if let Some(cond) = &condition {
            builder = builder.condition(cond);
        }
        let params = builder.build().map_err(Error::Config)?;
        let resp = page.execute(params).await?;
        let id = serde_json::to_value(&resp.breakpoint_id)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        let record = BreakpointRecord {
            id: id.clone(),
            url: url.to_string(),
            line,
            condition,
        };
        self.breakpoints.insert(id, record.clone());
        Ok(record)
    }

    pub async fn remove_breakpoint(&mut self, page: &Page, id: &str) -> Result<bool> {
        self.require_enabled()?;
        if self.breakpoints.remove(id).is_none() {
            return Ok(false);
        }
        page.execute(debugger::RemoveBreakpointParams::new(id.to_string()))
            .await?;
        Ok(true)
    }

    pub fn list_breakpoints(&self) -> Vec<BreakpointRecord> {
        let mut list: Vec<BreakpointRecord> = self.breakpoints.values().cloned().collect();
        list.sort_by(|a, b| (&a.url, a.line).cmp(&(&b.url, b.line)));
        list
    }

    pub async fn set_pause_on_exceptions(&self, page: &Page, state: &str) -> Result<()> {
        self.require_enabled()?;
        let state = match state {
            "all" => SetPauseOnExceptionsState::All,
            "uncaught" => SetPauseOnExceptionsState::Uncaught,
            "none" => SetPauseOnExceptionsState::None,
            other => {
                return Err(Error::Config(format!(
                    "pause-on-exceptions state must be all|uncaught|none, got `{other}`"
                )))
            }
        };
        page.execute(debugger::SetPauseOnExceptionsParams::new(state))
            .await?;
        Ok(())
    }

    pub async fn set_xhr_breakpoint(&self, page: &Page, url_substring: &str) -> Result<()> {
        self.require_enabled()?;
        page.execute(dom_debugger::SetXhrBreakpointParams::new(
            url_substring.to_string(),
        ))
        .await?;
        Ok(())
    }

    pub async fn set_event_breakpoint(&self, page: &Page, event_name: &str) -> Result<()> {
        self.require_enabled()?;
        page.execute(dom_debugger::SetEventListenerBreakpointParams::new(
            event_name.to_string(),
        ))
        .await?;
        Ok(())
    }

    pub async fn blackbox(&self, page: &Page, patterns: Vec<String>) -> Result<()> {
        self.require_enabled()?;
        page.execute(debugger::SetBlackboxPatternsParams::new(patterns))
            .await?;
        Ok(())
    }

    // ---- watches ---------------------------------------------------------

    pub fn watch_add(&mut self, expression: &str) {
        if !self.watches.iter().any(|w| w == expression) {
            self.watches.push(expression.to_string());
        }
    }

    pub fn watch_remove(&mut self, expression: &str) -> bool {
        let before = self.watches.len();
        self.watches.retain(|w| w != expression);
        self.watches.len() < before
    }

    pub fn watches(&self) -> &[String] {
        &self.watches
    }

    /// Evaluate every watch expression, on the paused frame when paused.
    pub async fn evaluate_watches(&self, page: &Page) -> Vec<Value> {
        let paused = self.paused_state().await.is_some();
        let mut out = Vec::new();
        for expr in &self.watches {
            let result = if paused {
                self.evaluate_on_frame(page, expr).await
            } else {
                self.evaluate_global(page, expr).await
            };
            out.push(json!({
                "expression": expr,
                "result": result.unwrap_or_else(|e| json!({ "error": e.to_string() })),
            }));
        }
        out
    }

    // ---- sessions --------------------------------------------------------

    fn session_path(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.session_dir.join(format!("{safe}.json"))
    }

    pub fn session_save(&self, name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.session_dir)?;
        let session = DebuggerSession {
            breakpoints: self.list_breakpoints(),
            watches: self.watches.clone(),
            pause_on_exceptions: None,
        };
        let path = self.session_path(name);
        std::fs::write(&path, serde_json::to_string_pretty(&session)?)?;
        Ok(path)
    }

    /// Load a saved session: re-arms its breakpoints and watches.
    pub async fn session_load(&mut self, page: &Page, name: &str) -> Result<DebuggerSession> {
        let raw = std::fs::read_to_string(self.session_path(name))?;
        let session: DebuggerSession = serde_json::from_str(&raw)?;
        self.watches = session.watches.clone();
        for bp in &session.breakpoints {
            if let Err(e) = self
                .set_breakpoint(page, &bp.url, bp.line, bp.condition.clone())
                .await
            {
                warn!(url = %bp.url, line = bp.line, error = %e, "breakpoint re-arm failed");
            }
        }
        Ok(session)
    }

    pub fn session_export(&self, name: &str) -> Result<DebuggerSession> {
        let raw = std::fs::read_to_string(self.session_path(name))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn session_list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.session_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(String::from)
            })
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_add_remove() {
        let mut d = DebuggerControl::new("./debugger-sessions");
        d.watch_add("window.sig");
        d.watch_add("window.sig");
        assert_eq!(d.watches().len(), 1);
        assert!(d.watch_remove("window.sig"));
        assert!(!d.watch_remove("window.sig"));
    }

    #[test]
    fn test_session_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = DebuggerControl::new(dir.path());
        d.watch_add("token");
        d.breakpoints.insert(
            "bp1".into(),
            BreakpointRecord {
                id: "bp1".into(),
                url: "https://a.test/app.js".into(),
                line: 42,
                condition: None,
            },
        );
        d.session_save("probe").unwrap();
        assert_eq!(d.session_list(), vec!["probe"]);
        let exported = d.session_export("probe").unwrap();
        assert_eq!(exported.watches, vec!["token"]);
        assert_eq!(exported.breakpoints.len(), 1);
        assert_eq!(exported.breakpoints[0].line, 42);
    }

    #[test]
    fn test_session_name_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let d = DebuggerControl::new(dir.path());
        let path = d.session_save("../sneaky/name").unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(!path.to_string_lossy().contains(".."));
    }
}
