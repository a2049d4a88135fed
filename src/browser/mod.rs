//! Browser session layer over chromiumoxide.
//!
//! One [`BrowserSession`] owns the launched browser, its CDP event-handler
//! task, and the active page. Network capture, console tracking, debugger
//! control, and stealth injection hang off it as submodules.

pub mod console;
pub mod debugger;
pub mod network;
pub mod stealth;

use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieParam, GetCookiesParams, SetCookiesParams,
};
use chromiumoxide::cdp::browser_protocol::performance as perf;
use chromiumoxide::cdp::js_protocol::profiler;
use chromiumoxide::cdp::js_protocol::runtime::GetHeapUsageParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BrowserSettings;
use crate::{Error, Result};

/// An owned browser plus its active page.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Option<Page>,
    settings: BrowserSettings,
}

impl BrowserSession {
    /// Launch the browser with the configured viewport and headless mode.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(settings.viewport_width, settings.viewport_height)
            .arg("--disable-blink-features=AutomationControlled");
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(Error::Config)?;
        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("CDP handler error: {e}");
                }
            }
        });
        info!(
            headless = settings.headless,
            width = settings.viewport_width,
            height = settings.viewport_height,
            "browser launched"
        );
        Ok(Self {
            browser,
            handler_task,
            page: None,
            settings: settings.clone(),
        })
    }

    /// Close the browser. Derived state must be cleared by the owner first.
    pub async fn close(mut self) -> Result<()> {
        self.page = None;
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "browser close reported an error");
        }
        self.handler_task.abort();
        info!("browser closed");
        Ok(())
    }

    pub fn settings(&self) -> &BrowserSettings {
        &self.settings
    }

    /// Open an independent page without touching the active one. Used by
    /// the collector, which runs each harvest on its own page.
    pub async fn open_page(&self, url: &str) -> Result<Page> {
        Ok(self.browser.new_page(url).await?)
    }

    /// Open a fresh page (about:blank) and make it active.
    pub async fn create_page(&mut self) -> Result<&Page> {
        let page = self.browser.new_page("about:blank").await?;
        if let Some(ua) = &self.settings.user_agent {
            page.set_user_agent(ua.to_string()).await?;
        }
        self.page = Some(page);
        Ok(self.page.as_ref().expect("just set"))
    }

    pub fn active_page(&self) -> Result<&Page> {
        self.page.as_ref().ok_or(Error::NoPage)
    }

    pub fn has_page(&self) -> bool {
        self.page.is_some()
    }

    /// Navigate the active page (creating one if needed) and wait for the
    /// load to settle under the configured timeout.
    pub async fn navigate(&mut self, url: &str) -> Result<(String, String)> {
        if self.page.is_none() {
            self.create_page().await?;
        }
        let timeout = self.settings.navigation_timeout_ms;
        let page = self.active_page()?;
        let nav = async {
            page.goto(url).await?;
            let _ = page.wait_for_navigation().await;
            Ok::<(), Error>(())
        };
        tokio::time::timeout(Duration::from_millis(timeout), nav)
            .await
            .map_err(|_| Error::Timeout(timeout))?
            .map_err(|e| Error::Navigation(format!("{url}: {e}")))?;
        let current = self.current_url().await?;
        let title = self.title().await?;
        debug!(url = %current, "navigation complete");
        Ok((current, title))
    }

    pub async fn current_url(&self) -> Result<String> {
        self.evaluate("location.href").await
    }

    pub async fn title(&self) -> Result<String> {
        self.evaluate("document.title").await
    }

    pub async fn reload(&self) -> Result<()> {
        let page = self.active_page()?;
        page.evaluate("location.reload()").await?;
        let _ = page.wait_for_navigation().await;
        Ok(())
    }

    pub async fn history_go(&self, delta: i32) -> Result<()> {
        let page = self.active_page()?;
        page.evaluate(format!("history.go({delta})")).await?;
        let _ = page.wait_for_navigation().await;
        Ok(())
    }

    /// Evaluate an expression and deserialize the result.
    pub async fn evaluate<T: DeserializeOwned>(&self, js: impl Into<String>) -> Result<T> {
        let page = self.active_page()?;
        let timeout = self.settings.evaluate_timeout_ms;
        let js = js.into();
        let result = tokio::time::timeout(Duration::from_millis(timeout), page.evaluate(js))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        result
            .into_value()
            .map_err(|e| Error::Invariant(format!("evaluate result: {e}")))
    }

    /// Evaluate and return whatever JSON comes back (null when the value is
    /// not serializable).
    pub async fn evaluate_value(&self, js: impl Into<String>) -> Result<Value> {
        match self.evaluate::<Value>(js).await {
            Ok(v) => Ok(v),
            Err(Error::Invariant(_)) => Ok(Value::Null),
            Err(e) => Err(e),
        }
    }

    /// Run a statement for its side effects.
    pub async fn execute_js(&self, js: impl Into<String>) -> Result<()> {
        let page = self.active_page()?;
        let timeout = self.settings.evaluate_timeout_ms;
        tokio::time::timeout(Duration::from_millis(timeout), page.evaluate(js.into()))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        Ok(())
    }

    pub async fn screenshot_png(&self, full_page: bool) -> Result<Vec<u8>> {
        let page = self.active_page()?;
        let bytes = page
            .screenshot(ScreenshotParams::builder().full_page(full_page).build())
            .await?;
        Ok(bytes)
    }

    // ---- cookies ---------------------------------------------------------

    pub async fn set_cookie(
        &self,
        name: &str,
        value: &str,
        domain: Option<&str>,
        url: Option<&str>,
    ) -> Result<()> {
        let page = self.active_page()?;
        let mut builder = CookieParam::builder().name(name).value(value);
        if let Some(d) = domain {
            builder = builder.domain(d);
        }
        if let Some(u) = url {
            builder = builder.url(u);
        }
        let cookie = builder.build().map_err(Error::Config)?;
        page.execute(SetCookiesParams::new(vec![cookie])).await?;
        Ok(())
    }

    pub async fn get_cookies(&self) -> Result<Value> {
        let page = self.active_page()?;
        let resp = page.execute(GetCookiesParams::default()).await?;
        Ok(serde_json::to_value(&resp.cookies)?)
    }

    pub async fn clear_cookies(&self) -> Result<()> {
        let page = self.active_page()?;
        page.execute(ClearBrowserCookiesParams::default()).await?;
        Ok(())
    }

    // ---- emulation -------------------------------------------------------

    pub async fn set_viewport(&self, width: i64, height: i64, mobile: bool) -> Result<()> {
        let page = self.active_page()?;
        page.execute(SetDeviceMetricsOverrideParams::new(
            width, height, 1.0, mobile,
        ))
        .await?;
        Ok(())
    }

    pub async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        let page = self.active_page()?;
        page.set_user_agent(user_agent.to_string()).await?;
        Ok(())
    }

    // ---- storage ---------------------------------------------------------

    pub async fn get_storage(&self, session: bool) -> Result<Value> {
        let store = if session { "sessionStorage" } else { "localStorage" };
        self.evaluate_value(format!(
            "JSON.stringify(Object.fromEntries(Object.entries({store})))"
        ))
        .await
        .map(|v| match v {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::Null),
            other => other,
        })
    }

    pub async fn set_storage(&self, session: bool, key: &str, value: &str) -> Result<()> {
        let store = if session { "sessionStorage" } else { "localStorage" };
        let k = serde_json::to_string(key)?;
        let v = serde_json::to_string(value)?;
        self.execute_js(format!("{store}.setItem({k}, {v})")).await
    }

    // ---- performance -----------------------------------------------------

    pub async fn performance_metrics(&self) -> Result<Value> {
        let page = self.active_page()?;
        page.execute(perf::EnableParams::default()).await?;
        let resp = page.execute(perf::GetMetricsParams::default()).await?;
        Ok(serde_json::to_value(&resp.metrics)?)
    }

    pub async fn coverage_start(&self) -> Result<()> {
        let page = self.active_page()?;
        page.execute(profiler::EnableParams::default()).await?;
        page.execute(profiler::StartPreciseCoverageParams::default())
            .await?;
        Ok(())
    }

    pub async fn coverage_stop(&self) -> Result<Value> {
        let page = self.active_page()?;
        let taken = page
            .execute(profiler::TakePreciseCoverageParams::default())
            .await?;
        page.execute(profiler::StopPreciseCoverageParams::default())
            .await?;
        Ok(serde_json::to_value(&taken.result)?)
    }

    pub async fn heap_usage(&self) -> Result<Value> {
        let page = self.active_page()?;
        let usage = page.execute(GetHeapUsageParams::default()).await?;
        Ok(json!({
            "usedSize": usage.used_size,
            "totalSize": usage.total_size,
        }))
    }
}
