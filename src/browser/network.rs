//! Network capture over CDP.
//!
//! Subscribes to `Network.requestWillBeSent` / `Network.responseReceived`
//! and keeps a bounded in-memory log. Bodies are fetched lazily through
//! `Network.getResponseBody` so large responses cost nothing until asked
//! for.

use std::collections::HashMap;
use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::network::{
    DisableParams, EnableParams, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Hard cap on retained requests; oldest are dropped past this.
const MAX_CAPTURED: usize = 2_000;

/// One observed request/response pair. Body is filled lazily.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedRequest {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub post_data: Option<String>,
    pub timestamp: f64,
    pub mime: Option<String>,
    pub status: Option<i64>,
    pub response_headers: HashMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct NetworkStats {
    pub total_requests: usize,
    pub completed: usize,
    pub by_mime: HashMap<String, usize>,
    pub total_body_bytes: usize,
}

/// Per-page network monitor. `enable` installs the CDP subscribers;
/// `disable` detaches them deterministically.
pub struct NetworkMonitor {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    tasks: Vec<JoinHandle<()>>,
    enabled: bool,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
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

        let mut sent = page.event_listener::<EventRequestWillBeSent>().await?;
        let store = Arc::clone(&self.requests);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = sent.next().await {
                let mut requests = store.lock().await;
                if requests.len() >= MAX_CAPTURED {
                    requests.remove(0);
                }
                requests.push(CapturedRequest {
                    request_id: id_string(&event.request_id),
                    url: event.request.url.clone(),
                    method: event.request.method.clone(),
                    headers: headers_to_map(&event.request.headers),
                    post_data: event.request.post_data.clone(),
                    timestamp: serde_value_f64(&event.timestamp),
                    mime: None,
                    status: None,
                    response_headers: HashMap::new(),
                    body: None,
                });
            }
        }));

        let mut received = page.event_listener::<EventResponseReceived>().await?;
        let store = Arc::clone(&self.requests);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = received.next().await {
                let id = id_string(&event.request_id);
                let mut requests = store.lock().await;
                if let Some(req) = requests.iter_mut().rev().find(|r| r.request_id == id) {
                    req.status = Some(event.response.status);
                    req.mime = Some(event.response.mime_type.clone());
                    req.response_headers = headers_to_map(&event.response.headers);
                }
            }
        }));

        self.enabled = true;
        debug!("network monitor enabled");
        Ok(())
    }

    /// Detach subscribers. Failures are logged, never propagated: teardown
    /// must not mask the original error path.
    pub async fn disable(&mut self, page: &Page) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.enabled {
            if let Err(e) = page.execute(DisableParams::default()).await {
                warn!(error = %e, "Network.disable failed during teardown");
            }
        }
        self.enabled = false;
    }

    pub async fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.requests.lock().await.clear();
    }

    pub async fn count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Fetch a response body through CDP, truncating past `max_bytes`.
    /// Returns (body, truncated, original_len).
    pub async fn response_body(
        &self,
        page: &Page,
        request_id: &str,
        max_bytes: usize,
    ) -> Result<(String, bool, usize)> {
        let cdp_id = {
            let requests = self.requests.lock().await;
            requests
                .iter()
                .find(|r| r.request_id == request_id)
                .map(|r| r.request_id.clone())
                .ok_or_else(|| Error::Invariant(format!("unknown request id `{request_id}`")))?
        };
        let resp = page
            .execute(GetResponseBodyParams::new(cdp_id))
            .await?;
        let mut body = if resp.base64_encoded {
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(resp.body.as_bytes())
                .unwrap_or_default();
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            resp.body.clone()
        };
        let original = body.len();
        let truncated = original > max_bytes;
        if truncated {
            body.truncate(floor_char_boundary(&body, max_bytes));
        }
        Ok((body, truncated, original))
    }

    pub async fn stats(&self) -> NetworkStats {
        let requests = self.requests.lock().await;
        let mut by_mime: HashMap<String, usize> = HashMap::new();
        let mut total_body_bytes = 0usize;
        let mut completed = 0usize;
        for r in requests.iter() {
            if r.status.is_some() {
                completed += 1;
            }
            if let Some(m) = &r.mime {
                *by_mime.entry(m.clone()).or_insert(0) += 1;
            }
            total_body_bytes += r.body.as_ref().map(String::len).unwrap_or(0);
        }
        NetworkStats {
            total_requests: requests.len(),
            completed,
            by_mime,
            total_body_bytes,
        }
    }
}

/// CDP id newtypes serialize to their inner string.
fn id_string<T: Serialize>(id: &T) -> String {
    serde_json::to_value(id)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

/// Timestamp newtypes serialize to a number.
fn serde_value_f64<T: Serialize>(value: &T) -> f64 {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}

/// CDP headers arrive as a JSON object; flatten to string pairs.
pub fn headers_to_map<T: Serialize>(headers: &T) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(headers) {
        for (k, v) in map {
            let value = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            out.insert(k, value);
        }
    }
    out
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_to_map() {
        let value = serde_json::json!({ "Content-Type": "text/html", "X-N": 7 });
        let map = headers_to_map(&value);
        assert_eq!(map["Content-Type"], "text/html");
        assert_eq!(map["X-N"], "7");
    }

    #[test]
    fn test_floor_char_boundary() {
        let s = "aé€b";
        // Never panics, never splits a char.
        for i in 0..=s.len() {
            let cut = floor_char_boundary(s, i);
            assert!(s.is_char_boundary(cut));
        }
    }
}
