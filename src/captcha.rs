//! Captcha detection.
//!
//! Detection only: page-context probes for hCaptcha and reCAPTCHA sitekeys.
//! Solving policy lives outside this crate; `page_navigate` consumes the
//! result shape to warn the agent that a challenge is in the way.

use chromiumoxide::Page;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct CaptchaInfo {
    pub captcha_type: String,
    pub sitekey: String,
}

const HCAPTCHA_PROBE: &str = r#"
    (function() {
        const elem = document.querySelector('[data-sitekey]');
        if (elem && elem.getAttribute('data-sitekey')) {
            return elem.getAttribute('data-sitekey');
        }
        return null;
    })()
"#;

const RECAPTCHA_PROBE: &str = r#"
    (function() {
        const scripts = document.querySelectorAll('script');
        for (const script of scripts) {
            if (script.src && script.src.includes('recaptcha')) {
                const matches = document.documentElement.innerHTML.match(/"sitekey"\s*:\s*"([^"]+)"/);
                if (matches) return matches[1];
            }
        }
        return null;
    })()
"#;

/// Probe the current page for a captcha widget and return its sitekey.
pub async fn detect_on_page(page: &Page) -> Option<CaptchaInfo> {
    if let Some(sitekey) = probe(page, HCAPTCHA_PROBE).await {
        debug!(%sitekey, "hCaptcha sitekey found");
        return Some(CaptchaInfo {
            captcha_type: "hcaptcha".to_string(),
            sitekey,
        });
    }
    if let Some(sitekey) = probe(page, RECAPTCHA_PROBE).await {
        debug!(%sitekey, "reCAPTCHA sitekey found");
        return Some(CaptchaInfo {
            captcha_type: "recaptcha".to_string(),
            sitekey,
        });
    }
    None
}

async fn probe(page: &Page, script: &str) -> Option<String> {
    let result = page.evaluate(script).await.ok()?;
    let value: Option<String> = result.into_value().ok()?;
    value.filter(|s| !s.is_empty())
}
