//! Anti-bot stealth injection.
//!
//! The script content is data: it scrubs the obvious automation tells
//! before any page script runs, installed through
//! `Page.addScriptToEvaluateOnNewDocument`.

use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use tracing::debug;

use crate::Result;

pub const STEALTH_INIT: &str = r#"
(() => {
    // webdriver flag
    Object.defineProperty(Object.getPrototypeOf(navigator), 'webdriver', {
        get: () => undefined,
        configurable: true,
    });

    // chrome runtime stub
    if (!window.chrome) {
        window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {} };
    }

    // plugins and languages that look lived-in
    Object.defineProperty(navigator, 'plugins', {
        get: () => [1, 2, 3],
        configurable: true,
    });
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true,
    });

    // permissions API consistency with headful Chrome
    const origQuery = window.navigator.permissions && window.navigator.permissions.query;
    if (origQuery) {
        window.navigator.permissions.query = (parameters) =>
            parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : origQuery(parameters);
    }

    // WebGL vendor strings
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter.apply(this, arguments);
    };
})();
"#;

/// Install the stealth init script so it runs before every document.
pub async fn inject(page: &Page) -> Result<()> {
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_INIT))
        .await?;
    debug!("stealth init script installed");
    Ok(())
}
