//! # jsrev-tools
//!
//! JavaScript reverse-engineering tools for AI agents. Use directly or via
//! MCP.
//!
//! A stdio MCP server drives a real browser over CDP, harvests inline and
//! external scripts (service and web workers included), and layers static
//! analysis on top: obfuscation detection, multi-pass deobfuscation, taint
//! flow, crypto/signature/token pattern recognition, and browser-environment
//! shim synthesis. Oversized tool results are parked behind short-lived
//! detail tokens so the agent can drill in without blowing its context.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jsrev_tools::analysis::deob::{Deobfuscator, DeobOptions};
//!
//! let deob = Deobfuscator::new();
//! let result = deob.run_sync("var _0xab=['log'];console[_0xab[0]]('hi');", &DeobOptions::default());
//! println!("{}", result.code);
//! ```

pub mod analysis;
pub mod ast;
pub mod browser;
pub mod budget;
pub mod cache;
pub mod captcha;
pub mod collector;
pub mod compress;
pub mod config;
pub mod detail;
pub mod llm;
pub mod mcp;

pub use config::Settings;

/// Result type for jsrev-tools operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while collecting, analyzing, or serving tools.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ast::parser::ParseIssue),

    #[error("browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error("browser not launched")]
    NoBrowser,

    #[error("no page open")]
    NoPage,

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("detail token expired: {0}")]
    DetailExpired(String),

    #[error("detail token invalid: {0}")]
    DetailInvalid(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("model error (retryable): {0}")]
    ModelRetryable(String),

    #[error("model adapter not configured")]
    NoModel,

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl Error {
    /// Actionable hint surfaced alongside tool failures.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::NoBrowser => Some("call browser_launch first"),
            Error::NoPage => Some("call page_navigate to open a page"),
            Error::DetailExpired(_) => {
                Some("re-run the tool that produced this detail token")
            }
            Error::DetailInvalid(_) => {
                Some("detail ids come from earlier oversized results; check the id and path")
            }
            Error::NoModel => Some("configure model.provider and model.api_key to enable model-assisted passes"),
            Error::Timeout(_) => Some("raise the per-call timeout or simplify the request"),
            _ => None,
        }
    }
}
