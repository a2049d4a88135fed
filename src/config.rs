//! Workbench configuration.
//!
//! Loaded from a YAML file; every field has a default so a missing or empty
//! file still yields a working setup.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub browser: BrowserSettings,
    pub collector: CollectorSettings,
    pub model: ModelSettings,
    pub budget: BudgetSettings,
    pub paths: PathSettings,
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse settings from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self> {
        let settings: Settings = if yaml.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.collector.max_files_per_collect == 0 {
            return Err(Error::Config(
                "collector.max_files_per_collect must be at least 1".into(),
            ));
        }
        if self.collector.max_single_file_size == 0 {
            return Err(Error::Config(
                "collector.max_single_file_size must be at least 1".into(),
            ));
        }
        for f in &self.budget.warn_fractions {
            if !(0.0..=1.0).contains(f) {
                return Err(Error::Config(format!(
                    "budget.warn_fractions entries must be in [0, 1], got {f}"
                )));
            }
        }
        if self.model.provider != ModelProvider::None && self.model.api_key.is_none() {
            return Err(Error::Config(
                "model.api_key is required when a model provider is set".into(),
            ));
        }
        Ok(())
    }
}

/// Browser launch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run in headless mode.
    pub headless: bool,
    /// Viewport size.
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Custom user agent.
    pub user_agent: Option<String>,
    /// Navigation timeout in milliseconds.
    pub navigation_timeout_ms: u64,
    /// Per-evaluate timeout in milliseconds.
    pub evaluate_timeout_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 800,
            user_agent: None,
            navigation_timeout_ms: 30_000,
            evaluate_timeout_ms: 10_000,
        }
    }
}

/// Script-collection bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Hard cap on files recorded per collect call.
    pub max_files_per_collect: usize,
    /// Per-file size cap in bytes; larger bodies are truncated.
    pub max_single_file_size: usize,
    /// Response-path budget in bytes for query methods.
    pub max_response_size: usize,
    /// Cap on distinct URLs held in the collected-files map.
    pub max_collected_urls: usize,
    /// Overall collect timeout in milliseconds.
    pub collect_timeout_ms: u64,
    /// Extra dwell after network idle, for dynamically injected scripts.
    pub dynamic_wait_ms: u64,
    /// Memory-tier cache TTL in seconds.
    pub cache_memory_ttl_secs: u64,
    /// Disk-tier cache TTL in seconds (longer than memory).
    pub cache_disk_ttl_secs: u64,
    /// Memory-tier cache budget in bytes.
    pub cache_memory_budget: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            max_files_per_collect: 200,
            max_single_file_size: 2 * 1024 * 1024,
            max_response_size: 512 * 1024,
            max_collected_urls: 50,
            collect_timeout_ms: 60_000,
            dynamic_wait_ms: 2_000,
            cache_memory_ttl_secs: 300,
            cache_disk_ttl_secs: 3_600,
            cache_memory_budget: 64 * 1024 * 1024,
        }
    }
}

/// Model provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    None,
    Anthropic,
    Openai,
}

/// Model adapter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub provider: ModelProvider,
    pub api_key: Option<String>,
    /// Override the provider endpoint (proxies, compatible servers).
    pub endpoint: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Retry ceiling for transient failures.
    pub max_retries: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: ModelProvider::None,
            api_key: None,
            endpoint: None,
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.2,
            max_retries: 3,
        }
    }
}

/// Token-budget ledger configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    /// Session response budget, in tokens.
    pub max_tokens: usize,
    /// Warning thresholds as fractions of `max_tokens`.
    pub warn_fractions: Vec<f64>,
    /// Records older than this window are dropped by `cleanup`.
    pub window_secs: u64,
    /// Results above this serialized size are parked behind a detail token.
    pub detail_threshold_bytes: usize,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            max_tokens: 150_000,
            warn_fractions: vec![0.5, 0.75, 0.9],
            window_secs: 1800,
            detail_threshold_bytes: 50 * 1024,
        }
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub cache_dir: PathBuf,
    pub screenshot_dir: PathBuf,
    pub captcha_screenshot_dir: PathBuf,
    pub debugger_session_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./script-cache"),
            screenshot_dir: PathBuf::from("./screenshots"),
            captcha_screenshot_dir: PathBuf::from("./screenshots/captcha"),
            debugger_session_dir: PathBuf::from("./debugger-sessions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::parse("").unwrap();
        assert!(s.browser.headless);
        assert_eq!(s.collector.max_files_per_collect, 200);
        assert_eq!(s.budget.warn_fractions, vec![0.5, 0.75, 0.9]);
        assert_eq!(s.model.provider, ModelProvider::None);
    }

    #[test]
    fn test_parse_partial() {
        let s = Settings::parse(
            r#"
browser:
  headless: false
  viewport_width: 1920
collector:
  max_files_per_collect: 50
"#,
        )
        .unwrap();
        assert!(!s.browser.headless);
        assert_eq!(s.browser.viewport_width, 1920);
        // Unspecified fields keep defaults.
        assert_eq!(s.browser.viewport_height, 800);
        assert_eq!(s.collector.max_files_per_collect, 50);
    }

    #[test]
    fn test_validation_zero_files() {
        let result = Settings::parse("collector:\n  max_files_per_collect: 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_provider_needs_key() {
        let result = Settings::parse("model:\n  provider: anthropic\n");
        assert!(result.is_err());
        let s = Settings::parse("model:\n  provider: anthropic\n  api_key: sk-test\n").unwrap();
        assert_eq!(s.model.provider, ModelProvider::Anthropic);
    }

    #[test]
    fn test_validation_bad_fraction() {
        let result = Settings::parse("budget:\n  warn_fractions: [0.5, 1.5]\n");
        assert!(result.is_err());
    }
}
